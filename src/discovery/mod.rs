//! Homeserver discovery.
//!
//! Resolving a human-supplied domain into a concrete, verified base URL runs
//! through a priority-ordered chain of independent strategies:
//!
//! 1. Literal IP address parsing
//! 2. `/.well-known/matrix/client` delegation
//! 3. `_matrix._tcp` SRV lookup (federation policy only)
//! 4. Direct fallback to the default federation port
//!
//! Strategies report "not applicable" as `None` and never abort the chain;
//! the orchestrator in [`resolver`] composes them and runs the verification
//! probe against the winning candidate.

pub mod address;
pub mod direct;
pub mod resolver;
pub mod srv;
pub mod verifier;
pub mod well_known;

use std::fmt;

use async_trait::async_trait;
use url::Url;

pub use resolver::HomeserverResolver;
pub use verifier::PeerIdentityVerifier;

/// Which discovery steps a resolver runs.
///
/// Both policies share the same strategy primitives; the federation variant
/// additionally consults SRV records between well-known and the direct
/// fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionPolicy {
    /// Literal IP, well-known, direct fallback.
    #[default]
    Client,
    /// Literal IP, well-known, SRV record, direct fallback.
    Federation,
}

/// A resolved, immutable homeserver address.
///
/// Created by whichever discovery strategy succeeds and cached for the
/// lifetime of a client session; never mutated, only replaced.
#[derive(Debug, Clone)]
pub struct ResolvedHomeserver {
    base_url: Url,
    verifier: Option<PeerIdentityVerifier>,
}

impl ResolvedHomeserver {
    pub fn new(base_url: Url) -> Self {
        Self { base_url, verifier: None }
    }

    /// A homeserver whose TLS identity must be checked against the original
    /// domain rather than the connected host (SRV delegation).
    pub fn with_verifier(base_url: Url, verifier: PeerIdentityVerifier) -> Self {
        Self { base_url, verifier: Some(verifier) }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn verifier(&self) -> Option<&PeerIdentityVerifier> {
        self.verifier.as_ref()
    }
}

impl fmt::Display for ResolvedHomeserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_url)?;
        if let Some(verifier) = &self.verifier {
            write!(f, " (identity checked against {})", verifier.domain())?;
        }
        Ok(())
    }
}

/// One step of the discovery chain.
///
/// An attempt returns `Some` candidate or `None` for "not applicable";
/// malformed input a strategy detects itself is logged and also reported as
/// `None`. Only the orchestrator decides that resolution has failed.
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, domain: &str) -> Option<ResolvedHomeserver>;
}
