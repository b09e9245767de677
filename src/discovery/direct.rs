//! Direct fallback to the default federation port.

use async_trait::async_trait;
use tracing::{trace, warn};
use url::Url;

use super::{DiscoveryStrategy, ResolvedHomeserver};

/// Default federation port used when the domain embeds no port of its own.
pub const DEFAULT_PORT: u16 = 8448;

const SCHEME_PREFIX: &str = "https://";

/// The strategy of last resort: combine the domain with an embedded port if
/// one is present (or the default federation port otherwise) and an `https`
/// scheme unless the input already specifies one. A malformed result here is
/// a genuine resolution failure.
pub struct DirectFallbackResolver;

#[async_trait]
impl DiscoveryStrategy for DirectFallbackResolver {
    fn name(&self) -> &'static str {
        "direct-fallback"
    }

    async fn attempt(&self, domain: &str) -> Option<ResolvedHomeserver> {
        trace!("try resolve via direct url");

        let with_port = if domain.rfind(':').is_some() {
            domain.to_string()
        } else {
            format!("{domain}:{DEFAULT_PORT}")
        };
        let candidate = if domain.contains("://") {
            with_port
        } else {
            format!("{SCHEME_PREFIX}{with_port}")
        };

        match Url::parse(&candidate) {
            Ok(url) => Some(ResolvedHomeserver::new(url)),
            Err(e) => {
                warn!("malformed homeserver url {candidate}: {e}");
                None
            },
        }
    }
}
