//! `_matrix._tcp` SRV record lookup.

use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use tracing::{debug, trace, warn};
use url::Url;

use super::verifier::PeerIdentityVerifier;
use super::{DiscoveryStrategy, ResolvedHomeserver};

const SRV_FIELD_COUNT: usize = 4;
const SRV_PORT_INDEX: usize = 2;
const SRV_TARGET_INDEX: usize = 3;

/// Queries the `_matrix._tcp.<domain>` SRV record and builds a base URL from
/// its port and target fields.
///
/// Because SRV delegation points the client at a different host than the one
/// the user named, the resolved homeserver carries a [`PeerIdentityVerifier`]
/// scoped to the original domain.
pub struct ServiceRecordDiscoverer {
    resolver: TokioResolver,
    timeout: Duration,
}

impl ServiceRecordDiscoverer {
    pub fn new(timeout: Duration) -> Result<Self, hickory_resolver::ResolveError> {
        let resolver = TokioResolver::builder_tokio()?.build();
        Ok(Self { resolver, timeout })
    }
}

/// Parse the presentation form of an SRV record value, the 4-tuple
/// `priority weight port target`. Only port and target are used; a trailing
/// dot on the target is stripped. Malformed records yield `None`.
pub(crate) fn parse_srv_value(record: &str) -> Option<Url> {
    trace!("srv record: {record}");
    let fields: Vec<&str> = record.split_whitespace().collect();
    if fields.len() != SRV_FIELD_COUNT {
        debug!("unable to parse srv record: {record}");
        return None;
    }

    let target = fields[SRV_TARGET_INDEX].trim_end_matches('.');
    let candidate = format!("https://{target}:{}", fields[SRV_PORT_INDEX]);
    match Url::parse(&candidate) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!("malformed homeserver url {candidate}: {e}");
            None
        },
    }
}

#[async_trait]
impl DiscoveryStrategy for ServiceRecordDiscoverer {
    fn name(&self) -> &'static str {
        "srv-record"
    }

    async fn attempt(&self, domain: &str) -> Option<ResolvedHomeserver> {
        trace!("try resolve via srv record");
        let srv_name = format!("_matrix._tcp.{domain}");

        let lookup = match tokio::time::timeout(
            self.timeout,
            self.resolver.srv_lookup(srv_name.as_str()),
        )
        .await
        {
            Ok(Ok(lookup)) => lookup,
            Ok(Err(e)) => {
                debug!("unable to fetch srv record {srv_name}: {e}");
                return None;
            },
            Err(_) => {
                debug!("srv lookup timeout for {srv_name}");
                return None;
            },
        };

        // Lower priority wins; among equals, higher weight is preferred.
        let mut records: Vec<_> = lookup.iter().collect();
        records.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| b.weight().cmp(&a.weight()))
        });
        let srv = records.first()?;

        let value = format!(
            "{} {} {} {}",
            srv.priority(),
            srv.weight(),
            srv.port(),
            srv.target()
        );
        let url = parse_srv_value(&value)?;
        Some(ResolvedHomeserver::with_verifier(
            url,
            PeerIdentityVerifier::new(domain),
        ))
    }
}
