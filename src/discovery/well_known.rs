//! `/.well-known/matrix/client` delegation lookup.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use url::Url;

use super::{DiscoveryStrategy, ResolvedHomeserver};

/// Client server-discovery document.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryInfo {
    #[serde(rename = "m.homeserver")]
    pub homeserver: HomeserverInfo,
    #[serde(rename = "m.identity_server", default, skip_serializing_if = "Option::is_none")]
    pub identity_server: Option<serde_json::Value>,
}

/// The `m.homeserver` section of the discovery document.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HomeserverInfo {
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Fetches and parses the well-known discovery document.
///
/// Explicitly best-effort: any I/O failure, timeout, non-2xx status or
/// malformed body is logged and reported as "not applicable" so the chain
/// moves on.
pub struct WellKnownDiscoverer {
    http: Client,
    use_https: bool,
}

impl WellKnownDiscoverer {
    pub fn new(http: Client, use_https: bool) -> Self {
        Self { http, use_https }
    }

    fn well_known_url(&self, domain: &str) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        format!("{scheme}://{domain}/.well-known/matrix/client")
    }
}

#[async_trait]
impl DiscoveryStrategy for WellKnownDiscoverer {
    fn name(&self) -> &'static str {
        "well-known"
    }

    async fn attempt(&self, domain: &str) -> Option<ResolvedHomeserver> {
        trace!("try resolve via well-known");
        let url = self.well_known_url(domain);

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("unable to fetch {url}: {e}");
                return None;
            },
        };
        let status = response.status();
        if !status.is_success() {
            debug!("well-known request to {url} returned HTTP {status}");
            return None;
        }

        let info = match response.json::<DiscoveryInfo>().await {
            Ok(info) => info,
            Err(e) => {
                debug!("malformed well-known document from {url}: {e}");
                return None;
            },
        };

        let base_url = info.homeserver.base_url?;
        let trimmed = base_url.trim();
        if trimmed.is_empty() {
            debug!("well-known document from {url} has a blank base_url");
            return None;
        }

        match Url::parse(trimmed) {
            Ok(parsed) => Some(ResolvedHomeserver::new(parsed)),
            Err(e) => {
                warn!("malformed homeserver url {trimmed}: {e}");
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_discovery_document() {
        let info: DiscoveryInfo = serde_json::from_str(
            r#"{"m.homeserver":{"base_url":"https://matrix.example.org"},"m.identity_server":{"base_url":"https://id.example.org"}}"#,
        )
        .unwrap();
        assert_eq!(
            info.homeserver.base_url.as_deref(),
            Some("https://matrix.example.org")
        );
        assert!(info.identity_server.is_some());
    }

    #[test]
    fn missing_base_url_parses_as_none() {
        let info: DiscoveryInfo =
            serde_json::from_str(r#"{"m.homeserver":{}}"#).unwrap();
        assert!(info.homeserver.base_url.is_none());
    }

    #[test]
    fn well_known_url_scheme() {
        let https = WellKnownDiscoverer::new(Client::new(), true);
        assert_eq!(
            https.well_known_url("example.org"),
            "https://example.org/.well-known/matrix/client"
        );
        let http = WellKnownDiscoverer::new(Client::new(), false);
        assert_eq!(
            http.well_known_url("localhost:3000"),
            "http://localhost:3000/.well-known/matrix/client"
        );
    }
}
