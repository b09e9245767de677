//! Discovery orchestrator.

use std::collections::HashMap;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::discovery::address::AddressParser;
use crate::discovery::direct::DirectFallbackResolver;
use crate::discovery::srv::ServiceRecordDiscoverer;
use crate::discovery::verifier::DelegatedIdentityVerifier;
use crate::discovery::well_known::WellKnownDiscoverer;
use crate::discovery::{DiscoveryStrategy, ResolutionPolicy, ResolvedHomeserver};

/// Response of the `/_matrix/client/versions` endpoint. Only used as the
/// verification probe; content beyond parseability is diagnostic.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionsResponse {
    pub versions: Vec<String>,
    #[serde(default)]
    pub unstable_features: HashMap<String, bool>,
}

/// Runs the discovery chain in a fixed priority order and validates the
/// winning candidate by probing its versions endpoint.
///
/// Literal IPs bypass delegation entirely; well-known is preferred over SRV
/// because it works over ordinary HTTPS; SRV is still authoritative and so
/// beats the blind default-port guess, which comes last. Single pass, no
/// retries at this level.
pub struct HomeserverResolver {
    strategies: Vec<Box<dyn DiscoveryStrategy>>,
    http: Client,
    config: ClientConfig,
}

impl HomeserverResolver {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.probe_timeout)
            .user_agent(&config.user_agent)
            .build()?;

        let mut strategies: Vec<Box<dyn DiscoveryStrategy>> = vec![
            Box::new(AddressParser),
            Box::new(WellKnownDiscoverer::new(http.clone(), config.well_known_https)),
        ];
        if config.resolution_policy == ResolutionPolicy::Federation {
            match ServiceRecordDiscoverer::new(config.probe_timeout) {
                Ok(discoverer) => strategies.push(Box::new(discoverer)),
                // Without a DNS context the rest of the chain still applies.
                Err(e) => warn!("unable to initialize dns resolver, skipping srv lookup: {e}"),
            }
        }
        strategies.push(Box::new(DirectFallbackResolver));

        Ok(Self { strategies, http, config })
    }

    /// Resolve a domain into a verified homeserver base URL.
    pub async fn resolve(&self, domain: &str) -> Result<ResolvedHomeserver> {
        trace!("resolve: {domain}");

        for strategy in &self.strategies {
            if let Some(candidate) = strategy.attempt(domain).await {
                debug!(
                    strategy = strategy.name(),
                    url = %candidate.base_url(),
                    "discovery produced a candidate"
                );
                return self.validate(domain, candidate).await;
            }
            trace!(strategy = strategy.name(), "not applicable, trying next");
        }

        error!("unable to resolve homeserver url of the domain: {domain}");
        Err(Error::Resolution(domain.to_string()))
    }

    async fn validate(
        &self,
        domain: &str,
        candidate: ResolvedHomeserver,
    ) -> Result<ResolvedHomeserver> {
        if self.config.verification_disabled() {
            trace!("homeserver url verification disabled");
        } else {
            trace!("check homeserver url: {candidate}");
            if !self.probe_versions(&candidate).await {
                error!("unable to check the homeserver url: {candidate}");
                return Err(Error::Resolution(domain.to_string()));
            }
        }
        info!("resolved: {domain} => {candidate}");
        Ok(candidate)
    }

    /// Probe the candidate's versions endpoint. A non-2xx or unreachable
    /// probe invalidates the whole resolution.
    async fn probe_versions(&self, candidate: &ResolvedHomeserver) -> bool {
        let url = match candidate.base_url().join("/_matrix/client/versions") {
            Ok(url) => url,
            Err(e) => {
                error!("unable to build versions url for {candidate}: {e}");
                return false;
            },
        };

        let client = match candidate.verifier() {
            Some(verifier) => match self.delegated_client(verifier.clone()) {
                Ok(client) => client,
                Err(e) => {
                    error!("unable to build delegated tls client: {e}");
                    return false;
                },
            },
            None => self.http.clone(),
        };

        let response = match client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("wrong url {url}: {e}");
                return false;
            },
        };
        let status = response.status();
        if !status.is_success() {
            error!("versions probe of {url} returned HTTP {status}");
            return false;
        }

        match response.json::<VersionsResponse>().await {
            Ok(versions) => {
                trace!(
                    "server {} speaks: {}",
                    candidate.base_url(),
                    versions.versions.join(", ")
                );
                true
            },
            Err(e) => {
                error!("versions probe of {url} returned an unparseable body: {e}");
                false
            },
        }
    }

    /// A one-off client whose TLS identity check runs against the original
    /// domain instead of the connected host.
    fn delegated_client(
        &self,
        verifier: crate::discovery::PeerIdentityVerifier,
    ) -> Result<Client> {
        let tls = DelegatedIdentityVerifier::new(verifier)
            .map_err(|e| Error::Resolution(e.to_string()))?
            .into_tls_config();
        Ok(Client::builder()
            .timeout(self.config.probe_timeout)
            .user_agent(&self.config.user_agent)
            .use_preconfigured_tls(tls)
            .build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_policy_skips_srv() {
        let resolver = HomeserverResolver::new(ClientConfig::default()).unwrap();
        let names: Vec<_> = resolver.strategies.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["ip-literal", "well-known", "direct-fallback"]);
    }

    #[tokio::test]
    async fn federation_policy_consults_srv() {
        let config = ClientConfig {
            resolution_policy: ResolutionPolicy::Federation,
            ..ClientConfig::default()
        };
        let resolver = HomeserverResolver::new(config).unwrap();
        let names: Vec<_> = resolver.strategies.iter().map(|s| s.name()).collect();
        // SRV sits between well-known and the fallback (unless the host has
        // no usable DNS configuration, in which case the step is skipped).
        if names.len() == 4 {
            assert_eq!(
                names,
                ["ip-literal", "well-known", "srv-record", "direct-fallback"]
            );
        } else {
            assert_eq!(names, ["ip-literal", "well-known", "direct-fallback"]);
        }
    }

    #[tokio::test]
    async fn literal_ip_resolves_without_probe_when_disabled() {
        let config = ClientConfig {
            verify_homeserver: false,
            ..ClientConfig::default()
        };
        let resolver = HomeserverResolver::new(config).unwrap();
        let resolved = resolver.resolve("1.2.3.4:8080").await.unwrap();
        assert_eq!(resolved.base_url().as_str(), "https://1.2.3.4:8080/");
    }
}
