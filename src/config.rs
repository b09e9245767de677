//! Client configuration.

use std::env;
use std::time::Duration;

use crate::discovery::ResolutionPolicy;

/// Environment variable that disables the homeserver verification probe.
/// Intended only for trusted or test environments.
pub const DISABLE_VERIFICATION_ENV: &str = "FERRIX_DISABLE_HOMESERVER_VERIFICATION";

/// Matrix client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User agent string sent on every request.
    pub user_agent: String,
    /// Timeout for API requests.
    pub request_timeout: Duration,
    /// Timeout for discovery fetches and the verification probe.
    pub probe_timeout: Duration,
    /// Which discovery steps to run (client vs. federation).
    pub resolution_policy: ResolutionPolicy,
    /// Probe the resolved base URL's versions endpoint before accepting it.
    pub verify_homeserver: bool,
    /// Fetch the well-known document over HTTPS. Disabled only by tests
    /// that point the resolver at a plain-HTTP mock server.
    pub well_known_https: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("ferrix/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            resolution_policy: ResolutionPolicy::Client,
            verify_homeserver: true,
            well_known_https: true,
        }
    }
}

impl ClientConfig {
    /// Whether the verification probe is disabled, either through the config
    /// flag or the escape-hatch environment variable.
    pub fn verification_disabled(&self) -> bool {
        if !self.verify_homeserver {
            return true;
        }
        matches!(
            env::var(DISABLE_VERIFICATION_ENV).as_deref(),
            Ok("true") | Ok("1")
        )
    }
}
