//! Literal IP address recognition.

use std::net::IpAddr;

use async_trait::async_trait;
use tracing::{error, trace};
use url::Url;

use super::{DiscoveryStrategy, ResolvedHomeserver};

/// Recognizes literal IPv4/IPv6 host strings, optionally with a port suffix,
/// and synthesizes an HTTPS URL directly from the literal. No I/O. No
/// verifier is attached: nothing was delegated, so trust is the caller's
/// responsibility.
pub struct AddressParser;

/// Split `host[:port]` / `[v6]` / `[v6]:port` into host and optional port.
///
/// An unbracketed string with more than one colon is taken as a bare IPv6
/// address with no port.
pub(crate) fn split_host_port(domain: &str) -> Option<(&str, Option<u16>)> {
    if domain.is_empty() {
        return None;
    }

    if let Some(rest) = domain.strip_prefix('[') {
        let (host, remainder) = rest.split_once(']')?;
        if remainder.is_empty() {
            return Some((host, None));
        }
        let port = remainder.strip_prefix(':')?.parse().ok()?;
        return Some((host, Some(port)));
    }

    match domain.rfind(':') {
        Some(idx) => {
            let host = &domain[..idx];
            if host.contains(':') {
                // Unbracketed IPv6, the colon is not a port separator.
                return Some((domain, None));
            }
            let port = domain[idx + 1..].parse().ok()?;
            Some((host, Some(port)))
        },
        None => Some((domain, None)),
    }
}

#[async_trait]
impl DiscoveryStrategy for AddressParser {
    fn name(&self) -> &'static str {
        "ip-literal"
    }

    async fn attempt(&self, domain: &str) -> Option<ResolvedHomeserver> {
        trace!("try resolve as ip address");

        let (host, port) = split_host_port(domain)?;
        let ip: IpAddr = host.parse().ok()?;

        let rendered = match ip {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{v6}]"),
        };
        let candidate = match port {
            Some(port) => format!("https://{rendered}:{port}"),
            None => format!("https://{rendered}"),
        };

        match Url::parse(&candidate) {
            Ok(url) => Some(ResolvedHomeserver::new(url)),
            Err(e) => {
                error!("unable to build url from ip literal {domain}: {e}");
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn attempt(domain: &str) -> Option<ResolvedHomeserver> {
        AddressParser.attempt(domain).await
    }

    #[tokio::test]
    async fn ipv4_literal() {
        let resolved = attempt("192.168.1.1").await.unwrap();
        assert_eq!(resolved.base_url().as_str(), "https://192.168.1.1/");
        assert!(resolved.verifier().is_none());
    }

    #[tokio::test]
    async fn ipv4_literal_with_port() {
        let resolved = attempt("1.2.3.4:8080").await.unwrap();
        assert_eq!(resolved.base_url().as_str(), "https://1.2.3.4:8080/");
    }

    #[tokio::test]
    async fn bracketed_ipv6_with_port() {
        let resolved = attempt("[::1]:8448").await.unwrap();
        assert_eq!(resolved.base_url().host_str(), Some("[::1]"));
        assert_eq!(resolved.base_url().port(), Some(8448));
    }

    #[tokio::test]
    async fn bare_ipv6() {
        let resolved = attempt("2001:db8::1").await.unwrap();
        assert_eq!(resolved.base_url().host_str(), Some("[2001:db8::1]"));
    }

    #[tokio::test]
    async fn hostname_is_not_a_literal() {
        assert!(attempt("example.com").await.is_none());
        assert!(attempt("matrix.example.com:8448").await.is_none());
    }

    #[tokio::test]
    async fn invalid_port_is_not_a_literal() {
        assert!(attempt("1.2.3.4:notaport").await.is_none());
        assert!(attempt("1.2.3.4:99999").await.is_none());
    }

    #[test]
    fn split_variants() {
        assert_eq!(split_host_port("example.com"), Some(("example.com", None)));
        assert_eq!(
            split_host_port("example.com:8448"),
            Some(("example.com", Some(8448)))
        );
        assert_eq!(split_host_port("[::1]:8448"), Some(("::1", Some(8448))));
        assert_eq!(split_host_port("[2001:db8::1]"), Some(("2001:db8::1", None)));
        assert_eq!(split_host_port("2001:db8::1"), Some(("2001:db8::1", None)));
        assert_eq!(split_host_port(""), None);
        assert_eq!(split_host_port("[::1"), None);
    }
}
