//! TLS peer-identity verification for delegated homeservers.
//!
//! SRV-based discovery points the client at a different host than the one
//! the user named, so the standard hostname check (against the *connected*
//! host) has to be replaced with a check against the *requested* domain.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, Error as TlsError, RootCertStore, SignatureScheme};
use tracing::{error, trace};
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::{FromDer, X509Certificate};

/// Validates a peer certificate's subject alternative names against an
/// expected domain, with wildcard support.
///
/// Only DNS-name and IP-address entries are considered; all other entry
/// types are ignored. Absent, non-matching, or unparsable names fail the
/// check.
#[derive(Debug, Clone)]
pub struct PeerIdentityVerifier {
    domain: String,
}

impl PeerIdentityVerifier {
    pub fn new(domain: impl Into<String>) -> Self {
        Self { domain: domain.into() }
    }

    /// The domain the peer certificate must be authorized to speak for.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Whether a single subject-alternative name covers the expected domain.
    ///
    /// A name matches if it equals the domain case-insensitively, or if it
    /// is a `*.`-wildcard and the domain ends with the remainder after the
    /// wildcard character (which keeps the dot, so `*.example.com` never
    /// matches `evilexample.com`).
    pub fn matches_name(&self, alt_name: &str) -> bool {
        if alt_name.starts_with("*.") {
            let suffix = &alt_name[1..];
            trace!("check domain {:?} against wildcard {alt_name:?}", self.domain);
            self.domain
                .to_lowercase()
                .ends_with(&suffix.to_lowercase())
        } else {
            trace!("compare domain {:?} with subject name {alt_name:?}", self.domain);
            self.domain.eq_ignore_ascii_case(alt_name)
        }
    }

    /// Check a DER-encoded certificate's subject alternative names.
    /// Returns `true` on the first match, `false` if there are no usable
    /// names or the certificate cannot be parsed.
    pub fn verify_cert_der(&self, der: &[u8]) -> bool {
        let cert = match X509Certificate::from_der(der) {
            Ok((_, cert)) => cert,
            Err(e) => {
                error!("unable to parse peer certificate: {e}");
                return false;
            },
        };

        let mut seen_any = false;
        for ext in cert.extensions() {
            let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() else {
                continue;
            };
            for name in &san.general_names {
                match name {
                    GeneralName::DNSName(dns_name) => {
                        seen_any = true;
                        trace!("found subject name: {dns_name}");
                        if self.matches_name(dns_name) {
                            return true;
                        }
                    },
                    GeneralName::IPAddress(bytes) => {
                        seen_any = true;
                        if let Some(rendered) = render_ip(bytes) {
                            trace!("found subject address: {rendered}");
                            if self.matches_name(&rendered) {
                                return true;
                            }
                        }
                    },
                    _ => trace!("unusable subject type, ignored"),
                }
            }
        }

        if !seen_any {
            trace!("no usable subject alternative names");
        }
        false
    }
}

fn render_ip(bytes: &[u8]) -> Option<String> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(Ipv4Addr::from(octets).to_string())
        },
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(Ipv6Addr::from(octets).to_string())
        },
        _ => None,
    }
}

/// A rustls certificate verifier that chains to the default webpki verifier
/// but checks the peer's identity against the originally requested domain
/// instead of the connected host.
///
/// Chain validation (signatures, expiry, trust anchors) is always performed
/// by the inner verifier; only when the inner verifier rejects the name does
/// the [`PeerIdentityVerifier`] SAN matcher get the final word.
#[derive(Debug)]
pub struct DelegatedIdentityVerifier {
    inner: Arc<WebPkiServerVerifier>,
    identity: PeerIdentityVerifier,
}

impl DelegatedIdentityVerifier {
    pub fn new(identity: PeerIdentityVerifier) -> Result<Self, TlsError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let inner = WebPkiServerVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| TlsError::General(e.to_string()))?;
        Ok(Self { inner, identity })
    }

    /// A TLS client config with this verifier installed, suitable for
    /// [`reqwest::ClientBuilder::use_preconfigured_tls`].
    pub fn into_tls_config(self) -> rustls::ClientConfig {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(self))
            .with_no_client_auth()
    }
}

impl ServerCertVerifier for DelegatedIdentityVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        let expected = ServerName::try_from(self.identity.domain().to_owned())
            .map_err(|_| TlsError::General(format!("invalid expected domain: {}", self.identity.domain())))?;

        match self
            .inner
            .verify_server_cert(end_entity, intermediates, &expected, ocsp_response, now)
        {
            Ok(verified) => Ok(verified),
            Err(TlsError::InvalidCertificate(
                CertificateError::NotValidForName
                | CertificateError::NotValidForNameContext { .. },
            )) => {
                if self.identity.verify_cert_der(end_entity.as_ref()) {
                    trace!("peer certificate matched {} via subject names", self.identity.domain());
                    Ok(ServerCertVerified::assertion())
                } else {
                    Err(TlsError::InvalidCertificate(CertificateError::NotValidForName))
                }
            },
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
