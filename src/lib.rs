//! Matrix client core: homeserver discovery and resilient request
//! execution.
//!
//! A [`MatrixClient`] turns a human-supplied domain (the part after the `:`
//! in a Matrix ID) into a verified base URL through a chain of discovery
//! strategies, then executes API requests against it with automatic,
//! transparent retry of rate-limited responses.
//!
//! ```no_run
//! use ferrix::MatrixClient;
//!
//! # async fn run() -> ferrix::Result<()> {
//! let client = MatrixClient::new("example.org")?;
//! let versions: ferrix::VersionsResponse =
//!     client.get("/_matrix/client/versions").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod http;

pub use client::MatrixClient;
pub use config::{ClientConfig, DISABLE_VERIFICATION_ENV};
pub use discovery::resolver::VersionsResponse;
pub use discovery::{
    HomeserverResolver, PeerIdentityVerifier, ResolutionPolicy, ResolvedHomeserver,
};
pub use error::{Error, M_INTERNAL, M_LIMIT_EXCEEDED, Result};
pub use http::{
    AuthenticationFlows, AuthenticationStages, EmptyResponse, RequestDescriptor, RequestExecutor,
};
