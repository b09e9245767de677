//! Request execution.
//!
//! [`RequestExecutor`] builds an HTTP request from a [`RequestDescriptor`],
//! dispatches it against the resolved base URL and classifies the response:
//! success, authentication required, rate limited (retried with capped
//! exponential backoff) or generic failure.

pub mod backoff;
pub mod executor;
pub mod request;

pub use backoff::RetryState;
pub use executor::{AuthenticationFlows, AuthenticationStages, EmptyResponse, RequestExecutor};
pub use request::RequestDescriptor;
