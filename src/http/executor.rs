//! Response classification and the retry loop.

use std::sync::Arc;

use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{Error, M_INTERNAL, M_LIMIT_EXCEEDED, Result};
use crate::http::backoff::RetryState;
use crate::http::request::RequestDescriptor;

/// Matrix error response format per specification.
#[derive(Debug, Clone, Default, Deserialize)]
struct MatrixErrorBody {
    #[serde(default)]
    errcode: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    retry_after_ms: Option<u64>,
}

/// Interactive-authentication flow description returned with a 401.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthenticationFlows {
    #[serde(default)]
    pub flows: Vec<AuthenticationStages>,
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// One auth flow: the ordered stages a client must complete.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthenticationStages {
    #[serde(default)]
    pub stages: Vec<String>,
}

/// Response body for endpoints that return an empty JSON object.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EmptyResponse {}

/// Executes requests against a resolved base URL.
///
/// Every response is classified into success, authentication-required,
/// rate-limited or generic failure; only the rate-limited case is retried,
/// transparently, with capped exponential backoff. Retried requests reuse
/// the identical descriptor, only timing changes.
#[derive(Clone)]
pub struct RequestExecutor {
    http: Client,
    base_url: Url,
    access_token: Arc<RwLock<Option<String>>>,
}

impl RequestExecutor {
    pub fn new(http: Client, base_url: Url) -> Self {
        Self::with_token_slot(http, base_url, Arc::new(RwLock::new(None)))
    }

    /// An executor sharing an externally owned access-token slot, so tokens
    /// set before resolution completes are picked up.
    pub fn with_token_slot(
        http: Client,
        base_url: Url,
        access_token: Arc<RwLock<Option<String>>>,
    ) -> Self {
        Self { http, base_url, access_token }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Set the access token used for authenticated requests.
    pub async fn set_access_token(&self, token: String) {
        *self.access_token.write().await = Some(token);
    }

    /// Clear the access token (logout).
    pub async fn clear_access_token(&self) {
        *self.access_token.write().await = None;
    }

    pub async fn has_access_token(&self) -> bool {
        self.access_token.read().await.is_some()
    }

    /// Execute a request, driving the rate-limit retry loop to completion.
    pub async fn execute<R>(&self, descriptor: &RequestDescriptor) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let mut retry = RetryState::initial();

        loop {
            let response = self.dispatch(descriptor).await?;
            let status = response.status();
            debug!("response status: {status}");

            if status.is_success() {
                return Ok(response.json::<R>().await?);
            }

            match status {
                StatusCode::UNAUTHORIZED => {
                    debug!("authentication required");
                    let flows = response
                        .json::<AuthenticationFlows>()
                        .await
                        .unwrap_or_default();
                    return Err(Error::AuthenticationRequired(flows));
                },
                StatusCode::TOO_MANY_REQUESTS => {
                    let envelope = response
                        .json::<MatrixErrorBody>()
                        .await
                        .unwrap_or_default();
                    warn!(
                        retry_after_ms = envelope.retry_after_ms,
                        "rate limited"
                    );

                    retry = retry.next(envelope.retry_after_ms);
                    if retry.exhausted() {
                        error!("cannot send request, maximum retry delay reached");
                        return Err(Error::RateLimited {
                            errcode: envelope
                                .errcode
                                .unwrap_or_else(|| M_LIMIT_EXCEEDED.to_string()),
                            error: envelope.error.unwrap_or_default(),
                            retry_after_ms: envelope.retry_after_ms,
                        });
                    }
                    trace!(
                        delay_ms = retry.delay_ms(),
                        attempt = retry.attempt(),
                        "rescheduling request"
                    );
                    retry.wait().await;
                },
                _ => return Err(Self::protocol_error(status, response).await),
            }
        }
    }

    async fn protocol_error(status: StatusCode, response: reqwest::Response) -> Error {
        let envelope = response.json::<MatrixErrorBody>().await.ok();
        match envelope {
            Some(body) if body.errcode.is_some() || body.error.is_some() => Error::Api {
                status: status.as_u16(),
                errcode: body.errcode.unwrap_or_else(|| M_INTERNAL.to_string()),
                error: body.error.unwrap_or_default(),
            },
            _ => Error::Api {
                status: status.as_u16(),
                errcode: M_INTERNAL.to_string(),
                error: "Missing error response.".to_string(),
            },
        }
    }

    /// Build and send one attempt.
    async fn dispatch(&self, descriptor: &RequestDescriptor) -> Result<reqwest::Response> {
        let url = descriptor.build_url(&self.base_url)?;
        let mut request = self
            .http
            .request(descriptor.method().clone(), url)
            .header(ACCEPT, descriptor.accepted_content_type());

        for (name, value) in descriptor.header_params() {
            request = request.header(name, value);
        }
        if let Some(token) = self.access_token.read().await.as_deref() {
            let token = token.trim();
            if !token.is_empty() {
                request = request.bearer_auth(token);
            }
        }
        if let Some(body) = descriptor.body() {
            request = request.json(body);
        }

        Ok(request.send().await?)
    }

    /// Convenience method for GET requests.
    pub async fn get<R>(&self, path: &str) -> Result<R>
    where
        R: DeserializeOwned,
    {
        self.execute(&RequestDescriptor::get(path)).await
    }

    /// Convenience method for POST requests.
    pub async fn post<T, R>(&self, path: &str, body: &T) -> Result<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        self.execute(&RequestDescriptor::post(path).json_body(body)?)
            .await
    }

    /// Convenience method for PUT requests.
    pub async fn put<T, R>(&self, path: &str, body: &T) -> Result<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        self.execute(&RequestDescriptor::put(path).json_body(body)?)
            .await
    }

    /// Convenience method for DELETE requests.
    pub async fn delete(&self, path: &str) -> Result<EmptyResponse> {
        self.execute(&RequestDescriptor::delete(path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_tolerates_partial_envelopes() {
        let body: MatrixErrorBody =
            serde_json::from_str(r#"{"errcode":"M_FORBIDDEN"}"#).unwrap();
        assert_eq!(body.errcode.as_deref(), Some("M_FORBIDDEN"));
        assert!(body.error.is_none());
        assert!(body.retry_after_ms.is_none());
    }

    #[test]
    fn flows_deserialize() {
        let flows: AuthenticationFlows = serde_json::from_str(
            r#"{"flows":[{"stages":["m.login.password","m.login.dummy"]}],"session":"abc"}"#,
        )
        .unwrap();
        assert_eq!(flows.flows[0].stages.len(), 2);
        assert_eq!(flows.session.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn token_slot_is_shared() {
        let slot = Arc::new(RwLock::new(None));
        let executor = RequestExecutor::with_token_slot(
            Client::new(),
            Url::parse("https://matrix.example.org").unwrap(),
            slot.clone(),
        );
        *slot.write().await = Some("secret".to_string());
        assert!(executor.has_access_token().await);
        executor.clear_access_token().await;
        assert!(slot.read().await.is_none());
    }
}
