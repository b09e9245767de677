//! The client facade: lazy discovery, a shared executor and session
//! lifecycle hooks.

use std::sync::{Arc, Mutex};

use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, trace};

use crate::config::ClientConfig;
use crate::discovery::verifier::DelegatedIdentityVerifier;
use crate::discovery::{HomeserverResolver, ResolvedHomeserver};
use crate::error::{Error, Result};
use crate::http::{EmptyResponse, RequestDescriptor, RequestExecutor};

type Hook = Box<dyn FnOnce() + Send>;

/// One-shot callbacks fired on session transitions. Each registered hook
/// runs at most once and is dropped after firing.
#[derive(Default)]
struct LifecycleHooks {
    on_success: Mutex<Vec<Hook>>,
    on_auth_required: Mutex<Vec<Hook>>,
    on_logout: Mutex<Vec<Hook>>,
}

impl LifecycleHooks {
    fn fire(slot: &Mutex<Vec<Hook>>) {
        let hooks = match slot.lock() {
            Ok(mut hooks) => std::mem::take(&mut *hooks),
            Err(_) => return,
        };
        for hook in hooks {
            hook();
        }
    }

    fn register(slot: &Mutex<Vec<Hook>>, hook: Hook) {
        if let Ok(mut hooks) = slot.lock() {
            hooks.push(hook);
        }
    }
}

/// A Matrix client bound to one homeserver domain.
///
/// Discovery runs once, lazily, on the first request; every caller of an
/// in-flight resolution awaits the same pass and sees the same outcome.
/// The access token is shared with the executor, so a token set before the
/// first request survives the lazy construction.
pub struct MatrixClient {
    domain: String,
    config: ClientConfig,
    resolver: HomeserverResolver,
    resolved: OnceCell<ResolvedHomeserver>,
    executor: OnceCell<RequestExecutor>,
    access_token: Arc<RwLock<Option<String>>>,
    hooks: LifecycleHooks,
}

impl MatrixClient {
    pub fn new(domain: impl Into<String>) -> Result<Self> {
        Self::with_config(domain, ClientConfig::default())
    }

    pub fn with_config(domain: impl Into<String>, config: ClientConfig) -> Result<Self> {
        let resolver = HomeserverResolver::new(config.clone())?;
        Ok(Self {
            domain: domain.into(),
            config,
            resolver,
            resolved: OnceCell::new(),
            executor: OnceCell::new(),
            access_token: Arc::new(RwLock::new(None)),
            hooks: LifecycleHooks::default(),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The resolved homeserver, running discovery on first use.
    pub async fn homeserver(&self) -> Result<&ResolvedHomeserver> {
        self.resolved
            .get_or_try_init(|| self.resolver.resolve(&self.domain))
            .await
    }

    /// The request executor, built lazily on top of the resolved homeserver.
    pub async fn executor(&self) -> Result<&RequestExecutor> {
        let resolved = self.homeserver().await?;
        self.executor
            .get_or_try_init(|| async {
                let http = self.api_client(resolved)?;
                trace!("executor bound to {resolved}");
                Ok(RequestExecutor::with_token_slot(
                    http,
                    resolved.base_url().clone(),
                    self.access_token.clone(),
                ))
            })
            .await
    }

    /// Execute a request. Fires the auth-required hooks when the server
    /// rejects the session.
    pub async fn execute<R>(&self, descriptor: &RequestDescriptor) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let result = self.executor().await?.execute(descriptor).await;
        if let Err(Error::AuthenticationRequired(_)) = &result {
            debug!("session rejected, firing auth-required hooks");
            LifecycleHooks::fire(&self.hooks.on_auth_required);
        }
        result
    }

    pub async fn get<R>(&self, path: &str) -> Result<R>
    where
        R: DeserializeOwned,
    {
        self.execute(&RequestDescriptor::get(path)).await
    }

    pub async fn post<T, R>(&self, path: &str, body: &T) -> Result<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        self.execute(&RequestDescriptor::post(path).json_body(body)?)
            .await
    }

    pub async fn put<T, R>(&self, path: &str, body: &T) -> Result<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        self.execute(&RequestDescriptor::put(path).json_body(body)?)
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<EmptyResponse> {
        self.execute(&RequestDescriptor::delete(path)).await
    }

    /// Store a session token and fire the success hooks.
    pub async fn set_access_token(&self, token: String) {
        *self.access_token.write().await = Some(token);
        LifecycleHooks::fire(&self.hooks.on_success);
    }

    /// Drop the session token and fire the logout hooks.
    pub async fn clear_access_token(&self) {
        *self.access_token.write().await = None;
        LifecycleHooks::fire(&self.hooks.on_logout);
    }

    pub async fn has_access_token(&self) -> bool {
        self.access_token.read().await.is_some()
    }

    /// Run `hook` once, after the next successful authentication.
    pub fn on_auth_success(&self, hook: impl FnOnce() + Send + 'static) {
        LifecycleHooks::register(&self.hooks.on_success, Box::new(hook));
    }

    /// Run `hook` once, when a request fails with authentication-required.
    pub fn on_auth_required(&self, hook: impl FnOnce() + Send + 'static) {
        LifecycleHooks::register(&self.hooks.on_auth_required, Box::new(hook));
    }

    /// Run `hook` once, after the session token is cleared.
    pub fn on_logout(&self, hook: impl FnOnce() + Send + 'static) {
        LifecycleHooks::register(&self.hooks.on_logout, Box::new(hook));
    }

    /// The HTTP client for API traffic, honouring an SRV identity verifier
    /// when the resolution produced one.
    fn api_client(&self, resolved: &ResolvedHomeserver) -> Result<Client> {
        let builder = Client::builder()
            .timeout(self.config.request_timeout)
            .user_agent(&self.config.user_agent);
        let builder = match resolved.verifier() {
            Some(verifier) => {
                let tls = DelegatedIdentityVerifier::new(verifier.clone())
                    .map_err(|e| Error::Resolution(e.to_string()))?
                    .into_tls_config();
                builder.use_preconfigured_tls(tls)
            },
            None => builder,
        };
        Ok(builder.build()?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn client() -> MatrixClient {
        MatrixClient::new("example.org").unwrap()
    }

    #[tokio::test]
    async fn token_lifecycle() {
        let client = client();
        assert!(!client.has_access_token().await);
        client.set_access_token("secret".to_string()).await;
        assert!(client.has_access_token().await);
        client.clear_access_token().await;
        assert!(!client.has_access_token().await);
    }

    #[tokio::test]
    async fn hooks_fire_at_most_once() {
        static FIRED: AtomicU32 = AtomicU32::new(0);
        let client = client();
        client.on_auth_success(|| {
            FIRED.fetch_add(1, Ordering::SeqCst);
        });
        client.set_access_token("a".to_string()).await;
        client.set_access_token("b".to_string()).await;
        assert_eq!(FIRED.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn logout_hook_fires_on_clear() {
        static FIRED: AtomicU32 = AtomicU32::new(0);
        let client = client();
        client.on_logout(|| {
            FIRED.fetch_add(1, Ordering::SeqCst);
        });
        client.clear_access_token().await;
        assert_eq!(FIRED.load(Ordering::SeqCst), 1);
    }
}
