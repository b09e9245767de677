//! Request descriptors.

use std::collections::HashMap;

use reqwest::Method;
use serde::Serialize;
use url::Url;

use crate::error::Result;

const APPLICATION_JSON: &str = "application/json";

/// Everything needed to build one HTTP request: the target operation (method
/// and path template), path/query/header parameters and an optional JSON
/// body.
///
/// Built fresh per call and cloned per attempt, so retries reuse the
/// identical request and concurrent calls never share a mutable parameter
/// set.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    path_params: HashMap<String, String>,
    query_params: HashMap<String, String>,
    header_params: HashMap<String, String>,
    body: Option<serde_json::Value>,
    accept: String,
}

impl RequestDescriptor {
    /// A descriptor for `method` against a path template. Path parameters
    /// use `{name}` placeholders, e.g.
    /// `/_matrix/client/v3/rooms/{roomId}/leave`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            path_params: HashMap::new(),
            query_params: HashMap::new(),
            header_params: HashMap::new(),
            body: None,
            accept: APPLICATION_JSON.to_string(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Bind a `{name}` placeholder. The value is percent-encoded when the
    /// URL is built.
    pub fn path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(name.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header_params.insert(name.into(), value.into());
        self
    }

    pub fn json_body<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn accept(mut self, content_type: impl Into<String>) -> Self {
        self.accept = content_type.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    pub fn accepted_content_type(&self) -> &str {
        &self.accept
    }

    pub(crate) fn header_params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header_params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render the full request URL against a base: placeholders substituted
    /// with their percent-encoded values, query parameters appended.
    pub(crate) fn build_url(&self, base: &Url) -> Result<Url> {
        let mut rendered = self.path.clone();
        for (name, value) in &self.path_params {
            let encoded = urlencoding::encode(value);
            rendered = rendered.replace(&format!("{{{name}}}"), &encoded);
        }

        let mut url = base.join(&rendered)?;
        if !self.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.query_params {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }
}
