//! Request model and validation.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::fetcher::Fetcher;
use crate::response::Outcome;

use super::registry::{CallbackRegistry, ErrorCallback, SuccessCallback};

/// HTTP methods a request may use, in canonical (lowercase) form.
pub const SUPPORTED_HTTP_METHODS: [&str; 6] = ["get", "post", "put", "delete", "head", "options"];

/// Errors raised while building a request or dispatching its callbacks.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("unsupported HTTP method: {0}")]
    InvalidHttpMethod(String),

    #[error("invalid response: expected request {expected}, got {actual}")]
    InvalidResponse { expected: String, actual: String },

    #[error("callback {0} is not registered")]
    CallbackNotRegistered(String),
}

/// Supported HTTP method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Post => "post",
            HttpMethod::Put => "put",
            HttpMethod::Delete => "delete",
            HttpMethod::Head => "head",
            HttpMethod::Options => "options",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(HttpMethod::Get),
            "post" => Ok(HttpMethod::Post),
            "put" => Ok(HttpMethod::Put),
            "delete" => Ok(HttpMethod::Delete),
            "head" => Ok(HttpMethod::Head),
            "options" => Ok(HttpMethod::Options),
            _ => Err(RequestError::InvalidHttpMethod(s.to_string())),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to a callback held in a [`CallbackRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackToken(String);

impl CallbackToken {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One HTTP fetch to run on a worker.
///
/// Requests are immutable once built and hold no live callables, so they
/// can be encoded and shipped to a worker as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    id: String,
    url: String,
    method: HttpMethod,
    headers: HashMap<String, String>,
    #[serde(with = "extra_args_as_json")]
    extra_args: Map<String, Value>,
    success_callback: Option<CallbackToken>,
    error_callback: Option<CallbackToken>,
}

impl Request {
    /// Create a request with the given method name (case-insensitive).
    pub fn new(url: impl Into<String>, method: &str) -> Result<Self, RequestError> {
        Self::builder(url).method(method).build()
    }

    /// Create a plain GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            id: generate_request_id(),
            url: url.into(),
            method: HttpMethod::Get,
            headers: HashMap::new(),
            extra_args: Map::new(),
            success_callback: None,
            error_callback: None,
        }
    }

    pub fn builder(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(url)
    }

    /// Unique id (32 lowercase hex characters).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Additional arguments for the HTTP layer.
    pub fn extra_args(&self) -> &Map<String, Value> {
        &self.extra_args
    }

    pub fn success_callback(&self) -> Option<&CallbackToken> {
        self.success_callback.as_ref()
    }

    pub fn error_callback(&self) -> Option<&CallbackToken> {
        self.error_callback.as_ref()
    }

    /// Dispatch the callback matching the outcome's tag.
    ///
    /// Returns whether a callback was invoked. Both of this request's tokens
    /// are released from the registry afterwards, so a callback fires at most
    /// once. A token with no registry entry (already dispatched, cleared by
    /// `close`, or registered elsewhere) is reported as
    /// [`RequestError::CallbackNotRegistered`].
    pub fn run_callback(
        &self,
        outcome: &Outcome,
        registry: &CallbackRegistry,
    ) -> Result<bool, RequestError> {
        if outcome.request_id() != self.id {
            return Err(RequestError::InvalidResponse {
                expected: self.id.clone(),
                actual: outcome.request_id().to_string(),
            });
        }

        let dispatched = match outcome {
            Outcome::Success(response) => match &self.success_callback {
                Some(token) => registry
                    .success_callback(token)
                    .map(|callback| callback(response))
                    .ok_or_else(|| RequestError::CallbackNotRegistered(token.to_string()))
                    .map(|()| true),
                None => Ok(false),
            },
            Outcome::Failure(error) => match &self.error_callback {
                Some(token) => registry
                    .error_callback(token)
                    .map(|callback| callback(error))
                    .ok_or_else(|| RequestError::CallbackNotRegistered(token.to_string()))
                    .map(|()| true),
                None => Ok(false),
            },
        };

        self.release_callbacks(registry);
        dispatched
    }

    /// Execute the fetch. Network and protocol errors come back as an
    /// [`Outcome::Failure`], never as an `Err`.
    pub async fn call(&self, fetcher: &dyn Fetcher) -> Outcome {
        fetcher.fetch(self).await
    }

    /// Remove this request's callbacks from the registry.
    pub fn release_callbacks(&self, registry: &CallbackRegistry) {
        for token in [&self.success_callback, &self.error_callback]
            .into_iter()
            .flatten()
        {
            registry.remove(token);
        }
    }
}

fn generate_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Builder for [`Request`]; callbacks are registered only when `build`
/// succeeds.
pub struct RequestBuilder {
    url: String,
    method: String,
    headers: HashMap<String, String>,
    extra_args: Map<String, Value>,
    on_success: Option<(CallbackRegistry, SuccessCallback)>,
    on_error: Option<(CallbackRegistry, ErrorCallback)>,
}

impl RequestBuilder {
    fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get.as_str().to_string(),
            headers: HashMap::new(),
            extra_args: Map::new(),
            on_success: None,
            on_error: None,
        }
    }

    /// Set the HTTP method by name (case-insensitive, validated in `build`).
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Add an argument for the HTTP layer (`timeout_secs`, `body`, `json`,
    /// `query`, `follow_redirects`, `basic_auth`).
    pub fn extra_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_args.insert(key.into(), value.into());
        self
    }

    pub fn extra_args(mut self, args: Map<String, Value>) -> Self {
        self.extra_args.extend(args);
        self
    }

    /// Callback run with the [`Response`](crate::response::Response) when the fetch completes.
    pub fn on_success<F>(mut self, registry: &CallbackRegistry, callback: F) -> Self
    where
        F: Fn(&crate::response::Response) + Send + Sync + 'static,
    {
        self.on_success = Some((registry.clone(), std::sync::Arc::new(callback)));
        self
    }

    /// Callback run with the [`ErrorResponse`](crate::response::ErrorResponse) when the fetch fails.
    pub fn on_error<F>(mut self, registry: &CallbackRegistry, callback: F) -> Self
    where
        F: Fn(&crate::response::ErrorResponse) + Send + Sync + 'static,
    {
        self.on_error = Some((registry.clone(), std::sync::Arc::new(callback)));
        self
    }

    /// Validate the method and register callbacks.
    pub fn build(self) -> Result<Request, RequestError> {
        let method: HttpMethod = self.method.parse()?;

        let success_callback = self
            .on_success
            .map(|(registry, callback)| registry.insert_success(callback));
        let error_callback = self
            .on_error
            .map(|(registry, callback)| registry.insert_error(callback));

        Ok(Request {
            id: generate_request_id(),
            url: self.url,
            method,
            headers: self.headers,
            extra_args: self.extra_args,
            success_callback,
            error_callback,
        })
    }
}

/// Arbitrary JSON values cannot go through self-describing-less formats,
/// so extra arguments are carried as a JSON string.
mod extra_args_as_json {
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};
    use serde_json::{Map, Value};

    pub fn serialize<S: Serializer>(args: &Map<String, Value>, s: S) -> Result<S::Ok, S::Error> {
        let json = serde_json::to_string(args).map_err(S::Error::custom)?;
        s.serialize_str(&json)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Map<String, Value>, D::Error> {
        let json = String::deserialize(d)?;
        serde_json::from_str(&json).map_err(D::Error::custom)
    }
}
