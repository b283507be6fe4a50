//! reqwest-backed fetcher.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::redirect::Policy;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::request::{HttpMethod, Request};
use crate::response::{ErrorResponse, FailureKind, FetchFailure, Outcome, Response};

use super::config::HttpConfig;
use super::types::{Fetcher, FetcherError};

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        }
    }
}

/// Fetcher performing real HTTP requests with reqwest.
pub struct ReqwestFetcher {
    following: Client,
    direct: Client,
    config: HttpConfig,
}

impl ReqwestFetcher {
    /// Create a new fetcher with the given configuration.
    pub fn new(config: HttpConfig) -> Result<Self, FetcherError> {
        let following = build_client(&config, Policy::limited(config.max_redirects))?;
        let direct = build_client(&config, Policy::none())?;

        Ok(Self {
            following,
            direct,
            config,
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn client_for(&self, request: &Request) -> Result<&Client, FetchFailure> {
        let follow = match request.extra_args().get("follow_redirects") {
            None => self.config.follow_redirects,
            Some(Value::Bool(follow)) => *follow,
            Some(_) => return Err(invalid_argument("follow_redirects", "a boolean")),
        };
        Ok(if follow { &self.following } else { &self.direct })
    }

    /// Translate a request (including its extra arguments) into a reqwest builder.
    fn prepare(&self, request: &Request) -> Result<reqwest::RequestBuilder, FetchFailure> {
        let client = self.client_for(request)?;
        let mut builder = client.request(request.method().into(), request.url());

        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }

        for (key, value) in request.extra_args() {
            builder = match key.as_str() {
                "timeout_secs" => {
                    let secs = value
                        .as_f64()
                        .filter(|s| s.is_finite() && *s > 0.0)
                        .ok_or_else(|| invalid_argument(key, "a positive number"))?;
                    builder.timeout(Duration::from_secs_f64(secs))
                }
                "body" => {
                    let body = value
                        .as_str()
                        .ok_or_else(|| invalid_argument(key, "a string"))?;
                    builder.body(body.to_string())
                }
                "json" => builder.json(value),
                "query" => {
                    let pairs = query_pairs(value)
                        .ok_or_else(|| invalid_argument(key, "an object of scalar values"))?;
                    builder.query(&pairs)
                }
                "basic_auth" => {
                    let (user, password) = basic_auth(value)
                        .ok_or_else(|| invalid_argument(key, "[user, password]"))?;
                    builder.basic_auth(user, password)
                }
                "follow_redirects" => builder,
                other => {
                    debug!(argument = other, "Ignoring unsupported extra argument");
                    builder
                }
            };
        }

        Ok(builder)
    }
}

fn build_client(config: &HttpConfig, redirect: Policy) -> Result<Client, FetcherError> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.clone())
        .redirect(redirect)
        .build()
        .map_err(|e| FetcherError::ClientBuild(e.to_string()))
}

fn invalid_argument(key: &str, expected: &str) -> FetchFailure {
    FetchFailure::new(
        FailureKind::Request,
        format!("invalid extra argument `{}`: expected {}", key, expected),
    )
}

fn query_pairs(value: &Value) -> Option<Vec<(String, String)>> {
    value
        .as_object()?
        .iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((k.clone(), v))
        })
        .collect()
}

fn basic_auth(value: &Value) -> Option<(String, Option<String>)> {
    match value {
        Value::String(user) => Some((user.clone(), None)),
        Value::Array(parts) => match parts.as_slice() {
            [Value::String(user)] => Some((user.clone(), None)),
            [Value::String(user), Value::String(password)] => {
                Some((user.clone(), Some(password.clone())))
            }
            _ => None,
        },
        _ => None,
    }
}

fn classify(error: &reqwest::Error) -> FailureKind {
    if error.is_timeout() {
        FailureKind::Timeout
    } else if error.is_connect() {
        FailureKind::Connect
    } else if error.is_redirect() {
        FailureKind::Redirect
    } else if error.is_body() {
        FailureKind::Body
    } else if error.is_decode() {
        FailureKind::Decode
    } else if error.is_builder() || error.is_request() {
        FailureKind::Request
    } else {
        FailureKind::Other
    }
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut collected: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        collected
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    collected
}

fn failure(request: &Request, error: &reqwest::Error) -> Outcome {
    ErrorResponse::new(
        request.id(),
        FetchFailure::new(classify(error), error.to_string()),
    )
    .into()
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    fn name(&self) -> &str {
        "reqwest"
    }

    async fn fetch(&self, request: &Request) -> Outcome {
        let builder = match self.prepare(request) {
            Ok(builder) => builder,
            Err(failure) => return ErrorResponse::new(request.id(), failure).into(),
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return failure(request, &e),
        };

        let status_code = response.status().as_u16();
        let headers = collect_headers(response.headers());

        match response.bytes().await {
            Ok(body) => Response::new(request.id(), status_code, body.to_vec(), headers).into(),
            Err(e) => failure(request, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;
    use std::net::TcpListener;

    fn closed_port_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}/", port)
    }

    fn fetcher() -> ReqwestFetcher {
        ReqwestFetcher::new(HttpConfig {
            timeout_secs: 5,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(reqwest::Method::from(HttpMethod::Get), reqwest::Method::GET);
        assert_eq!(
            reqwest::Method::from(HttpMethod::Options),
            reqwest::Method::OPTIONS
        );
    }

    #[test]
    fn test_query_pairs() {
        let pairs = query_pairs(&json!({"q": "rust", "page": 2, "exact": true})).unwrap();
        assert_eq!(pairs.len(), 3);
        assert!(pairs.contains(&("page".to_string(), "2".to_string())));
        assert!(query_pairs(&json!({"nested": {"a": 1}})).is_none());
        assert!(query_pairs(&json!("q=rust")).is_none());
    }

    #[test]
    fn test_basic_auth_shapes() {
        assert_eq!(
            basic_auth(&json!(["user", "pw"])),
            Some(("user".to_string(), Some("pw".to_string())))
        );
        assert_eq!(basic_auth(&json!("user")), Some(("user".to_string(), None)));
        assert_eq!(basic_auth(&json!([1, 2])), None);
    }

    #[test]
    fn test_collect_headers_joins_repeats() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        headers.insert("content-type", HeaderValue::from_static("text/html"));

        let collected = collect_headers(&headers);

        assert_eq!(collected["set-cookie"], "a=1, b=2");
        assert_eq!(collected["content-type"], "text/html");
    }

    #[tokio::test]
    async fn test_connection_refused_becomes_error_response() {
        let request = Request::get(closed_port_url());

        let outcome = fetcher().fetch(&request).await;

        let error = outcome.as_error().expect("expected a failure outcome");
        assert_eq!(error.request_id, request.id());
        assert_eq!(error.error.kind, FailureKind::Connect);
    }

    #[tokio::test]
    async fn test_invalid_extra_argument_becomes_error_response() {
        let request = Request::builder(closed_port_url())
            .extra_arg("timeout_secs", "soon")
            .build()
            .unwrap();

        let outcome = fetcher().fetch(&request).await;

        let error = outcome.as_error().unwrap();
        assert_eq!(error.error.kind, FailureKind::Request);
        assert!(error.error.message.contains("timeout_secs"));
    }

    #[tokio::test]
    async fn test_malformed_url_becomes_error_response() {
        let request = Request::get("not a url");

        let outcome = fetcher().fetch(&request).await;

        assert_eq!(outcome.as_error().unwrap().error.kind, FailureKind::Request);
    }
}
