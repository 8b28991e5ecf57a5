use crate::constants::network::{TIMEOUT_CONNECTION_MS, USER_AGENT};
use crate::errors::ToolError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Form(Vec<(String, String)>),
}

/// Fully decorated request, ready for the wire.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
}

impl OutboundRequest {
    pub fn new(method: Method, url: Url, timeout: Duration) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout,
        }
    }

    pub fn query_value(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Method and path only. Query strings and headers may carry credentials.
    pub fn log_target(&self) -> String {
        format!("{} {}", self.method, self.url.path())
    }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Decoded body: JSON when it parses, the raw text otherwise, `Null` when empty.
    pub fn decoded(&self) -> Value {
        let trimmed = self.body.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(self.body.clone()))
    }

    /// Value of a cookie set by this response, with its `Max-Age` when present.
    pub fn cookie(&self, name: &str) -> Option<(String, Option<i64>)> {
        self.headers
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|raw| raw.to_str().ok())
            .find_map(|raw| parse_set_cookie(raw, name))
    }
}

fn parse_set_cookie(raw: &str, name: &str) -> Option<(String, Option<i64>)> {
    let mut parts = raw.split(';').map(str::trim);
    let (key, value) = parts.next()?.split_once('=')?;
    if key != name || value.is_empty() {
        return None;
    }
    let max_age = parts
        .filter_map(|attr| attr.split_once('='))
        .find(|(k, _)| k.eq_ignore_ascii_case("max-age"))
        .and_then(|(_, v)| v.parse::<i64>().ok());
    Some((value.to_string(), max_age))
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout(_) | TransportError::Connect(_))
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<RawResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(tls_verify: bool) -> Result<Self, ToolError> {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_millis(TIMEOUT_CONNECTION_MS))
            .redirect(reqwest::redirect::Policy::none());
        if !tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|err| ToolError::internal(format!("Failed to build HTTP client: {}", err)))?;
        Ok(Self { client })
    }
}

fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    let err = err.without_url();
    if err.is_timeout() {
        return TransportError::Timeout(timeout);
    }
    if err.is_connect() || err.is_request() || err.is_body() {
        return TransportError::Connect(err.to_string());
    }
    TransportError::Other(err.to_string())
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> Result<RawResponse, TransportError> {
        let timeout = request.timeout;
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .header(ACCEPT, "application/json")
            .timeout(timeout);
        builder = match request.body {
            Some(RequestBody::Json(value)) => builder.json(&value),
            Some(RequestBody::Form(fields)) => builder.form(&fields),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|err| map_reqwest_error(err, timeout))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|err| map_reqwest_error(err, timeout))?;
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}
