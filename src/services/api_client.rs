use crate::constants::network::MAX_REQUEST_TIMEOUT_MS;
use crate::constants::retry;
use crate::constants::session::MIN_TTL_SECS;
use crate::errors::{ToolError, ToolErrorKind};
use crate::services::auth_scheme::{
    normalize_path, AuthScheme, LoginBody, SchemeTable, SessionSpec, TokenSource,
};
use crate::services::capability::{Capabilities, CapabilityProbe};
use crate::services::config_resolver::Credential;
use crate::services::envelope::{BackendError, EnvelopeStyle, Outcome};
use crate::services::logger::Logger;
use crate::services::product::Product;
use crate::services::session_cache::{Session, SessionCache};
use crate::services::transport::{
    HttpTransport, OutboundRequest, RawResponse, RequestBody, ReqwestTransport, TransportError,
};
use crate::utils::redact::{redact_object, redact_text};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A backend call relative to the credential's base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn with_form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = Some(RequestBody::Form(fields));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    pub success: bool,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BackendError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub product: Product,
    pub reachable: bool,
    pub authenticated: bool,
    pub detail: String,
    pub latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
    pub status_codes: Vec<u16>,
    /// Methods replayed after a timeout or a retryable status.
    pub methods: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: retry::MAX_ATTEMPTS,
            base_delay_ms: retry::BASE_DELAY_MS,
            max_delay_ms: retry::MAX_DELAY_MS,
            jitter: retry::JITTER,
            status_codes: retry::STATUS_CODES.to_vec(),
            methods: retry::IDEMPOTENT_METHODS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl RetryPolicy {
    pub fn allows(&self, method: &Method) -> bool {
        self.methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method.as_str()))
    }

    pub fn delays(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempt: 0,
            last_ms: 0,
        }
    }
}

/// Exponential backoff with jitter. Successive delays never shrink.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: usize,
    last_ms: u64,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.attempt += 1;
        let factor: f64 = 2.0;
        let mut delay = (self.policy.base_delay_ms as f64)
            * factor.powi(self.attempt.saturating_sub(1).min(30) as i32);
        if delay > self.policy.max_delay_ms as f64 {
            delay = self.policy.max_delay_ms as f64;
        }
        if self.policy.jitter > 0.0 {
            let delta = delay * self.policy.jitter;
            delay = delay - delta + rand::random::<f64>() * delta * 2.0;
        }
        let delay_ms = (delay.max(0.0) as u64).max(self.last_ms);
        self.last_ms = delay_ms;
        Some(Duration::from_millis(delay_ms))
    }
}

/// Authenticated HTTP client for one backend.
///
/// Picks the auth scheme per path, logs in lazily for session schemes,
/// retries transient failures, re-logs in once on a rejected session and
/// scrubs secrets from every error it returns.
pub struct ApiClient {
    logger: Logger,
    credential: Arc<Credential>,
    style: EnvelopeStyle,
    schemes: SchemeTable,
    probe: CapabilityProbe,
    sessions: SessionCache,
    transport: Arc<dyn HttpTransport>,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(credential: Credential, logger: Logger) -> Result<Self, ToolError> {
        let transport = ReqwestTransport::new(credential.tls_verify)?;
        Self::with_transport(credential, Arc::new(transport), logger)
    }

    pub fn with_transport(
        credential: Credential,
        transport: Arc<dyn HttpTransport>,
        logger: Logger,
    ) -> Result<Self, ToolError> {
        let product = credential.product;
        let schemes = product.scheme_table(&credential)?;
        let logger = logger
            .child(product.as_str())
            .with_secrets(credential.secret_values());
        Ok(Self {
            probe: CapabilityProbe::new(product, logger.child("probe")),
            logger,
            credential: Arc::new(credential),
            style: product.envelope_style(),
            schemes,
            sessions: SessionCache::new(),
            transport,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn product(&self) -> Product {
        self.credential.product
    }

    pub fn schemes(&self) -> &SchemeTable {
        &self.schemes
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Discovered (or static) endpoint families, probed at most once.
    pub async fn capabilities(&self) -> Arc<Capabilities> {
        self.probe.discover(self).await
    }

    async fn select_scheme(&self, path: &str) -> Result<AuthScheme, ToolError> {
        if let Some(capabilities) = self.probe.cached() {
            if let Some(scheme) = capabilities.routes().try_select(path) {
                return Ok(scheme.clone());
            }
        }
        if let Some(scheme) = self.schemes.try_select(path) {
            return Ok(scheme.clone());
        }
        if self.probe.cached().is_none() {
            let capabilities = self.capabilities().await;
            if let Some(scheme) = capabilities.routes().try_select(path) {
                return Ok(scheme.clone());
            }
        }
        Err(ToolError::scheme_mismatch(&normalize_path(path)))
    }

    /// Sends an authenticated request and normalizes the backend envelope.
    ///
    /// A failed envelope is still `Ok` with `success = false`; transport,
    /// auth and dispatch failures are `Err`.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ToolError> {
        let scheme = self.select_scheme(&request.path).await?;
        let mut relogged = false;
        loop {
            let session = match scheme.session_spec() {
                Some(spec) => Some(
                    self.sessions
                        .get_or_login(|| self.login(spec))
                        .await
                        .map_err(|err| self.scrub(err, None))?,
                ),
                None => None,
            };
            let outbound = self.build_outbound(&request)?;
            let prepared = scheme.prepare(outbound, &self.credential, session.as_deref())?;
            if prepared.requires_login {
                if relogged {
                    return Err(ToolError::auth_invalid(format!(
                        "{} session could not be established",
                        self.product().display_name()
                    )));
                }
                if let Some(session) = &session {
                    self.sessions.invalidate_if_current(session.id()).await;
                }
                relogged = true;
                continue;
            }

            let raw = self
                .send_with_retry(prepared.request, self.retry.allows(&request.method))
                .await
                .map_err(|err| self.scrub(err, session.as_deref()))?;
            let outcome = self.style.normalize(raw.status, &raw.decoded());

            if self.style.is_auth_rejection(raw.status, &outcome) {
                if let (Some(current), false) = (&session, relogged) {
                    self.logger.warn(
                        "Session rejected; logging in again",
                        Some(&json!({ "path": normalize_path(&request.path), "status": raw.status })),
                    );
                    self.sessions.invalidate_if_current(current.id()).await;
                    relogged = true;
                    continue;
                }
                let err = self.auth_rejected(raw.status, &outcome);
                return Err(self.scrub(err, session.as_deref()));
            }

            return Ok(self.normalize_response(raw.status, outcome, session.as_deref()));
        }
    }

    /// Like `execute`, but a failed envelope becomes `ApiError`.
    pub async fn call(&self, request: ApiRequest) -> Result<Value, ToolError> {
        let response = self.execute(request).await?;
        if response.success {
            return Ok(response.data);
        }
        let error = response.error.unwrap_or(BackendError {
            code: None,
            message: "Backend reported failure".to_string(),
        });
        Err(ToolError::api_error(
            response.status,
            error.code.as_deref(),
            format!("{} API error: {}", self.product().display_name(), error.message),
        ))
    }

    pub async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let result = self.call(self.product().health_request()).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let (reachable, authenticated, detail) = match result {
            Ok(_) => (true, true, "ok".to_string()),
            Err(err) => match err.kind {
                ToolErrorKind::AuthInvalid => (true, false, err.message),
                ToolErrorKind::ApiError => (true, true, err.message),
                _ => (false, false, err.message),
            },
        };
        self.logger.info(
            "Health check finished",
            Some(&json!({ "reachable": reachable, "authenticated": authenticated, "latency_ms": latency_ms })),
        );
        HealthStatus {
            product: self.product(),
            reachable,
            authenticated,
            detail,
            latency_ms,
        }
    }

    /// Ends the live session, if any. Best-effort; failures are only logged.
    pub async fn logout(&self) {
        let Some(session) = self.sessions.invalidate().await else {
            return;
        };
        let Some(spec) = session.scheme.clone() else {
            return;
        };
        let Some(logout) = spec.logout.clone() else {
            return;
        };
        let outbound = match self.credential.endpoint(&logout.path) {
            Ok(mut url) => {
                if !logout.query.is_empty() {
                    url.query_pairs_mut().extend_pairs(logout.query.iter());
                }
                OutboundRequest::new(logout.method, url, self.credential.timeout)
            }
            Err(err) => {
                self.logger.warn("Logout skipped", Some(&json!({ "error": err.message })));
                return;
            }
        };
        let scheme = AuthScheme::Session((*spec).clone());
        let prepared = match scheme.prepare(outbound, &self.credential, Some(session.as_ref())) {
            Ok(prepared) if !prepared.requires_login => prepared,
            _ => return,
        };
        let timeout = prepared.request.timeout;
        match tokio::time::timeout(timeout, self.transport.send(prepared.request)).await {
            Ok(Ok(raw)) => self
                .logger
                .info("Logged out", Some(&json!({ "status": raw.status }))),
            Ok(Err(err)) => self.logger.warn(
                "Logout failed",
                Some(&json!({ "error": self.scrub_text(&err.to_string(), Some(session.as_ref())) })),
            ),
            Err(_) => self.logger.warn("Logout timed out", None),
        }
    }

    /// Unauthenticated request, used for discovery endpoints.
    pub async fn fetch_public(&self, request: ApiRequest) -> Result<ApiResponse, ToolError> {
        let outbound = self.build_outbound(&request)?;
        let raw = self
            .send_with_retry(outbound, self.retry.allows(&request.method))
            .await
            .map_err(|err| self.scrub(err, None))?;
        let outcome = self.style.normalize(raw.status, &raw.decoded());
        Ok(self.normalize_response(raw.status, outcome, None))
    }

    async fn login(&self, spec: &SessionSpec) -> Result<Session, ToolError> {
        let product = self.product();
        let principal = self
            .credential
            .principal
            .as_deref()
            .ok_or_else(|| ToolError::config_incomplete(product.as_str(), &["username"]))?;
        let url = self.credential.endpoint(&spec.login.path)?;
        let mut outbound = OutboundRequest::new(Method::POST, url, self.credential.timeout);

        let mut fields = spec.login.extra_fields.clone();
        fields.push((spec.login.principal_field.clone(), principal.to_string()));
        fields.push((
            spec.login.secret_field.clone(),
            self.credential.secret.expose_secret().to_string(),
        ));
        outbound.body = Some(match spec.login.body {
            LoginBody::Form => RequestBody::Form(fields),
            LoginBody::Json => RequestBody::Json(Value::Object(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, Value::String(value)))
                    .collect(),
            )),
        });

        self.logger
            .info("Logging in", Some(&json!({ "path": spec.login.path })));
        // Replaying a login only creates another session.
        let raw = self.send_with_retry(outbound, true).await?;
        let body = raw.decoded();
        let outcome = self.style.normalize(raw.status, &body);

        let token = match &spec.login.token {
            TokenSource::JsonPointer(pointer) => body
                .pointer(pointer)
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(|t| (t.to_string(), None)),
            TokenSource::Cookie(name) => raw.cookie(name),
        };
        let (token, cookie_max_age) = match (outcome.is_ok(), token) {
            (true, Some(found)) => found,
            _ => {
                let failure = self.style.login_failure(raw.status, &body);
                self.logger.warn(
                    "Login rejected",
                    Some(&json!({ "status": raw.status, "code": failure.code })),
                );
                return Err(ToolError::auth_invalid(format!(
                    "{} login failed: {}",
                    product.display_name(),
                    failure.message
                ))
                .with_hint(format!(
                    "Check {} and {}.",
                    product.env_var(crate::services::product::ConfigKey::Username),
                    product.env_var(crate::services::product::ConfigKey::Password)
                ))
                .with_details(json!({ "status": raw.status, "code": failure.code })));
            }
        };

        let csrf = spec
            .login
            .csrf_pointer
            .as_deref()
            .and_then(|pointer| body.pointer(pointer))
            .and_then(Value::as_str)
            .map(str::to_string);
        let stated_ttl = spec
            .login
            .ttl_pointer
            .as_deref()
            .and_then(|pointer| body.pointer(pointer))
            .and_then(Value::as_i64)
            .or(cookie_max_age);
        let ttl = match stated_ttl {
            Some(secs) => chrono::Duration::seconds(secs.max(MIN_TTL_SECS)),
            None => spec.ttl,
        };

        self.logger
            .info("Logged in", Some(&json!({ "ttl_secs": ttl.num_seconds() })));
        Ok(Session::new(token, csrf, Some(ttl)).for_scheme(spec))
    }

    fn build_outbound(&self, request: &ApiRequest) -> Result<OutboundRequest, ToolError> {
        let (path, inline_query) = match request.path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (request.path.as_str(), None),
        };
        let mut url = self.credential.endpoint(path)?;
        if let Some(query) = inline_query.filter(|q| !q.is_empty()) {
            url.set_query(Some(query));
        }
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }

        let timeout = request
            .timeout
            .unwrap_or(self.credential.timeout)
            .min(Duration::from_millis(MAX_REQUEST_TIMEOUT_MS));
        let mut outbound = OutboundRequest::new(request.method.clone(), url, timeout);
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ToolError::invalid_params(format!("Invalid header name '{}'", name))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                ToolError::invalid_params(format!("Invalid value for header '{}'", name))
            })?;
            outbound.headers.insert(name, value);
        }
        outbound.body = request.body.clone();
        Ok(outbound)
    }

    /// Connection failures are retried for any method; timeouts and
    /// retryable statuses only when `replay_safe`.
    async fn send_with_retry(
        &self,
        request: OutboundRequest,
        replay_safe: bool,
    ) -> Result<RawResponse, ToolError> {
        let target = request.log_target();
        let mut delays = self.retry.delays();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let result = match tokio::time::timeout(request.timeout, self.transport.send(request.clone()))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(request.timeout)),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let retryable = match &result {
                Ok(raw) => replay_safe && self.retry.status_codes.contains(&raw.status),
                Err(TransportError::Connect(_)) => true,
                Err(err) => replay_safe && err.is_transient(),
            };
            if !retryable {
                return match result {
                    Ok(raw) => {
                        self.logger.debug(
                            "Request finished",
                            Some(&json!({ "target": target, "status": raw.status, "attempt": attempt, "elapsed_ms": elapsed_ms })),
                        );
                        Ok(raw)
                    }
                    Err(err) => Err(ToolError::internal(format!("{} failed: {}", target, err))),
                };
            }

            let reason = match &result {
                Ok(raw) => format!("HTTP {}", raw.status),
                Err(err) => err.to_string(),
            };
            if attempt >= self.retry.max_attempts {
                self.logger.warn(
                    "Request failed after retries",
                    Some(&json!({ "target": target, "attempts": attempt, "reason": reason })),
                );
                return Err(ToolError::transient(format!(
                    "{} failed after {} attempt(s): {}",
                    target, attempt, reason
                ))
                .with_details(json!({ "attempts": attempt })));
            }

            let delay = delays
                .next()
                .unwrap_or(Duration::from_millis(self.retry.max_delay_ms));
            self.logger.warn(
                "Retrying request",
                Some(&json!({
                    "target": target,
                    "attempt": attempt,
                    "reason": reason,
                    "elapsed_ms": elapsed_ms,
                    "delay_ms": delay.as_millis() as u64,
                })),
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn auth_rejected(&self, status: u16, outcome: &Outcome) -> ToolError {
        let product = self.product();
        let reason = match outcome {
            Outcome::Err(err) => format!(": {}", err.message),
            Outcome::Ok(_) => String::new(),
        };
        ToolError::auth_invalid(format!(
            "{} rejected the credentials (HTTP {}){}",
            product.display_name(),
            status,
            reason
        ))
        .with_hint(format!(
            "Check {} or the '{}' keychain entry.",
            product.env_var(crate::services::product::ConfigKey::Token),
            product.keychain_service()
        ))
        .with_details(json!({ "status": status }))
    }

    fn normalize_response(&self, status: u16, outcome: Outcome, session: Option<&Session>) -> ApiResponse {
        match outcome {
            Outcome::Ok(data) => ApiResponse {
                status,
                success: true,
                data,
                error: None,
            },
            Outcome::Err(err) => ApiResponse {
                status,
                success: false,
                data: Value::Null,
                error: Some(BackendError {
                    code: err.code,
                    message: self.scrub_text(&err.message, session),
                }),
            },
        }
    }

    fn secrets(&self, session: Option<&Session>) -> Vec<String> {
        let mut secrets = self.credential.secret_values();
        if let Some(session) = session {
            secrets.push(session.token().to_string());
            if let Some(csrf) = session.csrf() {
                secrets.push(csrf.to_string());
            }
        }
        secrets
    }

    fn scrub_text(&self, text: &str, session: Option<&Session>) -> String {
        redact_text(text, usize::MAX, Some(self.secrets(session).as_slice()))
    }

    fn scrub(&self, mut err: ToolError, session: Option<&Session>) -> ToolError {
        let secrets = self.secrets(session);
        err.message = redact_text(&err.message, usize::MAX, Some(secrets.as_slice()));
        err.hint = err
            .hint
            .map(|hint| redact_text(&hint, usize::MAX, Some(secrets.as_slice())));
        err.details = err
            .details
            .map(|details| redact_object(&details, usize::MAX, Some(secrets.as_slice())));
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_never_shrinks() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let delays: Vec<u64> = policy.delays().take(6).map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![250, 500, 1000, 2000, 4000, 5000]);
    }

    #[test]
    fn jittered_backoff_is_monotonic() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..RetryPolicy::default()
        };
        for _ in 0..50 {
            let delays: Vec<Duration> = policy.delays().take(10).collect();
            assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn only_idempotent_methods_are_replayed() {
        let policy = RetryPolicy::default();
        assert!(policy.allows(&Method::GET));
        assert!(policy.allows(&Method::DELETE));
        assert!(!policy.allows(&Method::POST));
        assert!(!policy.allows(&Method::PATCH));
    }

    #[test]
    fn request_builder_collects_parts() {
        let request = ApiRequest::post("api2/json/nodes/pve/qemu")
            .with_query("full", "1")
            .with_form(vec![("vmid".to_string(), "100".to_string())])
            .with_timeout(Duration::from_secs(3));
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.query, vec![("full".to_string(), "1".to_string())]);
        assert!(matches!(request.body, Some(RequestBody::Form(_))));
        assert_eq!(request.timeout, Some(Duration::from_secs(3)));
    }
}
