use crate::errors::ToolError;
use crate::services::config_resolver::Credential;
use crate::services::session_cache::Session;
use crate::services::transport::OutboundRequest;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::Method;
use secrecy::ExposeSecret;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemeKind {
    Bearer,
    Session,
    QueryToken,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginBody {
    Form,
    Json,
}

/// Where the login response carries the session token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenSource {
    JsonPointer(String),
    Cookie(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginSpec {
    pub path: String,
    pub body: LoginBody,
    pub principal_field: String,
    pub secret_field: String,
    pub extra_fields: Vec<(String, String)>,
    pub token: TokenSource,
    pub csrf_pointer: Option<String>,
    pub ttl_pointer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogoutSpec {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionInjection {
    Cookie(String),
    Header { name: String, prefix: String },
    Query(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSpec {
    pub login: LoginSpec,
    pub inject: SessionInjection,
    /// Fallback lifetime when the login response does not state one.
    pub ttl: chrono::Duration,
    /// Header carrying the CSRF token on state-changing requests.
    pub csrf_header: Option<String>,
    pub logout: Option<LogoutSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthScheme {
    Bearer { header_name: String, prefix: String },
    Session(SessionSpec),
    QueryToken { param_name: String },
}

#[derive(Debug)]
pub struct Prepared {
    pub request: OutboundRequest,
    pub requires_login: bool,
}

impl AuthScheme {
    pub fn bearer() -> Self {
        AuthScheme::Bearer {
            header_name: "Authorization".to_string(),
            prefix: "Bearer ".to_string(),
        }
    }

    pub fn header(header_name: &str, prefix: &str) -> Self {
        AuthScheme::Bearer {
            header_name: header_name.to_string(),
            prefix: prefix.to_string(),
        }
    }

    pub fn query_token(param_name: &str) -> Self {
        AuthScheme::QueryToken {
            param_name: param_name.to_string(),
        }
    }

    pub fn kind(&self) -> SchemeKind {
        match self {
            AuthScheme::Bearer { .. } => SchemeKind::Bearer,
            AuthScheme::Session(_) => SchemeKind::Session,
            AuthScheme::QueryToken { .. } => SchemeKind::QueryToken,
        }
    }

    pub fn session_spec(&self) -> Option<&SessionSpec> {
        match self {
            AuthScheme::Session(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn describe(&self) -> serde_json::Value {
        match self {
            AuthScheme::Bearer { header_name, prefix } => serde_json::json!({
                "kind": self.kind(),
                "header": header_name,
                "prefix": prefix.trim_end_matches([' ', '=']),
            }),
            AuthScheme::Session(spec) => serde_json::json!({
                "kind": self.kind(),
                "login_path": spec.login.path,
                "inject": match &spec.inject {
                    SessionInjection::Cookie(name) => format!("cookie:{}", name),
                    SessionInjection::Header { name, .. } => format!("header:{}", name),
                    SessionInjection::Query(name) => format!("query:{}", name),
                },
                "default_ttl_secs": spec.ttl.num_seconds(),
            }),
            AuthScheme::QueryToken { param_name } => serde_json::json!({
                "kind": self.kind(),
                "param": param_name,
            }),
        }
    }

    /// Decorates `request` with credentials for this scheme.
    ///
    /// Session schemes without a live session come back undecorated with
    /// `requires_login` set.
    pub fn prepare(
        &self,
        mut request: OutboundRequest,
        credential: &Credential,
        session: Option<&Session>,
    ) -> Result<Prepared, ToolError> {
        match self {
            AuthScheme::Bearer { header_name, prefix } => {
                let value = format!("{}{}", prefix, credential.secret.expose_secret());
                insert_sensitive(&mut request.headers, header_name, &value)?;
            }
            AuthScheme::QueryToken { param_name } => {
                request
                    .url
                    .query_pairs_mut()
                    .append_pair(param_name, credential.secret.expose_secret());
            }
            AuthScheme::Session(spec) => {
                let Some(session) = session.filter(|s| s.is_valid()) else {
                    return Ok(Prepared {
                        request,
                        requires_login: true,
                    });
                };
                match &spec.inject {
                    SessionInjection::Cookie(name) => {
                        let pair = format!("{}={}", name, session.token());
                        let value = match request.headers.get(COOKIE).and_then(|v| v.to_str().ok())
                        {
                            Some(existing) if !existing.is_empty() => {
                                format!("{}; {}", existing, pair)
                            }
                            _ => pair,
                        };
                        insert_sensitive(&mut request.headers, COOKIE.as_str(), &value)?;
                    }
                    SessionInjection::Header { name, prefix } => {
                        let value = format!("{}{}", prefix, session.token());
                        insert_sensitive(&mut request.headers, name, &value)?;
                    }
                    SessionInjection::Query(name) => {
                        request
                            .url
                            .query_pairs_mut()
                            .append_pair(name, session.token());
                    }
                }
                if let (Some(header), Some(csrf)) = (&spec.csrf_header, session.csrf()) {
                    if request.method != Method::GET && request.method != Method::HEAD {
                        insert_sensitive(&mut request.headers, header, csrf)?;
                    }
                }
            }
        }
        Ok(Prepared {
            request,
            requires_login: false,
        })
    }
}

fn insert_sensitive(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), ToolError> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| ToolError::internal(format!("Invalid auth header name '{}'", name)))?;
    // The value is a credential; keep it out of the message.
    let mut value = HeaderValue::from_str(value)
        .map_err(|_| ToolError::invalid_params("Credential contains characters not allowed in an HTTP header"))?;
    value.set_sensitive(true);
    headers.insert(name, value);
    Ok(())
}

/// Glob over request paths: `*` stays within a segment, `**` spans segments.
#[derive(Debug, Clone)]
pub struct PathPattern {
    glob: String,
    regex: Regex,
}

impl PathPattern {
    pub fn new(glob: &str) -> Result<Self, ToolError> {
        let glob = normalize_path(glob);
        let mut pattern = String::from("^");
        let mut chars = glob.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    pattern.push_str(".*");
                }
                '*' => pattern.push_str("[^/]*"),
                other => pattern.push_str(&regex::escape(&other.to_string())),
            }
        }
        pattern.push('$');
        let regex = Regex::new(&pattern)
            .map_err(|err| ToolError::internal(format!("Invalid path pattern '{}': {}", glob, err)))?;
        Ok(Self { glob, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(&normalize_path(path))
    }
}

/// Leading slashes and any query string are not part of the dispatch key.
pub fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or("");
    path.trim_start_matches('/').to_string()
}

/// Ordered pattern → scheme routes. First match wins.
#[derive(Debug, Clone, Default)]
pub struct SchemeTable {
    routes: Vec<(PathPattern, AuthScheme)>,
}

impl SchemeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, glob: &str, scheme: AuthScheme) -> Result<Self, ToolError> {
        self.routes.push((PathPattern::new(glob)?, scheme));
        Ok(self)
    }

    pub fn push(&mut self, pattern: PathPattern, scheme: AuthScheme) {
        self.routes.push((pattern, scheme));
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn try_select(&self, path: &str) -> Option<&AuthScheme> {
        self.routes
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map(|(_, scheme)| scheme)
    }

    pub fn select(&self, path: &str) -> Result<&AuthScheme, ToolError> {
        self.try_select(path)
            .ok_or_else(|| ToolError::scheme_mismatch(&normalize_path(path)))
    }

    /// The first session scheme in the table, if any.
    pub fn session_spec(&self) -> Option<&SessionSpec> {
        self.routes.iter().find_map(|(_, scheme)| scheme.session_spec())
    }

    pub fn describe(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.routes
                .iter()
                .map(|(pattern, scheme)| {
                    serde_json::json!({ "pattern": pattern.as_str(), "scheme": scheme.describe() })
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::config_resolver::Credential;
    use crate::services::product::Product;
    use std::time::Duration;
    use url::Url;

    fn request(method: Method, path: &str) -> OutboundRequest {
        let url = Url::parse("https://nas.example:5001")
            .and_then(|base| base.join(path))
            .expect("url");
        OutboundRequest::new(method, url, Duration::from_secs(5))
    }

    fn credential(secret: &str) -> Credential {
        Credential::new(Product::Synology, "https://nas.example:5001", secret, None)
            .expect("credential")
    }

    fn session_scheme(inject: SessionInjection) -> AuthScheme {
        AuthScheme::Session(SessionSpec {
            login: LoginSpec {
                path: "api2/json/access/ticket".to_string(),
                body: LoginBody::Form,
                principal_field: "username".to_string(),
                secret_field: "password".to_string(),
                extra_fields: Vec::new(),
                token: TokenSource::JsonPointer("/data/ticket".to_string()),
                csrf_pointer: Some("/data/CSRFPreventionToken".to_string()),
                ttl_pointer: None,
            },
            inject,
            ttl: chrono::Duration::minutes(110),
            csrf_header: Some("CSRFPreventionToken".to_string()),
            logout: None,
        })
    }

    #[test]
    fn glob_single_star_stays_in_segment() {
        let pattern = PathPattern::new("webapi/*.cgi").expect("pattern");
        assert!(pattern.matches("/webapi/query.cgi"));
        assert!(pattern.matches("webapi/auth.cgi?api=SYNO.API.Auth"));
        assert!(!pattern.matches("webapi/FileStation/file_share.cgi"));
        let deep = PathPattern::new("webapi/**").expect("pattern");
        assert!(deep.matches("webapi/FileStation/file_share.cgi"));
    }

    #[test]
    fn first_matching_route_wins() {
        let table = SchemeTable::new()
            .route("webapi/entry.cgi", AuthScheme::bearer())
            .and_then(|t| t.route("webapi/*.cgi", AuthScheme::query_token("_sid")))
            .expect("table");
        assert_eq!(
            table.select("webapi/entry.cgi").expect("entry").kind(),
            SchemeKind::Bearer
        );
        assert_eq!(
            table.select("webapi/query.cgi").expect("query").kind(),
            SchemeKind::QueryToken
        );
    }

    #[test]
    fn unmatched_path_is_scheme_mismatch() {
        let table = SchemeTable::new()
            .route("api/**", AuthScheme::bearer())
            .expect("table");
        let err = table.select("/other/thing").expect_err("must fail");
        assert_eq!(err.kind, crate::errors::ToolErrorKind::SchemeMismatch);
        assert!(err.message.contains("other/thing"));
    }

    #[test]
    fn bearer_sets_header_with_prefix() {
        let scheme = AuthScheme::header("Authorization", "PVEAPIToken=");
        let prepared = scheme
            .prepare(
                request(Method::GET, "/api2/json/version"),
                &credential("root@pam!mcp=uuid"),
                None,
            )
            .expect("prepare");
        assert!(!prepared.requires_login);
        assert_eq!(
            prepared.request.header_value("authorization"),
            Some("PVEAPIToken=root@pam!mcp=uuid")
        );
        assert!(prepared.request.headers["authorization"].is_sensitive());
    }

    #[test]
    fn query_token_only_touches_query() {
        let prepared = AuthScheme::query_token("_sid")
            .prepare(
                request(Method::GET, "/webapi/query.cgi?api=SYNO.API.Info"),
                &credential("tok123"),
                None,
            )
            .expect("prepare");
        assert_eq!(prepared.request.url.path(), "/webapi/query.cgi");
        assert_eq!(prepared.request.query_value("_sid").as_deref(), Some("tok123"));
        assert_eq!(prepared.request.query_value("api").as_deref(), Some("SYNO.API.Info"));
        assert!(prepared.request.headers.is_empty());
    }

    #[test]
    fn session_without_live_session_requires_login() {
        let scheme = session_scheme(SessionInjection::Cookie("PVEAuthCookie".to_string()));
        let prepared = scheme
            .prepare(request(Method::GET, "/api2/json/nodes"), &credential("pw"), None)
            .expect("prepare");
        assert!(prepared.requires_login);
        assert!(prepared.request.headers.is_empty());

        let expired = Session::new("ticket", None, Some(chrono::Duration::seconds(-5)));
        let prepared = scheme
            .prepare(
                request(Method::GET, "/api2/json/nodes"),
                &credential("pw"),
                Some(&expired),
            )
            .expect("prepare");
        assert!(prepared.requires_login);
    }

    #[test]
    fn session_cookie_and_csrf_only_on_writes() {
        let scheme = session_scheme(SessionInjection::Cookie("PVEAuthCookie".to_string()));
        let session = Session::new(
            "PVE:root@pam:ABC",
            Some("csrf-1".to_string()),
            Some(chrono::Duration::minutes(10)),
        );

        let read = scheme
            .prepare(
                request(Method::GET, "/api2/json/nodes"),
                &credential("pw"),
                Some(&session),
            )
            .expect("prepare");
        assert_eq!(
            read.request.header_value("cookie"),
            Some("PVEAuthCookie=PVE:root@pam:ABC")
        );
        assert!(read.request.header_value("csrfpreventiontoken").is_none());

        let write = scheme
            .prepare(
                request(Method::POST, "/api2/json/nodes/pve/qemu/100/status/start"),
                &credential("pw"),
                Some(&session),
            )
            .expect("prepare");
        assert_eq!(
            write.request.header_value("csrfpreventiontoken"),
            Some("csrf-1")
        );
    }

    #[test]
    fn session_query_injection_appends_sid() {
        let scheme = session_scheme(SessionInjection::Query("_sid".to_string()));
        let session = Session::new("sid-abc", None, None);
        let prepared = scheme
            .prepare(
                request(Method::GET, "/webapi/entry.cgi?api=SYNO.DSM.Info"),
                &credential("pw"),
                Some(&session),
            )
            .expect("prepare");
        assert_eq!(prepared.request.query_value("_sid").as_deref(), Some("sid-abc"));
    }
}
