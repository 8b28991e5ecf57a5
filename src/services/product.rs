use crate::constants::session::{
    GRAFANA_TTL_SECS, PORTAINER_TTL_SECS, PROXMOX_TTL_SECS, SYNOLOGY_SESSION_NAME,
    SYNOLOGY_TTL_SECS,
};
use crate::errors::ToolError;
use crate::services::api_client::ApiRequest;
use crate::services::auth_scheme::{
    AuthScheme, LoginBody, LoginSpec, LogoutSpec, SchemeTable, SessionInjection, SessionSpec,
    TokenSource,
};
use crate::services::config_resolver::{Credential, SecretKind};
use crate::services::envelope::EnvelopeStyle;
use reqwest::Method;
use secrecy::ExposeSecret;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Product {
    Synology,
    Proxmox,
    Portainer,
    Authentik,
    Grafana,
}

pub const ALL_PRODUCTS: &[Product] = &[
    Product::Synology,
    Product::Proxmox,
    Product::Portainer,
    Product::Authentik,
    Product::Grafana,
];

/// A raw configuration key as it appears in env, keychain or YAML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    Url,
    Token,
    Username,
    Password,
    SslVerify,
    Timeout,
}

impl ConfigKey {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigKey::Url => "url",
            ConfigKey::Token => "token",
            ConfigKey::Username => "username",
            ConfigKey::Password => "password",
            ConfigKey::SslVerify => "ssl_verify",
            ConfigKey::Timeout => "timeout",
        }
    }

    fn env_suffix(self) -> &'static str {
        match self {
            ConfigKey::Url => "URL",
            ConfigKey::Token => "TOKEN",
            ConfigKey::Username => "USERNAME",
            ConfigKey::Password => "PASSWORD",
            ConfigKey::SslVerify => "SSL_VERIFY",
            ConfigKey::Timeout => "TIMEOUT",
        }
    }

    pub fn is_secret(self) -> bool {
        matches!(self, ConfigKey::Token | ConfigKey::Password)
    }
}

impl Product {
    pub fn as_str(self) -> &'static str {
        match self {
            Product::Synology => "synology",
            Product::Proxmox => "proxmox",
            Product::Portainer => "portainer",
            Product::Authentik => "authentik",
            Product::Grafana => "grafana",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Product::Synology => "Synology DSM",
            Product::Proxmox => "Proxmox VE",
            Product::Portainer => "Portainer",
            Product::Authentik => "authentik",
            Product::Grafana => "Grafana",
        }
    }

    pub fn env_var(self, key: ConfigKey) -> String {
        format!("{}_{}", self.as_str().to_uppercase(), key.env_suffix())
    }

    pub fn keychain_service(self) -> String {
        format!("{}-mcp", self.as_str())
    }

    /// Keychain account for `key`; only identity and secret fields live there.
    pub fn keychain_account(self, key: ConfigKey) -> Option<String> {
        match key {
            ConfigKey::Url | ConfigKey::Token | ConfigKey::Username | ConfigKey::Password => {
                Some(format!("{}-{}", self.as_str(), key.as_str()))
            }
            ConfigKey::SslVerify | ConfigKey::Timeout => None,
        }
    }

    /// YAML key for `key`. Secrets are never read from the file.
    pub fn yaml_key(self, key: ConfigKey) -> Option<String> {
        match key {
            ConfigKey::Url | ConfigKey::Username => {
                Some(format!("{}_{}", self.as_str(), key.as_str()))
            }
            ConfigKey::SslVerify => Some("ssl_verify".to_string()),
            ConfigKey::Timeout => Some("timeout".to_string()),
            ConfigKey::Token | ConfigKey::Password => None,
        }
    }

    /// Whether a configured username switches the product to login sessions.
    pub fn supports_session(self) -> bool {
        self.session_spec().is_some()
    }

    pub fn envelope_style(self) -> EnvelopeStyle {
        match self {
            Product::Synology => EnvelopeStyle::Synology,
            Product::Proxmox => EnvelopeStyle::Proxmox,
            Product::Portainer => EnvelopeStyle::Portainer,
            Product::Authentik => EnvelopeStyle::Authentik,
            Product::Grafana => EnvelopeStyle::Grafana,
        }
    }

    pub fn has_capability_probe(self) -> bool {
        matches!(self, Product::Synology)
    }

    /// Lightest authenticated call the backend offers.
    pub fn health_request(self) -> ApiRequest {
        match self {
            Product::Synology => ApiRequest::get("webapi/entry.cgi")
                .with_query("api", "SYNO.DSM.Info")
                .with_query("version", "2")
                .with_query("method", "getinfo"),
            Product::Proxmox => ApiRequest::get("api2/json/version"),
            Product::Portainer => ApiRequest::get("api/users/me"),
            Product::Authentik => ApiRequest::get("api/v3/core/users/me/"),
            Product::Grafana => ApiRequest::get("api/org"),
        }
    }

    pub fn session_spec(self) -> Option<SessionSpec> {
        match self {
            Product::Synology => Some(SessionSpec {
                login: LoginSpec {
                    path: "webapi/entry.cgi".to_string(),
                    body: LoginBody::Form,
                    principal_field: "account".to_string(),
                    secret_field: "passwd".to_string(),
                    extra_fields: pairs(&[
                        ("api", "SYNO.API.Auth"),
                        ("version", "7"),
                        ("method", "login"),
                        ("format", "sid"),
                        ("session", SYNOLOGY_SESSION_NAME),
                    ]),
                    token: TokenSource::JsonPointer("/data/sid".to_string()),
                    csrf_pointer: None,
                    ttl_pointer: None,
                },
                inject: SessionInjection::Query("_sid".to_string()),
                ttl: chrono::Duration::seconds(SYNOLOGY_TTL_SECS),
                csrf_header: None,
                logout: Some(LogoutSpec {
                    method: Method::GET,
                    path: "webapi/entry.cgi".to_string(),
                    query: pairs(&[
                        ("api", "SYNO.API.Auth"),
                        ("version", "7"),
                        ("method", "logout"),
                        ("session", SYNOLOGY_SESSION_NAME),
                    ]),
                }),
            }),
            Product::Proxmox => Some(SessionSpec {
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
                inject: SessionInjection::Cookie("PVEAuthCookie".to_string()),
                ttl: chrono::Duration::seconds(PROXMOX_TTL_SECS),
                csrf_header: Some("CSRFPreventionToken".to_string()),
                logout: None,
            }),
            Product::Portainer => Some(SessionSpec {
                login: LoginSpec {
                    path: "api/auth".to_string(),
                    body: LoginBody::Json,
                    principal_field: "username".to_string(),
                    secret_field: "password".to_string(),
                    extra_fields: Vec::new(),
                    token: TokenSource::JsonPointer("/jwt".to_string()),
                    csrf_pointer: None,
                    ttl_pointer: None,
                },
                inject: SessionInjection::Header {
                    name: "Authorization".to_string(),
                    prefix: "Bearer ".to_string(),
                },
                ttl: chrono::Duration::seconds(PORTAINER_TTL_SECS),
                csrf_header: None,
                logout: Some(LogoutSpec {
                    method: Method::POST,
                    path: "api/auth/logout".to_string(),
                    query: Vec::new(),
                }),
            }),
            Product::Grafana => Some(SessionSpec {
                login: LoginSpec {
                    path: "login".to_string(),
                    body: LoginBody::Json,
                    principal_field: "user".to_string(),
                    secret_field: "password".to_string(),
                    extra_fields: Vec::new(),
                    token: TokenSource::Cookie("grafana_session".to_string()),
                    csrf_pointer: None,
                    ttl_pointer: None,
                },
                inject: SessionInjection::Cookie("grafana_session".to_string()),
                ttl: chrono::Duration::seconds(GRAFANA_TTL_SECS),
                csrf_header: None,
                logout: None,
            }),
            Product::Authentik => None,
        }
    }

    /// Scheme a Synology CGI family needs under this credential.
    pub fn cgi_scheme(self, cgi_path: &str, credential: &Credential) -> Option<AuthScheme> {
        if self != Product::Synology {
            return None;
        }
        if credential.secret_kind == SecretKind::Password {
            return self.session_spec().map(AuthScheme::Session);
        }
        if cgi_path == "entry.cgi" {
            Some(AuthScheme::bearer())
        } else {
            Some(AuthScheme::query_token("_sid"))
        }
    }

    /// Static path → scheme table, built once per client.
    pub fn scheme_table(self, credential: &Credential) -> Result<SchemeTable, ToolError> {
        if credential.secret_kind == SecretKind::Password {
            let spec = self.session_spec().ok_or_else(|| {
                ToolError::invalid_params(format!(
                    "{} does not support username/password login; configure a token",
                    self.display_name()
                ))
            })?;
            let scope = match self {
                Product::Synology => "webapi/**",
                Product::Proxmox => "api2/json/**",
                _ => "**",
            };
            return SchemeTable::new().route(scope, AuthScheme::Session(spec));
        }

        match self {
            Product::Synology => {
                let mut table = SchemeTable::new();
                for cgi in ["entry.cgi", "query.cgi", "auth.cgi"] {
                    if let Some(scheme) = self.cgi_scheme(cgi, credential) {
                        table = table.route(&format!("webapi/{}", cgi), scheme)?;
                    }
                }
                Ok(table)
            }
            Product::Proxmox => {
                SchemeTable::new().route("api2/json/**", AuthScheme::header("Authorization", "PVEAPIToken="))
            }
            Product::Portainer => {
                let scheme = if credential.secret.expose_secret().starts_with("ptr_") {
                    AuthScheme::header("X-API-Key", "")
                } else {
                    AuthScheme::bearer()
                };
                SchemeTable::new().route("api/**", scheme)
            }
            Product::Authentik => SchemeTable::new().route("api/v3/**", AuthScheme::bearer()),
            Product::Grafana => SchemeTable::new().route("api/**", AuthScheme::bearer()),
        }
    }

    /// Known DSM API families: `(name, cgi path, max version)`.
    pub fn static_families(self) -> &'static [(&'static str, &'static str, u32)] {
        match self {
            Product::Synology => SYNOLOGY_FAMILIES,
            _ => &[],
        }
    }
}

const SYNOLOGY_FAMILIES: &[(&str, &str, u32)] = &[
    ("SYNO.API.Info", "query.cgi", 1),
    ("SYNO.API.Auth", "entry.cgi", 7),
    ("SYNO.DSM.Info", "entry.cgi", 2),
    ("SYNO.Core.System.Utilization", "entry.cgi", 1),
    ("SYNO.Storage.CGI.Storage", "entry.cgi", 1),
    ("SYNO.Storage.CGI.HddMan", "entry.cgi", 1),
    ("SYNO.Core.Share", "entry.cgi", 1),
    ("SYNO.Core.Package", "entry.cgi", 2),
    ("SYNO.Core.TaskScheduler", "entry.cgi", 4),
    ("SYNO.Docker.Container", "entry.cgi", 1),
    ("SYNO.Docker.Image", "entry.cgi", 1),
    ("SYNO.FileStation.List", "entry.cgi", 2),
    ("SYNO.Core.SecurityScan.Status", "entry.cgi", 1),
    ("SYNO.Backup.Task", "entry.cgi", 2),
];

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Product {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl FromStr for Product {
    type Err = ToolError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_lowercase();
        ALL_PRODUCTS
            .iter()
            .copied()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| {
                let known: Vec<&str> = ALL_PRODUCTS.iter().map(|p| p.as_str()).collect();
                ToolError::invalid_params(format!("Unknown product: {}", raw))
                    .with_hint(format!("Use one of: {}.", known.join(", ")))
            })
    }
}
