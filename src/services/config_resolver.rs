use crate::constants::network::{MAX_REQUEST_TIMEOUT_MS, TIMEOUT_API_REQUEST_MS};
use crate::constants::protocols::ALLOWED_HTTP;
use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::services::product::{ConfigKey, Product};
use crate::services::secret_store::SecretStore;
use crate::utils::flags::parse_flag;
use crate::utils::paths::resolve_config_file;
use crate::utils::redact::is_sensitive_key;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Where a credential field came from, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    EnvVar,
    SecretStore,
    FileConfig,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialField {
    Url,
    #[serde(rename = "auth")]
    Secret,
    Principal,
    TlsVerify,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    Token,
    Password,
}

/// Resolved connection identity for one backend. Immutable once built.
#[derive(Clone)]
pub struct Credential {
    pub product: Product,
    pub base_url: Url,
    pub secret: SecretString,
    pub secret_kind: SecretKind,
    pub principal: Option<String>,
    pub tls_verify: bool,
    pub timeout: Duration,
    pub sources: BTreeMap<CredentialField, Source>,
}

impl Credential {
    /// Direct construction for embedding and tests. A principal on a product
    /// with login sessions selects password mode.
    pub fn new(
        product: Product,
        base_url: &str,
        secret: &str,
        principal: Option<&str>,
    ) -> Result<Self, ToolError> {
        let secret_kind = match principal {
            Some(_) if product.supports_session() => SecretKind::Password,
            _ => SecretKind::Token,
        };
        Ok(Self {
            product,
            base_url: parse_base_url(base_url)?,
            secret: SecretString::from(secret.to_string()),
            secret_kind,
            principal: principal.map(str::to_string),
            tls_verify: true,
            timeout: Duration::from_millis(TIMEOUT_API_REQUEST_MS),
            sources: BTreeMap::new(),
        })
    }

    pub fn with_tls_verify(mut self, tls_verify: bool) -> Self {
        self.tls_verify = tls_verify;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn source_of(&self, field: CredentialField) -> Option<Source> {
        self.sources.get(&field).copied()
    }

    /// Joins a relative API path onto the base URL, keeping any base path prefix.
    pub fn endpoint(&self, path: &str) -> Result<Url, ToolError> {
        let path = path.trim_start_matches('/');
        let mut url = self.base_url.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}/{}", base_path, path));
        Ok(url)
    }

    /// Literal values that must never reach logs or error text.
    pub fn secret_values(&self) -> Vec<String> {
        vec![self.secret.expose_secret().to_string()]
    }

    /// Redacted view: everything but the secret itself.
    pub fn describe(&self) -> Value {
        json!({
            "product": self.product.as_str(),
            "url": self.base_url.as_str(),
            "auth_mode": self.secret_kind,
            "principal": self.principal,
            "tls_verify": self.tls_verify,
            "timeout_ms": self.timeout.as_millis() as u64,
            "sources": self.sources,
        })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("product", &self.product)
            .field("base_url", &self.base_url.as_str())
            .field("secret_kind", &self.secret_kind)
            .field("principal", &self.principal)
            .field("tls_verify", &self.tls_verify)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ToolError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed)
        .map_err(|_| ToolError::invalid_params("url must be an absolute http(s) URL"))?;
    if !ALLOWED_HTTP.contains(&url.scheme()) {
        return Err(ToolError::invalid_params(format!(
            "url scheme '{}' is not supported; use http or https",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(ToolError::invalid_params("url must include a host"));
    }
    Ok(url)
}

/// Point-in-time copy of the environment. Taken once at startup.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            vars: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Non-secret settings read from `config.yaml`.
#[derive(Debug, Clone, Default)]
struct FileConfig {
    values: BTreeMap<String, String>,
}

impl FileConfig {
    fn load(path: &Path, logger: &Logger) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                logger.warn(
                    "Config file unreadable; ignoring it",
                    Some(&json!({ "path": path.display().to_string(), "error": err.to_string() })),
                );
                return Self::default();
            }
        };
        let parsed: serde_yaml::Value = match serde_yaml::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                logger.warn(
                    "Config file is not valid YAML; ignoring it",
                    Some(&json!({ "path": path.display().to_string(), "error": err.to_string() })),
                );
                return Self::default();
            }
        };
        let mut values = BTreeMap::new();
        let Some(mapping) = parsed.as_mapping() else {
            return Self::default();
        };
        for (key, value) in mapping {
            let Some(key) = key.as_str() else {
                continue;
            };
            if is_sensitive_key(key) {
                logger.warn(
                    "Secret key in config file ignored; use env vars or the keychain",
                    Some(&json!({ "path": path.display().to_string(), "key": key })),
                );
                continue;
            }
            let text = match value {
                serde_yaml::Value::String(s) => s.clone(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Number(n) => n.to_string(),
                _ => continue,
            };
            if !text.trim().is_empty() {
                values.insert(key.to_string(), text.trim().to_string());
            }
        }
        Self { values }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

pub struct ConfigResolver {
    logger: Logger,
    env: EnvSnapshot,
    store: Arc<dyn SecretStore>,
    config_dir: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new(logger: Logger, env: EnvSnapshot, store: Arc<dyn SecretStore>) -> Self {
        Self {
            logger: logger.child("config"),
            env,
            store,
            config_dir: None,
        }
    }

    pub fn with_config_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.config_dir = dir;
        self
    }

    pub fn config_file(&self, product: Product) -> Option<PathBuf> {
        resolve_config_file(product.as_str(), self.config_dir.as_deref(), &|key| {
            self.env.get(key).map(str::to_string)
        })
    }

    /// Merges env, secret store and config file into one credential,
    /// field by field, highest-priority non-empty value first.
    pub async fn resolve(&self, product: Product) -> Result<Credential, ToolError> {
        let file = self
            .config_file(product)
            .map(|path| FileConfig::load(&path, &self.logger))
            .unwrap_or_default();

        let url = self.lookup(product, ConfigKey::Url, &file).await?;
        let principal = self.lookup(product, ConfigKey::Username, &file).await?;

        let mut secret = None;
        if principal.is_some() && product.supports_session() {
            secret = self
                .lookup(product, ConfigKey::Password, &file)
                .await?
                .map(|found| (found, SecretKind::Password));
        }
        if secret.is_none() {
            secret = self
                .lookup(product, ConfigKey::Token, &file)
                .await?
                .map(|found| (found, SecretKind::Token));
        }

        let secret_key = if principal.is_some() && product.supports_session() {
            ConfigKey::Password
        } else {
            ConfigKey::Token
        };
        let mut missing = Vec::new();
        if url.is_none() {
            missing.push(ConfigKey::Url.as_str());
        }
        if secret.is_none() {
            missing.push(secret_key.as_str());
        }
        let (Some((url, url_source)), Some(((secret, secret_source), secret_kind))) = (url, secret)
        else {
            return Err(ToolError::config_incomplete(product.as_str(), &missing).with_hint(
                format!(
                    "Set {} and {} (or store them in the '{}' keychain service).",
                    product.env_var(ConfigKey::Url),
                    product.env_var(secret_key),
                    product.keychain_service()
                ),
            ));
        };

        let mut sources = BTreeMap::new();
        sources.insert(CredentialField::Url, url_source);
        sources.insert(CredentialField::Secret, secret_source);

        let base_url = parse_base_url(&url)?;

        let tls_verify = match self.lookup(product, ConfigKey::SslVerify, &file).await? {
            Some((raw, source)) => {
                let value = parse_flag(&raw).ok_or_else(|| {
                    ToolError::invalid_params(format!(
                        "ssl_verify must be a boolean, got '{}'",
                        raw
                    ))
                })?;
                sources.insert(CredentialField::TlsVerify, source);
                value
            }
            None => {
                sources.insert(CredentialField::TlsVerify, Source::Default);
                true
            }
        };

        let timeout = match self.lookup(product, ConfigKey::Timeout, &file).await? {
            Some((raw, source)) => {
                sources.insert(CredentialField::Timeout, source);
                parse_timeout(&raw)?
            }
            None => {
                sources.insert(CredentialField::Timeout, Source::Default);
                Duration::from_millis(TIMEOUT_API_REQUEST_MS)
            }
        };

        let principal = principal.map(|(value, source)| {
            sources.insert(CredentialField::Principal, source);
            value
        });

        if !tls_verify {
            self.logger.warn(
                "TLS certificate verification disabled",
                Some(&json!({ "product": product.as_str() })),
            );
        }

        let credential = Credential {
            product,
            base_url,
            secret: SecretString::from(secret),
            secret_kind,
            principal,
            tls_verify,
            timeout,
            sources,
        };
        self.logger
            .info("Credential resolved", Some(&credential.describe()));
        Ok(credential)
    }

    async fn lookup(
        &self,
        product: Product,
        key: ConfigKey,
        file: &FileConfig,
    ) -> Result<Option<(String, Source)>, ToolError> {
        if let Some(value) = self.env.get(&product.env_var(key)) {
            return Ok(Some((value.to_string(), Source::EnvVar)));
        }
        if let Some(account) = product.keychain_account(key) {
            let service = product.keychain_service();
            let found = self.store.get(&service, &account).await.map_err(|err| {
                ToolError::secret_store_unavailable(format!(
                    "Secret store lookup for {}/{} failed: {}",
                    service, account, err
                ))
            })?;
            if let Some(value) = found.filter(|v| !v.trim().is_empty()) {
                return Ok(Some((value.trim().to_string(), Source::SecretStore)));
            }
        }
        if let Some(yaml_key) = product.yaml_key(key) {
            if let Some(value) = file.get(&yaml_key) {
                return Ok(Some((value.to_string(), Source::FileConfig)));
            }
        }
        Ok(None)
    }
}

fn parse_timeout(raw: &str) -> Result<Duration, ToolError> {
    let seconds: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ToolError::invalid_params(format!("timeout must be a number of seconds, got '{}'", raw)))?;
    let max_secs = MAX_REQUEST_TIMEOUT_MS as f64 / 1000.0;
    if !seconds.is_finite() || seconds <= 0.0 || seconds > max_secs {
        return Err(ToolError::invalid_params(format!(
            "timeout must be between 0 and {} seconds, got '{}'",
            max_secs, raw
        )));
    }
    Ok(Duration::from_secs_f64(seconds))
}
