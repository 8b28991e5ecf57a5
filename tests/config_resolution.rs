mod common;

use infra_mcp::errors::ToolErrorKind;
use infra_mcp::services::config_resolver::{
    ConfigResolver, CredentialField, EnvSnapshot, SecretKind, Source,
};
use infra_mcp::services::logger::Logger;
use infra_mcp::services::product::Product;
use infra_mcp::services::secret_store::{MemorySecretStore, SecretStore};
use secrecy::ExposeSecret;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn resolver(env: &[(&str, &str)], store: MemorySecretStore, dir: &Path) -> ConfigResolver {
    let store: Arc<dyn SecretStore> = Arc::new(store);
    ConfigResolver::new(Logger::new("test"), EnvSnapshot::from_pairs(env), store)
        .with_config_dir(Some(dir.to_path_buf()))
}

fn write_config(dir: &Path, body: &str) {
    std::fs::write(dir.join("config.yaml"), body).expect("write config.yaml");
}

#[tokio::test]
async fn env_beats_keychain_beats_file() {
    let dir = common::temp_dir("infra-mcp-precedence");
    write_config(
        &dir,
        "proxmox_url: https://file.example:8006\nproxmox_username: file-user\ntimeout: 12\n",
    );
    let store = MemorySecretStore::new()
        .with_entry("proxmox-mcp", "proxmox-url", "https://keychain.example:8006")
        .with_entry("proxmox-mcp", "proxmox-token", "keychain-token-value");

    let env = [("PROXMOX_TOKEN", "root@pam!mcp=env-token-value")];
    let credential = resolver(&env, store, &dir)
        .resolve(Product::Proxmox)
        .await
        .expect("credential");

    assert_eq!(credential.base_url.as_str(), "https://keychain.example:8006/");
    assert_eq!(
        credential.secret.expose_secret(),
        "root@pam!mcp=env-token-value"
    );
    assert_eq!(credential.source_of(CredentialField::Url), Some(Source::SecretStore));
    assert_eq!(credential.source_of(CredentialField::Secret), Some(Source::EnvVar));
    assert_eq!(credential.secret_kind, SecretKind::Token);
    assert_eq!(credential.principal.as_deref(), Some("file-user"));
    assert_eq!(credential.timeout, Duration::from_secs(12));
    assert_eq!(credential.source_of(CredentialField::Timeout), Some(Source::FileConfig));
    assert_eq!(credential.source_of(CredentialField::TlsVerify), Some(Source::Default));
    assert!(credential.tls_verify);
}

#[tokio::test]
async fn username_with_password_selects_session_mode() {
    let dir = common::temp_dir("infra-mcp-password");
    let env = [
        ("SYNOLOGY_URL", "https://nas.example:5001/"),
        ("SYNOLOGY_USERNAME", "admin"),
        ("SYNOLOGY_PASSWORD", "correct horse battery"),
        ("SYNOLOGY_SSL_VERIFY", "false"),
    ];
    let credential = resolver(&env, MemorySecretStore::new(), &dir)
        .resolve(Product::Synology)
        .await
        .expect("credential");
    assert_eq!(credential.secret_kind, SecretKind::Password);
    assert_eq!(credential.principal.as_deref(), Some("admin"));
    assert!(!credential.tls_verify);
}

#[tokio::test]
async fn secrets_in_yaml_are_ignored() {
    let dir = common::temp_dir("infra-mcp-yaml-secret");
    write_config(
        &dir,
        "grafana_url: https://grafana.example\ngrafana_token: from-file-should-not-count\n",
    );
    let err = resolver(&[], MemorySecretStore::new(), &dir)
        .resolve(Product::Grafana)
        .await
        .expect_err("token in yaml must not satisfy the lookup");
    assert_eq!(err.kind, ToolErrorKind::ConfigIncomplete);
    assert!(err.message.contains("token"), "{}", err.message);
    assert!(!err.message.contains("url"), "{}", err.message);
    assert!(!err.to_string().contains("from-file-should-not-count"));
}

#[tokio::test]
async fn missing_fields_are_listed() {
    let dir = common::temp_dir("infra-mcp-incomplete");
    let err = resolver(&[], MemorySecretStore::new(), &dir)
        .resolve(Product::Authentik)
        .await
        .expect_err("nothing configured");
    assert_eq!(err.kind, ToolErrorKind::ConfigIncomplete);
    assert!(err.message.contains("url"));
    assert!(err.message.contains("token"));
    assert_eq!(err.exit_code(), 2);
    assert!(err.hint.as_deref().unwrap_or("").contains("AUTHENTIK_URL"));
}

#[tokio::test]
async fn missing_password_hint_names_the_password_variable() {
    let dir = common::temp_dir("infra-mcp-missing-password");
    let env = [
        ("SYNOLOGY_URL", "https://nas.example:5001"),
        ("SYNOLOGY_USERNAME", "admin"),
    ];
    let err = resolver(&env, MemorySecretStore::new(), &dir)
        .resolve(Product::Synology)
        .await
        .expect_err("password is missing");
    assert_eq!(err.kind, ToolErrorKind::ConfigIncomplete);
    assert!(err.message.contains("password"), "{}", err.message);
    let hint = err.hint.as_deref().unwrap_or("");
    assert!(hint.contains("SYNOLOGY_PASSWORD"), "{}", hint);
    assert!(!hint.contains("SYNOLOGY_TOKEN"), "{}", hint);
}

#[tokio::test]
async fn locked_keychain_is_not_treated_as_absent() {
    let dir = common::temp_dir("infra-mcp-locked");
    let env = [("PORTAINER_URL", "https://portainer.example:9443")];
    let err = resolver(&env, MemorySecretStore::unavailable("keychain locked"), &dir)
        .resolve(Product::Portainer)
        .await
        .expect_err("store failure must surface");
    assert_eq!(err.kind, ToolErrorKind::SecretStoreUnavailable);
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn store_failure_surfaces_even_for_optional_fields() {
    let dir = common::temp_dir("infra-mcp-env-only");
    let env = [
        ("PORTAINER_URL", "https://portainer.example:9443"),
        ("PORTAINER_TOKEN", "ptr_abcdef123456"),
    ];
    let credential = resolver(&env, MemorySecretStore::unavailable("keychain locked"), &dir)
        .resolve(Product::Portainer)
        .await;
    assert_eq!(
        credential.expect_err("username lookup reaches the store").kind,
        ToolErrorKind::SecretStoreUnavailable
    );
}

#[tokio::test]
async fn malformed_values_are_invalid_params() {
    let dir = common::temp_dir("infra-mcp-malformed");
    let env = [
        ("GRAFANA_URL", "https://grafana.example"),
        ("GRAFANA_TOKEN", "glsa_token_value"),
        ("GRAFANA_TIMEOUT", "soon"),
    ];
    let err = resolver(&env, MemorySecretStore::new(), &dir)
        .resolve(Product::Grafana)
        .await
        .expect_err("timeout must be numeric");
    assert_eq!(err.kind, ToolErrorKind::InvalidParams);

    let env = [("GRAFANA_URL", "ftp://grafana.example"), ("GRAFANA_TOKEN", "glsa_token_value")];
    let err = resolver(&env, MemorySecretStore::new(), &dir)
        .resolve(Product::Grafana)
        .await
        .expect_err("scheme must be http(s)");
    assert_eq!(err.kind, ToolErrorKind::InvalidParams);
}

#[tokio::test]
async fn unparsable_yaml_falls_back_to_other_sources() {
    let dir = common::temp_dir("infra-mcp-bad-yaml");
    write_config(&dir, "proxmox_url: [unterminated\n");
    let env = [
        ("PROXMOX_URL", "https://pve.example:8006"),
        ("PROXMOX_TOKEN", "root@pam!mcp=abcdef"),
    ];
    let credential = resolver(&env, MemorySecretStore::new(), &dir)
        .resolve(Product::Proxmox)
        .await
        .expect("env alone is enough");
    assert_eq!(credential.source_of(CredentialField::Url), Some(Source::EnvVar));
}
