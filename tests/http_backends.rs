use httpmock::prelude::*;
use infra_mcp::errors::ToolErrorKind;
use infra_mcp::services::api_client::{ApiClient, ApiRequest, RetryPolicy};
use infra_mcp::services::auth_scheme::SchemeKind;
use infra_mcp::services::capability::CapabilitySource;
use infra_mcp::services::config_resolver::Credential;
use infra_mcp::services::logger::Logger;
use infra_mcp::services::product::Product;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn single_attempt() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 1,
        ..RetryPolicy::default()
    }
}

fn synology_token_client(server: &MockServer) -> ApiClient {
    let credential = Credential::new(Product::Synology, &server.base_url(), "tok123456", None)
        .expect("credential");
    ApiClient::new(credential, Logger::new("test")).expect("client")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_login() {
    let server = MockServer::start();
    let login = server.mock(|when, then| {
        when.method(POST)
            .path("/webapi/entry.cgi")
            .body_includes("method=login");
        then.status(200)
            .delay(Duration::from_millis(150))
            .json_body(json!({"success": true, "data": {"sid": "sid-shared"}}));
    });
    let info = server.mock(|when, then| {
        when.method(GET)
            .path("/webapi/entry.cgi")
            .query_param("api", "SYNO.DSM.Info")
            .query_param("_sid", "sid-shared");
        then.status(200)
            .json_body(json!({"success": true, "data": {"model": "DS920+"}}));
    });

    let credential = Credential::new(
        Product::Synology,
        &server.base_url(),
        "dsm-admin-password",
        Some("admin"),
    )
    .expect("credential");
    let client = Arc::new(ApiClient::new(credential, Logger::new("test")).expect("client"));

    let calls = (0..20).map(|_| {
        let client = client.clone();
        tokio::spawn(async move { client.call(client.product().health_request()).await })
    });
    for result in futures::future::join_all(calls).await {
        let data = result.expect("task").expect("call");
        assert_eq!(data["model"], "DS920+");
    }

    login.assert_calls(1);
    info.assert_calls(20);
    assert_eq!(client.sessions().logins(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_failed_login() {
    let server = MockServer::start();
    let login = server.mock(|when, then| {
        when.method(POST)
            .path("/webapi/entry.cgi")
            .body_includes("method=login");
        then.status(200)
            .delay(Duration::from_millis(150))
            .json_body(json!({"success": false, "error": {"code": 400}}));
    });

    let credential = Credential::new(
        Product::Synology,
        &server.base_url(),
        "wrong-dsm-password",
        Some("admin"),
    )
    .expect("credential");
    let client = Arc::new(ApiClient::new(credential, Logger::new("test")).expect("client"));

    let calls = (0..10).map(|_| {
        let client = client.clone();
        tokio::spawn(async move { client.call(client.product().health_request()).await })
    });
    for result in futures::future::join_all(calls).await {
        let err = result.expect("task").expect_err("login is rejected");
        assert_eq!(err.kind, ToolErrorKind::AuthInvalid);
        assert!(!err.message.contains("wrong-dsm-password"));
    }

    login.assert_calls(1);
    assert_eq!(client.sessions().logins(), 0);
}

#[tokio::test]
async fn synology_token_uses_bearer_on_entry_cgi() {
    let server = MockServer::start();
    let entry = server.mock(|when, then| {
        when.method(GET)
            .path("/webapi/entry.cgi")
            .header("authorization", "Bearer tok123456");
        then.status(200)
            .json_body(json!({"success": true, "data": {"model": "DS920+"}}));
    });

    let client = synology_token_client(&server);
    let data = client
        .call(client.product().health_request())
        .await
        .expect("call");
    assert_eq!(data["model"], "DS920+");
    entry.assert_calls(1);
}

#[tokio::test]
async fn synology_token_uses_sid_query_on_legacy_cgi() {
    let server = MockServer::start();
    let legacy = server.mock(|when, then| {
        when.method(GET)
            .path("/webapi/query.cgi")
            .query_param("api", "SYNO.API.Info")
            .query_param("_sid", "tok123456");
        then.status(200)
            .json_body(json!({"success": true, "data": {"SYNO.API.Info": {"path": "query.cgi", "maxVersion": 1}}}));
    });

    let client = synology_token_client(&server);
    let response = client
        .execute(
            ApiRequest::get("webapi/query.cgi")
                .with_query("api", "SYNO.API.Info")
                .with_query("version", "1")
                .with_query("method", "query"),
        )
        .await
        .expect("execute");
    assert!(response.success);
    legacy.assert_calls(1);
}

#[tokio::test]
async fn health_check_reports_reachable_and_authenticated() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/api2/json/version")
            .header("authorization", "PVEAPIToken=root@pam!mcp=aaaa-bbbb");
        then.status(200).json_body(json!({"data": {"version": "8.2.4"}}));
    });

    let credential = Credential::new(
        Product::Proxmox,
        &server.base_url(),
        "root@pam!mcp=aaaa-bbbb",
        None,
    )
    .expect("credential");
    let client = ApiClient::new(credential, Logger::new("test")).expect("client");
    let status = client.health_check().await;
    assert!(status.reachable);
    assert!(status.authenticated);
    assert_eq!(status.product, Product::Proxmox);
}

#[tokio::test]
async fn health_check_separates_bad_credentials_from_outages() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/org");
        then.status(401).json_body(json!({"message": "invalid API key"}));
    });

    let credential =
        Credential::new(Product::Grafana, &server.base_url(), "glsa_revoked_key", None)
            .expect("credential");
    let client = ApiClient::new(credential, Logger::new("test")).expect("client");
    let status = client.health_check().await;
    assert!(status.reachable);
    assert!(!status.authenticated);
    assert!(!status.detail.contains("glsa_revoked_key"));

    let credential = Credential::new(
        Product::Grafana,
        "http://127.0.0.1:9",
        "glsa_revoked_key",
        None,
    )
    .expect("credential")
    .with_timeout(Duration::from_secs(2));
    let client = ApiClient::new(credential, Logger::new("test"))
        .expect("client")
        .with_retry_policy(single_attempt());
    let status = client.health_check().await;
    assert!(!status.reachable);
    assert!(!status.authenticated);
}

#[tokio::test]
async fn failed_probe_falls_back_once_and_is_cached() {
    let server = MockServer::start();
    let probe = server.mock(|when, then| {
        when.method(GET)
            .path("/webapi/query.cgi")
            .query_param("api", "SYNO.API.Info");
        then.status(500).body("internal error");
    });

    let client = synology_token_client(&server);
    let first = client.capabilities().await;
    let second = client.capabilities().await;

    assert_eq!(first.source, CapabilitySource::Static);
    assert!(first.fallback_reason.is_some());
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(
        first.resolve_api("SYNO.DSM.Info"),
        Some(("webapi/entry.cgi".to_string(), 2))
    );
    probe.assert_calls(1);
}

#[tokio::test]
async fn discovered_families_route_unknown_cgi_paths() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/webapi/query.cgi")
            .query_param("query", "all");
        then.status(200).json_body(json!({
            "success": true,
            "data": {
                "SYNO.API.Info": {"path": "query.cgi", "minVersion": 1, "maxVersion": 1},
                "SYNO.FileStation.Upload": {"path": "FileStation/api_upload.cgi", "minVersion": 1, "maxVersion": 3}
            }
        }));
    });
    let upload = server.mock(|when, then| {
        when.method(GET)
            .path("/webapi/FileStation/api_upload.cgi")
            .query_param("_sid", "tok123456");
        then.status(200).json_body(json!({"success": true, "data": {}}));
    });

    let client = synology_token_client(&server);
    let response = client
        .execute(ApiRequest::get("webapi/FileStation/api_upload.cgi"))
        .await
        .expect("routed through discovered family");
    assert!(response.success);
    upload.assert_calls(1);

    let capabilities = client.capabilities().await;
    assert_eq!(capabilities.source, CapabilitySource::Discovered);
    assert_eq!(
        capabilities.families["SYNO.FileStation.Upload"].scheme,
        SchemeKind::QueryToken
    );
}
