use crate::errors::ToolError;
use crate::services::api_client::{ApiClient, ApiRequest};
use crate::services::auth_scheme::{SchemeKind, SchemeTable};
use crate::services::config_resolver::Credential;
use crate::services::logger::Logger;
use crate::services::product::Product;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::OnceCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilitySource {
    Discovered,
    Static,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointFamily {
    pub path: String,
    pub min_version: u32,
    pub max_version: u32,
    pub scheme: SchemeKind,
}

/// Endpoint families the backend exposes, and the routes they imply.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub source: CapabilitySource,
    pub families: BTreeMap<String, EndpointFamily>,
    pub fallback_reason: Option<String>,
    routes: SchemeTable,
}

impl Capabilities {
    /// Known families for `product`, without asking the backend.
    pub fn fallback(product: Product, credential: &Credential) -> Result<Self, ToolError> {
        let families = product
            .static_families()
            .iter()
            .map(|(name, path, version)| {
                ((*name).to_string(), ((*path).to_string(), 1, *version))
            })
            .collect();
        Self::build(product, credential, CapabilitySource::Static, families)
    }

    /// Parses a `SYNO.API.Info` payload: `{name: {path, minVersion, maxVersion}}`.
    pub fn from_api_info(
        product: Product,
        credential: &Credential,
        data: &Value,
    ) -> Result<Self, ToolError> {
        let entries = data
            .as_object()
            .ok_or_else(|| ToolError::internal("SYNO.API.Info returned no API map"))?;
        let mut families = BTreeMap::new();
        for (name, info) in entries {
            let Some(path) = info.get("path").and_then(Value::as_str) else {
                continue;
            };
            let version = |key: &str| {
                info.get(key)
                    .and_then(Value::as_u64)
                    .and_then(|v| u32::try_from(v).ok())
            };
            let min_version = version("minVersion").unwrap_or(1);
            let max_version = version("maxVersion").unwrap_or(min_version);
            families.insert(name.clone(), (path.to_string(), min_version, max_version));
        }
        if families.is_empty() {
            return Err(ToolError::internal("SYNO.API.Info listed no API families"));
        }
        Self::build(product, credential, CapabilitySource::Discovered, families)
    }

    fn build(
        product: Product,
        credential: &Credential,
        source: CapabilitySource,
        raw: BTreeMap<String, (String, u32, u32)>,
    ) -> Result<Self, ToolError> {
        let mut families = BTreeMap::new();
        let mut routes = SchemeTable::new();
        let mut routed = BTreeSet::new();
        for (name, (path, min_version, max_version)) in raw {
            let Some(scheme) = product.cgi_scheme(&path, credential) else {
                continue;
            };
            if routed.insert(path.clone()) {
                routes = routes.route(&format!("webapi/{}", path), scheme.clone())?;
            }
            families.insert(
                name,
                EndpointFamily {
                    path,
                    min_version,
                    max_version,
                    scheme: scheme.kind(),
                },
            );
        }
        Ok(Self {
            source,
            families,
            fallback_reason: None,
            routes,
        })
    }

    pub fn routes(&self) -> &SchemeTable {
        &self.routes
    }

    /// CGI path (relative to the base URL) and highest version for an API family.
    pub fn resolve_api(&self, name: &str) -> Option<(String, u32)> {
        self.families
            .get(name)
            .map(|family| (format!("webapi/{}", family.path), family.max_version))
    }

    pub fn describe(&self) -> Value {
        json!({
            "source": self.source,
            "fallback_reason": self.fallback_reason,
            "families": self.families,
            "routes": self.routes.describe(),
        })
    }
}

/// One-shot endpoint discovery. The first result, success or fallback,
/// is kept for the life of the process.
pub struct CapabilityProbe {
    product: Product,
    logger: Logger,
    cell: OnceCell<Arc<Capabilities>>,
}

impl CapabilityProbe {
    pub fn new(product: Product, logger: Logger) -> Self {
        Self {
            product,
            logger,
            cell: OnceCell::new(),
        }
    }

    pub fn cached(&self) -> Option<Arc<Capabilities>> {
        self.cell.get().cloned()
    }

    pub async fn discover(&self, client: &ApiClient) -> Arc<Capabilities> {
        self.cell
            .get_or_init(|| async { Arc::new(self.run(client).await) })
            .await
            .clone()
    }

    async fn run(&self, client: &ApiClient) -> Capabilities {
        let credential = client.credential();
        if !self.product.has_capability_probe() {
            return self.static_table(credential, None);
        }
        match self.query(client).await {
            Ok(capabilities) => {
                self.logger.info(
                    "Endpoint families discovered",
                    Some(&json!({ "families": capabilities.families.len() })),
                );
                capabilities
            }
            Err(err) => {
                self.logger.warn(
                    "Capability probe failed; using static endpoint table",
                    Some(&json!({ "error": err.message })),
                );
                self.static_table(credential, Some(err.message))
            }
        }
    }

    async fn query(&self, client: &ApiClient) -> Result<Capabilities, ToolError> {
        let request = ApiRequest::get("webapi/query.cgi")
            .with_query("api", "SYNO.API.Info")
            .with_query("version", "1")
            .with_query("method", "query")
            .with_query("query", "all");
        let response = client.fetch_public(request).await?;
        if !response.success {
            let message = response
                .error
                .map(|err| err.message)
                .unwrap_or_else(|| "SYNO.API.Info failed".to_string());
            return Err(ToolError::api_error(response.status, None, message));
        }
        Capabilities::from_api_info(self.product, client.credential(), &response.data)
    }

    fn static_table(&self, credential: &Credential, reason: Option<String>) -> Capabilities {
        match Capabilities::fallback(self.product, credential) {
            Ok(mut capabilities) => {
                capabilities.fallback_reason = reason;
                capabilities
            }
            Err(err) => {
                self.logger.error(
                    "Static endpoint table rejected",
                    Some(&json!({ "error": err.message })),
                );
                Capabilities {
                    source: CapabilitySource::Static,
                    families: BTreeMap::new(),
                    fallback_reason: reason,
                    routes: SchemeTable::new(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_credential() -> Credential {
        Credential::new(Product::Synology, "https://nas.example:5001", "tok123", None)
            .expect("credential")
    }

    #[test]
    fn api_info_maps_cgi_to_scheme() {
        let data = json!({
            "SYNO.API.Auth": {"path": "entry.cgi", "minVersion": 1, "maxVersion": 7},
            "SYNO.FileStation.Upload": {"path": "FileStation/api_upload.cgi", "minVersion": 1, "maxVersion": 2},
        });
        let caps = Capabilities::from_api_info(Product::Synology, &token_credential(), &data)
            .expect("caps");
        assert_eq!(caps.source, CapabilitySource::Discovered);
        assert_eq!(caps.families["SYNO.API.Auth"].scheme, SchemeKind::Bearer);
        assert_eq!(
            caps.families["SYNO.FileStation.Upload"].scheme,
            SchemeKind::QueryToken
        );
        assert_eq!(
            caps.routes()
                .select("webapi/FileStation/api_upload.cgi")
                .expect("route")
                .kind(),
            SchemeKind::QueryToken
        );
        assert_eq!(
            caps.resolve_api("SYNO.FileStation.Upload"),
            Some(("webapi/FileStation/api_upload.cgi".to_string(), 2))
        );
    }

    #[test]
    fn static_fallback_covers_known_families() {
        let caps = Capabilities::fallback(Product::Synology, &token_credential()).expect("caps");
        assert_eq!(caps.source, CapabilitySource::Static);
        assert_eq!(
            caps.resolve_api("SYNO.DSM.Info"),
            Some(("webapi/entry.cgi".to_string(), 2))
        );
        assert_eq!(caps.families["SYNO.API.Info"].scheme, SchemeKind::QueryToken);
    }

    #[test]
    fn password_mode_routes_every_family_through_sessions() {
        let credential = Credential::new(
            Product::Synology,
            "https://nas.example:5001",
            "pw-123456",
            Some("admin"),
        )
        .expect("credential");
        let caps = Capabilities::fallback(Product::Synology, &credential).expect("caps");
        assert!(caps
            .families
            .values()
            .all(|family| family.scheme == SchemeKind::Session));
    }

    #[test]
    fn empty_api_info_is_an_error() {
        assert!(Capabilities::from_api_info(Product::Synology, &token_credential(), &json!({}))
            .is_err());
    }

    #[test]
    fn products_without_families_have_empty_fallback() {
        let credential = Credential::new(Product::Grafana, "https://grafana.example", "t", None)
            .expect("credential");
        let caps = Capabilities::fallback(Product::Grafana, &credential).expect("caps");
        assert!(caps.families.is_empty());
        assert!(caps.routes().is_empty());
    }
}
