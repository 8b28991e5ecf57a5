use crate::errors::ToolError;
use crate::managers::backend::{BackendManager, BackendTool, BACKEND_TOOLS};
use crate::mcp::catalog::tool_catalog;
use crate::services::api_client::ApiClient;
use crate::services::config_resolver::{ConfigResolver, EnvSnapshot};
use crate::services::logger::Logger;
use crate::services::product::Product;
use crate::services::secret_store::{KeyringSecretStore, MemorySecretStore, SecretStore};
use crate::services::tool_executor::{ToolExecutor, ToolHandler};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AppOptions {
    pub product: Product,
    pub config_dir: Option<PathBuf>,
    pub use_keychain: bool,
    pub env: EnvSnapshot,
}

impl AppOptions {
    pub fn new(product: Product) -> Self {
        Self {
            product,
            config_dir: None,
            use_keychain: true,
            env: EnvSnapshot::from_process(),
        }
    }
}

pub struct App {
    pub logger: Logger,
    pub client: Arc<ApiClient>,
    pub tool_executor: Arc<ToolExecutor>,
}

impl App {
    fn validate_tool_wiring(handlers: &HashMap<String, Arc<dyn ToolHandler>>) -> Result<(), ToolError> {
        let mut missing: Vec<String> = tool_catalog()
            .iter()
            .filter(|tool| !handlers.contains_key(&tool.name))
            .map(|tool| tool.name.clone())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        Err(ToolError::internal("Tool wiring is incomplete")
            .with_hint("Every tool in tool_catalog.json must have a handler.")
            .with_details(serde_json::json!({ "missing_tools": missing })))
    }

    /// Resolves the credential for `options.product` and wires the tool set.
    ///
    /// Fails with `ConfigIncomplete` or `SecretStoreUnavailable` before any
    /// network traffic.
    pub async fn initialize(options: AppOptions) -> Result<Self, ToolError> {
        let logger = Logger::new("infra-mcp");
        let store: Arc<dyn SecretStore> = if options.use_keychain {
            Arc::new(KeyringSecretStore::new())
        } else {
            Arc::new(MemorySecretStore::new())
        };
        let resolver = ConfigResolver::new(logger.clone(), options.env, store)
            .with_config_dir(options.config_dir);
        let config_file = resolver.config_file(options.product);
        let credential = resolver.resolve(options.product).await?;
        let client = Arc::new(ApiClient::new(credential, logger.clone())?);
        Self::from_client(client, logger, config_file)
    }

    /// Wires the tool set around an existing client.
    pub fn from_client(
        client: Arc<ApiClient>,
        logger: Logger,
        config_file: Option<PathBuf>,
    ) -> Result<Self, ToolError> {
        let manager = Arc::new(BackendManager::new(logger.clone(), client.clone(), config_file));
        let mut handlers: HashMap<String, Arc<dyn ToolHandler>> = HashMap::new();
        for tool in BACKEND_TOOLS {
            handlers.insert(
                (*tool).to_string(),
                Arc::new(BackendTool::new(manager.clone(), *tool)),
            );
        }
        Self::validate_tool_wiring(&handlers)?;

        let secrets = client.credential().secret_values();
        let logger = logger.with_secrets(secrets.clone());
        let tool_executor =
            Arc::new(ToolExecutor::new(logger.clone(), handlers).with_secrets(secrets));
        logger.info(
            "Server ready",
            Some(&serde_json::json!({
                "product": client.product(),
                "tools": tool_executor.tool_names(),
            })),
        );
        Ok(Self {
            logger,
            client,
            tool_executor,
        })
    }

    /// Ends any live backend session.
    pub async fn shutdown(&self) {
        self.client.logout().await;
        self.logger.debug("Shutdown complete", Some(&self.logger.stats()));
    }
}
