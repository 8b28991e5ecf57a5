pub mod app;
pub mod constants;
pub mod errors;

pub mod utils {
    pub mod flags;
    pub mod paths;
    pub mod redact;
    pub mod suggest;
    pub mod tool_errors;
}

pub mod services {
    pub mod api_client;
    pub mod auth_scheme;
    pub mod capability;
    pub mod config_resolver;
    pub mod envelope;
    pub mod logger;
    pub mod product;
    pub mod secret_store;
    pub mod session_cache;
    pub mod tool_executor;
    pub mod transport;
}

pub mod managers {
    pub mod backend;
}

pub mod mcp {
    pub mod catalog;
    pub mod envelope;
    pub mod protocol;
    pub mod server;
}
