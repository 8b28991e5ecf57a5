use clap::Parser;
use infra_mcp::app::{App, AppOptions};
use infra_mcp::services::config_resolver::EnvSnapshot;
use infra_mcp::services::logger::init_tracing;
use infra_mcp::services::product::Product;
use std::path::PathBuf;
use std::sync::Arc;

/// MCP tool server for one self-hosted backend, speaking JSON-RPC on stdio.
#[derive(Debug, Parser)]
#[command(name = "infra-mcp", version, about)]
struct Cli {
    /// Backend to serve: synology, proxmox, portainer, authentik or grafana.
    #[arg(long, env = "INFRA_MCP_PRODUCT")]
    product: Product,

    /// Directory holding config.yaml (defaults to ~/.config/<product>-mcp).
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Skip the OS keychain; only env vars and config.yaml are consulted.
    #[arg(long)]
    no_keychain: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let options = AppOptions {
        product: cli.product,
        config_dir: cli.config_dir,
        use_keychain: !cli.no_keychain,
        env: EnvSnapshot::from_process(),
    };

    let app = match App::initialize(options).await {
        Ok(app) => Arc::new(app),
        Err(err) => {
            eprintln!("infra-mcp: {}", err);
            if let Some(hint) = &err.hint {
                eprintln!("hint: {}", hint);
            }
            std::process::exit(err.exit_code());
        }
    };

    if let Err(err) = infra_mcp::mcp::server::run_stdio(app).await {
        eprintln!("infra-mcp: {}", err);
        std::process::exit(1);
    }
}
