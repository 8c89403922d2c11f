//! MCP gateway binary entrypoint.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mcp_gateway::{cli::Cli, config::Config, gateway::Gateway, setup_tracing};

/// Config file missing/unparsable, or an invalid CLI override.
const EXIT_CONFIG_ERROR: u8 = 2;
/// A configured built-in plugin failed to initialize.
const EXIT_PLUGIN_INIT_FAILURE: u8 = 3;
/// The server could not bind its configured address.
const EXIT_BIND_FAILURE: u8 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("failed to set up tracing: {e}");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            if cli.no_discovery {
                config.discovery.static_addresses.clear();
                config.discovery.dns = None;
                config.discovery.kv = None;
                config.discovery.cluster = None;
            }
            config
        }
        Err(e) => {
            error!("failed to load configuration: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), port = config.server.port, "starting mcp gateway");

    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("failed to initialize gateway: {e}");
            return ExitCode::from(EXIT_PLUGIN_INIT_FAILURE);
        }
    };

    if let Err(e) = gateway.run().await {
        error!("gateway error: {e}");
        return ExitCode::from(EXIT_BIND_FAILURE);
    }

    info!("gateway shutdown complete");
    ExitCode::SUCCESS
}
