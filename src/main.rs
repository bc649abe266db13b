use std::sync::Arc;

use tracing::error;
use tracing_subscriber::EnvFilter;

use chatnode::bootstrap::BootstrapController;
use chatnode::config::NodeConfig;
use chatnode::console::{StdinInput, StdoutOutput};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
    let config = match NodeConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let controller =
        BootstrapController::new(config, Arc::new(StdinInput::new()), Arc::new(StdoutOutput));
    if let Err(e) = controller.run().await {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}
