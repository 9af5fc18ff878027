use dotenvy::dotenv;
use log::info;

use ipcrserver::config::AppConfig;
use ipcrserver::main_module::{init_logging, run_server};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenv().ok();
    init_logging();

    let config = AppConfig::load()?;
    info!(
        "Starting ipcrserver {} ({:?} backend)",
        env!("CARGO_PKG_VERSION"),
        config.backend
    );

    run_server(config).await
}
