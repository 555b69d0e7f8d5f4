#![cfg(not(tarpaulin_include))]

use clap::Parser;
use sheetdesk::app;
use sheetdesk::config::Config;

/// Main entry point for the web application
///
/// Reads the configuration from flags and the environment, sets up logging from
/// `RUST_LOG` (defaulting to `info`), and serves the API until interrupted.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    app::run(config).await
}
