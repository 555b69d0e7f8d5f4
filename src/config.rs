use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::importer::{IMPORT_BATCH_SIZE, ImportOptions};

/// Server settings, from flags or the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "website", about = "Spreadsheet workspace server")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "SHEETDESK_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Secret key for the PayMongo API
    #[arg(long, env = "PAYMONGO_SECRET_KEY", hide_env_values = true)]
    pub paymongo_secret_key: Option<String>,

    #[arg(
        long,
        env = "PAYMONGO_BASE_URL",
        default_value = "https://api.paymongo.com/v1"
    )]
    pub paymongo_base_url: String,

    /// Gzip JSON file the in-memory backend is loaded from and saved to on shutdown
    #[arg(long, env = "SHEETDESK_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Rows written per request during an import
    #[arg(long, env = "SHEETDESK_IMPORT_BATCH_SIZE", default_value_t = IMPORT_BATCH_SIZE)]
    pub import_batch_size: usize,

    /// Pause between import batches
    #[arg(long, env = "SHEETDESK_IMPORT_BATCH_DELAY_MS", default_value_t = 100)]
    pub import_batch_delay_ms: u64,

    /// Largest row set a single view write may carry
    #[arg(long, env = "SHEETDESK_MAX_ROWS_PER_VIEW")]
    pub max_rows_per_view: Option<usize>,
}

impl Config {
    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            batch_size: self.import_batch_size.max(1),
            batch_delay: Duration::from_millis(self.import_batch_delay_ms),
        }
    }
}
