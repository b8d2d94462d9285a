use clap::{Parser, Subcommand};
use ledgerwalk_core::models::Stream;
use ledgerwalk_core::sync::ReferenceDataset;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "ledgerwalk", version, about = "Incremental account ledger synchronizer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the sweep and reference-refresh loops until interrupted (default).
    Run {
        /// Directory holding the SQLite database.
        #[arg(long, env = "LEDGERWALK_DATA_DIR", default_value = ".ledgerwalk")]
        data_dir: PathBuf,
    },

    /// Sweep one stream once and wait for the dispatched walkers.
    Sweep {
        #[arg(long, env = "LEDGERWALK_DATA_DIR", default_value = ".ledgerwalk")]
        data_dir: PathBuf,

        /// wallet_journal, wallet_transactions, market_orders, character_sheet or research.
        #[arg(long)]
        stream: Stream,
    },

    /// Refresh one reference dataset now.
    Refresh {
        #[arg(long, env = "LEDGERWALK_DATA_DIR", default_value = ".ledgerwalk")]
        data_dir: PathBuf,

        /// conquerable_stations, ref_types or skill_tree.
        #[arg(long)]
        dataset: ReferenceDataset,
    },

    /// Register (or re-key) an account; every stream becomes due immediately.
    AddAccount {
        #[arg(long, env = "LEDGERWALK_DATA_DIR", default_value = ".ledgerwalk")]
        data_dir: PathBuf,

        /// Remote character id.
        #[arg(long)]
        account_id: i64,

        #[arg(long)]
        name: String,

        #[arg(long)]
        key_id: i64,

        #[arg(long, env = "LEDGERWALK_VERIFICATION_CODE", hide_env_values = true)]
        verification_code: String,
    },

    /// Print effective configuration (redacted secrets).
    Config,
}
