use crate::models::Stream;
use crate::{Error, Result};
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;

/// Largest page the remote service hands out; also the default request size.
pub const MAX_PAGE_SIZE: u32 = 2560;

/// Sweep cadence for each per-account stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamIntervals {
    pub wallet_journal: Duration,
    pub wallet_transactions: Duration,
    pub market_orders: Duration,
    pub character_sheet: Duration,
    pub research: Duration,
}

impl Default for StreamIntervals {
    fn default() -> Self {
        let five_minutes = Duration::from_secs(5 * 60);
        Self {
            wallet_journal: five_minutes,
            wallet_transactions: five_minutes,
            market_orders: five_minutes,
            character_sheet: five_minutes,
            research: five_minutes,
        }
    }
}

impl StreamIntervals {
    pub fn get(&self, stream: Stream) -> Duration {
        match stream {
            Stream::WalletJournal => self.wallet_journal,
            Stream::WalletTransactions => self.wallet_transactions,
            Stream::MarketOrders => self.market_orders,
            Stream::CharacterSheet => self.character_sheet,
            Stream::Research => self.research,
        }
    }
}

/// Cadence of the reference-data refresh tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSchedules {
    pub enabled: bool,
    pub conquerable_stations: Duration,
    /// Six-field cron expression (seconds first), evaluated in UTC.
    pub ref_types_cron: String,
    pub skill_tree: Duration,
}

impl Default for ReferenceSchedules {
    fn default() -> Self {
        Self {
            enabled: true,
            conquerable_stations: Duration::from_secs(60 * 60),
            ref_types_cron: "0 0 0 * * *".to_string(),
            skill_tree: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Rows requested per page from walked streams.
    pub page_size: u32,
    /// How long a dispatched job stays eligible to start.
    pub dispatch_validity: Duration,
    pub max_concurrent_walkers: usize,
    pub streams: StreamIntervals,
    pub reference: ReferenceSchedules,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            dispatch_validity: Duration::from_secs(60 * 60),
            max_concurrent_walkers: 16,
            streams: StreamIntervals::default(),
            reference: ReferenceSchedules::default(),
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

fn env_secs(name: &str, default: Duration) -> Duration {
    env_u64(name).map(Duration::from_secs).unwrap_or(default)
}

impl EngineConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let stream_default = defaults.streams.wallet_journal;
        let cfg = Self {
            page_size: env_u64("LEDGERWALK_PAGE_SIZE")
                .map(|v| v as u32)
                .unwrap_or(defaults.page_size),
            dispatch_validity: env_secs(
                "LEDGERWALK_DISPATCH_VALIDITY_SECS",
                defaults.dispatch_validity,
            ),
            max_concurrent_walkers: env_u64("LEDGERWALK_MAX_CONCURRENT_WALKERS")
                .map(|v| v as usize)
                .unwrap_or(defaults.max_concurrent_walkers),
            streams: StreamIntervals {
                wallet_journal: env_secs("LEDGERWALK_JOURNAL_INTERVAL_SECS", stream_default),
                wallet_transactions: env_secs(
                    "LEDGERWALK_TRANSACTIONS_INTERVAL_SECS",
                    stream_default,
                ),
                market_orders: env_secs("LEDGERWALK_ORDERS_INTERVAL_SECS", stream_default),
                character_sheet: env_secs("LEDGERWALK_SHEET_INTERVAL_SECS", stream_default),
                research: env_secs("LEDGERWALK_RESEARCH_INTERVAL_SECS", stream_default),
            },
            reference: ReferenceSchedules {
                enabled: std::env::var("LEDGERWALK_REFERENCE_REFRESH")
                    .map(|v| !matches!(v.trim(), "0" | "false" | "off"))
                    .unwrap_or(defaults.reference.enabled),
                conquerable_stations: env_secs(
                    "LEDGERWALK_STATIONS_INTERVAL_SECS",
                    defaults.reference.conquerable_stations,
                ),
                ref_types_cron: std::env::var("LEDGERWALK_REF_TYPES_CRON")
                    .unwrap_or(defaults.reference.ref_types_cron),
                skill_tree: env_secs(
                    "LEDGERWALK_SKILL_TREE_INTERVAL_SECS",
                    defaults.reference.skill_tree,
                ),
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::InvalidInput(format!(
                "page_size must be in 1..={MAX_PAGE_SIZE}"
            )));
        }
        if self.dispatch_validity.is_zero() {
            return Err(Error::InvalidInput(
                "dispatch_validity must be > 0".to_string(),
            ));
        }
        if self.max_concurrent_walkers == 0 {
            return Err(Error::InvalidInput(
                "max_concurrent_walkers must be > 0".to_string(),
            ));
        }
        for stream in Stream::ALL {
            if self.streams.get(stream).is_zero() {
                return Err(Error::InvalidInput(format!(
                    "sweep interval for {stream} must be > 0"
                )));
            }
        }
        if self.reference.conquerable_stations.is_zero() || self.reference.skill_tree.is_zero() {
            return Err(Error::InvalidInput(
                "reference refresh intervals must be > 0".to_string(),
            ));
        }
        Schedule::from_str(&self.reference.ref_types_cron).map_err(|e| {
            Error::InvalidInput(format!(
                "invalid cron expression '{}': {e}",
                self.reference.ref_types_cron
            ))
        })?;
        Ok(())
    }
}
