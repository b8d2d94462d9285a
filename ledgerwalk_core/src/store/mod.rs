//! Persistent state for the sync engine: accounts, credentials, timers, walked
//! records, snapshot tables and reference data.

pub mod memory;
pub mod models;
pub mod sqlite;
pub mod traits;

pub use memory::MemorySyncDb;
pub use models::*;
pub use sqlite::SqliteSyncDb;
pub use traits::{
    AccountStore, CharacterStore, MarketStore, RecordStore, ReferenceStore, SyncDb, TimerStore,
};
