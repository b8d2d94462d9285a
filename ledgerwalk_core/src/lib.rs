//! Ledgerwalk core: incremental synchronization of per-account ledgers and
//! snapshots from a paginated, cache-timed remote API.

pub mod config;
pub mod error;
pub mod models;
pub mod o11y;
pub mod store;
pub mod sync;

pub use config::{EngineConfig, MAX_PAGE_SIZE, ReferenceSchedules, StreamIntervals};
pub use error::{
    AuthFailure, AuthFailureKind, Error, GatewayError, GatewayResult, Result,
};
pub use models::{
    Account, AccountId, CharacterProfile, Credential, CredentialId, IdParseError, Stream,
    StreamKind, Timer,
};
pub use store::{MemorySyncDb, SqliteSyncDb, SyncDb};
pub use sync::models::{SyncJob, WalkReport, WalkState};
