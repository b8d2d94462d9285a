//! Incremental synchronization: walking paged histories, reconciling
//! snapshots, and scheduling both.

pub mod credentials;
pub mod dispatch;
pub mod models;
pub mod reconciler;
pub mod reference;
pub mod schedule;
pub mod snapshot;
pub mod traits;
pub mod walker;

#[cfg(test)]
mod test_support;

pub use credentials::{CredentialResolver, InvalidateRejectedCredentials};
pub use dispatch::TokioDispatcher;
pub use reconciler::RecordReconciler;
pub use reference::{ReferenceDataset, ReferenceRefresher};
pub use schedule::{Scheduler, StreamSchedule};
pub use snapshot::SnapshotReconciler;
pub use traits::{
    ApiGateway, ApiSession, CredentialInvalidationHandler, Dispatcher, ReferenceApi, WalkedRecord,
};
pub use walker::Walker;
