use crate::error::{AuthFailure, GatewayResult};
use crate::models::{AccountId, Credential};
use crate::sync::models::{
    CharacterSheet, ConquerableStation, Cursor, JournalEntry, LedgerRecord, Page,
    RemoteMarketOrder, RemoteRefType, RemoteSkillGroup, ResearchAgent, SyncJob, WalletTransaction,
};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Capability wrapping the remote account API.
///
/// Implementations live in `ledgerwalk_integrations` or test code. The wire
/// format stays entirely behind this trait.
#[async_trait]
pub trait ApiGateway: Send + Sync {
    /// Open a session for one account. Rejected credentials surface as
    /// `GatewayError::Authentication`.
    async fn authenticate(
        &self,
        account_id: AccountId,
        credential: &Credential,
    ) -> GatewayResult<Box<dyn ApiSession>>;
}

/// An authenticated view of one account's sheets.
///
/// Every page carries the remote cache-expiry instant. Pages are newest-first.
#[async_trait]
pub trait ApiSession: Send + Sync {
    async fn wallet_journal(
        &self,
        row_count: u32,
        cursor: Option<Cursor>,
    ) -> GatewayResult<Page<JournalEntry>>;

    async fn wallet_transactions(
        &self,
        row_count: u32,
        cursor: Option<Cursor>,
    ) -> GatewayResult<Page<WalletTransaction>>;

    async fn market_orders(&self) -> GatewayResult<Page<RemoteMarketOrder>>;

    /// Single-record page (empty if the service returned no sheet).
    async fn character_sheet(&self) -> GatewayResult<Page<CharacterSheet>>;

    async fn research(&self) -> GatewayResult<Page<ResearchAgent>>;
}

/// Unauthenticated reference-data endpoints.
#[async_trait]
pub trait ReferenceApi: Send + Sync {
    async fn conquerable_stations(&self) -> GatewayResult<Page<ConquerableStation>>;
    async fn ref_types(&self) -> GatewayResult<Page<RemoteRefType>>;
    async fn skill_tree(&self) -> GatewayResult<Page<RemoteSkillGroup>>;
}

pub type PageFuture<'a, R> = Pin<Box<dyn Future<Output = GatewayResult<Page<R>>> + Send + 'a>>;

/// A record type the walker can page backwards through.
pub trait WalkedRecord: LedgerRecord {
    fn fetch_page<'a>(
        session: &'a dyn ApiSession,
        row_count: u32,
        cursor: Option<Cursor>,
    ) -> PageFuture<'a, Self>;
}

impl WalkedRecord for JournalEntry {
    fn fetch_page<'a>(
        session: &'a dyn ApiSession,
        row_count: u32,
        cursor: Option<Cursor>,
    ) -> PageFuture<'a, Self> {
        session.wallet_journal(row_count, cursor)
    }
}

impl WalkedRecord for WalletTransaction {
    fn fetch_page<'a>(
        session: &'a dyn ApiSession,
        row_count: u32,
        cursor: Option<Cursor>,
    ) -> PageFuture<'a, Self> {
        session.wallet_transactions(row_count, cursor)
    }
}

/// Reacts to a rejected credential. Solely responsible for the validity flag.
#[async_trait]
pub trait CredentialInvalidationHandler: Send + Sync {
    async fn on_auth_failure(
        &self,
        account_id: AccountId,
        credential: &Credential,
        failure: &AuthFailure,
    ) -> Result<()>;
}

/// Asynchronous, fire-and-forget execution of sync jobs.
///
/// A job not started by `valid_until` must be discarded unexecuted.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, job: SyncJob, valid_until: DateTime<Utc>) -> Result<()>;
}
