use crate::models::{Account, AccountId, CharacterProfile, Credential, CredentialId, Stream, Timer};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use crate::store::models::{
    AccountOrder, CharacterSkill, ItemType, ListQuery, OrderRow, RecordKey, RecordRow, RefType,
    ResearchJob, SkillDefinition, SkillGroup, SolarSystem, Station,
};

/// Accounts and their credentials. Accounts are created externally.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn upsert_account(&self, account: &Account) -> Result<()>;
    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>>;
    async fn update_profile(&self, account_id: AccountId, profile: &CharacterProfile)
    -> Result<()>;

    async fn upsert_credential(&self, credential: &Credential) -> Result<()>;
    async fn get_credential(&self, credential_id: CredentialId) -> Result<Option<Credential>>;
    async fn set_credential_validity(&self, credential_id: CredentialId, is_valid: bool)
    -> Result<()>;
}

/// Durable `(account, stream) -> next eligible run` table.
#[async_trait]
pub trait TimerStore: Send + Sync {
    async fn upsert_timer(&self, timer: &Timer) -> Result<()>;
    async fn get_timer(&self, account_id: AccountId, stream: Stream) -> Result<Option<Timer>>;
    /// Timers with `next_eligible_at <= now`, ordered by account id.
    async fn list_due_timers(
        &self,
        stream: Stream,
        now: DateTime<Utc>,
        query: ListQuery,
    ) -> Result<Vec<Timer>>;
}

/// Walked-stream records (journal entries, transactions).
///
/// `insert_record` fails with `Error::Conflict` when the backend enforces the
/// `RecordKey` uniqueness index and a row already exists, and with
/// `Error::ReferentialIntegrity` when `item_type_id` is unknown.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_record(&self, row: &RecordRow) -> Result<()>;
    /// All rows sharing the key. More than one means duplicates awaiting cleanup.
    async fn find_records(&self, key: &RecordKey) -> Result<Vec<RecordRow>>;
    async fn delete_record(&self, row_id: Uuid) -> Result<()>;
    /// Oldest row by `occurred_at` (ties broken by the lowest remote id).
    async fn oldest_record(&self, account_id: AccountId, stream: Stream)
    -> Result<Option<RecordRow>>;
    /// Newest-first listing.
    async fn list_records(
        &self,
        account_id: AccountId,
        stream: Stream,
        query: ListQuery,
    ) -> Result<Vec<RecordRow>>;
    async fn count_records(&self, account_id: AccountId, stream: Stream) -> Result<u64>;
}

#[async_trait]
pub trait MarketStore: Send + Sync {
    async fn get_order(&self, order_id: i64) -> Result<Option<OrderRow>>;
    /// Fails with `Conflict` if the order exists, `ReferentialIntegrity` on an unknown
    /// item type or station.
    async fn insert_order(&self, order: &OrderRow) -> Result<()>;
    async fn update_order(&self, order: &OrderRow) -> Result<()>;

    async fn get_account_order(&self, order_id: i64) -> Result<Option<AccountOrder>>;
    async fn upsert_account_order(&self, order: &AccountOrder) -> Result<()>;
    async fn list_account_orders(&self, account_id: AccountId) -> Result<Vec<AccountOrder>>;
}

#[async_trait]
pub trait CharacterStore: Send + Sync {
    async fn get_skill(&self, account_id: AccountId, skill_id: i64)
    -> Result<Option<CharacterSkill>>;
    async fn upsert_skill(&self, skill: &CharacterSkill) -> Result<()>;
    async fn list_skills(&self, account_id: AccountId) -> Result<Vec<CharacterSkill>>;

    /// Drop every job for the account and store `jobs` instead.
    async fn replace_research_jobs(&self, account_id: AccountId, jobs: &[ResearchJob])
    -> Result<()>;
    async fn list_research_jobs(&self, account_id: AccountId) -> Result<Vec<ResearchJob>>;
}

/// Static and slowly changing reference tables.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn upsert_item_type(&self, item_type: &ItemType) -> Result<()>;
    async fn get_item_type(&self, id: i64) -> Result<Option<ItemType>>;

    async fn upsert_solar_system(&self, system: &SolarSystem) -> Result<()>;
    async fn get_solar_system(&self, id: i64) -> Result<Option<SolarSystem>>;

    async fn get_station(&self, id: i64) -> Result<Option<Station>>;
    /// Fails with `Conflict` if a station with the same id exists.
    async fn insert_station(&self, station: &Station) -> Result<()>;
    async fn update_station(&self, station: &Station) -> Result<()>;

    async fn get_ref_type(&self, id: i64) -> Result<Option<RefType>>;
    async fn insert_ref_type(&self, ref_type: &RefType) -> Result<()>;
    async fn update_ref_type(&self, ref_type: &RefType) -> Result<()>;

    async fn upsert_skill_group(&self, group: &SkillGroup) -> Result<()>;
    async fn upsert_skill_definition(&self, skill: &SkillDefinition) -> Result<()>;
    async fn get_skill_definition(&self, type_id: i64) -> Result<Option<SkillDefinition>>;
}

/// Everything the engine persists. Backends implement the component traits and get
/// this one for free.
pub trait SyncDb:
    AccountStore + TimerStore + RecordStore + MarketStore + CharacterStore + ReferenceStore
{
}

impl<T> SyncDb for T where
    T: AccountStore + TimerStore + RecordStore + MarketStore + CharacterStore + ReferenceStore
{
}
