use crate::models::{AccountId, Stream};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One API response: records newest-first plus the server's freshness hint.
///
/// Pages are transient; they are never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub records: Vec<T>,
    /// Instant until which the remote service will keep serving this same data.
    pub cache_valid_until: DateTime<Utc>,
}

impl<T> Page<T> {
    pub fn new(records: Vec<T>, cache_valid_until: DateTime<Utc>) -> Self {
        Self {
            records,
            cache_valid_until,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Backward pagination token: the remote reference id of the oldest stored record.
///
/// Always recomputed from storage before a follow-up fetch; never taken from a response.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub from_id: i64,
}

impl Cursor {
    pub fn new(from_id: i64) -> Self {
        Self { from_id }
    }
}

/// A record of a walked stream.
pub trait LedgerRecord: Serialize + Clone + Send + Sync + 'static {
    const STREAM: Stream;

    /// Key used for dedup and for the backward cursor.
    fn remote_id(&self) -> i64;

    fn occurred_at(&self) -> DateTime<Utc>;

    /// Item type referenced by the record, checked against the reference table.
    fn item_type_id(&self) -> Option<i64> {
        None
    }
}

/// Wallet journal entry. Keyed by `ref_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub ref_id: i64,
    pub date: DateTime<Utc>,
    pub ref_type_id: i64,
    pub amount: f64,
    pub balance: f64,
    pub owner_name_1: String,
    pub owner_id_1: i64,
    pub owner_name_2: String,
    pub owner_id_2: i64,
    pub arg_name_1: String,
    pub arg_id_1: i64,
    pub reason: String,
    pub tax_receiver_id: Option<i64>,
    pub tax_amount: Option<f64>,
}

impl LedgerRecord for JournalEntry {
    const STREAM: Stream = Stream::WalletJournal;

    fn remote_id(&self) -> i64 {
        self.ref_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.date
    }
}

/// Market transaction.
///
/// `transaction_id` alone is not unique across pages, so rows key on the
/// journal reference id instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub transaction_id: i64,
    pub journal_transaction_id: i64,
    pub date: DateTime<Utc>,
    pub type_id: i64,
    pub quantity: i64,
    pub price: f64,
    pub client_id: i64,
    pub client_name: String,
    pub station_id: i64,
    pub is_bid: bool,
    pub is_corporate: bool,
}

impl LedgerRecord for WalletTransaction {
    const STREAM: Stream = Stream::WalletTransactions;

    fn remote_id(&self) -> i64 {
        self.journal_transaction_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.date
    }

    fn item_type_id(&self) -> Option<i64> {
        Some(self.type_id)
    }
}

/// An order owned by the account, as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMarketOrder {
    pub order_id: i64,
    pub station_id: i64,
    pub type_id: i64,
    pub volume_entered: i64,
    pub volume_remaining: i64,
    pub min_volume: i64,
    /// 0 = open/active; anything else is closed, expired or cancelled.
    pub order_state: i64,
    pub range: i64,
    pub account_key: i64,
    pub duration: i64,
    pub escrow: f64,
    pub price: f64,
    pub is_bid: bool,
    pub issued: DateTime<Utc>,
}

/// Attribute enhancers as delivered: each one may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeEnhancers {
    pub memory: Option<crate::models::Bonus>,
    pub intelligence: Option<crate::models::Bonus>,
    pub perception: Option<crate::models::Bonus>,
    pub willpower: Option<crate::models::Bonus>,
    pub charisma: Option<crate::models::Bonus>,
}

impl AttributeEnhancers {
    /// Collapse absent enhancers to the "no bonus" value.
    pub fn into_bonuses(self) -> crate::models::ImplantBonuses {
        crate::models::ImplantBonuses {
            memory: self.memory.unwrap_or_default(),
            intelligence: self.intelligence.unwrap_or_default(),
            perception: self.perception.unwrap_or_default(),
            willpower: self.willpower.unwrap_or_default(),
            charisma: self.charisma.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alliance {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillLevel {
    pub type_id: i64,
    pub skillpoints: i64,
    pub level: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSheet {
    pub corporation_id: i64,
    pub corporation_name: String,
    pub alliance: Option<Alliance>,
    pub clone_name: String,
    pub clone_skill_points: i64,
    pub balance: f64,
    #[serde(default)]
    pub attribute_enhancers: AttributeEnhancers,
    pub skills: Vec<SkillLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchAgent {
    pub agent_id: i64,
    pub skill_type_id: i64,
    pub started_at: DateTime<Utc>,
    pub points_per_day: f64,
    pub remainder_points: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConquerableStation {
    pub station_id: i64,
    pub station_name: String,
    pub station_type_id: i64,
    pub solar_system_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRefType {
    pub ref_type_id: i64,
    pub ref_type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSkill {
    pub type_id: i64,
    pub name: String,
    pub published: bool,
    pub description: String,
    pub rank: i64,
    pub primary_attribute: Option<String>,
    pub secondary_attribute: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSkillGroup {
    pub group_id: i64,
    pub name: String,
    pub skills: Vec<RemoteSkill>,
}

/// Whether the walker should fetch another (older) page.
///
/// Returned by the reconciler instead of being tracked in shared state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Walking {
    Continue,
    Stop(StopReason),
}

impl Walking {
    pub fn should_continue(&self) -> bool {
        matches!(self, Walking::Continue)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The remote feed returned no records.
    EmptyPage,
    /// A record on the page was already stored.
    ReachedKnownHistory,
    /// Nothing processable is stored for the account, so there is no cursor.
    EmptyHistory,
    /// Single-fetch streams stop after their only page.
    SnapshotComplete,
}

/// Per-page reconciliation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub walking: Walking,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub duplicates_removed: u64,
}

impl ReconcileOutcome {
    pub fn new(walking: Walking) -> Self {
        Self {
            walking,
            inserted: 0,
            updated: 0,
            skipped: 0,
            duplicates_removed: 0,
        }
    }
}

/// Walker states. `Done`, `Aborted` and `SkippedNoCredential` are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkState {
    Start,
    Authenticating,
    Paging,
    Finalizing,
    Done,
    Aborted,
    SkippedNoCredential,
}

impl WalkState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WalkState::Done | WalkState::Aborted | WalkState::SkippedNoCredential
        )
    }

    pub fn can_transition_to(&self, next: WalkState) -> bool {
        use WalkState::*;
        matches!(
            (self, next),
            (Start, Authenticating)
                | (Start, SkippedNoCredential)
                | (Authenticating, Paging)
                | (Authenticating, Aborted)
                | (Paging, Finalizing)
                | (Paging, Aborted)
                | (Finalizing, Done)
        )
    }
}

/// Summary of one walker run for one `(account, stream)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkReport {
    pub account_id: AccountId,
    pub stream: Stream,
    pub state: WalkState,
    pub pages_fetched: u32,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub duplicates_removed: u64,
    pub stop_reason: Option<StopReason>,
    /// Timer value written at finalization, if the run got that far.
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl WalkReport {
    pub fn new(account_id: AccountId, stream: Stream) -> Self {
        Self {
            account_id,
            stream,
            state: WalkState::Start,
            pages_fetched: 0,
            inserted: 0,
            updated: 0,
            skipped: 0,
            duplicates_removed: 0,
            stop_reason: None,
            next_eligible_at: None,
            error: None,
        }
    }

    pub fn absorb(&mut self, outcome: &ReconcileOutcome) {
        self.inserted += outcome.inserted;
        self.updated += outcome.updated;
        self.skipped += outcome.skipped;
        self.duplicates_removed += outcome.duplicates_removed;
    }
}

/// A unit of work handed to the dispatch substrate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncJob {
    pub account_id: AccountId,
    pub stream: Stream,
}

impl SyncJob {
    pub fn new(account_id: AccountId, stream: Stream) -> Self {
        Self { account_id, stream }
    }
}

/// Counts reported by a reference-data refresh.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
}

impl RefreshSummary {
    pub fn total(&self) -> u64 {
        self.created + self.updated + self.skipped
    }
}
