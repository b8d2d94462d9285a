#![cfg(test)]

use std::collections::{HashMap, VecDeque};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use crate::Result;
use crate::error::{AuthFailure, GatewayError, GatewayResult};
use crate::models::{
    Account, AccountId, CharacterProfile, Credential, CredentialId, Stream, Timer,
};
use crate::store::{
    AccountOrder, AccountStore, CharacterSkill, CharacterStore, ItemType, ListQuery, MarketStore,
    MemorySyncDb, OrderRow, RecordKey, RecordRow, RecordStore, RefType, ReferenceStore,
    ResearchJob, SkillDefinition, SkillGroup, SolarSystem, Station, TimerStore,
};
use crate::sync::models::{
    CharacterSheet, ConquerableStation, Cursor, JournalEntry, Page, RemoteMarketOrder,
    RemoteRefType, RemoteSkillGroup, ResearchAgent, SyncJob, WalletTransaction,
};
use crate::sync::traits::{ApiGateway, ApiSession, Dispatcher, ReferenceApi};

pub(crate) const JITA: i64 = 30000142;
pub(crate) const JITA_STATION: i64 = 60003760;

pub(crate) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2013, 5, 1, 12, 0, 0).unwrap()
}

/// Distinct, increasing cache-expiry instants.
pub(crate) fn cache_time(n: i64) -> DateTime<Utc> {
    base_time() + Duration::hours(2) + Duration::minutes(15 * n)
}

pub(crate) fn journal_entry(ref_id: i64) -> JournalEntry {
    JournalEntry {
        ref_id,
        date: base_time() + Duration::seconds(ref_id),
        ref_type_id: 10,
        amount: 100.0,
        balance: 1_000.0 + ref_id as f64,
        owner_name_1: "Sender".to_string(),
        owner_id_1: 1,
        owner_name_2: "Receiver".to_string(),
        owner_id_2: 2,
        arg_name_1: String::new(),
        arg_id_1: 0,
        reason: String::new(),
        tax_receiver_id: None,
        tax_amount: None,
    }
}

/// Entries for `ids`, newest (highest id) first, as the remote feed lists them.
pub(crate) fn journal_entries(ids: RangeInclusive<i64>) -> Vec<JournalEntry> {
    ids.rev().map(journal_entry).collect()
}

pub(crate) fn transaction(journal_transaction_id: i64, type_id: i64) -> WalletTransaction {
    WalletTransaction {
        transaction_id: journal_transaction_id * 10,
        journal_transaction_id,
        date: base_time() + Duration::seconds(journal_transaction_id),
        type_id,
        quantity: 10,
        price: 5.5,
        client_id: 42,
        client_name: "Client".to_string(),
        station_id: JITA_STATION,
        is_bid: false,
        is_corporate: false,
    }
}

pub(crate) fn market_order(order_id: i64, order_state: i64) -> RemoteMarketOrder {
    RemoteMarketOrder {
        order_id,
        station_id: JITA_STATION,
        type_id: 34,
        volume_entered: 1_000,
        volume_remaining: 400,
        min_volume: 1,
        order_state,
        range: 32767,
        account_key: 1000,
        duration: 90,
        escrow: 0.0,
        price: 5.25,
        is_bid: false,
        issued: base_time(),
    }
}

/// Account 1 with a valid credential, account 2 without one, plus the
/// reference rows the fixtures point at.
pub(crate) async fn seeded_db() -> Arc<MemorySyncDb> {
    let db = Arc::new(MemorySyncDb::new());
    db.upsert_credential(&Credential {
        id: CredentialId(1),
        key_id: 1234,
        verification_code: "vcode".to_string(),
        is_valid: true,
    })
    .await
    .unwrap();
    db.upsert_account(&Account::new(AccountId(1), "Pilot One", Some(CredentialId(1))))
        .await
        .unwrap();
    db.upsert_account(&Account::new(AccountId(2), "Pilot Two", None))
        .await
        .unwrap();
    for (id, name) in [(34, "Tritanium"), (35, "Pyerite")] {
        db.upsert_item_type(&ItemType {
            id,
            name: name.to_string(),
        })
        .await
        .unwrap();
    }
    db.upsert_solar_system(&SolarSystem {
        id: JITA,
        name: "Jita".to_string(),
        constellation_id: 20000020,
        region_id: 10000002,
    })
    .await
    .unwrap();
    db.insert_station(&Station {
        id: JITA_STATION,
        name: "Jita IV - Moon 4 - Caldari Navy Assembly Plant".to_string(),
        solar_system_id: JITA,
        type_id: 1529,
        constellation_id: 20000020,
        region_id: 10000002,
    })
    .await
    .unwrap();
    db
}

#[derive(Default)]
struct Script {
    auth_failure: Option<AuthFailure>,
    auth_count: usize,
    journal: VecDeque<GatewayResult<Page<JournalEntry>>>,
    transactions: VecDeque<GatewayResult<Page<WalletTransaction>>>,
    orders: VecDeque<GatewayResult<Page<RemoteMarketOrder>>>,
    sheets: VecDeque<GatewayResult<Page<CharacterSheet>>>,
    research: VecDeque<GatewayResult<Page<ResearchAgent>>>,
    stations: VecDeque<GatewayResult<Page<ConquerableStation>>>,
    ref_types: VecDeque<GatewayResult<Page<RemoteRefType>>>,
    skill_tree: VecDeque<GatewayResult<Page<RemoteSkillGroup>>>,
    fetches: HashMap<Stream, usize>,
    journal_cursors: Vec<Option<Cursor>>,
}

fn next_or_empty<T>(queue: &mut VecDeque<GatewayResult<Page<T>>>) -> GatewayResult<Page<T>> {
    queue
        .pop_front()
        .unwrap_or_else(|| Ok(Page::new(Vec::new(), cache_time(99))))
}

/// Fake gateway replaying queued responses per endpoint. An exhausted queue
/// answers with an empty page.
#[derive(Clone, Default)]
pub(crate) struct ScriptedGateway {
    script: Arc<Mutex<Script>>,
}

impl ScriptedGateway {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_auth(&self, failure: AuthFailure) {
        self.script.lock().unwrap().auth_failure = Some(failure);
    }

    pub(crate) fn push_journal(&self, page: GatewayResult<Page<JournalEntry>>) {
        self.script.lock().unwrap().journal.push_back(page);
    }

    pub(crate) fn push_transactions(&self, page: GatewayResult<Page<WalletTransaction>>) {
        self.script.lock().unwrap().transactions.push_back(page);
    }

    pub(crate) fn push_orders(&self, page: GatewayResult<Page<RemoteMarketOrder>>) {
        self.script.lock().unwrap().orders.push_back(page);
    }

    pub(crate) fn push_stations(&self, page: GatewayResult<Page<ConquerableStation>>) {
        self.script.lock().unwrap().stations.push_back(page);
    }

    pub(crate) fn push_ref_types(&self, page: GatewayResult<Page<RemoteRefType>>) {
        self.script.lock().unwrap().ref_types.push_back(page);
    }

    pub(crate) fn push_skill_tree(&self, page: GatewayResult<Page<RemoteSkillGroup>>) {
        self.script.lock().unwrap().skill_tree.push_back(page);
    }

    pub(crate) fn auth_count(&self) -> usize {
        self.script.lock().unwrap().auth_count
    }

    pub(crate) fn fetch_count(&self, stream: Stream) -> usize {
        self.script
            .lock()
            .unwrap()
            .fetches
            .get(&stream)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn journal_cursors(&self) -> Vec<Option<Cursor>> {
        self.script.lock().unwrap().journal_cursors.clone()
    }
}

struct ScriptedSession {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSession {
    fn count(&self, stream: Stream) {
        *self.script.lock().unwrap().fetches.entry(stream).or_default() += 1;
    }
}

#[async_trait]
impl ApiGateway for ScriptedGateway {
    async fn authenticate(
        &self,
        _account_id: AccountId,
        _credential: &Credential,
    ) -> GatewayResult<Box<dyn ApiSession>> {
        let mut script = self.script.lock().unwrap();
        script.auth_count += 1;
        if let Some(failure) = script.auth_failure.clone() {
            return Err(GatewayError::Authentication(failure));
        }
        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
        }))
    }
}

#[async_trait]
impl ApiSession for ScriptedSession {
    async fn wallet_journal(
        &self,
        _row_count: u32,
        cursor: Option<Cursor>,
    ) -> GatewayResult<Page<JournalEntry>> {
        self.count(Stream::WalletJournal);
        let mut script = self.script.lock().unwrap();
        script.journal_cursors.push(cursor);
        next_or_empty(&mut script.journal)
    }

    async fn wallet_transactions(
        &self,
        _row_count: u32,
        _cursor: Option<Cursor>,
    ) -> GatewayResult<Page<WalletTransaction>> {
        self.count(Stream::WalletTransactions);
        next_or_empty(&mut self.script.lock().unwrap().transactions)
    }

    async fn market_orders(&self) -> GatewayResult<Page<RemoteMarketOrder>> {
        self.count(Stream::MarketOrders);
        next_or_empty(&mut self.script.lock().unwrap().orders)
    }

    async fn character_sheet(&self) -> GatewayResult<Page<CharacterSheet>> {
        self.count(Stream::CharacterSheet);
        next_or_empty(&mut self.script.lock().unwrap().sheets)
    }

    async fn research(&self) -> GatewayResult<Page<ResearchAgent>> {
        self.count(Stream::Research);
        next_or_empty(&mut self.script.lock().unwrap().research)
    }
}

#[async_trait]
impl ReferenceApi for ScriptedGateway {
    async fn conquerable_stations(&self) -> GatewayResult<Page<ConquerableStation>> {
        next_or_empty(&mut self.script.lock().unwrap().stations)
    }

    async fn ref_types(&self) -> GatewayResult<Page<RemoteRefType>> {
        next_or_empty(&mut self.script.lock().unwrap().ref_types)
    }

    async fn skill_tree(&self) -> GatewayResult<Page<RemoteSkillGroup>> {
        next_or_empty(&mut self.script.lock().unwrap().skill_tree)
    }
}

/// Dispatcher that only records what it was handed.
#[derive(Clone, Default)]
pub(crate) struct RecordingDispatcher {
    jobs: Arc<Mutex<Vec<(SyncJob, DateTime<Utc>)>>>,
}

impl RecordingDispatcher {
    pub(crate) fn jobs(&self) -> Vec<(SyncJob, DateTime<Utc>)> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, job: SyncJob, valid_until: DateTime<Utc>) -> Result<()> {
        self.jobs.lock().unwrap().push((job, valid_until));
        Ok(())
    }
}

/// Wraps a store so existence lookups always miss, modelling a concurrent
/// worker that inserted between our read and our write.
#[derive(Clone)]
pub(crate) struct StaleReads {
    inner: Arc<MemorySyncDb>,
    hide_stations: bool,
}

impl StaleReads {
    pub(crate) fn new(inner: Arc<MemorySyncDb>) -> Self {
        Self {
            inner,
            hide_stations: true,
        }
    }

    /// Keep station lookups truthful so orders can still be located.
    pub(crate) fn with_visible_stations(mut self) -> Self {
        self.hide_stations = false;
        self
    }
}

#[async_trait]
impl AccountStore for StaleReads {
    async fn upsert_account(&self, account: &Account) -> Result<()> {
        self.inner.upsert_account(account).await
    }
    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>> {
        self.inner.get_account(account_id).await
    }
    async fn update_profile(&self, account_id: AccountId, profile: &CharacterProfile) -> Result<()> {
        self.inner.update_profile(account_id, profile).await
    }
    async fn upsert_credential(&self, credential: &Credential) -> Result<()> {
        self.inner.upsert_credential(credential).await
    }
    async fn get_credential(&self, credential_id: CredentialId) -> Result<Option<Credential>> {
        self.inner.get_credential(credential_id).await
    }
    async fn set_credential_validity(&self, credential_id: CredentialId, is_valid: bool) -> Result<()> {
        self.inner.set_credential_validity(credential_id, is_valid).await
    }
}

#[async_trait]
impl TimerStore for StaleReads {
    async fn upsert_timer(&self, timer: &Timer) -> Result<()> {
        self.inner.upsert_timer(timer).await
    }
    async fn get_timer(&self, account_id: AccountId, stream: Stream) -> Result<Option<Timer>> {
        self.inner.get_timer(account_id, stream).await
    }
    async fn list_due_timers(
        &self,
        stream: Stream,
        now: DateTime<Utc>,
        query: ListQuery,
    ) -> Result<Vec<Timer>> {
        self.inner.list_due_timers(stream, now, query).await
    }
}

#[async_trait]
impl RecordStore for StaleReads {
    async fn insert_record(&self, row: &RecordRow) -> Result<()> {
        self.inner.insert_record(row).await
    }
    async fn find_records(&self, _key: &RecordKey) -> Result<Vec<RecordRow>> {
        Ok(Vec::new())
    }
    async fn delete_record(&self, row_id: Uuid) -> Result<()> {
        self.inner.delete_record(row_id).await
    }
    async fn oldest_record(&self, account_id: AccountId, stream: Stream) -> Result<Option<RecordRow>> {
        self.inner.oldest_record(account_id, stream).await
    }
    async fn list_records(
        &self,
        account_id: AccountId,
        stream: Stream,
        query: ListQuery,
    ) -> Result<Vec<RecordRow>> {
        self.inner.list_records(account_id, stream, query).await
    }
    async fn count_records(&self, account_id: AccountId, stream: Stream) -> Result<u64> {
        self.inner.count_records(account_id, stream).await
    }
}

#[async_trait]
impl MarketStore for StaleReads {
    async fn get_order(&self, _order_id: i64) -> Result<Option<OrderRow>> {
        Ok(None)
    }
    async fn insert_order(&self, order: &OrderRow) -> Result<()> {
        self.inner.insert_order(order).await
    }
    async fn update_order(&self, order: &OrderRow) -> Result<()> {
        self.inner.update_order(order).await
    }
    async fn get_account_order(&self, order_id: i64) -> Result<Option<AccountOrder>> {
        self.inner.get_account_order(order_id).await
    }
    async fn upsert_account_order(&self, order: &AccountOrder) -> Result<()> {
        self.inner.upsert_account_order(order).await
    }
    async fn list_account_orders(&self, account_id: AccountId) -> Result<Vec<AccountOrder>> {
        self.inner.list_account_orders(account_id).await
    }
}

#[async_trait]
impl CharacterStore for StaleReads {
    async fn get_skill(&self, account_id: AccountId, skill_id: i64) -> Result<Option<CharacterSkill>> {
        self.inner.get_skill(account_id, skill_id).await
    }
    async fn upsert_skill(&self, skill: &CharacterSkill) -> Result<()> {
        self.inner.upsert_skill(skill).await
    }
    async fn list_skills(&self, account_id: AccountId) -> Result<Vec<CharacterSkill>> {
        self.inner.list_skills(account_id).await
    }
    async fn replace_research_jobs(&self, account_id: AccountId, jobs: &[ResearchJob]) -> Result<()> {
        self.inner.replace_research_jobs(account_id, jobs).await
    }
    async fn list_research_jobs(&self, account_id: AccountId) -> Result<Vec<ResearchJob>> {
        self.inner.list_research_jobs(account_id).await
    }
}

#[async_trait]
impl ReferenceStore for StaleReads {
    async fn upsert_item_type(&self, item_type: &ItemType) -> Result<()> {
        self.inner.upsert_item_type(item_type).await
    }
    async fn get_item_type(&self, id: i64) -> Result<Option<ItemType>> {
        self.inner.get_item_type(id).await
    }
    async fn upsert_solar_system(&self, system: &SolarSystem) -> Result<()> {
        self.inner.upsert_solar_system(system).await
    }
    async fn get_solar_system(&self, id: i64) -> Result<Option<SolarSystem>> {
        self.inner.get_solar_system(id).await
    }
    async fn get_station(&self, id: i64) -> Result<Option<Station>> {
        if self.hide_stations {
            return Ok(None);
        }
        self.inner.get_station(id).await
    }
    async fn insert_station(&self, station: &Station) -> Result<()> {
        self.inner.insert_station(station).await
    }
    async fn update_station(&self, station: &Station) -> Result<()> {
        self.inner.update_station(station).await
    }
    async fn get_ref_type(&self, _id: i64) -> Result<Option<RefType>> {
        Ok(None)
    }
    async fn insert_ref_type(&self, ref_type: &RefType) -> Result<()> {
        self.inner.insert_ref_type(ref_type).await
    }
    async fn update_ref_type(&self, ref_type: &RefType) -> Result<()> {
        self.inner.update_ref_type(ref_type).await
    }
    async fn upsert_skill_group(&self, group: &SkillGroup) -> Result<()> {
        self.inner.upsert_skill_group(group).await
    }
    async fn upsert_skill_definition(&self, skill: &SkillDefinition) -> Result<()> {
        self.inner.upsert_skill_definition(skill).await
    }
    async fn get_skill_definition(&self, type_id: i64) -> Result<Option<SkillDefinition>> {
        self.inner.get_skill_definition(type_id).await
    }
}
