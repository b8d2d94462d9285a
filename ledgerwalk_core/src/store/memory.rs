use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Account, AccountId, CharacterProfile, Credential, CredentialId, Stream, Timer};
use crate::store::traits::*;
use crate::{Error, Result};

#[derive(Default)]
struct State {
    accounts: BTreeMap<AccountId, Account>,
    credentials: HashMap<CredentialId, Credential>,
    timers: BTreeMap<(AccountId, Stream), Timer>,
    records: Vec<RecordRow>,
    orders: HashMap<i64, OrderRow>,
    account_orders: HashMap<i64, AccountOrder>,
    skills: BTreeMap<(AccountId, i64), CharacterSkill>,
    research: Vec<ResearchJob>,
    item_types: HashMap<i64, ItemType>,
    solar_systems: HashMap<i64, SolarSystem>,
    stations: HashMap<i64, Station>,
    ref_types: HashMap<i64, RefType>,
    skill_groups: HashMap<i64, SkillGroup>,
    skill_definitions: HashMap<i64, SkillDefinition>,
}

/// In-memory `SyncDb` for local development and unit tests.
///
/// Enforces the same constraints as the SQLite backend: one record per
/// `RecordKey` and known item types / stations for foreign keys. The
/// uniqueness index can be switched off with [`MemorySyncDb::without_unique_index`]
/// to model storage that predates it and already holds duplicates.
#[derive(Clone)]
pub struct MemorySyncDb {
    state: Arc<Mutex<State>>,
    unique_records: bool,
}

impl Default for MemorySyncDb {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySyncDb {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            unique_records: true,
        }
    }

    pub fn without_unique_index() -> Self {
        Self {
            unique_records: false,
            ..Self::new()
        }
    }

    /// Snapshot of every stored record (primarily for tests).
    pub async fn all_records(&self) -> Vec<RecordRow> {
        self.state.lock().await.records.clone()
    }
}

#[async_trait]
impl AccountStore for MemorySyncDb {
    async fn upsert_account(&self, account: &Account) -> Result<()> {
        let mut s = self.state.lock().await;
        if let Some(cid) = account.credential_id {
            if !s.credentials.contains_key(&cid) {
                return Err(Error::ReferentialIntegrity(format!(
                    "account {} references unknown credential {cid}",
                    account.id
                )));
            }
        }
        s.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>> {
        Ok(self.state.lock().await.accounts.get(&account_id).cloned())
    }

    async fn update_profile(
        &self,
        account_id: AccountId,
        profile: &CharacterProfile,
    ) -> Result<()> {
        let mut s = self.state.lock().await;
        let account = s
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| Error::NotFound(format!("account {account_id}")))?;
        account.profile = profile.clone();
        Ok(())
    }

    async fn upsert_credential(&self, credential: &Credential) -> Result<()> {
        self.state
            .lock()
            .await
            .credentials
            .insert(credential.id, credential.clone());
        Ok(())
    }

    async fn get_credential(&self, credential_id: CredentialId) -> Result<Option<Credential>> {
        Ok(self.state.lock().await.credentials.get(&credential_id).cloned())
    }

    async fn set_credential_validity(
        &self,
        credential_id: CredentialId,
        is_valid: bool,
    ) -> Result<()> {
        let mut s = self.state.lock().await;
        let cred = s
            .credentials
            .get_mut(&credential_id)
            .ok_or_else(|| Error::NotFound(format!("credential {credential_id}")))?;
        cred.is_valid = is_valid;
        Ok(())
    }
}

#[async_trait]
impl TimerStore for MemorySyncDb {
    async fn upsert_timer(&self, timer: &Timer) -> Result<()> {
        self.state
            .lock()
            .await
            .timers
            .insert((timer.account_id, timer.stream), timer.clone());
        Ok(())
    }

    async fn get_timer(&self, account_id: AccountId, stream: Stream) -> Result<Option<Timer>> {
        Ok(self
            .state
            .lock()
            .await
            .timers
            .get(&(account_id, stream))
            .cloned())
    }

    async fn list_due_timers(
        &self,
        stream: Stream,
        now: DateTime<Utc>,
        query: ListQuery,
    ) -> Result<Vec<Timer>> {
        let s = self.state.lock().await;
        Ok(s.timers
            .values()
            .filter(|t| t.stream == stream && t.is_due(now))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RecordStore for MemorySyncDb {
    async fn insert_record(&self, row: &RecordRow) -> Result<()> {
        let mut s = self.state.lock().await;
        if let Some(type_id) = row.item_type_id {
            if !s.item_types.contains_key(&type_id) {
                return Err(Error::ReferentialIntegrity(format!(
                    "unknown item type {type_id}"
                )));
            }
        }
        let key = row.key();
        if self.unique_records && s.records.iter().any(|r| r.key() == key) {
            return Err(Error::Conflict(format!(
                "record {} already stored for account {} on {}",
                key.remote_id, key.account_id, key.stream
            )));
        }
        s.records.push(row.clone());
        Ok(())
    }

    async fn find_records(&self, key: &RecordKey) -> Result<Vec<RecordRow>> {
        let s = self.state.lock().await;
        Ok(s.records
            .iter()
            .filter(|r| r.key() == *key)
            .cloned()
            .collect())
    }

    async fn delete_record(&self, row_id: Uuid) -> Result<()> {
        self.state
            .lock()
            .await
            .records
            .retain(|r| r.row_id != row_id);
        Ok(())
    }

    async fn oldest_record(
        &self,
        account_id: AccountId,
        stream: Stream,
    ) -> Result<Option<RecordRow>> {
        let s = self.state.lock().await;
        Ok(s.records
            .iter()
            .filter(|r| r.account_id == account_id && r.stream == stream)
            .min_by_key(|r| (r.occurred_at, r.remote_id))
            .cloned())
    }

    async fn list_records(
        &self,
        account_id: AccountId,
        stream: Stream,
        query: ListQuery,
    ) -> Result<Vec<RecordRow>> {
        let s = self.state.lock().await;
        let mut rows: Vec<RecordRow> = s
            .records
            .iter()
            .filter(|r| r.account_id == account_id && r.stream == stream)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.occurred_at, b.remote_id).cmp(&(a.occurred_at, a.remote_id)));
        Ok(rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    async fn count_records(&self, account_id: AccountId, stream: Stream) -> Result<u64> {
        let s = self.state.lock().await;
        Ok(s.records
            .iter()
            .filter(|r| r.account_id == account_id && r.stream == stream)
            .count() as u64)
    }
}

#[async_trait]
impl MarketStore for MemorySyncDb {
    async fn get_order(&self, order_id: i64) -> Result<Option<OrderRow>> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }

    async fn insert_order(&self, order: &OrderRow) -> Result<()> {
        let mut s = self.state.lock().await;
        if !s.item_types.contains_key(&order.type_id) {
            return Err(Error::ReferentialIntegrity(format!(
                "unknown item type {}",
                order.type_id
            )));
        }
        if !s.stations.contains_key(&order.station_id) {
            return Err(Error::ReferentialIntegrity(format!(
                "unknown station {}",
                order.station_id
            )));
        }
        if s.orders.contains_key(&order.order_id) {
            return Err(Error::Conflict(format!("order {} exists", order.order_id)));
        }
        s.orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn update_order(&self, order: &OrderRow) -> Result<()> {
        let mut s = self.state.lock().await;
        let existing = s
            .orders
            .get_mut(&order.order_id)
            .ok_or_else(|| Error::NotFound(format!("order {}", order.order_id)))?;
        *existing = order.clone();
        Ok(())
    }

    async fn get_account_order(&self, order_id: i64) -> Result<Option<AccountOrder>> {
        Ok(self.state.lock().await.account_orders.get(&order_id).cloned())
    }

    async fn upsert_account_order(&self, order: &AccountOrder) -> Result<()> {
        let mut s = self.state.lock().await;
        if !s.orders.contains_key(&order.order_id) {
            return Err(Error::ReferentialIntegrity(format!(
                "unknown order {}",
                order.order_id
            )));
        }
        s.account_orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn list_account_orders(&self, account_id: AccountId) -> Result<Vec<AccountOrder>> {
        let s = self.state.lock().await;
        let mut out: Vec<AccountOrder> = s
            .account_orders
            .values()
            .filter(|o| o.account_id == account_id)
            .cloned()
            .collect();
        out.sort_by_key(|o| o.order_id);
        Ok(out)
    }
}

#[async_trait]
impl CharacterStore for MemorySyncDb {
    async fn get_skill(
        &self,
        account_id: AccountId,
        skill_id: i64,
    ) -> Result<Option<CharacterSkill>> {
        Ok(self
            .state
            .lock()
            .await
            .skills
            .get(&(account_id, skill_id))
            .cloned())
    }

    async fn upsert_skill(&self, skill: &CharacterSkill) -> Result<()> {
        self.state
            .lock()
            .await
            .skills
            .insert((skill.account_id, skill.skill_id), skill.clone());
        Ok(())
    }

    async fn list_skills(&self, account_id: AccountId) -> Result<Vec<CharacterSkill>> {
        let s = self.state.lock().await;
        Ok(s.skills
            .values()
            .filter(|k| k.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn replace_research_jobs(
        &self,
        account_id: AccountId,
        jobs: &[ResearchJob],
    ) -> Result<()> {
        let mut s = self.state.lock().await;
        s.research.retain(|j| j.account_id != account_id);
        s.research.extend(jobs.iter().cloned());
        Ok(())
    }

    async fn list_research_jobs(&self, account_id: AccountId) -> Result<Vec<ResearchJob>> {
        let s = self.state.lock().await;
        Ok(s.research
            .iter()
            .filter(|j| j.account_id == account_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReferenceStore for MemorySyncDb {
    async fn upsert_item_type(&self, item_type: &ItemType) -> Result<()> {
        self.state
            .lock()
            .await
            .item_types
            .insert(item_type.id, item_type.clone());
        Ok(())
    }

    async fn get_item_type(&self, id: i64) -> Result<Option<ItemType>> {
        Ok(self.state.lock().await.item_types.get(&id).cloned())
    }

    async fn upsert_solar_system(&self, system: &SolarSystem) -> Result<()> {
        self.state
            .lock()
            .await
            .solar_systems
            .insert(system.id, system.clone());
        Ok(())
    }

    async fn get_solar_system(&self, id: i64) -> Result<Option<SolarSystem>> {
        Ok(self.state.lock().await.solar_systems.get(&id).cloned())
    }

    async fn get_station(&self, id: i64) -> Result<Option<Station>> {
        Ok(self.state.lock().await.stations.get(&id).cloned())
    }

    async fn insert_station(&self, station: &Station) -> Result<()> {
        let mut s = self.state.lock().await;
        if !s.solar_systems.contains_key(&station.solar_system_id) {
            return Err(Error::ReferentialIntegrity(format!(
                "unknown solar system {}",
                station.solar_system_id
            )));
        }
        if s.stations.contains_key(&station.id) {
            return Err(Error::Conflict(format!("station {} exists", station.id)));
        }
        s.stations.insert(station.id, station.clone());
        Ok(())
    }

    async fn update_station(&self, station: &Station) -> Result<()> {
        let mut s = self.state.lock().await;
        let existing = s
            .stations
            .get_mut(&station.id)
            .ok_or_else(|| Error::NotFound(format!("station {}", station.id)))?;
        *existing = station.clone();
        Ok(())
    }

    async fn get_ref_type(&self, id: i64) -> Result<Option<RefType>> {
        Ok(self.state.lock().await.ref_types.get(&id).cloned())
    }

    async fn insert_ref_type(&self, ref_type: &RefType) -> Result<()> {
        let mut s = self.state.lock().await;
        if s.ref_types.contains_key(&ref_type.id) {
            return Err(Error::Conflict(format!("ref type {} exists", ref_type.id)));
        }
        s.ref_types.insert(ref_type.id, ref_type.clone());
        Ok(())
    }

    async fn update_ref_type(&self, ref_type: &RefType) -> Result<()> {
        let mut s = self.state.lock().await;
        let existing = s
            .ref_types
            .get_mut(&ref_type.id)
            .ok_or_else(|| Error::NotFound(format!("ref type {}", ref_type.id)))?;
        *existing = ref_type.clone();
        Ok(())
    }

    async fn upsert_skill_group(&self, group: &SkillGroup) -> Result<()> {
        self.state
            .lock()
            .await
            .skill_groups
            .insert(group.id, group.clone());
        Ok(())
    }

    async fn upsert_skill_definition(&self, skill: &SkillDefinition) -> Result<()> {
        let mut s = self.state.lock().await;
        if !s.skill_groups.contains_key(&skill.group_id) {
            return Err(Error::ReferentialIntegrity(format!(
                "unknown skill group {}",
                skill.group_id
            )));
        }
        s.skill_definitions.insert(skill.type_id, skill.clone());
        Ok(())
    }

    async fn get_skill_definition(&self, type_id: i64) -> Result<Option<SkillDefinition>> {
        Ok(self
            .state
            .lock()
            .await
            .skill_definitions
            .get(&type_id)
            .cloned())
    }
}
