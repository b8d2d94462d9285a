use crate::models::{AccountId, Stream};
use crate::sync::models::LedgerRecord;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generic list query.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: 200,
            offset: 0,
        }
    }
}

/// Identity of a walked-stream record: at most one row per key once reconciled.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub account_id: AccountId,
    pub stream: Stream,
    pub remote_id: i64,
}

/// A persisted journal entry or transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRow {
    /// Local surrogate key; distinguishes duplicate rows sharing a `RecordKey`.
    pub row_id: Uuid,
    pub account_id: AccountId,
    pub stream: Stream,
    pub remote_id: i64,
    pub occurred_at: DateTime<Utc>,
    pub item_type_id: Option<i64>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl RecordRow {
    #[tracing::instrument(level = "debug", skip(record))]
    pub fn from_record<R: LedgerRecord>(
        account_id: AccountId,
        record: &R,
        now: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let payload = serde_json::to_value(record)
            .map_err(|e| Error::backend("serialize ledger record", e))?;
        Ok(Self {
            row_id: Uuid::new_v4(),
            account_id,
            stream: R::STREAM,
            remote_id: record.remote_id(),
            occurred_at: record.occurred_at(),
            item_type_id: record.item_type_id(),
            payload,
            created_at: now.unwrap_or_else(Utc::now),
        })
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            account_id: self.account_id,
            stream: self.stream,
            remote_id: self.remote_id,
        }
    }

    pub fn decode<R: DeserializeOwned>(&self) -> Result<R> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| Error::backend("deserialize ledger record", e))
    }
}

/// A market-wide order row. Shared across accounts; keyed by the remote order id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRow {
    pub order_id: i64,
    pub generated_at: DateTime<Utc>,
    pub region_id: i64,
    pub solar_system_id: i64,
    pub station_id: i64,
    pub type_id: i64,
    pub price: f64,
    pub volume_remaining: i64,
    pub volume_entered: i64,
    pub minimum_volume: i64,
    pub order_range: i64,
    pub is_bid: bool,
    pub issued_at: DateTime<Utc>,
    pub duration: i64,
    pub is_suspicious: bool,
    pub is_active: bool,
    /// Where the row came from; account-API imports use `ORDER_SOURCE_ACCOUNT_API`.
    pub source: String,
}

pub const ORDER_SOURCE_ACCOUNT_API: &str = "eveapi";

/// Ownership of a market order by an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountOrder {
    pub order_id: i64,
    pub account_id: AccountId,
    pub order_state: i64,
    pub account_key: i64,
    pub escrow: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterSkill {
    pub account_id: AccountId,
    pub skill_id: i64,
    pub skillpoints: i64,
    pub level: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchJob {
    pub account_id: AccountId,
    pub agent_id: i64,
    pub skill_id: i64,
    pub started_at: DateTime<Utc>,
    pub points_per_day: f64,
    pub remainder_points: f64,
}

/// Static item type (foreign-key target for transactions and orders).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemType {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolarSystem {
    pub id: i64,
    pub name: String,
    pub constellation_id: i64,
    pub region_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub id: i64,
    pub name: String,
    pub solar_system_id: i64,
    pub type_id: i64,
    pub constellation_id: i64,
    pub region_id: i64,
}

/// Journal reference type name mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefType {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillGroup {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub type_id: i64,
    pub group_id: i64,
    pub name: String,
    pub published: bool,
    pub description: String,
    pub rank: i64,
    pub primary_attribute: Option<String>,
    pub secondary_attribute: Option<String>,
}
