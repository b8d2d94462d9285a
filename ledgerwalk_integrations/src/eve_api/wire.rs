//! JSON wire shapes of the account API and their conversion into core models.
//!
//! Timestamps are `YYYY-MM-DD HH:MM:SS` in UTC. Numeric fields the service
//! leaves blank arrive as `""`.

use chrono::{DateTime, NaiveDateTime, Utc};
use ledgerwalk_core::error::GatewayError;
use ledgerwalk_core::models::Bonus;
use ledgerwalk_core::sync::models::{
    Alliance, AttributeEnhancers, CharacterSheet, ConquerableStation, JournalEntry, Page,
    RemoteMarketOrder, RemoteRefType, RemoteSkill, RemoteSkillGroup, ResearchAgent, SkillLevel,
    WalletTransaction,
};
use serde::{Deserialize, Deserializer};

use super::errors;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) mod api_time {
    use super::*;

    pub fn parse(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        NaiveDateTime::parse_from_str(s.trim(), TIME_FORMAT).map(|dt| dt.and_utc())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(d)?;
        parse(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Blankable<T> {
    Value(T),
    Text(String),
}

/// `""`, `null` or a missing field become `None`.
fn blank_as_none<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + std::str::FromStr,
{
    match Option::<Blankable<T>>::deserialize(d)? {
        None => Ok(None),
        Some(Blankable::Value(v)) => Ok(Some(v)),
        Some(Blankable::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Blankable::Text(s)) => s
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("unexpected value {s:?}"))),
    }
}

fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Flag::deserialize(d)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Every response: either a `result` or an `error`, plus the cache hint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Envelope<T> {
    pub result: Option<T>,
    pub error: Option<ErrorBody>,
    pub cached_until: String,
}

impl<T> Envelope<T> {
    /// Resolve into the payload and the instant it stays cached until.
    pub fn into_result(self) -> Result<(T, DateTime<Utc>), GatewayError> {
        if let Some(err) = self.error {
            return Err(errors::classify(err.code, &err.message));
        }
        let cached_until = api_time::parse(&self.cached_until)
            .map_err(|e| GatewayError::transient(format!("invalid cachedUntil: {e}")))?;
        let result = self
            .result
            .ok_or_else(|| GatewayError::transient("response carried neither result nor error"))?;
        Ok((result, cached_until))
    }
}

/// Decode a raw body into a page.
pub(crate) fn decode_page<W, T, F>(body: &[u8], convert: F) -> Result<Page<T>, GatewayError>
where
    W: for<'de> Deserialize<'de>,
    F: FnOnce(W) -> Vec<T>,
{
    let envelope: Envelope<W> = serde_json::from_slice(body)
        .map_err(|e| GatewayError::transient(format!("malformed response body: {e}")))?;
    let (result, cached_until) = envelope.into_result()?;
    Ok(Page::new(convert(result), cached_until))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KeyInfoResult {
    pub key: KeyInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KeyInfo {
    #[serde(default)]
    pub characters: Vec<KeyCharacter>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct KeyCharacter {
    #[serde(rename = "characterID")]
    pub character_id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JournalResult {
    #[serde(default)]
    pub transactions: Vec<WireJournalEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireJournalEntry {
    #[serde(rename = "refID")]
    ref_id: i64,
    #[serde(deserialize_with = "api_time::deserialize")]
    date: DateTime<Utc>,
    #[serde(rename = "refTypeID")]
    ref_type_id: i64,
    #[serde(rename = "ownerName1", default)]
    owner_name_1: String,
    #[serde(rename = "ownerID1")]
    owner_id_1: i64,
    #[serde(rename = "ownerName2", default)]
    owner_name_2: String,
    #[serde(rename = "ownerID2")]
    owner_id_2: i64,
    #[serde(rename = "argName1", default)]
    arg_name_1: String,
    #[serde(rename = "argID1")]
    arg_id_1: i64,
    amount: f64,
    balance: f64,
    #[serde(default)]
    reason: String,
    #[serde(rename = "taxReceiverID", default, deserialize_with = "blank_as_none")]
    tax_receiver_id: Option<i64>,
    #[serde(rename = "taxAmount", default, deserialize_with = "blank_as_none")]
    tax_amount: Option<f64>,
}

impl From<WireJournalEntry> for JournalEntry {
    fn from(w: WireJournalEntry) -> Self {
        JournalEntry {
            ref_id: w.ref_id,
            date: w.date,
            ref_type_id: w.ref_type_id,
            amount: w.amount,
            balance: w.balance,
            owner_name_1: w.owner_name_1,
            owner_id_1: w.owner_id_1,
            owner_name_2: w.owner_name_2,
            owner_id_2: w.owner_id_2,
            arg_name_1: w.arg_name_1,
            arg_id_1: w.arg_id_1,
            reason: w.reason,
            tax_receiver_id: w.tax_receiver_id,
            tax_amount: w.tax_amount,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TransactionsResult {
    #[serde(default)]
    pub transactions: Vec<WireTransaction>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireTransaction {
    #[serde(rename = "transactionID")]
    transaction_id: i64,
    #[serde(rename = "journalTransactionID")]
    journal_transaction_id: i64,
    #[serde(rename = "transactionDateTime", deserialize_with = "api_time::deserialize")]
    date: DateTime<Utc>,
    #[serde(rename = "typeID")]
    type_id: i64,
    quantity: i64,
    price: f64,
    #[serde(rename = "clientID")]
    client_id: i64,
    #[serde(rename = "clientName", default)]
    client_name: String,
    #[serde(rename = "stationID")]
    station_id: i64,
    /// `buy` or `sell`.
    #[serde(rename = "transactionType")]
    transaction_type: String,
    /// `personal` or `corporation`.
    #[serde(rename = "transactionFor")]
    transaction_for: String,
}

impl From<WireTransaction> for WalletTransaction {
    fn from(w: WireTransaction) -> Self {
        WalletTransaction {
            transaction_id: w.transaction_id,
            journal_transaction_id: w.journal_transaction_id,
            date: w.date,
            type_id: w.type_id,
            quantity: w.quantity,
            price: w.price,
            client_id: w.client_id,
            client_name: w.client_name,
            station_id: w.station_id,
            is_bid: w.transaction_type.eq_ignore_ascii_case("buy"),
            is_corporate: w.transaction_for.eq_ignore_ascii_case("corporation"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrdersResult {
    #[serde(default)]
    pub orders: Vec<WireOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireOrder {
    #[serde(rename = "orderID")]
    order_id: i64,
    #[serde(rename = "stationID")]
    station_id: i64,
    #[serde(rename = "typeID")]
    type_id: i64,
    vol_entered: i64,
    vol_remaining: i64,
    min_volume: i64,
    order_state: i64,
    range: i64,
    account_key: i64,
    duration: i64,
    escrow: f64,
    price: f64,
    #[serde(deserialize_with = "flag")]
    bid: bool,
    #[serde(deserialize_with = "api_time::deserialize")]
    issued: DateTime<Utc>,
}

impl From<WireOrder> for RemoteMarketOrder {
    fn from(w: WireOrder) -> Self {
        RemoteMarketOrder {
            order_id: w.order_id,
            station_id: w.station_id,
            type_id: w.type_id,
            volume_entered: w.vol_entered,
            volume_remaining: w.vol_remaining,
            min_volume: w.min_volume,
            order_state: w.order_state,
            range: w.range,
            account_key: w.account_key,
            duration: w.duration,
            escrow: w.escrow,
            price: w.price,
            is_bid: w.bid,
            issued: w.issued,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireBonus {
    #[serde(rename = "augmentatorName")]
    name: String,
    #[serde(rename = "augmentatorValue")]
    value: i64,
}

impl From<WireBonus> for Bonus {
    fn from(w: WireBonus) -> Self {
        Bonus {
            name: w.name,
            value: w.value,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireEnhancers {
    memory_bonus: Option<WireBonus>,
    intelligence_bonus: Option<WireBonus>,
    perception_bonus: Option<WireBonus>,
    willpower_bonus: Option<WireBonus>,
    charisma_bonus: Option<WireBonus>,
}

impl From<WireEnhancers> for AttributeEnhancers {
    fn from(w: WireEnhancers) -> Self {
        AttributeEnhancers {
            memory: w.memory_bonus.map(Bonus::from),
            intelligence: w.intelligence_bonus.map(Bonus::from),
            perception: w.perception_bonus.map(Bonus::from),
            willpower: w.willpower_bonus.map(Bonus::from),
            charisma: w.charisma_bonus.map(Bonus::from),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireSkillLevel {
    #[serde(rename = "typeID")]
    type_id: i64,
    skillpoints: i64,
    #[serde(default)]
    level: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireCharacterSheet {
    #[serde(rename = "corporationID")]
    corporation_id: i64,
    corporation_name: String,
    #[serde(rename = "allianceID", default, deserialize_with = "blank_as_none")]
    alliance_id: Option<i64>,
    #[serde(default)]
    alliance_name: Option<String>,
    clone_name: String,
    clone_skill_points: i64,
    balance: f64,
    #[serde(default)]
    attribute_enhancers: WireEnhancers,
    #[serde(default)]
    skills: Vec<WireSkillLevel>,
}

impl From<WireCharacterSheet> for CharacterSheet {
    fn from(w: WireCharacterSheet) -> Self {
        let alliance = match w.alliance_id {
            Some(id) if id != 0 => Some(Alliance {
                id,
                name: w.alliance_name.unwrap_or_default(),
            }),
            _ => None,
        };
        CharacterSheet {
            corporation_id: w.corporation_id,
            corporation_name: w.corporation_name,
            alliance,
            clone_name: w.clone_name,
            clone_skill_points: w.clone_skill_points,
            balance: w.balance,
            attribute_enhancers: w.attribute_enhancers.into(),
            skills: w
                .skills
                .into_iter()
                .map(|s| SkillLevel {
                    type_id: s.type_id,
                    skillpoints: s.skillpoints,
                    level: s.level,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResearchResult {
    #[serde(default)]
    pub research: Vec<WireResearch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireResearch {
    #[serde(rename = "agentID")]
    agent_id: i64,
    #[serde(rename = "skillTypeID")]
    skill_type_id: i64,
    #[serde(deserialize_with = "api_time::deserialize")]
    research_start_date: DateTime<Utc>,
    points_per_day: f64,
    remainder_points: f64,
}

impl From<WireResearch> for ResearchAgent {
    fn from(w: WireResearch) -> Self {
        ResearchAgent {
            agent_id: w.agent_id,
            skill_type_id: w.skill_type_id,
            started_at: w.research_start_date,
            points_per_day: w.points_per_day,
            remainder_points: w.remainder_points,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct OutpostsResult {
    #[serde(default)]
    pub outposts: Vec<WireOutpost>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireOutpost {
    #[serde(rename = "stationID")]
    station_id: i64,
    station_name: String,
    #[serde(rename = "stationTypeID")]
    station_type_id: i64,
    #[serde(rename = "solarSystemID")]
    solar_system_id: i64,
}

impl From<WireOutpost> for ConquerableStation {
    fn from(w: WireOutpost) -> Self {
        ConquerableStation {
            station_id: w.station_id,
            station_name: w.station_name,
            station_type_id: w.station_type_id,
            solar_system_id: w.solar_system_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefTypesResult {
    #[serde(default)]
    pub ref_types: Vec<WireRefType>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireRefType {
    #[serde(rename = "refTypeID")]
    ref_type_id: i64,
    #[serde(rename = "refTypeName")]
    ref_type_name: String,
}

impl From<WireRefType> for RemoteRefType {
    fn from(w: WireRefType) -> Self {
        RemoteRefType {
            ref_type_id: w.ref_type_id,
            ref_type_name: w.ref_type_name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SkillTreeResult {
    #[serde(default)]
    pub skill_groups: Vec<WireSkillGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireSkillGroup {
    #[serde(rename = "groupID")]
    group_id: i64,
    group_name: String,
    #[serde(default)]
    skills: Vec<WireSkill>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireRequiredAttributes {
    #[serde(default)]
    primary_attribute: Option<String>,
    #[serde(default)]
    secondary_attribute: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireSkill {
    #[serde(rename = "typeID")]
    type_id: i64,
    type_name: String,
    #[serde(deserialize_with = "flag")]
    published: bool,
    #[serde(default)]
    description: String,
    rank: i64,
    #[serde(default)]
    required_attributes: WireRequiredAttributes,
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

impl From<WireSkillGroup> for RemoteSkillGroup {
    fn from(w: WireSkillGroup) -> Self {
        RemoteSkillGroup {
            group_id: w.group_id,
            name: w.group_name,
            skills: w
                .skills
                .into_iter()
                .map(|s| RemoteSkill {
                    type_id: s.type_id,
                    name: s.type_name,
                    published: s.published,
                    description: s.description,
                    rank: s.rank,
                    primary_attribute: non_blank(s.required_attributes.primary_attribute),
                    secondary_attribute: non_blank(s.required_attributes.secondary_attribute),
                })
                .collect(),
        }
    }
}
