use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdParseError {
    #[error("invalid numeric id: {0}")]
    InvalidId(String),
    #[error("unknown stream: {0}")]
    UnknownStream(String),
}

/// Remote character identifier; one account per character.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for AccountId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl FromStr for AccountId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .trim()
            .parse::<i64>()
            .map_err(|_| IdParseError::InvalidId(s.to_string()))?;
        Ok(Self(id))
    }
}

/// Local credential identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(pub i64);

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for CredentialId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// One independently synchronized category of per-account remote data.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stream {
    WalletJournal,
    WalletTransactions,
    MarketOrders,
    CharacterSheet,
    Research,
}

/// How a stream is fetched.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamKind {
    /// Backward pagination, stopping at the first already-known record.
    Walking,
    /// A single fetch that replaces or upserts the account's current state.
    Snapshot,
}

impl Stream {
    pub const ALL: [Stream; 5] = [
        Stream::WalletJournal,
        Stream::WalletTransactions,
        Stream::MarketOrders,
        Stream::CharacterSheet,
        Stream::Research,
    ];

    /// Remote sheet name, also used as the durable timer key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::WalletJournal => "WalletJournal",
            Stream::WalletTransactions => "WalletTransactions",
            Stream::MarketOrders => "MarketOrders",
            Stream::CharacterSheet => "CharacterSheet",
            Stream::Research => "Research",
        }
    }

    pub fn kind(&self) -> StreamKind {
        match self {
            Stream::WalletJournal | Stream::WalletTransactions => StreamKind::Walking,
            Stream::MarketOrders | Stream::CharacterSheet | Stream::Research => {
                StreamKind::Snapshot
            }
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stream {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Stream::ALL
            .into_iter()
            .find(|stream| {
                stream.as_str().eq_ignore_ascii_case(needle)
                    || snake_case(stream.as_str()) == needle.to_ascii_lowercase()
            })
            .ok_or_else(|| IdParseError::UnknownStream(s.to_string()))
    }
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Opaque remote access pair plus the validity flag.
///
/// The engine only reads `is_valid`; flipping it is the job of the
/// credential invalidation handler.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub key_id: i64,
    pub verification_code: String,
    pub is_valid: bool,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("key_id", &self.key_id)
            .field("verification_code", &"***")
            .field("is_valid", &self.is_valid)
            .finish()
    }
}

/// An implant bonus on one attribute. Absent implants read as `Bonus::default()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bonus {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImplantBonuses {
    pub memory: Bonus,
    pub intelligence: Bonus,
    pub perception: Bonus,
    pub willpower: Bonus,
    pub charisma: Bonus,
}

/// Character sheet fields mirrored onto the account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub corporation_id: i64,
    pub corporation_name: String,
    pub alliance_id: i64,
    pub alliance_name: String,
    pub clone_name: String,
    pub clone_skill_points: i64,
    pub balance: f64,
    pub implants: ImplantBonuses,
}

/// A remote character tracked by this engine. Created externally, never deleted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub credential_id: Option<CredentialId>,
    #[serde(default)]
    pub profile: CharacterProfile,
}

impl Account {
    pub fn new(id: AccountId, name: impl Into<String>, credential_id: Option<CredentialId>) -> Self {
        Self {
            id,
            name: name.into(),
            credential_id,
            profile: CharacterProfile::default(),
        }
    }
}

/// `(account, stream) -> nextEligibleRunTime`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub account_id: AccountId,
    pub stream: Stream,
    pub next_eligible_at: DateTime<Utc>,
}

impl Timer {
    pub fn new(account_id: AccountId, stream: Stream, next_eligible_at: DateTime<Utc>) -> Self {
        Self {
            account_id,
            stream,
            next_eligible_at,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_eligible_at
    }
}
