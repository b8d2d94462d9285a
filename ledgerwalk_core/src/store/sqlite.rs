//! SQLite-backed `SyncDb`.
//!
//! Single-node deployments keep all engine state in one WAL-mode database file.
//! Uniqueness and foreign-key violations surface as `Error::Conflict` and
//! `Error::ReferentialIntegrity` so callers can treat them per record.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Account, AccountId, CharacterProfile, Credential, CredentialId, Stream, Timer};
use crate::store::traits::*;
use crate::{Error, Result};

#[derive(Clone)]
pub struct SqliteSyncDb {
    pool: SqlitePool,
}

impl SqliteSyncDb {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::backend("sqlite_sync_db mkdir", e))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .map_err(|e| Error::backend("sqlite_sync_db connect options", e))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|e| Error::backend("sqlite_sync_db connect", e))?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database on a single connection (tests, dry runs).
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::backend("sqlite_sync_db connect options", e))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(|e| Error::backend("sqlite_sync_db connect", e))?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::backend("sqlite_sync_db schema", e))?;
        tracing::debug!("sqlite sync db schema ready");
        Ok(Self { pool })
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS credentials (
  id INTEGER PRIMARY KEY,
  key_id INTEGER NOT NULL,
  verification_code TEXT NOT NULL,
  is_valid INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS accounts (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  credential_id INTEGER NULL REFERENCES credentials(id),
  profile_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS timers (
  account_id INTEGER NOT NULL,
  stream TEXT NOT NULL,
  next_eligible_at TEXT NOT NULL,
  PRIMARY KEY (account_id, stream)
);
CREATE INDEX IF NOT EXISTS timers_stream_due_idx ON timers(stream, next_eligible_at);

CREATE TABLE IF NOT EXISTS item_types (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS records (
  row_id TEXT PRIMARY KEY,
  account_id INTEGER NOT NULL,
  stream TEXT NOT NULL,
  remote_id INTEGER NOT NULL,
  occurred_at TEXT NOT NULL,
  item_type_id INTEGER NULL REFERENCES item_types(id),
  payload_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS records_key_idx ON records(account_id, stream, remote_id);
CREATE INDEX IF NOT EXISTS records_occurred_idx ON records(account_id, stream, occurred_at);

CREATE TABLE IF NOT EXISTS solar_systems (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  constellation_id INTEGER NOT NULL,
  region_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS stations (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  solar_system_id INTEGER NOT NULL REFERENCES solar_systems(id),
  type_id INTEGER NOT NULL,
  constellation_id INTEGER NOT NULL,
  region_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS orders (
  order_id INTEGER PRIMARY KEY,
  generated_at TEXT NOT NULL,
  region_id INTEGER NOT NULL,
  solar_system_id INTEGER NOT NULL,
  station_id INTEGER NOT NULL REFERENCES stations(id),
  type_id INTEGER NOT NULL REFERENCES item_types(id),
  price REAL NOT NULL,
  volume_remaining INTEGER NOT NULL,
  volume_entered INTEGER NOT NULL,
  minimum_volume INTEGER NOT NULL,
  order_range INTEGER NOT NULL,
  is_bid INTEGER NOT NULL,
  issued_at TEXT NOT NULL,
  duration INTEGER NOT NULL,
  is_suspicious INTEGER NOT NULL,
  is_active INTEGER NOT NULL,
  source TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS account_orders (
  order_id INTEGER PRIMARY KEY REFERENCES orders(order_id),
  account_id INTEGER NOT NULL,
  order_state INTEGER NOT NULL,
  account_key INTEGER NOT NULL,
  escrow REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS account_orders_account_idx ON account_orders(account_id);

CREATE TABLE IF NOT EXISTS character_skills (
  account_id INTEGER NOT NULL,
  skill_id INTEGER NOT NULL,
  skillpoints INTEGER NOT NULL,
  level INTEGER NOT NULL,
  PRIMARY KEY (account_id, skill_id)
);

CREATE TABLE IF NOT EXISTS research_jobs (
  account_id INTEGER NOT NULL,
  agent_id INTEGER NOT NULL,
  skill_id INTEGER NOT NULL,
  started_at TEXT NOT NULL,
  points_per_day REAL NOT NULL,
  remainder_points REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS research_jobs_account_idx ON research_jobs(account_id);

CREATE TABLE IF NOT EXISTS ref_types (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS skill_groups (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS skill_definitions (
  type_id INTEGER PRIMARY KEY,
  group_id INTEGER NOT NULL REFERENCES skill_groups(id),
  name TEXT NOT NULL,
  published INTEGER NOT NULL,
  description TEXT NOT NULL,
  rank INTEGER NOT NULL,
  primary_attribute TEXT NULL,
  secondary_attribute TEXT NULL
);
"#;

// ── helpers ────────────────────────────────────────────────────

fn db_err(e: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return Error::Conflict(db.message().to_string());
        }
        if db.is_foreign_key_violation() {
            return Error::ReferentialIntegrity(db.message().to_string());
        }
    }
    Error::backend("sqlite_sync_db", e)
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn fmt_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::backend("parse datetime", e))
}

fn parse_stream(s: &str) -> Result<Stream> {
    s.parse::<Stream>()
        .map_err(|e| Error::backend("parse stream", e))
}

fn row_to_account(r: &SqliteRow) -> Result<Account> {
    let profile_json: String = r.get("profile_json");
    let profile: CharacterProfile = serde_json::from_str(&profile_json)
        .map_err(|e| Error::backend("deserialize profile", e))?;
    Ok(Account {
        id: AccountId(r.get("id")),
        name: r.get("name"),
        credential_id: r.get::<Option<i64>, _>("credential_id").map(CredentialId),
        profile,
    })
}

fn row_to_credential(r: &SqliteRow) -> Credential {
    Credential {
        id: CredentialId(r.get("id")),
        key_id: r.get("key_id"),
        verification_code: r.get("verification_code"),
        is_valid: r.get("is_valid"),
    }
}

fn row_to_timer(r: &SqliteRow) -> Result<Timer> {
    Ok(Timer {
        account_id: AccountId(r.get("account_id")),
        stream: parse_stream(r.get::<String, _>("stream").as_str())?,
        next_eligible_at: parse_dt(r.get::<String, _>("next_eligible_at").as_str())?,
    })
}

fn row_to_record(r: &SqliteRow) -> Result<RecordRow> {
    let row_id: String = r.get("row_id");
    let payload_json: String = r.get("payload_json");
    Ok(RecordRow {
        row_id: Uuid::parse_str(&row_id).map_err(|e| Error::backend("parse row id", e))?,
        account_id: AccountId(r.get("account_id")),
        stream: parse_stream(r.get::<String, _>("stream").as_str())?,
        remote_id: r.get("remote_id"),
        occurred_at: parse_dt(r.get::<String, _>("occurred_at").as_str())?,
        item_type_id: r.get("item_type_id"),
        payload: serde_json::from_str(&payload_json)
            .map_err(|e| Error::backend("deserialize record payload", e))?,
        created_at: parse_dt(r.get::<String, _>("created_at").as_str())?,
    })
}

fn row_to_order(r: &SqliteRow) -> Result<OrderRow> {
    Ok(OrderRow {
        order_id: r.get("order_id"),
        generated_at: parse_dt(r.get::<String, _>("generated_at").as_str())?,
        region_id: r.get("region_id"),
        solar_system_id: r.get("solar_system_id"),
        station_id: r.get("station_id"),
        type_id: r.get("type_id"),
        price: r.get("price"),
        volume_remaining: r.get("volume_remaining"),
        volume_entered: r.get("volume_entered"),
        minimum_volume: r.get("minimum_volume"),
        order_range: r.get("order_range"),
        is_bid: r.get("is_bid"),
        issued_at: parse_dt(r.get::<String, _>("issued_at").as_str())?,
        duration: r.get("duration"),
        is_suspicious: r.get("is_suspicious"),
        is_active: r.get("is_active"),
        source: r.get("source"),
    })
}

fn row_to_account_order(r: &SqliteRow) -> AccountOrder {
    AccountOrder {
        order_id: r.get("order_id"),
        account_id: AccountId(r.get("account_id")),
        order_state: r.get("order_state"),
        account_key: r.get("account_key"),
        escrow: r.get("escrow"),
    }
}

fn row_to_skill(r: &SqliteRow) -> CharacterSkill {
    CharacterSkill {
        account_id: AccountId(r.get("account_id")),
        skill_id: r.get("skill_id"),
        skillpoints: r.get("skillpoints"),
        level: r.get("level"),
    }
}

fn row_to_research(r: &SqliteRow) -> Result<ResearchJob> {
    Ok(ResearchJob {
        account_id: AccountId(r.get("account_id")),
        agent_id: r.get("agent_id"),
        skill_id: r.get("skill_id"),
        started_at: parse_dt(r.get::<String, _>("started_at").as_str())?,
        points_per_day: r.get("points_per_day"),
        remainder_points: r.get("remainder_points"),
    })
}

fn row_to_station(r: &SqliteRow) -> Station {
    Station {
        id: r.get("id"),
        name: r.get("name"),
        solar_system_id: r.get("solar_system_id"),
        type_id: r.get("type_id"),
        constellation_id: r.get("constellation_id"),
        region_id: r.get("region_id"),
    }
}

fn row_to_skill_definition(r: &SqliteRow) -> SkillDefinition {
    SkillDefinition {
        type_id: r.get("type_id"),
        group_id: r.get("group_id"),
        name: r.get("name"),
        published: r.get("published"),
        description: r.get("description"),
        rank: r.get("rank"),
        primary_attribute: r.get("primary_attribute"),
        secondary_attribute: r.get("secondary_attribute"),
    }
}

// ── store impls ────────────────────────────────────────────────

#[async_trait]
impl AccountStore for SqliteSyncDb {
    async fn upsert_account(&self, account: &Account) -> Result<()> {
        let profile_json = serde_json::to_string(&account.profile)
            .map_err(|e| Error::backend("serialize profile", e))?;
        sqlx::query(
            "INSERT INTO accounts (id, name, credential_id, profile_json) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name,
               credential_id = excluded.credential_id, profile_json = excluded.profile_json",
        )
        .bind(account.id.0)
        .bind(&account.name)
        .bind(account.credential_id.map(|c| c.0))
        .bind(profile_json)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?1")
            .bind(account_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn update_profile(
        &self,
        account_id: AccountId,
        profile: &CharacterProfile,
    ) -> Result<()> {
        let profile_json = serde_json::to_string(profile)
            .map_err(|e| Error::backend("serialize profile", e))?;
        let res = sqlx::query("UPDATE accounts SET profile_json = ?1 WHERE id = ?2")
            .bind(profile_json)
            .bind(account_id.0)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(Error::NotFound(format!("account {account_id}")));
        }
        Ok(())
    }

    async fn upsert_credential(&self, credential: &Credential) -> Result<()> {
        sqlx::query(
            "INSERT INTO credentials (id, key_id, verification_code, is_valid) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET key_id = excluded.key_id,
               verification_code = excluded.verification_code, is_valid = excluded.is_valid",
        )
        .bind(credential.id.0)
        .bind(credential.key_id)
        .bind(&credential.verification_code)
        .bind(credential.is_valid)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_credential(&self, credential_id: CredentialId) -> Result<Option<Credential>> {
        let row = sqlx::query("SELECT * FROM credentials WHERE id = ?1")
            .bind(credential_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(row_to_credential))
    }

    async fn set_credential_validity(
        &self,
        credential_id: CredentialId,
        is_valid: bool,
    ) -> Result<()> {
        let res = sqlx::query("UPDATE credentials SET is_valid = ?1 WHERE id = ?2")
            .bind(is_valid)
            .bind(credential_id.0)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(Error::NotFound(format!("credential {credential_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl TimerStore for SqliteSyncDb {
    async fn upsert_timer(&self, timer: &Timer) -> Result<()> {
        sqlx::query(
            "INSERT INTO timers (account_id, stream, next_eligible_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(account_id, stream) DO UPDATE SET next_eligible_at = excluded.next_eligible_at",
        )
        .bind(timer.account_id.0)
        .bind(timer.stream.as_str())
        .bind(fmt_dt(timer.next_eligible_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_timer(&self, account_id: AccountId, stream: Stream) -> Result<Option<Timer>> {
        let row = sqlx::query("SELECT * FROM timers WHERE account_id = ?1 AND stream = ?2")
            .bind(account_id.0)
            .bind(stream.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_timer).transpose()
    }

    async fn list_due_timers(
        &self,
        stream: Stream,
        now: DateTime<Utc>,
        query: ListQuery,
    ) -> Result<Vec<Timer>> {
        let rows = sqlx::query(
            "SELECT * FROM timers WHERE stream = ?1 AND next_eligible_at <= ?2
             ORDER BY account_id LIMIT ?3 OFFSET ?4",
        )
        .bind(stream.as_str())
        .bind(fmt_dt(now))
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_timer).collect()
    }
}

#[async_trait]
impl RecordStore for SqliteSyncDb {
    async fn insert_record(&self, row: &RecordRow) -> Result<()> {
        let payload_json = serde_json::to_string(&row.payload)
            .map_err(|e| Error::backend("serialize record payload", e))?;
        sqlx::query(
            "INSERT INTO records
               (row_id, account_id, stream, remote_id, occurred_at, item_type_id, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(row.row_id.to_string())
        .bind(row.account_id.0)
        .bind(row.stream.as_str())
        .bind(row.remote_id)
        .bind(fmt_dt(row.occurred_at))
        .bind(row.item_type_id)
        .bind(payload_json)
        .bind(fmt_dt(row.created_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_records(&self, key: &RecordKey) -> Result<Vec<RecordRow>> {
        let rows = sqlx::query(
            "SELECT * FROM records WHERE account_id = ?1 AND stream = ?2 AND remote_id = ?3
             ORDER BY created_at",
        )
        .bind(key.account_id.0)
        .bind(key.stream.as_str())
        .bind(key.remote_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_record).collect()
    }

    async fn delete_record(&self, row_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM records WHERE row_id = ?1")
            .bind(row_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn oldest_record(
        &self,
        account_id: AccountId,
        stream: Stream,
    ) -> Result<Option<RecordRow>> {
        let row = sqlx::query(
            "SELECT * FROM records WHERE account_id = ?1 AND stream = ?2
             ORDER BY occurred_at ASC, remote_id ASC LIMIT 1",
        )
        .bind(account_id.0)
        .bind(stream.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_records(
        &self,
        account_id: AccountId,
        stream: Stream,
        query: ListQuery,
    ) -> Result<Vec<RecordRow>> {
        let rows = sqlx::query(
            "SELECT * FROM records WHERE account_id = ?1 AND stream = ?2
             ORDER BY occurred_at DESC, remote_id DESC LIMIT ?3 OFFSET ?4",
        )
        .bind(account_id.0)
        .bind(stream.as_str())
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_record).collect()
    }

    async fn count_records(&self, account_id: AccountId, stream: Stream) -> Result<u64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM records WHERE account_id = ?1 AND stream = ?2")
                .bind(account_id.0)
                .bind(stream.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.get::<i64, _>("n").max(0) as u64)
    }
}

#[async_trait]
impl MarketStore for SqliteSyncDb {
    async fn get_order(&self, order_id: i64) -> Result<Option<OrderRow>> {
        let row = sqlx::query("SELECT * FROM orders WHERE order_id = ?1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn insert_order(&self, order: &OrderRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO orders
               (order_id, generated_at, region_id, solar_system_id, station_id, type_id, price,
                volume_remaining, volume_entered, minimum_volume, order_range, is_bid, issued_at,
                duration, is_suspicious, is_active, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        )
        .bind(order.order_id)
        .bind(fmt_dt(order.generated_at))
        .bind(order.region_id)
        .bind(order.solar_system_id)
        .bind(order.station_id)
        .bind(order.type_id)
        .bind(order.price)
        .bind(order.volume_remaining)
        .bind(order.volume_entered)
        .bind(order.minimum_volume)
        .bind(order.order_range)
        .bind(order.is_bid)
        .bind(fmt_dt(order.issued_at))
        .bind(order.duration)
        .bind(order.is_suspicious)
        .bind(order.is_active)
        .bind(&order.source)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_order(&self, order: &OrderRow) -> Result<()> {
        let res = sqlx::query(
            "UPDATE orders SET generated_at = ?2, price = ?3, volume_remaining = ?4,
               volume_entered = ?5, is_suspicious = ?6, is_active = ?7
             WHERE order_id = ?1",
        )
        .bind(order.order_id)
        .bind(fmt_dt(order.generated_at))
        .bind(order.price)
        .bind(order.volume_remaining)
        .bind(order.volume_entered)
        .bind(order.is_suspicious)
        .bind(order.is_active)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(Error::NotFound(format!("order {}", order.order_id)));
        }
        Ok(())
    }

    async fn get_account_order(&self, order_id: i64) -> Result<Option<AccountOrder>> {
        let row = sqlx::query("SELECT * FROM account_orders WHERE order_id = ?1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(row_to_account_order))
    }

    async fn upsert_account_order(&self, order: &AccountOrder) -> Result<()> {
        sqlx::query(
            "INSERT INTO account_orders (order_id, account_id, order_state, account_key, escrow)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(order_id) DO UPDATE SET order_state = excluded.order_state",
        )
        .bind(order.order_id)
        .bind(order.account_id.0)
        .bind(order.order_state)
        .bind(order.account_key)
        .bind(order.escrow)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_account_orders(&self, account_id: AccountId) -> Result<Vec<AccountOrder>> {
        let rows = sqlx::query("SELECT * FROM account_orders WHERE account_id = ?1 ORDER BY order_id")
            .bind(account_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_account_order).collect())
    }
}

#[async_trait]
impl CharacterStore for SqliteSyncDb {
    async fn get_skill(
        &self,
        account_id: AccountId,
        skill_id: i64,
    ) -> Result<Option<CharacterSkill>> {
        let row =
            sqlx::query("SELECT * FROM character_skills WHERE account_id = ?1 AND skill_id = ?2")
                .bind(account_id.0)
                .bind(skill_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.as_ref().map(row_to_skill))
    }

    async fn upsert_skill(&self, skill: &CharacterSkill) -> Result<()> {
        sqlx::query(
            "INSERT INTO character_skills (account_id, skill_id, skillpoints, level)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(account_id, skill_id) DO UPDATE SET
               skillpoints = excluded.skillpoints, level = excluded.level",
        )
        .bind(skill.account_id.0)
        .bind(skill.skill_id)
        .bind(skill.skillpoints)
        .bind(skill.level)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_skills(&self, account_id: AccountId) -> Result<Vec<CharacterSkill>> {
        let rows =
            sqlx::query("SELECT * FROM character_skills WHERE account_id = ?1 ORDER BY skill_id")
                .bind(account_id.0)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(rows.iter().map(row_to_skill).collect())
    }

    async fn replace_research_jobs(
        &self,
        account_id: AccountId,
        jobs: &[ResearchJob],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query("DELETE FROM research_jobs WHERE account_id = ?1")
            .bind(account_id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        for job in jobs {
            sqlx::query(
                "INSERT INTO research_jobs
                   (account_id, agent_id, skill_id, started_at, points_per_day, remainder_points)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(job.account_id.0)
            .bind(job.agent_id)
            .bind(job.skill_id)
            .bind(fmt_dt(job.started_at))
            .bind(job.points_per_day)
            .bind(job.remainder_points)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_research_jobs(&self, account_id: AccountId) -> Result<Vec<ResearchJob>> {
        let rows =
            sqlx::query("SELECT * FROM research_jobs WHERE account_id = ?1 ORDER BY agent_id")
                .bind(account_id.0)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        rows.iter().map(row_to_research).collect()
    }
}

#[async_trait]
impl ReferenceStore for SqliteSyncDb {
    async fn upsert_item_type(&self, item_type: &ItemType) -> Result<()> {
        sqlx::query(
            "INSERT INTO item_types (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(item_type.id)
        .bind(&item_type.name)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_item_type(&self, id: i64) -> Result<Option<ItemType>> {
        let row = sqlx::query("SELECT * FROM item_types WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| ItemType {
            id: r.get("id"),
            name: r.get("name"),
        }))
    }

    async fn upsert_solar_system(&self, system: &SolarSystem) -> Result<()> {
        sqlx::query(
            "INSERT INTO solar_systems (id, name, constellation_id, region_id) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name,
               constellation_id = excluded.constellation_id, region_id = excluded.region_id",
        )
        .bind(system.id)
        .bind(&system.name)
        .bind(system.constellation_id)
        .bind(system.region_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_solar_system(&self, id: i64) -> Result<Option<SolarSystem>> {
        let row = sqlx::query("SELECT * FROM solar_systems WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| SolarSystem {
            id: r.get("id"),
            name: r.get("name"),
            constellation_id: r.get("constellation_id"),
            region_id: r.get("region_id"),
        }))
    }

    async fn get_station(&self, id: i64) -> Result<Option<Station>> {
        let row = sqlx::query("SELECT * FROM stations WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(row_to_station))
    }

    async fn insert_station(&self, station: &Station) -> Result<()> {
        sqlx::query(
            "INSERT INTO stations (id, name, solar_system_id, type_id, constellation_id, region_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(station.id)
        .bind(&station.name)
        .bind(station.solar_system_id)
        .bind(station.type_id)
        .bind(station.constellation_id)
        .bind(station.region_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_station(&self, station: &Station) -> Result<()> {
        let res = sqlx::query("UPDATE stations SET name = ?2 WHERE id = ?1")
            .bind(station.id)
            .bind(&station.name)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(Error::NotFound(format!("station {}", station.id)));
        }
        Ok(())
    }

    async fn get_ref_type(&self, id: i64) -> Result<Option<RefType>> {
        let row = sqlx::query("SELECT * FROM ref_types WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| RefType {
            id: r.get("id"),
            name: r.get("name"),
        }))
    }

    async fn insert_ref_type(&self, ref_type: &RefType) -> Result<()> {
        sqlx::query("INSERT INTO ref_types (id, name) VALUES (?1, ?2)")
            .bind(ref_type.id)
            .bind(&ref_type.name)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn update_ref_type(&self, ref_type: &RefType) -> Result<()> {
        let res = sqlx::query("UPDATE ref_types SET name = ?2 WHERE id = ?1")
            .bind(ref_type.id)
            .bind(&ref_type.name)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(Error::NotFound(format!("ref type {}", ref_type.id)));
        }
        Ok(())
    }

    async fn upsert_skill_group(&self, group: &SkillGroup) -> Result<()> {
        sqlx::query(
            "INSERT INTO skill_groups (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(group.id)
        .bind(&group.name)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_skill_definition(&self, skill: &SkillDefinition) -> Result<()> {
        sqlx::query(
            "INSERT INTO skill_definitions
               (type_id, group_id, name, published, description, rank,
                primary_attribute, secondary_attribute)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(type_id) DO UPDATE SET group_id = excluded.group_id,
               name = excluded.name, published = excluded.published,
               description = excluded.description, rank = excluded.rank,
               primary_attribute = excluded.primary_attribute,
               secondary_attribute = excluded.secondary_attribute",
        )
        .bind(skill.type_id)
        .bind(skill.group_id)
        .bind(&skill.name)
        .bind(skill.published)
        .bind(&skill.description)
        .bind(skill.rank)
        .bind(&skill.primary_attribute)
        .bind(&skill.secondary_attribute)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_skill_definition(&self, type_id: i64) -> Result<Option<SkillDefinition>> {
        let row = sqlx::query("SELECT * FROM skill_definitions WHERE type_id = ?1")
            .bind(type_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(row_to_skill_definition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::models::{LedgerRecord, WalletTransaction};
    use chrono::{Duration, TimeZone};

    fn tx(journal_id: i64, type_id: i64, minute: i64) -> WalletTransaction {
        WalletTransaction {
            transaction_id: journal_id * 10,
            journal_transaction_id: journal_id,
            date: Utc.with_ymd_and_hms(2013, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minute),
            type_id,
            quantity: 1,
            price: 10.0,
            client_id: 9,
            client_name: "Client".to_string(),
            station_id: 60003760,
            is_bid: true,
            is_corporate: false,
        }
    }

    async fn seeded() -> SqliteSyncDb {
        let db = SqliteSyncDb::in_memory().await.unwrap();
        db.upsert_item_type(&ItemType {
            id: 34,
            name: "Tritanium".to_string(),
        })
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn duplicate_record_maps_to_conflict() {
        let db = seeded().await;
        let row = RecordRow::from_record(AccountId(1), &tx(100, 34, 0), None).unwrap();
        db.insert_record(&row).await.unwrap();

        let dup = RecordRow::from_record(AccountId(1), &tx(100, 34, 0), None).unwrap();
        let err = db.insert_record(&dup).await.unwrap_err();
        assert!(err.is_conflict(), "got {err:?}");
    }

    #[tokio::test]
    async fn unknown_item_type_maps_to_referential_integrity() {
        let db = seeded().await;
        let row = RecordRow::from_record(AccountId(1), &tx(100, 99999, 0), None).unwrap();
        let err = db.insert_record(&row).await.unwrap_err();
        assert!(err.is_referential_integrity(), "got {err:?}");
        assert_eq!(
            db.count_records(AccountId(1), Stream::WalletTransactions)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn records_round_trip_and_order_by_occurrence() {
        let db = seeded().await;
        for (id, minute) in [(3, 10), (1, -10), (2, 0)] {
            let row = RecordRow::from_record(AccountId(1), &tx(id, 34, minute), None).unwrap();
            db.insert_record(&row).await.unwrap();
        }
        let oldest = db
            .oldest_record(AccountId(1), Stream::WalletTransactions)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(oldest.remote_id, 1);
        let decoded: WalletTransaction = oldest.decode().unwrap();
        assert_eq!(decoded.type_id, 34);

        let key = RecordKey {
            account_id: AccountId(1),
            stream: WalletTransaction::STREAM,
            remote_id: 2,
        };
        let found = db.find_records(&key).await.unwrap();
        assert_eq!(found.len(), 1);
        db.delete_record(found[0].row_id).await.unwrap();
        assert!(db.find_records(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn timers_upsert_and_list_due() {
        let db = SqliteSyncDb::in_memory().await.unwrap();
        let now = Utc::now();
        db.upsert_timer(&Timer::new(AccountId(1), Stream::WalletJournal, now + Duration::hours(1)))
            .await
            .unwrap();
        db.upsert_timer(&Timer::new(AccountId(2), Stream::WalletJournal, now - Duration::seconds(1)))
            .await
            .unwrap();
        let due = db
            .list_due_timers(Stream::WalletJournal, now, ListQuery::default())
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].account_id, AccountId(2));

        db.upsert_timer(&Timer::new(AccountId(1), Stream::WalletJournal, now))
            .await
            .unwrap();
        let due = db
            .list_due_timers(Stream::WalletJournal, now, ListQuery::default())
            .await
            .unwrap();
        assert_eq!(due.len(), 2);
    }

    #[tokio::test]
    async fn station_insert_conflicts_on_existing_id() {
        let db = SqliteSyncDb::in_memory().await.unwrap();
        db.upsert_solar_system(&SolarSystem {
            id: 30000142,
            name: "Jita".to_string(),
            constellation_id: 20000020,
            region_id: 10000002,
        })
        .await
        .unwrap();
        let station = Station {
            id: 61000001,
            name: "Outpost".to_string(),
            solar_system_id: 30000142,
            type_id: 21644,
            constellation_id: 20000020,
            region_id: 10000002,
        };
        db.insert_station(&station).await.unwrap();
        assert!(db.insert_station(&station).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn research_jobs_are_replaced_wholesale() {
        let db = SqliteSyncDb::in_memory().await.unwrap();
        let job = |agent_id| ResearchJob {
            account_id: AccountId(1),
            agent_id,
            skill_id: 11433,
            started_at: Utc.with_ymd_and_hms(2013, 1, 1, 0, 0, 0).unwrap(),
            points_per_day: 50.5,
            remainder_points: 0.25,
        };
        db.replace_research_jobs(AccountId(1), &[job(1), job(2)])
            .await
            .unwrap();
        db.replace_research_jobs(AccountId(1), &[job(3)])
            .await
            .unwrap();
        let jobs = db.list_research_jobs(AccountId(1)).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].agent_id, 3);
    }
}
