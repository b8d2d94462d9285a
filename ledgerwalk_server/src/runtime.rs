//! Wiring of store, gateway, walker, dispatcher and scheduler.

use chrono::{DateTime, Utc};
use ledgerwalk_core::config::EngineConfig;
use ledgerwalk_core::models::{Account, AccountId, Credential, CredentialId, Stream, Timer};
use ledgerwalk_core::store::{SqliteSyncDb, SyncDb};
use ledgerwalk_core::sync::{
    InvalidateRejectedCredentials, ReferenceRefresher, Scheduler, TokioDispatcher, Walker,
};
use ledgerwalk_integrations::eve_api::{GatewayConfig, HttpApiGateway};
use std::path::Path;
use std::sync::Arc;

pub const DB_FILE: &str = "ledgerwalk.db";

pub struct Runtime {
    pub db: Arc<dyn SyncDb>,
    pub dispatcher: Arc<TokioDispatcher>,
    pub scheduler: Arc<Scheduler>,
}

#[tracing::instrument(level = "info", skip(engine, gateway))]
pub async fn build_runtime(
    data_dir: &Path,
    engine: EngineConfig,
    gateway: GatewayConfig,
) -> anyhow::Result<Runtime> {
    tokio::fs::create_dir_all(data_dir).await?;
    let db: Arc<dyn SyncDb> = Arc::new(SqliteSyncDb::new(data_dir.join(DB_FILE)).await?);
    let api = Arc::new(HttpApiGateway::new(gateway)?);

    let walker = Arc::new(Walker::new(
        db.clone(),
        api.clone(),
        Arc::new(InvalidateRejectedCredentials::new(db.clone())),
        engine.page_size,
    ));
    let dispatcher = Arc::new(TokioDispatcher::new(walker, engine.max_concurrent_walkers));
    let refresher = Arc::new(ReferenceRefresher::new(db.clone(), api));
    let scheduler = Arc::new(
        Scheduler::new(db.clone(), dispatcher.clone(), engine).with_reference_refresher(refresher),
    );

    Ok(Runtime {
        db,
        dispatcher,
        scheduler,
    })
}

/// Store the account and its credential, and make every stream without a
/// timer due at `now`.
///
/// Re-registering an existing account swaps its credential and keeps the
/// profile and the timers already set.
#[tracing::instrument(level = "info", skip(db, verification_code))]
pub async fn register_account(
    db: &dyn SyncDb,
    account_id: AccountId,
    name: &str,
    key_id: i64,
    verification_code: &str,
    now: DateTime<Utc>,
) -> ledgerwalk_core::Result<()> {
    let credential = Credential {
        id: CredentialId(key_id),
        key_id,
        verification_code: verification_code.to_string(),
        is_valid: true,
    };
    db.upsert_credential(&credential).await?;

    let account = match db.get_account(account_id).await? {
        Some(mut existing) => {
            existing.name = name.to_string();
            existing.credential_id = Some(credential.id);
            existing
        }
        None => Account::new(account_id, name, Some(credential.id)),
    };
    db.upsert_account(&account).await?;

    for stream in Stream::ALL {
        if db.get_timer(account_id, stream).await?.is_none() {
            db.upsert_timer(&Timer::new(account_id, stream, now)).await?;
        }
    }
    tracing::info!(%account_id, key_id, "account registered");
    Ok(())
}

fn redact(s: &str) -> String {
    let len = s.chars().count();
    if len <= 8 {
        return "***".to_string();
    }
    let head: String = s.chars().take(4).collect();
    let tail: String = s.chars().skip(len - 4).collect();
    format!("{head}***{tail}")
}

/// Effective configuration as JSON, with anything credential-like redacted.
pub fn describe_config(
    data_dir: Option<&Path>,
    engine: &EngineConfig,
    gateway: &GatewayConfig,
) -> serde_json::Value {
    let intervals: serde_json::Map<String, serde_json::Value> = Stream::ALL
        .into_iter()
        .map(|s| (s.to_string(), serde_json::json!(engine.streams.get(s).as_secs())))
        .collect();
    serde_json::json!({
        "data_dir": data_dir.map(|p| p.display().to_string()),
        "engine": {
            "page_size": engine.page_size,
            "dispatch_validity_secs": engine.dispatch_validity.as_secs(),
            "max_concurrent_walkers": engine.max_concurrent_walkers,
            "stream_interval_secs": intervals,
            "reference": {
                "enabled": engine.reference.enabled,
                "conquerable_stations_secs": engine.reference.conquerable_stations.as_secs(),
                "ref_types_cron": engine.reference.ref_types_cron,
                "skill_tree_secs": engine.reference.skill_tree.as_secs(),
            },
        },
        "gateway": {
            "base_url": gateway.base_url,
            "user_agent": gateway.user_agent,
            "timeout_secs": gateway.timeout.as_secs(),
        },
        "LEDGERWALK_VERIFICATION_CODE": std::env::var("LEDGERWALK_VERIFICATION_CODE")
            .ok()
            .map(|v| redact(&v)),
    })
}
