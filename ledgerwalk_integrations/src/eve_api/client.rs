//! reqwest-backed gateway for the account API.

use async_trait::async_trait;
use ledgerwalk_core::error::{AuthFailure, AuthFailureKind, GatewayError, GatewayResult};
use ledgerwalk_core::models::{AccountId, Credential};
use ledgerwalk_core::sync::models::{
    CharacterSheet, ConquerableStation, Cursor, JournalEntry, Page, RemoteMarketOrder,
    RemoteRefType, RemoteSkillGroup, ResearchAgent, WalletTransaction,
};
use ledgerwalk_core::sync::traits::{ApiGateway, ApiSession, ReferenceApi};
use ledgerwalk_core::{Error, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::instrument;

use super::errors;
use super::wire::{
    self, JournalResult, KeyInfoResult, OrdersResult, OutpostsResult, RefTypesResult,
    ResearchResult, SkillTreeResult, TransactionsResult, WireCharacterSheet,
};

pub const DEFAULT_BASE_URL: &str = "https://api.eveonline.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: concat!("ledgerwalk/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("LEDGERWALK_API_BASE_URL") {
            if !v.trim().is_empty() {
                cfg.base_url = v.trim().trim_end_matches('/').to_string();
            }
        }
        if let Ok(v) = std::env::var("LEDGERWALK_API_USER_AGENT") {
            if !v.trim().is_empty() {
                cfg.user_agent = v;
            }
        }
        if let Ok(v) = std::env::var("LEDGERWALK_API_TIMEOUT_SECS") {
            let secs = v.trim().parse::<u64>().map_err(|_| {
                Error::InvalidInput(format!("invalid LEDGERWALK_API_TIMEOUT_SECS: {v}"))
            })?;
            cfg.timeout = Duration::from_secs(secs);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::InvalidInput(format!(
                "base_url must be an http(s) URL: {}",
                self.base_url
            )));
        }
        if self.user_agent.trim().is_empty() {
            return Err(Error::InvalidInput("user_agent must be set".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidInput("timeout must be > 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct HttpApiGateway {
    client: Client,
    base_url: String,
}

impl HttpApiGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| Error::backend("build http client", e))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}.json", self.base_url)
    }

    #[instrument(level = "debug", skip(self, query))]
    async fn get(&self, path: &str, query: &[(&str, String)]) -> GatewayResult<Vec<u8>> {
        let resp = self
            .client
            .get(self.endpoint(path))
            .query(query)
            .send()
            .await
            .map_err(errors::transport)?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(errors::transport)?;

        // Error elements come back with 4xx statuses too; prefer them over the status.
        if !status.is_success() {
            let classified = serde_json::from_slice::<wire::Envelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|env| env.error)
                .map(|err| errors::classify(err.code, &err.message));
            return Err(classified.unwrap_or_else(|| errors::classify_status(status)));
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl ApiGateway for HttpApiGateway {
    #[instrument(level = "debug", skip(self, credential), fields(key_id = credential.key_id))]
    async fn authenticate(
        &self,
        account_id: AccountId,
        credential: &Credential,
    ) -> GatewayResult<Box<dyn ApiSession>> {
        let auth = vec![
            ("keyID", credential.key_id.to_string()),
            ("vCode", credential.verification_code.clone()),
        ];
        let body = self.get("account/APIKeyInfo", &auth).await?;
        let info = wire::decode_page(&body, |r: KeyInfoResult| r.key.characters)?;
        if !info.records.iter().any(|c| c.character_id == account_id.0) {
            return Err(GatewayError::Authentication(AuthFailure::new(
                AuthFailureKind::AccessDenied,
                None,
                format!("character {account_id} is not on key {}", credential.key_id),
            )));
        }

        let mut query = auth;
        query.push(("characterID", account_id.0.to_string()));
        Ok(Box::new(HttpSession {
            gateway: self.clone(),
            query,
        }))
    }
}

#[async_trait]
impl ReferenceApi for HttpApiGateway {
    #[instrument(level = "debug", skip(self))]
    async fn conquerable_stations(&self) -> GatewayResult<Page<ConquerableStation>> {
        let body = self.get("eve/ConquerableStationList", &[]).await?;
        wire::decode_page(&body, |r: OutpostsResult| {
            r.outposts.into_iter().map(ConquerableStation::from).collect()
        })
    }

    #[instrument(level = "debug", skip(self))]
    async fn ref_types(&self) -> GatewayResult<Page<RemoteRefType>> {
        let body = self.get("eve/RefTypes", &[]).await?;
        wire::decode_page(&body, |r: RefTypesResult| {
            r.ref_types.into_iter().map(RemoteRefType::from).collect()
        })
    }

    #[instrument(level = "debug", skip(self))]
    async fn skill_tree(&self) -> GatewayResult<Page<RemoteSkillGroup>> {
        let body = self.get("eve/SkillTree", &[]).await?;
        wire::decode_page(&body, |r: SkillTreeResult| {
            r.skill_groups.into_iter().map(RemoteSkillGroup::from).collect()
        })
    }
}

/// Per-character session: the credential pair and character id ride along on
/// every request.
struct HttpSession {
    gateway: HttpApiGateway,
    query: Vec<(&'static str, String)>,
}

impl HttpSession {
    fn paged_query(&self, row_count: u32, cursor: Option<Cursor>) -> Vec<(&'static str, String)> {
        let mut query = self.query.clone();
        query.push(("rowCount", row_count.to_string()));
        if let Some(cursor) = cursor {
            query.push(("fromID", cursor.from_id.to_string()));
        }
        query
    }
}

#[async_trait]
impl ApiSession for HttpSession {
    async fn wallet_journal(
        &self,
        row_count: u32,
        cursor: Option<Cursor>,
    ) -> GatewayResult<Page<JournalEntry>> {
        let query = self.paged_query(row_count, cursor);
        let body = self.gateway.get("char/WalletJournal", &query).await?;
        wire::decode_page(&body, |r: JournalResult| {
            r.transactions.into_iter().map(JournalEntry::from).collect()
        })
    }

    async fn wallet_transactions(
        &self,
        row_count: u32,
        cursor: Option<Cursor>,
    ) -> GatewayResult<Page<WalletTransaction>> {
        let query = self.paged_query(row_count, cursor);
        let body = self.gateway.get("char/WalletTransactions", &query).await?;
        wire::decode_page(&body, |r: TransactionsResult| {
            r.transactions
                .into_iter()
                .map(WalletTransaction::from)
                .collect()
        })
    }

    async fn market_orders(&self) -> GatewayResult<Page<RemoteMarketOrder>> {
        let body = self.gateway.get("char/MarketOrders", &self.query).await?;
        wire::decode_page(&body, |r: OrdersResult| {
            r.orders.into_iter().map(RemoteMarketOrder::from).collect()
        })
    }

    async fn character_sheet(&self) -> GatewayResult<Page<CharacterSheet>> {
        let body = self.gateway.get("char/CharacterSheet", &self.query).await?;
        wire::decode_page(&body, |r: WireCharacterSheet| vec![CharacterSheet::from(r)])
    }

    async fn research(&self) -> GatewayResult<Page<ResearchAgent>> {
        let body = self.gateway.get("char/Research", &self.query).await?;
        wire::decode_page(&body, |r: ResearchResult| {
            r.research.into_iter().map(ResearchAgent::from).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = GatewayConfig::default();
        cfg.validate().unwrap();
        assert!(cfg.user_agent.starts_with("ledgerwalk/"));
    }

    #[test]
    fn validate_rejects_non_http_base_and_zero_timeout() {
        let cfg = GatewayConfig {
            base_url: "ftp://api.example".to_string(),
            ..GatewayConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidInput(_))));

        let cfg = GatewayConfig {
            timeout: Duration::ZERO,
            ..GatewayConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn endpoints_hang_off_the_base_url() {
        let gateway = HttpApiGateway::new(GatewayConfig {
            base_url: "https://api.example.test/".to_string(),
            ..GatewayConfig::default()
        })
        .unwrap();
        assert_eq!(
            gateway.endpoint("char/WalletJournal"),
            "https://api.example.test/char/WalletJournal.json"
        );
    }

    #[test]
    fn paged_query_adds_cursor_only_when_walking_back() {
        let gateway = HttpApiGateway::new(GatewayConfig::default()).unwrap();
        let session = HttpSession {
            gateway,
            query: vec![
                ("keyID", "1234".to_string()),
                ("vCode", "abc".to_string()),
                ("characterID", "90000001".to_string()),
            ],
        };

        let first = session.paged_query(2560, None);
        assert!(first.iter().all(|(k, _)| *k != "fromID"));
        assert!(first.contains(&("rowCount", "2560".to_string())));

        let next = session.paged_query(2560, Some(Cursor::new(7301)));
        assert!(next.contains(&("fromID", "7301".to_string())));
    }
}
