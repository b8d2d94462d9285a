//! Reconcilers for single-fetch streams: market orders, character sheet and
//! research agents. Each replaces or upserts the account's current state.

use crate::models::{AccountId, CharacterProfile};
use crate::store::{
    AccountOrder, CharacterSkill, ORDER_SOURCE_ACCOUNT_API, OrderRow, ResearchJob, SyncDb,
};
use crate::sync::models::{
    CharacterSheet, ReconcileOutcome, RemoteMarketOrder, ResearchAgent, StopReason, Walking,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct SnapshotReconciler {
    db: Arc<dyn SyncDb>,
}

impl SnapshotReconciler {
    pub fn new(db: Arc<dyn SyncDb>) -> Self {
        Self { db }
    }

    /// Refresh market-wide order rows and the account's ownership rows.
    #[tracing::instrument(level = "debug", skip(self, orders), fields(count = orders.len()))]
    pub async fn reconcile_orders(
        &self,
        account_id: AccountId,
        orders: &[RemoteMarketOrder],
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::new(Walking::Stop(StopReason::SnapshotComplete));
        for order in orders {
            match self.db.get_order(order.order_id).await? {
                Some(mut row) => {
                    row.price = order.price;
                    row.volume_remaining = order.volume_remaining;
                    row.volume_entered = order.volume_entered;
                    row.is_suspicious = false;
                    row.is_active = order.order_state == 0;
                    row.generated_at = now;
                    self.db.update_order(&row).await?;
                    outcome.updated += 1;
                }
                None => {
                    let Some(station) = self.db.get_station(order.station_id).await? else {
                        tracing::warn!(
                            %account_id,
                            order_id = order.order_id,
                            station_id = order.station_id,
                            "order placed at unknown station; skipping"
                        );
                        outcome.skipped += 1;
                        continue;
                    };
                    let row = OrderRow {
                        order_id: order.order_id,
                        generated_at: now,
                        region_id: station.region_id,
                        solar_system_id: station.solar_system_id,
                        station_id: order.station_id,
                        type_id: order.type_id,
                        price: order.price,
                        volume_remaining: order.volume_remaining,
                        volume_entered: order.volume_entered,
                        minimum_volume: order.min_volume,
                        order_range: order.range,
                        is_bid: order.is_bid,
                        issued_at: order.issued,
                        duration: order.duration,
                        is_suspicious: false,
                        is_active: order.order_state == 0,
                        source: ORDER_SOURCE_ACCOUNT_API.to_string(),
                    };
                    match self.db.insert_order(&row).await {
                        Ok(()) => outcome.inserted += 1,
                        Err(Error::ReferentialIntegrity(msg)) => {
                            tracing::warn!(
                                %account_id,
                                order_id = order.order_id,
                                type_id = order.type_id,
                                error = %msg,
                                "order references unknown reference data; skipping"
                            );
                            outcome.skipped += 1;
                            continue;
                        }
                        Err(Error::Conflict(_)) => {
                            tracing::debug!(
                                order_id = order.order_id,
                                "order inserted concurrently; keeping existing row"
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            let ownership = match self.db.get_account_order(order.order_id).await? {
                Some(mut existing) => {
                    existing.order_state = order.order_state;
                    existing
                }
                None => AccountOrder {
                    order_id: order.order_id,
                    account_id,
                    order_state: order.order_state,
                    account_key: order.account_key,
                    escrow: order.escrow,
                },
            };
            self.db.upsert_account_order(&ownership).await?;
        }
        Ok(outcome)
    }

    /// Mirror the sheet onto the account profile and upsert trained skills.
    #[tracing::instrument(level = "debug", skip(self, sheet))]
    pub async fn reconcile_sheet(
        &self,
        account_id: AccountId,
        sheet: CharacterSheet,
    ) -> Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::new(Walking::Stop(StopReason::SnapshotComplete));

        let (alliance_id, alliance_name) = sheet
            .alliance
            .map(|a| (a.id, a.name))
            .unwrap_or_else(|| (0, String::new()));
        let profile = CharacterProfile {
            corporation_id: sheet.corporation_id,
            corporation_name: sheet.corporation_name,
            alliance_id,
            alliance_name,
            clone_name: sheet.clone_name,
            clone_skill_points: sheet.clone_skill_points,
            balance: sheet.balance,
            implants: sheet.attribute_enhancers.into_bonuses(),
        };
        self.db.update_profile(account_id, &profile).await?;
        outcome.updated += 1;

        for skill in sheet.skills {
            let known = self.db.get_skill(account_id, skill.type_id).await?.is_some();
            self.db
                .upsert_skill(&CharacterSkill {
                    account_id,
                    skill_id: skill.type_id,
                    skillpoints: skill.skillpoints,
                    level: skill.level,
                })
                .await?;
            if known {
                outcome.updated += 1;
            } else {
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    /// Replace the account's research jobs with the fetched set.
    #[tracing::instrument(level = "debug", skip(self, agents), fields(count = agents.len()))]
    pub async fn reconcile_research(
        &self,
        account_id: AccountId,
        agents: &[ResearchAgent],
    ) -> Result<ReconcileOutcome> {
        let jobs: Vec<ResearchJob> = agents
            .iter()
            .map(|a| ResearchJob {
                account_id,
                agent_id: a.agent_id,
                skill_id: a.skill_type_id,
                started_at: a.started_at,
                points_per_day: a.points_per_day,
                remainder_points: a.remainder_points,
            })
            .collect();
        self.db.replace_research_jobs(account_id, &jobs).await?;

        let mut outcome = ReconcileOutcome::new(Walking::Stop(StopReason::SnapshotComplete));
        outcome.inserted = jobs.len() as u64;
        Ok(outcome)
    }
}
