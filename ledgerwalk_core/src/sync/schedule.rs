//! Periodic sweeps over the timer table plus the reference-data refresh loops.
//!
//! A sweep only enqueues work; the dispatcher decides when it runs. Each job
//! carries a deadline so a backlog does not replay stale sweeps.

use crate::config::EngineConfig;
use crate::models::{Stream, Timer};
use crate::store::{ListQuery, SyncDb};
use crate::sync::models::SyncJob;
use crate::sync::reference::{ReferenceDataset, ReferenceRefresher};
use crate::sync::traits::Dispatcher;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const SWEEP_BATCH: usize = 200;

/// When a recurring task fires.
#[derive(Debug, Clone)]
pub enum StreamSchedule {
    Every(Duration),
    Cron(Box<Schedule>),
}

impl StreamSchedule {
    pub fn cron(expr: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expr)
            .map_err(|e| Error::InvalidInput(format!("invalid cron expression '{expr}': {e}")))?;
        Ok(Self::Cron(Box::new(schedule)))
    }

    /// Delay from `now` until the next firing, or `None` if the schedule is exhausted.
    pub fn delay_after(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Self::Every(period) => Some(*period),
            Self::Cron(schedule) => {
                let next = schedule.after(&now).next()?;
                Some((next - now).to_std().unwrap_or(Duration::ZERO))
            }
        }
    }
}

pub struct Scheduler {
    db: Arc<dyn SyncDb>,
    dispatcher: Arc<dyn Dispatcher>,
    config: EngineConfig,
    refresher: Option<Arc<ReferenceRefresher>>,
}

impl Scheduler {
    pub fn new(db: Arc<dyn SyncDb>, dispatcher: Arc<dyn Dispatcher>, config: EngineConfig) -> Self {
        Self {
            db,
            dispatcher,
            config,
            refresher: None,
        }
    }

    pub fn with_reference_refresher(mut self, refresher: Arc<ReferenceRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Dispatch one job for every timer of `stream` due at `now`.
    ///
    /// All due timers are collected before any dispatch, so a walker that
    /// finishes quickly and moves its timer cannot shift the paging window.
    #[tracing::instrument(level = "debug", skip(self), fields(stream = %stream))]
    pub async fn sweep(&self, stream: Stream, now: DateTime<Utc>) -> Result<usize> {
        let mut due: Vec<Timer> = Vec::new();
        let mut offset = 0usize;
        loop {
            let batch = self
                .db
                .list_due_timers(
                    stream,
                    now,
                    ListQuery {
                        limit: SWEEP_BATCH,
                        offset,
                    },
                )
                .await?;
            let fetched = batch.len();
            due.extend(batch);
            if fetched < SWEEP_BATCH {
                break;
            }
            offset += fetched;
        }

        let validity = chrono::Duration::from_std(self.config.dispatch_validity)
            .map_err(|e| Error::InvalidInput(format!("dispatch_validity out of range: {e}")))?;
        let valid_until = now + validity;
        for timer in &due {
            self.dispatcher
                .dispatch(SyncJob::new(timer.account_id, stream), valid_until)
                .await?;
        }

        tracing::info!(count = due.len(), "scheduled {} {stream} updates", due.len());
        Ok(due.len())
    }

    pub async fn refresh_reference(&self, dataset: ReferenceDataset) -> Result<()> {
        let Some(refresher) = &self.refresher else {
            return Err(Error::InvalidInput(
                "no reference refresher configured".to_string(),
            ));
        };
        let summary = refresher.refresh(dataset).await?;
        tracing::debug!(
            %dataset,
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            "reference refresh finished"
        );
        Ok(())
    }

    /// Spawn one loop per stream and, when enabled, one per reference dataset.
    pub fn start(self: Arc<Self>) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();

        for stream in Stream::ALL {
            let this = self.clone();
            let period = self.config.streams.get(stream);
            handles.push(tokio::spawn(async move {
                tracing::info!(%stream, period_s = period.as_secs(), "stream sweep loop started");
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    if let Err(e) = this.sweep(stream, Utc::now()).await {
                        tracing::warn!(error = %e, %stream, "sweep failed");
                    }
                }
            }));
        }

        if self.config.reference.enabled && self.refresher.is_some() {
            let reference = &self.config.reference;
            let schedules = [
                (
                    ReferenceDataset::ConquerableStations,
                    StreamSchedule::Every(reference.conquerable_stations),
                ),
                (
                    ReferenceDataset::RefTypes,
                    StreamSchedule::cron(&reference.ref_types_cron)?,
                ),
                (
                    ReferenceDataset::SkillTree,
                    StreamSchedule::Every(reference.skill_tree),
                ),
            ];
            for (dataset, schedule) in schedules {
                handles.push(tokio::spawn(self.clone().reference_loop(dataset, schedule)));
            }
        }

        Ok(handles)
    }

    async fn reference_loop(self: Arc<Self>, dataset: ReferenceDataset, schedule: StreamSchedule) {
        tracing::info!(%dataset, "reference refresh loop started");
        if let StreamSchedule::Every(_) = schedule {
            // Interval datasets refresh once at startup.
            if let Err(e) = self.refresh_reference(dataset).await {
                tracing::warn!(error = %e, %dataset, "reference refresh failed");
            }
        }
        loop {
            let Some(delay) = schedule.delay_after(Utc::now()) else {
                tracing::warn!(%dataset, "schedule has no upcoming firings; stopping");
                return;
            };
            tokio::time::sleep(delay).await;
            if let Err(e) = self.refresh_reference(dataset).await {
                tracing::warn!(error = %e, %dataset, "reference refresh failed");
            }
        }
    }
}
