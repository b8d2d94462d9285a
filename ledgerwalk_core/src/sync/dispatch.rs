use crate::sync::models::{SyncJob, WalkReport};
use crate::sync::traits::Dispatcher;
use crate::sync::walker::Walker;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

/// Runs each job on its own tokio task, at most `max_concurrent` at a time.
///
/// A job whose deadline has passed by the time it gets a permit is dropped
/// without touching storage or the gateway.
#[derive(Clone)]
pub struct TokioDispatcher {
    walker: Arc<Walker>,
    permits: Arc<Semaphore>,
    tasks: Arc<Mutex<JoinSet<Option<WalkReport>>>>,
}

impl TokioDispatcher {
    pub fn new(walker: Arc<Walker>, max_concurrent: usize) -> Self {
        Self {
            walker,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Wait for every dispatched job and collect the reports of those that ran.
    pub async fn drain(&self) -> Vec<WalkReport> {
        let mut tasks = self.tasks.lock().await;
        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "sync task panicked or was cancelled"),
            }
        }
        reports
    }

    async fn execute(
        walker: Arc<Walker>,
        permits: Arc<Semaphore>,
        job: SyncJob,
        valid_until: DateTime<Utc>,
    ) -> Option<WalkReport> {
        let _permit = match permits.acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::error!(error = %e, "dispatcher closed");
                return None;
            }
        };

        if Utc::now() > valid_until {
            tracing::warn!(
                account_id = %job.account_id,
                stream = %job.stream,
                valid_until = %valid_until,
                "sync job expired before it started; discarding"
            );
            return None;
        }

        match walker.run(job).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(
                    account_id = %job.account_id,
                    stream = %job.stream,
                    error = %e,
                    "sync job failed"
                );
                None
            }
        }
    }
}

#[async_trait]
impl Dispatcher for TokioDispatcher {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn dispatch(&self, job: SyncJob, valid_until: DateTime<Utc>) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        // Reap finished tasks so a long-running daemon does not accumulate them.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(Self::execute(
            self.walker.clone(),
            self.permits.clone(),
            job,
            valid_until,
        ));
        Ok(())
    }
}
