use crate::models::AccountId;
use crate::store::{RecordKey, RecordRow, SyncDb};
use crate::sync::models::{LedgerRecord, ReconcileOutcome, StopReason, Walking};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;

/// Merges one fetched page of a walked stream into the record store.
#[derive(Clone)]
pub struct RecordReconciler {
    db: Arc<dyn SyncDb>,
}

impl RecordReconciler {
    pub fn new(db: Arc<dyn SyncDb>) -> Self {
        Self { db }
    }

    /// Reconcile `records` (newest-first) for one account.
    ///
    /// Stops at the first record already in storage. Per-record constraint
    /// failures are contained here; only storage faults propagate.
    #[tracing::instrument(level = "debug", skip(self, records), fields(stream = %R::STREAM, count = records.len()))]
    pub async fn reconcile<R: LedgerRecord>(
        &self,
        account_id: AccountId,
        records: &[R],
    ) -> Result<ReconcileOutcome> {
        if records.is_empty() {
            return Ok(ReconcileOutcome::new(Walking::Stop(StopReason::EmptyPage)));
        }

        let mut outcome = ReconcileOutcome::new(Walking::Continue);
        for record in records {
            let key = RecordKey {
                account_id,
                stream: R::STREAM,
                remote_id: record.remote_id(),
            };

            let existing = self.db.find_records(&key).await?;
            if !existing.is_empty() {
                if existing.len() > 1 {
                    outcome.duplicates_removed += self.delete_extras(&key, existing).await?;
                }
                tracing::debug!(
                    %account_id,
                    remote_id = key.remote_id,
                    "reached previously stored history"
                );
                outcome.walking = Walking::Stop(StopReason::ReachedKnownHistory);
                break;
            }

            let row = RecordRow::from_record(account_id, record, Some(Utc::now()))?;
            match self.db.insert_record(&row).await {
                Ok(()) => outcome.inserted += 1,
                Err(Error::ReferentialIntegrity(msg)) => {
                    tracing::warn!(
                        %account_id,
                        remote_id = key.remote_id,
                        item_type_id = ?row.item_type_id,
                        error = %msg,
                        "record references unknown reference data; reference tables may be outdated"
                    );
                    outcome.skipped += 1;
                }
                Err(Error::Conflict(_)) => {
                    // Another worker stored the same key between our lookup and insert.
                    outcome.duplicates_removed += self.collapse_duplicates(&key).await?;
                    outcome.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    /// Reduce every row sharing `key` to exactly one. Returns the number deleted.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn collapse_duplicates(&self, key: &RecordKey) -> Result<u64> {
        let rows = self.db.find_records(key).await?;
        self.delete_extras(key, rows).await
    }

    async fn delete_extras(&self, key: &RecordKey, rows: Vec<RecordRow>) -> Result<u64> {
        if rows.len() < 2 {
            return Ok(0);
        }
        let extras = &rows[1..];
        for row in extras {
            self.db.delete_record(row.row_id).await?;
        }
        tracing::warn!(
            account_id = %key.account_id,
            stream = %key.stream,
            remote_id = key.remote_id,
            removed = extras.len(),
            "removed duplicate records"
        );
        Ok(extras.len() as u64)
    }
}
