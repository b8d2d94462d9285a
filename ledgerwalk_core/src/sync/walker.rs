//! Drives one account's synchronization for one stream.
//!
//! `Start -> Authenticating -> Paging -> Finalizing -> Done`, with `Aborted`
//! reachable from `Authenticating` and `Paging` and `SkippedNoCredential`
//! reachable from `Start`. The timer is written only in `Finalizing`.

use crate::error::GatewayError;
use crate::models::{AccountId, Credential, Stream, Timer};
use crate::store::SyncDb;
use crate::sync::credentials::CredentialResolver;
use crate::sync::models::{
    Cursor, JournalEntry, ReconcileOutcome, StopReason, SyncJob, WalkReport, WalkState,
    WalletTransaction, Walking,
};
use crate::sync::reconciler::RecordReconciler;
use crate::sync::snapshot::SnapshotReconciler;
use crate::sync::traits::{ApiGateway, ApiSession, CredentialInvalidationHandler, WalkedRecord};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Result of the `Paging` state.
enum Paging {
    /// At least one page was fetched; carries the last page's cache expiry.
    Finished(DateTime<Utc>),
    Failed(GatewayError),
}

pub struct Walker {
    db: Arc<dyn SyncDb>,
    gateway: Arc<dyn ApiGateway>,
    invalidation: Arc<dyn CredentialInvalidationHandler>,
    credentials: CredentialResolver,
    records: RecordReconciler,
    snapshots: SnapshotReconciler,
    page_size: u32,
}

impl Walker {
    #[tracing::instrument(level = "debug", skip(db, gateway, invalidation))]
    pub fn new(
        db: Arc<dyn SyncDb>,
        gateway: Arc<dyn ApiGateway>,
        invalidation: Arc<dyn CredentialInvalidationHandler>,
        page_size: u32,
    ) -> Self {
        Self {
            credentials: CredentialResolver::new(db.clone()),
            records: RecordReconciler::new(db.clone()),
            snapshots: SnapshotReconciler::new(db.clone()),
            db,
            gateway,
            invalidation,
            page_size,
        }
    }

    /// Run one job to a terminal state.
    ///
    /// Gateway failures end in `Aborted` and are reported, not returned; only
    /// storage faults surface as `Err`. Records persisted before a failure are kept.
    #[tracing::instrument(level = "debug", skip(self), fields(account_id = %job.account_id, stream = %job.stream))]
    pub async fn run(&self, job: SyncJob) -> Result<WalkReport> {
        let mut report = WalkReport::new(job.account_id, job.stream);

        let Some(credential) = self.credentials.resolve(job.account_id).await? else {
            advance(&mut report, WalkState::SkippedNoCredential);
            return Ok(report);
        };

        advance(&mut report, WalkState::Authenticating);
        let session = match self.gateway.authenticate(job.account_id, &credential).await {
            Ok(session) => session,
            Err(e) => {
                self.abort(&mut report, &credential, e).await;
                return Ok(report);
            }
        };

        advance(&mut report, WalkState::Paging);
        let paging = match job.stream {
            Stream::WalletJournal => {
                self.walk::<JournalEntry>(session.as_ref(), &mut report)
                    .await?
            }
            Stream::WalletTransactions => {
                self.walk::<WalletTransaction>(session.as_ref(), &mut report)
                    .await?
            }
            Stream::MarketOrders | Stream::CharacterSheet | Stream::Research => {
                self.snapshot(session.as_ref(), &mut report).await?
            }
        };

        let valid_until = match paging {
            Paging::Finished(valid_until) => valid_until,
            Paging::Failed(e) => {
                self.abort(&mut report, &credential, e).await;
                return Ok(report);
            }
        };

        advance(&mut report, WalkState::Finalizing);
        self.db
            .upsert_timer(&Timer::new(job.account_id, job.stream, valid_until))
            .await?;
        report.next_eligible_at = Some(valid_until);

        advance(&mut report, WalkState::Done);
        tracing::debug!(
            account_id = %job.account_id,
            stream = %job.stream,
            pages = report.pages_fetched,
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            next_eligible_at = %valid_until,
            "sync completed"
        );
        Ok(report)
    }

    /// Backward pagination. The cursor for each follow-up page comes from the
    /// oldest stored record, never from the previous response.
    ///
    /// A page that stores nothing cannot move the cursor, so it ends the walk
    /// with `EmptyHistory` instead of refetching the same window.
    async fn walk<R: WalkedRecord>(
        &self,
        session: &dyn ApiSession,
        report: &mut WalkReport,
    ) -> Result<Paging> {
        let account_id = report.account_id;
        let mut last_cursor: Option<Cursor> = None;
        let mut page = match R::fetch_page(session, self.page_size, None).await {
            Ok(page) => page,
            Err(e) => return Ok(Paging::Failed(e)),
        };

        loop {
            report.pages_fetched += 1;
            let valid_until = page.cache_valid_until;

            let outcome = self.records.reconcile(account_id, &page.records).await?;
            report.absorb(&outcome);
            if let Walking::Stop(reason) = outcome.walking {
                report.stop_reason = Some(reason);
                return Ok(Paging::Finished(valid_until));
            }

            let oldest = if outcome.inserted == 0 {
                None
            } else {
                self.db.oldest_record(account_id, R::STREAM).await?
            };
            let cursor = oldest.map(|row| Cursor::new(row.remote_id));
            let Some(cursor) = cursor.filter(|c| Some(*c) != last_cursor) else {
                tracing::error!(
                    %account_id,
                    stream = %R::STREAM,
                    skipped = outcome.skipped,
                    last_cursor = ?last_cursor,
                    "page stored no records to page back from; stopping walk"
                );
                report.stop_reason = Some(StopReason::EmptyHistory);
                return Ok(Paging::Finished(valid_until));
            };

            tracing::debug!(%account_id, from_id = cursor.from_id, "fetching older page");
            last_cursor = Some(cursor);
            page = match R::fetch_page(session, self.page_size, Some(cursor)).await {
                Ok(page) => page,
                Err(e) => return Ok(Paging::Failed(e)),
            };
        }
    }

    /// Single fetch, no cursor.
    async fn snapshot(&self, session: &dyn ApiSession, report: &mut WalkReport) -> Result<Paging> {
        let account_id = report.account_id;
        let (outcome, valid_until) = match report.stream {
            Stream::MarketOrders => match session.market_orders().await {
                Ok(page) => (
                    self.snapshots
                        .reconcile_orders(account_id, &page.records, Utc::now())
                        .await?,
                    page.cache_valid_until,
                ),
                Err(e) => return Ok(Paging::Failed(e)),
            },
            Stream::CharacterSheet => match session.character_sheet().await {
                Ok(page) => {
                    let valid_until = page.cache_valid_until;
                    let outcome = match page.records.into_iter().next() {
                        Some(sheet) => self.snapshots.reconcile_sheet(account_id, sheet).await?,
                        None => {
                            tracing::warn!(%account_id, "character sheet response was empty");
                            ReconcileOutcome::new(Walking::Stop(StopReason::EmptyPage))
                        }
                    };
                    (outcome, valid_until)
                }
                Err(e) => return Ok(Paging::Failed(e)),
            },
            Stream::Research => match session.research().await {
                Ok(page) => (
                    self.snapshots
                        .reconcile_research(account_id, &page.records)
                        .await?,
                    page.cache_valid_until,
                ),
                Err(e) => return Ok(Paging::Failed(e)),
            },
            Stream::WalletJournal | Stream::WalletTransactions => {
                return Err(Error::InvalidInput(format!(
                    "{} is not a snapshot stream",
                    report.stream
                )));
            }
        };

        report.pages_fetched += 1;
        report.absorb(&outcome);
        if let Walking::Stop(reason) = outcome.walking {
            report.stop_reason = Some(reason);
        }
        Ok(Paging::Finished(valid_until))
    }

    async fn abort(&self, report: &mut WalkReport, credential: &Credential, err: GatewayError) {
        let account_id: AccountId = report.account_id;
        match &err {
            GatewayError::Authentication(failure) => {
                tracing::warn!(
                    %account_id,
                    stream = %report.stream,
                    error = %failure,
                    "credential rejected; aborting sync"
                );
                if let Err(e) = self
                    .invalidation
                    .on_auth_failure(account_id, credential, failure)
                    .await
                {
                    tracing::warn!(%account_id, error = %e, "credential invalidation failed");
                }
            }
            GatewayError::Transient(msg) => {
                tracing::warn!(
                    %account_id,
                    stream = %report.stream,
                    pages = report.pages_fetched,
                    error = %msg,
                    "gateway failure; aborting sync, timer left unchanged"
                );
            }
        }
        report.error = Some(err.to_string());
        advance(report, WalkState::Aborted);
    }
}

fn advance(report: &mut WalkReport, next: WalkState) {
    debug_assert!(
        report.state.can_transition_to(next),
        "illegal walk transition {:?} -> {:?}",
        report.state,
        next
    );
    tracing::trace!(
        account_id = %report.account_id,
        stream = %report.stream,
        from = ?report.state,
        to = ?next,
        "walk state"
    );
    report.state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthFailure, AuthFailureKind};
    use crate::models::CredentialId;
    use crate::store::{AccountStore, MemorySyncDb, RecordStore, TimerStore};
    use crate::sync::credentials::InvalidateRejectedCredentials;
    use crate::sync::models::Page;
    use crate::sync::test_support::{
        cache_time, journal_entries, market_order, seeded_db, transaction, ScriptedGateway,
    };

    fn walker(db: Arc<MemorySyncDb>, gateway: Arc<ScriptedGateway>, page_size: u32) -> Walker {
        let invalidation = Arc::new(InvalidateRejectedCredentials::new(db.clone()));
        Walker::new(db, gateway, invalidation, page_size)
    }

    #[tokio::test]
    async fn two_page_walk_stops_when_page_two_reaches_page_one() {
        let db = seeded_db().await;
        let gateway = Arc::new(ScriptedGateway::new());

        // Page 1: 2560 new entries (ids 1201..=3760). Page 2: 1200 entries where
        // the oldest-listed one repeats the last entry of page 1.
        let mut page_two = journal_entries(2..=1200);
        page_two.extend(journal_entries(1201..=1201));
        gateway.push_journal(Ok(Page::new(journal_entries(1201..=3760), cache_time(1))));
        gateway.push_journal(Ok(Page::new(page_two, cache_time(2))));
        gateway.push_journal(Ok(Page::new(Vec::new(), cache_time(3))));

        let report = walker(db.clone(), gateway.clone(), 2560)
            .run(SyncJob::new(AccountId(1), Stream::WalletJournal))
            .await
            .unwrap();

        assert_eq!(report.state, WalkState::Done);
        assert_eq!(gateway.fetch_count(Stream::WalletJournal), 2);
        assert_eq!(report.stop_reason, Some(StopReason::ReachedKnownHistory));
        assert_eq!(report.inserted, 2560 + 1199);
        let timer = db
            .get_timer(AccountId(1), Stream::WalletJournal)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(timer.next_eligible_at, cache_time(2));
        // Second fetch pages back from the oldest entry stored by the first.
        assert_eq!(
            gateway.journal_cursors(),
            vec![None, Some(Cursor::new(1201))]
        );
    }

    #[tokio::test]
    async fn walk_fetches_ceil_n_over_page_size_pages() {
        let db = seeded_db().await;
        // Known history: 1..=3 from an earlier run.
        let reconciler = RecordReconciler::new(db.clone());
        reconciler
            .reconcile(AccountId(1), &journal_entries(1..=3))
            .await
            .unwrap();

        // Seven new records (4..=10) with page size 3: [10,9,8] [7,6,5] [4,3,2].
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push_journal(Ok(Page::new(journal_entries(8..=10), cache_time(1))));
        gateway.push_journal(Ok(Page::new(journal_entries(5..=7), cache_time(2))));
        gateway.push_journal(Ok(Page::new(journal_entries(2..=4), cache_time(3))));
        gateway.push_journal(Ok(Page::new(journal_entries(1..=1), cache_time(4))));

        let report = walker(db.clone(), gateway.clone(), 3)
            .run(SyncJob::new(AccountId(1), Stream::WalletJournal))
            .await
            .unwrap();

        assert_eq!(gateway.fetch_count(Stream::WalletJournal), 3);
        assert_eq!(report.inserted, 7);
        assert_eq!(
            db.count_records(AccountId(1), Stream::WalletJournal)
                .await
                .unwrap(),
            10
        );
        assert_eq!(report.next_eligible_at, Some(cache_time(3)));
    }

    #[tokio::test]
    async fn fresh_account_walks_until_an_empty_page() {
        let db = seeded_db().await;
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push_journal(Ok(Page::new(journal_entries(1..=5), cache_time(1))));
        gateway.push_journal(Ok(Page::new(Vec::new(), cache_time(2))));

        let report = walker(db.clone(), gateway.clone(), 2560)
            .run(SyncJob::new(AccountId(1), Stream::WalletJournal))
            .await
            .unwrap();
        assert_eq!(report.stop_reason, Some(StopReason::EmptyPage));
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.next_eligible_at, Some(cache_time(2)));
    }

    #[tokio::test]
    async fn transient_failure_mid_walk_keeps_progress_and_timer() {
        let db = seeded_db().await;
        let before = db
            .get_timer(AccountId(1), Stream::WalletJournal)
            .await
            .unwrap();

        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push_journal(Ok(Page::new(journal_entries(21..=30), cache_time(1))));
        gateway.push_journal(Err(GatewayError::transient("connection reset")));
        gateway.push_journal(Ok(Page::new(journal_entries(1..=10), cache_time(3))));

        let report = walker(db.clone(), gateway.clone(), 10)
            .run(SyncJob::new(AccountId(1), Stream::WalletJournal))
            .await
            .unwrap();

        assert_eq!(report.state, WalkState::Aborted);
        assert!(report.error.is_some());
        assert_eq!(
            db.count_records(AccountId(1), Stream::WalletJournal)
                .await
                .unwrap(),
            10
        );
        assert_eq!(
            db.get_timer(AccountId(1), Stream::WalletJournal)
                .await
                .unwrap(),
            before
        );
        assert_eq!(gateway.fetch_count(Stream::WalletJournal), 2);
    }

    #[tokio::test]
    async fn page_of_unknown_types_ends_the_walk() {
        let db = seeded_db().await;
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push_transactions(Ok(Page::new(
            vec![transaction(3, 34), transaction(2, 99999), transaction(1, 99999)],
            cache_time(1),
        )));
        // The server keeps answering the same window for the same fromID.
        for _ in 0..50 {
            gateway.push_transactions(Ok(Page::new(
                vec![transaction(2, 99999), transaction(1, 99999)],
                cache_time(2),
            )));
        }

        let report = walker(db.clone(), gateway.clone(), 3)
            .run(SyncJob::new(AccountId(1), Stream::WalletTransactions))
            .await
            .unwrap();

        assert_eq!(report.state, WalkState::Done);
        assert_eq!(report.stop_reason, Some(StopReason::EmptyHistory));
        assert_eq!(gateway.fetch_count(Stream::WalletTransactions), 2);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 4);
        assert_eq!(report.next_eligible_at, Some(cache_time(2)));
    }

    #[tokio::test]
    async fn first_page_with_nothing_storable_still_finalizes() {
        let db = seeded_db().await;
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push_transactions(Ok(Page::new(
            vec![transaction(2, 99999), transaction(1, 99999)],
            cache_time(4),
        )));

        let report = walker(db.clone(), gateway.clone(), 2560)
            .run(SyncJob::new(AccountId(1), Stream::WalletTransactions))
            .await
            .unwrap();

        assert_eq!(report.state, WalkState::Done);
        assert_eq!(report.stop_reason, Some(StopReason::EmptyHistory));
        assert_eq!(gateway.fetch_count(Stream::WalletTransactions), 1);
        assert_eq!(
            db.count_records(AccountId(1), Stream::WalletTransactions)
                .await
                .unwrap(),
            0
        );
        let timer = db
            .get_timer(AccountId(1), Stream::WalletTransactions)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(timer.next_eligible_at, cache_time(4));
    }

    #[tokio::test]
    async fn credential_rejected_while_paging_aborts_without_timer() {
        let db = seeded_db().await;
        let before = db
            .get_timer(AccountId(1), Stream::WalletJournal)
            .await
            .unwrap();

        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push_journal(Ok(Page::new(journal_entries(11..=20), cache_time(1))));
        gateway.push_journal(Err(GatewayError::Authentication(AuthFailure::new(
            AuthFailureKind::Expired,
            Some(222),
            "key has expired",
        ))));

        let report = walker(db.clone(), gateway.clone(), 10)
            .run(SyncJob::new(AccountId(1), Stream::WalletJournal))
            .await
            .unwrap();

        assert_eq!(report.state, WalkState::Aborted);
        assert!(report.next_eligible_at.is_none());
        assert_eq!(gateway.fetch_count(Stream::WalletJournal), 2);
        let cred = db.get_credential(CredentialId(1)).await.unwrap().unwrap();
        assert!(!cred.is_valid);
        assert_eq!(
            db.count_records(AccountId(1), Stream::WalletJournal)
                .await
                .unwrap(),
            10
        );
        assert_eq!(
            db.get_timer(AccountId(1), Stream::WalletJournal)
                .await
                .unwrap(),
            before
        );
    }

    #[tokio::test]
    async fn missing_credential_touches_nothing() {
        let db = seeded_db().await;
        db.set_credential_validity(CredentialId(1), false)
            .await
            .unwrap();
        let timer_before = db.get_timer(AccountId(1), Stream::WalletJournal).await.unwrap();

        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push_journal(Ok(Page::new(journal_entries(1..=5), cache_time(1))));

        let report = walker(db.clone(), gateway.clone(), 2560)
            .run(SyncJob::new(AccountId(1), Stream::WalletJournal))
            .await
            .unwrap();

        assert_eq!(report.state, WalkState::SkippedNoCredential);
        assert_eq!(gateway.auth_count(), 0);
        assert_eq!(gateway.fetch_count(Stream::WalletJournal), 0);
        assert!(db.all_records().await.is_empty());
        assert_eq!(
            db.get_timer(AccountId(1), Stream::WalletJournal).await.unwrap(),
            timer_before
        );
    }

    #[tokio::test]
    async fn rejected_credential_aborts_and_is_invalidated() {
        let db = seeded_db().await;
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fail_auth(AuthFailure::new(
            AuthFailureKind::InvalidKey,
            Some(203),
            "authentication failure",
        ));

        let report = walker(db.clone(), gateway.clone(), 2560)
            .run(SyncJob::new(AccountId(1), Stream::Research))
            .await
            .unwrap();

        assert_eq!(report.state, WalkState::Aborted);
        assert!(report.next_eligible_at.is_none());
        let cred = db.get_credential(CredentialId(1)).await.unwrap().unwrap();
        assert!(!cred.is_valid);
    }

    #[tokio::test]
    async fn snapshot_stream_finalizes_from_its_single_page() {
        let db = seeded_db().await;
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push_orders(Ok(Page::new(
            vec![market_order(900, 0), market_order(901, 0)],
            cache_time(7),
        )));

        let report = walker(db.clone(), gateway.clone(), 2560)
            .run(SyncJob::new(AccountId(1), Stream::MarketOrders))
            .await
            .unwrap();

        assert_eq!(report.state, WalkState::Done);
        assert_eq!(report.stop_reason, Some(StopReason::SnapshotComplete));
        assert_eq!(report.inserted, 2);
        let timer = db
            .get_timer(AccountId(1), Stream::MarketOrders)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(timer.next_eligible_at, cache_time(7));
    }
}
