use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tokio::task::JoinHandle;

use crate::cache::RemoteKnowledge;
use crate::connectivity::ConnectivityMonitor;
use crate::models::{
    Banner, DayPayload, DayRecord, DrainReport, Exercise, Month, MonthHeader, PendingOperation,
    SaveOutcome, validate_exercise, validate_exercises,
};
use crate::month::MonthSummaryIndex;
use crate::queue::PendingQueue;
use crate::remote::{RemoteError, RemoteRecordClient};
use crate::sync::{SyncContext, SyncDriver};

/// Offline-first exercise log.
///
/// Reads come from memory and never wait on the network. Saves are visible
/// immediately and go to the remote directly when it is reachable, or to the
/// durable queue when it is not. Share one instance per process through an
/// `Arc`.
pub struct ExerciseService<R> {
    ctx: SyncContext<R>,
    driver: SyncDriver,
    months: MonthSummaryIndex,
    /// Serializes saves so the queue-or-direct decision and the write itself
    /// happen in issue order.
    write_lock: tokio::sync::Mutex<()>,
}

impl<R: RemoteRecordClient> ExerciseService<R> {
    /// Build the service over an opened queue. Writes still queued from a
    /// previous run are loaded back into the cache so they stay visible.
    pub fn new(queue: PendingQueue, remote: R, reachable: bool) -> Result<Self> {
        let ctx = SyncContext::new(queue, remote, ConnectivityMonitor::new(reachable));

        let pending = ctx
            .queue
            .list_pending()
            .context("Failed to read pending queue")?;
        if !pending.is_empty() {
            tracing::info!(pending = pending.len(), "restored queued writes");
        }
        {
            let mut cache = ctx.cache();
            for op in pending {
                cache.apply_local_write(op.payload.date, &op.local_id, op.payload.exercises);
            }
        }

        Ok(Self {
            ctx,
            driver: SyncDriver::new(),
            months: MonthSummaryIndex::new(),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    #[must_use]
    pub fn remote(&self) -> &R {
        &self.ctx.remote
    }

    // --- Reads ---

    #[must_use]
    pub fn get_day_record(&self, date: NaiveDate) -> DayRecord {
        self.ctx.cache().get(date)
    }

    /// What this process has seen of the remote copy of `date`.
    #[must_use]
    pub fn remote_knowledge(&self, date: NaiveDate) -> RemoteKnowledge {
        self.ctx.cache().remote_knowledge(date)
    }

    /// Fetch the remote copy of `date` into the cache, then return the merged
    /// record. Local pending writes still win for display.
    pub async fn refresh_day(&self, date: NaiveDate) -> Result<DayRecord> {
        let fetched = self
            .ctx
            .remote
            .fetch_day_record(date)
            .await
            .inspect_err(|err| self.note_remote_failure(err))
            .with_context(|| format!("Failed to fetch {date}"))?;
        self.ctx
            .cache()
            .apply_remote_fetch(date, fetched.map(|r| (r.remote_id, r.exercises)));
        Ok(self.get_day_record(date))
    }

    pub async fn month_headers(&self, month: Month, refresh: bool) -> Result<Vec<MonthHeader>> {
        let headers = self
            .months
            .headers_for(&self.ctx.remote, month, refresh)
            .await
            .inspect_err(|err| self.note_remote_failure(err))
            .with_context(|| format!("Failed to list {month}"))?;
        Ok(headers)
    }

    // --- Writes ---

    /// Replace the whole exercise list for `date`.
    pub async fn save_exercises(
        &self,
        date: NaiveDate,
        exercises: Vec<Exercise>,
    ) -> Result<SaveOutcome> {
        validate_exercises(&exercises)?;
        let _write = self.write_lock.lock().await;
        self.save_locked(date, exercises).await
    }

    /// Append one exercise to the day's current list.
    pub async fn add_exercise(&self, date: NaiveDate, exercise: Exercise) -> Result<SaveOutcome> {
        validate_exercise(&exercise)?;
        let _write = self.write_lock.lock().await;
        let mut exercises = self.get_day_record(date).exercises;
        exercises.push(exercise);
        validate_exercises(&exercises)?;
        self.save_locked(date, exercises).await
    }

    /// Drop the exercise with `exercise_id` from the day. Returns `None` if
    /// the day has no such exercise; nothing is written in that case.
    pub async fn remove_exercise(
        &self,
        date: NaiveDate,
        exercise_id: &str,
    ) -> Result<Option<SaveOutcome>> {
        let _write = self.write_lock.lock().await;
        let mut exercises = self.get_day_record(date).exercises;
        let before = exercises.len();
        exercises.retain(|e| e.id != exercise_id);
        if exercises.len() == before {
            return Ok(None);
        }
        self.save_locked(date, exercises).await.map(Some)
    }

    /// Caller holds `write_lock`.
    async fn save_locked(&self, date: NaiveDate, exercises: Vec<Exercise>) -> Result<SaveOutcome> {
        // The operation's local id tags the write whichever path it takes.
        let op = PendingOperation::new(DayPayload { date, exercises });
        let exercises = &op.payload.exercises;
        self.ctx
            .cache()
            .apply_local_write(date, &op.local_id, exercises.clone());

        // Anything already queued for the date has to reach the remote first.
        let queued_for_date = self.ctx.queue.has_pending_for(date)?;
        if self.ctx.connectivity.is_reachable() && !queued_for_date {
            match self.ctx.write_day(date, exercises).await {
                Ok(remote_id) => {
                    self.ctx.cache().apply_remote_confirmation(
                        date,
                        &op.local_id,
                        &remote_id,
                        exercises,
                    );
                    self.months.invalidate(Month::of(date));
                    tracing::debug!(%date, %remote_id, "saved to remote");
                    return Ok(SaveOutcome::Synced { remote_id });
                }
                Err(err) => {
                    tracing::warn!(%date, error = %err, "remote write failed, queueing");
                    self.note_remote_failure(&err);
                }
            }
        }

        let local_id = self
            .ctx
            .queue
            .enqueue(&op)
            .with_context(|| format!("Failed to queue write for {date}"))?;
        Ok(SaveOutcome::Queued { local_id })
    }

    fn note_remote_failure(&self, err: &RemoteError) {
        if err.is_transient() {
            self.ctx.connectivity.set_reachable(false);
        }
    }

    // --- Sync ---

    /// Drain the queue now. Returns zero counts if a drain is already running.
    pub async fn sync_now(&self) -> DrainReport {
        let report = self.driver.drain(&self.ctx).await;
        if report.succeeded > 0 {
            self.months.clear();
        }
        report
    }

    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.driver.is_draining()
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.ctx.queue.pending_count()
    }

    pub fn pending_dates(&self) -> Result<Vec<NaiveDate>> {
        self.ctx.queue.pending_dates()
    }

    pub fn pending_operations(&self) -> Result<Vec<PendingOperation>> {
        self.ctx.queue.list_pending()
    }

    /// Throw away every queued write and its optimistic cache state.
    pub async fn clear_pending(&self) -> Result<usize> {
        let _write = self.write_lock.lock().await;
        let dropped = self.ctx.queue.clear()?;
        self.ctx.cache().discard_local_writes();
        if dropped > 0 {
            tracing::warn!(dropped, "discarded queued writes");
        }
        Ok(dropped)
    }

    pub fn banner(&self) -> Result<Banner> {
        Ok(Banner {
            online: self.ctx.connectivity.is_reachable(),
            pending_count: self.pending_count()?,
            syncing: self.is_syncing(),
        })
    }

    // --- Connectivity ---

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.ctx.connectivity.is_reachable()
    }

    /// Returns true if this changed the state.
    pub fn set_reachable(&self, reachable: bool) -> bool {
        self.ctx.connectivity.set_reachable(reachable)
    }

    pub fn on_connectivity_change(&self, listener: impl Fn(bool) + Send + Sync + 'static) {
        self.ctx.connectivity.on_change(listener);
    }
}

impl<R: RemoteRecordClient + 'static> ExerciseService<R> {
    /// Start the task that drains the queue each time the remote becomes
    /// reachable, and once at start if it already is.
    ///
    /// Only one of these should run per service. It lives until aborted.
    pub fn spawn_reconnect_dispatcher(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let mut rx = self.ctx.connectivity.subscribe();
        tokio::spawn(async move {
            let mut online = *rx.borrow_and_update();
            loop {
                if online {
                    let report = service.sync_now().await;
                    tracing::debug!(
                        succeeded = report.succeeded,
                        failed = report.failed,
                        "reconnect drain finished"
                    );
                }
                if rx.changed().await.is_err() {
                    break;
                }
                online = *rx.borrow_and_update();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DayState, ExerciseSet};
    use crate::sync::tests::{MockRemote, day, squat};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn service(remote: MockRemote, reachable: bool) -> ExerciseService<MockRemote> {
        ExerciseService::new(PendingQueue::in_memory().unwrap(), remote, reachable).unwrap()
    }

    fn bench() -> Exercise {
        Exercise::new(
            "bench",
            vec![ExerciseSet {
                weight: 40.0,
                reps: 8,
            }],
        )
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_offline_squat_is_visible_then_confirmed() {
        let svc = service(MockRemote::new(), false);
        let list = vec![squat()];

        let outcome = svc.save_exercises(day(1), list.clone()).await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Queued { .. }));

        let record = svc.get_day_record(day(1));
        assert_eq!(record.exercises, list);
        assert_eq!(record.exercises[0].sets[0].weight, 60.0);
        assert_eq!(record.exercises[0].sets[0].reps, 10);
        assert!(record.remote_id.is_none());
        assert!(record.has_pending_changes);
        assert_eq!(record.state, DayState::LocalOnlyPending);
        assert_eq!(svc.pending_count().unwrap(), 1);

        svc.set_reachable(true);
        let report = svc.sync_now().await;
        assert_eq!(
            report,
            DrainReport {
                succeeded: 1,
                failed: 0
            }
        );

        let record = svc.get_day_record(day(1));
        assert!(record.remote_id.is_some());
        assert!(!record.has_pending_changes);
        assert_eq!(record.state, DayState::RemoteConfirmed);
        assert_eq!(svc.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_two_offline_writes_converge_to_superset() {
        let svc = service(MockRemote::new(), false);
        let first = vec![squat()];
        let mut second = first.clone();
        second.push(bench());

        svc.save_exercises(day(1), first).await.unwrap();
        svc.save_exercises(day(1), second.clone()).await.unwrap();
        assert_eq!(svc.get_day_record(day(1)).exercises, second);

        svc.set_reachable(true);
        assert_eq!(svc.sync_now().await.succeeded, 2);
        assert_eq!(svc.ctx.remote.creates.load(Ordering::SeqCst), 1);
        assert_eq!(svc.ctx.remote.stored(day(1)).unwrap().exercises, second);
        assert!(!svc.get_day_record(day(1)).has_pending_changes);
    }

    #[tokio::test]
    async fn test_online_save_goes_direct() {
        let svc = service(MockRemote::new(), true);
        let outcome = svc.save_exercises(day(1), vec![squat()]).await.unwrap();
        assert_eq!(
            outcome,
            SaveOutcome::Synced {
                remote_id: "r1".to_string()
            }
        );
        assert_eq!(svc.pending_count().unwrap(), 0);
        assert_eq!(svc.get_day_record(day(1)).state, DayState::RemoteConfirmed);

        svc.save_exercises(day(1), vec![squat(), bench()])
            .await
            .unwrap();
        assert_eq!(svc.ctx.remote.creates.load(Ordering::SeqCst), 1);
        assert_eq!(svc.ctx.remote.replaces.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_save_behind_queued_date_is_queued() {
        let svc = service(MockRemote::new(), false);
        svc.save_exercises(day(1), vec![squat()]).await.unwrap();
        svc.set_reachable(true);

        let outcome = svc
            .save_exercises(day(1), vec![squat(), bench()])
            .await
            .unwrap();
        assert!(matches!(outcome, SaveOutcome::Queued { .. }));
        assert_eq!(svc.pending_count().unwrap(), 2);
        assert_eq!(svc.ctx.remote.creates.load(Ordering::SeqCst), 0);

        // Other dates are not held up.
        let outcome = svc.save_exercises(day(2), vec![squat()]).await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Synced { .. }));
    }

    #[tokio::test]
    async fn test_transient_failure_queues_and_goes_offline() {
        let remote = MockRemote::new();
        remote.fail_date(day(1));
        let svc = service(remote, true);

        let outcome = svc.save_exercises(day(1), vec![squat()]).await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Queued { .. }));
        assert!(!svc.is_online());
        assert!(svc.get_day_record(day(1)).has_pending_changes);
    }

    #[tokio::test]
    async fn test_invalid_exercises_rejected_before_any_write() {
        let svc = service(MockRemote::new(), true);
        let mut bad = squat();
        bad.name = "  ".to_string();

        assert!(svc.save_exercises(day(1), vec![bad]).await.is_err());
        assert_eq!(svc.get_day_record(day(1)).state, DayState::NoRecord);
        assert_eq!(svc.ctx.remote.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_queue_survives_restart_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reps.db");
        let list = vec![squat()];
        {
            let svc =
                ExerciseService::new(PendingQueue::open(&path).unwrap(), MockRemote::new(), false)
                    .unwrap();
            svc.save_exercises(day(1), list.clone()).await.unwrap();
        }

        let remote = MockRemote::new();
        let svc = ExerciseService::new(PendingQueue::open(&path).unwrap(), remote, true).unwrap();
        let record = svc.get_day_record(day(1));
        assert_eq!(record.exercises, list);
        assert!(record.has_pending_changes);

        assert_eq!(svc.sync_now().await.succeeded, 1);
        assert_eq!(svc.ctx.remote.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(svc.ctx.remote.record_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_after_unrecorded_confirmation_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reps.db");
        let list = vec![squat()];
        {
            let svc =
                ExerciseService::new(PendingQueue::open(&path).unwrap(), MockRemote::new(), false)
                    .unwrap();
            svc.save_exercises(day(1), list.clone()).await.unwrap();
        }

        // The write reached the remote but the queue never heard back.
        let remote = MockRemote::new();
        remote.seed(day(1), list.clone());
        let svc = ExerciseService::new(PendingQueue::open(&path).unwrap(), remote, true).unwrap();

        assert_eq!(svc.sync_now().await.succeeded, 1);
        assert_eq!(svc.ctx.remote.creates.load(Ordering::SeqCst), 0);
        assert_eq!(svc.ctx.remote.record_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_sync_now_is_single_flight() {
        let gate = Arc::new(Notify::new());
        let svc = Arc::new(service(MockRemote::gated(Arc::clone(&gate)), false));
        svc.save_exercises(day(1), vec![squat()]).await.unwrap();
        svc.set_reachable(true);

        let first = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.sync_now().await })
        };
        wait_until(|| svc.is_syncing()).await;
        assert!(svc.banner().unwrap().syncing);

        assert_eq!(svc.sync_now().await, DrainReport::default());

        gate.notify_one();
        assert_eq!(first.await.unwrap().succeeded, 1);
        assert_eq!(svc.ctx.remote.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispatcher_drains_on_reconnect() {
        let svc = Arc::new(service(MockRemote::new(), false));
        svc.save_exercises(day(1), vec![squat()]).await.unwrap();
        svc.save_exercises(day(2), vec![bench()]).await.unwrap();

        let handle = svc.spawn_reconnect_dispatcher();
        svc.set_reachable(true);
        wait_until(|| svc.pending_count().unwrap() == 0).await;

        assert_eq!(svc.ctx.remote.record_count(), 2);
        handle.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_one_drain_per_reconnect_regardless_of_listeners() {
        // day(1) keeps failing, so every drain pass costs exactly one fetch for it.
        let remote = MockRemote::new();
        remote.fail_date(day(1));
        let svc = Arc::new(service(remote, false));
        svc.save_exercises(day(1), vec![squat()]).await.unwrap();
        svc.save_exercises(day(2), vec![bench()]).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            svc.on_connectivity_change(move |online| {
                if online {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        let handle = svc.spawn_reconnect_dispatcher();
        let fetches = || svc.ctx.remote.fetches.load(Ordering::SeqCst);

        assert!(svc.set_reachable(true));
        wait_until(|| fetches() >= 2 && !svc.is_syncing()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(fetches(), 2);
        assert_eq!(svc.ctx.remote.creates.load(Ordering::SeqCst), 1);
        assert_eq!(svc.pending_dates().unwrap(), vec![day(1)]);

        // Staying online is not a transition.
        for _ in 0..3 {
            assert!(!svc.set_reachable(true));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fetches(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        assert!(svc.set_reachable(false));
        assert!(svc.set_reachable(true));
        wait_until(|| fetches() >= 3 && !svc.is_syncing()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fetches(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        handle.abort();
    }

    #[tokio::test]
    async fn test_edit_after_partial_drain_builds_on_latest_local_write() {
        let remote = MockRemote::new();
        remote.fail_writes_after(2);
        let svc = service(remote, false);
        let s = squat();
        let b = bench();
        svc.add_exercise(day(1), s.clone()).await.unwrap();
        svc.add_exercise(day(1), b.clone()).await.unwrap();
        svc.remove_exercise(day(1), &b.id).await.unwrap();

        svc.set_reachable(true);
        let report = svc.sync_now().await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        let record = svc.get_day_record(day(1));
        assert_eq!(record.exercises, vec![s.clone()]);
        assert!(record.has_pending_changes);

        let row = Exercise::new("row", vec![]);
        let outcome = svc.add_exercise(day(1), row.clone()).await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Queued { .. }));
        assert_eq!(svc.get_day_record(day(1)).exercises, vec![s, row]);
    }

    #[tokio::test]
    async fn test_connectivity_listeners_and_banner() {
        let svc = service(MockRemote::new(), false);
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            svc.on_connectivity_change(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        svc.save_exercises(day(1), vec![squat()]).await.unwrap();

        assert_eq!(
            svc.banner().unwrap(),
            Banner {
                online: false,
                pending_count: 1,
                syncing: false
            }
        );
        assert!(svc.set_reachable(true));
        assert!(!svc.set_reachable(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(svc.banner().unwrap().online);
    }

    #[tokio::test]
    async fn test_add_and_remove_exercise() {
        let svc = service(MockRemote::new(), true);
        let s = squat();
        let b = bench();
        svc.add_exercise(day(1), s.clone()).await.unwrap();
        svc.add_exercise(day(1), b.clone()).await.unwrap();
        assert_eq!(svc.get_day_record(day(1)).exercises, vec![s.clone(), b]);

        assert!(svc.remove_exercise(day(1), "missing").await.unwrap().is_none());
        let removed = svc.remove_exercise(day(1), &s.id).await.unwrap();
        assert!(matches!(removed, Some(SaveOutcome::Synced { .. })));
        assert_eq!(svc.ctx.remote.stored(day(1)).unwrap().exercises.len(), 1);
    }

    #[tokio::test]
    async fn test_add_duplicate_id_rejected() {
        let svc = service(MockRemote::new(), false);
        let s = squat();
        svc.add_exercise(day(1), s.clone()).await.unwrap();
        assert!(svc.add_exercise(day(1), s).await.is_err());
        assert_eq!(svc.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_pending_discards_local_state() {
        let svc = service(MockRemote::new(), false);
        svc.save_exercises(day(1), vec![squat()]).await.unwrap();
        svc.save_exercises(day(2), vec![squat()]).await.unwrap();

        assert_eq!(svc.pending_operations().unwrap().len(), 2);
        assert_eq!(svc.pending_dates().unwrap(), vec![day(1), day(2)]);
        assert_eq!(svc.clear_pending().await.unwrap(), 2);
        assert_eq!(svc.pending_count().unwrap(), 0);
        assert_eq!(svc.get_day_record(day(1)).state, DayState::NoRecord);
    }

    #[tokio::test]
    async fn test_refresh_day_and_month_headers() {
        let remote = MockRemote::new();
        let remote_id = remote.seed(day(3), vec![squat()]);
        let svc = service(remote, true);

        assert_eq!(svc.get_day_record(day(3)).state, DayState::NoRecord);
        assert_eq!(svc.remote_knowledge(day(3)), RemoteKnowledge::Unknown);
        let record = svc.refresh_day(day(3)).await.unwrap();
        assert_eq!(record.remote_id, Some(remote_id));
        assert_eq!(record.state, DayState::RemoteConfirmed);

        let may = Month::of(day(1));
        assert_eq!(svc.month_headers(may, false).await.unwrap().len(), 1);

        // A direct save invalidates the month listing.
        svc.save_exercises(day(4), vec![squat()]).await.unwrap();
        let headers = svc.month_headers(may, false).await.unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(svc.ctx.remote.listings.load(Ordering::SeqCst), 2);
    }
}
