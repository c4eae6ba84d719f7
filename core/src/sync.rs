use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;

use crate::cache::{DayRecordCache, RemoteKnowledge};
use crate::connectivity::ConnectivityMonitor;
use crate::models::{DrainReport, Exercise};
use crate::queue::PendingQueue;
use crate::remote::{RemoteError, RemoteRecordClient};

/// Everything the write path and the drain share, constructed once and passed
/// explicitly.
pub struct SyncContext<R> {
    pub queue: PendingQueue,
    pub cache: Mutex<DayRecordCache>,
    pub remote: R,
    pub connectivity: ConnectivityMonitor,
}

impl<R: RemoteRecordClient> SyncContext<R> {
    #[must_use]
    pub fn new(queue: PendingQueue, remote: R, connectivity: ConnectivityMonitor) -> Self {
        Self {
            queue,
            cache: Mutex::new(DayRecordCache::new()),
            remote,
            connectivity,
        }
    }

    /// Never hold the guard across an `.await`.
    pub fn cache(&self) -> MutexGuard<'_, DayRecordCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the full exercise list for `date` to the remote and return the
    /// record's remote id.
    ///
    /// Creates the record when the remote has none for the date, otherwise
    /// replaces its exercises. If this device knows nothing about the remote
    /// side yet (fresh start, invalidated), it asks first so a date never gets
    /// two remote records.
    pub async fn write_day(
        &self,
        date: NaiveDate,
        exercises: &[Exercise],
    ) -> Result<String, RemoteError> {
        let known = self.cache().remote_knowledge(date);
        let existing = match known {
            RemoteKnowledge::Present { remote_id, .. } => Some(remote_id),
            RemoteKnowledge::Absent => None,
            RemoteKnowledge::Unknown => {
                let fetched = self.remote.fetch_day_record(date).await?;
                let remote_id = fetched.as_ref().map(|r| r.remote_id.clone());
                self.cache()
                    .apply_remote_fetch(date, fetched.map(|r| (r.remote_id, r.exercises)));
                remote_id
            }
        };

        let result = match existing {
            Some(remote_id) => self
                .remote
                .replace_exercises(&remote_id, exercises)
                .await
                .map(|()| remote_id),
            None => self.remote.create_day_record(date, exercises).await,
        };

        if matches!(result, Err(RemoteError::NotFound | RemoteError::Conflict)) {
            // What we believed about the remote is wrong; re-resolve next time.
            self.cache().invalidate(date);
        }
        result
    }
}

/// Drains the pending queue against the remote, one pass at a time.
#[derive(Debug, Default)]
pub struct SyncDriver {
    draining: AtomicBool,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    fn try_begin(&self) -> Option<DrainGuard<'_>> {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainGuard(&self.draining))
    }

    /// Run one drain pass over a snapshot of the queue.
    ///
    /// If a drain is already running this returns zero counts immediately.
    /// Operations enqueued during the pass wait for the next one. A failed
    /// operation stays queued and later operations for the same date are
    /// held back in this pass, so an older snapshot is never replayed over a
    /// newer one; other dates carry on.
    pub async fn drain<R: RemoteRecordClient>(&self, ctx: &SyncContext<R>) -> DrainReport {
        let Some(_guard) = self.try_begin() else {
            tracing::debug!("drain already running, skipping");
            return DrainReport::default();
        };

        let snapshot = match ctx.queue.list_pending() {
            Ok(ops) => ops,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "could not read pending queue");
                return DrainReport::default();
            }
        };
        if snapshot.is_empty() {
            return DrainReport::default();
        }

        tracing::info!(pending = snapshot.len(), "draining pending operations");
        let mut report = DrainReport::default();
        let mut held_back: HashSet<NaiveDate> = HashSet::new();

        for op in snapshot {
            let date = op.payload.date;
            if held_back.contains(&date) {
                tracing::debug!(local_id = %op.local_id, %date, "held back behind failed operation");
                report.failed += 1;
                continue;
            }

            match ctx.write_day(date, &op.payload.exercises).await {
                Ok(remote_id) => {
                    if let Err(err) = ctx.queue.remove(&op.local_id) {
                        // Replaying a full snapshot is harmless; it will go again next pass.
                        tracing::warn!(
                            local_id = %op.local_id,
                            error = %format!("{err:#}"),
                            "could not remove confirmed operation"
                        );
                    }
                    ctx.cache().apply_remote_confirmation(
                        date,
                        &op.local_id,
                        &remote_id,
                        &op.payload.exercises,
                    );
                    tracing::debug!(local_id = %op.local_id, %date, %remote_id, "operation confirmed");
                    report.succeeded += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        local_id = %op.local_id,
                        %date,
                        transient = err.is_transient(),
                        error = %err,
                        "operation failed, keeping it queued"
                    );
                    held_back.insert(date);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "drain finished"
        );
        report
    }
}
