use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use chrono::NaiveDate;

use crate::db::Database;
use crate::models::PendingOperation;

/// Process-wide queue of writes waiting for the remote.
///
/// Every call commits to SQLite before returning, so a crash between
/// `enqueue` and the next drain does not lose the write.
pub struct PendingQueue {
    db: Mutex<Database>,
}

impl PendingQueue {
    pub fn open(path: &Path) -> Result<Self> {
        let db = match Database::open(path) {
            Ok(db) => db,
            Err(err) if path.exists() => {
                // Unreadable queue file: move it aside and start empty.
                let aside = path.with_extension(format!(
                    "corrupt-{}",
                    chrono::Utc::now().format("%Y%m%dT%H%M%S")
                ));
                tracing::error!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %format!("{err:#}"),
                    "pending queue unreadable, starting with an empty queue"
                );
                std::fs::rename(path, &aside)?;
                Database::open(path)?
            }
            Err(err) => return Err(err),
        };
        Ok(Self::from_database(db))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    #[must_use]
    pub fn from_database(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, op: &PendingOperation) -> Result<String> {
        self.db().insert_pending_operation(op)?;
        tracing::debug!(
            local_id = %op.local_id,
            date = %op.payload.date,
            exercises = op.payload.exercises.len(),
            "enqueued operation"
        );
        Ok(op.local_id.clone())
    }

    /// Pending operations in FIFO order.
    ///
    /// If any persisted row cannot be decoded the whole queue is cleared and
    /// an empty list is returned.
    pub fn list_pending(&self) -> Result<Vec<PendingOperation>> {
        let db = self.db();
        match db.get_pending_operations() {
            Ok(ops) => Ok(ops),
            Err(err) => {
                let dropped = db.clear_pending_operations()?;
                tracing::error!(
                    dropped,
                    error = %format!("{err:#}"),
                    "pending queue corrupt, cleared"
                );
                Ok(Vec::new())
            }
        }
    }

    pub fn remove(&self, local_id: &str) -> Result<bool> {
        self.db().delete_pending_operation(local_id)
    }

    pub fn clear(&self) -> Result<usize> {
        self.db().clear_pending_operations()
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.db().count_pending_operations()
    }

    pub fn has_pending_for(&self, date: NaiveDate) -> Result<bool> {
        self.db().has_pending_operations_for(date)
    }

    /// Distinct dates with queued operations, ascending.
    pub fn pending_dates(&self) -> Result<Vec<NaiveDate>> {
        self.db().pending_operation_dates()
    }
}
