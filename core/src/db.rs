use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, params};

use crate::models::{DATE_FORMAT, DayPayload, EntityKind, PendingOperation};

/// Local durable storage for operations that have not reached the remote yet.
pub struct Database {
    conn: Connection,
}

/// Raw row as stored; decoded separately so a bad row can be detected.
struct StoredOperation {
    local_id: String,
    entity_kind: String,
    payload: String,
    enqueued_at: String,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS pending_operations (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    local_id TEXT NOT NULL UNIQUE,
                    entity_kind TEXT NOT NULL,
                    date TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    enqueued_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_pending_operations_date ON pending_operations(date);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Pending operations ---

    pub fn insert_pending_operation(&self, op: &PendingOperation) -> Result<()> {
        let payload =
            serde_json::to_string(&op.payload).context("Failed to encode operation payload")?;
        self.conn.execute(
            "INSERT INTO pending_operations (local_id, entity_kind, date, payload, enqueued_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                op.local_id,
                op.entity_kind.as_str(),
                op.payload.date.format(DATE_FORMAT).to_string(),
                payload,
                op.enqueued_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All stored operations in insertion order. Fails if any row cannot be decoded.
    pub fn get_pending_operations(&self) -> Result<Vec<PendingOperation>> {
        let mut stmt = self.conn.prepare(
            "SELECT local_id, entity_kind, payload, enqueued_at
             FROM pending_operations ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StoredOperation {
                    local_id: row.get(0)?,
                    entity_kind: row.get(1)?,
                    payload: row.get(2)?,
                    enqueued_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(Self::decode_operation).collect()
    }

    fn decode_operation(row: StoredOperation) -> Result<PendingOperation> {
        let entity_kind: EntityKind = row
            .entity_kind
            .parse()
            .with_context(|| format!("Corrupt operation {}", row.local_id))?;
        let payload: DayPayload = serde_json::from_str(&row.payload)
            .with_context(|| format!("Corrupt payload for operation {}", row.local_id))?;
        let enqueued_at = DateTime::parse_from_rfc3339(&row.enqueued_at)
            .with_context(|| format!("Corrupt timestamp for operation {}", row.local_id))?
            .with_timezone(&Utc);
        Ok(PendingOperation {
            local_id: row.local_id,
            entity_kind,
            payload,
            enqueued_at,
        })
    }

    pub fn delete_pending_operation(&self, local_id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM pending_operations WHERE local_id = ?1",
            params![local_id],
        )?;
        Ok(rows > 0)
    }

    pub fn clear_pending_operations(&self) -> Result<usize> {
        let rows = self.conn.execute("DELETE FROM pending_operations", [])?;
        Ok(rows)
    }

    pub fn count_pending_operations(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM pending_operations", [], |row| {
                    row.get(0)
                })?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn has_pending_operations_for(&self, date: NaiveDate) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM pending_operations WHERE date = ?1)",
            params![date.format(DATE_FORMAT).to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn pending_operation_dates(&self) -> Result<Vec<NaiveDate>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT date FROM pending_operations ORDER BY date ASC")?;
        let dates = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        dates
            .iter()
            .map(|d| {
                NaiveDate::parse_from_str(d, DATE_FORMAT)
                    .with_context(|| format!("Corrupt date in pending queue: {d}"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Exercise, ExerciseSet};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn op_for(day: &str, names: &[&str]) -> PendingOperation {
        PendingOperation::new(DayPayload {
            date: date(day),
            exercises: names
                .iter()
                .map(|n| {
                    Exercise::new(
                        n,
                        vec![ExerciseSet {
                            weight: 60.0,
                            reps: 10,
                        }],
                    )
                })
                .collect(),
        })
    }

    #[test]
    fn test_insert_and_list_pending() {
        let db = Database::open_in_memory().unwrap();
        let op = op_for("2024-05-01", &["squat"]);
        db.insert_pending_operation(&op).unwrap();

        let pending = db.get_pending_operations().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0], op);
    }

    #[test]
    fn test_list_pending_is_fifo_across_dates() {
        let db = Database::open_in_memory().unwrap();
        let a = op_for("2024-05-02", &["squat"]);
        let b = op_for("2024-05-01", &["bench"]);
        let c = op_for("2024-05-02", &["squat", "deadlift"]);
        for op in [&a, &b, &c] {
            db.insert_pending_operation(op).unwrap();
        }

        let ids: Vec<String> = db
            .get_pending_operations()
            .unwrap()
            .into_iter()
            .map(|o| o.local_id)
            .collect();
        assert_eq!(ids, vec![a.local_id, b.local_id, c.local_id]);
    }

    #[test]
    fn test_duplicate_local_id_rejected() {
        let db = Database::open_in_memory().unwrap();
        let op = op_for("2024-05-01", &["squat"]);
        db.insert_pending_operation(&op).unwrap();
        assert!(db.insert_pending_operation(&op).is_err());
    }

    #[test]
    fn test_delete_pending_operation() {
        let db = Database::open_in_memory().unwrap();
        let op = op_for("2024-05-01", &["squat"]);
        db.insert_pending_operation(&op).unwrap();

        assert!(db.delete_pending_operation(&op.local_id).unwrap());
        assert!(!db.delete_pending_operation(&op.local_id).unwrap());
        assert_eq!(db.count_pending_operations().unwrap(), 0);
    }

    #[test]
    fn test_clear_and_count() {
        let db = Database::open_in_memory().unwrap();
        db.insert_pending_operation(&op_for("2024-05-01", &["a"]))
            .unwrap();
        db.insert_pending_operation(&op_for("2024-05-02", &["b"]))
            .unwrap();
        assert_eq!(db.count_pending_operations().unwrap(), 2);

        assert_eq!(db.clear_pending_operations().unwrap(), 2);
        assert_eq!(db.count_pending_operations().unwrap(), 0);
    }

    #[test]
    fn test_has_pending_for_date() {
        let db = Database::open_in_memory().unwrap();
        db.insert_pending_operation(&op_for("2024-05-01", &["a"]))
            .unwrap();
        assert!(db.has_pending_operations_for(date("2024-05-01")).unwrap());
        assert!(!db.has_pending_operations_for(date("2024-05-02")).unwrap());
    }

    #[test]
    fn test_corrupt_payload_is_reported() {
        let db = Database::open_in_memory().unwrap();
        db.conn
            .execute(
                "INSERT INTO pending_operations (local_id, entity_kind, date, payload, enqueued_at)
                 VALUES ('bad', 'day-exercise-record', '2024-05-01', '{not json', '2024-05-01T00:00:00Z')",
                [],
            )
            .unwrap();
        let err = db.get_pending_operations().unwrap_err();
        assert!(format!("{err:#}").contains("bad"));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let op = op_for("2024-05-01", &["squat"]);
        {
            let db = Database::open(&path).unwrap();
            db.insert_pending_operation(&op).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_pending_operations().unwrap(), vec![op]);
    }

    #[test]
    fn test_migration_sets_user_version() {
        let db = Database::open_in_memory().unwrap();
        let version: i64 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }
}
