use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::models::{DATE_FORMAT, Exercise, Month, MonthHeader};
use crate::remote::RemoteDayRecord;

/// System-of-record storage behind `reps serve`: one row per date.
pub struct RecordStore {
    conn: Connection,
}

impl RecordStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open record store: {}", path.display()))?;
        let store = RecordStore { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = RecordStore { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS day_records (
                    remote_id TEXT PRIMARY KEY,
                    date TEXT NOT NULL UNIQUE,
                    exercises TEXT NOT NULL,
                    exercise_count INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    pub fn get_by_date(&self, date: NaiveDate) -> Result<Option<RemoteDayRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT remote_id, exercises FROM day_records WHERE date = ?1",
                params![date.format(DATE_FORMAT).to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        row.map(|(remote_id, exercises)| -> Result<RemoteDayRecord> {
            let exercises: Vec<Exercise> = serde_json::from_str(&exercises)
                .with_context(|| format!("Corrupt exercises for {date}"))?;
            Ok(RemoteDayRecord {
                remote_id,
                date,
                exercises,
            })
        })
        .transpose()
    }

    /// Returns `None` if the date already has a record.
    pub fn create(&self, date: NaiveDate, exercises: &[Exercise]) -> Result<Option<String>> {
        let remote_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO day_records (remote_id, date, exercises, exercise_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                remote_id,
                date.format(DATE_FORMAT).to_string(),
                serde_json::to_string(exercises)?,
                exercises.len(),
                now,
            ],
        )?;
        Ok((rows > 0).then_some(remote_id))
    }

    /// Returns false if no record has `remote_id`.
    pub fn replace_exercises(&self, remote_id: &str, exercises: &[Exercise]) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE day_records SET exercises = ?1, exercise_count = ?2, updated_at = ?3
             WHERE remote_id = ?4",
            params![
                serde_json::to_string(exercises)?,
                exercises.len(),
                Utc::now().to_rfc3339(),
                remote_id,
            ],
        )?;
        Ok(rows > 0)
    }

    /// Every stored date in `month`, ascending. Days stored with an empty list
    /// report `has_record: false`.
    pub fn list_month(&self, month: Month) -> Result<Vec<MonthHeader>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, exercise_count FROM day_records
             WHERE date >= ?1 AND date <= ?2 ORDER BY date ASC",
        )?;
        let rows = stmt
            .query_map(
                params![
                    month.first_day().format(DATE_FORMAT).to_string(),
                    month.last_day().format(DATE_FORMAT).to_string(),
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(date, count)| -> Result<MonthHeader> {
                let date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
                    .with_context(|| format!("Corrupt date in record store: {date}"))?;
                Ok(MonthHeader {
                    date,
                    has_record: count > 0,
                })
            })
            .collect()
    }
}
