use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExerciseSet {
    pub weight: f64,
    pub reps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sets: Vec<ExerciseSet>,
    /// Minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    /// Opaque references to uploaded media.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl Exercise {
    /// Create an exercise with a freshly generated client-side id.
    #[must_use]
    pub fn new(name: &str, sets: Vec<ExerciseSet>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            sets,
            duration: None,
            memo: None,
            images: Vec::new(),
        }
    }

    #[must_use]
    pub fn total_reps(&self) -> u32 {
        self.sets.iter().map(|s| s.reps).sum()
    }

    #[must_use]
    pub fn total_volume(&self) -> f64 {
        self.sets.iter().map(|s| s.weight * f64::from(s.reps)).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayState {
    NoRecord,
    LocalOnlyPending,
    RemoteConfirmed,
}

/// The merged view of one date as presented to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayRecord {
    pub remote_id: Option<String>,
    pub date: NaiveDate,
    pub exercises: Vec<Exercise>,
    pub has_pending_changes: bool,
    pub state: DayState,
}

impl DayRecord {
    #[must_use]
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            remote_id: None,
            date,
            exercises: Vec::new(),
            has_pending_changes: false,
            state: DayState::NoRecord,
        }
    }
}

// --- Pending queue types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "day-exercise-record")]
    DayExerciseRecord,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DayExerciseRecord => "day-exercise-record",
        }
    }
}

impl FromStr for EntityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "day-exercise-record" => Ok(Self::DayExerciseRecord),
            other => bail!("Unknown entity kind '{other}'"),
        }
    }
}

/// Full replacement state for one date. Never a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPayload {
    pub date: NaiveDate,
    pub exercises: Vec<Exercise>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub local_id: String,
    pub entity_kind: EntityKind,
    pub payload: DayPayload,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingOperation {
    #[must_use]
    pub fn new(payload: DayPayload) -> Self {
        Self {
            local_id: Uuid::new_v4().to_string(),
            entity_kind: EntityKind::DayExerciseRecord,
            payload,
            enqueued_at: Utc::now(),
        }
    }
}

// --- Sync reporting types ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Connectivity banner data for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Banner {
    pub online: bool,
    pub pending_count: usize,
    pub syncing: bool,
}

/// Where a save ended up: confirmed by the remote, or parked in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaveOutcome {
    Synced { remote_id: String },
    Queued { local_id: String },
}

// --- Month summary types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthHeader {
    pub date: NaiveDate,
    pub has_record: bool,
}

/// A calendar month, held as its first day so every accessor is infallible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Month {
    first: NaiveDate,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            bail!("Month must be between 1 and 12 (got {month})");
        }
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .with_context(|| format!("Year {year} is out of range"))?;
        Ok(Self { first })
    }

    #[must_use]
    pub fn of(date: NaiveDate) -> Self {
        Self {
            first: date.with_day(1).unwrap_or(date),
        }
    }

    #[must_use]
    pub fn year(self) -> i32 {
        self.first.year()
    }

    #[must_use]
    pub fn month(self) -> u32 {
        self.first.month()
    }

    #[must_use]
    pub fn first_day(self) -> NaiveDate {
        self.first
    }

    /// Found within the month itself, so the last month chrono can represent
    /// works too.
    #[must_use]
    pub fn last_day(self) -> NaiveDate {
        (28..=31)
            .rev()
            .find_map(|day| self.first.with_day(day))
            .unwrap_or(self.first)
    }

    #[must_use]
    pub fn contains(self, date: NaiveDate) -> bool {
        date.year() == self.year() && date.month() == self.month()
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for Month {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || anyhow::anyhow!("Invalid month '{s}'. Use YYYY-MM");
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

// --- Validation ---

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|_| anyhow::anyhow!("Invalid date '{s}'. Use YYYY-MM-DD"))
}

pub fn validate_exercise(exercise: &Exercise) -> Result<()> {
    if exercise.id.trim().is_empty() {
        bail!("Exercise id must not be empty");
    }
    if exercise.name.trim().is_empty() {
        bail!("Exercise name must not be empty");
    }
    for set in &exercise.sets {
        if !set.weight.is_finite() || set.weight < 0.0 {
            bail!(
                "Set weight must be a non-negative number (got {}) in '{}'",
                set.weight,
                exercise.name
            );
        }
        if set.reps == 0 {
            bail!("Set reps must be at least 1 in '{}'", exercise.name);
        }
    }
    if exercise.images.iter().any(|i| i.trim().is_empty()) {
        bail!("Image references must not be empty in '{}'", exercise.name);
    }
    Ok(())
}

/// Validate a whole day's list: every exercise, plus id uniqueness within the day.
pub fn validate_exercises(exercises: &[Exercise]) -> Result<()> {
    let mut seen = HashSet::new();
    for exercise in exercises {
        validate_exercise(exercise)?;
        if !seen.insert(exercise.id.as_str()) {
            bail!("Duplicate exercise id '{}'", exercise.id);
        }
    }
    Ok(())
}
