use std::collections::HashMap;

use chrono::NaiveDate;

use crate::models::{DayRecord, DayState, Exercise};

/// What this device last learned about the remote copy of a date.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RemoteKnowledge {
    /// Never fetched or confirmed (fresh start, or invalidated).
    #[default]
    Unknown,
    /// The remote was asked and has no record for the date.
    Absent,
    Present {
        remote_id: String,
        exercises: Vec<Exercise>,
    },
}

/// Latest unconfirmed full snapshot written on this device, tagged with the
/// id of the write that produced it.
#[derive(Debug)]
struct LocalWrite {
    write_id: String,
    exercises: Vec<Exercise>,
}

#[derive(Debug, Default)]
struct DayEntry {
    remote: RemoteKnowledge,
    local: Option<LocalWrite>,
}

/// In-memory per-date view combining the last known remote state with
/// unconfirmed local writes. Reads never touch the network.
#[derive(Debug, Default)]
pub struct DayRecordCache {
    days: HashMap<NaiveDate, DayEntry>,
}

impl DayRecordCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The merged record for `date`.
    ///
    /// A local snapshot is a complete replacement for the day, so while one is
    /// pending it is what the user sees; the remote id still comes from the
    /// remote side.
    #[must_use]
    pub fn get(&self, date: NaiveDate) -> DayRecord {
        let Some(entry) = self.days.get(&date) else {
            return DayRecord::empty(date);
        };

        let (remote_id, remote_exercises) = match &entry.remote {
            RemoteKnowledge::Present {
                remote_id,
                exercises,
            } => (Some(remote_id.clone()), Some(exercises)),
            RemoteKnowledge::Unknown | RemoteKnowledge::Absent => (None, None),
        };

        let exercises = match (&entry.local, remote_exercises) {
            (Some(local), _) => local.exercises.clone(),
            (None, Some(remote)) => remote.clone(),
            (None, None) => Vec::new(),
        };

        let state = if remote_id.is_some() {
            DayState::RemoteConfirmed
        } else if entry.local.is_some() {
            DayState::LocalOnlyPending
        } else {
            DayState::NoRecord
        };

        DayRecord {
            remote_id,
            date,
            exercises,
            has_pending_changes: entry.local.is_some(),
            state,
        }
    }

    /// Optimistic update: the write is visible immediately, before the remote
    /// has seen it. `write_id` identifies this write when it is confirmed.
    pub fn apply_local_write(&mut self, date: NaiveDate, write_id: &str, exercises: Vec<Exercise>) {
        self.days.entry(date).or_default().local = Some(LocalWrite {
            write_id: write_id.to_string(),
            exercises,
        });
    }

    /// Record that the write `write_id` reached the remote.
    ///
    /// The pending flag is cleared only when that write is the latest local
    /// one for the date. An older write confirming, even with an identical
    /// list, leaves the newer one pending. Returns whether the date is now
    /// fully confirmed.
    pub fn apply_remote_confirmation(
        &mut self,
        date: NaiveDate,
        write_id: &str,
        remote_id: &str,
        exercises: &[Exercise],
    ) -> bool {
        let entry = self.days.entry(date).or_default();
        entry.remote = RemoteKnowledge::Present {
            remote_id: remote_id.to_string(),
            exercises: exercises.to_vec(),
        };
        if entry
            .local
            .as_ref()
            .is_some_and(|local| local.write_id == write_id)
        {
            entry.local = None;
        }
        entry.local.is_none()
    }

    /// Record what a fetch returned. Never touches local pending state.
    pub fn apply_remote_fetch(&mut self, date: NaiveDate, record: Option<(String, Vec<Exercise>)>) {
        self.days.entry(date).or_default().remote = match record {
            Some((remote_id, exercises)) => RemoteKnowledge::Present {
                remote_id,
                exercises,
            },
            None => RemoteKnowledge::Absent,
        };
    }

    /// Forget the remote side of `date`; local pending state is kept.
    pub fn invalidate(&mut self, date: NaiveDate) {
        if let Some(entry) = self.days.get_mut(&date) {
            entry.remote = RemoteKnowledge::Unknown;
        }
    }

    #[must_use]
    pub fn remote_knowledge(&self, date: NaiveDate) -> RemoteKnowledge {
        self.days
            .get(&date)
            .map(|e| e.remote.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn pending_dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self
            .days
            .iter()
            .filter(|(_, e)| e.local.is_some())
            .map(|(d, _)| *d)
            .collect();
        dates.sort_unstable();
        dates
    }

    /// Drop every unconfirmed local snapshot (used when the queue is discarded).
    pub fn discard_local_writes(&mut self) {
        for entry in self.days.values_mut() {
            entry.local = None;
        }
    }
}
