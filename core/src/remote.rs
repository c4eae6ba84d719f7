use std::future::Future;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Exercise, Month, MonthHeader};

/// Failures from the remote record store. Every call fails as a whole; there
/// is no partially-applied write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("record not found")]
    NotFound,

    #[error("a record for this date already exists")]
    Conflict,

    #[error("remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("could not decode remote response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// True for failures that are expected to clear up on their own.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::NotFound | Self::Conflict | Self::Decode(_) => false,
        }
    }
}

/// The remote system of record for day exercise collections.
///
/// The CLI implements this over HTTP with reqwest; tests use in-memory mocks.
pub trait RemoteRecordClient: Send + Sync {
    fn fetch_day_record(
        &self,
        date: NaiveDate,
    ) -> impl Future<Output = Result<Option<RemoteDayRecord>, RemoteError>> + Send;

    /// Returns the remote id issued for the new record.
    fn create_day_record(
        &self,
        date: NaiveDate,
        exercises: &[Exercise],
    ) -> impl Future<Output = Result<String, RemoteError>> + Send;

    fn replace_exercises(
        &self,
        remote_id: &str,
        exercises: &[Exercise],
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn list_month_headers(
        &self,
        month: Month,
    ) -> impl Future<Output = Result<Vec<MonthHeader>, RemoteError>> + Send;
}

// --- Wire types ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDayRecord {
    pub remote_id: String,
    pub date: NaiveDate,
    pub exercises: Vec<Exercise>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDayRecordRequest {
    pub date: NaiveDate,
    pub exercises: Vec<Exercise>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDayRecordResponse {
    pub remote_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceExercisesRequest {
    pub exercises: Vec<Exercise>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
