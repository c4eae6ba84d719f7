use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::models::{Month, MonthHeader};
use crate::remote::{RemoteError, RemoteRecordClient};

/// Per-month cache of which dates have a remote record.
///
/// Built from one listing call per month and kept until invalidated. It
/// reflects the remote only; unsynced local writes do not show up here.
#[derive(Debug, Default)]
pub struct MonthSummaryIndex {
    listings: Mutex<HashMap<Month, Vec<MonthHeader>>>,
}

impl MonthSummaryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn cached(&self, month: Month) -> Option<Vec<MonthHeader>> {
        self.listings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&month)
            .cloned()
    }

    /// Headers for `month`, listing from the remote on a miss or when
    /// `refresh` is set. A failed refresh falls back to the previous listing
    /// if there is one.
    pub async fn headers_for<R: RemoteRecordClient>(
        &self,
        remote: &R,
        month: Month,
        refresh: bool,
    ) -> Result<Vec<MonthHeader>, RemoteError> {
        if !refresh {
            if let Some(headers) = self.cached(month) {
                return Ok(headers);
            }
        }

        match remote.list_month_headers(month).await {
            Ok(mut headers) => {
                headers.sort_by_key(|h| h.date);
                self.listings
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(month, headers.clone());
                Ok(headers)
            }
            Err(err) => match self.cached(month) {
                Some(stale) => {
                    tracing::warn!(%month, error = %err, "month listing failed, serving stale copy");
                    Ok(stale)
                }
                None => Err(err),
            },
        }
    }

    pub fn invalidate(&self, month: Month) {
        self.listings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&month);
    }

    pub fn clear(&self) {
        self.listings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
