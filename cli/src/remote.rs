use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::{Method, RequestBuilder, Response, StatusCode};

use reps_core::models::{DATE_FORMAT, Exercise, Month, MonthHeader};
use reps_core::remote::{
    CreateDayRecordRequest, CreateDayRecordResponse, ErrorResponse, RemoteDayRecord, RemoteError,
    RemoteRecordClient, ReplaceExercisesRequest,
};

/// Talks to a `reps serve` instance (or anything speaking the same API).
pub struct HttpRecordClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRecordClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "reps-cli/{} (workout log)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Whether the remote answers its health check.
    pub async fn probe(&self) -> bool {
        match self.request(Method::GET, "/api/health").send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!(error = %err, url = %self.base_url, "health check failed");
                false
            }
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound),
            StatusCode::CONFLICT => Err(RemoteError::Conflict),
            _ => {
                let message = response
                    .json::<ErrorResponse>()
                    .await
                    .map(|e| e.error)
                    .unwrap_or_else(|_| {
                        status
                            .canonical_reason()
                            .unwrap_or("unknown error")
                            .to_string()
                    });
                Err(RemoteError::Rejected {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if err.is_decode() {
        RemoteError::Decode(err.to_string())
    } else {
        RemoteError::Network(err.to_string())
    }
}

impl RemoteRecordClient for HttpRecordClient {
    async fn fetch_day_record(
        &self,
        date: NaiveDate,
    ) -> Result<Option<RemoteDayRecord>, RemoteError> {
        let path = format!("/api/days/{}", date.format(DATE_FORMAT));
        match self.send(self.request(Method::GET, &path)).await {
            Ok(response) => response
                .json::<RemoteDayRecord>()
                .await
                .map(Some)
                .map_err(|e| RemoteError::Decode(e.to_string())),
            Err(RemoteError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create_day_record(
        &self,
        date: NaiveDate,
        exercises: &[Exercise],
    ) -> Result<String, RemoteError> {
        let body = CreateDayRecordRequest {
            date,
            exercises: exercises.to_vec(),
        };
        let response = self
            .send(self.request(Method::POST, "/api/days").json(&body))
            .await?;
        let created: CreateDayRecordResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(created.remote_id)
    }

    async fn replace_exercises(
        &self,
        remote_id: &str,
        exercises: &[Exercise],
    ) -> Result<(), RemoteError> {
        let body = ReplaceExercisesRequest {
            exercises: exercises.to_vec(),
        };
        let path = format!("/api/records/{remote_id}/exercises");
        self.send(self.request(Method::PUT, &path).json(&body))
            .await?;
        Ok(())
    }

    async fn list_month_headers(&self, month: Month) -> Result<Vec<MonthHeader>, RemoteError> {
        let path = format!("/api/months/{month}");
        self.send(self.request(Method::GET, &path))
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}
