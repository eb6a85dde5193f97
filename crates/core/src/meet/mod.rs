//! REST client for meeting creation and lookup.

use crate::config::{BackendUrl, ConfigError, SessionId};
use crate::util::retry::{is_http_retryable, retry_with_backoff, RetryConfig};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A created meeting. Immutable once returned by the backend.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MeetingSession {
    pub session_id: String,
    #[serde(default)]
    pub host_id: String,
    #[serde(default)]
    pub meeting_link: String,
    #[serde(default)]
    pub ws_endpoint: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub expires_at: String,
    #[serde(default)]
    pub duration_minutes: u64,
}

/// Lookup result for an existing meeting.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MeetingMetadata {
    pub session_id: String,
    #[serde(default)]
    pub host_id: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub expires_at: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub active: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum MeetError {
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] ConfigError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http error {0}: {1}")]
    HttpStatus(u16, String),

    #[error("meeting not found or expired: {0}")]
    NotFound(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl MeetError {
    fn is_retryable(&self) -> bool {
        match self {
            MeetError::Http(e) => e.is_timeout() || e.is_connect(),
            MeetError::HttpStatus(status, _) => is_http_retryable(*status),
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct MeetClient {
    client: Client,
    backend: BackendUrl,
    retry: RetryConfig,
}

impl MeetClient {
    pub fn new(backend: BackendUrl) -> Result<Self, MeetError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(MeetError::Http)?;

        Ok(Self {
            client,
            backend,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// POST `/api/create-meeting`.
    pub async fn create_meeting(&self) -> Result<MeetingSession, MeetError> {
        let url = self.backend.api_url("api/create-meeting")?;

        let session = retry_with_backoff(
            &self.retry,
            || {
                let client = self.client.clone();
                let url = url.clone();
                async move {
                    let response = client.post(url).send().await.map_err(MeetError::Http)?;

                    if !response.status().is_success() {
                        let status = response.status().as_u16();
                        let body = response
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unknown error".to_owned());
                        return Err(MeetError::HttpStatus(status, body));
                    }

                    response
                        .json::<MeetingSession>()
                        .await
                        .map_err(|e| MeetError::InvalidResponse(e.to_string()))
                }
            },
            MeetError::is_retryable,
        )
        .await?;

        tracing::info!(
            session_id = %session.session_id,
            meeting_link = %session.meeting_link,
            "meeting created"
        );
        Ok(session)
    }

    /// GET `/api/meeting/{session_id}`. Any non-2xx means the meeting does
    /// not exist or has expired.
    pub async fn get_meeting(&self, session: &SessionId) -> Result<MeetingMetadata, MeetError> {
        let url = self
            .backend
            .api_url(&format!("api/meeting/{}", session.as_str()))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(MeetError::Http)?;

        if !response.status().is_success() {
            tracing::warn!(
                session_id = %session,
                status = response.status().as_u16(),
                "meeting lookup failed"
            );
            return Err(MeetError::NotFound(session.as_str().to_owned()));
        }

        response
            .json::<MeetingMetadata>()
            .await
            .map_err(|e| MeetError::InvalidResponse(e.to_string()))
    }
}
