//! Gmail API HTTP client
//!
//! Implements [`MailRemote`] over the Gmail REST API.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;
use ureq::Agent;
use ureq::http::Response;
use url::Url;

use super::AccessTokenProvider;
use super::api::{ErrorResponse, GmailMessage, HistoryResponse, ListMessagesResponse, ProfileResponse};
use super::batch;
use crate::models::MessageId;
use crate::remote::{BatchResults, HistoryPage, MailRemote, MessagePage, RemoteError};

/// 403 reasons that mean "slow down" rather than "not allowed"
const QUOTA_REASONS: &[&str] = &[
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "quotaExceeded",
    "dailyLimitExceeded",
];

/// Gmail API client
///
/// Construction performs no network calls; the first request obtains an
/// access token from the provider.
pub struct GmailClient {
    auth: Arc<dyn AccessTokenProvider>,
    agent: Agent,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1/users/me";

    /// Gmail batch endpoint
    const BATCH_URL: &'static str = "https://www.googleapis.com/batch/gmail/v1";

    /// Upper bound for any single request
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new Gmail client
    pub fn new(auth: Arc<dyn AccessTokenProvider>) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Self::REQUEST_TIMEOUT))
            .http_status_as_error(false)
            .build()
            .into();

        Self { auth, agent }
    }

    fn url(&self, path: &str) -> Result<Url, RemoteError> {
        Url::parse(&format!("{}{}", Self::BASE_URL, path))
            .map_err(|e| RemoteError::BadRequest(format!("invalid url for {path}: {e}")))
    }

    fn bearer(&self) -> Result<String, RemoteError> {
        let token = self
            .auth
            .access_token()
            .map_err(|e| RemoteError::PermissionDenied(format!("{e:#}")))?;
        Ok(format!("Bearer {token}"))
    }

    fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, RemoteError> {
        debug!("GET {}", url.path());
        let response = self
            .agent
            .get(url.as_str())
            .header("Authorization", &self.bearer()?)
            .call()
            .map_err(transport_error)?;
        read_json(response)
    }

    /// Metadata for a batch of messages through the batch endpoint
    fn batch_request(&self, ids: &[MessageId]) -> Result<BatchResults, RemoteError> {
        let boundary = format!("prune_batch_{}", uuid::Uuid::new_v4().simple());
        let body = batch::encode_request(&boundary, ids);

        let mut response = self
            .agent
            .post(Self::BATCH_URL)
            .header("Authorization", &self.bearer()?)
            .header("Content-Type", &format!("multipart/mixed; boundary={boundary}"))
            .send(body)
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(transport_error)?;

        if !(200..300).contains(&status) {
            return Err(error_for_status(status, &text));
        }

        let response_boundary = batch::boundary_from_content_type(&content_type).ok_or_else(|| {
            RemoteError::Decode(format!("batch response without boundary: {content_type:?}"))
        })?;

        Ok(batch::parse_response(&text, &response_boundary, ids))
    }
}

impl MailRemote for GmailClient {
    fn profile(&self) -> Result<ProfileResponse, RemoteError> {
        self.get_json(&self.url("/profile")?)
    }

    fn list_message_ids(
        &self,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<MessagePage, RemoteError> {
        let mut url = self.url("/messages")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("maxResults", &page_size.clamp(1, 500).to_string());
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }

        let list: ListMessagesResponse = self.get_json(&url)?;
        Ok(MessagePage {
            ids: list
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| MessageId::new(m.id))
                .collect(),
            next_page_token: list.next_page_token,
        })
    }

    fn get_message_metadata(&self, id: &MessageId) -> Result<GmailMessage, RemoteError> {
        let mut url = self.url(&format!("/messages/{}", urlencoding::encode(id.as_str())))?;
        url.query_pairs_mut()
            .append_pair("format", "metadata")
            .append_pair("metadataHeaders", "From");
        self.get_json(&url)
    }

    fn batch_get_message_metadata(&self, ids: &[MessageId]) -> Result<BatchResults, RemoteError> {
        match ids {
            [] => Ok(Vec::new()),
            [single] => Ok(vec![(single.clone(), self.get_message_metadata(single))]),
            _ => self.batch_request(ids),
        }
    }

    fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, RemoteError> {
        let mut url = self.url("/history")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("startHistoryId", start_history_id);
            query.append_pair("maxResults", "500");
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }

        let history: HistoryResponse = match self.get_json(&url) {
            Ok(history) => history,
            // Gmail answers 404 once the start position fell out of the retained log
            Err(RemoteError::NotFound) => return Err(RemoteError::HistoryExpired),
            Err(RemoteError::BadRequest(detail)) if detail.contains("istoryId") => {
                return Err(RemoteError::HistoryExpired);
            }
            Err(e) => return Err(e),
        };

        Ok(HistoryPage {
            records: history.history.unwrap_or_default(),
            next_page_token: history.next_page_token,
        })
    }

    fn trash_message(&self, id: &MessageId) -> Result<(), RemoteError> {
        let url = self.url(&format!("/messages/{}/trash", urlencoding::encode(id.as_str())))?;
        let mut response = self
            .agent
            .post(url.as_str())
            .header("Authorization", &self.bearer()?)
            .send_empty()
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(());
        }
        let text = response.body_mut().read_to_string().unwrap_or_default();
        Err(error_for_status(status, &text))
    }
}

fn read_json<T: DeserializeOwned>(mut response: Response<ureq::Body>) -> Result<T, RemoteError> {
    let status = response.status().as_u16();
    let text = response
        .body_mut()
        .read_to_string()
        .map_err(transport_error)?;

    if !(200..300).contains(&status) {
        return Err(error_for_status(status, &text));
    }

    serde_json::from_str(&text).map_err(|e| RemoteError::Decode(e.to_string()))
}

fn transport_error(err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Timeout(_) => RemoteError::Timeout,
        other => RemoteError::Transport(other.to_string()),
    }
}

/// Classify a non-success HTTP status (with its body) into a remote error
pub(super) fn error_for_status(status: u16, body: &str) -> RemoteError {
    let envelope = serde_json::from_str::<ErrorResponse>(body).ok();

    let detail = envelope
        .as_ref()
        .map(|e| e.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(200).collect());

    let reasons: Vec<String> = envelope
        .and_then(|e| e.error.errors)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|d| d.reason)
        .collect();

    match status {
        429 => RemoteError::TooManyRequests,
        403 if reasons.is_empty() || reasons.iter().any(|r| QUOTA_REASONS.contains(&r.as_str())) => {
            RemoteError::Forbidden(detail)
        }
        401 | 403 => RemoteError::PermissionDenied(detail),
        404 => RemoteError::NotFound,
        408 => RemoteError::Timeout,
        400..=499 => RemoteError::BadRequest(detail),
        500..=599 => RemoteError::Server(status),
        _ => RemoteError::Transport(format!("unexpected HTTP {status}: {detail}")),
    }
}
