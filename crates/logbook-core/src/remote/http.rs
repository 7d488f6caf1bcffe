//! HTTP client for the Logbook records API.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::{
    DeleteOutcome, ListFilter, RecordPayload, RemoteError, RemoteRecord, RemoteResult,
    RemoteService,
};
use crate::error::{Error, Result};
use crate::models::RemoteId;
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// [`RemoteService`] backed by the REST records API.
#[derive(Clone)]
pub struct HttpRemoteService {
    base_url: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteService {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteService")
            .field("base_url", &self.base_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl HttpRemoteService {
    /// Builds a client for an explicit API base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = normalize_base_url(&base_url.into())?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::InvalidInput(format!("Failed to build HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            access_token: None,
            client,
        })
    }

    /// Uses the given bearer token for every request.
    #[must_use]
    pub fn with_access_token(mut self, access_token: Option<String>) -> Self {
        self.access_token = normalize_text_option(access_token);
        self
    }

    /// Returns the base URL this client was configured with.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn record_url(&self, remote_id: &RemoteId) -> String {
        format!(
            "{}/v1/records/{}",
            self.base_url,
            urlencoding::encode(remote_id.as_str())
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self.authorize(request).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn create(&self, payload: &RecordPayload) -> RemoteResult<RemoteId> {
        let url = format!("{}/v1/records", self.base_url);
        let response = self.send(self.client.post(url).json(payload)).await?;
        let created = response.json::<CreatedResponse>().await?;
        normalize_text_option(Some(created.remote_id))
            .map(RemoteId::new)
            .ok_or_else(|| RemoteError::InvalidPayload("create returned an empty id".to_string()))
    }

    async fn update(&self, remote_id: &RemoteId, payload: &RecordPayload) -> RemoteResult<()> {
        let url = self.record_url(remote_id);
        self.send(self.client.put(url).json(payload)).await?;
        Ok(())
    }

    async fn delete(&self, remote_id: &RemoteId) -> RemoteResult<DeleteOutcome> {
        let url = self.record_url(remote_id);
        match self.send(self.client.delete(url)).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(RemoteError::Api { status: 404, .. }) => Ok(DeleteOutcome::NotFound),
            Err(error) => Err(error),
        }
    }

    async fn list(&self, filter: &ListFilter) -> RemoteResult<Vec<RemoteRecord>> {
        let mut url = format!("{}/v1/records", self.base_url);
        if let Some(since) = filter.modified_since {
            url.push_str(&format!("?since={since}"));
        }
        let response = self.send(self.client.get(url)).await?;
        let body = response.text().await?;
        parse_list_response(&body)
    }

    async fn attach(
        &self,
        remote_id: &RemoteId,
        bytes: &[u8],
        mime_type: &str,
    ) -> RemoteResult<String> {
        let url = format!("{}/attachment", self.record_url(remote_id));
        let request = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(bytes.to_vec());
        let response = self.send(request).await?;
        let attached = response.json::<AttachedResponse>().await?;
        normalize_text_option(Some(attached.attachment_ref)).ok_or_else(|| {
            RemoteError::InvalidPayload("attach returned an empty reference".to_string())
        })
    }
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    remote_id: String,
}

#[derive(Debug, Deserialize)]
struct AttachedResponse {
    attachment_ref: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    records: Vec<RemoteRecord>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_list_response(body: &str) -> RemoteResult<Vec<RemoteRecord>> {
    let payload: ListResponse = serde_json::from_str(body)
        .map_err(|error| RemoteError::InvalidPayload(format!("invalid records listing: {error}")))?;
    Ok(payload.records)
}

async fn error_from_response(response: Response) -> RemoteError {
    let status = response.status();
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return RemoteError::Unauthorized;
    }
    let body = response.text().await.unwrap_or_default();
    RemoteError::Api {
        status: status.as_u16(),
        message: parse_api_error(&body),
    }
}

fn parse_api_error(body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return compact_text(&message);
        }
    }
    compact_text(body)
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let base = raw.trim().trim_end_matches('/').to_string();
    if base.is_empty() {
        return Err(Error::InvalidInput(
            "API base URL must not be empty".to_string(),
        ));
    }
    if !is_http_url(&base) {
        return Err(Error::InvalidInput(
            "API base URL must include http:// or https://".to_string(),
        ));
    }
    Ok(base)
}
