//! HTTP client for the hosted backend's REST surface.
//!
//! Table reads and writes go to `/rest/v1`, stored procedures to
//! `/rest/v1/rpc`, object storage to `/storage/v1` and authentication to
//! `/auth/v1`. Every request carries the public `apikey` header and a bearer
//! token: the signed-in session's access token when there is one, otherwise
//! the anon key. Non-2xx responses are decoded from the backend's error
//! envelope into [`BackendError::Api`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use messhub_core::{AppConfig, KeyValueStore, Page};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::auth::Session;
use crate::error::BackendError;
use crate::query::Query;
use crate::realtime::{ChangeFeed, ChangeFilter, ChangeKind, ChangeSubscription, LocalChangeFeed};

/// Table, RPC and change-feed operations the domain services depend on.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// # Errors
    ///
    /// Returns [`BackendError`] on transport, status or decoding failure.
    async fn select(&self, query: &Query) -> Result<Vec<Value>, BackendError>;

    /// Like [`select`](Self::select), also asking for the exact row count.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] on transport, status or decoding failure.
    async fn select_with_count(&self, query: &Query) -> Result<Page<Value>, BackendError>;

    /// Exactly one row. No match is an [`BackendError::Api`] whose
    /// [`is_not_found`](BackendError::is_not_found) is true.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] on transport, status or decoding failure.
    async fn single(&self, query: &Query) -> Result<Value, BackendError>;

    /// Inserts one row and returns it as stored.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] on transport, status or decoding failure.
    async fn insert(&self, table: &str, row: Value) -> Result<Value, BackendError>;

    /// Applies `patch` to every row the query's filters match.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] on transport, status or decoding failure.
    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>, BackendError>;

    /// # Errors
    ///
    /// Returns [`BackendError`] on transport, status or decoding failure.
    async fn rpc(&self, function: &str, params: Value) -> Result<Value, BackendError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorEnvelope {
    code: Option<String>,
    message: Option<String>,
    msg: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

/// Decodes a non-2xx body into [`BackendError::Api`], tolerating bodies that
/// are not JSON.
pub(crate) fn api_error(status: u16, body: &str) -> BackendError {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let message = envelope
        .message
        .or(envelope.msg)
        .or(envelope.error_description)
        .or_else(|| envelope.error.clone())
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("HTTP {status}")
            } else {
                body.trim().to_owned()
            }
        });

    BackendError::Api {
        status,
        code: envelope
            .code
            .or(envelope.error)
            .unwrap_or_else(|| status.to_string()),
        message,
        details: envelope.details,
        hint: envelope.hint,
    }
}

/// Total from a `Content-Range: 0-9/42` header; `*` means unknown.
fn parse_total(content_range: Option<&str>) -> Option<u64> {
    content_range?.split('/').nth(1)?.trim().parse().ok()
}

pub(crate) const SESSION_KEY: &str = "messhub.auth.session";

/// REST implementation of every backend contract in this crate.
pub struct RestBackend {
    client: Client,
    base_url: Url,
    anon_key: String,
    timeout_ms: u64,
    pub(crate) session: watch::Sender<Option<Session>>,
    pub(crate) kv: Arc<dyn KeyValueStore>,
    feed: LocalChangeFeed,
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base_url", &self.base_url.as_str())
            .field("anon_key", &"[redacted]")
            .field("signed_in", &self.session.borrow().is_some())
            .finish_non_exhaustive()
    }
}

impl RestBackend {
    /// Creates a client for the backend at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`BackendError::InvalidUrl`] if `base_url`
    /// is not a valid URL.
    pub fn new(
        base_url: &str,
        anon_key: &str,
        timeout_secs: u64,
        kv: Arc<dyn KeyValueStore>,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("messhub/0.1")
            .build()?;

        // Url::join replaces the last segment unless the base ends with '/'.
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised)
            .map_err(|e| BackendError::InvalidUrl(format!("{base_url}: {e}")))?;

        let (session, _) = watch::channel(None);
        Ok(Self {
            client,
            base_url,
            anon_key: anon_key.to_owned(),
            timeout_ms: timeout_secs.saturating_mul(1_000),
            session,
            kv,
            feed: LocalChangeFeed::new(),
        })
    }

    /// # Errors
    ///
    /// See [`RestBackend::new`].
    pub fn from_config(
        config: &AppConfig,
        kv: Arc<dyn KeyValueStore>,
    ) -> Result<Self, BackendError> {
        Self::new(
            &config.backend_url,
            &config.backend_anon_key,
            config.request_timeout_secs,
            kv,
        )
    }

    /// Change feed that writes made through this client are published to.
    #[must_use]
    pub fn change_feed(&self) -> &LocalChangeFeed {
        &self.feed
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::InvalidUrl(format!("{path}: {e}")))
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let token = self
            .session
            .borrow()
            .as_ref()
            .map_or_else(|| self.anon_key.clone(), |s| s.access_token.clone());
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    /// Sends a request and asserts a 2xx status.
    pub(crate) async fn send(
        &self,
        request: RequestBuilder,
        operation: &str,
    ) -> Result<Response, BackendError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout {
                    operation: operation.to_owned(),
                    after_ms: self.timeout_ms,
                }
            } else {
                BackendError::Http(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let err = api_error(status.as_u16(), &body);
        tracing::debug!(
            operation,
            status = status.as_u16(),
            error = %err,
            "backend request failed"
        );
        Err(err)
    }

    pub(crate) async fn read_json<T: DeserializeOwned>(
        response: Response,
        context: &str,
    ) -> Result<T, BackendError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| BackendError::deserialize(context, e))
    }

    fn table_url(&self, table: &str) -> Result<Url, BackendError> {
        self.endpoint(&format!("rest/v1/{table}"))
    }
}

#[async_trait]
impl RemoteBackend for RestBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, BackendError> {
        let operation = format!("select {}", query.table_name());
        let request = self
            .request(Method::GET, self.table_url(query.table_name())?)
            .query(&query.to_pairs());
        let response = self.send(request, &operation).await?;
        Self::read_json(response, &operation).await
    }

    async fn select_with_count(&self, query: &Query) -> Result<Page<Value>, BackendError> {
        let operation = format!("select {} with count", query.table_name());
        let request = self
            .request(Method::GET, self.table_url(query.table_name())?)
            .query(&query.to_pairs())
            .header("Prefer", "count=exact");
        let response = self.send(request, &operation).await?;
        let total = parse_total(
            response
                .headers()
                .get("content-range")
                .and_then(|v| v.to_str().ok()),
        );
        let items = Self::read_json(response, &operation).await?;
        Ok(Page { items, total })
    }

    async fn single(&self, query: &Query) -> Result<Value, BackendError> {
        let operation = format!("single {}", query.table_name());
        let request = self
            .request(Method::GET, self.table_url(query.table_name())?)
            .query(&query.to_pairs())
            .header("Accept", "application/vnd.pgrst.object+json");
        let response = self.send(request, &operation).await?;
        Self::read_json(response, &operation).await
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, BackendError> {
        let operation = format!("insert {table}");
        let request = self
            .request(Method::POST, self.table_url(table)?)
            .header("Prefer", "return=representation")
            .json(&row);
        let response = self.send(request, &operation).await?;
        let rows: Vec<Value> = Self::read_json(response, &operation).await?;
        let stored = rows.into_iter().next().ok_or_else(|| BackendError::Api {
            status: 200,
            code: "EMPTY_INSERT".to_owned(),
            message: format!("{operation} returned no row"),
            details: None,
            hint: None,
        })?;

        self.feed.publish(table, ChangeKind::Insert, &stored);
        tracing::debug!(table, "row inserted");
        Ok(stored)
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>, BackendError> {
        let table = query.table_name();
        let operation = format!("update {table}");
        let request = self
            .request(Method::PATCH, self.table_url(table)?)
            .query(&query.filter_pairs())
            .header("Prefer", "return=representation")
            .json(&patch);
        let response = self.send(request, &operation).await?;
        let rows: Vec<Value> = Self::read_json(response, &operation).await?;

        for row in &rows {
            self.feed.publish(table, ChangeKind::Update, row);
        }
        tracing::debug!(table, rows = rows.len(), "rows updated");
        Ok(rows)
    }

    async fn rpc(&self, function: &str, params: Value) -> Result<Value, BackendError> {
        let operation = format!("rpc {function}");
        let request = self
            .request(Method::POST, self.endpoint(&format!("rest/v1/rpc/{function}"))?)
            .json(&params);
        let response = self.send(request, &operation).await?;
        Self::read_json(response, &operation).await
    }
}

impl ChangeFeed for RestBackend {
    fn channel(&self, name: &str, table: &str, filter: Option<ChangeFilter>) -> ChangeSubscription {
        self.feed.channel(name, table, filter)
    }

    fn remove_channel(&self, name: &str) {
        self.feed.remove_channel(name);
    }
}
