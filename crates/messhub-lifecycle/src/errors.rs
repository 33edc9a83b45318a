//! Error normalization for the UI layer.
//!
//! [`ErrorManager::process_error`] turns any [`Classifiable`] failure into an
//! [`AppError`]: a category from a small closed taxonomy, a user-facing
//! message, diagnostic detail, and an ordered list of recovery actions. Each
//! processed error is logged and announced on the bus as `store/error`.
//!
//! Classification is substring based on the error's name and message, checked
//! in order: `auth`, then `network`/`fetch`/`timeout`, then `store`. Anything
//! else is [`ErrorType::Unknown`].
//!
//! A second error of the same category inside the throttle window is refused
//! with [`ThrottledError`] without building or publishing anything.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::time::Instant;

use crate::events::{
    AuthSignOutRequested, ConnectionCheckRequested, EventManager, RetryRequested, StoreFailed,
    StoresResetRequested,
};

pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    Network,
    Auth,
    StoreInitialization,
    Unknown,
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorType::Network => write!(f, "NETWORK"),
            ErrorType::Auth => write!(f, "AUTH"),
            ErrorType::StoreInitialization => write!(f, "STORE_INITIALIZATION"),
            ErrorType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ErrorType {
    fn severity(self) -> ErrorSeverity {
        match self {
            ErrorType::Network => ErrorSeverity::Warning,
            ErrorType::Auth | ErrorType::Unknown => ErrorSeverity::Error,
            ErrorType::StoreInitialization => ErrorSeverity::Critical,
        }
    }

    fn user_message(self) -> &'static str {
        match self {
            ErrorType::Network => "Unable to connect. Please check your internet connection.",
            ErrorType::Auth => "Your session has expired. Please sign in again.",
            ErrorType::StoreInitialization => "We couldn't load your data. Please try again.",
            ErrorType::Unknown => "Something went wrong. Please try again.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A failure that can be fed to [`ErrorManager::process_error`].
pub trait Classifiable: std::fmt::Display {
    /// Short type-like name, e.g. `"NetworkError"`.
    fn name(&self) -> &str;
}

/// A plain name/message pair for errors with no richer type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawError {
    pub name: String,
    pub message: String,
}

impl RawError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RawError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RawError {}

impl Classifiable for RawError {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Metadata attached to a failure before classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub operation: String,
    pub entity_id: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn entity(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.extra.insert(key.into(), value.to_string());
        self
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation={}", self.operation)?;
        if let Some(id) = &self.entity_id {
            write!(f, " entity={id}")?;
        }
        for (key, value) in &self.extra {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

type ActionFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A labelled asynchronous step the UI can offer as a button.
#[derive(Clone)]
pub struct RecoveryAction {
    pub label: String,
    action: ActionFn,
}

impl RecoveryAction {
    pub fn new<F, Fut>(label: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            label: label.into(),
            action: Arc::new(move || action().boxed()),
        }
    }

    pub async fn run(&self) {
        (self.action)().await;
    }
}

impl std::fmt::Debug for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryAction")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Normalized, user-facing error.
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: ErrorType,
    pub severity: ErrorSeverity,
    pub message: String,
    /// Diagnostic detail; not for end users.
    pub technical: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub recovery_actions: Vec<RecoveryAction>,
}

impl AppError {
    #[must_use]
    pub fn action_labels(&self) -> Vec<&str> {
        self.recovery_actions
            .iter()
            .map(|a| a.label.as_str())
            .collect()
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for AppError {}

impl Classifiable for AppError {
    fn name(&self) -> &str {
        "AppError"
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("error processing throttled: {kind} error already handled within {window_ms}ms")]
pub struct ThrottledError {
    pub kind: ErrorType,
    pub window_ms: u64,
}

/// Picks the taxonomy bucket for an error name and message.
#[must_use]
pub fn classify(name: &str, message: &str) -> ErrorType {
    let haystack = format!("{name} {message}").to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| haystack.contains(n));

    if has(&["auth"]) {
        ErrorType::Auth
    } else if has(&["network", "fetch", "timeout"]) {
        ErrorType::Network
    } else if has(&["store"]) {
        ErrorType::StoreInitialization
    } else {
        ErrorType::Unknown
    }
}

struct Inner {
    events: EventManager,
    throttle_window: Duration,
    last_processed: Mutex<HashMap<ErrorType, Instant>>,
}

/// Shared error normalizer. Cloning shares the throttle state.
#[derive(Clone)]
pub struct ErrorManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ErrorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorManager")
            .field("throttle_window", &self.inner.throttle_window)
            .finish_non_exhaustive()
    }
}

impl ErrorManager {
    #[must_use]
    pub fn new(events: EventManager) -> Self {
        Self::with_throttle_window(events, DEFAULT_THROTTLE_WINDOW)
    }

    #[must_use]
    pub fn with_throttle_window(events: EventManager, throttle_window: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                events,
                throttle_window,
                last_processed: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Classifies `error`, logs it and publishes `store/error`.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottledError`] when an error of the same category was
    /// processed within the throttle window.
    pub async fn process_error<E>(&self, error: &E) -> Result<AppError, ThrottledError>
    where
        E: Classifiable + ?Sized,
    {
        self.process_error_with_context(error, None).await
    }

    /// Like [`process_error`](Self::process_error), folding `context` into the
    /// diagnostic detail and the published event.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottledError`] when an error of the same category was
    /// processed within the throttle window.
    pub async fn process_error_with_context<E>(
        &self,
        error: &E,
        context: Option<&ErrorContext>,
    ) -> Result<AppError, ThrottledError>
    where
        E: Classifiable + ?Sized,
    {
        let message = error.to_string();
        let kind = classify(error.name(), &message);
        self.check_throttle(kind)?;

        let technical = match context {
            Some(ctx) => format!("{}: {message} [{ctx}]", error.name()),
            None => format!("{}: {message}", error.name()),
        };

        let app_error = AppError {
            kind,
            severity: kind.severity(),
            message: kind.user_message().to_owned(),
            technical: Some(technical),
            timestamp: Utc::now(),
            recovery_actions: self.recovery_actions(kind),
        };

        tracing::error!(
            kind = %app_error.kind,
            severity = ?app_error.severity,
            technical = app_error.technical.as_deref().unwrap_or_default(),
            "{}",
            app_error.message
        );

        let store_name = context
            .and_then(|ctx| ctx.extra.get("store").cloned())
            .unwrap_or_else(|| "app".to_owned());
        self.inner
            .events
            .emit(StoreFailed {
                store_name,
                error: format!("An error occurred: {message}"),
            })
            .await;

        Ok(app_error)
    }

    fn check_throttle(&self, kind: ErrorType) -> Result<(), ThrottledError> {
        let now = Instant::now();
        let mut last = self
            .inner
            .last_processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(previous) = last.get(&kind) {
            if now.duration_since(*previous) < self.inner.throttle_window {
                tracing::debug!(kind = %kind, "error processing throttled");
                return Err(ThrottledError {
                    kind,
                    window_ms: u64::try_from(self.inner.throttle_window.as_millis())
                        .unwrap_or(u64::MAX),
                });
            }
        }
        last.insert(kind, now);
        Ok(())
    }

    fn recovery_actions(&self, kind: ErrorType) -> Vec<RecoveryAction> {
        let events = &self.inner.events;
        match kind {
            ErrorType::Network => vec![
                retry_action(events),
                emit_action(events, "Check Connection", ConnectionCheckRequested),
            ],
            ErrorType::Auth => vec![emit_action(events, "Sign In Again", AuthSignOutRequested)],
            ErrorType::StoreInitialization => vec![
                emit_action(events, "Reset Stores", StoresResetRequested),
                retry_action(events),
            ],
            ErrorType::Unknown => vec![retry_action(events)],
        }
    }
}

fn retry_action(events: &EventManager) -> RecoveryAction {
    emit_action(events, "Try Again", RetryRequested)
}

fn emit_action<E: crate::events::Event>(
    events: &EventManager,
    label: &str,
    payload: E,
) -> RecoveryAction {
    let events = events.clone();
    RecoveryAction::new(label, move || {
        let events = events.clone();
        let payload = payload.clone();
        async move { events.emit(payload).await }
    })
}
