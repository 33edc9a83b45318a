//! Ordered, retried initialization of named application stores.
//!
//! Stores are registered with a [`StoreConfig`] and an async initializer.
//! Registration rejects duplicate names and any dependency cycle, so a graph
//! that reaches initialization is always acyclic.
//!
//! Per-store state machine:
//!
//! ```text
//! uninitialized -> initializing -> initialized
//!                       |
//!                       v
//!                     error --(critical, retry_count < max_retries, after backoff)--> initializing
//! ```
//!
//! Backoff before a retry is `backoff_base * 2^retry_count`, capped at
//! `backoff_cap`. Non-critical stores are not retried unless
//! [`StorePolicy::retry_non_critical`] is set; their failures are logged and
//! absorbed. Critical failures propagate once retries are exhausted.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture, Shared};
use futures::FutureExt;
use messhub_core::{KeyValueStore, StoreConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::{AppError, Classifiable};
use crate::events::{
    AuthSignedOut, EventManager, StoreFailed, StoreInitialized, StoresInitializationFailed,
    StoresInitialized, StoresReset, StoresResetRequested, Subscription,
};

pub const MAX_RETRIES: u32 = 3;
pub const BACKOFF_BASE: Duration = Duration::from_millis(1_000);
pub const BACKOFF_CAP: Duration = Duration::from_millis(10_000);

const SNAPSHOT_KEY_PREFIX: &str = "messhub.store.";

/// Error type store initializers return.
pub type InitError = Box<dyn std::error::Error + Send + Sync>;

type Initializer = Arc<dyn Fn() -> BoxFuture<'static, Result<(), InitError>> + Send + Sync>;
type InFlight = Shared<BoxFuture<'static, Result<(), StoreError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorePolicy {
    /// Attempts per initialization cycle for stores that retry.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub retry_non_critical: bool,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            backoff_base: BACKOFF_BASE,
            backoff_cap: BACKOFF_CAP,
            retry_non_critical: false,
        }
    }
}

impl StorePolicy {
    #[must_use]
    pub fn backoff(&self, retry_count: u32) -> Duration {
        self.backoff_base
            .saturating_mul(1u32 << retry_count.min(20))
            .min(self.backoff_cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    Uninitialized,
    Initializing,
    Initialized,
    Error,
}

impl std::fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreStatus::Uninitialized => write!(f, "uninitialized"),
            StoreStatus::Initializing => write!(f, "initializing"),
            StoreStatus::Initialized => write!(f, "initialized"),
            StoreStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreState {
    pub status: StoreStatus,
    pub error: Option<String>,
    pub retry_count: u32,
    pub last_initialized: Option<DateTime<Utc>>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            status: StoreStatus::Uninitialized,
            error: None,
            retry_count: 0,
            last_initialized: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    status: StoreStatus,
    last_initialized: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store '{0}' is already registered")]
    Duplicate(String),

    #[error("registering store '{name}' would create a dependency cycle: {}", .path.join(" -> "))]
    Cycle { name: String, path: Vec<String> },

    #[error("store '{0}' is not registered")]
    UnknownStore(String),

    #[error("store '{store}' depends on unregistered store '{dependency}'")]
    UnknownDependency { store: String, dependency: String },

    #[error("store '{store}' failed to initialize after {attempts} attempt(s): {message}")]
    InitializationFailed {
        store: String,
        attempts: u32,
        message: String,
    },
}

impl Classifiable for StoreError {
    fn name(&self) -> &str {
        "StoreInitializationError"
    }
}

struct Entry {
    config: StoreConfig,
    initializer: Initializer,
    state: StoreState,
}

#[derive(Default)]
struct Registry {
    /// Registration order, used to keep the global ordering deterministic.
    order: Vec<String>,
    entries: HashMap<String, Entry>,
    in_flight: HashMap<String, InFlight>,
}

struct Inner {
    events: EventManager,
    policy: StorePolicy,
    persistence: Option<Arc<dyn KeyValueStore>>,
    registry: Mutex<Registry>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let subs = self
            .subscriptions
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for sub in subs.drain(..) {
            sub.unsubscribe();
        }
    }
}

/// Coordinates store registration and initialization. Cloning shares state.
#[derive(Clone)]
pub struct StoreManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry();
        f.debug_struct("StoreManager")
            .field("policy", &self.inner.policy)
            .field("stores", &registry.order)
            .finish_non_exhaustive()
    }
}

impl StoreManager {
    /// Creates a manager and subscribes it to sign-out and reset requests.
    #[must_use]
    pub fn new(
        events: EventManager,
        policy: StorePolicy,
        persistence: Option<Arc<dyn KeyValueStore>>,
    ) -> Self {
        let manager = Self {
            inner: Arc::new(Inner {
                events: events.clone(),
                policy,
                persistence,
                registry: Mutex::new(Registry::default()),
                subscriptions: Mutex::new(Vec::new()),
            }),
        };

        let weak = Arc::downgrade(&manager.inner);
        let on_sign_out = events.on(move |_: AuthSignedOut| reset_from(weak.clone()));
        let weak = Arc::downgrade(&manager.inner);
        let on_reset = events.on(move |_: StoresResetRequested| reset_from(weak.clone()));
        manager
            .inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([on_sign_out, on_reset]);

        manager
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a store and its initializer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if the name is taken, or
    /// [`StoreError::Cycle`] if the new dependency edges would close a cycle.
    /// Nothing is registered in either case.
    pub fn register_store<F, Fut>(
        &self,
        config: StoreConfig,
        initializer: F,
    ) -> Result<(), StoreError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), InitError>> + Send + 'static,
    {
        let mut registry = self.registry();

        if registry.entries.contains_key(&config.name) {
            return Err(StoreError::Duplicate(config.name));
        }
        if let Some(path) = find_cycle(&registry.entries, &config) {
            return Err(StoreError::Cycle {
                name: config.name,
                path,
            });
        }

        tracing::debug!(
            store = %config.name,
            critical = config.critical,
            dependencies = ?config.dependencies,
            "store registered"
        );

        let name = config.name.clone();
        registry.order.push(name.clone());
        registry.entries.insert(
            name,
            Entry {
                config,
                initializer: Arc::new(move || initializer().boxed()),
                state: StoreState::default(),
            },
        );
        Ok(())
    }

    /// Initializes every registered store, dependencies first.
    ///
    /// # Errors
    ///
    /// Returns the first error of a critical store once its retries are
    /// exhausted. Non-critical failures are logged and skipped.
    pub async fn initialize_all_stores(&self) -> Result<(), StoreError> {
        let order = self.initialization_order();
        tracing::info!(stores = order.len(), "initializing stores");

        for name in &order {
            let Err(err) = self.initialize_store(name).await else {
                continue;
            };
            if !self.is_critical(name) {
                tracing::warn!(store = %name, error = %err, "non-critical store unavailable");
                continue;
            }
            tracing::error!(store = %name, error = %err, "critical store failed; aborting startup");
            self.inner
                .events
                .emit(StoresInitializationFailed {
                    store_name: name.clone(),
                    error: err.to_string(),
                })
                .await;
            return Err(err);
        }

        tracing::info!("all stores initialized");
        self.inner
            .events
            .emit(StoresInitialized { stores: order })
            .await;
        Ok(())
    }

    /// Initializes one store after its dependencies. A store that is already
    /// initialized is left alone; concurrent callers share one run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownStore`] for an unregistered name,
    /// [`StoreError::UnknownDependency`] for a dangling dependency, or the
    /// failure of a critical store (this one or a dependency).
    pub async fn initialize_store(&self, name: &str) -> Result<(), StoreError> {
        self.initialize_boxed(name, false).await
    }

    /// With `as_dependency`, a non-critical store whose last cycle failed
    /// counts as settled and is not run again.
    fn initialize_boxed(
        &self,
        name: &str,
        as_dependency: bool,
    ) -> BoxFuture<'static, Result<(), StoreError>> {
        let run = {
            let mut registry = self.registry();
            let Some(entry) = registry.entries.get(name) else {
                return future::ready(Err(StoreError::UnknownStore(name.to_owned()))).boxed();
            };
            let settled = match entry.state.status {
                StoreStatus::Initialized => true,
                StoreStatus::Error => as_dependency && !entry.config.critical,
                _ => false,
            };
            if settled && !registry.in_flight.contains_key(name) {
                return future::ready(Ok(())).boxed();
            }
            if let Some(existing) = registry.in_flight.get(name) {
                existing.clone()
            } else {
                let run = self.clone().run_cycle(name.to_owned()).boxed().shared();
                registry.in_flight.insert(name.to_owned(), run.clone());
                run
            }
        };
        run.boxed()
    }

    async fn run_cycle(self, name: String) -> Result<(), StoreError> {
        let result = self.drive(&name).await;
        self.registry().in_flight.remove(&name);
        result
    }

    async fn drive(&self, name: &str) -> Result<(), StoreError> {
        let (config, initializer) = {
            let mut registry = self.registry();
            let entry = registry
                .entries
                .get_mut(name)
                .ok_or_else(|| StoreError::UnknownStore(name.to_owned()))?;
            if entry.state.status == StoreStatus::Error {
                // a fresh cycle after a terminal failure
                entry.state.retry_count = 0;
            }
            (entry.config.clone(), Arc::clone(&entry.initializer))
        };

        let dependencies = config.dependencies.iter().map(|dependency| {
            let run = self.initialize_boxed(dependency, true);
            async move {
                run.await.map_err(|err| match err {
                    StoreError::UnknownStore(_) => StoreError::UnknownDependency {
                        store: name.to_owned(),
                        dependency: dependency.clone(),
                    },
                    other => other,
                })
            }
        });
        for result in future::join_all(dependencies).await {
            result?;
        }

        let policy = self.inner.policy;
        loop {
            self.update_state(name, |state| {
                state.status = StoreStatus::Initializing;
                state.error = None;
            })?;
            tracing::debug!(store = %name, "initializing store");

            match initializer().await {
                Ok(()) => {
                    let now = Utc::now();
                    self.update_state(name, |state| {
                        state.status = StoreStatus::Initialized;
                        state.last_initialized = Some(now);
                    })?;
                    if config.persist_state {
                        self.write_snapshot(name, now);
                    }
                    tracing::info!(store = %name, "store initialized");
                    self.inner
                        .events
                        .emit(StoreInitialized {
                            store_name: name.to_owned(),
                        })
                        .await;
                    return Ok(());
                }
                Err(err) => {
                    let message = failure_detail(err.as_ref());
                    let retry_count = self.update_state(name, |state| {
                        state.retry_count += 1;
                        state.status = StoreStatus::Error;
                        state.error = Some(message.clone());
                        state.retry_count
                    })?;

                    let retries = config.critical || policy.retry_non_critical;
                    if retries && retry_count < policy.max_retries {
                        let delay = policy.backoff(retry_count);
                        tracing::warn!(
                            store = %name,
                            retry_count,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %message,
                            "store initialization failed; retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    tracing::error!(
                        store = %name,
                        critical = config.critical,
                        attempts = retry_count,
                        error = %message,
                        "store initialization failed"
                    );
                    self.inner
                        .events
                        .emit(StoreFailed {
                            store_name: name.to_owned(),
                            error: message.clone(),
                        })
                        .await;

                    if config.critical {
                        return Err(StoreError::InitializationFailed {
                            store: name.to_owned(),
                            attempts: retry_count,
                            message,
                        });
                    }
                    return Ok(());
                }
            }
        }
    }

    fn update_state<R>(
        &self,
        name: &str,
        apply: impl FnOnce(&mut StoreState) -> R,
    ) -> Result<R, StoreError> {
        let mut registry = self.registry();
        let entry = registry
            .entries
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownStore(name.to_owned()))?;
        Ok(apply(&mut entry.state))
    }

    fn write_snapshot(&self, name: &str, at: DateTime<Utc>) {
        let Some(kv) = &self.inner.persistence else {
            return;
        };
        let snapshot = StoreSnapshot {
            status: StoreStatus::Initialized,
            last_initialized: Some(at),
        };
        let written = serde_json::to_string(&snapshot)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                kv.set_item(&snapshot_key(name), &json)
                    .map_err(|e| e.to_string())
            });
        if let Err(error) = written {
            tracing::warn!(store = %name, %error, "failed to persist store snapshot");
        }
    }

    /// Global order in which stores are initialized: a depth-first post-order
    /// over registration order, so every dependency precedes its dependents.
    #[must_use]
    pub fn initialization_order(&self) -> Vec<String> {
        let registry = self.registry();
        let mut visited = HashSet::new();
        let mut order = Vec::with_capacity(registry.order.len());
        for name in &registry.order {
            post_order(&registry.entries, name, &mut visited, &mut order);
        }
        order
    }

    /// Forces every store back to `uninitialized` and announces `store/reset`.
    /// Initializers are not re-run.
    pub async fn reset_all_stores(&self) {
        let persisted: Vec<String> = {
            let mut registry = self.registry();
            registry
                .entries
                .values_mut()
                .map(|entry| {
                    entry.state = StoreState::default();
                    entry
                })
                .filter(|entry| entry.config.persist_state)
                .map(|entry| entry.config.name.clone())
                .collect()
        };

        if let Some(kv) = &self.inner.persistence {
            for name in &persisted {
                if let Err(error) = kv.remove_item(&snapshot_key(name)) {
                    tracing::warn!(store = %name, %error, "failed to clear store snapshot");
                }
            }
        }

        tracing::info!("stores reset");
        self.inner.events.emit(StoresReset).await;
    }

    #[must_use]
    pub fn get_store_state(&self, name: &str) -> Option<StoreState> {
        self.registry()
            .entries
            .get(name)
            .map(|entry| entry.state.clone())
    }

    /// Every registered store with its state, in registration order.
    #[must_use]
    pub fn store_states(&self) -> Vec<(String, StoreState)> {
        let registry = self.registry();
        registry
            .order
            .iter()
            .filter_map(|name| {
                registry
                    .entries
                    .get(name)
                    .map(|entry| (name.clone(), entry.state.clone()))
            })
            .collect()
    }

    /// True iff every critical store is `initialized`.
    #[must_use]
    pub fn are_critical_stores_initialized(&self) -> bool {
        self.registry()
            .entries
            .values()
            .filter(|entry| entry.config.critical)
            .all(|entry| entry.state.status == StoreStatus::Initialized)
    }

    fn is_critical(&self, name: &str) -> bool {
        self.registry()
            .entries
            .get(name)
            .is_some_and(|entry| entry.config.critical)
    }
}

async fn reset_from(inner: Weak<Inner>) -> Result<(), crate::events::ListenerError> {
    if let Some(inner) = inner.upgrade() {
        StoreManager { inner }.reset_all_stores().await;
    }
    Ok(())
}

fn snapshot_key(name: &str) -> String {
    format!("{SNAPSHOT_KEY_PREFIX}{name}")
}

fn post_order<'a>(
    entries: &'a HashMap<String, Entry>,
    name: &'a str,
    visited: &mut HashSet<&'a str>,
    order: &mut Vec<String>,
) {
    if !visited.insert(name) {
        return;
    }
    let Some(entry) = entries.get(name) else {
        return;
    };
    for dependency in &entry.config.dependencies {
        post_order(entries, dependency, visited, order);
    }
    order.push(name.to_owned());
}

/// Returns the offending path if adding `candidate` closes a cycle.
///
/// The registered graph is acyclic, so any new cycle must pass through the
/// candidate; one depth-first walk from it is enough.
fn find_cycle(entries: &HashMap<String, Entry>, candidate: &StoreConfig) -> Option<Vec<String>> {
    let mut graph: HashMap<&str, &[String]> = entries
        .iter()
        .map(|(name, entry)| (name.as_str(), entry.config.dependencies.as_slice()))
        .collect();
    graph.insert(candidate.name.as_str(), candidate.dependencies.as_slice());

    let mut visited = HashSet::new();
    let mut path = Vec::new();
    if reaches(&graph, &candidate.name, &candidate.name, &mut visited, &mut path) {
        Some(path.into_iter().map(str::to_owned).collect())
    } else {
        None
    }
}

fn reaches<'a>(
    graph: &HashMap<&'a str, &'a [String]>,
    node: &'a str,
    target: &str,
    visited: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> bool {
    path.push(node);
    if let Some(&dependencies) = graph.get(node) {
        for dependency in dependencies {
            if dependency == target {
                path.push(dependency.as_str());
                return true;
            }
            if visited.insert(dependency.as_str())
                && reaches(graph, dependency.as_str(), target, visited, path)
            {
                return true;
            }
        }
    }
    path.pop();
    false
}

/// Text recorded for a failed initializer: the technical detail of the first
/// classified error in the source chain, else the error's own message.
fn failure_detail(err: &(dyn std::error::Error + 'static)) -> String {
    let mut current = Some(err);
    while let Some(cause) = current {
        if let Some(technical) = cause
            .downcast_ref::<AppError>()
            .and_then(|app| app.technical.as_ref())
        {
            return technical.clone();
        }
        current = cause.source();
    }
    err.to_string()
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
