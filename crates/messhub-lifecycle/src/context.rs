use std::sync::Arc;
use std::time::Duration;

use messhub_core::{AppConfig, KeyValueStore};

use crate::errors::ErrorManager;
use crate::events::EventManager;
use crate::retry::RetryPolicy;
use crate::store::{StoreManager, StorePolicy};

/// The one set of lifecycle coordinators a process shares.
///
/// Production wiring builds a single `Lifecycle` and hands clones to every
/// service; tests build their own so registries never leak between cases.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    pub events: EventManager,
    pub errors: ErrorManager,
    pub stores: StoreManager,
    /// Retry policy for domain-service remote calls.
    pub retry: RetryPolicy,
}

impl Default for Lifecycle {
    fn default() -> Self {
        let events = EventManager::new();
        Self {
            errors: ErrorManager::new(events.clone()),
            stores: StoreManager::new(events.clone(), StorePolicy::default(), None),
            retry: RetryPolicy::default(),
            events,
        }
    }
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_config(config: &AppConfig, persistence: Option<Arc<dyn KeyValueStore>>) -> Self {
        let events = EventManager::new();
        let store_policy = StorePolicy {
            max_retries: config.store_max_retries,
            backoff_base: Duration::from_millis(config.store_backoff_base_ms),
            backoff_cap: Duration::from_millis(config.store_backoff_cap_ms),
            retry_non_critical: false,
        };

        Self {
            errors: ErrorManager::with_throttle_window(
                events.clone(),
                Duration::from_millis(config.error_throttle_ms),
            ),
            stores: StoreManager::new(events.clone(), store_policy, persistence),
            retry: RetryPolicy::new(
                config.retry_max_attempts,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
            events,
        }
    }

    /// Replaces the remote-call retry policy, typically with zero delays in tests.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
