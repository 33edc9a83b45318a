//! Typed in-process publish/subscribe bus.
//!
//! Every event is a payload type implementing [`Event`]; its associated
//! [`EventName`] is the registry key. Because listeners are registered and
//! invoked through the same payload type, a listener can only ever receive
//! the payload shape declared for its event.
//!
//! [`EventManager::emit`] runs every listener for an event concurrently and
//! waits for all of them to settle. A listener that returns an error or
//! panics is logged and skipped; it never prevents the other listeners from
//! running and never fails the emission.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use uuid::Uuid;

/// Error type listeners report back to the bus.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

type ErasedListener = Arc<
    dyn Fn(&(dyn Any + Send + Sync)) -> BoxFuture<'static, Result<(), ListenerError>>
        + Send
        + Sync,
>;

/// Closed set of event names understood by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    AuthCompleted,
    AuthSignedOut,
    AuthSignOutRequested,
    MembershipRenewalRequested,
    MembershipRenewalUpdated,
    MembershipError,
    StoreInitialized,
    StoreError,
    StoreReset,
    StoresResetRequested,
    StoresInitialized,
    StoresInitializationFailed,
    AppRetryRequested,
    NetworkCheckRequested,
}

impl EventName {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::AuthCompleted => "auth/completed",
            EventName::AuthSignedOut => "auth/signed_out",
            EventName::AuthSignOutRequested => "auth/sign_out_requested",
            EventName::MembershipRenewalRequested => "membership/renewal_requested",
            EventName::MembershipRenewalUpdated => "membership/renewal_updated",
            EventName::MembershipError => "membership/error",
            EventName::StoreInitialized => "store/initialized",
            EventName::StoreError => "store/error",
            EventName::StoreReset => "store/reset",
            EventName::StoresResetRequested => "stores/reset_requested",
            EventName::StoresInitialized => "stores/initialized",
            EventName::StoresInitializationFailed => "stores/initialization_failed",
            EventName::AppRetryRequested => "app/retry_requested",
            EventName::NetworkCheckRequested => "network/check_requested",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload type bound to exactly one [`EventName`].
pub trait Event: Clone + Send + Sync + 'static {
    const NAME: EventName;
}

macro_rules! bind_event {
    ($($payload:ty => $name:ident),* $(,)?) => {
        $(impl Event for $payload {
            const NAME: EventName = EventName::$name;
        })*
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCompleted {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSignedOut;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSignOutRequested;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalRequested {
    pub request_id: Uuid,
    pub member_id: Uuid,
    pub mess_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalUpdated {
    pub request_id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipFailed {
    pub operation: String,
    pub entity_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInitialized {
    pub store_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFailed {
    pub store_name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoresReset;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoresResetRequested;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoresInitialized {
    pub stores: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoresInitializationFailed {
    pub store_name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRequested;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCheckRequested;

bind_event! {
    AuthCompleted => AuthCompleted,
    AuthSignedOut => AuthSignedOut,
    AuthSignOutRequested => AuthSignOutRequested,
    RenewalRequested => MembershipRenewalRequested,
    RenewalUpdated => MembershipRenewalUpdated,
    MembershipFailed => MembershipError,
    StoreInitialized => StoreInitialized,
    StoreFailed => StoreError,
    StoresReset => StoreReset,
    StoresResetRequested => StoresResetRequested,
    StoresInitialized => StoresInitialized,
    StoresInitializationFailed => StoresInitializationFailed,
    RetryRequested => AppRetryRequested,
    ConnectionCheckRequested => NetworkCheckRequested,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<EventName, HashMap<u64, ErasedListener>>,
}

/// Handle returned by [`EventManager::on`].
///
/// Dropping the handle does not remove the listener; call
/// [`Subscription::unsubscribe`] (or [`EventManager::off`]). Unsubscribing
/// more than once is a no-op.
#[derive(Debug, Clone)]
pub struct Subscription {
    event: EventName,
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    #[must_use]
    pub fn event(&self) -> EventName {
        self.event
    }

    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(listeners) = registry.listeners.get_mut(&self.event) {
            listeners.remove(&self.id);
            if listeners.is_empty() {
                registry.listeners.remove(&self.event);
            }
        }
    }
}

/// Process-wide event bus. Cloning shares the same listener registry.
#[derive(Clone, Default)]
pub struct EventManager {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let total: usize = registry.listeners.values().map(HashMap::len).sum();
        f.debug_struct("EventManager")
            .field("listeners", &total)
            .finish()
    }
}

impl EventManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for events of payload type `E`.
    pub fn on<E, F, Fut>(&self, listener: F) -> Subscription
    where
        E: Event,
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        let erased: ErasedListener = Arc::new(move |payload: &(dyn Any + Send + Sync)| {
            match payload.downcast_ref::<E>() {
                Some(payload) => listener(payload.clone()).boxed(),
                None => future::ready(Err::<(), ListenerError>(
                    format!("payload type mismatch for {}", E::NAME).into(),
                ))
                .boxed(),
            }
        });

        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .listeners
            .entry(E::NAME)
            .or_default()
            .insert(id, erased);

        tracing::debug!(event = %E::NAME, id, "listener registered");

        Subscription {
            event: E::NAME,
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Equivalent to [`Subscription::unsubscribe`].
    pub fn off(&self, subscription: &Subscription) {
        subscription.unsubscribe();
    }

    /// Delivers `payload` to every listener registered for `E` and waits for
    /// all of them to settle.
    pub async fn emit<E: Event>(&self, payload: E) {
        let listeners: Vec<(u64, ErasedListener)> = {
            let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry
                .listeners
                .get(&E::NAME)
                .map(|map| map.iter().map(|(id, l)| (*id, Arc::clone(l))).collect())
                .unwrap_or_default()
        };

        if listeners.is_empty() {
            tracing::trace!(event = %E::NAME, "no listeners");
            return;
        }

        let payload: Arc<dyn Any + Send + Sync> = Arc::new(payload);
        let runs = listeners.into_iter().map(|(id, listener)| {
            let payload = Arc::clone(&payload);
            async move {
                let started =
                    std::panic::catch_unwind(AssertUnwindSafe(|| listener(payload.as_ref())));
                let outcome = match started {
                    Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                    Err(panic) => Err(panic),
                };
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::error!(
                            event = %E::NAME,
                            id,
                            error = %err,
                            "event listener failed"
                        );
                    }
                    Err(_) => {
                        tracing::error!(event = %E::NAME, id, "event listener panicked");
                    }
                }
            }
        });

        future::join_all(runs).await;
    }

    /// Removes every listener for one event.
    pub fn clear_event(&self, event: EventName) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.listeners.remove(&event);
    }

    /// Removes every listener for every event.
    pub fn clear_all(&self) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.listeners.clear();
    }

    #[must_use]
    pub fn listener_count(&self, event: EventName) -> usize {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.listeners.get(&event).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn explode() -> Result<(), ListenerError> {
        panic!("listener exploded")
    }

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    #[tokio::test]
    async fn emit_reaches_every_listener_once() {
        let bus = EventManager::new();
        let hits = counter();

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            let _ = bus.on(move |_: StoreInitialized| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        bus.emit(StoreInitialized {
            store_name: "session".to_owned(),
        })
        .await;

        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn listener_receives_its_payload() {
        let bus = EventManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _ = bus.on(move |event: AuthCompleted| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(event.user_id);
                Ok(())
            }
        });

        bus.emit(AuthCompleted {
            user_id: "user-1".to_owned(),
        })
        .await;
        // other events never reach the auth listener
        bus.emit(AuthSignedOut).await;

        assert_eq!(*seen.lock().unwrap(), vec!["user-1".to_owned()]);
    }

    #[tokio::test]
    async fn failing_and_panicking_listeners_do_not_block_others() {
        let bus = EventManager::new();
        let hits = counter();

        let _ = bus.on(|_: StoresReset| async { Err::<(), ListenerError>("boom".into()) });
        let _ = bus.on(|_: StoresReset| async { explode() });
        let h = Arc::clone(&hits);
        let _ = bus.on(move |_: StoresReset| {
            let h = Arc::clone(&h);
            async move {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.emit(StoresReset).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = EventManager::new();
        let hits = counter();
        let h = Arc::clone(&hits);
        let sub = bus.on(move |_: RetryRequested| {
            let h = Arc::clone(&h);
            async move {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        assert_eq!(bus.listener_count(EventName::AppRetryRequested), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        bus.off(&sub);

        bus.emit(RetryRequested).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(EventName::AppRetryRequested), 0);
    }

    #[tokio::test]
    async fn clear_event_and_clear_all() {
        let bus = EventManager::new();
        let _ = bus.on(|_: StoresReset| async { Ok(()) });
        let _ = bus.on(|_: StoresReset| async { Ok(()) });
        let _ = bus.on(|_: AuthSignedOut| async { Ok(()) });

        bus.clear_event(EventName::StoreReset);
        assert_eq!(bus.listener_count(EventName::StoreReset), 0);
        assert_eq!(bus.listener_count(EventName::AuthSignedOut), 1);

        bus.clear_all();
        assert_eq!(bus.listener_count(EventName::AuthSignedOut), 0);
    }

    #[tokio::test]
    async fn listeners_run_concurrently() {
        let bus = EventManager::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = Arc::new(tokio::sync::Mutex::new(Some(rx)));
        let tx = Arc::new(Mutex::new(Some(tx)));

        // first listener waits for the second; sequential delivery would deadlock
        let _ = bus.on(move |_: ConnectionCheckRequested| {
            let rx = Arc::clone(&rx);
            async move {
                if let Some(rx) = rx.lock().await.take() {
                    rx.await?;
                }
                Ok(())
            }
        });
        let _ = bus.on(move |_: ConnectionCheckRequested| {
            let tx = Arc::clone(&tx);
            async move {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
                Ok(())
            }
        });

        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            bus.emit(ConnectionCheckRequested),
        )
        .await
        .expect("emit should settle");
    }

    #[test]
    fn event_names_are_stable() {
        assert_eq!(EventName::AuthCompleted.as_str(), "auth/completed");
        assert_eq!(EventName::StoreError.to_string(), "store/error");
        assert_eq!(<StoreFailed as Event>::NAME, EventName::StoreError);
    }
}
