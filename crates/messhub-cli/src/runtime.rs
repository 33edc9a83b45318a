//! Process wiring shared by every subcommand.
//!
//! One [`Runtime`] owns the lifecycle coordinators, the REST backend and the
//! membership service. Starting it registers the stores listed in the
//! manifest and initializes them before any command body runs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use messhub_backend::{AuthClient, RestBackend};
use messhub_core::{load_store_manifest, AppConfig, FileKeyValueStore, KeyValueStore};
use messhub_lifecycle::events::{AuthSignOutRequested, AuthSignedOut, StoreFailed};
use messhub_lifecycle::{Lifecycle, ListenerError, Subscription};
use messhub_membership::MembershipService;
use uuid::Uuid;

use crate::stores::{self, MemberCache};

pub(crate) struct Runtime {
    pub(crate) lifecycle: Lifecycle,
    pub(crate) backend: Arc<RestBackend>,
    pub(crate) membership: MembershipService<RestBackend>,
    pub(crate) cache: Arc<MemberCache>,
    pub(crate) mess: Option<Uuid>,
    _subscriptions: Vec<Subscription>,
}

impl Runtime {
    /// Builds the process context and initializes every manifest store.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory, backend client or manifest
    /// cannot be set up, or if a critical store fails to initialize.
    pub(crate) async fn start(config: AppConfig, mess: Option<Uuid>) -> anyhow::Result<Self> {
        let kv: Arc<dyn KeyValueStore> = Arc::new(
            FileKeyValueStore::open(&config.state_dir).with_context(|| {
                format!("failed to open state dir {}", config.state_dir.display())
            })?,
        );
        let lifecycle = Lifecycle::from_config(&config, Some(Arc::clone(&kv)));
        let backend = Arc::new(RestBackend::from_config(&config, kv)?);
        let membership = MembershipService::new(Arc::clone(&backend), &lifecycle)
            .with_lookup_timeout(config.lookup_timeout_ms.map(Duration::from_millis));

        let subscriptions = wire_listeners(&lifecycle, &backend);

        let runtime = Self {
            lifecycle,
            backend,
            membership,
            cache: Arc::new(MemberCache::default()),
            mess,
            _subscriptions: subscriptions,
        };

        let manifest = load_store_manifest(&config.stores_path)?;
        stores::register_manifest_stores(&runtime, &manifest)?;
        runtime.lifecycle.stores.initialize_all_stores().await?;

        tracing::info!(
            env = %config.env,
            stores = manifest.stores.len(),
            "runtime started"
        );
        Ok(runtime)
    }

    /// Member the command acts on: the explicit id, else the signed-in user.
    pub(crate) fn member(&self, explicit: Option<Uuid>) -> anyhow::Result<Uuid> {
        explicit
            .or_else(|| self.backend.session().map(|s| s.user.id))
            .ok_or_else(|| anyhow::anyhow!("not signed in; run `sign-in` or pass --member"))
    }

    pub(crate) fn mess(&self) -> anyhow::Result<Uuid> {
        self.mess
            .ok_or_else(|| anyhow::anyhow!("no mess selected; pass --mess or set MESSHUB_MESS_ID"))
    }
}

/// Routes recovery-action events to the backend and logs store failures.
fn wire_listeners(lifecycle: &Lifecycle, backend: &Arc<RestBackend>) -> Vec<Subscription> {
    let sign_out = {
        let backend = Arc::clone(backend);
        let events = lifecycle.events.clone();
        lifecycle.events.on(move |_: AuthSignOutRequested| {
            let backend = Arc::clone(&backend);
            let events = events.clone();
            async move {
                backend.sign_out().await?;
                events.emit(AuthSignedOut).await;
                Ok::<(), ListenerError>(())
            }
        })
    };

    let store_failed = lifecycle.events.on(|failed: StoreFailed| async move {
        tracing::warn!(store = %failed.store_name, error = %failed.error, "store failed");
        Ok::<(), ListenerError>(())
    });

    vec![sign_out, store_failed]
}
