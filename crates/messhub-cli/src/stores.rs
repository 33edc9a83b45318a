//! Store initializers for the names the manifest may list, and the cache
//! they fill for the signed-in member.

use std::sync::{Arc, Mutex, PoisonError};

use messhub_backend::{AuthClient, RestBackend};
use messhub_core::{Membership, RenewalRequest, StoreManifest};
use messhub_lifecycle::InitError;
use messhub_membership::{LookupOptions, MembershipService};
use uuid::Uuid;

use crate::runtime::Runtime;

/// Data loaded by the store initializers for the signed-in member.
#[derive(Debug, Clone, Default)]
pub(crate) struct CachedMember {
    pub(crate) membership: Option<Membership>,
    pub(crate) renewal: Option<RenewalRequest>,
    pub(crate) points_balance: Option<i64>,
}

#[derive(Debug, Default)]
pub(crate) struct MemberCache {
    inner: Mutex<CachedMember>,
}

impl MemberCache {
    pub(crate) fn snapshot(&self) -> CachedMember {
        self.lock().clone()
    }

    fn update(&self, apply: impl FnOnce(&mut CachedMember)) {
        apply(&mut self.lock());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CachedMember> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything an initializer needs, cloned into each closure.
#[derive(Clone)]
struct InitContext {
    backend: Arc<RestBackend>,
    membership: MembershipService<RestBackend>,
    cache: Arc<MemberCache>,
    mess: Option<Uuid>,
}

impl InitContext {
    /// `(member, mess)` when a user is signed in and a mess is selected.
    fn target(&self) -> Option<(Uuid, Uuid)> {
        let member = self.backend.session()?.user.id;
        Some((member, self.mess?))
    }
}

/// Registers every manifest store with the initializer matching its name.
///
/// # Errors
///
/// Returns an error for a store name with no known initializer, or if the
/// store manager rejects the registration.
pub(crate) fn register_manifest_stores(
    runtime: &Runtime,
    manifest: &StoreManifest,
) -> anyhow::Result<()> {
    let ctx = InitContext {
        backend: Arc::clone(&runtime.backend),
        membership: runtime.membership.clone(),
        cache: Arc::clone(&runtime.cache),
        mess: runtime.mess,
    };
    let stores = &runtime.lifecycle.stores;

    for config in &manifest.stores {
        let ctx = ctx.clone();
        match config.name.as_str() {
            "session" => stores.register_store(config.clone(), move || {
                let ctx = ctx.clone();
                async move {
                    match ctx.backend.restore_session()? {
                        Some(session) => {
                            tracing::info!(user_id = %session.user.id, "session restored");
                        }
                        None => tracing::debug!("no stored session"),
                    }
                    Ok::<(), InitError>(())
                }
            })?,
            "membership" => stores.register_store(config.clone(), move || {
                let ctx = ctx.clone();
                async move {
                    if let Some((member, mess)) = ctx.target() {
                        let membership = ctx.membership.get_active_membership(member, mess).await?;
                        ctx.cache.update(|c| c.membership = membership);
                    }
                    Ok::<(), InitError>(())
                }
            })?,
            "renewal" => stores.register_store(config.clone(), move || {
                let ctx = ctx.clone();
                async move {
                    if let Some((member, mess)) = ctx.target() {
                        let renewal = ctx
                            .membership
                            .get_current_renewal_request(member, mess, LookupOptions::default())
                            .await?;
                        ctx.cache.update(|c| c.renewal = renewal);
                    }
                    Ok::<(), InitError>(())
                }
            })?,
            "points" => stores.register_store(config.clone(), move || {
                let ctx = ctx.clone();
                async move {
                    if let Some((member, mess)) = ctx.target() {
                        let balance = ctx.membership.get_points_balance(member, mess).await?;
                        ctx.cache.update(|c| c.points_balance = Some(balance));
                    }
                    Ok::<(), InitError>(())
                }
            })?,
            other => anyhow::bail!("no initializer for store '{other}'"),
        }
    }
    Ok(())
}

/// Prints every store's state in registration order, then the cached member data.
pub(crate) fn print_store_states(runtime: &Runtime) {
    println!("{:<14}{:<14}{:<8}LAST INITIALIZED", "STORE", "STATUS", "RETRIES");
    for (name, state) in runtime.lifecycle.stores.store_states() {
        let last = state.last_initialized.map_or_else(
            || "\u{2014}".to_string(),
            |at| at.format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        println!("{name:<14}{:<14}{:<8}{last}", state.status.to_string(), state.retry_count);
        if let Some(error) = &state.error {
            println!("  error: {error}");
        }
    }

    let cached = runtime.cache.snapshot();
    if let Some(membership) = &cached.membership {
        let today = chrono::Utc::now().date_naive();
        println!(
            "membership {} active until {} ({} days left)",
            membership.id,
            membership.end_date,
            membership.days_remaining(today)
        );
    }
    if let Some(renewal) = &cached.renewal {
        println!("renewal request {} is {}", renewal.id, renewal.status);
    }
    if let Some(balance) = cached.points_balance {
        println!("points balance: {balance}");
    }
}
