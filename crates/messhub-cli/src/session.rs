//! `sign-in` and `sign-out` handlers.

use messhub_backend::AuthClient;
use messhub_lifecycle::events::{AuthCompleted, AuthSignedOut};

use crate::runtime::Runtime;

/// Signs in, announces the new session, then loads the member stores that
/// were skipped while signed out.
///
/// # Errors
///
/// Returns an error if the backend rejects the credentials or a critical
/// store fails to initialize afterwards.
pub(crate) async fn run_sign_in(
    runtime: &Runtime,
    email: &str,
    password: &str,
) -> anyhow::Result<()> {
    let session = runtime.backend.sign_in_with_password(email, password).await?;
    runtime
        .lifecycle
        .events
        .emit(AuthCompleted {
            user_id: session.user.id.to_string(),
        })
        .await;

    // Stores initialized before sign-in found no member; start them over.
    runtime.lifecycle.stores.reset_all_stores().await;
    runtime.lifecycle.stores.initialize_all_stores().await?;

    println!(
        "signed in as {} ({})",
        session.user.email.as_deref().unwrap_or(email),
        session.user.id
    );
    Ok(())
}

/// # Errors
///
/// Returns an error if the stored session cannot be removed.
pub(crate) async fn run_sign_out(runtime: &Runtime) -> anyhow::Result<()> {
    if runtime.backend.session().is_none() {
        println!("not signed in");
        return Ok(());
    }
    runtime.backend.sign_out().await?;
    runtime.lifecycle.events.emit(AuthSignedOut).await;
    println!("signed out");
    Ok(())
}
