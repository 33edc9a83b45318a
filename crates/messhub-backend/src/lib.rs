//! Client contracts for the hosted backend (tables, RPC, change feed, object
//! storage, authentication) and their REST implementation.

pub mod auth;
pub mod client;
pub mod error;
pub mod query;
pub mod realtime;
pub mod storage;

pub use auth::{AuthClient, AuthUser, OtpKind, Session, SignUpOutcome};
pub use client::{RemoteBackend, RestBackend};
pub use error::{BackendError, NOT_FOUND_CODE};
pub use query::{Order, Query};
pub use realtime::{
    ChangeFeed, ChangeFilter, ChangeKind, ChangeNotification, ChangeSubscription, LocalChangeFeed,
};
pub use storage::ObjectStorage;
