//! Store lifecycle coordination: typed event bus, error normalization,
//! dependency-ordered store initialization and bounded retry.

pub mod context;
pub mod errors;
pub mod events;
pub mod retry;
pub mod store;

pub use context::Lifecycle;
pub use errors::{
    classify, AppError, Classifiable, ErrorContext, ErrorManager, ErrorSeverity, ErrorType,
    RawError, RecoveryAction, ThrottledError,
};
pub use events::{Event, EventManager, EventName, ListenerError, Subscription};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use store::{
    InitError, StoreError, StoreManager, StorePolicy, StoreState, StoreStatus,
};
