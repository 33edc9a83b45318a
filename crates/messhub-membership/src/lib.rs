//! Membership domain service: renewals and loyalty points over the remote
//! backend, with retry, row validation and classified errors.

pub mod error;
pub mod service;
pub mod transform;
pub mod validate;

pub use error::{ServiceError, ValidationError};
pub use service::{LookupOptions, MembershipService, RenewalSubscription, REFETCH_ATTEMPTS};
