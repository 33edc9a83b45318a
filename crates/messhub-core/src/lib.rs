//! Shared configuration and domain value objects for messhub.

pub mod app_config;
pub mod config;
pub mod error;
pub mod kv;
pub mod membership;
pub mod stores;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use error::ConfigError;
pub use kv::{FileKeyValueStore, KeyValueStore, KvError, MemoryKeyValueStore};
pub use membership::{
    EligibilityCode, Membership, MembershipStatus, NewRenewalRequest, Page, PointsBenefit,
    PointsTransaction, RenewalEligibility, RenewalRequest, RenewalStatus, TransactionType,
};
pub use stores::{load_store_manifest, parse_store_manifest, StoreConfig, StoreManifest};
