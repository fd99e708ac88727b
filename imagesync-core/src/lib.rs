//! imagesync core library: domain types, request validation, persisted configuration.
//!
//! - [`reference`]: image references, platforms, destination composition
//! - [`request`]: [`SyncRequest`] and its validated [`SyncPlan`]
//! - [`types`]: task records and shared value types
//! - [`credential_store`] / [`settings`]: `~/.imagesync/` persistence
//! - [`error`]: [`RequestError`], [`ConfigError`]

pub mod credential_store;
pub mod error;
pub mod reference;
pub mod request;
pub mod settings;
pub mod types;

pub use error::{ConfigError, RequestError};
pub use reference::{DestinationRef, ImageReference, Platform};
pub use request::{RequestCredentials, SyncPlan, SyncRequest};
pub use settings::Settings;
pub use types::{
    Accepted, Capabilities, Credentials, LogEntry, PlatformOutcome, PlatformResult, StrategyKind,
    Task, TaskId, TaskStatus, TaskSummary,
};
