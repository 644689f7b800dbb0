// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod matcher;
pub mod notify;
pub mod scheduler;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::{AppConfig, FeedConfig, Field, TriggerRule};
pub use crate::dispatch::{Action, ActionType, Dispatcher};
pub use crate::error::{ConfigError, DispatchError, FetchError, StorageError};
pub use crate::ingest::types::{Entry, FeedSource};
pub use crate::matcher::{Match, MatchEngine};
pub use crate::notify::{NotificationEvent, Notifier, NotifierRegistry};
pub use crate::scheduler::{Phase, Scheduler, TickOutcome};
pub use crate::store::{InsertOutcome, Store};
