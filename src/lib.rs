//! wp-todo - Offline-first to-dos stored in a WordPress site
//!
//! Tasks are edited locally, pushed to a custom post type over the WordPress
//! REST API, pulled back as the authoritative state and optionally mirrored
//! into a native reminders store.

pub mod config;
pub mod discovery;
pub mod error;
pub mod http;
pub mod models;
pub mod pagination;
pub mod reconcile;
pub mod reminders;
pub mod store;
pub mod sync;

pub use error::{ApiError, ConnectError, RemindersError, StoreError, SyncError};
pub use models::{CalendarTarget, Credentials, SiteConfiguration, Task, TaskId};
pub use reminders::{MemoryReminders, NoReminders, RemindersBridge};
pub use store::Store;
pub use sync::{SyncEngine, SyncPhase, SyncReport};
