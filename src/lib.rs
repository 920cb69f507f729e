//! # task-relay
//!
//! Tracks tasks executed by a remote browser-automation provider and
//! republishes their lifecycle as one ordered event stream per task.
//!
//! The provider reports progress through two unreliable channels: webhook
//! pushes and periodic polling. Both feed the same reconciler, which keeps one
//! authoritative in-memory record per task, finalizes finished tasks by
//! fetching and extracting their result, and persists a summary.
//!
//! ```text
//!   webhook ──┐
//!             ├─► Reconciler ─► TaskRegistry ─► SubscriberSet ─► SSE clients
//!   poller ───┘        │              ▲
//!                      ▼              │
//!                  Finalizer ─────────┘──► TaskSink (SQLite)
//! ```
//!
//! ## Modules
//! - `task`: records, statuses, log entries and outcomes
//! - `extract`: result extraction from raw provider output
//! - `fanout`: subscriber handles and broadcast
//! - `registry`: per-task state, timers and subscriptions
//! - `reconcile`: webhook/poll signals and the poll loop
//! - `finalize`: final fetch and result commit
//! - `store`: durable task sink
//! - `api`: HTTP surface

pub mod api;
pub mod config;
pub mod extract;
pub mod fanout;
pub mod finalize;
pub mod provider;
pub mod reconcile;
pub mod registry;
pub mod service;
pub mod store;
pub mod task;

pub use config::{Config, RegistryConfig};
pub use registry::TaskRegistry;
pub use service::TaskService;
