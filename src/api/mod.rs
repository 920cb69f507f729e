//! HTTP API.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - service status
//! - `POST /api/tasks` - submit a prompt to the provider
//! - `GET /api/tasks` - recent stored tasks
//! - `GET /api/tasks/:id` - live record, else stored record
//! - `GET /api/tasks/:id/stream` - server-sent events for one task
//! - `POST /api/webhooks/browser-use` - provider status pushes

mod routes;
mod stream;
pub mod types;
mod webhook;

pub use routes::{router, serve, AppState};
pub use webhook::SECRET_HEADER;
