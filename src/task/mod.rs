//! Task module - the record the registry owns and the types flowing into it.
//!
//! - `TaskStatus`: closed lifecycle set with a terminality order
//! - `TaskRecord` / `TaskPatch`: authoritative state and partial updates
//! - `TaskOutcome`: structured result committed at finalization

mod outcome;
mod record;
mod status;

pub use outcome::{AiRetrieval, OutcomeKind, TaskOutcome, Verdict};
pub use record::{LogEntry, LogOrigin, TaskPatch, TaskRecord, Transition};
pub use status::TaskStatus;
