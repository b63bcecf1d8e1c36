//! Streaming batch import pipeline
//!
//! Request body → spool → (decode → resolve → persist) per attempt → outcome.
//! See [`job::ImportJob`] for the entry point.

pub mod decoder;
pub mod error;
pub mod job;
pub mod outcome;
pub mod processor;
pub mod progress;
pub mod retry;
pub mod spool;
pub mod store;

pub use error::ImportError;
pub use job::ImportJob;
pub use outcome::{CreatedRecords, ImportOutcome, PersistedRecord};
pub use progress::{ImportMonitor, ImportPhase, ReceivedFrame};
pub use retry::{AttemptResult, RetryController, RetryPolicy};
pub use spool::Spool;
pub use store::{ImportStore, NewRecord, SqliteImportStore, StoreSession};
