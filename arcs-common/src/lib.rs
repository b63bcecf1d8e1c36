//! # ARCS Common Library
//!
//! Shared code for the archival records services including:
//! - Configuration loading and root folder resolution
//! - Database initialization
//! - The record type registry and per-type schemas
//! - Record URI construction and parsing

pub mod config;
pub mod db;
pub mod error;
pub mod registry;
pub mod schema;

pub use error::{Error, Result};
pub use registry::{ParsedReference, RecordType, RecordTypeRegistry, Scope};
