//! Database access for arcs-backend
//!
//! Schema creation lives in `arcs_common::db`; this module holds the queries
//! the HTTP handlers run directly. Import writes go through
//! [`crate::import::SqliteImportStore`].

pub mod records;
pub mod repositories;
