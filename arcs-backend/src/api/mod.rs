//! HTTP API handlers for arcs-backend

pub mod batch_import;
pub mod health;
pub mod repositories;

pub use batch_import::batch_import_routes;
pub use health::health_routes;
pub use repositories::repository_routes;
