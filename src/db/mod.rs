//! Database module for StoreWatch.
//!
//! Provides SQLite storage for report jobs and read access to the polled
//! location data, with automatic migrations.

mod models;
mod store;

pub use models::*;
pub use store::*;
