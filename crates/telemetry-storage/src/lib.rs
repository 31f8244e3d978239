// SQLite storage layer with sqlx
//
// This crate provides database implementations for core traits:
// - DbEventStore: implements EventStore over the append-only events table

pub mod event_store;
pub mod models;
pub mod repositories;

pub use event_store::{storage_error, DbEventStore};
pub use models::*;
pub use repositories::*;
