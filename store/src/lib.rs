//! Runbook Store Module
//!
//! Durable SQLite persistence for plans and run records. One
//! `SqliteStore` owns the database connection and implements both the
//! `RunStore` and `PlanStore` contracts from runbook-core, with schema
//! triggers enforcing the same append-only rules the in-memory stores
//! enforce in code.

pub mod sqlite;

pub use sqlite::{SqliteDatabase, SqlitePlanStore, SqliteRunStore};
