//! Reachmail Storage - Relational and key-value persistence
//!
//! This crate provides the Postgres pool, the Redis handle used by the
//! rate counters and the task queue, the row models, and the repositories.

pub mod db;
pub mod kv;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use kv::KvPool;
pub use models::*;
pub use repository::*;
