//! Xiwen points tracker library
//!
//! Local-first store for tasks, score records, gifts and redemption requests,
//! with best-effort replication to a hosted row database.

pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod services;
pub mod storage;
pub mod sync;
