//! Services module
//!
//! Business logic that sits between UI glue and the Local Store / Sync Coordinator pair.

pub mod tracker;

pub use tracker::TrackerService;
