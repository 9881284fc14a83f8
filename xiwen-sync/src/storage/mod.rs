//! Storage module
//!
//! The Local Store: durable on-device collections, provisional identifiers
//! and the derived score views.

pub mod aggregates;
pub mod ids;
pub mod local_store;

pub use ids::{is_provisional, ProvisionalIds};
pub use local_store::{LocalStore, ReconcileOutcome, StoredEntity};
