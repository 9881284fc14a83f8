//! Sync module
//!
//! Cloud replication of the Local Store:
//! - `remote`: the backend seam and row types
//! - `mapping`: local entity ↔ remote row translation
//! - `postgrest` / `realtime`: the hosted backend over HTTP and websocket
//! - `memory`: an in-process backend
//! - `coordinator`: mirroring, reconciliation, pulls and change notifications

pub mod coordinator;
pub mod debounce;
pub mod mapping;
pub mod memory;
pub mod postgrest;
pub mod realtime;
pub mod remote;

pub use coordinator::{MigrationReport, SyncCoordinator};
pub use mapping::{RemoteEntity, RemoteTable};
pub use memory::{MemoryBackend, Operation};
pub use postgrest::PostgrestBackend;
pub use remote::{ChangeEvent, ChangeKind, RemoteBackend, Row, Subscription};
