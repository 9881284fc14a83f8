//! Remote backend seam
//!
//! A row-oriented remote database addressed by table name. Rows travel as plain
//! JSON objects in the backend's own (snake_case) column naming.

use crate::database::EntityId;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// One remote row
pub type Row = Map<String, Value>;

/// Equality filter on a single column
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }
}

/// Row change kinds a subscription can listen for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

/// A change notification pushed by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
}

pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Live push subscription. Dropping it stops the listener.
#[derive(Debug)]
pub struct Subscription {
    table: String,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn new(table: impl Into<String>, handle: JoinHandle<()>) -> Self {
        Self {
            table: table.into(),
            handle,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Capabilities the sync coordinator needs from a remote database
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Cheap reachability probe, used once at startup
    async fn ping(&self) -> Result<()>;

    async fn select(&self, table: &str, filters: &[Filter], order: &[OrderBy]) -> Result<Vec<Row>>;

    /// Insert rows and return them as stored, server ids included
    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>>;

    async fn update(&self, table: &str, patch: Row, id: EntityId) -> Result<()>;

    /// Delete by id and return the deleted rows
    async fn delete(&self, table: &str, id: EntityId) -> Result<Vec<Row>>;

    async fn upsert(&self, table: &str, row: Row, conflict_key: &str) -> Result<()>;

    async fn subscribe(
        &self,
        table: &str,
        kinds: &[ChangeKind],
        callback: ChangeCallback,
    ) -> Result<Subscription>;
}
