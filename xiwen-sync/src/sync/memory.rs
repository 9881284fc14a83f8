//! In-process remote backend
//!
//! Behaves like a tiny hosted database: sequence ids per table, change
//! notifications for every write, optional latency and injected failures.
//! The test suite drives the coordinator against it, and it doubles as an
//! offline backend during development.

use super::remote::*;
use crate::database::EntityId;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

/// Backend operations that can be counted or made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
    Upsert,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Row>>,
    next_id: HashMap<String, EntityId>,
    failures: HashSet<(Operation, String)>,
    calls: HashMap<(Operation, String), usize>,
    latency: Option<Duration>,
}

impl State {
    fn next_id(&mut self, table: &str) -> EntityId {
        let next = self.next_id.entry(table.to_string()).or_insert(1);
        let id = *next;
        *next += 1;
        id
    }

    /// Give `row` an id unless it already has one, keeping the sequence ahead of it
    fn assign_id(&mut self, table: &str, row: &mut Row) {
        match row.get("id").and_then(Value::as_i64) {
            Some(id) => {
                let next = self.next_id.entry(table.to_string()).or_insert(1);
                *next = (*next).max(id + 1);
            }
            None => {
                let id = self.next_id(table);
                row.insert("id".to_string(), Value::from(id));
            }
        }
    }
}

pub struct MemoryBackend {
    state: Mutex<State>,
    reachable: AtomicBool,
    events: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(State::default()),
            reachable: AtomicBool::new(true),
            events,
        }
    }

    /// When unreachable, every call fails as if the network were down
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Make every `op` on `table` fail until cleared
    pub fn fail(&self, op: Operation, table: &str) {
        self.lock().failures.insert((op, table.to_string()));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Number of `op` calls made against `table`, failed ones included
    pub fn calls(&self, op: Operation, table: &str) -> usize {
        self.lock()
            .calls
            .get(&(op, table.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Current contents of a table, in insertion order
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Load rows directly, bypassing counters and notifications
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        let mut state = self.lock();
        for mut row in rows {
            state.assign_id(table, &mut row);
            state.tables.entry(table.to_string()).or_default().push(row);
        }
    }

    /// Broadcast a change as if another device had written it
    pub fn notify(&self, table: &str, kind: ChangeKind) {
        let _ = self.events.send(ChangeEvent {
            table: table.to_string(),
            kind,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn begin(&self, op: Operation, table: &str) -> Result<()> {
        let latency = {
            let mut state = self.lock();
            *state.calls.entry((op, table.to_string())).or_insert(0) += 1;
            state.latency
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(AppError::Remote("backend unreachable".to_string()));
        }
        if self.lock().failures.contains(&(op, table.to_string())) {
            return Err(AppError::Remote(format!("{:?} rejected on {}", op, table)));
        }
        Ok(())
    }
}

fn matches(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|f| row.get(&f.column) == Some(&f.value))
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => CmpOrdering::Equal,
        (None | Some(Value::Null), _) => CmpOrdering::Less,
        (_, None | Some(Value::Null)) => CmpOrdering::Greater,
        _ => CmpOrdering::Equal,
    }
}

fn sort_rows(rows: &mut [Row], order: &[OrderBy]) {
    rows.sort_by(|a, b| {
        for o in order {
            let ord = compare_values(a.get(&o.column), b.get(&o.column));
            let ord = if o.ascending { ord } else { ord.reverse() };
            if ord != CmpOrdering::Equal {
                return ord;
            }
        }
        CmpOrdering::Equal
    });
}

fn id_of(row: &Row) -> Option<EntityId> {
    row.get("id").and_then(Value::as_i64)
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn ping(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::Remote("backend unreachable".to_string()))
        }
    }

    async fn select(&self, table: &str, filters: &[Filter], order: &[OrderBy]) -> Result<Vec<Row>> {
        self.begin(Operation::Select, table).await?;

        let mut rows: Vec<Row> = self
            .rows(table)
            .into_iter()
            .filter(|row| matches(row, filters))
            .collect();
        sort_rows(&mut rows, order);
        Ok(rows)
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        self.begin(Operation::Insert, table).await?;

        let inserted: Vec<Row> = {
            let mut state = self.lock();
            let mut inserted = Vec::with_capacity(rows.len());
            for mut row in rows {
                row.remove("id");
                state.assign_id(table, &mut row);
                state.tables.entry(table.to_string()).or_default().push(row.clone());
                inserted.push(row);
            }
            inserted
        };

        for _ in &inserted {
            self.notify(table, ChangeKind::Insert);
        }
        Ok(inserted)
    }

    async fn update(&self, table: &str, patch: Row, id: EntityId) -> Result<()> {
        self.begin(Operation::Update, table).await?;

        let updated = {
            let mut state = self.lock();
            match state
                .tables
                .get_mut(table)
                .and_then(|rows| rows.iter_mut().find(|r| id_of(r) == Some(id)))
            {
                Some(row) => {
                    for (column, value) in patch {
                        if column != "id" {
                            row.insert(column, value);
                        }
                    }
                    true
                }
                None => false,
            }
        };

        if updated {
            self.notify(table, ChangeKind::Update);
        }
        Ok(())
    }

    async fn delete(&self, table: &str, id: EntityId) -> Result<Vec<Row>> {
        self.begin(Operation::Delete, table).await?;

        let deleted: Vec<Row> = {
            let mut state = self.lock();
            match state.tables.get_mut(table) {
                Some(rows) => {
                    let (gone, kept): (Vec<Row>, Vec<Row>) = std::mem::take(rows)
                        .into_iter()
                        .partition(|r| id_of(r) == Some(id));
                    *rows = kept;
                    gone
                }
                None => Vec::new(),
            }
        };

        if !deleted.is_empty() {
            self.notify(table, ChangeKind::Delete);
        }
        Ok(deleted)
    }

    async fn upsert(&self, table: &str, row: Row, conflict_key: &str) -> Result<()> {
        self.begin(Operation::Upsert, table).await?;

        let key = row.get(conflict_key).cloned();
        let kind = {
            let mut state = self.lock();
            let rows = state.tables.entry(table.to_string()).or_default();
            match rows
                .iter_mut()
                .find(|r| key.is_some() && r.get(conflict_key) == key.as_ref())
            {
                Some(existing) => {
                    for (column, value) in row {
                        existing.insert(column, value);
                    }
                    ChangeKind::Update
                }
                None => {
                    rows.push(row);
                    ChangeKind::Insert
                }
            }
        };

        self.notify(table, kind);
        Ok(())
    }

    async fn subscribe(
        &self,
        table: &str,
        kinds: &[ChangeKind],
        callback: ChangeCallback,
    ) -> Result<Subscription> {
        let mut receiver = self.events.subscribe();
        let wanted = table.to_string();
        let kinds = kinds.to_vec();

        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if event.table == wanted && kinds.contains(&event.kind) {
                            callback(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Change listener for {} skipped {} events", wanted, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(table, handle))
    }
}
