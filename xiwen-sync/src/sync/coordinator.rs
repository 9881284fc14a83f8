//! Sync coordinator
//!
//! Bridges the Local Store and the remote backend:
//! - mirrors local mutations and reconciles provisional ids
//! - pulls whole collections on startup, on demand and after change notifications
//! - suppresses the notification echo of its own deletes
//!
//! Whether sync is enabled is decided once at construction. A disabled
//! coordinator turns every operation into a no-op that hands its input back.

use super::debounce::Debouncer;
use super::mapping::{row_id, RemoteEntity, RemoteTable, SettingRow};
use super::postgrest::PostgrestBackend;
use super::remote::*;
use crate::config::{SyncConfig, SyncTiming, PIN_SETTING_KEY};
use crate::database::*;
use crate::error::{AppError, Result};
use crate::storage::{is_provisional, LocalStore, ReconcileOutcome};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Outcome of a bulk upload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub uploaded: usize,
    pub failed: usize,
}

/// Change notifications are ignored while a local delete is in flight and
/// for a short window after it lands.
#[derive(Default)]
struct Suppression {
    in_flight: usize,
    until: Option<Instant>,
}

impl Suppression {
    fn active(&self, now: Instant) -> bool {
        self.in_flight > 0 || self.until.map_or(false, |until| now < until)
    }
}

pub type TableListener = Arc<dyn Fn(&str) + Send + Sync>;

pub struct SyncCoordinator {
    store: LocalStore,
    backend: Option<Arc<dyn RemoteBackend>>,
    timing: SyncTiming,
    synced_this_session: AtomicBool,
    pull_lock: tokio::sync::Mutex<()>,
    pull_generation: AtomicU64,
    last_pull_ok: AtomicBool,
    suppression: Mutex<Suppression>,
    subscriptions: Mutex<Vec<Subscription>>,
    debouncer: Debouncer,
}

impl SyncCoordinator {
    fn build(store: LocalStore, backend: Option<Arc<dyn RemoteBackend>>, timing: SyncTiming) -> Self {
        Self {
            store,
            backend,
            timing,
            synced_this_session: AtomicBool::new(false),
            pull_lock: tokio::sync::Mutex::new(()),
            pull_generation: AtomicU64::new(0),
            last_pull_ok: AtomicBool::new(true),
            suppression: Mutex::new(Suppression::default()),
            subscriptions: Mutex::new(Vec::new()),
            debouncer: Debouncer::new(timing.debounce),
        }
    }

    /// Coordinator that never talks to a backend
    pub fn disabled(store: LocalStore) -> Self {
        Self::build(store, None, SyncTiming::default())
    }

    /// Connect to the configured REST backend. Missing config or an unreachable
    /// backend leaves sync disabled for the lifetime of the coordinator.
    pub async fn connect(store: LocalStore, config: Option<&SyncConfig>, timing: SyncTiming) -> Self {
        let Some(config) = config.filter(|c| c.is_complete()) else {
            tracing::info!("No sync config, running local-only");
            return Self::build(store, None, timing);
        };

        match PostgrestBackend::new(config.clone()) {
            Ok(backend) => Self::connect_with(store, Arc::new(backend), timing).await,
            Err(e) => {
                tracing::warn!("Could not build sync client, running local-only: {}", e);
                Self::build(store, None, timing)
            }
        }
    }

    /// Use `backend` if it answers a ping
    pub async fn connect_with(
        store: LocalStore,
        backend: Arc<dyn RemoteBackend>,
        timing: SyncTiming,
    ) -> Self {
        match backend.ping().await {
            Ok(()) => {
                tracing::info!("Cloud sync enabled");
                Self::build(store, Some(backend), timing)
            }
            Err(e) => {
                tracing::warn!("Sync backend unreachable, running local-only: {}", e);
                Self::build(store, None, timing)
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn has_synced_this_session(&self) -> bool {
        self.synced_this_session.load(Ordering::SeqCst)
    }

    // ===== Pull path =====

    /// Startup pull, done at most once per session
    pub async fn init(&self) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        if self.has_synced_this_session() {
            tracing::debug!("Already synced this session, skipping startup pull");
            return Ok(());
        }

        self.pull_all().await?;
        self.synced_this_session.store(true, Ordering::SeqCst);
        tracing::info!("Startup sync complete");
        Ok(())
    }

    /// User-triggered re-sync. Returns whether the pull succeeded.
    pub async fn manual_sync(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }

        self.synced_this_session.store(false, Ordering::SeqCst);
        match self.pull_all().await {
            Ok(()) => {
                self.synced_this_session.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                tracing::error!("Manual sync failed: {}", e);
                false
            }
        }
    }

    /// Replace every local collection with the remote one. A caller that arrives
    /// while a pull is running waits for it and shares its outcome.
    pub async fn pull_all(&self) -> Result<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        let observed = self.pull_generation.load(Ordering::SeqCst);
        let _guard = self.pull_lock.lock().await;
        if self.pull_generation.load(Ordering::SeqCst) != observed {
            tracing::debug!("Joined a pull that was already in flight");
            return if self.last_pull_ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(AppError::Remote("concurrent pull failed".to_string()))
            };
        }

        let result = self.pull_from(backend.as_ref()).await;
        self.last_pull_ok.store(result.is_ok(), Ordering::SeqCst);
        self.pull_generation.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn pull_from(&self, backend: &dyn RemoteBackend) -> Result<()> {
        // Fetch everything before touching local state so a failed pull changes nothing
        let tasks: Vec<Task> = fetch(backend).await?;
        let gifts: Vec<Gift> = fetch(backend).await?;
        let records: Vec<Record> = fetch(backend).await?;
        let requests: Vec<Request> = fetch(backend).await?;
        let settings = fetch_settings(backend).await?;

        tracing::info!(
            "Pulled {} tasks, {} gifts, {} records, {} requests",
            tasks.len(),
            gifts.len(),
            records.len(),
            requests.len()
        );

        if tasks.is_empty() {
            tracing::debug!("Remote task list is empty, keeping local tasks");
        } else {
            self.store.replace(tasks).await?;
        }
        self.store.replace(gifts).await?;
        self.store.replace(records).await?;
        self.store.replace(requests).await?;

        if let Some(pin) = settings.get(PIN_SETTING_KEY) {
            if let Err(e) = self.store.change_pin(pin).await {
                tracing::warn!("Ignoring remote PIN: {}", e);
            }
        }
        self.store.replace_settings(settings).await?;

        Ok(())
    }

    // ===== Push path =====

    /// Insert a freshly created entity remotely and swap its provisional id for
    /// the server's. Returns the server view, or the input when sync is off or
    /// the insert failed.
    pub async fn mirror_created<T: RemoteEntity>(&self, entity: T) -> T {
        let Some(backend) = &self.backend else {
            return entity;
        };

        match self.insert_and_reconcile(backend.as_ref(), &entity).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!("Failed to mirror new {} {}: {}", T::NAME, entity.id(), e);
                entity
            }
        }
    }

    async fn insert_and_reconcile<T: RemoteEntity>(
        &self,
        backend: &dyn RemoteBackend,
        entity: &T,
    ) -> Result<T> {
        let inserted = backend
            .insert(T::TABLE.name(), vec![entity.insert_row()?])
            .await?;
        let server_id = inserted
            .first()
            .and_then(row_id)
            .ok_or_else(|| AppError::Remote(format!("{} insert returned no id", T::NAME)))?;

        if let Some(token) = entity.local_ref() {
            match self.store.reconcile::<T>(token, server_id).await? {
                ReconcileOutcome::Reconciled => {
                    if let Err(e) = self
                        .push_edits_made_during_insert(backend, entity, server_id)
                        .await
                    {
                        tracing::error!("Failed to send early edits of {} {}: {}", T::NAME, server_id, e);
                    }
                }
                ReconcileOutcome::Duplicate => tracing::debug!(
                    "{} {} already pulled, dropped provisional copy {}",
                    T::NAME,
                    server_id,
                    entity.id()
                ),
                ReconcileOutcome::Miss => tracing::warn!(
                    "Reconciliation miss: no local {} carries token {} (server id {})",
                    T::NAME,
                    token,
                    server_id
                ),
            }
        }

        let mut stored = entity.clone();
        stored.set_id(server_id);
        stored.clear_local_ref();
        Ok(stored)
    }

    /// Local edits that landed while the insert was in flight were skipped by
    /// `mirror_updated`; send them now under the server id.
    async fn push_edits_made_during_insert<T: RemoteEntity>(
        &self,
        backend: &dyn RemoteBackend,
        inserted: &T,
        server_id: EntityId,
    ) -> Result<()> {
        let Some(current) = self.store.get::<T>(server_id).await? else {
            return Ok(());
        };

        let patch = current.update_row()?;
        if patch != inserted.update_row()? {
            tracing::debug!("{} {} changed before its insert landed, sending edits", T::NAME, server_id);
            backend.update(T::TABLE.name(), patch, server_id).await?;
        }
        Ok(())
    }

    /// Send the editable fields of `entity`. Failures are logged. An entity
    /// still on its provisional id is skipped; its insert carries the edit.
    pub async fn mirror_updated<T: RemoteEntity>(&self, entity: &T) {
        let Some(backend) = &self.backend else {
            return;
        };
        if is_provisional(entity.id()) {
            tracing::debug!("{} {} not reconciled yet, deferring update", T::NAME, entity.id());
            return;
        }

        let result = match entity.update_row() {
            Ok(patch) => backend.update(T::TABLE.name(), patch, entity.id()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::error!("Failed to mirror update of {} {}: {}", T::NAME, entity.id(), e);
        }
    }

    /// Remote delete whose failure is only logged
    pub async fn mirror_deleted<T: RemoteEntity>(&self, id: EntityId) {
        if let Err(e) = self.confirm_deleted::<T>(id).await {
            tracing::error!("Failed to mirror delete of {} {}: {}", T::NAME, id, e);
        }
    }

    /// Remote delete whose failure is returned to the caller
    pub async fn confirm_deleted<T: RemoteEntity>(&self, id: EntityId) -> Result<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        self.hold_suppression();
        match backend.delete(T::TABLE.name(), id).await {
            Ok(deleted) => {
                self.release_suppression(true);
                if deleted.is_empty() {
                    tracing::warn!("Remote delete of {} {} matched no rows", T::NAME, id);
                } else {
                    tracing::debug!("Deleted {} {} remotely", T::NAME, id);
                }
                Ok(())
            }
            Err(e) => {
                self.release_suppression(false);
                Err(e)
            }
        }
    }

    /// Upsert one settings pair. Failures are logged.
    pub async fn mirror_setting(&self, key: &str, value: &str) {
        let Some(backend) = &self.backend else {
            return;
        };

        let result = match SettingRow::new(key, value).into_row() {
            Ok(row) => backend.upsert(RemoteTable::Settings.name(), row, "key").await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::error!("Failed to mirror setting {}: {}", key, e);
        }
    }

    pub async fn mirror_pin(&self, pin: &str) {
        self.mirror_setting(PIN_SETTING_KEY, pin).await;
    }

    // ===== Echo suppression =====

    fn suppression(&self) -> MutexGuard<'_, Suppression> {
        self.suppression.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn hold_suppression(&self) {
        self.suppression().in_flight += 1;
    }

    fn release_suppression(&self, succeeded: bool) {
        let mut suppression = self.suppression();
        suppression.in_flight = suppression.in_flight.saturating_sub(1);
        if succeeded {
            let until = Instant::now() + self.timing.suppress_window;
            suppression.until = Some(suppression.until.map_or(until, |u| u.max(until)));
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppression().active(Instant::now())
    }

    // ===== Realtime =====

    /// Listen for inserts and updates on every entity table. Each burst of
    /// notifications triggers one pull after the debounce window, then
    /// `on_change` with the table's short name.
    pub async fn subscribe_realtime<F>(self: &Arc<Self>, on_change: F) -> Result<()>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        let listener: TableListener = Arc::new(on_change);
        let mut subscriptions = Vec::with_capacity(RemoteTable::ENTITIES.len());

        for table in RemoteTable::ENTITIES {
            let coordinator = Arc::downgrade(self);
            let listener = listener.clone();
            let callback: ChangeCallback = Arc::new(move |event: ChangeEvent| {
                if let Some(coordinator) = coordinator.upgrade() {
                    coordinator.on_remote_change(event, listener.clone());
                }
            });

            subscriptions.push(
                backend
                    .subscribe(table.name(), &[ChangeKind::Insert, ChangeKind::Update], callback)
                    .await?,
            );
        }

        *self.subscriptions_guard() = subscriptions;
        tracing::info!("Realtime sync subscribed");
        Ok(())
    }

    pub fn unsubscribe_realtime(&self) {
        let dropped = std::mem::take(&mut *self.subscriptions_guard());
        self.debouncer.cancel();
        if !dropped.is_empty() {
            tracing::info!("Realtime sync unsubscribed");
        }
    }

    pub fn is_subscribed(&self) -> bool {
        !self.subscriptions_guard().is_empty()
    }

    fn subscriptions_guard(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn on_remote_change(self: Arc<Self>, event: ChangeEvent, listener: TableListener) {
        tracing::debug!("Remote {} on {}", event.kind.as_str(), event.table);

        let label = RemoteTable::from_name(&event.table).map_or("unknown", RemoteTable::label);
        let coordinator = Arc::downgrade(&self);

        self.debouncer.schedule(move || async move {
            let Some(coordinator) = coordinator.upgrade() else {
                return;
            };
            if coordinator.is_suppressed() {
                tracing::debug!("Skipping realtime pull during local delete");
                return;
            }

            match coordinator.pull_all().await {
                Ok(()) => listener(label),
                Err(e) => tracing::error!("Realtime pull failed: {}", e),
            }
        });
    }

    // ===== Onboarding =====

    /// Upload every local entity, one at a time. Nothing is reconciled or rolled back.
    pub async fn migrate_local_to_cloud(&self) -> Result<MigrationReport> {
        let Some(backend) = &self.backend else {
            return Ok(MigrationReport::default());
        };

        let mut report = MigrationReport::default();
        self.upload_all::<Task>(backend.as_ref(), &mut report).await?;
        self.upload_all::<Gift>(backend.as_ref(), &mut report).await?;
        self.upload_all::<Record>(backend.as_ref(), &mut report).await?;
        self.upload_all::<Request>(backend.as_ref(), &mut report).await?;

        tracing::info!(
            "Migration finished: {} uploaded, {} failed",
            report.uploaded,
            report.failed
        );
        Ok(report)
    }

    async fn upload_all<T: RemoteEntity>(
        &self,
        backend: &dyn RemoteBackend,
        report: &mut MigrationReport,
    ) -> Result<()> {
        for entity in self.store.list::<T>().await? {
            let result = match entity.insert_row() {
                Ok(row) => backend.insert(T::TABLE.name(), vec![row]).await.map(|_| ()),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => report.uploaded += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!("Failed to upload {} {}: {}", T::NAME, entity.id(), e);
                }
            }
        }
        Ok(())
    }
}

async fn fetch<T: RemoteEntity>(backend: &dyn RemoteBackend) -> Result<Vec<T>> {
    let rows = backend
        .select(T::TABLE.name(), &[], &T::TABLE.pull_order())
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| match T::from_row(row) {
            Ok(entity) => Some(entity),
            Err(e) => {
                tracing::warn!("Skipping undecodable {} row: {}", T::NAME, e);
                None
            }
        })
        .collect())
}

async fn fetch_settings(backend: &dyn RemoteBackend) -> Result<BTreeMap<String, String>> {
    let table = RemoteTable::Settings;
    let rows = backend.select(table.name(), &[], &table.pull_order()).await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| SettingRow::from_row(row).ok())
        .filter_map(|setting| setting.value.map(|value| (setting.key, value)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::memory::{MemoryBackend, Operation};
    use serde_json::json;
    use std::time::Duration;
    use tracing_test::traced_test;

    async fn create_test_store() -> LocalStore {
        let pool = create_memory_pool().await.unwrap();
        LocalStore::open(Repository::new(pool)).await.unwrap()
    }

    fn fast_timing() -> SyncTiming {
        SyncTiming {
            debounce: Duration::from_millis(40),
            suppress_window: Duration::from_millis(150),
        }
    }

    async fn create_enabled() -> (Arc<SyncCoordinator>, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let coordinator =
            SyncCoordinator::connect_with(create_test_store().await, backend.clone(), fast_timing())
                .await;
        assert!(coordinator.is_enabled());
        (Arc::new(coordinator), backend)
    }

    fn row(value: serde_json::Value) -> Row {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_backend_disables_sync() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_reachable(false);

        let coordinator =
            SyncCoordinator::connect_with(create_test_store().await, backend.clone(), fast_timing())
                .await;
        assert!(!coordinator.is_enabled());

        backend.set_reachable(true);
        let gift = coordinator
            .store()
            .create_gift(NewGift::new("贴纸", 5))
            .await
            .unwrap();
        let returned = coordinator.mirror_created(gift.clone()).await;

        assert_eq!(returned, gift);
        assert!(backend.rows("xiwen_gifts").is_empty());
        assert!(!coordinator.manual_sync().await);
        assert_eq!(coordinator.migrate_local_to_cloud().await.unwrap(), MigrationReport::default());
    }

    #[tokio::test]
    async fn test_missing_config_disables_sync() {
        let store = create_test_store().await;
        let incomplete = SyncConfig::new("https://demo.supabase.co", "");

        let coordinator = SyncCoordinator::connect(store, Some(&incomplete), fast_timing()).await;
        assert!(!coordinator.is_enabled());
        assert!(coordinator.init().await.is_ok());
        assert!(!coordinator.has_synced_this_session());
    }

    #[tokio::test]
    async fn test_mirror_created_reconciles_id() {
        let (coordinator, backend) = create_enabled().await;
        let store = coordinator.store();

        let task = store
            .create_task(NewTask::new("算数", "10题/次", 3))
            .await
            .unwrap();
        assert!(is_provisional(task.id));

        let stored = coordinator.mirror_created(task.clone()).await;
        assert_eq!(stored.id, 1);
        assert!(stored.local_ref.is_none());

        let local = store.get::<Task>(1).await.unwrap().unwrap();
        assert_eq!(local.name, "算数");
        assert!(store.get::<Task>(task.id).await.unwrap().is_none());
        assert_eq!(backend.rows("xiwen_tasks").len(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_insert_is_swallowed() {
        let (coordinator, backend) = create_enabled().await;
        backend.fail(Operation::Insert, "xiwen_gifts");

        let gift = coordinator
            .store()
            .create_gift(NewGift::new("乐高", 50))
            .await
            .unwrap();
        let returned = coordinator.mirror_created(gift.clone()).await;

        assert_eq!(returned, gift);
        assert_eq!(coordinator.store().list_gifts().await.unwrap(), vec![gift]);
        assert!(logs_contain("Failed to mirror new Gift"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_reconciliation_miss_is_logged() {
        let (coordinator, _backend) = create_enabled().await;
        let store = coordinator.store();

        let record = store
            .create_record(NewRecord::manual("跳绳", 1, None))
            .await
            .unwrap();
        store.delete_record(record.id).await.unwrap();

        let stored = coordinator.mirror_created(record).await;
        assert_eq!(stored.id, 1);
        assert!(store.list_records().await.unwrap().is_empty());
        assert!(logs_contain("Reconciliation miss"));
    }

    #[tokio::test]
    async fn test_delete_failure_only_propagates_on_confirm() {
        let (coordinator, backend) = create_enabled().await;
        backend.fail(Operation::Delete, "xiwen_records");

        coordinator.mirror_deleted::<Record>(5).await;
        assert!(coordinator.confirm_deleted::<Record>(5).await.is_err());
        assert!(!coordinator.is_suppressed());
    }

    #[tokio::test]
    async fn test_delete_suppresses_for_window() {
        let (coordinator, backend) = create_enabled().await;
        backend.seed("xiwen_gifts", vec![row(json!({"name": "a", "score": 1}))]);

        coordinator.confirm_deleted::<Gift>(1).await.unwrap();
        assert!(coordinator.is_suppressed());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!coordinator.is_suppressed());
    }

    #[tokio::test]
    async fn test_pull_replaces_collections() {
        let (coordinator, backend) = create_enabled().await;
        let store = coordinator.store();
        store.create_gift(NewGift::new("本地", 9)).await.unwrap();

        backend.seed(
            "xiwen_tasks",
            vec![
                row(json!({"name": "扣分", "unit": "1次", "score": -2, "type": "negative", "enabled": true})),
                row(json!({"name": "读书", "unit": "1次", "score": 5, "type": "positive", "enabled": true})),
                row(json!({"name": "跳绳", "unit": "1次", "score": 1, "type": "positive", "enabled": true})),
            ],
        );
        backend.seed("xiwen_gifts", vec![row(json!({"name": "乐高", "score": 50, "enabled": true}))]);
        backend.seed(
            "xiwen_settings",
            vec![row(json!({"key": "parent_pin", "value": "8642"}))],
        );

        coordinator.pull_all().await.unwrap();

        let tasks = store.list_tasks().await.unwrap();
        let names: Vec<_> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["读书", "跳绳", "扣分"]);

        let gifts = store.list_gifts().await.unwrap();
        assert_eq!(gifts.len(), 1);
        assert_eq!(gifts[0].name, "乐高");
        assert!(store.verify_pin("8642").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_remote_tasks_keep_local_tasks() {
        let (coordinator, _backend) = create_enabled().await;

        coordinator.pull_all().await.unwrap();
        assert_eq!(coordinator.store().list_tasks().await.unwrap().len(), 18);
    }

    #[tokio::test]
    async fn test_failed_pull_leaves_local_state() {
        let (coordinator, backend) = create_enabled().await;
        let store = coordinator.store();
        store.create_gift(NewGift::new("贴纸", 5)).await.unwrap();
        backend.fail(Operation::Select, "xiwen_requests");

        assert!(coordinator.pull_all().await.is_err());
        assert_eq!(store.list_gifts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_pulls_collapse() {
        let (coordinator, backend) = create_enabled().await;
        backend.set_latency(Some(Duration::from_millis(30)));

        let (a, b) = tokio::join!(coordinator.pull_all(), coordinator.pull_all());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(backend.calls(Operation::Select, "xiwen_tasks"), 1);
    }

    #[tokio::test]
    async fn test_init_is_session_gated() {
        let (coordinator, backend) = create_enabled().await;

        coordinator.init().await.unwrap();
        coordinator.init().await.unwrap();
        assert!(coordinator.has_synced_this_session());
        assert_eq!(backend.calls(Operation::Select, "xiwen_gifts"), 1);

        assert!(coordinator.manual_sync().await);
        assert_eq!(backend.calls(Operation::Select, "xiwen_gifts"), 2);

        backend.fail(Operation::Select, "xiwen_gifts");
        assert!(!coordinator.manual_sync().await);
        assert!(!coordinator.has_synced_this_session());
    }

    #[tokio::test]
    async fn test_migrate_counts_sequential_uploads() {
        let (coordinator, backend) = create_enabled().await;
        let store = coordinator.store();
        store.create_gift(NewGift::new("贴纸", 5)).await.unwrap();
        store.initialize_score(30).await.unwrap();
        backend.fail(Operation::Insert, "xiwen_records");

        let report = coordinator.migrate_local_to_cloud().await.unwrap();
        assert_eq!(report, MigrationReport { uploaded: 19, failed: 1 });
        assert_eq!(backend.rows("xiwen_tasks").len(), 18);
        assert!(store.list_gifts().await.unwrap()[0].local_ref.is_some());
    }

    #[tokio::test]
    async fn test_realtime_burst_triggers_one_pull() {
        let (coordinator, backend) = create_enabled().await;
        let changed = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = changed.clone();

        coordinator
            .subscribe_realtime(move |table| sink.lock().unwrap().push(table.to_string()))
            .await
            .unwrap();
        assert!(coordinator.is_subscribed());

        backend.notify("xiwen_tasks", ChangeKind::Insert);
        tokio::time::sleep(Duration::from_millis(5)).await;
        backend.notify("xiwen_gifts", ChangeKind::Update);
        backend.notify("xiwen_records", ChangeKind::Delete);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*changed.lock().unwrap(), vec!["gifts".to_string()]);
        assert_eq!(backend.calls(Operation::Select, "xiwen_tasks"), 1);

        coordinator.unsubscribe_realtime();
        assert!(!coordinator.is_subscribed());
        backend.notify("xiwen_tasks", ChangeKind::Insert);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.calls(Operation::Select, "xiwen_tasks"), 1);
    }

    #[tokio::test]
    async fn test_edit_before_insert_lands_survives_pull() {
        let (coordinator, backend) = create_enabled().await;
        let store = coordinator.store();
        backend.set_latency(Some(Duration::from_millis(20)));

        let gift = store.create_gift(NewGift::new("乐高", 50)).await.unwrap();
        let mirror = tokio::spawn({
            let coordinator = coordinator.clone();
            let gift = gift.clone();
            async move { coordinator.mirror_created(gift).await }
        });

        let edited = store
            .update_gift(gift.id, GiftPatch {
                enabled: Some(false),
                ..Default::default()
            })
            .await
            .unwrap()
            .unwrap();
        coordinator.mirror_updated(&edited).await;
        assert_eq!(backend.calls(Operation::Update, "xiwen_gifts"), 0);

        let stored = mirror.await.unwrap();
        assert_eq!(backend.calls(Operation::Update, "xiwen_gifts"), 1);
        assert_eq!(backend.rows("xiwen_gifts")[0]["enabled"], false);

        coordinator.pull_all().await.unwrap();
        let gifts = store.list_gifts().await.unwrap();
        assert_eq!(gifts.len(), 1);
        assert_eq!(gifts[0].id, stored.id);
        assert!(!gifts[0].enabled);
    }

    #[tokio::test]
    async fn test_change_late_in_delete_window_still_pulls() {
        let backend = Arc::new(MemoryBackend::new());
        let timing = SyncTiming {
            debounce: Duration::from_millis(100),
            suppress_window: Duration::from_millis(150),
        };
        let coordinator = Arc::new(
            SyncCoordinator::connect_with(create_test_store().await, backend.clone(), timing).await,
        );
        coordinator.subscribe_realtime(|_| {}).await.unwrap();
        backend.seed("xiwen_gifts", vec![row(json!({"name": "a", "score": 1}))]);

        coordinator.confirm_deleted::<Gift>(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(coordinator.is_suppressed());

        backend.seed("xiwen_gifts", vec![row(json!({"name": "乐高", "score": 50, "enabled": true}))]);
        backend.notify("xiwen_gifts", ChangeKind::Insert);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(backend.calls(Operation::Select, "xiwen_gifts"), 1);
        let gifts = coordinator.store().list_gifts().await.unwrap();
        assert_eq!(gifts.len(), 1);
        assert_eq!(gifts[0].name, "乐高");
    }

    #[tokio::test]
    async fn test_own_delete_does_not_trigger_pull() {
        let (coordinator, backend) = create_enabled().await;
        coordinator.subscribe_realtime(|_| {}).await.unwrap();
        backend.seed("xiwen_gifts", vec![row(json!({"name": "a", "score": 1}))]);

        coordinator.confirm_deleted::<Gift>(1).await.unwrap();
        backend.notify("xiwen_gifts", ChangeKind::Update);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.calls(Operation::Select, "xiwen_gifts"), 0);
    }
}
