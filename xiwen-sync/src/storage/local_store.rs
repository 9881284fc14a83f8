//! Local store
//!
//! The on-device source of truth. Every collection lives as one JSON array in the
//! key-value repository and is rewritten whole on each mutation. A mutation is
//! durable by the time its future resolves; nothing here talks to the network.
//!
//! Read-modify-write cycles hold a store-wide lock, so local edits apply in call
//! order and identifier reconciliation never interleaves with them.

use super::aggregates;
use super::ids::ProvisionalIds;
use crate::config::*;
use crate::database::*;
use crate::error::{AppError, Result};
use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// An entity collection persisted under a fixed key
pub trait StoredEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KEY: &'static str;
    const NAME: &'static str;

    fn id(&self) -> EntityId;
    fn set_id(&mut self, id: EntityId);
    fn local_ref(&self) -> Option<Uuid>;
    fn clear_local_ref(&mut self);
}

macro_rules! stored_entity {
    ($ty:ty, $key:expr, $name:expr) => {
        impl StoredEntity for $ty {
            const KEY: &'static str = $key;
            const NAME: &'static str = $name;

            fn id(&self) -> EntityId {
                self.id
            }

            fn set_id(&mut self, id: EntityId) {
                self.id = id;
            }

            fn local_ref(&self) -> Option<Uuid> {
                self.local_ref
            }

            fn clear_local_ref(&mut self) {
                self.local_ref = None;
            }
        }
    };
}

stored_entity!(Task, KEY_TASKS, "Task");
stored_entity!(Record, KEY_RECORDS, "Record");
stored_entity!(Gift, KEY_GIFTS, "Gift");
stored_entity!(Request, KEY_REQUESTS, "Request");

/// Result of swapping a provisional id for the server's
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The entity now carries the server id
    Reconciled,
    /// The server id was already present (a pull got there first); the provisional copy was dropped
    Duplicate,
    /// No entity carries the correlation token any more
    Miss,
}

#[derive(Clone)]
pub struct LocalStore {
    repo: Repository,
    ids: Arc<ProvisionalIds>,
    write_lock: Arc<Mutex<()>>,
}

impl LocalStore {
    /// Open the store, seeding defaults on first run
    pub async fn open(repo: Repository) -> Result<Self> {
        let store = Self {
            repo,
            ids: Arc::new(ProvisionalIds::new()),
            write_lock: Arc::new(Mutex::new(())),
        };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> Result<()> {
        if self.repo.get_value(KEY_INITIALIZED).await?.is_none() {
            tracing::info!("First run, installing default data");
            self.reset_to_defaults().await?;
        }

        if self.list::<Task>().await?.is_empty() {
            tracing::info!("Task list is empty, restoring default tasks");
            self.repo.set_json(KEY_TASKS, &default_tasks()).await?;
        }

        Ok(())
    }

    /// Wipe everything back to the first-run state
    pub async fn reset_to_defaults(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        self.repo.set_json(KEY_TASKS, &default_tasks()).await?;
        self.repo.set_json::<[Record]>(KEY_RECORDS, &[]).await?;
        self.repo.set_json::<[Gift]>(KEY_GIFTS, &[]).await?;
        self.repo.set_json::<[Request]>(KEY_REQUESTS, &[]).await?;
        self.repo.set_value(KEY_PIN, DEFAULT_PIN).await?;
        self.repo.set_value(KEY_INITIALIZED, "true").await?;

        Ok(())
    }

    /// Put the built-in tasks back, replacing the current list
    pub async fn restore_default_tasks(&self) -> Result<Vec<Task>> {
        let tasks = default_tasks();
        self.replace(tasks.clone()).await?;
        Ok(tasks)
    }

    // ===== Generic collection access =====

    /// Whole collection in stored order; empty when nothing was stored yet
    pub async fn list<T: StoredEntity>(&self) -> Result<Vec<T>> {
        Ok(self.repo.get_json(T::KEY).await?.unwrap_or_default())
    }

    pub async fn get<T: StoredEntity>(&self, id: EntityId) -> Result<Option<T>> {
        Ok(self.list::<T>().await?.into_iter().find(|e| e.id() == id))
    }

    /// Overwrite a collection wholesale
    pub async fn replace<T: StoredEntity>(&self, items: Vec<T>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.repo.set_json(T::KEY, &items).await?;
        tracing::debug!("Replaced {} collection with {} entries", T::NAME, items.len());
        Ok(())
    }

    /// Remove by id. Returns whether anything was removed; absent ids are not an error.
    pub async fn delete<T: StoredEntity>(&self, id: EntityId) -> Result<bool> {
        let removed = self
            .mutate::<T, _>(|items| {
                let before = items.len();
                items.retain(|e| e.id() != id);
                Ok(items.len() != before)
            })
            .await?;

        tracing::debug!("Deleted {} {} (present: {})", T::NAME, id, removed);
        Ok(removed)
    }

    /// Swap the provisional id of the entity carrying `local_ref` for `server_id`.
    /// Only the id changes.
    pub async fn reconcile<T: StoredEntity>(
        &self,
        local_ref: Uuid,
        server_id: EntityId,
    ) -> Result<ReconcileOutcome> {
        self.mutate::<T, _>(|items| {
            let Some(pos) = items.iter().position(|e| e.local_ref() == Some(local_ref)) else {
                return Ok(ReconcileOutcome::Miss);
            };

            let taken = items
                .iter()
                .enumerate()
                .any(|(i, e)| i != pos && e.id() == server_id);
            if taken {
                items.remove(pos);
                return Ok(ReconcileOutcome::Duplicate);
            }

            let entity = &mut items[pos];
            tracing::debug!("{} {} reconciled to {}", T::NAME, entity.id(), server_id);
            entity.set_id(server_id);
            entity.clear_local_ref();
            Ok(ReconcileOutcome::Reconciled)
        })
        .await
    }

    async fn mutate<T, R>(&self, f: impl FnOnce(&mut Vec<T>) -> Result<R>) -> Result<R>
    where
        T: StoredEntity,
    {
        let _guard = self.write_lock.lock().await;
        let mut items = self.list::<T>().await?;
        let out = f(&mut items)?;
        self.repo.set_json(T::KEY, &items).await?;
        Ok(out)
    }

    async fn insert<T: StoredEntity>(&self, entity: T, newest_first: bool) -> Result<T> {
        let stored = entity.clone();
        self.mutate::<T, _>(move |items| {
            if newest_first {
                items.insert(0, entity);
            } else {
                items.push(entity);
            }
            Ok(())
        })
        .await?;

        tracing::debug!("Created {} {}", T::NAME, stored.id());
        Ok(stored)
    }

    async fn modify<T: StoredEntity>(
        &self,
        id: EntityId,
        f: impl FnOnce(&mut T) -> Result<()>,
    ) -> Result<Option<T>> {
        self.mutate::<T, _>(|items| match items.iter_mut().find(|e| e.id() == id) {
            Some(entity) => {
                f(entity)?;
                Ok(Some(entity.clone()))
            }
            None => Ok(None),
        })
        .await
    }

    // ===== Tasks =====

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        self.list().await
    }

    pub async fn create_task(&self, new: NewTask) -> Result<Task> {
        require_name(&new.name)?;

        let task = Task {
            id: self.ids.next(),
            name: new.name,
            unit: new.unit,
            score: new.score,
            task_type: new.task_type,
            enabled: new.enabled,
            local_ref: Some(Uuid::new_v4()),
        };
        self.insert(task, false).await
    }

    /// Returns `None` when no task has this id
    pub async fn update_task(&self, id: EntityId, patch: TaskPatch) -> Result<Option<Task>> {
        if let Some(name) = &patch.name {
            require_name(name)?;
        }
        self.modify(id, |task: &mut Task| {
            patch.apply(task);
            Ok(())
        })
        .await
    }

    pub async fn delete_task(&self, id: EntityId) -> Result<bool> {
        self.delete::<Task>(id).await
    }

    // ===== Records =====

    /// Newest first
    pub async fn list_records(&self) -> Result<Vec<Record>> {
        self.list().await
    }

    pub async fn create_record(&self, new: NewRecord) -> Result<Record> {
        let record = Record {
            id: self.ids.next(),
            task_id: new.task_id.filter(|id| *id != 0),
            task_name: new.task_name,
            score: new.score,
            note: new.note,
            date: new.date.unwrap_or_else(Utc::now),
            local_ref: Some(Uuid::new_v4()),
        };
        self.insert(record, true).await
    }

    pub async fn update_record(&self, id: EntityId, patch: RecordPatch) -> Result<Option<Record>> {
        self.modify(id, |record: &mut Record| {
            patch.apply(record);
            Ok(())
        })
        .await
    }

    pub async fn delete_record(&self, id: EntityId) -> Result<bool> {
        self.delete::<Record>(id).await
    }

    /// Record the opening balance carried over from the paper chart
    pub async fn initialize_score(&self, score: i64) -> Result<Record> {
        self.create_record(NewRecord::manual(
            INITIAL_SCORE_TASK_NAME,
            score,
            Some(INITIAL_SCORE_NOTE.to_string()),
        ))
        .await
    }

    // ===== Gifts =====

    pub async fn list_gifts(&self) -> Result<Vec<Gift>> {
        self.list().await
    }

    pub async fn create_gift(&self, new: NewGift) -> Result<Gift> {
        require_name(&new.name)?;
        require_cost(new.score)?;

        let gift = Gift {
            id: self.ids.next(),
            name: new.name,
            image: new.image,
            score: new.score,
            enabled: true,
            local_ref: Some(Uuid::new_v4()),
        };
        self.insert(gift, false).await
    }

    pub async fn update_gift(&self, id: EntityId, patch: GiftPatch) -> Result<Option<Gift>> {
        if let Some(name) = &patch.name {
            require_name(name)?;
        }
        if let Some(score) = patch.score {
            require_cost(score)?;
        }
        self.modify(id, |gift: &mut Gift| {
            patch.apply(gift);
            Ok(())
        })
        .await
    }

    pub async fn delete_gift(&self, id: EntityId) -> Result<bool> {
        self.delete::<Gift>(id).await
    }

    // ===== Redemption requests =====

    /// Newest first
    pub async fn list_requests(&self) -> Result<Vec<Request>> {
        self.list().await
    }

    pub async fn create_request(&self, new: NewRequest) -> Result<Request> {
        let request = Request {
            id: self.ids.next(),
            gift_id: new.gift_id,
            gift_name: new.gift_name,
            score: new.score,
            status: RequestStatus::Pending,
            date: Utc::now(),
            processed_date: None,
            local_ref: Some(Uuid::new_v4()),
        };
        self.insert(request, true).await
    }

    /// Approve or reject a pending request. Terminal statuses never change again.
    pub async fn update_request_status(
        &self,
        id: EntityId,
        status: RequestStatus,
    ) -> Result<Option<Request>> {
        self.modify(id, |request: &mut Request| {
            if !request.status.can_transition_to(status) {
                return Err(AppError::InvalidTransition {
                    id,
                    from: request.status.as_str(),
                    to: status.as_str(),
                });
            }
            request.status = status;
            request.processed_date = Some(Utc::now());
            Ok(())
        })
        .await
    }

    pub async fn delete_request(&self, id: EntityId) -> Result<bool> {
        self.delete::<Request>(id).await
    }

    // ===== Aggregates =====

    pub async fn total_score(&self) -> Result<i64> {
        Ok(aggregates::total_score(&self.list_records().await?))
    }

    /// Records made on `day` in the local calendar
    pub async fn records_on_date(&self, day: NaiveDate) -> Result<Vec<Record>> {
        Ok(aggregates::records_on_day(&self.list_records().await?, day))
    }

    /// Day-of-month buckets for `month` (1-12) of `year`
    pub async fn daily_score_summary(
        &self,
        month: u32,
        year: i32,
    ) -> Result<BTreeMap<u32, DailyScore>> {
        Ok(aggregates::daily_score_summary(
            &self.list_records().await?,
            month,
            year,
        ))
    }

    // ===== PIN and settings =====

    pub async fn pin(&self) -> Result<String> {
        Ok(self
            .repo
            .get_value(KEY_PIN)
            .await?
            .unwrap_or_else(|| DEFAULT_PIN.to_string()))
    }

    pub async fn verify_pin(&self, candidate: &str) -> Result<bool> {
        Ok(self.pin().await? == candidate)
    }

    pub async fn change_pin(&self, new_pin: &str) -> Result<()> {
        if new_pin.len() < MIN_PIN_LENGTH || !new_pin.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::InvalidPin(format!(
                "PIN must be at least {} digits",
                MIN_PIN_LENGTH
            )));
        }

        let _guard = self.write_lock.lock().await;
        self.repo.set_value(KEY_PIN, new_pin).await?;
        tracing::info!("Parent PIN changed");
        Ok(())
    }

    pub async fn settings(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.repo.get_json(KEY_SETTINGS).await?.unwrap_or_default())
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut settings: BTreeMap<String, String> =
            self.repo.get_json(KEY_SETTINGS).await?.unwrap_or_default();
        settings.insert(key.to_string(), value.to_string());
        self.repo.set_json(KEY_SETTINGS, &settings).await
    }

    pub async fn replace_settings(&self, settings: BTreeMap<String, String>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.repo.set_json(KEY_SETTINGS, &settings).await
    }

    // ===== Export / import =====

    pub async fn export_data(&self) -> Result<DataExport> {
        Ok(DataExport {
            tasks: self.list_tasks().await?,
            records: self.list_records().await?,
            gifts: self.list_gifts().await?,
            requests: self.list_requests().await?,
            export_date: Utc::now(),
        })
    }

    /// Overwrite each collection present in `data`
    pub async fn import_data(&self, data: DataImport) -> Result<()> {
        if let Some(tasks) = data.tasks {
            self.replace(tasks).await?;
        }
        if let Some(records) = data.records {
            self.replace(records).await?;
        }
        if let Some(gifts) = data.gifts {
            self.replace(gifts).await?;
        }
        if let Some(requests) = data.requests {
            self.replace(requests).await?;
        }

        tracing::info!("Imported data");
        Ok(())
    }
}

fn require_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("name must not be empty".to_string()));
    }
    Ok(())
}

fn require_cost(score: i64) -> Result<()> {
    if score <= 0 {
        return Err(AppError::Validation(format!(
            "gift cost must be positive, got {}",
            score
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ids::is_provisional;

    async fn create_test_store() -> LocalStore {
        let pool = create_memory_pool().await.unwrap();
        LocalStore::open(Repository::new(pool)).await.unwrap()
    }

    #[tokio::test]
    async fn test_first_run_defaults() {
        let store = create_test_store().await;

        assert_eq!(store.list_tasks().await.unwrap().len(), 18);
        assert!(store.list_records().await.unwrap().is_empty());
        assert!(store.list_gifts().await.unwrap().is_empty());
        assert!(store.verify_pin("1234").await.unwrap());
        assert!(!store.verify_pin("0000").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_task_list_restored_on_open() {
        let pool = create_memory_pool().await.unwrap();
        let repo = Repository::new(pool);
        let store = LocalStore::open(repo.clone()).await.unwrap();
        store.replace::<Task>(Vec::new()).await.unwrap();

        let reopened = LocalStore::open(repo).await.unwrap();
        assert_eq!(reopened.list_tasks().await.unwrap().len(), 18);
    }

    #[tokio::test]
    async fn test_create_task_assigns_provisional_id() {
        let store = create_test_store().await;
        let before = store.list_tasks().await.unwrap().len();

        let task = store
            .create_task(NewTask::new("算数", "10题/次", 3))
            .await
            .unwrap();

        assert!(is_provisional(task.id));
        assert!(task.local_ref.is_some());
        assert_eq!(task.task_type, TaskType::Positive);

        let tasks = store.list_tasks().await.unwrap();
        assert_eq!(tasks.len(), before + 1);
        assert_eq!(tasks.last().unwrap().id, task.id);
    }

    #[tokio::test]
    async fn test_records_are_newest_first() {
        let store = create_test_store().await;

        let first = store
            .create_record(NewRecord::manual("a", 1, None))
            .await
            .unwrap();
        let second = store
            .create_record(NewRecord::manual("b", 2, None))
            .await
            .unwrap();

        let records = store.list_records().await.unwrap();
        assert_eq!(records[0].id, second.id);
        assert_eq!(records[1].id, first.id);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_record_task_id_zero_is_manual() {
        let store = create_test_store().await;

        let record = store
            .create_record(NewRecord {
                task_id: Some(0),
                task_name: "调整".to_string(),
                score: 5,
                note: None,
                date: None,
            })
            .await
            .unwrap();

        assert_eq!(record.task_id, None);
        assert!(record.is_manual());
    }

    #[tokio::test]
    async fn test_update_missing_returns_none() {
        let store = create_test_store().await;

        let result = store
            .update_task(999, TaskPatch {
                score: Some(4),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_update_task_merges_fields() {
        let store = create_test_store().await;
        let task = store
            .create_task(NewTask::new("背古诗", "1首/次", 3))
            .await
            .unwrap();

        let updated = store
            .update_task(task.id, TaskPatch {
                score: Some(4),
                ..Default::default()
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.score, 4);
        assert_eq!(updated.name, "背古诗");
        assert_eq!(store.get::<Task>(task.id).await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = create_test_store().await;
        let gift = store.create_gift(NewGift::new("乐高", 50)).await.unwrap();

        assert!(store.delete_gift(gift.id).await.unwrap());
        let after_once = store.list_gifts().await.unwrap();
        assert!(!store.delete_gift(gift.id).await.unwrap());
        assert_eq!(store.list_gifts().await.unwrap(), after_once);
    }

    #[tokio::test]
    async fn test_gift_validation() {
        let store = create_test_store().await;

        assert!(matches!(
            store.create_gift(NewGift::new("免费", 0)).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            store.create_gift(NewGift::new("  ", 5)).await,
            Err(AppError::Validation(_))
        ));

        let gift = store.create_gift(NewGift::new("贴纸", 5)).await.unwrap();
        assert!(gift.enabled);
        assert!(store
            .update_gift(gift.id, GiftPatch {
                score: Some(-1),
                ..Default::default()
            })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_request_status_is_monotonic() {
        let store = create_test_store().await;
        let gift = store.create_gift(NewGift::new("冰淇淋", 20)).await.unwrap();

        let request = store
            .create_request(NewRequest::for_gift(&gift))
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.processed_date.is_none());

        let approved = store
            .update_request_status(request.id, RequestStatus::Approved)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);
        assert!(approved.processed_date.is_some());

        let err = store
            .update_request_status(request.id, RequestStatus::Rejected)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        let stored = store.get::<Request>(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn test_snapshots_survive_gift_edits() {
        let store = create_test_store().await;
        let gift = store.create_gift(NewGift::new("绘本", 30)).await.unwrap();
        let request = store
            .create_request(NewRequest::for_gift(&gift))
            .await
            .unwrap();

        store
            .update_gift(gift.id, GiftPatch {
                name: Some("精装绘本".to_string()),
                score: Some(45),
                ..Default::default()
            })
            .await
            .unwrap();
        store.delete_gift(gift.id).await.unwrap();

        let stored = store.get::<Request>(request.id).await.unwrap().unwrap();
        assert_eq!(stored.gift_name, "绘本");
        assert_eq!(stored.score, 30);
    }

    #[tokio::test]
    async fn test_reconcile_swaps_only_the_id() {
        let store = create_test_store().await;
        let created = store
            .create_record(NewRecord::manual("跳绳", 1, Some("note".to_string())))
            .await
            .unwrap();
        let token = created.local_ref.unwrap();

        let outcome = store.reconcile::<Record>(token, 42).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Reconciled);

        let records = store.list_records().await.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, 42);
        assert_eq!(record.local_ref, None);
        assert_eq!(record.task_name, created.task_name);
        assert_eq!(record.score, created.score);
        assert_eq!(record.note, created.note);
        assert_eq!(record.date, created.date);
    }

    #[tokio::test]
    async fn test_reconcile_miss_and_duplicate() {
        let store = create_test_store().await;

        let outcome = store.reconcile::<Gift>(Uuid::new_v4(), 7).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Miss);

        let gift = store.create_gift(NewGift::new("气球", 5)).await.unwrap();
        let mut pulled = gift.clone();
        pulled.id = 7;
        pulled.local_ref = None;
        let mut gifts = store.list_gifts().await.unwrap();
        gifts.push(pulled);
        store.replace(gifts).await.unwrap();

        let outcome = store
            .reconcile::<Gift>(gift.local_ref.unwrap(), 7)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Duplicate);

        let gifts = store.list_gifts().await.unwrap();
        assert_eq!(gifts.len(), 1);
        assert_eq!(gifts[0].id, 7);
    }

    #[tokio::test]
    async fn test_reconcile_alongside_builtin_tasks() {
        let store = create_test_store().await;
        let created = store
            .create_task(NewTask::new("算数", "10题/次", 3))
            .await
            .unwrap();

        let outcome = store
            .reconcile::<Task>(created.local_ref.unwrap(), 1)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Reconciled);

        let tasks = store.list_tasks().await.unwrap();
        assert_eq!(tasks.len(), 19);
        assert_eq!(tasks.iter().filter(|t| t.id == 1).count(), 1);
        assert_eq!(tasks.last().unwrap().id, 1);
        assert_eq!(tasks[0].id, SEED_TASK_ID_BASE + 1);
    }

    #[tokio::test]
    async fn test_pin_validation() {
        let store = create_test_store().await;

        assert!(matches!(
            store.change_pin("12").await,
            Err(AppError::InvalidPin(_))
        ));
        assert!(matches!(
            store.change_pin("12ab").await,
            Err(AppError::InvalidPin(_))
        ));

        store.change_pin("246810").await.unwrap();
        assert!(store.verify_pin("246810").await.unwrap());
        assert!(!store.verify_pin("1234").await.unwrap());
    }

    #[tokio::test]
    async fn test_settings() {
        let store = create_test_store().await;

        store.set_setting("theme", "pink").await.unwrap();
        store.set_setting("sound", "on").await.unwrap();

        let settings = store.settings().await.unwrap();
        assert_eq!(settings.len(), 2);
        assert_eq!(settings["theme"], "pink");
    }

    #[tokio::test]
    async fn test_initialize_score() {
        let store = create_test_store().await;

        let record = store.initialize_score(120).await.unwrap();
        assert!(record.is_manual());
        assert_eq!(record.task_name, INITIAL_SCORE_TASK_NAME);
        assert_eq!(store.total_score().await.unwrap(), 120);
    }

    #[tokio::test]
    async fn test_total_score_tracks_creates_and_deletes() {
        let store = create_test_store().await;

        let a = store.create_record(NewRecord::manual("a", 3, None)).await.unwrap();
        store.create_record(NewRecord::manual("b", -2, None)).await.unwrap();
        store.create_record(NewRecord::manual("c", 5, None)).await.unwrap();
        store.delete_record(a.id).await.unwrap();

        let records = store.list_records().await.unwrap();
        let expected: i64 = records.iter().map(|r| r.score).sum();
        assert_eq!(store.total_score().await.unwrap(), expected);
        assert_eq!(expected, 3);
    }

    #[tokio::test]
    async fn test_export_and_partial_import() {
        let store = create_test_store().await;
        store.create_gift(NewGift::new("贴纸", 5)).await.unwrap();
        store.initialize_score(10).await.unwrap();

        let export = store.export_data().await.unwrap();
        assert_eq!(export.gifts.len(), 1);
        assert_eq!(export.records.len(), 1);

        store
            .import_data(DataImport {
                gifts: Some(Vec::new()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(store.list_gifts().await.unwrap().is_empty());
        assert_eq!(store.list_records().await.unwrap().len(), 1);

        store.import_data(export.clone().into()).await.unwrap();
        assert_eq!(store.list_gifts().await.unwrap(), export.gifts);
    }

    #[tokio::test]
    async fn test_operations_match_reference_model() {
        let store = create_test_store().await;
        store.replace::<Gift>(Vec::new()).await.unwrap();
        let mut model: Vec<Gift> = Vec::new();

        for i in 1..=6 {
            let gift = store
                .create_gift(NewGift::new(format!("gift {}", i), i * 10))
                .await
                .unwrap();
            model.push(gift);
        }

        let target = model[2].id;
        let patch = GiftPatch {
            enabled: Some(false),
            ..Default::default()
        };
        store.update_gift(target, patch.clone()).await.unwrap();
        if let Some(g) = model.iter_mut().find(|g| g.id == target) {
            patch.apply(g);
        }

        for id in [model[0].id, model[4].id, 12345] {
            store.delete_gift(id).await.unwrap();
            model.retain(|g| g.id != id);
        }

        assert_eq!(store.list_gifts().await.unwrap(), model);
    }
}
