//! Tracker service
//!
//! What UI glue calls. Every mutation lands in the Local Store first; the
//! remote mirror then runs as a tracked background task the caller never waits
//! on. Record deletion is the one exception: it awaits the remote delete and
//! reports its failure.

use crate::config::INITIAL_SCORE_TASK_NAME;
use crate::database::*;
use crate::error::{AppError, Result};
use crate::storage::LocalStore;
use crate::sync::{RemoteEntity, SyncCoordinator};
use std::future::Future;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

#[derive(Clone)]
pub struct TrackerService {
    store: LocalStore,
    sync: Arc<SyncCoordinator>,
    mirrors: TaskTracker,
}

impl TrackerService {
    pub fn new(store: LocalStore, sync: Arc<SyncCoordinator>) -> Self {
        Self {
            store,
            sync,
            mirrors: TaskTracker::new(),
        }
    }

    /// Read access for views
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn sync(&self) -> &Arc<SyncCoordinator> {
        &self.sync
    }

    /// Wait for every mirror spawned so far
    pub async fn flush_mirrors(&self) {
        self.mirrors.close();
        self.mirrors.wait().await;
        self.mirrors.reopen();
    }

    /// Mirrors still running
    pub fn pending_mirrors(&self) -> usize {
        self.mirrors.len()
    }

    fn spawn_mirror<F>(&self, mirror: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.sync.is_enabled() {
            self.mirrors.spawn(mirror);
        }
    }

    fn mirror_create<T: RemoteEntity>(&self, entity: &T) {
        let sync = self.sync.clone();
        let entity = entity.clone();
        self.spawn_mirror(async move {
            sync.mirror_created(entity).await;
        });
    }

    fn mirror_update<T: RemoteEntity>(&self, entity: &T) {
        let sync = self.sync.clone();
        let entity = entity.clone();
        self.spawn_mirror(async move {
            sync.mirror_updated(&entity).await;
        });
    }

    fn mirror_delete<T: RemoteEntity>(&self, id: EntityId) {
        let sync = self.sync.clone();
        self.spawn_mirror(async move {
            sync.mirror_deleted::<T>(id).await;
        });
    }

    // ===== Tasks =====

    pub async fn create_task(&self, new: NewTask) -> Result<Task> {
        tracing::info!("Creating task: {}", new.name);

        let task = self.store.create_task(new).await?;
        self.mirror_create(&task);
        Ok(task)
    }

    pub async fn update_task(&self, id: EntityId, patch: TaskPatch) -> Result<Option<Task>> {
        let task = self.store.update_task(id, patch).await?;
        if let Some(task) = &task {
            self.mirror_update(task);
        }
        Ok(task)
    }

    pub async fn delete_task(&self, id: EntityId) -> Result<()> {
        tracing::info!("Deleting task: {}", id);

        self.store.delete_task(id).await?;
        self.mirror_delete::<Task>(id);
        Ok(())
    }

    // ===== Records =====

    /// Score one completion of a task
    pub async fn complete_task(&self, task_id: EntityId) -> Result<Record> {
        let task = self
            .store
            .get::<Task>(task_id)
            .await?
            .ok_or(AppError::NotFound {
                entity: "Task",
                id: task_id,
            })?;

        self.create_record(NewRecord::for_task(&task)).await
    }

    pub async fn create_record(&self, new: NewRecord) -> Result<Record> {
        let record = self.store.create_record(new).await?;
        tracing::debug!("Recorded {} for {}", record.score, record.task_name);

        self.mirror_create(&record);
        Ok(record)
    }

    pub async fn update_record(&self, id: EntityId, patch: RecordPatch) -> Result<Option<Record>> {
        let record = self.store.update_record(id, patch).await?;
        if let Some(record) = &record {
            self.mirror_update(record);
        }
        Ok(record)
    }

    /// The local delete always happens. A failed remote delete is still
    /// reported so the user can be told the cloud copy survived.
    pub async fn delete_record(&self, id: EntityId) -> Result<()> {
        tracing::info!("Deleting record: {}", id);

        self.store.delete_record(id).await?;
        self.sync.confirm_deleted::<Record>(id).await
    }

    /// Carry over a starting balance
    pub async fn initialize_score(&self, score: i64) -> Result<Record> {
        tracing::info!("{}: {}", INITIAL_SCORE_TASK_NAME, score);

        let record = self.store.initialize_score(score).await?;
        self.mirror_create(&record);
        Ok(record)
    }

    // ===== Gifts =====

    pub async fn create_gift(&self, new: NewGift) -> Result<Gift> {
        tracing::info!("Creating gift: {}", new.name);

        let gift = self.store.create_gift(new).await?;
        self.mirror_create(&gift);
        Ok(gift)
    }

    pub async fn update_gift(&self, id: EntityId, patch: GiftPatch) -> Result<Option<Gift>> {
        let gift = self.store.update_gift(id, patch).await?;
        if let Some(gift) = &gift {
            self.mirror_update(gift);
        }
        Ok(gift)
    }

    pub async fn delete_gift(&self, id: EntityId) -> Result<()> {
        tracing::info!("Deleting gift: {}", id);

        self.store.delete_gift(id).await?;
        self.mirror_delete::<Gift>(id);
        Ok(())
    }

    // ===== Redemption requests =====

    /// Ask to redeem a gift at its current cost
    pub async fn request_gift(&self, gift_id: EntityId) -> Result<Request> {
        let gift = self
            .store
            .get::<Gift>(gift_id)
            .await?
            .ok_or(AppError::NotFound {
                entity: "Gift",
                id: gift_id,
            })?;
        tracing::info!("Requesting gift: {}", gift.name);

        let request = self.store.create_request(NewRequest::for_gift(&gift)).await?;
        self.mirror_create(&request);
        Ok(request)
    }

    pub async fn update_request_status(
        &self,
        id: EntityId,
        status: RequestStatus,
    ) -> Result<Option<Request>> {
        tracing::info!("Request {} -> {}", id, status.as_str());

        let request = self.store.update_request_status(id, status).await?;
        if let Some(request) = &request {
            self.mirror_update(request);
        }
        Ok(request)
    }

    pub async fn delete_request(&self, id: EntityId) -> Result<()> {
        self.store.delete_request(id).await?;
        self.mirror_delete::<Request>(id);
        Ok(())
    }

    // ===== PIN and settings =====

    pub async fn verify_pin(&self, candidate: &str) -> Result<bool> {
        self.store.verify_pin(candidate).await
    }

    pub async fn change_pin(&self, new_pin: &str) -> Result<()> {
        self.store.change_pin(new_pin).await?;

        let sync = self.sync.clone();
        let pin = new_pin.to_string();
        self.spawn_mirror(async move {
            sync.mirror_pin(&pin).await;
        });
        Ok(())
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.store.set_setting(key, value).await?;

        let sync = self.sync.clone();
        let (key, value) = (key.to_string(), value.to_string());
        self.spawn_mirror(async move {
            sync.mirror_setting(&key, &value).await;
        });
        Ok(())
    }
}
