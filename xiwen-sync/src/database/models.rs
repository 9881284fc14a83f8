//! Database models
//!
//! Rust structs representing the tracked entities.
//! Local JSON uses camelCase field names; remote rows are mapped in `sync::mapping`.

use crate::config::SEED_TASK_ID_BASE;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entity identifier: a provisional millisecond timestamp until reconciled,
/// then the server-assigned sequence value.
pub type EntityId = i64;

/// Whether a task rewards or penalizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Positive,
    Negative,
}

impl TaskType {
    /// Negative scores are penalties, everything else is a reward
    pub fn for_score(score: i64) -> Self {
        if score < 0 {
            TaskType::Negative
        } else {
            TaskType::Positive
        }
    }
}

/// A task the child can complete (or a behavior that costs points)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: EntityId,
    pub name: String,
    pub unit: String,
    pub score: i64,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub enabled: bool,
    /// Correlation token linking this entity to its pending remote insert
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_ref: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub name: String,
    pub unit: String,
    pub score: i64,
    pub task_type: TaskType,
    pub enabled: bool,
}

impl NewTask {
    /// Enabled task whose type follows the sign of the score
    pub fn new(name: impl Into<String>, unit: impl Into<String>, score: i64) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            score,
            task_type: TaskType::for_score(score),
            enabled: true,
        }
    }
}

/// Fields of a task that may change after creation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub unit: Option<String>,
    pub score: Option<i64>,
    pub task_type: Option<TaskType>,
    pub enabled: Option<bool>,
}

impl TaskPatch {
    pub fn apply(self, task: &mut Task) {
        if let Some(name) = self.name {
            task.name = name;
        }
        if let Some(unit) = self.unit {
            task.unit = unit;
        }
        if let Some(score) = self.score {
            task.score = score;
        }
        if let Some(task_type) = self.task_type {
            task.task_type = task_type;
        }
        if let Some(enabled) = self.enabled {
            task.enabled = enabled;
        }
    }
}

/// A score change. Task name is a snapshot taken when the record was made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: EntityId,
    /// `None` (or a legacy `0`) marks a manual adjustment
    #[serde(default)]
    pub task_id: Option<EntityId>,
    pub task_name: String,
    pub score: i64,
    #[serde(default)]
    pub note: Option<String>,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_ref: Option<Uuid>,
}

impl Record {
    pub fn is_manual(&self) -> bool {
        self.task_id.map_or(true, |id| id == 0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub task_id: Option<EntityId>,
    pub task_name: String,
    pub score: i64,
    pub note: Option<String>,
    /// Defaults to now
    pub date: Option<DateTime<Utc>>,
}

impl NewRecord {
    /// Record for completing `task` once
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: Some(task.id),
            task_name: task.name.clone(),
            score: task.score,
            note: None,
            date: None,
        }
    }

    /// Manual adjustment not tied to any task
    pub fn manual(task_name: impl Into<String>, score: i64, note: Option<String>) -> Self {
        Self {
            task_id: None,
            task_name: task_name.into(),
            score,
            note,
            date: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub score: Option<i64>,
    pub note: Option<String>,
}

impl RecordPatch {
    pub fn apply(self, record: &mut Record) {
        if let Some(score) = self.score {
            record.score = score;
        }
        if let Some(note) = self.note {
            record.note = Some(note);
        }
    }
}

/// A reward that can be redeemed with points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gift {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    /// Cost in points
    pub score: i64,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_ref: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewGift {
    pub name: String,
    pub image: Option<String>,
    pub score: i64,
}

impl NewGift {
    pub fn new(name: impl Into<String>, score: i64) -> Self {
        Self {
            name: name.into(),
            image: None,
            score,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GiftPatch {
    pub name: Option<String>,
    pub image: Option<String>,
    pub score: Option<i64>,
    pub enabled: Option<bool>,
}

impl GiftPatch {
    pub fn apply(self, gift: &mut Gift) {
        if let Some(name) = self.name {
            gift.name = name;
        }
        if let Some(image) = self.image {
            gift.image = Some(image);
        }
        if let Some(score) = self.score {
            gift.score = score;
        }
        if let Some(enabled) = self.enabled {
            gift.enabled = enabled;
        }
    }
}

/// Redemption request lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    /// Requests only ever move out of `Pending`, once
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        self == RequestStatus::Pending && next.is_terminal()
    }
}

/// A child's request to redeem a gift. Name and cost are snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: EntityId,
    #[serde(default)]
    pub gift_id: Option<EntityId>,
    pub gift_name: String,
    pub score: i64,
    pub status: RequestStatus,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub processed_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_ref: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRequest {
    pub gift_id: Option<EntityId>,
    pub gift_name: String,
    pub score: i64,
}

impl NewRequest {
    pub fn for_gift(gift: &Gift) -> Self {
        Self {
            gift_id: Some(gift.id),
            gift_name: gift.name.clone(),
            score: gift.score,
        }
    }
}

/// Per-day score buckets for the calendar view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyScore {
    pub positive: i64,
    pub negative: i64,
}

impl DailyScore {
    pub fn net(&self) -> i64 {
        self.positive + self.negative
    }
}

/// Full local data dump
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataExport {
    pub tasks: Vec<Task>,
    pub records: Vec<Record>,
    pub gifts: Vec<Gift>,
    pub requests: Vec<Request>,
    pub export_date: DateTime<Utc>,
}

/// Data to load back in; absent collections are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataImport {
    #[serde(default)]
    pub tasks: Option<Vec<Task>>,
    #[serde(default)]
    pub records: Option<Vec<Record>>,
    #[serde(default)]
    pub gifts: Option<Vec<Gift>>,
    #[serde(default)]
    pub requests: Option<Vec<Request>>,
}

impl From<DataExport> for DataImport {
    fn from(export: DataExport) -> Self {
        Self {
            tasks: Some(export.tasks),
            records: Some(export.records),
            gifts: Some(export.gifts),
            requests: Some(export.requests),
        }
    }
}

/// Built-in task list installed on first run
pub fn default_tasks() -> Vec<Task> {
    let seed: [(&str, &str, i64); 18] = [
        ("算数", "10题/次", 3),
        ("英语绘本", "1本/次", 5),
        ("跳绳", "10个/次", 1),
        ("认真上课外班", "1次", 2),
        ("背古诗", "1首/次", 3),
        ("认真写字", "1次", 2),
        ("英语打卡", "1次", 2),
        ("晚9:30前上床", "1次", 2),
        ("早7:50前入园", "1次", 2),
        ("主动扫干净地", "1次", 2),
        ("在校得到贴纸", "1张/次", 3),
        ("练习尤克里里", "15分钟/次", 3),
        ("自己收拾书包", "1次", 1),
        ("周末收拾屋子", "1次", 10),
        ("养成穿脱鞋习惯", "1次", 10),
        ("一周不随意买东西", "1周", 10),
        ("读中文绘本", "1个故事/次", 1),
        ("用脏话骂人", "1次", -2),
    ];

    seed.iter()
        .zip(1..)
        .map(|(&(name, unit, score), n)| Task {
            id: SEED_TASK_ID_BASE + n,
            name: name.to_string(),
            unit: unit.to_string(),
            score,
            task_type: TaskType::for_score(score),
            enabled: true,
            local_ref: None,
        })
        .collect()
}
