//! Translation between local entities and remote rows
//!
//! Local JSON is camelCase, remote columns are snake_case. The correlation token
//! (`localRef`) stays on the device, so no row shape here carries it.

use super::remote::{OrderBy, Row};
use crate::database::*;
use crate::error::{AppError, Result};
use crate::storage::StoredEntity;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Remote tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteTable {
    Tasks,
    Records,
    Gifts,
    Requests,
    Settings,
}

impl RemoteTable {
    /// Entity tables, in the order they are pulled and migrated
    pub const ENTITIES: [RemoteTable; 4] = [
        RemoteTable::Tasks,
        RemoteTable::Gifts,
        RemoteTable::Records,
        RemoteTable::Requests,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RemoteTable::Tasks => "xiwen_tasks",
            RemoteTable::Records => "xiwen_records",
            RemoteTable::Gifts => "xiwen_gifts",
            RemoteTable::Requests => "xiwen_requests",
            RemoteTable::Settings => "xiwen_settings",
        }
    }

    /// Short name handed to change listeners
    pub fn label(self) -> &'static str {
        match self {
            RemoteTable::Tasks => "tasks",
            RemoteTable::Records => "records",
            RemoteTable::Gifts => "gifts",
            RemoteTable::Requests => "requests",
            RemoteTable::Settings => "settings",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            RemoteTable::Tasks,
            RemoteTable::Records,
            RemoteTable::Gifts,
            RemoteTable::Requests,
            RemoteTable::Settings,
        ]
        .into_iter()
        .find(|t| t.name() == name)
    }

    /// Ordering applied on pull: positive tasks before negative ones with the highest
    /// rewards first, gifts in creation order, records and requests newest first.
    pub fn pull_order(self) -> Vec<OrderBy> {
        match self {
            RemoteTable::Tasks => vec![OrderBy::desc("type"), OrderBy::desc("score")],
            RemoteTable::Gifts => vec![OrderBy::asc("id")],
            RemoteTable::Records | RemoteTable::Requests => vec![OrderBy::desc("date")],
            RemoteTable::Settings => vec![OrderBy::asc("key")],
        }
    }
}

/// A local entity with a remote table counterpart
pub trait RemoteEntity: StoredEntity {
    const TABLE: RemoteTable;

    /// Row for a remote insert; the server assigns the id
    fn insert_row(&self) -> Result<Row>;

    /// Columns sent when the entity is edited
    fn update_row(&self) -> Result<Row>;

    fn from_row(row: Row) -> Result<Self>;
}

fn to_row<T: Serialize>(value: &T) -> Result<Row> {
    match serde_json::to_value(value)? {
        Value::Object(row) => Ok(row),
        other => Err(AppError::Generic(format!(
            "Expected a JSON object for a remote row, got {}",
            other
        ))),
    }
}

fn decode<T: DeserializeOwned>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

/// Server id of an inserted row
pub fn row_id(row: &Row) -> Option<EntityId> {
    row.get("id").and_then(Value::as_i64)
}

/// Accepts RFC 3339 timestamps and zone-less ones (taken as UTC)
fn flexible_datetime<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {}", raw)))
}

fn flexible_datetime_opt<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {}", raw))),
        None => Ok(None),
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

// ===== Tasks =====

#[derive(Debug, Serialize, Deserialize)]
struct TaskRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<EntityId>,
    name: String,
    #[serde(default)]
    unit: Option<String>,
    score: i64,
    #[serde(rename = "type", default)]
    task_type: Option<TaskType>,
    #[serde(default)]
    enabled: Option<bool>,
}

impl TaskRow {
    fn from_task(task: &Task) -> Self {
        Self {
            id: None,
            name: task.name.clone(),
            unit: Some(task.unit.clone()),
            score: task.score,
            task_type: Some(task.task_type),
            enabled: Some(task.enabled),
        }
    }
}

impl RemoteEntity for Task {
    const TABLE: RemoteTable = RemoteTable::Tasks;

    fn insert_row(&self) -> Result<Row> {
        to_row(&TaskRow::from_task(self))
    }

    fn update_row(&self) -> Result<Row> {
        to_row(&TaskRow::from_task(self))
    }

    fn from_row(row: Row) -> Result<Self> {
        let row: TaskRow = decode(row)?;
        Ok(Task {
            id: row.id.ok_or_else(|| missing_id("task"))?,
            task_type: row.task_type.unwrap_or_else(|| TaskType::for_score(row.score)),
            name: row.name,
            unit: row.unit.unwrap_or_default(),
            score: row.score,
            enabled: row.enabled.unwrap_or(true),
            local_ref: None,
        })
    }
}

// ===== Records =====

#[derive(Debug, Serialize, Deserialize)]
struct RecordRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<EntityId>,
    #[serde(default)]
    task_id: Option<EntityId>,
    task_name: String,
    score: i64,
    #[serde(default)]
    note: Option<String>,
    #[serde(deserialize_with = "flexible_datetime")]
    date: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct RecordEdit<'a> {
    score: i64,
    note: &'a str,
}

impl RemoteEntity for Record {
    const TABLE: RemoteTable = RemoteTable::Records;

    fn insert_row(&self) -> Result<Row> {
        to_row(&RecordRow {
            id: None,
            task_id: self.task_id.filter(|id| *id != 0),
            task_name: self.task_name.clone(),
            score: self.score,
            note: Some(self.note.clone().unwrap_or_default()),
            date: self.date,
        })
    }

    fn update_row(&self) -> Result<Row> {
        to_row(&RecordEdit {
            score: self.score,
            note: self.note.as_deref().unwrap_or_default(),
        })
    }

    fn from_row(row: Row) -> Result<Self> {
        let row: RecordRow = decode(row)?;
        Ok(Record {
            id: row.id.ok_or_else(|| missing_id("record"))?,
            task_id: row.task_id.filter(|id| *id != 0),
            task_name: row.task_name,
            score: row.score,
            note: row.note.filter(|n| !n.is_empty()),
            date: row.date,
            local_ref: None,
        })
    }
}

// ===== Gifts =====

#[derive(Debug, Serialize, Deserialize)]
struct GiftRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<EntityId>,
    name: String,
    #[serde(default)]
    image: Option<String>,
    score: i64,
    #[serde(default)]
    enabled: Option<bool>,
}

impl GiftRow {
    fn from_gift(gift: &Gift) -> Self {
        Self {
            id: None,
            name: gift.name.clone(),
            image: gift.image.clone(),
            score: gift.score,
            enabled: Some(gift.enabled),
        }
    }
}

impl RemoteEntity for Gift {
    const TABLE: RemoteTable = RemoteTable::Gifts;

    fn insert_row(&self) -> Result<Row> {
        to_row(&GiftRow::from_gift(self))
    }

    fn update_row(&self) -> Result<Row> {
        to_row(&GiftRow::from_gift(self))
    }

    fn from_row(row: Row) -> Result<Self> {
        let row: GiftRow = decode(row)?;
        Ok(Gift {
            id: row.id.ok_or_else(|| missing_id("gift"))?,
            name: row.name,
            image: row.image.filter(|i| !i.is_empty()),
            score: row.score,
            enabled: row.enabled.unwrap_or(true),
            local_ref: None,
        })
    }
}

// ===== Requests =====

#[derive(Debug, Serialize, Deserialize)]
struct RequestRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<EntityId>,
    #[serde(default)]
    gift_id: Option<EntityId>,
    gift_name: String,
    score: i64,
    status: RequestStatus,
    #[serde(deserialize_with = "flexible_datetime")]
    date: DateTime<Utc>,
    #[serde(
        default,
        deserialize_with = "flexible_datetime_opt",
        skip_serializing_if = "Option::is_none"
    )]
    processed_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct RequestEdit {
    status: RequestStatus,
    processed_date: Option<DateTime<Utc>>,
}

impl RemoteEntity for Request {
    const TABLE: RemoteTable = RemoteTable::Requests;

    fn insert_row(&self) -> Result<Row> {
        to_row(&RequestRow {
            id: None,
            gift_id: self.gift_id,
            gift_name: self.gift_name.clone(),
            score: self.score,
            status: self.status,
            date: self.date,
            processed_date: self.processed_date,
        })
    }

    fn update_row(&self) -> Result<Row> {
        to_row(&RequestEdit {
            status: self.status,
            processed_date: self.processed_date,
        })
    }

    fn from_row(row: Row) -> Result<Self> {
        let row: RequestRow = decode(row)?;
        Ok(Request {
            id: row.id.ok_or_else(|| missing_id("request"))?,
            gift_id: row.gift_id,
            gift_name: row.gift_name,
            score: row.score,
            status: row.status,
            date: row.date,
            processed_date: row.processed_date,
            local_ref: None,
        })
    }
}

// ===== Settings =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingRow {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, skip_deserializing)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SettingRow {
    /// Row for an upsert stamped with the current time
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            updated_at: Some(Utc::now()),
        }
    }

    pub fn into_row(self) -> Result<Row> {
        to_row(&self)
    }

    pub fn from_row(row: Row) -> Result<Self> {
        decode(row)
    }
}

fn missing_id(entity: &str) -> AppError {
    AppError::Remote(format!("{} row has no id", entity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_record_row_uses_remote_columns() {
        let record = Record {
            id: 1_731_000_000_000,
            task_id: Some(3),
            task_name: "跳绳".to_string(),
            score: 1,
            note: None,
            date: Utc::now(),
            local_ref: Some(uuid::Uuid::new_v4()),
        };

        let inserted = record.insert_row().unwrap();
        assert_eq!(inserted["task_id"], json!(3));
        assert_eq!(inserted["task_name"], json!("跳绳"));
        assert_eq!(inserted["note"], json!(""));
        assert!(!inserted.contains_key("id"));
        assert!(!inserted.contains_key("taskName"));
        assert!(!inserted.keys().any(|k| k.to_lowercase().contains("ref")));

        let edit = record.update_row().unwrap();
        assert_eq!(edit.len(), 2);
        assert!(edit.contains_key("score"));
        assert!(edit.contains_key("note"));
    }

    #[test]
    fn test_manual_record_sends_null_task_id() {
        let record = Record {
            id: 5,
            task_id: None,
            task_name: "积分初始化".to_string(),
            score: 40,
            note: Some("从纸质表格导入的初始积分".to_string()),
            date: Utc::now(),
            local_ref: None,
        };
        assert_eq!(record.insert_row().unwrap()["task_id"], Value::Null);
    }

    #[test]
    fn test_task_from_row_fills_defaults() {
        let task = Task::from_row(row(json!({
            "id": 12,
            "name": "用脏话骂人",
            "unit": "1次",
            "score": -2,
            "type": null,
            "enabled": null,
            "created_at": "2024-11-07T12:00:00+00:00"
        })))
        .unwrap();

        assert_eq!(task.id, 12);
        assert_eq!(task.task_type, TaskType::Negative);
        assert!(task.enabled);
        assert!(task.local_ref.is_none());
    }

    #[test]
    fn test_request_from_row_reads_processed_date() {
        let request = Request::from_row(row(json!({
            "id": 4,
            "gift_id": 2,
            "gift_name": "乐高",
            "score": 50,
            "status": "approved",
            "date": "2024-11-07T12:00:00.123456+00:00",
            "processed_date": "2024-11-08 09:30:00"
        })))
        .unwrap();

        assert_eq!(request.status, RequestStatus::Approved);
        assert_eq!(request.gift_id, Some(2));
        assert!(request.processed_date.is_some());

        let edit = request.update_row().unwrap();
        assert_eq!(edit["status"], json!("approved"));
        assert!(edit.contains_key("processed_date"));
    }

    #[test]
    fn test_row_without_id_is_rejected() {
        let result = Gift::from_row(row(json!({ "name": "贴纸", "score": 5 })));
        assert!(result.is_err());
    }

    #[test]
    fn test_table_names() {
        assert_eq!(RemoteTable::from_name("xiwen_gifts"), Some(RemoteTable::Gifts));
        assert_eq!(RemoteTable::from_name("gifts"), None);
        assert_eq!(RemoteTable::Requests.label(), "requests");
        assert_eq!(RemoteTable::Tasks.pull_order().len(), 2);
    }

    #[test]
    fn test_setting_row() {
        let setting = SettingRow::new("parent_pin", "4321");
        let encoded = setting.clone().into_row().unwrap();
        assert_eq!(encoded["key"], json!("parent_pin"));
        assert!(encoded.contains_key("updated_at"));

        let decoded = SettingRow::from_row(row(json!({ "key": "theme", "value": "pink" }))).unwrap();
        assert_eq!(decoded.value.as_deref(), Some("pink"));
    }
}
