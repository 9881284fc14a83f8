//! Supabase-style REST backend
//!
//! Tables are served under `/rest/v1/{table}`; every call carries the anon key
//! both as `apikey` and as a bearer token.

use super::realtime;
use super::remote::*;
use crate::config::{SyncConfig, REMOTE_TIMEOUT_SECS};
use crate::database::EntityId;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;

pub struct PostgrestBackend {
    client: Client,
    config: SyncConfig,
}

impl PostgrestBackend {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REMOTE_TIMEOUT_SECS))
            .build()?;

        Ok(Self { client, config })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url.trim_end_matches('/'), table)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {}", self.config.anon_key))
            .header("Content-Type", "application/json")
    }

    async fn send(&self, table: &str, builder: RequestBuilder) -> Result<Response> {
        let response = self.authorized(builder).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Remote(format!("{} on {}: {}", status, table, body)));
        }

        Ok(response)
    }

    async fn rows(response: Response) -> Result<Vec<Row>> {
        let rows: Vec<Row> = response.json().await?;
        Ok(rows)
    }
}

/// Query pairs for `select`: equality filters then one `order` clause
pub fn query_params(filters: &[Filter], order: &[OrderBy]) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];

    for filter in filters {
        params.push((filter.column.clone(), format!("eq.{}", filter_value(&filter.value))));
    }

    if !order.is_empty() {
        let clause = order
            .iter()
            .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
            .collect::<Vec<_>>()
            .join(",");
        params.push(("order".to_string(), clause));
    }

    params
}

fn filter_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn id_filter(id: EntityId) -> [(String, String); 1] {
    [("id".to_string(), format!("eq.{}", id))]
}

#[async_trait]
impl RemoteBackend for PostgrestBackend {
    async fn ping(&self) -> Result<()> {
        let request = self
            .client
            .get(self.table_url("xiwen_settings"))
            .query(&[("select", "key"), ("limit", "1")]);
        self.send("xiwen_settings", request).await?;
        Ok(())
    }

    async fn select(&self, table: &str, filters: &[Filter], order: &[OrderBy]) -> Result<Vec<Row>> {
        let request = self
            .client
            .get(self.table_url(table))
            .query(&query_params(filters, order));
        let response = self.send(table, request).await?;
        Self::rows(response).await
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&rows);
        let response = self.send(table, request).await?;
        Self::rows(response).await
    }

    async fn update(&self, table: &str, patch: Row, id: EntityId) -> Result<()> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&id_filter(id))
            .json(&patch);
        self.send(table, request).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, id: EntityId) -> Result<Vec<Row>> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&id_filter(id))
            .header("Prefer", "return=representation");
        let response = self.send(table, request).await?;
        Self::rows(response).await
    }

    async fn upsert(&self, table: &str, row: Row, conflict_key: &str) -> Result<()> {
        let request = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", conflict_key)])
            .header("Prefer", "resolution=merge-duplicates")
            .json(&[row]);
        self.send(table, request).await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        table: &str,
        kinds: &[ChangeKind],
        callback: ChangeCallback,
    ) -> Result<Subscription> {
        let url = realtime::websocket_url(&self.config.url, &self.config.anon_key)?;
        let handle = tokio::spawn(realtime::listen(
            url,
            table.to_string(),
            kinds.to_vec(),
            callback,
        ));

        tracing::info!("Realtime listener started for {}", table);
        Ok(Subscription::new(table, handle))
    }
}
