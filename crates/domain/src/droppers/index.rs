use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use aws_sdk_dynamodb::{error::DisplayErrorContext, types::AttributeValue};
use chrono::{DateTime, Utc};
use cqrs_es::{persist::PersistenceError, EventEnvelope};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{Dropper, Event, Schedule};
use crate::matcher::CandidateWindow;

/// Flat projection of one schedule, queried by the dispatch loop
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct ScheduleEntry {
    pub dropper_id: String,
    pub schedule_id: String,
    pub name: String,
    pub active: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub interval_secs: u64,
}

impl ScheduleEntry {
    pub fn from_schedule(dropper_id: &str, schedule: &Schedule) -> Self {
        Self {
            dropper_id: dropper_id.to_string(),
            schedule_id: schedule.id.clone(),
            name: schedule.name.clone(),
            active: schedule.active,
            start_date: schedule.start_date,
            end_date: schedule.end_date,
            interval_secs: schedule.interval_secs,
        }
    }
}

/// Storage-side lookup of schedules by time window.
#[async_trait]
pub trait ScheduleIndex: Send + Sync {
    async fn upsert(&self, entry: ScheduleEntry) -> Result<(), PersistenceError>;

    async fn deactivate(&self, schedule_ids: &[String]) -> Result<(), PersistenceError>;

    /// Active schedules whose start and end satisfy `window`.
    async fn candidates(
        &self,
        window: &CandidateWindow,
    ) -> Result<Vec<ScheduleEntry>, PersistenceError>;
}

/// Keeps a [`ScheduleIndex`] in step with dropper events.
pub struct IndexQuery {
    index: Arc<dyn ScheduleIndex>,
}

impl IndexQuery {
    pub fn new(index: Arc<dyn ScheduleIndex>) -> Self {
        Self { index }
    }

    async fn update(&self, dropper_id: &str, event: &Event) -> Result<(), PersistenceError> {
        match event {
            Event::ScheduleCreated { schedule, .. } => {
                self.index
                    .upsert(ScheduleEntry::from_schedule(dropper_id, schedule))
                    .await
            }
            Event::DropperRemoved { schedule_ids, .. } if !schedule_ids.is_empty() => {
                self.index.deactivate(schedule_ids).await
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl cqrs_es::Query<Dropper> for IndexQuery {
    async fn dispatch(&self, dropper_id: &str, events: &[EventEnvelope<Dropper>]) {
        for event in events {
            if let Err(err) = self.update(dropper_id, &event.payload).await {
                tracing::error!("ScheduleIndex error for {}: {}", dropper_id, err);
            }
        }
    }
}

#[derive(Default)]
pub struct MemScheduleIndex {
    entries: RwLock<BTreeMap<String, ScheduleEntry>>,
}

#[async_trait]
impl ScheduleIndex for MemScheduleIndex {
    async fn upsert(&self, entry: ScheduleEntry) -> Result<(), PersistenceError> {
        self.entries
            .write()
            .await
            .insert(entry.schedule_id.clone(), entry);
        Ok(())
    }

    async fn deactivate(&self, schedule_ids: &[String]) -> Result<(), PersistenceError> {
        let mut entries = self.entries.write().await;
        for id in schedule_ids {
            if let Some(entry) = entries.get_mut(id) {
                entry.active = false;
            }
        }
        Ok(())
    }

    async fn candidates(
        &self,
        window: &CandidateWindow,
    ) -> Result<Vec<ScheduleEntry>, PersistenceError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| window.admits(entry))
            .cloned()
            .collect())
    }
}

/// DynamoDB item layout; timestamps are epoch millis so filter expressions
/// compare numerically.
#[derive(Serialize, Deserialize)]
struct IndexRecord {
    schedule_id: String,
    dropper_id: String,
    name: String,
    active: bool,
    start_ms: i64,
    end_ms: i64,
    interval_secs: u64,
}

impl From<ScheduleEntry> for IndexRecord {
    fn from(entry: ScheduleEntry) -> Self {
        Self {
            schedule_id: entry.schedule_id,
            dropper_id: entry.dropper_id,
            name: entry.name,
            active: entry.active,
            start_ms: entry.start_date.timestamp_millis(),
            end_ms: entry.end_date.timestamp_millis(),
            interval_secs: entry.interval_secs,
        }
    }
}

impl TryFrom<IndexRecord> for ScheduleEntry {
    type Error = PersistenceError;

    fn try_from(record: IndexRecord) -> Result<Self, Self::Error> {
        let timestamp = |ms: i64| {
            DateTime::from_timestamp_millis(ms).ok_or_else(|| {
                PersistenceError::DeserializationError(
                    format!("timestamp out of range: {}", ms).into(),
                )
            })
        };

        Ok(Self {
            start_date: timestamp(record.start_ms)?,
            end_date: timestamp(record.end_ms)?,
            schedule_id: record.schedule_id,
            dropper_id: record.dropper_id,
            name: record.name,
            active: record.active,
            interval_secs: record.interval_secs,
        })
    }
}

/// Schedule index stored in a DynamoDB table keyed by `schedule_id`.
pub struct DynamoScheduleIndex {
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl DynamoScheduleIndex {
    pub fn new(client: aws_sdk_dynamodb::Client, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }
}

fn connection_error<E: std::error::Error>(err: E) -> PersistenceError {
    PersistenceError::ConnectionError(DisplayErrorContext(&err).to_string().into())
}

fn millis(at: DateTime<Utc>) -> AttributeValue {
    AttributeValue::N(at.timestamp_millis().to_string())
}

#[async_trait]
impl ScheduleIndex for DynamoScheduleIndex {
    async fn upsert(&self, entry: ScheduleEntry) -> Result<(), PersistenceError> {
        let item = serde_dynamo::to_item(IndexRecord::from(entry))
            .map_err(|e| PersistenceError::UnknownError(e.to_string().into()))?;

        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(connection_error)?;
        Ok(())
    }

    async fn deactivate(&self, schedule_ids: &[String]) -> Result<(), PersistenceError> {
        for id in schedule_ids {
            self.client
                .update_item()
                .table_name(&self.table)
                .key("schedule_id", AttributeValue::S(id.clone()))
                .update_expression("SET #active = :inactive")
                .expression_attribute_names("#active", "active")
                .expression_attribute_values(":inactive", AttributeValue::Bool(false))
                .send()
                .await
                .map_err(connection_error)?;
        }
        Ok(())
    }

    async fn candidates(
        &self,
        window: &CandidateWindow,
    ) -> Result<Vec<ScheduleEntry>, PersistenceError> {
        let mut filter = "#active = :active AND start_ms <= :until AND end_ms > :after".to_string();
        if window.start_from.is_some() {
            filter.push_str(" AND start_ms >= :from");
        }

        let mut entries = Vec::new();
        let mut start_key = None;
        loop {
            let mut request = self
                .client
                .scan()
                .table_name(&self.table)
                .filter_expression(&filter)
                .expression_attribute_names("#active", "active")
                .expression_attribute_values(":active", AttributeValue::Bool(true))
                .expression_attribute_values(":until", millis(window.start_until))
                .expression_attribute_values(":after", millis(window.ends_after))
                .set_exclusive_start_key(start_key);
            if let Some(from) = window.start_from {
                request = request.expression_attribute_values(":from", millis(from));
            }

            let output = request.send().await.map_err(connection_error)?;
            for item in output.items() {
                let record: IndexRecord = serde_dynamo::from_item(item.clone()).map_err(|e| {
                    PersistenceError::DeserializationError(e.to_string().into())
                })?;
                entries.push(ScheduleEntry::try_from(record)?);
            }

            start_key = output.last_evaluated_key().cloned();
            if start_key.is_none() {
                break;
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn entry(id: &str, start: DateTime<Utc>) -> ScheduleEntry {
        ScheduleEntry {
            dropper_id: "dropper-1".to_string(),
            schedule_id: id.to_string(),
            name: id.to_string(),
            active: true,
            start_date: start,
            end_date: start + Duration::days(1),
            interval_secs: 3600,
        }
    }

    #[tokio::test]
    async fn memory_index_filters_by_window_and_activity() {
        let now = Utc::now();
        let index = MemScheduleIndex::default();
        index.upsert(entry("now", now)).await.unwrap();
        index
            .upsert(entry("later", now + Duration::minutes(5)))
            .await
            .unwrap();
        index.upsert(entry("gone", now)).await.unwrap();
        index.deactivate(&["gone".to_string()]).await.unwrap();

        let window = CandidateWindow {
            start_from: Some(now - Duration::seconds(5)),
            start_until: now + Duration::seconds(5),
            ends_after: now,
        };
        let found = index.candidates(&window).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|e| e.schedule_id.as_str()).collect();
        assert_eq!(ids, vec!["now"]);
    }

    #[test]
    fn records_round_trip_through_millis() {
        let start = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let original = entry("s", start);
        let back = ScheduleEntry::try_from(IndexRecord::from(original.clone())).unwrap();
        assert_eq!(back, original);
    }
}
