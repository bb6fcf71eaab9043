use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use cqrs_es::EventEnvelope;
use tokio::sync::Mutex;

use super::inventory::SlotRef;
use super::{Dropper, Event};

/// Slots a dropper committed to dispense for one schedule occurrence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dispense {
    pub schedule_id: String,
    pub slots: Vec<SlotRef>,
    pub complete: bool,
    /// (pill name, missing count)
    pub shortages: Vec<(String, usize)>,
}

/// Committed dispenses keyed by the `command_id` that produced them. Filled
/// while the command executes, taken right after it returns.
#[derive(Default)]
pub struct DispenseLedger {
    entries: Mutex<HashMap<String, Dispense>>,
}

impl DispenseLedger {
    pub async fn take(&self, command_id: &str) -> Option<Dispense> {
        self.entries.lock().await.remove(command_id)
    }

    async fn record(&self, event: &EventEnvelope<Dropper>) {
        let Event::PillsDispensed {
            schedule_id,
            slots,
            complete,
            shortages,
            ..
        } = &event.payload
        else {
            return;
        };
        let Some(command_id) = event.metadata.get("command_id") else {
            tracing::warn!(
                "Dispense for {} committed without a command id",
                event.aggregate_id
            );
            return;
        };

        self.entries.lock().await.insert(
            command_id.clone(),
            Dispense {
                schedule_id: schedule_id.clone(),
                slots: slots.clone(),
                complete: *complete,
                shortages: shortages.clone(),
            },
        );
    }
}

/// Feeds committed `PillsDispensed` events into a [`DispenseLedger`].
pub struct LedgerQuery {
    ledger: Arc<DispenseLedger>,
}

impl LedgerQuery {
    pub fn new(ledger: Arc<DispenseLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl cqrs_es::Query<Dropper> for LedgerQuery {
    async fn dispatch(&self, _dropper_id: &str, events: &[EventEnvelope<Dropper>]) {
        for event in events {
            self.ledger.record(event).await;
        }
    }
}
