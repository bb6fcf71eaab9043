use std::sync::Arc;

use async_trait::async_trait;
use cqrs_es::{
    persist::{PersistenceError, ViewContext, ViewRepository},
    Aggregate, EventEnvelope, View as CqrsView,
};
use serde::{Deserialize, Serialize};

use super::Dropper;

/// Shared handle to the dropper read model store
pub type ViewRepo = Arc<Box<dyn ViewRepository<View, Dropper>>>;

/// Read model of one dropper, with sections, positions and schedules preloaded
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct View {
    pub id: String,
    /// Command that produced the latest applied event
    pub command_id: String,
    /// Sequence of the latest applied event
    pub sequence: usize,
    pub dropper: Dropper,
}

impl CqrsView<Dropper> for View {
    fn update(&mut self, event: &EventEnvelope<Dropper>) {
        // Redelivered events are already folded in.
        if event.sequence <= self.sequence {
            return;
        }

        self.id.clone_from(&event.aggregate_id);
        self.sequence = event.sequence;
        if let Some(command_id) = event.metadata.get("command_id") {
            self.command_id.clone_from(command_id);
        }
        self.dropper.apply(event.payload.clone());
    }
}

/// Projects dropper events into the [`ViewRepo`].
pub struct Query {
    repo: ViewRepo,
}

impl Query {
    pub fn new(repo: ViewRepo) -> Self {
        Self { repo }
    }

    async fn project(
        &self,
        dropper_id: &str,
        events: &[EventEnvelope<Dropper>],
    ) -> Result<(), PersistenceError> {
        let (mut view, context) = self
            .repo
            .load_with_context(dropper_id)
            .await?
            .unwrap_or_else(|| (View::default(), ViewContext::new(dropper_id.to_string(), 0)));

        let before = view.sequence;
        events.iter().for_each(|event| view.update(event));
        if view.sequence == before {
            return Ok(());
        }

        self.repo.update_view(view, context).await
    }
}

#[async_trait]
impl cqrs_es::Query<Dropper> for Query {
    async fn dispatch(&self, dropper_id: &str, events: &[EventEnvelope<Dropper>]) {
        if let Err(err) = self.project(dropper_id, events).await {
            tracing::error!("Dropper view for {} not updated: {}", dropper_id, err);
        }
    }
}
