use chrono::{DateTime, Utc};
use cqrs_es::DomainEvent;
use serde::{Deserialize, Serialize};

use super::inventory::{Position, SlotRef};
use super::schedule::Schedule;

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "type")]
pub enum Event {
    DropperRegistered {
        id: String,
        serial_id: String,
        name: String,
        active: bool,
        machine_url: Option<String>,
        created_at: DateTime<Utc>,
    },

    DropperActivated {
        id: String,
        updated_at: DateTime<Utc>,
    },

    SectionCreated {
        id: String,
        section_id: String,
        name: String,
        positions: Vec<Position>,
        updated_at: DateTime<Utc>,
    },

    SectionReloaded {
        id: String,
        section_id: String,
        pill_name: String,
        slots: Vec<u8>,
        updated_at: DateTime<Utc>,
    },

    ScheduleCreated {
        id: String,
        schedule: Schedule,
        updated_at: DateTime<Utc>,
    },

    PillsDispensed {
        id: String,
        schedule_id: String,
        slots: Vec<SlotRef>,
        complete: bool,
        /// (pill name, missing count)
        #[serde(default)]
        shortages: Vec<(String, usize)>,
        dispensed_at: DateTime<Utc>,
    },

    DropperRemoved {
        id: String,
        schedule_ids: Vec<String>,
        updated_at: DateTime<Utc>,
    },
}

impl DomainEvent for Event {
    fn event_type(&self) -> String {
        match self {
            Event::DropperRegistered { .. } => "Dropper:Registered".to_string(),
            Event::DropperActivated { .. } => "Dropper:Activated".to_string(),
            Event::SectionCreated { .. } => "Dropper:SectionCreated".to_string(),
            Event::SectionReloaded { .. } => "Dropper:SectionReloaded".to_string(),
            Event::ScheduleCreated { .. } => "Dropper:ScheduleCreated".to_string(),
            Event::PillsDispensed { .. } => "Dropper:PillsDispensed".to_string(),
            Event::DropperRemoved { .. } => "Dropper:Removed".to_string(),
        }
    }

    fn event_version(&self) -> String {
        "1.0".to_string()
    }
}
