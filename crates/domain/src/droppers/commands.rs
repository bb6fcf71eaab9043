use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::inventory::PillList;

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub enum Command {
    /// Register a new dropper
    RegisterDropper {
        id: String,
        serial_id: String,
        name: String,
        active: bool,
        machine_url: Option<String>,
    },

    /// Mark the dropper as active
    ActivateDropper,

    /// Add a storage section, optionally preloaded with pills
    CreateSection {
        section_id: String,
        name: String,
        pills: PillList,
    },

    /// Load pills into section `section` (1-based)
    ReloadSection {
        section: u8,
        pill_name: String,
        count: u32,
    },

    /// Add a recurring dispense schedule with its pill batch
    CreateSchedule {
        schedule_id: String,
        name: String,
        description: String,
        active: bool,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        interval_secs: u64,
        pills: PillList,
    },

    /// Serve the occurrence of a schedule due at `at` from the loaded
    /// positions, unless it was already served within `guard_ms` (triggered
    /// by dispatcher)
    DispenseSchedule {
        schedule_id: String,
        at: DateTime<Utc>,
        guard_ms: i64,
    },

    /// Remove the dropper, keeping its history
    RemoveDropper,
}
