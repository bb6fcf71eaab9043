use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::inventory::PillList;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterDropperInput {
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub machine_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateSectionInput {
    pub name: String,
    #[serde(default)]
    pub pills: PillList,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReloadSectionInput {
    /// 1-based section number
    pub section: u8,
    pub pill_name: String,
    pub quantity: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateScheduleInput {
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Seconds between dispenses
    pub interval_secs: u64,
    pub pills: PillList,
}

fn default_active() -> bool {
    true
}
