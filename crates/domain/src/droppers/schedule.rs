use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::inventory::PillList;

/// Longest accepted repeat interval, one leap year.
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 3600;

/// Recurring dispense directive of a dropper
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Schedule {
    pub id: String,
    /// Unique within the owning dropper
    pub name: String,
    pub active: bool,
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub interval_secs: u64,
    pub pills: PillBatch,
}

/// Medication owed by one schedule.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct PillBatch {
    pub pills: PillList,
    pub dispensed: bool,
    pub dispensed_at: Option<DateTime<Utc>>,
}

impl PillBatch {
    pub fn new(pills: PillList) -> Self {
        Self {
            pills,
            dispensed: false,
            dispensed_at: None,
        }
    }

    pub fn total(&self) -> usize {
        self.pills.values().map(|c| *c as usize).sum()
    }

    /// True when the batch was already dispensed within `guard` of `now`,
    /// i.e. during the occurrence currently being matched.
    pub fn served_recently(&self, now: DateTime<Utc>, guard: Duration) -> bool {
        self.dispensed_at
            .map(|at| {
                let elapsed = now - at;
                elapsed <= guard && elapsed >= -guard
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_dispense_is_detected_within_the_guard() {
        let now = Utc::now();
        let mut batch = PillBatch::new(PillList::from([("Aspirin".to_string(), 2)]));
        assert_eq!(batch.total(), 2);
        assert!(!batch.served_recently(now, Duration::seconds(10)));

        batch.dispensed_at = Some(now - Duration::seconds(6));
        assert!(batch.served_recently(now, Duration::seconds(10)));
        assert!(!batch.served_recently(now + Duration::hours(8), Duration::seconds(10)));
    }
}
