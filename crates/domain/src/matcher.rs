//! Selection of the schedules that are due at a given instant.
//!
//! Matching runs in two stages. The storage-side stage ([`CandidateWindow`])
//! narrows the schedules a store has to return; the alignment stage checks
//! each candidate against the configured [`Alignment`]. Both stages use the
//! same tolerance, which should cover one dispatch tick.

use chrono::{DateTime, Duration, Utc};

use crate::droppers::ScheduleEntry;

/// How a schedule's start is related to the instants it is due at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Alignment {
    /// Due when the start lies within the tolerance of `now` and the start
    /// date combined with the current time of day is `offset` behind the
    /// start. Reproduces the legacy 8 hour matcher with `offset = 8h`.
    Fixed(Duration),
    /// Due when `now` is within the tolerance of `start + k * interval`.
    Interval,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatcherConfig {
    pub tolerance: Duration,
    pub alignment: Alignment,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            tolerance: Duration::seconds(5),
            alignment: Alignment::Interval,
        }
    }
}

impl MatcherConfig {
    pub fn legacy() -> Self {
        Self {
            tolerance: Duration::seconds(5),
            alignment: Alignment::Fixed(Duration::hours(8)),
        }
    }
}

/// Bounds a store applies when listing candidate schedules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateWindow {
    pub start_from: Option<DateTime<Utc>>,
    pub start_until: DateTime<Utc>,
    pub ends_after: DateTime<Utc>,
}

impl CandidateWindow {
    pub fn at(now: DateTime<Utc>, config: &MatcherConfig) -> Self {
        let start_from = match config.alignment {
            Alignment::Fixed(_) => Some(now - config.tolerance),
            Alignment::Interval => None,
        };
        Self {
            start_from,
            start_until: now + config.tolerance,
            ends_after: now,
        }
    }

    pub fn admits(&self, entry: &ScheduleEntry) -> bool {
        entry.active
            && entry.end_date > self.ends_after
            && entry.start_date <= self.start_until
            && self.start_from.map_or(true, |from| entry.start_date >= from)
    }
}

/// Returns the candidates that are due at `now`. A candidate failing a check
/// is skipped; the others are still considered.
pub fn due_schedules(
    now: DateTime<Utc>,
    candidates: &[ScheduleEntry],
    config: &MatcherConfig,
) -> Vec<ScheduleEntry> {
    let window = CandidateWindow::at(now, config);
    candidates
        .iter()
        .filter(|entry| window.admits(entry))
        .filter(|entry| is_aligned(now, entry, config))
        .cloned()
        .collect()
}

fn within(value: Duration, target: Duration, tolerance: Duration) -> bool {
    value >= target - tolerance && value <= target + tolerance
}

fn is_aligned(now: DateTime<Utc>, entry: &ScheduleEntry, config: &MatcherConfig) -> bool {
    let start = entry.start_date;
    match config.alignment {
        Alignment::Fixed(offset) => {
            let synthetic = start.date_naive().and_time(now.time()).and_utc();
            within(start - synthetic, offset, config.tolerance)
        }
        Alignment::Interval => {
            let elapsed = (now - start).num_milliseconds();
            let tolerance = config.tolerance.num_milliseconds();
            if entry.interval_secs == 0 {
                return elapsed >= -tolerance && elapsed <= tolerance;
            }
            // Out-of-range intervals never align.
            let Some(interval) = i64::try_from(entry.interval_secs)
                .ok()
                .and_then(|secs| secs.checked_mul(1000))
            else {
                return false;
            };
            let phase = elapsed.rem_euclid(interval);
            phase <= tolerance || interval - phase <= tolerance
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, s).unwrap()
    }

    fn entry(start: DateTime<Utc>, interval_secs: u64) -> ScheduleEntry {
        ScheduleEntry {
            dropper_id: "dropper-1".to_string(),
            schedule_id: "schedule-1".to_string(),
            name: "Morning".to_string(),
            active: true,
            start_date: start,
            end_date: start + Duration::days(30),
            interval_secs,
        }
    }

    fn fixed(offset: Duration) -> MatcherConfig {
        MatcherConfig {
            tolerance: Duration::seconds(5),
            alignment: Alignment::Fixed(offset),
        }
    }

    #[test]
    fn inactive_schedules_are_never_due() {
        let now = at(8, 0, 0);
        let mut schedule = entry(now, 3600);
        schedule.active = false;
        assert!(due_schedules(now, &[schedule.clone()], &MatcherConfig::default()).is_empty());
        assert!(due_schedules(now, &[schedule], &fixed(Duration::zero())).is_empty());
    }

    #[test]
    fn ended_schedules_are_never_due() {
        let now = at(8, 0, 0);
        let mut schedule = entry(now, 3600);
        schedule.end_date = now;
        assert!(due_schedules(now, &[schedule], &MatcherConfig::default()).is_empty());
    }

    #[test]
    fn fixed_mode_excludes_starts_outside_the_tolerance() {
        let now = at(8, 0, 0);
        let config = fixed(Duration::zero());
        assert_eq!(due_schedules(now, &[entry(at(8, 0, 4), 0)], &config).len(), 1);
        assert_eq!(due_schedules(now, &[entry(at(7, 59, 55), 0)], &config).len(), 1);
        assert!(due_schedules(now, &[entry(at(8, 0, 6), 0)], &config).is_empty());
        assert!(due_schedules(now, &[entry(at(7, 59, 54), 0)], &config).is_empty());
    }

    #[test]
    fn legacy_offset_rejects_a_start_at_now() {
        let now = at(8, 0, 0);
        assert!(due_schedules(now, &[entry(now, 0)], &MatcherConfig::legacy()).is_empty());
    }

    #[test]
    fn mismatch_skips_only_that_schedule() {
        let now = at(16, 0, 0);
        let mut misaligned = entry(at(13, 0, 0), 8 * 3600);
        misaligned.schedule_id = "misaligned".to_string();
        let aligned = entry(at(8, 0, 1), 8 * 3600);

        let due = due_schedules(now, &[misaligned, aligned.clone()], &MatcherConfig::default());
        assert_eq!(due, vec![aligned]);
    }

    #[test]
    fn interval_mode_matches_every_occurrence() {
        let start = at(8, 0, 0);
        let schedule = entry(start, 8 * 3600);
        let config = MatcherConfig::default();

        for now in [
            start,
            start + Duration::hours(8) + Duration::seconds(3),
            start + Duration::hours(16) - Duration::seconds(5),
            start + Duration::days(3),
        ] {
            assert_eq!(due_schedules(now, &[schedule.clone()], &config).len(), 1, "{now}");
        }
        for now in [
            start - Duration::seconds(6),
            start + Duration::hours(4),
            start + Duration::hours(8) + Duration::seconds(6),
        ] {
            assert!(due_schedules(now, &[schedule.clone()], &config).is_empty(), "{now}");
        }
    }

    #[test]
    fn zero_interval_is_a_single_occurrence() {
        let start = at(8, 0, 0);
        let schedule = entry(start, 0);
        let config = MatcherConfig::default();
        assert_eq!(due_schedules(start + Duration::seconds(2), &[schedule.clone()], &config).len(), 1);
        assert!(due_schedules(start + Duration::hours(1), &[schedule], &config).is_empty());
    }

    #[test]
    fn huge_intervals_are_not_due_after_start() {
        let start = at(8, 0, 0);
        let config = MatcherConfig::default();
        for interval_secs in [1_000_000_000_000_000, 100_000_000_000_000_000, u64::MAX] {
            let schedule = entry(start, interval_secs);
            assert!(
                due_schedules(start + Duration::hours(1), &[schedule], &config).is_empty(),
                "{interval_secs}"
            );
        }
    }

    #[test]
    fn candidate_window_depends_on_alignment() {
        let now = at(8, 0, 0);
        let legacy = CandidateWindow::at(now, &fixed(Duration::hours(8)));
        assert_eq!(legacy.start_from, Some(now - Duration::seconds(5)));
        let interval = CandidateWindow::at(now, &MatcherConfig::default());
        assert_eq!(interval.start_from, None);
        assert!(interval.admits(&entry(now - Duration::days(2), 3600)));
        assert!(!legacy.admits(&entry(now - Duration::days(2), 3600)));
    }
}
