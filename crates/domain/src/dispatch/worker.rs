//! Dispatch loop.
//!
//! Every tick the loop lists candidate schedules from the [`ScheduleIndex`],
//! keeps the ones the matcher reports as due, and asks each schedule's
//! dropper to commit a dispense of loaded positions. One drop command per
//! committed position is then queued. The dropper releases dispensed
//! positions and stamps the occurrence as part of that commit, so the next
//! tick neither selects them again nor serves the same occurrence twice.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use cqrs_es::EventStore;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::outbound::{CommandSender, DeviceCommand};
use crate::droppers::{Dropper, Inventory, ScheduleEntry, ScheduleIndex};
use crate::errors::Error;
use crate::matcher::{self, CandidateWindow, MatcherConfig};

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub tick: Duration,
    pub matcher: MatcherConfig,
    pub store_timeout: Duration,
    /// Consecutive failed schedule fetches before the loop gives up.
    pub max_fetch_failures: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(5),
            matcher: MatcherConfig::default(),
            store_timeout: Duration::from_secs(10),
            max_fetch_failures: 3,
        }
    }
}

/// Outcome counters of one cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub due: usize,
    pub dispatched: usize,
    pub commands: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Outcome {
    Dispatched(usize),
    Skipped,
}

pub struct Dispatcher<ES: EventStore<Dropper>> {
    inventory: Arc<Inventory<ES>>,
    index: Arc<dyn ScheduleIndex>,
    outbound: CommandSender,
    config: DispatchConfig,
    shutdown: watch::Receiver<bool>,
}

impl<ES: EventStore<Dropper>> Dispatcher<ES> {
    pub fn new(
        inventory: Arc<Inventory<ES>>,
        index: Arc<dyn ScheduleIndex>,
        outbound: CommandSender,
        config: DispatchConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inventory,
            index,
            outbound,
            config,
            shutdown,
        }
    }

    /// Runs until shutdown is signaled. Returns an error only when the loop
    /// cannot go on: the outbound queue is gone or fetching schedules kept
    /// failing.
    pub async fn run(&self) -> Result<(), Error> {
        info!(
            "Starting dispatch loop, tick {}s, alignment {:?}",
            self.config.tick.as_secs(),
            self.config.matcher.alignment
        );

        let mut shutdown = self.shutdown.clone();
        let mut fetch_failures = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.tick) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            match self.run_cycle(Utc::now()).await {
                Ok(report) => {
                    fetch_failures = 0;
                    if report.due > 0 {
                        info!(
                            "Dispatch cycle: {} due, {} dispatched, {} commands, {} skipped, {} failed",
                            report.due,
                            report.dispatched,
                            report.commands,
                            report.skipped,
                            report.failed
                        );
                    }
                }
                Err(Error::QueueClosed) => {
                    error!("Outbound queue closed, stopping dispatch loop");
                    return Err(Error::QueueClosed);
                }
                Err(err) => {
                    fetch_failures += 1;
                    error!(
                        "Failed to fetch schedules ({}/{}): {}",
                        fetch_failures, self.config.max_fetch_failures, err
                    );
                    if fetch_failures >= self.config.max_fetch_failures {
                        return Err(err);
                    }
                }
            }
        }

        info!("Dispatch loop shutting down");
        Ok(())
    }

    /// One pass at `now`. Per-schedule failures are logged and counted; only
    /// a failed schedule fetch or a closed queue is returned as an error.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, Error> {
        let mut report = CycleReport::default();

        let window = CandidateWindow::at(now, &self.config.matcher);
        let candidates = tokio::time::timeout(
            self.config.store_timeout,
            self.index.candidates(&window),
        )
        .await
        .map_err(|_| Error::StoreTimeout)??;

        if candidates.is_empty() {
            debug!("No schedules found");
            return Ok(report);
        }

        let due = matcher::due_schedules(now, &candidates, &self.config.matcher);
        report.due = due.len();

        for (position, entry) in due.iter().enumerate() {
            if *self.shutdown.borrow() {
                info!(
                    "Shutdown requested, leaving {} schedules for the next run",
                    due.len() - position
                );
                break;
            }

            match self.dispatch_schedule(entry, now).await {
                Ok(Outcome::Dispatched(commands)) => {
                    report.dispatched += 1;
                    report.commands += commands;
                }
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(Error::QueueClosed) => return Err(Error::QueueClosed),
                Err(err) => {
                    warn!(
                        "Schedule {} of dropper {} failed: {}",
                        entry.schedule_id, entry.dropper_id, err
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Commits the dispense before queueing its commands: a failed commit
    /// sends nothing, and a lost command is never resent (at-most-once).
    async fn dispatch_schedule(
        &self,
        entry: &ScheduleEntry,
        now: DateTime<Utc>,
    ) -> Result<Outcome, Error> {
        // The view only supplies the device serial, which never changes.
        let dropper = self.inventory.load(&entry.dropper_id).await?;
        if dropper.deleted {
            debug!("Dropper {} was removed", dropper.id);
            return Ok(Outcome::Skipped);
        }

        let guard = self.config.matcher.tolerance * 2;
        let Some(dispense) = self
            .inventory
            .dispense_schedule(&dropper.id, &entry.schedule_id, now, guard)
            .await?
        else {
            debug!(
                "Schedule {} is inactive or already served this occurrence",
                entry.schedule_id
            );
            return Ok(Outcome::Skipped);
        };

        for (pill_name, missing) in &dispense.shortages {
            warn!(
                "Dropper {} is short {} x {} for schedule {}",
                dropper.id, missing, pill_name, entry.schedule_id
            );
        }
        if dispense.slots.is_empty() {
            return Ok(Outcome::Skipped);
        }

        for slot in &dispense.slots {
            self.outbound
                .send(DeviceCommand::drop_pill(&dropper.serial_id, slot.slot))
                .await
                .map_err(|_| Error::QueueClosed)?;
        }

        info!(
            "Dispatched {} drops for schedule {} on dropper {}",
            dispense.slots.len(),
            entry.name,
            dropper.id
        );
        Ok(Outcome::Dispatched(dispense.slots.len()))
    }
}
