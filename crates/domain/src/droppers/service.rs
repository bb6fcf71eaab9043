use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex as SyncMutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cqrs_es::{CqrsFramework, EventStore};
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::errors::Error;

use super::inputs::{CreateScheduleInput, CreateSectionInput, ReloadSectionInput, RegisterDropperInput};
use super::inventory::{Position, MAX_SECTIONS};
use super::{Command, Dispense, DispenseLedger, Dropper, ViewRepo};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// One async mutex per dropper id. Held across load, check and commit so
/// capacity checks on the same dropper never interleave. An entry lives only
/// while someone holds or waits for it.
#[derive(Default)]
struct DropperLocks {
    locks: SyncMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DropperLocks {
    async fn acquire(&self, dropper_id: &str) -> DropperGuard<'_> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(dropper_id.to_string())
            .or_default()
            .clone();

        DropperGuard {
            locks: self,
            dropper_id: dropper_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    fn release(&self, dropper_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(dropper_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(dropper_id);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct DropperGuard<'a> {
    locks: &'a DropperLocks,
    dropper_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DropperGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(&self.dropper_id);
    }
}

/// Entry point for every dropper mutation and read.
pub struct Inventory<ES: EventStore<Dropper>> {
    cqrs: Arc<CqrsFramework<Dropper, ES>>,
    repo: ViewRepo,
    ledger: Arc<DispenseLedger>,
    locks: DropperLocks,
    timeout: Duration,
}

impl<ES: EventStore<Dropper>> Inventory<ES> {
    /// `ledger` must be fed by a `LedgerQuery` registered on `cqrs`.
    pub fn new(
        cqrs: Arc<CqrsFramework<Dropper, ES>>,
        repo: ViewRepo,
        ledger: Arc<DispenseLedger>,
    ) -> Self {
        Self {
            cqrs,
            repo,
            ledger,
            locks: DropperLocks::default(),
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn register_dropper(&self, input: RegisterDropperInput) -> Result<Dropper, Error> {
        let id = Ulid::new().to_string();
        let command = Command::RegisterDropper {
            id: id.clone(),
            serial_id: Ulid::new().to_string(),
            name: input.name,
            active: input.active,
            machine_url: input.machine_url,
        };

        let dropper = self.execute(&id, command).await?;
        tracing::info!("Registered dropper {} ({})", dropper.id, dropper.serial_id);
        Ok(dropper)
    }

    pub async fn activate_dropper(&self, dropper_id: &str) -> Result<Dropper, Error> {
        self.execute(dropper_id, Command::ActivateDropper).await
    }

    /// Creates a section and returns its id.
    pub async fn create_section(
        &self,
        dropper_id: &str,
        input: CreateSectionInput,
    ) -> Result<String, Error> {
        let section_id = Ulid::new().to_string();
        let command = Command::CreateSection {
            section_id: section_id.clone(),
            name: input.name,
            pills: input.pills,
        };

        self.execute(dropper_id, command).await?;
        tracing::info!("Created section {} on dropper {}", section_id, dropper_id);
        Ok(section_id)
    }

    /// Loads pills into a section and returns the refreshed dropper.
    pub async fn reload_section(
        &self,
        dropper_id: &str,
        input: ReloadSectionInput,
    ) -> Result<Dropper, Error> {
        let command = Command::ReloadSection {
            section: input.section,
            pill_name: input.pill_name,
            count: input.quantity,
        };

        self.execute(dropper_id, command).await
    }

    /// Creates a schedule with its pill batch and returns the schedule id.
    pub async fn create_schedule(
        &self,
        dropper_id: &str,
        input: CreateScheduleInput,
    ) -> Result<String, Error> {
        let schedule_id = Ulid::new().to_string();
        let command = Command::CreateSchedule {
            schedule_id: schedule_id.clone(),
            name: input.name,
            description: input.description,
            active: input.active,
            start_date: input.start_date,
            end_date: input.end_date,
            interval_secs: input.interval_secs,
            pills: input.pills,
        };

        self.execute(dropper_id, command).await?;
        tracing::info!("Created schedule {} on dropper {}", schedule_id, dropper_id);
        Ok(schedule_id)
    }

    pub async fn remove_dropper(&self, dropper_id: &str) -> Result<(), Error> {
        self.execute(dropper_id, Command::RemoveDropper).await?;
        tracing::info!("Removed dropper {}", dropper_id);
        Ok(())
    }

    /// Serves the occurrence of `schedule_id` due at `at` and returns the
    /// committed slots. The dropper decides from its event history, not from
    /// the view, so a stale view cannot cause a second dispense. Returns
    /// `None` when the schedule is inactive or was served within `guard`.
    pub async fn dispense_schedule(
        &self,
        dropper_id: &str,
        schedule_id: &str,
        at: DateTime<Utc>,
        guard: ChronoDuration,
    ) -> Result<Option<Dispense>, Error> {
        let _lock = self.locks.acquire(dropper_id).await;

        let command_id = Ulid::new().to_string();
        let command = Command::DispenseSchedule {
            schedule_id: schedule_id.to_string(),
            at,
            guard_ms: guard.num_milliseconds(),
        };
        self.commit(dropper_id, &command_id, command).await?;

        Ok(self.ledger.take(&command_id).await)
    }

    pub async fn section_positions(
        &self,
        dropper_id: &str,
        section: u8,
    ) -> Result<Vec<Position>, Error> {
        if !(1..=MAX_SECTIONS as u8).contains(&section) {
            return Err(Error::InvalidPosition { section });
        }
        let dropper = self.load(dropper_id).await?;
        Ok(dropper.section_by_number(section)?.positions.clone())
    }

    /// Current state of a dropper, read from the view store.
    pub async fn load(&self, dropper_id: &str) -> Result<Dropper, Error> {
        self.bounded(self.repo.load(dropper_id))
            .await?
            .map(|view| view.dropper)
            .ok_or(Error::DropperNotFound)
    }

    async fn execute(&self, dropper_id: &str, command: Command) -> Result<Dropper, Error> {
        let _guard = self.locks.acquire(dropper_id).await;

        self.commit(dropper_id, &Ulid::new().to_string(), command).await?;

        // Read back while still holding the lock so callers see their own write.
        self.load(dropper_id).await
    }

    async fn commit(&self, dropper_id: &str, command_id: &str, command: Command) -> Result<(), Error> {
        let mut metadata = HashMap::new();
        metadata.insert("command_id".to_string(), command_id.to_string());

        self.bounded(
            self.cqrs
                .execute_with_metadata(dropper_id, command, metadata),
        )
        .await
    }

    async fn bounded<T, E, F>(&self, call: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<Error>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(Error::StoreTimeout),
        }
    }
}
