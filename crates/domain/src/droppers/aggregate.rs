use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use cqrs_es::Aggregate;
use serde::{Deserialize, Serialize};

use crate::allocator;
use crate::errors::Error;

use super::inventory::{PillList, Section, MAX_SECTIONS, SECTION_CAPACITY};
use super::schedule::{PillBatch, Schedule, MAX_INTERVAL_SECS};
use super::{Command, Event};

/// Dropper aggregate: a physical dispenser with its sections and schedules
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Dropper {
    pub id: String,
    /// External identifier the device answers to
    pub serial_id: String,
    pub active: bool,
    pub machine_url: Option<String>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub sections: Vec<Section>,
    pub schedules: Vec<Schedule>,

    pub deleted: bool,
}

pub const AGGREGATE_TYPE: &str = "Dropper";

#[derive(Clone, Default)]
pub struct Services {}

#[async_trait]
impl Aggregate for Dropper {
    type Command = Command;
    type Event = Event;
    type Error = Error;
    type Services = Services;

    fn aggregate_type() -> String {
        AGGREGATE_TYPE.to_string()
    }

    async fn handle(
        &self,
        command: Self::Command,
        _services: &Self::Services,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            Command::RegisterDropper {
                id,
                serial_id,
                name,
                active,
                machine_url,
            } => {
                self.validate_new()?;
                if name.trim().is_empty() {
                    return Err(Error::validation("dropper name must not be empty"));
                }

                Ok(vec![Event::DropperRegistered {
                    id,
                    serial_id,
                    name,
                    active,
                    machine_url,
                    created_at: Utc::now(),
                }])
            }

            Command::ActivateDropper => {
                self.validate_existing()?;
                if self.active {
                    return Ok(vec![]);
                }

                Ok(vec![Event::DropperActivated {
                    id: self.id.clone(),
                    updated_at: Utc::now(),
                }])
            }

            Command::CreateSection {
                section_id,
                name,
                pills,
            } => {
                self.validate_existing()?;
                if name.trim().is_empty() {
                    return Err(Error::validation("section name must not be empty"));
                }
                if self.sections.iter().any(|s| s.name == name) {
                    return Err(Error::DuplicateSection { name });
                }
                if self.sections.len() >= MAX_SECTIONS {
                    return Err(Error::TooManySections { max: MAX_SECTIONS });
                }

                let section = Section::with_pills(section_id, name, &pills)?;

                Ok(vec![Event::SectionCreated {
                    id: self.id.clone(),
                    section_id: section.id,
                    name: section.name,
                    positions: section.positions,
                    updated_at: Utc::now(),
                }])
            }

            Command::ReloadSection {
                section,
                pill_name,
                count,
            } => {
                if count < 1 {
                    return Err(Error::TooFewPills);
                }
                if count as usize > SECTION_CAPACITY {
                    return Err(Error::TooManyPills {
                        max: SECTION_CAPACITY,
                    });
                }
                if !(1..=MAX_SECTIONS as u8).contains(&section) {
                    return Err(Error::InvalidPosition { section });
                }
                if pill_name.trim().is_empty() {
                    return Err(Error::validation("pill name must not be empty"));
                }
                self.validate_existing()?;

                let target = self.section_by_number(section)?;
                let slots = target.plan_reload(section, count as usize)?;

                Ok(vec![Event::SectionReloaded {
                    id: self.id.clone(),
                    section_id: target.id.clone(),
                    pill_name,
                    slots,
                    updated_at: Utc::now(),
                }])
            }

            Command::CreateSchedule {
                schedule_id,
                name,
                description,
                active,
                start_date,
                end_date,
                interval_secs,
                pills,
            } => {
                self.validate_existing()?;
                if name.trim().is_empty() {
                    return Err(Error::validation("schedule name must not be empty"));
                }
                if self.schedules.iter().any(|s| s.name == name) {
                    return Err(Error::DuplicateSchedule { name });
                }
                if end_date <= start_date {
                    return Err(Error::validation("schedule must end after it starts"));
                }
                if interval_secs > MAX_INTERVAL_SECS {
                    return Err(Error::validation(format!(
                        "interval must be at most {} seconds",
                        MAX_INTERVAL_SECS
                    )));
                }
                validate_batch(&pills)?;

                Ok(vec![Event::ScheduleCreated {
                    id: self.id.clone(),
                    schedule: Schedule {
                        id: schedule_id,
                        name,
                        active,
                        description,
                        start_date,
                        end_date,
                        interval_secs,
                        pills: PillBatch::new(pills),
                    },
                    updated_at: Utc::now(),
                }])
            }

            Command::DispenseSchedule {
                schedule_id,
                at,
                guard_ms,
            } => {
                self.validate_existing()?;
                let schedule = self
                    .schedule(&schedule_id)
                    .ok_or_else(|| Error::ScheduleNotFound {
                        schedule_id: schedule_id.clone(),
                    })?;
                if !schedule.active
                    || schedule
                        .pills
                        .served_recently(at, Duration::milliseconds(guard_ms))
                {
                    return Ok(vec![]);
                }

                // Dispensed positions are empty, so they are never picked twice.
                let allocation = allocator::allocate(self, &schedule.pills);

                Ok(vec![Event::PillsDispensed {
                    id: self.id.clone(),
                    complete: allocation.is_complete(),
                    schedule_id,
                    slots: allocation.slots,
                    shortages: allocation.shortages,
                    dispensed_at: at,
                }])
            }

            Command::RemoveDropper => {
                self.validate_existing()?;

                Ok(vec![Event::DropperRemoved {
                    id: self.id.clone(),
                    schedule_ids: self.schedules.iter().map(|s| s.id.clone()).collect(),
                    updated_at: Utc::now(),
                }])
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            Event::DropperRegistered {
                id,
                serial_id,
                name,
                active,
                machine_url,
                created_at,
            } => {
                self.id = id;
                self.serial_id = serial_id;
                self.name = name;
                self.active = active;
                self.machine_url = machine_url;
                self.created_at = created_at;
                self.updated_at = created_at;
            }

            Event::DropperActivated { updated_at, .. } => {
                self.active = true;
                self.updated_at = updated_at;
            }

            Event::SectionCreated {
                section_id,
                name,
                positions,
                updated_at,
                ..
            } => {
                let mut section = Section::new_empty(section_id, name);
                for position in positions {
                    if let Some(pill_name) = position.pill_name.as_deref() {
                        section.load(&[position.position], pill_name);
                    }
                }
                self.sections.push(section);
                self.updated_at = updated_at;
            }

            Event::SectionReloaded {
                section_id,
                pill_name,
                slots,
                updated_at,
                ..
            } => {
                if let Some(section) = self.sections.iter_mut().find(|s| s.id == section_id) {
                    section.load(&slots, &pill_name);
                }
                self.updated_at = updated_at;
            }

            Event::ScheduleCreated {
                schedule,
                updated_at,
                ..
            } => {
                self.schedules.push(schedule);
                self.updated_at = updated_at;
            }

            Event::PillsDispensed {
                schedule_id,
                slots,
                complete,
                dispensed_at,
                ..
            } => {
                for slot in &slots {
                    if let Some(section) =
                        self.sections.iter_mut().find(|s| s.id == slot.section_id)
                    {
                        section.release(slot.slot);
                    }
                }
                if let Some(schedule) = self.schedules.iter_mut().find(|s| s.id == schedule_id) {
                    schedule.pills.dispensed = complete;
                    schedule.pills.dispensed_at = Some(dispensed_at);
                }
                self.updated_at = dispensed_at;
            }

            Event::DropperRemoved { updated_at, .. } => {
                self.deleted = true;
                self.active = false;
                for schedule in self.schedules.iter_mut() {
                    schedule.active = false;
                }
                self.updated_at = updated_at;
            }
        }
    }
}

impl Dropper {
    /// Section addressed by its 1-based number.
    pub fn section_by_number(&self, section: u8) -> Result<&Section, Error> {
        if self.sections.is_empty() {
            return Err(Error::SectionsEmpty);
        }
        (section as usize)
            .checked_sub(1)
            .and_then(|index| self.sections.get(index))
            .ok_or(Error::SectionNotFound { section })
    }

    pub fn schedule(&self, schedule_id: &str) -> Option<&Schedule> {
        self.schedules.iter().find(|s| s.id == schedule_id)
    }

    fn validate_new(&self) -> Result<(), Error> {
        if !self.id.is_empty() {
            return Err(Error::DuplicateDropper);
        }
        Ok(())
    }

    fn validate_existing(&self) -> Result<(), Error> {
        if self.id.is_empty() || self.deleted {
            return Err(Error::DropperNotFound);
        }
        Ok(())
    }
}

fn validate_batch(pills: &PillList) -> Result<(), Error> {
    if pills.is_empty() {
        return Err(Error::validation("schedule must owe at least one pill"));
    }
    for (pill_name, count) in pills {
        if pill_name.trim().is_empty() {
            return Err(Error::validation("pill name must not be empty"));
        }
        if *count == 0 {
            return Err(Error::TooFewPills);
        }
    }
    Ok(())
}
