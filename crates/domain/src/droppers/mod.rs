/// Dropper aggregate
pub mod aggregate;

/// Commands
pub mod commands;

/// Events
pub mod events;

/// Input DTOs
pub mod inputs;

/// Sections and positions
pub mod inventory;

/// Schedules and pill batches
pub mod schedule;

/// View (read model)
pub mod view;

/// Schedule index (read model queried by the dispatch loop)
pub mod index;

/// Dispenses committed by the dispatch loop
pub mod ledger;

/// In-memory view store
pub mod mem;

/// CQRS setup
pub mod cqrs;

/// Serialized access to droppers
pub mod service;

pub use aggregate::{Dropper, Services, AGGREGATE_TYPE};
pub use commands::Command;
pub use events::Event;
pub use index::{DynamoScheduleIndex, IndexQuery, MemScheduleIndex, ScheduleEntry, ScheduleIndex};
pub use ledger::{Dispense, DispenseLedger, LedgerQuery};
pub use inventory::{PillList, Position, Section, SlotRef, MAX_SECTIONS, SECTION_CAPACITY};
pub use mem::MemViewRepository;
pub use schedule::{PillBatch, Schedule};
pub use service::Inventory;
pub use view::{Query, View, ViewRepo};
