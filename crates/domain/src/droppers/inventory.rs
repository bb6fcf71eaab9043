use std::collections::BTreeMap;

use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Physical slots in one section.
pub const SECTION_CAPACITY: usize = 9;

/// Sections a dropper can address (section numbers 1..=9).
pub const MAX_SECTIONS: usize = 9;

/// Pill name to count. Ordered so slot layout is deterministic.
pub type PillList = BTreeMap<String, u32>;

/// One physical slot inside a section
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Position {
    /// 1-based, unique within the section
    pub position: u8,
    pub pill_name: Option<String>,
    pub empty: bool,
}

impl Position {
    pub fn loaded(position: u8, pill_name: &str) -> Self {
        Self {
            position,
            pill_name: Some(pill_name.to_string()),
            empty: false,
        }
    }

    pub fn holds(&self, pill_name: &str) -> bool {
        !self.empty && self.pill_name.as_deref() == Some(pill_name)
    }
}

/// A named storage bay of a dropper
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Section {
    pub id: String,
    pub name: String,
    pub positions: Vec<Position>,
    /// Lowest loaded slot, 0 when nothing is loaded.
    pub current_position: u8,
    pub empty: bool,
}

/// Address of a position across a dropper's sections.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq, Hash, new)]
pub struct SlotRef {
    pub section_id: String,
    /// 1-based index of the section in the dropper
    pub section: u8,
    pub slot: u8,
}

impl Section {
    pub fn new_empty(id: String, name: String) -> Self {
        Self {
            id,
            name,
            positions: Vec::new(),
            current_position: 0,
            empty: true,
        }
    }

    /// Builds a loaded section by laying the pills out in consecutive slots,
    /// one pill name after another.
    pub fn with_pills(id: String, name: String, pills: &PillList) -> Result<Self, Error> {
        if pills.is_empty() {
            return Ok(Self::new_empty(id, name));
        }

        let mut total = 0usize;
        for (pill_name, count) in pills {
            if pill_name.trim().is_empty() {
                return Err(Error::validation("pill name must not be empty"));
            }
            if *count == 0 {
                return Err(Error::TooFewPills);
            }
            total += *count as usize;
        }
        if total > SECTION_CAPACITY {
            return Err(Error::CapacityExceeded {
                requested: total,
                capacity: SECTION_CAPACITY,
            });
        }

        let positions = pills
            .iter()
            .flat_map(|(pill_name, count)| std::iter::repeat(pill_name).take(*count as usize))
            .enumerate()
            .map(|(index, pill_name)| Position::loaded(index as u8 + 1, pill_name))
            .collect();

        let mut section = Self {
            id,
            name,
            positions,
            current_position: 0,
            empty: false,
        };
        section.refresh();
        Ok(section)
    }

    pub fn occupied(&self) -> usize {
        self.positions.iter().filter(|p| !p.empty).count()
    }

    pub fn free_slots(&self) -> usize {
        SECTION_CAPACITY.saturating_sub(self.occupied())
    }

    pub fn position(&self, slot: u8) -> Option<&Position> {
        self.positions.iter().find(|p| p.position == slot)
    }

    /// Picks the slots a reload of `count` pills would fill: dispensed slots
    /// first, then new slots appended after the last one.
    pub fn plan_reload(&self, section: u8, count: usize) -> Result<Vec<u8>, Error> {
        let free = self.free_slots();
        if count > free {
            return Err(Error::SectionFull {
                section,
                free,
                requested: count,
            });
        }

        let mut slots: Vec<u8> = self
            .positions
            .iter()
            .filter(|p| p.empty)
            .map(|p| p.position)
            .take(count)
            .collect();
        let mut next = self.positions.len() as u8 + 1;
        while slots.len() < count {
            slots.push(next);
            next += 1;
        }
        Ok(slots)
    }

    pub(crate) fn load(&mut self, slots: &[u8], pill_name: &str) {
        for &slot in slots {
            match self.positions.iter_mut().find(|p| p.position == slot) {
                Some(position) => *position = Position::loaded(slot, pill_name),
                None => self.positions.push(Position::loaded(slot, pill_name)),
            }
        }
        self.positions.sort_by_key(|p| p.position);
        self.refresh();
    }

    pub(crate) fn release(&mut self, slot: u8) {
        if let Some(position) = self.positions.iter_mut().find(|p| p.position == slot) {
            position.empty = true;
            position.pill_name = None;
        }
        self.refresh();
    }

    fn refresh(&mut self) {
        self.current_position = self
            .positions
            .iter()
            .filter(|p| !p.empty)
            .map(|p| p.position)
            .min()
            .unwrap_or(0);
        self.empty = self.current_position == 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pills(entries: &[(&str, u32)]) -> PillList {
        entries.iter().map(|(n, c)| (n.to_string(), *c)).collect()
    }

    #[test]
    fn empty_mapping_builds_an_empty_section() {
        let section = Section::with_pills("s".into(), "A".into(), &PillList::new()).unwrap();
        assert!(section.empty);
        assert!(section.positions.is_empty());
        assert_eq!(section.current_position, 0);
    }

    #[test]
    fn pills_are_flattened_into_contiguous_slots() {
        let section = Section::with_pills(
            "s".into(),
            "A".into(),
            &pills(&[("Aspirin", 3), ("Ibuprofen", 2)]),
        )
        .unwrap();

        assert!(!section.empty);
        assert_eq!(section.current_position, 1);
        let slots: Vec<u8> = section.positions.iter().map(|p| p.position).collect();
        assert_eq!(slots, vec![1, 2, 3, 4, 5]);
        assert!(section.positions.iter().all(|p| !p.empty));
        assert_eq!(section.positions.iter().filter(|p| p.holds("Aspirin")).count(), 3);
        assert_eq!(section.positions.iter().filter(|p| p.holds("Ibuprofen")).count(), 2);
    }

    #[test]
    fn more_than_nine_pills_is_rejected() {
        let err = Section::with_pills(
            "s".into(),
            "A".into(),
            &pills(&[("Ibuprofen", 3), ("Aspirin", 3), ("Plan B", 4)]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::CapacityExceeded {
                requested: 10,
                capacity: 9
            }
        );
    }

    #[test]
    fn zero_count_is_rejected() {
        let err = Section::with_pills("s".into(), "A".into(), &pills(&[("Aspirin", 0)]))
            .unwrap_err();
        assert_eq!(err, Error::TooFewPills);
    }

    #[test]
    fn reload_appends_after_the_last_slot() {
        let section =
            Section::with_pills("s".into(), "A".into(), &pills(&[("Aspirin", 2)])).unwrap();
        assert_eq!(section.plan_reload(1, 3).unwrap(), vec![3, 4, 5]);
    }

    #[test]
    fn reload_refills_dispensed_slots_first() {
        let mut section =
            Section::with_pills("s".into(), "A".into(), &pills(&[("Aspirin", 9)])).unwrap();
        section.release(2);
        section.release(5);
        assert_eq!(section.current_position, 1);

        assert_eq!(section.plan_reload(1, 2).unwrap(), vec![2, 5]);
        section.load(&[2, 5], "Brufen");
        assert!(section.position(2).unwrap().holds("Brufen"));
        assert_eq!(section.positions.len(), 9);
    }

    #[test]
    fn reload_beyond_capacity_is_rejected() {
        let section =
            Section::with_pills("s".into(), "A".into(), &pills(&[("Aspirin", 8)])).unwrap();
        assert_eq!(section.plan_reload(1, 1).unwrap(), vec![9]);
        assert_eq!(
            section.plan_reload(1, 2).unwrap_err(),
            Error::SectionFull {
                section: 1,
                free: 1,
                requested: 2
            }
        );
    }

    #[test]
    fn releasing_every_slot_marks_the_section_empty() {
        let mut section =
            Section::with_pills("s".into(), "A".into(), &pills(&[("Aspirin", 2)])).unwrap();
        section.release(1);
        assert_eq!(section.current_position, 2);
        section.release(2);
        assert!(section.empty);
        assert_eq!(section.current_position, 0);
    }
}
