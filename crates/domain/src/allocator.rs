//! Resolution of owed pills to loaded physical positions.

use crate::droppers::{Dropper, PillBatch, SlotRef};

/// Positions picked for a pill batch, plus whatever could not be covered.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Allocation {
    pub slots: Vec<SlotRef>,
    /// (pill name, missing count)
    pub shortages: Vec<(String, usize)>,
}

impl Allocation {
    pub fn is_complete(&self) -> bool {
        self.shortages.is_empty()
    }
}

/// Up to `needed` loaded positions holding `pill_name`, in ascending section
/// then slot order. Dispensed positions are empty and never returned.
pub fn resolve_positions(dropper: &Dropper, pill_name: &str, needed: usize) -> Vec<SlotRef> {
    dropper
        .sections
        .iter()
        .enumerate()
        .flat_map(|(index, section)| {
            section
                .positions
                .iter()
                .filter(|p| p.holds(pill_name))
                .map(move |p| SlotRef::new(section.id.clone(), index as u8 + 1, p.position))
        })
        .take(needed)
        .collect()
}

/// Resolves every pill of `batch`.
pub fn allocate(dropper: &Dropper, batch: &PillBatch) -> Allocation {
    let mut allocation = Allocation::default();
    for (pill_name, count) in &batch.pills {
        let needed = *count as usize;
        let slots = resolve_positions(dropper, pill_name, needed);
        if slots.len() < needed {
            allocation
                .shortages
                .push((pill_name.clone(), needed - slots.len()));
        }
        allocation.slots.extend(slots);
    }
    allocation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::droppers::{PillList, Section};

    fn dropper() -> Dropper {
        let mut first = Section::with_pills(
            "s1".to_string(),
            "A".to_string(),
            &PillList::from([("Aspirin".to_string(), 2), ("Brufen".to_string(), 1)]),
        )
        .unwrap();
        first.release(1);
        let second = Section::with_pills(
            "s2".to_string(),
            "B".to_string(),
            &PillList::from([("Aspirin".to_string(), 3)]),
        )
        .unwrap();

        Dropper {
            id: "dropper-1".to_string(),
            sections: vec![first, second],
            ..Default::default()
        }
    }

    #[test]
    fn positions_are_taken_in_section_then_slot_order() {
        let slots = resolve_positions(&dropper(), "Aspirin", 3);
        assert_eq!(
            slots,
            vec![
                SlotRef::new("s1".to_string(), 1, 2),
                SlotRef::new("s2".to_string(), 2, 1),
                SlotRef::new("s2".to_string(), 2, 2),
            ]
        );
    }

    #[test]
    fn unknown_pill_resolves_to_nothing() {
        assert!(resolve_positions(&dropper(), "Paracetamol", 2).is_empty());
    }

    #[test]
    fn shortages_are_reported_per_pill() {
        let batch = PillBatch::new(PillList::from([
            ("Aspirin".to_string(), 5),
            ("Brufen".to_string(), 1),
        ]));
        let allocation = allocate(&dropper(), &batch);

        assert_eq!(allocation.slots.len(), 5);
        assert_eq!(allocation.shortages, vec![("Aspirin".to_string(), 1)]);
        assert!(!allocation.is_complete());
    }
}
