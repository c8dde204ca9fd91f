//! Allocation models and the derived per-line allocation state.

use serde::{Deserialize, Serialize};

use super::prescription::PrescriptionLine;

/// A single (lot, quantity) pairing chosen for one line item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Allocation {
    /// Lot the units are taken from
    pub lot_id: String,
    /// Units taken from the lot
    pub quantity: u32,
}

impl Allocation {
    /// Create a new allocation.
    pub fn new(lot_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            lot_id: lot_id.into(),
            quantity,
        }
    }
}

/// Completion status of a line item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    /// Nothing allocated yet
    Unfulfilled,
    /// Some units allocated, fewer than required
    Partial,
    /// Allocated total equals the required quantity
    Satisfied,
    /// Allocated total exceeds the required quantity (never persisted)
    OverAllocated,
}

impl LineStatus {
    /// Classify an allocated total against a requirement.
    pub fn classify(allocated: u64, required: u32) -> Self {
        let required = u64::from(required);
        if allocated == 0 {
            LineStatus::Unfulfilled
        } else if allocated < required {
            LineStatus::Partial
        } else if allocated == required {
            LineStatus::Satisfied
        } else {
            LineStatus::OverAllocated
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Unfulfilled => "unfulfilled",
            LineStatus::Partial => "partial",
            LineStatus::Satisfied => "satisfied",
            LineStatus::OverAllocated => "over_allocated",
        }
    }
}

/// Derived allocation state of one line item.
///
/// Only built through [`LineAllocationState::recompute`], so the running total
/// and status always agree with the allocation list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineAllocationState {
    /// Line this state belongs to
    pub line_id: String,
    /// Medication of the line
    pub medication_id: String,
    /// Units required by the line
    pub required_quantity: u32,
    /// Current allocations (one entry per lot, no zero quantities)
    pub allocations: Vec<Allocation>,
    /// Sum of allocated quantities
    pub allocated: u64,
    /// Derived status
    pub status: LineStatus,
}

impl LineAllocationState {
    /// Empty state for a line.
    pub fn empty(line: &PrescriptionLine) -> Self {
        Self::recompute(line, Vec::new())
    }

    /// Rebuild the derived state from an allocation list.
    ///
    /// Zero-quantity entries are dropped and repeated lots are merged.
    pub fn recompute(line: &PrescriptionLine, allocations: Vec<Allocation>) -> Self {
        let mut merged: Vec<Allocation> = Vec::with_capacity(allocations.len());
        for allocation in allocations.into_iter().filter(|a| a.quantity > 0) {
            match merged.iter_mut().find(|m| m.lot_id == allocation.lot_id) {
                Some(existing) => existing.quantity = existing.quantity.saturating_add(allocation.quantity),
                None => merged.push(allocation),
            }
        }

        let allocated: u64 = merged.iter().map(|a| u64::from(a.quantity)).sum();

        Self {
            line_id: line.line_id.clone(),
            medication_id: line.medication_id.clone(),
            required_quantity: line.required_quantity,
            status: LineStatus::classify(allocated, line.required_quantity),
            allocations: merged,
            allocated,
        }
    }

    /// Units still to allocate.
    pub fn remaining(&self) -> u64 {
        u64::from(self.required_quantity).saturating_sub(self.allocated)
    }

    /// Quantity currently taken from a lot by this line.
    pub fn quantity_for(&self, lot_id: &str) -> u32 {
        self.allocations
            .iter()
            .find(|a| a.lot_id == lot_id)
            .map(|a| a.quantity)
            .unwrap_or(0)
    }

    /// Allocation list with one lot's quantity replaced (0 removes the lot).
    pub fn with_lot_quantity(&self, lot_id: &str, quantity: u32) -> Vec<Allocation> {
        let mut allocations: Vec<Allocation> = self
            .allocations
            .iter()
            .filter(|a| a.lot_id != lot_id)
            .cloned()
            .collect();
        if quantity > 0 {
            allocations.push(Allocation::new(lot_id, quantity));
        }
        allocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(required: u32) -> PrescriptionLine {
        PrescriptionLine::new("D1", "MED-1", required)
    }

    #[test]
    fn test_classify() {
        assert_eq!(LineStatus::classify(0, 10), LineStatus::Unfulfilled);
        assert_eq!(LineStatus::classify(4, 10), LineStatus::Partial);
        assert_eq!(LineStatus::classify(10, 10), LineStatus::Satisfied);
        assert_eq!(LineStatus::classify(11, 10), LineStatus::OverAllocated);
    }

    #[test]
    fn test_recompute_merges_and_drops_zero() {
        let state = LineAllocationState::recompute(
            &line(30),
            vec![
                Allocation::new("L1", 5),
                Allocation::new("L2", 0),
                Allocation::new("L1", 7),
            ],
        );

        assert_eq!(state.allocations, vec![Allocation::new("L1", 12)]);
        assert_eq!(state.allocated, 12);
        assert_eq!(state.status, LineStatus::Partial);
        assert_eq!(state.remaining(), 18);
    }

    #[test]
    fn test_with_lot_quantity_replaces_and_removes() {
        let state = LineAllocationState::recompute(
            &line(30),
            vec![Allocation::new("L1", 10), Allocation::new("L2", 5)],
        );

        let replaced = state.with_lot_quantity("L1", 3);
        assert!(replaced.contains(&Allocation::new("L1", 3)));
        assert!(replaced.contains(&Allocation::new("L2", 5)));

        let removed = state.with_lot_quantity("L2", 0);
        assert_eq!(removed, vec![Allocation::new("L1", 10)]);
    }

    #[test]
    fn test_empty_state() {
        let state = LineAllocationState::empty(&line(5));
        assert_eq!(state.status, LineStatus::Unfulfilled);
        assert_eq!(state.quantity_for("L1"), 0);
    }
}
