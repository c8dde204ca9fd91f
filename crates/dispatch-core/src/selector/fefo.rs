//! First-expire-first-out allocation suggestions.

use serde::{Deserialize, Serialize};

use crate::models::{Allocation, Lot};

/// A suggested allocation for one line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Suggestion {
    /// Allocations in FEFO order
    pub allocations: Vec<Allocation>,
    /// Units the suggestion covers
    pub covered: u32,
    /// Units that cannot be covered by the snapshot
    pub shortfall: u32,
}

impl Suggestion {
    /// Whether the suggestion covers the full requirement.
    pub fn is_complete(&self) -> bool {
        self.shortfall == 0
    }
}

/// Lots sorted earliest-expiring first, ties by lot ID.
pub fn fefo_order(lots: &[Lot]) -> Vec<&Lot> {
    let mut ordered: Vec<&Lot> = lots.iter().collect();
    ordered.sort_by(|a, b| a.fefo_cmp(b));
    ordered
}

/// Greedy FEFO suggestion for `required_quantity` units.
///
/// `candidate_lots` must already be scoped to the line's medication. When the
/// lots run out first, the suggestion is short and `shortfall` is non-zero.
pub fn suggest_allocation(required_quantity: u32, candidate_lots: &[Lot]) -> Suggestion {
    let mut remaining = required_quantity;
    let mut allocations = Vec::new();

    for lot in fefo_order(candidate_lots) {
        if remaining == 0 {
            break;
        }
        if lot.is_exhausted() {
            continue;
        }
        let take = remaining.min(lot.available_quantity);
        allocations.push(Allocation::new(lot.lot_id.clone(), take));
        remaining -= take;
    }

    Suggestion {
        allocations,
        covered: required_quantity - remaining,
        shortfall: remaining,
    }
}

/// Summed availability of a medication's lots.
pub fn available_for(medication_id: &str, lots: &[Lot]) -> u64 {
    lots.iter()
        .filter(|lot| lot.medication_id == medication_id)
        .map(|lot| u64::from(lot.available_quantity))
        .sum()
}
