//! Proposal validation for one prescription line.

use std::collections::BTreeMap;

use crate::errors::{DispatchError, DispatchResult};
use crate::models::{Allocation, Lot, PrescriptionLine};

/// `Ok(total_allocated)` or the first violated rule.
pub type ValidationResult = DispatchResult<u32>;

/// Validate a proposed allocation list for `line` against `candidate_lots`.
///
/// Checks, in order:
/// 1. every referenced lot exists in the snapshot for the line's medication;
/// 2. the line total does not exceed `required_quantity`;
/// 3. the quantity taken from each lot does not exceed its availability.
///
/// Zero quantities mean "lot removed" and are skipped. Nothing is clamped.
pub fn validate_proposal(
    line: &PrescriptionLine,
    proposed: &[Allocation],
    candidate_lots: &[Lot],
) -> ValidationResult {
    let mut per_lot: BTreeMap<&str, (u64, &Lot)> = BTreeMap::new();
    let mut order: Vec<&str> = Vec::new();
    let mut total: u64 = 0;

    for allocation in proposed.iter().filter(|a| a.quantity > 0) {
        let lot = find_lot(line, &allocation.lot_id, candidate_lots).ok_or_else(|| {
            DispatchError::UnknownLot {
                line_id: line.line_id.clone(),
                lot_id: allocation.lot_id.clone(),
            }
        })?;

        let entry = per_lot.entry(lot.lot_id.as_str()).or_insert_with(|| {
            order.push(lot.lot_id.as_str());
            (0, lot)
        });
        entry.0 += u64::from(allocation.quantity);
        total += u64::from(allocation.quantity);
    }

    if total > u64::from(line.required_quantity) {
        return Err(DispatchError::LineOverAllocated {
            line_id: line.line_id.clone(),
            required: line.required_quantity,
            allocated: total,
        });
    }

    for lot_id in order {
        if let Some((quantity, lot)) = per_lot.get(lot_id) {
            if *quantity > u64::from(lot.available_quantity) {
                return Err(DispatchError::InvalidQuantity {
                    line_id: line.line_id.clone(),
                    lot_id: lot.lot_id.clone(),
                    quantity: i64::try_from(*quantity).unwrap_or(i64::MAX),
                    available: lot.available_quantity,
                });
            }
        }
    }

    // total <= required_quantity, so it fits
    Ok(u32::try_from(total).unwrap_or(line.required_quantity))
}

fn find_lot<'a>(line: &PrescriptionLine, lot_id: &str, lots: &'a [Lot]) -> Option<&'a Lot> {
    lots.iter()
        .find(|lot| lot.lot_id == lot_id && lot.medication_id == line.medication_id)
}
