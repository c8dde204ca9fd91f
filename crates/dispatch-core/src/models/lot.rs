//! Inventory lot models.

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A physical batch of a medication as seen in one inventory snapshot.
///
/// `available_quantity` belongs to the inventory ledger. The dispatch engine
/// only reads it and proposes deductions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lot {
    /// Opaque stock identifier
    pub lot_id: String,
    /// Medication this lot belongs to
    pub medication_id: String,
    /// Printed lot number (display only)
    pub lot_number: String,
    /// Expiration date
    pub expiration_date: NaiveDate,
    /// Units currently available
    pub available_quantity: u32,
}

impl Lot {
    /// Create a new lot snapshot entry.
    pub fn new(
        lot_id: impl Into<String>,
        medication_id: impl Into<String>,
        lot_number: impl Into<String>,
        expiration_date: NaiveDate,
        available_quantity: u32,
    ) -> Self {
        Self {
            lot_id: lot_id.into(),
            medication_id: medication_id.into(),
            lot_number: lot_number.into(),
            expiration_date,
            available_quantity,
        }
    }

    /// Whether the lot has no units left.
    pub fn is_exhausted(&self) -> bool {
        self.available_quantity == 0
    }

    /// First-expire-first-out ordering: earliest expiration first, ties by lot ID.
    pub fn fefo_cmp(&self, other: &Lot) -> Ordering {
        self.expiration_date
            .cmp(&other.expiration_date)
            .then_with(|| self.lot_id.cmp(&other.lot_id))
    }
}
