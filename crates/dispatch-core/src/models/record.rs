//! Dispatch modes and the frozen dispatch record.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::allocation::LineStatus;

/// How a prescription is being dispatched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Every line exactly satisfied
    Complete,
    /// At least one unit dispatched, remainder left outstanding
    Partial,
    /// Nothing dispatched, reason required
    Cancelled,
}

impl DispatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchMode::Complete => "complete",
            DispatchMode::Partial => "partial",
            DispatchMode::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "complete" => Some(DispatchMode::Complete),
            "partial" => Some(DispatchMode::Partial),
            "cancelled" => Some(DispatchMode::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Units taken from one lot, frozen with the lot's display data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchedLot {
    pub lot_id: String,
    pub lot_number: String,
    pub expiration_date: NaiveDate,
    pub quantity: u32,
}

/// Outcome of one prescription line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineOutcome {
    pub medication_id: String,
    pub required_quantity: u32,
    pub dispatched_quantity: u32,
    pub status: LineStatus,
    pub allocations: Vec<DispatchedLot>,
}

impl LineOutcome {
    /// Units not dispatched on this line.
    pub fn outstanding(&self) -> u32 {
        self.required_quantity.saturating_sub(self.dispatched_quantity)
    }
}

/// Total deduction the inventory ledger must apply to one lot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockDeduction {
    pub lot_id: String,
    pub quantity: u32,
}

/// Immutable, auditable result of a confirmed dispatch session.
///
/// Built only by the reconciler at confirmation. Fields are read through
/// accessors; there is no way to mutate a record once frozen.
///
/// Serializes publicly but does not implement `Deserialize`: records are only
/// decoded inside the crate, by the ledger, after checking the stored digest.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DispatchRecord {
    dispatch_id: String,
    prescription_id: String,
    mode: DispatchMode,
    line_allocations: BTreeMap<String, LineOutcome>,
    cancellation_reason: Option<String>,
    notes: Option<String>,
    dispensed_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl DispatchRecord {
    pub(crate) fn freeze(
        prescription_id: String,
        mode: DispatchMode,
        line_allocations: BTreeMap<String, LineOutcome>,
        cancellation_reason: Option<String>,
        notes: Option<String>,
        dispensed_by: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            dispatch_id: uuid::Uuid::new_v4().to_string(),
            prescription_id,
            mode,
            line_allocations,
            cancellation_reason,
            notes,
            dispensed_by,
            created_at,
        }
    }

    /// Decode canonical JSON written by [`DispatchRecord::to_canonical_json`].
    pub(crate) fn from_canonical_json(json: &str) -> Result<Self, serde_json::Error> {
        let stored: StoredRecord = serde_json::from_str(json)?;
        Ok(Self {
            dispatch_id: stored.dispatch_id,
            prescription_id: stored.prescription_id,
            mode: stored.mode,
            line_allocations: stored.line_allocations,
            cancellation_reason: stored.cancellation_reason,
            notes: stored.notes,
            dispensed_by: stored.dispensed_by,
            created_at: stored.created_at,
        })
    }

    pub fn dispatch_id(&self) -> &str {
        &self.dispatch_id
    }

    pub fn prescription_id(&self) -> &str {
        &self.prescription_id
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Line outcomes keyed by line ID.
    pub fn line_allocations(&self) -> &BTreeMap<String, LineOutcome> {
        &self.line_allocations
    }

    pub fn line(&self, line_id: &str) -> Option<&LineOutcome> {
        self.line_allocations.get(line_id)
    }

    /// Present iff the mode is `cancelled`.
    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn dispensed_by(&self) -> Option<&str> {
        self.dispensed_by.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Units dispatched across all lines.
    pub fn total_dispatched(&self) -> u64 {
        self.line_allocations
            .values()
            .map(|line| u64::from(line.dispatched_quantity))
            .sum()
    }

    /// Remaining quantity per line (zero entries omitted).
    pub fn outstanding(&self) -> BTreeMap<String, u32> {
        self.line_allocations
            .iter()
            .filter(|(_, line)| line.outstanding() > 0)
            .map(|(line_id, line)| (line_id.clone(), line.outstanding()))
            .collect()
    }

    /// Per-lot deductions, summed across lines and ordered by lot ID.
    pub fn stock_deductions(&self) -> Vec<StockDeduction> {
        let mut totals: BTreeMap<&str, u32> = BTreeMap::new();
        for lot in self.line_allocations.values().flat_map(|line| &line.allocations) {
            let total = totals.entry(lot.lot_id.as_str()).or_insert(0);
            *total = total.saturating_add(lot.quantity);
        }
        totals
            .into_iter()
            .map(|(lot_id, quantity)| StockDeduction {
                lot_id: lot_id.to_string(),
                quantity,
            })
            .collect()
    }

    /// Serialize to canonical JSON (stable field and key order).
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// SHA-256 hex digest of the canonical JSON.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let payload = self.to_canonical_json()?;
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Wire form of a stored record.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredRecord {
    dispatch_id: String,
    prescription_id: String,
    mode: DispatchMode,
    line_allocations: BTreeMap<String, LineOutcome>,
    cancellation_reason: Option<String>,
    notes: Option<String>,
    dispensed_by: Option<String>,
    created_at: DateTime<Utc>,
}
