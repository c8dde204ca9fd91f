//! Inventory ledger boundary.
//!
//! The reconciler never touches stock itself. It reads lot snapshots from an
//! [`InventoryLedger`] and hands the frozen [`DispatchRecord`] back to it,
//! which applies every stock decrement atomically or none at all.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{Database, DbError};
use crate::errors::DispatchError;
use crate::models::{DispatchRecord, Lot, Prescription};
use crate::reconciler::DispatchSession;

/// Ledger errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// A lot whose stock reached zero during a commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExhaustedLot {
    pub lot_id: String,
    pub medication_id: String,
    pub lot_number: String,
}

/// Result of applying a dispatch record to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitReceipt {
    pub dispatch_id: String,
    /// SHA-256 of the canonical record JSON
    pub digest: String,
    /// Lots to be marked "agotado" in the catalog
    pub exhausted_lots: Vec<ExhaustedLot>,
}

/// Source of lot snapshots and sink for confirmed dispatches.
pub trait InventoryLedger {
    /// Dispatchable lots (positive stock) for the given medications.
    fn available_lots(&self, medication_ids: &[String]) -> LedgerResult<Vec<Lot>>;

    /// Apply every stock decrement of `record` and store it, or nothing.
    fn commit(&mut self, record: &DispatchRecord) -> LedgerResult<CommitReceipt>;
}

impl InventoryLedger for Database {
    fn available_lots(&self, medication_ids: &[String]) -> LedgerResult<Vec<Lot>> {
        Ok(self.available_lots_for(medication_ids)?)
    }

    fn commit(&mut self, record: &DispatchRecord) -> LedgerResult<CommitReceipt> {
        Ok(self.apply_dispatch(record)?)
    }
}

/// Start a session over the ledger's current lots for `prescription`.
pub fn open_session<L: InventoryLedger + ?Sized>(
    ledger: &L,
    prescription: Prescription,
) -> LedgerResult<DispatchSession> {
    let lots = ledger.available_lots(&prescription.medication_ids())?;
    Ok(DispatchSession::start(prescription, lots)?)
}

/// Confirm a session against fresh lots and commit the record.
///
/// If the commit itself fails the session is already `Committed`; the
/// caller starts a new session to retry.
pub fn confirm_and_commit<L: InventoryLedger + ?Sized>(
    ledger: &mut L,
    session: &mut DispatchSession,
) -> LedgerResult<(DispatchRecord, CommitReceipt)> {
    let medication_ids: Vec<String> = {
        let mut ids: Vec<String> = session
            .lines()
            .iter()
            .map(|line| line.medication_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    };

    let latest = ledger.available_lots(&medication_ids)?;
    let record = session.confirm(latest)?;

    let receipt = match ledger.commit(&record) {
        Ok(receipt) => receipt,
        Err(err) => {
            warn!(
                dispatch_id = %record.dispatch_id(),
                error = %err,
                "ledger commit failed"
            );
            return Err(err);
        }
    };

    for lot in &receipt.exhausted_lots {
        info!(
            lot_id = %lot.lot_id,
            medication_id = %lot.medication_id,
            lot_number = %lot.lot_number,
            "lot exhausted"
        );
    }

    Ok((record, receipt))
}
