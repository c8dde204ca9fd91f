//! Dispatch-Core Library
//!
//! Lot allocation and dispatch reconciliation for a hospital pharmacy.
//!
//! # Architecture
//!
//! ```text
//! Prescription ──▶ InventoryLedger::available_lots ──▶ lot snapshot
//!                                                          │
//!                                              ┌───────────▼───────────┐
//!                                              │    DispatchSession    │
//!                                              │  propose / suggest    │◀── Lot Selector
//!                                              │  (FEFO + validation)  │    (stateless)
//!                                              └───────────┬───────────┘
//!                                                          │ confirm (fresh snapshot)
//!                                                          ▼
//!                                                   DispatchRecord
//!                                                   (frozen, digest)
//!                                                          │
//!                                              InventoryLedger::commit
//!                                              (atomic stock decrement)
//! ```
//!
//! # Core Principle
//!
//! **Stock is never decremented from a stale view.** Every confirmation
//! re-validates all allocations against lots fetched at confirmation time.
//!
//! # Modules
//!
//! - [`selector`]: FEFO suggestion and proposal validation for one line
//! - [`reconciler`]: Session state machine producing dispatch records
//! - [`models`]: Domain types (Lot, Prescription, DispatchRecord, etc.)
//! - [`ledger`]: Inventory boundary and commit flow
//! - [`db`]: SQLite reference ledger with dispatch history
//! - [`config`]: Environment-driven settings

pub mod config;
pub mod db;
pub mod errors;
pub mod ledger;
pub mod models;
pub mod reconciler;
pub mod selector;

// Re-export commonly used types
pub use config::EngineConfig;
pub use db::{Database, DispatchSummary, HistoryFilter, LineProgress, Page};
pub use errors::{DispatchError, DispatchResult, ErrorKind};
pub use ledger::{CommitReceipt, ExhaustedLot, InventoryLedger, LedgerError};
pub use models::{
    Allocation, DispatchMode, DispatchRecord, DispatchedLot, LineAllocationState, LineOutcome,
    LineStatus, Lot, Prescription, PrescriptionLine,
};
pub use reconciler::{DispatchSession, SessionState, SessionStatus};
pub use selector::{suggest_allocation, validate_proposal, Suggestion};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use chrono::NaiveDate;
use std::sync::{Arc, Mutex};

const DATE_FORMAT: &str = "%Y-%m-%d";

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum DispatchCoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Recoverable dispatch rule violation, prefixed with its kind
    #[error("Dispatch rejected: {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<db::DbError> for DispatchCoreError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(what) => DispatchCoreError::NotFound(what),
            over @ db::DbError::OverDispatched { .. } => {
                DispatchCoreError::Rejected(over.to_string())
            }
            other => DispatchCoreError::DatabaseError(other.to_string()),
        }
    }
}

impl From<DispatchError> for DispatchCoreError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::InvalidInput(message) => DispatchCoreError::InvalidInput(message),
            other => DispatchCoreError::Rejected(
                other
                    .failures()
                    .iter()
                    .map(|failure| format!("{:?}: {}", failure.kind(), failure))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
        }
    }
}

impl From<LedgerError> for DispatchCoreError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Database(e) => e.into(),
            LedgerError::Dispatch(e) => e.into(),
        }
    }
}

impl From<serde_json::Error> for DispatchCoreError {
    fn from(e: serde_json::Error) -> Self {
        DispatchCoreError::SerializationError(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for DispatchCoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        DispatchCoreError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a pharmacy database at the given path.
#[uniffi::export]
pub fn open_pharmacy(path: String) -> Result<Arc<PharmacyCore>, DispatchCoreError> {
    let db = Database::open(&path)?;
    Ok(PharmacyCore::wrap(db))
}

/// Open the database named by the `DISPATCH_*` environment.
#[uniffi::export]
pub fn open_pharmacy_from_env() -> Result<Arc<PharmacyCore>, DispatchCoreError> {
    let db = Database::from_config(&EngineConfig::from_env())?;
    Ok(PharmacyCore::wrap(db))
}

/// Create an in-memory pharmacy database (for testing).
#[uniffi::export]
pub fn open_pharmacy_in_memory() -> Result<Arc<PharmacyCore>, DispatchCoreError> {
    let db = Database::open_in_memory()?;
    Ok(PharmacyCore::wrap(db))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe ledger wrapper for FFI.
#[derive(uniffi::Object)]
pub struct PharmacyCore {
    db: Arc<Mutex<Database>>,
}

impl PharmacyCore {
    fn wrap(db: Database) -> Arc<Self> {
        Arc::new(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

#[uniffi::export]
impl PharmacyCore {
    // =========================================================================
    // Lot Operations
    // =========================================================================

    /// Add or update a lot.
    pub fn upsert_lot(&self, lot: FfiLot) -> Result<(), DispatchCoreError> {
        let lot: Lot = lot.try_into()?;
        let db = self.db.lock()?;
        db.upsert_lot(&lot)?;
        Ok(())
    }

    /// Get a lot by ID.
    pub fn get_lot(&self, lot_id: String) -> Result<Option<FfiLot>, DispatchCoreError> {
        let db = self.db.lock()?;
        let lot = db.get_lot(&lot_id)?;
        Ok(lot.map(|l| l.into()))
    }

    /// Dispatchable lots for the given medications, FEFO ordered.
    pub fn available_lots(
        &self,
        medication_ids: Vec<String>,
    ) -> Result<Vec<FfiLot>, DispatchCoreError> {
        let db = self.db.lock()?;
        let lots = db.available_lots(&medication_ids)?;
        Ok(lots.into_iter().map(|l| l.into()).collect())
    }

    // =========================================================================
    // Dispatch Operations
    // =========================================================================

    /// Start a dispatch session over the current lots.
    pub fn start_dispatch(
        &self,
        prescription: FfiPrescription,
    ) -> Result<Arc<FfiDispatchSession>, DispatchCoreError> {
        let db = self.db.lock()?;
        let session = ledger::open_session(&*db, prescription.into())?;
        Ok(Arc::new(FfiDispatchSession {
            db: Arc::clone(&self.db),
            session: Mutex::new(session),
        }))
    }

    /// Get a stored dispatch record as canonical JSON.
    pub fn get_dispatch_json(&self, dispatch_id: String) -> Result<Option<String>, DispatchCoreError> {
        let db = self.db.lock()?;
        let record = db.get_dispatch(&dispatch_id)?;
        Ok(record.map(|r| r.to_canonical_json()).transpose()?)
    }

    /// Outstanding quantity per line after every dispatch of a prescription.
    pub fn outstanding_for_prescription(
        &self,
        prescription_id: String,
    ) -> Result<Vec<FfiOutstandingLine>, DispatchCoreError> {
        let db = self.db.lock()?;
        let progress = db.prescription_progress(&prescription_id)?;
        Ok(progress.into_iter().map(|line| line.into()).collect())
    }

    /// Filtered, paginated dispatch history, newest first.
    pub fn list_dispatches(
        &self,
        filter: FfiHistoryFilter,
        page: u32,
        per_page: u32,
    ) -> Result<FfiHistoryPage, DispatchCoreError> {
        let filter: HistoryFilter = filter.try_into()?;
        let db = self.db.lock()?;
        let page = db.list_dispatches(&filter, page, per_page)?;
        Ok(page.into())
    }
}

// =========================================================================
// Session Object
// =========================================================================

/// One dispatch session bound to the ledger it was opened on.
#[derive(uniffi::Object)]
pub struct FfiDispatchSession {
    db: Arc<Mutex<Database>>,
    session: Mutex<DispatchSession>,
}

#[uniffi::export]
impl FfiDispatchSession {
    pub fn status(&self) -> Result<FfiSessionStatus, DispatchCoreError> {
        let session = self.session.lock()?;
        let mut status: FfiSessionStatus = session.status().into();
        status.feasible_modes = session
            .feasible_modes()
            .into_iter()
            .map(|m| m.into())
            .collect();
        Ok(status)
    }

    pub fn set_mode(&self, mode: FfiDispatchMode) -> Result<(), DispatchCoreError> {
        let mut session = self.session.lock()?;
        session.set_mode(mode.into())?;
        Ok(())
    }

    /// Set the quantity taken from a lot for a line; 0 removes the lot.
    pub fn propose(
        &self,
        line_id: String,
        lot_id: String,
        quantity: i64,
    ) -> Result<FfiLineState, DispatchCoreError> {
        let mut session = self.session.lock()?;
        let quantity = match u32::try_from(quantity) {
            Ok(quantity) => quantity,
            Err(_) => {
                let available = session.lot_capacity(&line_id, &lot_id)?;
                return Err(DispatchError::InvalidQuantity {
                    line_id,
                    lot_id,
                    quantity,
                    available,
                }
                .into());
            }
        };
        let state = session.propose(&line_id, &lot_id, quantity)?;
        Ok(state.clone().into())
    }

    /// FEFO suggestion for a line, without applying it.
    pub fn suggest(&self, line_id: String) -> Result<FfiSuggestion, DispatchCoreError> {
        let session = self.session.lock()?;
        Ok(session.suggest(&line_id)?.into())
    }

    pub fn accept_suggestion(&self, line_id: String) -> Result<FfiSuggestion, DispatchCoreError> {
        let mut session = self.session.lock()?;
        Ok(session.accept_suggestion(&line_id)?.into())
    }

    pub fn clear_line(&self, line_id: String) -> Result<FfiLineState, DispatchCoreError> {
        let mut session = self.session.lock()?;
        let state = session.clear_line(&line_id)?;
        Ok(state.clone().into())
    }

    pub fn set_cancellation_reason(&self, reason: String) -> Result<(), DispatchCoreError> {
        let mut session = self.session.lock()?;
        session.set_cancellation_reason(reason)?;
        Ok(())
    }

    pub fn set_notes(&self, notes: String) -> Result<(), DispatchCoreError> {
        let mut session = self.session.lock()?;
        session.set_notes(notes)?;
        Ok(())
    }

    pub fn set_dispensed_by(&self, name: String) -> Result<(), DispatchCoreError> {
        let mut session = self.session.lock()?;
        session.set_dispensed_by(name)?;
        Ok(())
    }

    /// Re-validate against current stock and commit the dispatch.
    pub fn confirm(&self) -> Result<FfiCommitReceipt, DispatchCoreError> {
        let mut db = self.db.lock()?;
        let mut session = self.session.lock()?;
        let (record, receipt) = ledger::confirm_and_commit(&mut *db, &mut session)?;
        Ok(FfiCommitReceipt {
            dispatch_id: receipt.dispatch_id,
            digest: receipt.digest,
            mode: record.mode().into(),
            total_dispatched: record.total_dispatched(),
            exhausted_lots: receipt.exhausted_lots.into_iter().map(|l| l.into()).collect(),
        })
    }

    pub fn abort(&self) -> Result<(), DispatchCoreError> {
        let mut session = self.session.lock()?;
        session.abort()?;
        Ok(())
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe lot. Dates are `YYYY-MM-DD`.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLot {
    pub lot_id: String,
    pub medication_id: String,
    pub lot_number: String,
    pub expiration_date: String,
    pub available_quantity: u32,
}

impl From<Lot> for FfiLot {
    fn from(lot: Lot) -> Self {
        Self {
            lot_id: lot.lot_id,
            medication_id: lot.medication_id,
            lot_number: lot.lot_number,
            expiration_date: lot.expiration_date.format(DATE_FORMAT).to_string(),
            available_quantity: lot.available_quantity,
        }
    }
}

impl TryFrom<FfiLot> for Lot {
    type Error = DispatchCoreError;

    fn try_from(lot: FfiLot) -> Result<Self, Self::Error> {
        Ok(Lot {
            expiration_date: parse_date(&lot.expiration_date)?,
            lot_id: lot.lot_id,
            medication_id: lot.medication_id,
            lot_number: lot.lot_number,
            available_quantity: lot.available_quantity,
        })
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, DispatchCoreError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|e| DispatchCoreError::InvalidInput(format!("date {:?}: {}", value, e)))
}

/// FFI-safe prescription line.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPrescriptionLine {
    pub line_id: String,
    pub medication_id: String,
    pub required_quantity: u32,
}

/// FFI-safe prescription.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPrescription {
    pub prescription_id: String,
    pub lines: Vec<FfiPrescriptionLine>,
}

impl From<FfiPrescription> for Prescription {
    fn from(rx: FfiPrescription) -> Self {
        Prescription {
            prescription_id: rx.prescription_id,
            lines: rx
                .lines
                .into_iter()
                .map(|line| {
                    PrescriptionLine::new(line.line_id, line.medication_id, line.required_quantity)
                })
                .collect(),
        }
    }
}

/// FFI-safe dispatch mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiDispatchMode {
    Complete,
    Partial,
    Cancelled,
}

impl From<FfiDispatchMode> for DispatchMode {
    fn from(mode: FfiDispatchMode) -> Self {
        match mode {
            FfiDispatchMode::Complete => DispatchMode::Complete,
            FfiDispatchMode::Partial => DispatchMode::Partial,
            FfiDispatchMode::Cancelled => DispatchMode::Cancelled,
        }
    }
}

impl From<DispatchMode> for FfiDispatchMode {
    fn from(mode: DispatchMode) -> Self {
        match mode {
            DispatchMode::Complete => FfiDispatchMode::Complete,
            DispatchMode::Partial => FfiDispatchMode::Partial,
            DispatchMode::Cancelled => FfiDispatchMode::Cancelled,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAllocation {
    pub lot_id: String,
    pub quantity: u32,
}

impl From<Allocation> for FfiAllocation {
    fn from(a: Allocation) -> Self {
        Self {
            lot_id: a.lot_id,
            quantity: a.quantity,
        }
    }
}

/// FFI-safe line allocation state.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLineState {
    pub line_id: String,
    pub medication_id: String,
    pub required_quantity: u32,
    pub allocated: u64,
    /// unfulfilled, partial, satisfied or over_allocated
    pub status: String,
    pub allocations: Vec<FfiAllocation>,
}

impl From<LineAllocationState> for FfiLineState {
    fn from(state: LineAllocationState) -> Self {
        Self {
            line_id: state.line_id,
            medication_id: state.medication_id,
            required_quantity: state.required_quantity,
            allocated: state.allocated,
            status: state.status.as_str().to_string(),
            allocations: state.allocations.into_iter().map(|a| a.into()).collect(),
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSuggestion {
    pub allocations: Vec<FfiAllocation>,
    pub covered: u32,
    pub shortfall: u32,
}

impl From<Suggestion> for FfiSuggestion {
    fn from(s: Suggestion) -> Self {
        Self {
            allocations: s.allocations.into_iter().map(|a| a.into()).collect(),
            covered: s.covered,
            shortfall: s.shortfall,
        }
    }
}

/// FFI-safe session status.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSessionStatus {
    pub prescription_id: String,
    /// selecting, ready_to_confirm, committed or aborted
    pub state: String,
    pub dispatch_id: Option<String>,
    pub mode: FfiDispatchMode,
    pub feasible_modes: Vec<FfiDispatchMode>,
    pub lines: Vec<FfiLineState>,
    pub total_required: u64,
    pub total_allocated: u64,
    pub flagged_lines: Vec<String>,
    pub flags: Vec<String>,
}

impl From<SessionStatus> for FfiSessionStatus {
    fn from(status: SessionStatus) -> Self {
        let dispatch_id = match &status.state {
            SessionState::Committed { dispatch_id } => Some(dispatch_id.clone()),
            _ => None,
        };
        Self {
            flagged_lines: status
                .flagged_lines()
                .into_iter()
                .map(str::to_string)
                .collect(),
            flags: status.flagged.iter().map(|f| f.to_string()).collect(),
            prescription_id: status.prescription_id,
            state: status.state.as_str().to_string(),
            dispatch_id,
            mode: status.mode.into(),
            feasible_modes: Vec::new(),
            lines: status.lines.into_iter().map(|l| l.into()).collect(),
            total_required: status.total_required,
            total_allocated: status.total_allocated,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiExhaustedLot {
    pub lot_id: String,
    pub medication_id: String,
    pub lot_number: String,
}

impl From<ExhaustedLot> for FfiExhaustedLot {
    fn from(lot: ExhaustedLot) -> Self {
        Self {
            lot_id: lot.lot_id,
            medication_id: lot.medication_id,
            lot_number: lot.lot_number,
        }
    }
}

/// FFI-safe commit receipt.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCommitReceipt {
    pub dispatch_id: String,
    pub digest: String,
    pub mode: FfiDispatchMode,
    pub total_dispatched: u64,
    pub exhausted_lots: Vec<FfiExhaustedLot>,
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiOutstandingLine {
    pub line_id: String,
    pub medication_id: String,
    pub required_quantity: u32,
    pub dispatched_quantity: u64,
    pub outstanding_quantity: u64,
}

impl From<LineProgress> for FfiOutstandingLine {
    fn from(line: LineProgress) -> Self {
        Self {
            line_id: line.line_id,
            medication_id: line.medication_id,
            required_quantity: line.required_quantity,
            dispatched_quantity: line.dispatched_quantity,
            outstanding_quantity: line.outstanding_quantity,
        }
    }
}

/// FFI-safe history filter. Dates are `YYYY-MM-DD`.
#[derive(Debug, Clone, Default, uniffi::Record)]
pub struct FfiHistoryFilter {
    pub mode: Option<FfiDispatchMode>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub search: Option<String>,
}

impl TryFrom<FfiHistoryFilter> for HistoryFilter {
    type Error = DispatchCoreError;

    fn try_from(filter: FfiHistoryFilter) -> Result<Self, Self::Error> {
        Ok(HistoryFilter {
            mode: filter.mode.map(|m| m.into()),
            from: filter.from.as_deref().map(parse_date).transpose()?,
            to: filter.to.as_deref().map(parse_date).transpose()?,
            search: filter.search,
        })
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDispatchSummary {
    pub dispatch_id: String,
    pub prescription_id: String,
    pub mode: FfiDispatchMode,
    pub dispensed_by: Option<String>,
    pub medications: Vec<String>,
    pub total_dispatched: u64,
    pub digest: String,
    pub created_at: String,
}

impl From<DispatchSummary> for FfiDispatchSummary {
    fn from(s: DispatchSummary) -> Self {
        Self {
            dispatch_id: s.dispatch_id,
            prescription_id: s.prescription_id,
            mode: s.mode.into(),
            dispensed_by: s.dispensed_by,
            medications: s.medications,
            total_dispatched: s.total_dispatched,
            digest: s.digest,
            created_at: s.created_at,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiHistoryPage {
    pub items: Vec<FfiDispatchSummary>,
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl From<Page<DispatchSummary>> for FfiHistoryPage {
    fn from(page: Page<DispatchSummary>) -> Self {
        Self {
            items: page.items.into_iter().map(|s| s.into()).collect(),
            page: page.page,
            per_page: page.per_page,
            total_items: page.total_items,
            total_pages: page.total_pages,
        }
    }
}
