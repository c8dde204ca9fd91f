//! Dispatch session: the mutable allocation state of one prescription.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::errors::{DispatchError, DispatchResult, ErrorKind};
use crate::models::{
    Allocation, DispatchMode, DispatchRecord, DispatchedLot, LineAllocationState, LineOutcome,
    LineStatus, Lot, Prescription, PrescriptionLine,
};
use crate::selector::{self, Suggestion};

use super::state::{SessionState, SessionStatus};

/// One dispatch session, exclusively owned by its caller.
///
/// All mutation goes through the methods below; each one re-derives the line
/// state and the session state, so a line can never be left over-allocated.
#[derive(Debug, Clone)]
pub struct DispatchSession {
    prescription_id: String,
    lines: Vec<PrescriptionLine>,
    lots: Vec<Lot>,
    mode: DispatchMode,
    line_states: BTreeMap<String, LineAllocationState>,
    cancellation_reason: Option<String>,
    notes: Option<String>,
    dispensed_by: Option<String>,
    flagged: Vec<DispatchError>,
    state: SessionState,
}

impl DispatchSession {
    /// Open a session for `prescription` over a lot snapshot.
    ///
    /// Fails with `InvalidInput` when the prescription is malformed; no
    /// session is created in that case. The initial mode is `complete`.
    pub fn start(prescription: Prescription, snapshot: Vec<Lot>) -> DispatchResult<Self> {
        validate_prescription(&prescription)?;

        let line_states = prescription
            .lines
            .iter()
            .map(|line| (line.line_id.clone(), LineAllocationState::empty(line)))
            .collect();

        debug!(
            prescription_id = %prescription.prescription_id,
            lines = prescription.lines.len(),
            lots = snapshot.len(),
            "dispatch session started"
        );

        Ok(Self {
            prescription_id: prescription.prescription_id,
            lines: prescription.lines,
            lots: snapshot,
            mode: DispatchMode::Complete,
            line_states,
            cancellation_reason: None,
            notes: None,
            dispensed_by: None,
            flagged: Vec::new(),
            state: SessionState::Selecting,
        })
    }

    pub fn prescription_id(&self) -> &str {
        &self.prescription_id
    }

    pub fn lines(&self) -> &[PrescriptionLine] {
        &self.lines
    }

    /// Lot snapshot the session currently validates against.
    pub fn lots(&self) -> &[Lot] {
        &self.lots
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn line_state(&self, line_id: &str) -> Option<&LineAllocationState> {
        self.line_states.get(line_id)
    }

    pub fn total_allocated(&self) -> u64 {
        self.line_states.values().map(|state| state.allocated).sum()
    }

    /// Aggregate status for display.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            prescription_id: self.prescription_id.clone(),
            state: self.state.clone(),
            mode: self.mode,
            lines: self
                .lines
                .iter()
                .filter_map(|line| self.line_states.get(&line.line_id).cloned())
                .collect(),
            total_required: self
                .lines
                .iter()
                .map(|line| u64::from(line.required_quantity))
                .sum(),
            total_allocated: self.total_allocated(),
            flagged: self.flagged.clone(),
        }
    }

    // =========================================================================
    // Mode selection
    // =========================================================================

    /// Modes that may currently be offered to the dispatcher.
    pub fn feasible_modes(&self) -> Vec<DispatchMode> {
        let mut modes = Vec::with_capacity(3);
        if self.infeasible_lines().is_empty() {
            modes.push(DispatchMode::Complete);
        }
        if self.has_any_stock() {
            modes.push(DispatchMode::Partial);
        }
        modes.push(DispatchMode::Cancelled);
        modes
    }

    /// Select the dispatch mode.
    ///
    /// Only modes listed by [`feasible_modes`](Self::feasible_modes) are
    /// accepted; the previous mode is kept otherwise. `complete` is refused
    /// with `InfeasibleCompleteMode` when the snapshot cannot cover every
    /// line, `partial` with `EmptyPartialDispatch` when no line has stock.
    pub fn set_mode(&mut self, mode: DispatchMode) -> DispatchResult<()> {
        self.ensure_open()?;

        if mode == DispatchMode::Partial && !self.has_any_stock() {
            warn!(prescription_id = %self.prescription_id, "partial dispatch has no stock");
            return Err(DispatchError::EmptyPartialDispatch);
        }

        if mode == DispatchMode::Complete {
            let infeasible = self.infeasible_lines();
            if !infeasible.is_empty() {
                warn!(
                    prescription_id = %self.prescription_id,
                    lines = infeasible.len(),
                    "complete dispatch infeasible"
                );
                return Err(DispatchError::from_failures(infeasible));
            }
        }

        self.mode = mode;
        self.flagged
            .retain(|flag| flag.kind() == ErrorKind::StaleAllocation);
        self.refresh_state();
        Ok(())
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Set the quantity taken from `lot_id` for `line_id`; `0` removes the lot.
    ///
    /// A rejected proposal leaves the session unchanged.
    pub fn propose(
        &mut self,
        line_id: &str,
        lot_id: &str,
        quantity: u32,
    ) -> DispatchResult<&LineAllocationState> {
        self.ensure_open()?;

        let allocations = self
            .line_states
            .get(line_id)
            .ok_or_else(|| DispatchError::UnknownLine(line_id.to_string()))?
            .with_lot_quantity(lot_id, quantity);

        debug!(line_id = %line_id, lot_id = %lot_id, quantity, "allocation proposed");
        self.replace_line(line_id, allocations)
    }

    /// FEFO suggestion for one line over the capacity other lines leave free.
    pub fn suggest(&self, line_id: &str) -> DispatchResult<Suggestion> {
        let line = self.line(line_id)?;
        let candidates = self.effective_lots(line);
        Ok(selector::suggest_allocation(line.required_quantity, &candidates))
    }

    /// Replace one line's allocations with its FEFO suggestion.
    pub fn accept_suggestion(&mut self, line_id: &str) -> DispatchResult<Suggestion> {
        self.ensure_open()?;
        let suggestion = self.suggest(line_id)?;
        self.replace_line(line_id, suggestion.allocations.clone())?;
        Ok(suggestion)
    }

    /// Remove every allocation of one line.
    pub fn clear_line(&mut self, line_id: &str) -> DispatchResult<&LineAllocationState> {
        self.ensure_open()?;
        self.replace_line(line_id, Vec::new())
    }

    /// Units of `lot_id` still free for `line_id`, after other lines' allocations.
    pub fn lot_capacity(&self, line_id: &str, lot_id: &str) -> DispatchResult<u32> {
        let line = self.line(line_id)?;
        self.effective_lots(line)
            .into_iter()
            .find(|lot| lot.lot_id == lot_id)
            .map(|lot| lot.available_quantity)
            .ok_or_else(|| DispatchError::UnknownLot {
                line_id: line_id.to_string(),
                lot_id: lot_id.to_string(),
            })
    }

    // =========================================================================
    // Record metadata
    // =========================================================================

    pub fn set_cancellation_reason(&mut self, reason: impl Into<String>) -> DispatchResult<()> {
        self.ensure_open()?;
        self.cancellation_reason = non_blank(reason.into());
        self.flagged
            .retain(|flag| flag.kind() != ErrorKind::MissingCancellationReason);
        self.refresh_state();
        Ok(())
    }

    pub fn set_notes(&mut self, notes: impl Into<String>) -> DispatchResult<()> {
        self.ensure_open()?;
        self.notes = non_blank(notes.into());
        Ok(())
    }

    pub fn set_dispensed_by(&mut self, name: impl Into<String>) -> DispatchResult<()> {
        self.ensure_open()?;
        self.dispensed_by = non_blank(name.into());
        Ok(())
    }

    // =========================================================================
    // Terminal transitions
    // =========================================================================

    /// Confirm against a freshly fetched lot snapshot.
    pub fn confirm(&mut self, latest_lots: Vec<Lot>) -> DispatchResult<DispatchRecord> {
        self.confirm_at(latest_lots, Utc::now())
    }

    /// Confirm with an explicit record timestamp.
    ///
    /// On failure the session returns to `Selecting` with the failing lines
    /// flagged, and the new snapshot is kept for further proposals.
    pub fn confirm_at(
        &mut self,
        latest_lots: Vec<Lot>,
        created_at: DateTime<Utc>,
    ) -> DispatchResult<DispatchRecord> {
        self.ensure_open()?;
        self.lots = latest_lots;

        let failures = self.confirmation_failures();
        if !failures.is_empty() {
            for failure in &failures {
                warn!(
                    prescription_id = %self.prescription_id,
                    mode = %self.mode,
                    error = %failure,
                    "dispatch confirmation rejected"
                );
            }
            self.flagged = failures.clone();
            self.state = SessionState::Selecting;
            return Err(DispatchError::from_failures(failures));
        }

        let record = self.freeze(created_at);
        self.flagged.clear();
        self.state = SessionState::Committed {
            dispatch_id: record.dispatch_id().to_string(),
        };

        info!(
            prescription_id = %self.prescription_id,
            dispatch_id = %record.dispatch_id(),
            mode = %record.mode(),
            units = record.total_dispatched(),
            "dispatch confirmed"
        );
        Ok(record)
    }

    /// Abandon the session without producing a record.
    pub fn abort(&mut self) -> DispatchResult<()> {
        self.ensure_open()?;
        for line in &self.lines {
            self.line_states
                .insert(line.line_id.clone(), LineAllocationState::empty(line));
        }
        self.flagged.clear();
        self.state = SessionState::Aborted;
        info!(prescription_id = %self.prescription_id, "dispatch session aborted");
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_open(&self) -> DispatchResult<()> {
        if self.state.is_terminal() {
            return Err(DispatchError::SessionClosed {
                state: self.state.as_str().to_string(),
            });
        }
        Ok(())
    }

    fn line(&self, line_id: &str) -> DispatchResult<&PrescriptionLine> {
        self.lines
            .iter()
            .find(|line| line.line_id == line_id)
            .ok_or_else(|| DispatchError::UnknownLine(line_id.to_string()))
    }

    /// Validate and apply a full allocation list for one line.
    fn replace_line(
        &mut self,
        line_id: &str,
        allocations: Vec<Allocation>,
    ) -> DispatchResult<&LineAllocationState> {
        let line = self.line(line_id)?.clone();
        let candidates = self.effective_lots(&line);

        if let Err(err) = selector::validate_proposal(&line, &allocations, &candidates) {
            warn!(line_id = %line_id, error = %err, "allocation rejected");
            return Err(err);
        }

        self.line_states.insert(
            line.line_id.clone(),
            LineAllocationState::recompute(&line, allocations),
        );
        self.flagged.retain(|flag| flag.line_id() != Some(line_id));
        self.refresh_state();

        self.line_states
            .get(line_id)
            .ok_or_else(|| DispatchError::UnknownLine(line_id.to_string()))
    }

    /// Lots of the line's medication, with capacity used by other lines removed.
    fn effective_lots(&self, line: &PrescriptionLine) -> Vec<Lot> {
        let mut used: BTreeMap<&str, u32> = BTreeMap::new();
        for state in self
            .line_states
            .values()
            .filter(|state| state.line_id != line.line_id)
        {
            for allocation in &state.allocations {
                let total = used.entry(allocation.lot_id.as_str()).or_insert(0);
                *total = total.saturating_add(allocation.quantity);
            }
        }

        self.lots
            .iter()
            .filter(|lot| lot.medication_id == line.medication_id)
            .map(|lot| {
                let mut lot = lot.clone();
                let taken = used.get(lot.lot_id.as_str()).copied().unwrap_or(0);
                lot.available_quantity = lot.available_quantity.saturating_sub(taken);
                lot
            })
            .collect()
    }

    fn has_any_stock(&self) -> bool {
        self.lines
            .iter()
            .any(|line| selector::available_for(&line.medication_id, &self.lots) > 0)
    }

    /// Lines the snapshot cannot cover, in prescription order.
    ///
    /// Lines sharing a medication draw from the same pool.
    fn infeasible_lines(&self) -> Vec<DispatchError> {
        let mut pools: BTreeMap<&str, u64> = BTreeMap::new();
        let mut failures = Vec::new();

        for line in &self.lines {
            let pool = pools
                .entry(line.medication_id.as_str())
                .or_insert_with(|| selector::available_for(&line.medication_id, &self.lots));
            let required = u64::from(line.required_quantity);
            if required > *pool {
                failures.push(DispatchError::InfeasibleCompleteMode {
                    line_id: line.line_id.clone(),
                    medication_id: line.medication_id.clone(),
                    required: line.required_quantity,
                    available: *pool,
                });
            } else {
                *pool -= required;
            }
        }
        failures
    }

    /// Re-check every applied allocation against the current snapshot.
    fn stale_allocations(&self) -> Vec<DispatchError> {
        let mut used: BTreeMap<&str, u32> = BTreeMap::new();
        let mut failures = Vec::new();

        for line in &self.lines {
            let Some(state) = self.line_states.get(&line.line_id) else {
                continue;
            };

            if state.status == LineStatus::OverAllocated {
                failures.push(DispatchError::LineOverAllocated {
                    line_id: line.line_id.clone(),
                    required: line.required_quantity,
                    allocated: state.allocated,
                });
                continue;
            }

            for allocation in &state.allocations {
                let available = self
                    .lots
                    .iter()
                    .find(|lot| {
                        lot.lot_id == allocation.lot_id && lot.medication_id == line.medication_id
                    })
                    .map(|lot| lot.available_quantity)
                    .unwrap_or(0);
                let taken = used.entry(allocation.lot_id.as_str()).or_insert(0);
                let free = available.saturating_sub(*taken);

                if allocation.quantity > free {
                    failures.push(DispatchError::StaleAllocation {
                        line_id: line.line_id.clone(),
                        lot_id: allocation.lot_id.clone(),
                        quantity: allocation.quantity,
                        available: free,
                    });
                } else {
                    *taken += allocation.quantity;
                }
            }
        }
        failures
    }

    fn confirmation_failures(&self) -> Vec<DispatchError> {
        match self.mode {
            DispatchMode::Cancelled => {
                if self.cancellation_reason.is_some() {
                    Vec::new()
                } else {
                    vec![DispatchError::MissingCancellationReason]
                }
            }
            DispatchMode::Partial => {
                let stale = self.stale_allocations();
                if !stale.is_empty() {
                    return stale;
                }
                if self.total_allocated() == 0 {
                    return vec![DispatchError::EmptyPartialDispatch];
                }
                Vec::new()
            }
            DispatchMode::Complete => {
                let stale = self.stale_allocations();
                if !stale.is_empty() {
                    return stale;
                }
                let infeasible = self.infeasible_lines();
                if !infeasible.is_empty() {
                    return infeasible;
                }
                self.lines
                    .iter()
                    .filter_map(|line| {
                        let state = self.line_states.get(&line.line_id)?;
                        (state.status != LineStatus::Satisfied).then(|| {
                            DispatchError::LineUnderAllocated {
                                line_id: line.line_id.clone(),
                                required: line.required_quantity,
                                allocated: state.allocated,
                            }
                        })
                    })
                    .collect()
            }
        }
    }

    fn completion_holds(&self) -> bool {
        match self.mode {
            DispatchMode::Complete => self
                .line_states
                .values()
                .all(|state| state.status == LineStatus::Satisfied),
            DispatchMode::Partial => {
                self.total_allocated() > 0
                    && self
                        .line_states
                        .values()
                        .all(|state| state.status != LineStatus::OverAllocated)
            }
            DispatchMode::Cancelled => self.cancellation_reason.is_some(),
        }
    }

    fn refresh_state(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = if self.completion_holds() {
            SessionState::ReadyToConfirm
        } else {
            SessionState::Selecting
        };
    }

    fn freeze(&self, created_at: DateTime<Utc>) -> DispatchRecord {
        let cancelled = self.mode == DispatchMode::Cancelled;

        let line_allocations = self
            .lines
            .iter()
            .map(|line| {
                let mut allocations: Vec<DispatchedLot> = if cancelled {
                    Vec::new()
                } else {
                    self.line_states
                        .get(&line.line_id)
                        .map(|state| self.frozen_lots(line, &state.allocations))
                        .unwrap_or_default()
                };
                allocations.sort_by(|a, b| {
                    a.expiration_date
                        .cmp(&b.expiration_date)
                        .then_with(|| a.lot_id.cmp(&b.lot_id))
                });

                let dispatched: u32 = allocations.iter().map(|lot| lot.quantity).sum();
                let outcome = LineOutcome {
                    medication_id: line.medication_id.clone(),
                    required_quantity: line.required_quantity,
                    dispatched_quantity: dispatched,
                    status: LineStatus::classify(u64::from(dispatched), line.required_quantity),
                    allocations,
                };
                (line.line_id.clone(), outcome)
            })
            .collect();

        DispatchRecord::freeze(
            self.prescription_id.clone(),
            self.mode,
            line_allocations,
            if cancelled {
                self.cancellation_reason.clone()
            } else {
                None
            },
            self.notes.clone(),
            self.dispensed_by.clone(),
            created_at,
        )
    }

    fn frozen_lots(&self, line: &PrescriptionLine, allocations: &[Allocation]) -> Vec<DispatchedLot> {
        allocations
            .iter()
            .filter_map(|allocation| {
                let lot = self.lots.iter().find(|lot| {
                    lot.lot_id == allocation.lot_id && lot.medication_id == line.medication_id
                })?;
                Some(DispatchedLot {
                    lot_id: lot.lot_id.clone(),
                    lot_number: lot.lot_number.clone(),
                    expiration_date: lot.expiration_date,
                    quantity: allocation.quantity,
                })
            })
            .collect()
    }
}

fn validate_prescription(prescription: &Prescription) -> DispatchResult<()> {
    if prescription.prescription_id.trim().is_empty() {
        return Err(DispatchError::InvalidInput(
            "prescription ID must not be empty".into(),
        ));
    }
    if prescription.lines.is_empty() {
        return Err(DispatchError::InvalidInput(format!(
            "prescription {} has no lines",
            prescription.prescription_id
        )));
    }

    let mut seen = HashSet::new();
    for line in &prescription.lines {
        if !seen.insert(line.line_id.as_str()) {
            return Err(DispatchError::InvalidInput(format!(
                "duplicate line {}",
                line.line_id
            )));
        }
        if line.required_quantity == 0 {
            return Err(DispatchError::InvalidInput(format!(
                "line {} requires a positive quantity",
                line.line_id
            )));
        }
    }
    Ok(())
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
