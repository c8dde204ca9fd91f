//! Session states and aggregate status.

use serde::{Deserialize, Serialize};

use crate::errors::DispatchError;
use crate::models::{DispatchMode, LineAllocationState};

/// Dispatch session state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// Allocations being proposed (initial)
    Selecting,
    /// Completion predicate for the current mode holds
    ReadyToConfirm,
    /// Record frozen (terminal)
    Committed { dispatch_id: String },
    /// Cancelled before confirmation, no record (terminal)
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Committed { .. } | SessionState::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Selecting => "selecting",
            SessionState::ReadyToConfirm => "ready_to_confirm",
            SessionState::Committed { .. } => "committed",
            SessionState::Aborted => "aborted",
        }
    }
}

/// Aggregate view of a session, for display and re-prompting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub prescription_id: String,
    pub state: SessionState,
    pub mode: DispatchMode,
    /// Line states in prescription order
    pub lines: Vec<LineAllocationState>,
    pub total_required: u64,
    pub total_allocated: u64,
    /// Failures from the last rejected confirmation still outstanding
    pub flagged: Vec<DispatchError>,
}

impl SessionStatus {
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::ReadyToConfirm
    }

    /// IDs of lines with an outstanding flag.
    pub fn flagged_lines(&self) -> Vec<&str> {
        let mut lines: Vec<&str> = self.flagged.iter().filter_map(|f| f.line_id()).collect();
        lines.dedup();
        lines
    }
}
