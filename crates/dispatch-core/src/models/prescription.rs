//! Prescription models.

use serde::{Deserialize, Serialize};

/// One medication entry of a prescription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrescriptionLine {
    /// Prescription detail ID
    pub line_id: String,
    /// Prescribed medication
    pub medication_id: String,
    /// Units to dispatch (must be positive)
    pub required_quantity: u32,
}

impl PrescriptionLine {
    /// Create a new prescription line.
    pub fn new(
        line_id: impl Into<String>,
        medication_id: impl Into<String>,
        required_quantity: u32,
    ) -> Self {
        Self {
            line_id: line_id.into(),
            medication_id: medication_id.into(),
            required_quantity,
        }
    }
}

/// A prescription awaiting dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prescription {
    /// Prescription ID
    pub prescription_id: String,
    /// Line items in prescription order
    pub lines: Vec<PrescriptionLine>,
}

impl Prescription {
    /// Create an empty prescription.
    pub fn new(prescription_id: impl Into<String>) -> Self {
        Self {
            prescription_id: prescription_id.into(),
            lines: Vec::new(),
        }
    }

    /// Append a line item (builder style).
    pub fn with_line(mut self, line: PrescriptionLine) -> Self {
        self.lines.push(line);
        self
    }

    /// Distinct medication IDs referenced by the lines, sorted.
    pub fn medication_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lines
            .iter()
            .map(|line| line.medication_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_medication_ids_deduplicated() {
        let prescription = Prescription::new("RX-1")
            .with_line(PrescriptionLine::new("D1", "MED-B", 10))
            .with_line(PrescriptionLine::new("D2", "MED-A", 5))
            .with_line(PrescriptionLine::new("D3", "MED-B", 2));

        assert_eq!(prescription.medication_ids(), vec!["MED-A", "MED-B"]);
    }
}
