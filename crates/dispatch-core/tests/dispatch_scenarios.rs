//! End-to-end dispatch scenarios over in-memory lot snapshots.

use chrono::NaiveDate;
use dispatch_core::errors::{DispatchError, ErrorKind};
use dispatch_core::models::{
    Allocation, DispatchMode, LineStatus, Lot, Prescription, PrescriptionLine,
};
use dispatch_core::reconciler::{DispatchSession, SessionState};
use dispatch_core::selector::suggest_allocation;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn lot(lot_id: &str, expiration: NaiveDate, quantity: u32) -> Lot {
    Lot::new(lot_id, "MED-PARA", format!("N-{}", lot_id), expiration, quantity)
}

fn single_line(required: u32) -> Prescription {
    Prescription::new("RX-2024-001").with_line(PrescriptionLine::new("D1", "MED-PARA", required))
}

#[test]
fn test_fefo_suggestion_confirmed_complete() {
    let lots = vec![
        lot("L1", date(2025, 1, 1), 10),
        lot("L2", date(2025, 6, 1), 50),
    ];

    let suggestion = suggest_allocation(30, &lots);
    assert_eq!(
        suggestion.allocations,
        vec![Allocation::new("L1", 10), Allocation::new("L2", 20)]
    );

    let mut session = DispatchSession::start(single_line(30), lots.clone()).unwrap();
    session.accept_suggestion("D1").unwrap();
    let record = session.confirm(lots).unwrap();

    assert_eq!(record.mode(), DispatchMode::Complete);
    assert_eq!(record.total_dispatched(), 30);
    let line = record.line("D1").unwrap();
    assert_eq!(line.status, LineStatus::Satisfied);
    let quantities: Vec<(&str, u32)> = line
        .allocations
        .iter()
        .map(|lot| (lot.lot_id.as_str(), lot.quantity))
        .collect();
    assert_eq!(quantities, vec![("L1", 10), ("L2", 20)]);
}

#[test]
fn test_infeasible_complete_then_partial() {
    let lots = vec![lot("L1", date(2025, 1, 1), 10)];
    let mut session = DispatchSession::start(single_line(30), lots.clone()).unwrap();

    let err = session.confirm(lots.clone()).unwrap_err();
    assert_eq!(
        err,
        DispatchError::InfeasibleCompleteMode {
            line_id: "D1".into(),
            medication_id: "MED-PARA".into(),
            required: 30,
            available: 10,
        }
    );
    assert_eq!(session.state(), &SessionState::Selecting);

    session.set_mode(DispatchMode::Partial).unwrap();
    session.propose("D1", "L1", 10).unwrap();
    assert_eq!(session.state(), &SessionState::ReadyToConfirm);

    let record = session.confirm(lots).unwrap();
    let line = record.line("D1").unwrap();
    assert_eq!(record.mode(), DispatchMode::Partial);
    assert_eq!(line.dispatched_quantity, 10);
    assert_eq!(line.required_quantity, 30);
    assert_eq!(line.status, LineStatus::Partial);
    assert_eq!(record.outstanding().get("D1"), Some(&20));
}

#[test]
fn test_cancellation_requires_reason() {
    let lots = vec![lot("L1", date(2025, 1, 1), 10)];
    let rx = Prescription::new("RX-2024-002")
        .with_line(PrescriptionLine::new("D1", "MED-PARA", 4))
        .with_line(PrescriptionLine::new("D2", "MED-PARA", 2));
    let mut session = DispatchSession::start(rx, lots.clone()).unwrap();
    session.propose("D1", "L1", 4).unwrap();

    session.set_mode(DispatchMode::Cancelled).unwrap();
    session.set_cancellation_reason("").unwrap();
    let err = session.confirm(lots.clone()).unwrap_err();
    assert_eq!(err, DispatchError::MissingCancellationReason);
    assert_eq!(session.state(), &SessionState::Selecting);

    session
        .set_cancellation_reason("Paciente no se presentó")
        .unwrap();
    let record = session.confirm(lots).unwrap();

    assert_eq!(record.mode(), DispatchMode::Cancelled);
    assert_eq!(record.cancellation_reason(), Some("Paciente no se presentó"));
    assert_eq!(record.total_dispatched(), 0);
    assert!(record.stock_deductions().is_empty());
    for line_id in ["D1", "D2"] {
        let line = record.line(line_id).unwrap();
        assert!(line.allocations.is_empty());
        assert_eq!(line.dispatched_quantity, 0);
    }
}

#[test]
fn test_over_allocation_rejected_immediately() {
    let lots = vec![lot("L1", date(2025, 1, 1), 50)];
    let mut session = DispatchSession::start(single_line(10), lots).unwrap();
    session.propose("D1", "L1", 3).unwrap();
    let before = session.status();

    let err = session.propose("D1", "L1", 15).unwrap_err();

    assert_eq!(
        err,
        DispatchError::LineOverAllocated {
            line_id: "D1".into(),
            required: 10,
            allocated: 15,
        }
    );
    assert_eq!(session.status(), before);
    assert_eq!(session.line_state("D1").unwrap().allocated, 3);
}

#[test]
fn test_stale_allocation_caught_at_confirmation() {
    let lots = vec![lot("L1", date(2025, 1, 1), 10)];
    let mut session = DispatchSession::start(single_line(10), lots).unwrap();
    session.propose("D1", "L1", 10).unwrap();
    assert_eq!(session.state(), &SessionState::ReadyToConfirm);

    let shrunk = vec![lot("L1", date(2025, 1, 1), 5)];
    let err = session.confirm(shrunk).unwrap_err();

    assert_eq!(
        err,
        DispatchError::StaleAllocation {
            line_id: "D1".into(),
            lot_id: "L1".into(),
            quantity: 10,
            available: 5,
        }
    );
    assert_eq!(session.state(), &SessionState::Selecting);
    assert_eq!(session.status().flagged_lines(), vec!["D1"]);
}

#[test]
fn test_vanished_lot_is_stale() {
    let lots = vec![
        lot("L1", date(2025, 1, 1), 10),
        lot("L2", date(2025, 2, 1), 10),
    ];
    let mut session = DispatchSession::start(single_line(15), lots).unwrap();
    session.accept_suggestion("D1").unwrap();

    let err = session
        .confirm(vec![lot("L2", date(2025, 2, 1), 10)])
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StaleAllocation);
    assert_eq!(err.lot_id(), Some("L1"));
}

#[test]
fn test_unknown_lot_and_foreign_medication() {
    let lots = vec![
        lot("L1", date(2025, 1, 1), 10),
        Lot::new("X1", "MED-OTHER", "X-1", date(2024, 1, 1), 10),
    ];
    let mut session = DispatchSession::start(single_line(5), lots).unwrap();

    assert_eq!(
        session.propose("D1", "L9", 1).unwrap_err().kind(),
        ErrorKind::UnknownLot
    );
    assert_eq!(
        session.propose("D1", "X1", 1).unwrap_err().kind(),
        ErrorKind::UnknownLot
    );
}

#[test]
fn test_quantity_beyond_lot_rejected() {
    let lots = vec![lot("L1", date(2025, 1, 1), 4)];
    let mut session = DispatchSession::start(single_line(10), lots).unwrap();

    let err = session.propose("D1", "L1", 6).unwrap_err();

    assert_eq!(
        err,
        DispatchError::InvalidQuantity {
            line_id: "D1".into(),
            lot_id: "L1".into(),
            quantity: 6,
            available: 4,
        }
    );
}
