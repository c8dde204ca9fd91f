//! Dispatch record persistence and history queries.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Database, DbError, DbResult};
use crate::ledger::{CommitReceipt, ExhaustedLot};
use crate::models::{DispatchMode, DispatchRecord};

/// Filters for the dispatch history.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryFilter {
    /// Only records with this mode
    pub mode: Option<DispatchMode>,
    /// Created on or after this date (UTC)
    pub from: Option<NaiveDate>,
    /// Created on or before this date (UTC)
    pub to: Option<NaiveDate>,
    /// Case-insensitive match on dispatch ID, prescription ID, dispatcher or medication
    pub search: Option<String>,
}

/// One row of the dispatch history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchSummary {
    pub dispatch_id: String,
    pub prescription_id: String,
    pub mode: DispatchMode,
    pub dispensed_by: Option<String>,
    pub medications: Vec<String>,
    pub total_dispatched: u64,
    pub digest: String,
    pub created_at: String,
}

/// Cumulative dispatch progress of one prescription line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineProgress {
    pub line_id: String,
    pub medication_id: String,
    /// Quantity prescribed, taken from the first dispatch of the line
    pub required_quantity: u32,
    /// Units dispatched across every non-cancelled dispatch
    pub dispatched_quantity: u64,
    pub outstanding_quantity: u64,
}

/// A page of results (1-based page numbers).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl Database {
    /// Apply a confirmed dispatch atomically.
    ///
    /// Decrements every lot, records the movements and stores the record with
    /// its digest in one transaction. Any failure rolls the whole commit back.
    pub fn apply_dispatch(&mut self, record: &DispatchRecord) -> DbResult<CommitReceipt> {
        let payload = record.to_canonical_json()?;
        let digest = record.digest()?;
        let medications: Vec<&str> = record
            .line_allocations()
            .values()
            .map(|line| line.medication_id.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let total_dispatched = i64::try_from(record.total_dispatched()).map_err(|_| {
            DbError::Constraint(format!("Dispatch {} total out of range", record.dispatch_id()))
        })?;

        let tx = self.conn.transaction()?;

        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM dispatch_records WHERE dispatch_id = ?",
            [record.dispatch_id()],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Err(DbError::Constraint(format!(
                "Dispatch already recorded: {}",
                record.dispatch_id()
            )));
        }

        tx.execute(
            r#"
            INSERT INTO dispatch_records (
                dispatch_id, prescription_id, mode, dispensed_by, medications,
                total_dispatched, payload, digest, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.dispatch_id(),
                record.prescription_id(),
                record.mode().as_str(),
                record.dispensed_by(),
                medications.join(","),
                total_dispatched,
                payload,
                digest,
                record.created_at().to_rfc3339(),
            ],
        )?;

        let mut exhausted_lots = Vec::new();
        for deduction in record.stock_deductions() {
            let changed = tx.execute(
                r#"
                UPDATE lots SET
                    available_quantity = available_quantity - ?1,
                    status = CASE WHEN available_quantity - ?1 = 0 THEN 'exhausted' ELSE status END,
                    updated_at = datetime('now')
                WHERE lot_id = ?2 AND available_quantity >= ?1
                "#,
                params![deduction.quantity, deduction.lot_id],
            )?;

            if changed == 0 {
                let available: Option<u32> = tx
                    .query_row(
                        "SELECT available_quantity FROM lots WHERE lot_id = ?",
                        [&deduction.lot_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                return Err(match available {
                    None => DbError::NotFound(format!("lot {}", deduction.lot_id)),
                    Some(available) => DbError::InsufficientStock {
                        lot_id: deduction.lot_id,
                        requested: deduction.quantity,
                        available,
                    },
                });
            }

            tx.execute(
                "INSERT INTO stock_movements (dispatch_id, lot_id, quantity) VALUES (?1, ?2, ?3)",
                params![record.dispatch_id(), deduction.lot_id, deduction.quantity],
            )?;

            let (medication_id, lot_number, remaining): (String, String, u32) = tx.query_row(
                "SELECT medication_id, lot_number, available_quantity FROM lots WHERE lot_id = ?",
                [&deduction.lot_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            debug!(lot_id = %deduction.lot_id, quantity = deduction.quantity, remaining, "stock decremented");

            if remaining == 0 {
                exhausted_lots.push(ExhaustedLot {
                    lot_id: deduction.lot_id,
                    medication_id,
                    lot_number,
                });
            }
        }

        tx.commit()?;

        info!(
            dispatch_id = %record.dispatch_id(),
            exhausted = exhausted_lots.len(),
            "dispatch recorded"
        );

        Ok(CommitReceipt {
            dispatch_id: record.dispatch_id().to_string(),
            digest,
            exhausted_lots,
        })
    }

    /// Get a stored dispatch record, verifying its digest.
    pub fn get_dispatch(&self, dispatch_id: &str) -> DbResult<Option<DispatchRecord>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT payload, digest FROM dispatch_records WHERE dispatch_id = ?",
                [dispatch_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(payload, digest)| decode_record(&payload, &digest))
            .transpose()
    }

    /// All dispatches of one prescription, oldest first.
    pub fn list_dispatches_for_prescription(
        &self,
        prescription_id: &str,
    ) -> DbResult<Vec<DispatchRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT payload, digest
            FROM dispatch_records
            WHERE prescription_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )?;

        let rows = stmt.query_map([prescription_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (payload, digest) = row?;
            records.push(decode_record(&payload, &digest)?);
        }
        Ok(records)
    }

    /// Per-line progress across every dispatch of a prescription.
    ///
    /// Follow-up sessions for the remainder of a partial dispatch carry the
    /// remainder as their required quantity, so the prescribed quantity is
    /// the one recorded by the first non-cancelled dispatch of each line.
    /// Cumulative dispatch above it fails with `OverDispatched`.
    pub fn prescription_progress(&self, prescription_id: &str) -> DbResult<Vec<LineProgress>> {
        let records = self.list_dispatches_for_prescription(prescription_id)?;
        if records.is_empty() {
            return Err(DbError::NotFound(format!(
                "dispatches for prescription {}",
                prescription_id
            )));
        }

        let mut progress: BTreeMap<String, LineProgress> = BTreeMap::new();
        let dispatched = records
            .iter()
            .filter(|record| record.mode() != DispatchMode::Cancelled);
        for record in dispatched {
            for (line_id, outcome) in record.line_allocations() {
                let line = progress
                    .entry(line_id.clone())
                    .or_insert_with(|| LineProgress {
                        line_id: line_id.clone(),
                        medication_id: outcome.medication_id.clone(),
                        required_quantity: outcome.required_quantity,
                        dispatched_quantity: 0,
                        outstanding_quantity: 0,
                    });
                line.dispatched_quantity += u64::from(outcome.dispatched_quantity);
            }
        }

        // Only cancellations so far: nothing dispatched, everything outstanding
        if progress.is_empty() {
            for (line_id, outcome) in records[0].line_allocations() {
                progress.insert(
                    line_id.clone(),
                    LineProgress {
                        line_id: line_id.clone(),
                        medication_id: outcome.medication_id.clone(),
                        required_quantity: outcome.required_quantity,
                        dispatched_quantity: 0,
                        outstanding_quantity: 0,
                    },
                );
            }
        }

        let mut lines = Vec::with_capacity(progress.len());
        for mut line in progress.into_values() {
            let required = u64::from(line.required_quantity);
            if line.dispatched_quantity > required {
                warn!(
                    prescription_id = %prescription_id,
                    line_id = %line.line_id,
                    required,
                    dispatched = line.dispatched_quantity,
                    "prescription line over-dispatched"
                );
                return Err(DbError::OverDispatched {
                    prescription_id: prescription_id.to_string(),
                    line_id: line.line_id,
                    required: line.required_quantity,
                    dispatched: line.dispatched_quantity,
                });
            }
            line.outstanding_quantity = required - line.dispatched_quantity;
            lines.push(line);
        }
        Ok(lines)
    }

    /// Filtered, paginated dispatch history, newest first.
    ///
    /// `per_page` of 0 uses the configured default; larger values are capped.
    pub fn list_dispatches(
        &self,
        filter: &HistoryFilter,
        page: u32,
        per_page: u32,
    ) -> DbResult<Page<DispatchSummary>> {
        let page = page.max(1);
        let per_page = self.config.page_size(per_page).max(1);

        let (where_sql, mut args) = history_where(filter);

        let total_items: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM dispatch_records{}", where_sql),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;
        let total_items = u64::try_from(total_items).unwrap_or(0);

        args.push(Value::Integer(i64::from(per_page)));
        args.push(Value::Integer(i64::from(page - 1) * i64::from(per_page)));

        let sql = format!(
            r#"
            SELECT dispatch_id, prescription_id, mode, dispensed_by, medications,
                   total_dispatched, digest, created_at
            FROM dispatch_records{}
            ORDER BY created_at DESC, dispatch_id ASC
            LIMIT ? OFFSET ?
            "#,
            where_sql
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok(SummaryRow {
                dispatch_id: row.get(0)?,
                prescription_id: row.get(1)?,
                mode: row.get(2)?,
                dispensed_by: row.get(3)?,
                medications: row.get(4)?,
                total_dispatched: row.get(5)?,
                digest: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?.try_into()?);
        }

        let total_pages = u32::try_from(total_items.div_ceil(u64::from(per_page)))
            .unwrap_or(u32::MAX);

        Ok(Page {
            items,
            page,
            per_page,
            total_items,
            total_pages,
        })
    }
}

fn decode_record(payload: &str, digest: &str) -> DbResult<DispatchRecord> {
    let record = DispatchRecord::from_canonical_json(payload)?;
    if record.digest()? != digest {
        return Err(DbError::Constraint(format!(
            "Digest mismatch for dispatch {}",
            record.dispatch_id()
        )));
    }
    Ok(record)
}

fn history_where(filter: &HistoryFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<Value> = Vec::new();

    if let Some(mode) = filter.mode {
        clauses.push("mode = ?");
        args.push(Value::Text(mode.as_str().to_string()));
    }
    if let Some(from) = filter.from {
        clauses.push("created_at >= ?");
        args.push(Value::Text(from.format("%Y-%m-%d").to_string()));
    }
    if let Some(to) = filter.to {
        // created_at is RFC 3339, so "< next day" includes the whole `to` day
        let next = to.succ_opt().unwrap_or(to);
        clauses.push("created_at < ?");
        args.push(Value::Text(next.format("%Y-%m-%d").to_string()));
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        clauses.push(
            r"(dispatch_id LIKE ? ESCAPE '\' OR prescription_id LIKE ? ESCAPE '\' OR IFNULL(dispensed_by, '') LIKE ? ESCAPE '\' OR medications LIKE ? ESCAPE '\')",
        );
        let pattern = format!("%{}%", escape_like(search));
        for _ in 0..4 {
            args.push(Value::Text(pattern.clone()));
        }
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (where_sql, args)
}

/// Escape `LIKE` wildcards so search text matches literally.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Intermediate row struct for database mapping.
struct SummaryRow {
    dispatch_id: String,
    prescription_id: String,
    mode: String,
    dispensed_by: Option<String>,
    medications: String,
    total_dispatched: i64,
    digest: String,
    created_at: String,
}

impl TryFrom<SummaryRow> for DispatchSummary {
    type Error = DbError;

    fn try_from(row: SummaryRow) -> Result<Self, Self::Error> {
        let mode = DispatchMode::parse(&row.mode)
            .ok_or_else(|| DbError::Constraint(format!("Unknown dispatch mode: {}", row.mode)))?;

        Ok(DispatchSummary {
            dispatch_id: row.dispatch_id,
            prescription_id: row.prescription_id,
            mode,
            dispensed_by: row.dispensed_by,
            medications: row
                .medications
                .split(',')
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect(),
            total_dispatched: u64::try_from(row.total_dispatched).unwrap_or(0),
            digest: row.digest,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Lot, Prescription, PrescriptionLine};
    use crate::reconciler::DispatchSession;
    use chrono::{TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_lot(&Lot::new("L1", "MED-A", "A-001", date(2035, 1, 1), 10))
            .unwrap();
        db.upsert_lot(&Lot::new("L2", "MED-A", "A-002", date(2035, 6, 1), 50))
            .unwrap();
        db.upsert_lot(&Lot::new("L3", "MED-B", "B-001", date(2035, 3, 1), 8))
            .unwrap();
        db
    }

    fn confirmed(
        db: &Database,
        prescription_id: &str,
        required: u32,
        mode: DispatchMode,
        day: u32,
    ) -> DispatchRecord {
        let rx = Prescription::new(prescription_id)
            .with_line(PrescriptionLine::new("D1", "MED-A", required));
        let lots = db.available_lots_for(&rx.medication_ids()).unwrap();
        let mut session = DispatchSession::start(rx, lots.clone()).unwrap();
        session.set_dispensed_by("Farm. Ruiz").unwrap();
        match mode {
            DispatchMode::Cancelled => {
                session.set_mode(mode).unwrap();
                session.set_cancellation_reason("Receta anulada").unwrap();
            }
            DispatchMode::Partial => {
                session.set_mode(mode).unwrap();
                session.propose("D1", "L1", 1).unwrap();
            }
            DispatchMode::Complete => {
                session.accept_suggestion("D1").unwrap();
            }
        }
        let at = Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap();
        session.confirm_at(lots, at).unwrap()
    }

    #[test]
    fn test_apply_dispatch_decrements_and_stores() {
        let mut db = setup_db();
        let record = confirmed(&db, "RX-1", 30, DispatchMode::Complete, 1);

        let receipt = db.apply_dispatch(&record).unwrap();

        assert_eq!(receipt.dispatch_id, record.dispatch_id());
        assert_eq!(receipt.digest, record.digest().unwrap());
        assert_eq!(
            receipt.exhausted_lots,
            vec![ExhaustedLot {
                lot_id: "L1".into(),
                medication_id: "MED-A".into(),
                lot_number: "A-001".into(),
            }]
        );
        assert_eq!(db.get_lot("L1").unwrap().unwrap().available_quantity, 0);
        assert_eq!(db.get_lot("L2").unwrap().unwrap().available_quantity, 30);
        assert_eq!(db.lot_status("L1").unwrap(), Some(crate::db::LotStatus::Exhausted));
        assert_eq!(db.list_movements("L2").unwrap()[0].quantity, 20);

        let stored = db.get_dispatch(record.dispatch_id()).unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[test]
    fn test_apply_dispatch_is_all_or_nothing() {
        let mut db = setup_db();
        let record = confirmed(&db, "RX-1", 30, DispatchMode::Complete, 1);

        // Another dispatch drained L2 in the meantime
        db.upsert_lot(&Lot::new("L2", "MED-A", "A-002", date(2035, 6, 1), 5))
            .unwrap();

        let err = db.apply_dispatch(&record).unwrap_err();
        assert!(matches!(
            err,
            DbError::InsufficientStock { ref lot_id, requested: 20, available: 5 } if lot_id == "L2"
        ));

        assert_eq!(db.get_lot("L1").unwrap().unwrap().available_quantity, 10);
        assert!(db.get_dispatch(record.dispatch_id()).unwrap().is_none());
        assert!(db.list_movements("L1").unwrap().is_empty());
    }

    #[test]
    fn test_apply_dispatch_rejects_duplicates() {
        let mut db = setup_db();
        let record = confirmed(&db, "RX-1", 5, DispatchMode::Complete, 1);

        db.apply_dispatch(&record).unwrap();
        let err = db.apply_dispatch(&record).unwrap_err();

        assert!(matches!(err, DbError::Constraint(_)));
        assert_eq!(db.get_lot("L1").unwrap().unwrap().available_quantity, 5);
    }

    #[test]
    fn test_cancelled_dispatch_touches_no_stock() {
        let mut db = setup_db();
        let record = confirmed(&db, "RX-9", 5, DispatchMode::Cancelled, 1);

        let receipt = db.apply_dispatch(&record).unwrap();

        assert!(receipt.exhausted_lots.is_empty());
        assert_eq!(db.get_lot("L1").unwrap().unwrap().available_quantity, 10);
        assert_eq!(
            db.get_dispatch(record.dispatch_id())
                .unwrap()
                .unwrap()
                .cancellation_reason(),
            Some("Receta anulada")
        );
    }

    #[test]
    fn test_tampered_payload_detected() {
        let mut db = setup_db();
        let record = confirmed(&db, "RX-1", 5, DispatchMode::Complete, 1);
        db.apply_dispatch(&record).unwrap();

        db.conn()
            .execute(
                "UPDATE dispatch_records SET digest = 'deadbeef' WHERE dispatch_id = ?",
                [record.dispatch_id()],
            )
            .unwrap();

        assert!(matches!(
            db.get_dispatch(record.dispatch_id()),
            Err(DbError::Constraint(_))
        ));
    }

    #[test]
    fn test_history_filters_and_pagination() {
        let mut db = setup_db();
        let a = confirmed(&db, "RX-1", 2, DispatchMode::Complete, 1);
        db.apply_dispatch(&a).unwrap();
        let b = confirmed(&db, "RX-2", 4, DispatchMode::Partial, 2);
        db.apply_dispatch(&b).unwrap();
        let c = confirmed(&db, "RX-3", 4, DispatchMode::Cancelled, 3);
        db.apply_dispatch(&c).unwrap();

        let all = db.list_dispatches(&HistoryFilter::default(), 1, 2).unwrap();
        assert_eq!(all.total_items, 3);
        assert_eq!(all.total_pages, 2);
        assert_eq!(all.items.len(), 2);
        assert_eq!(all.items[0].prescription_id, "RX-3");

        let second = db.list_dispatches(&HistoryFilter::default(), 2, 2).unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].prescription_id, "RX-1");

        let partial = db
            .list_dispatches(
                &HistoryFilter {
                    mode: Some(DispatchMode::Partial),
                    ..Default::default()
                },
                1,
                10,
            )
            .unwrap();
        assert_eq!(partial.total_items, 1);
        assert_eq!(partial.items[0].total_dispatched, 1);
        assert_eq!(partial.items[0].medications, vec!["MED-A"]);

        let ranged = db
            .list_dispatches(
                &HistoryFilter {
                    from: Some(date(2025, 3, 2)),
                    to: Some(date(2025, 3, 2)),
                    ..Default::default()
                },
                1,
                10,
            )
            .unwrap();
        assert_eq!(ranged.total_items, 1);
        assert_eq!(ranged.items[0].prescription_id, "RX-2");

        let searched = db
            .list_dispatches(
                &HistoryFilter {
                    search: Some("rx-1".into()),
                    ..Default::default()
                },
                0,
                0,
            )
            .unwrap();
        assert_eq!(searched.page, 1);
        assert_eq!(searched.per_page, 10);
        assert_eq!(searched.total_items, 1);

        // wildcards in search text match literally
        for literal in ["RX_1", "%", "_"] {
            let page = db
                .list_dispatches(
                    &HistoryFilter {
                        search: Some(literal.into()),
                        ..Default::default()
                    },
                    1,
                    10,
                )
                .unwrap();
            assert_eq!(page.total_items, 0, "search {:?}", literal);
        }
    }

    fn partial_of(db: &mut Database, required: u32, take: u32, day: u32) -> DispatchRecord {
        let rx = Prescription::new("RX-40")
            .with_line(PrescriptionLine::new("D1", "MED-A", required));
        let lots = db.available_lots_for(&rx.medication_ids()).unwrap();
        let mut session = DispatchSession::start(rx, lots.clone()).unwrap();
        let mode = if take == required {
            DispatchMode::Complete
        } else {
            DispatchMode::Partial
        };
        session.set_mode(mode).unwrap();
        session.propose("D1", "L2", take).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 4, day, 9, 0, 0).unwrap();
        let record = session.confirm_at(lots, at).unwrap();
        db.apply_dispatch(&record).unwrap();
        record
    }

    #[test]
    fn test_progress_across_follow_up_partials() {
        let mut db = setup_db();
        partial_of(&mut db, 30, 10, 1);
        // follow-up session for the remaining 20
        partial_of(&mut db, 20, 5, 2);

        let progress = db.prescription_progress("RX-40").unwrap();

        assert_eq!(
            progress,
            vec![LineProgress {
                line_id: "D1".into(),
                medication_id: "MED-A".into(),
                required_quantity: 30,
                dispatched_quantity: 15,
                outstanding_quantity: 15,
            }]
        );

        partial_of(&mut db, 15, 15, 3);
        let progress = db.prescription_progress("RX-40").unwrap();
        assert_eq!(progress[0].dispatched_quantity, 30);
        assert_eq!(progress[0].outstanding_quantity, 0);
    }

    #[test]
    fn test_progress_flags_reopened_full_dispatch() {
        let mut db = setup_db();
        partial_of(&mut db, 30, 10, 1);
        // reopened for the full quantity instead of the remainder
        partial_of(&mut db, 30, 30, 2);

        let err = db.prescription_progress("RX-40").unwrap_err();

        assert!(matches!(
            err,
            DbError::OverDispatched { ref line_id, required: 30, dispatched: 40, .. } if line_id == "D1"
        ));
    }

    #[test]
    fn test_progress_after_cancellation_only() {
        let mut db = setup_db();
        let record = confirmed(&db, "RX-41", 6, DispatchMode::Cancelled, 1);
        db.apply_dispatch(&record).unwrap();

        let progress = db.prescription_progress("RX-41").unwrap();
        assert_eq!(progress[0].required_quantity, 6);
        assert_eq!(progress[0].outstanding_quantity, 6);

        assert!(matches!(
            db.prescription_progress("RX-404"),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_dispatches_for_prescription() {
        let mut db = setup_db();
        let first = confirmed(&db, "RX-1", 4, DispatchMode::Partial, 1);
        db.apply_dispatch(&first).unwrap();
        let second = confirmed(&db, "RX-1", 3, DispatchMode::Complete, 2);
        db.apply_dispatch(&second).unwrap();

        let records = db.list_dispatches_for_prescription("RX-1").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].dispatch_id(), first.dispatch_id());
        assert_eq!(records[0].outstanding().get("D1"), Some(&3));
    }
}
