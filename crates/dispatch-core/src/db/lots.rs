//! Lot database operations.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{Database, DbError, DbResult};
use crate::models::Lot;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Catalog-side status of a lot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LotStatus {
    Active,
    /// No units left ("agotado")
    Exhausted,
    /// Withdrawn after expiry ("vencido")
    Expired,
}

impl LotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LotStatus::Active => "active",
            LotStatus::Exhausted => "exhausted",
            LotStatus::Expired => "expired",
        }
    }

    fn parse(s: &str) -> DbResult<Self> {
        match s {
            "active" => Ok(LotStatus::Active),
            "exhausted" => Ok(LotStatus::Exhausted),
            "expired" => Ok(LotStatus::Expired),
            _ => Err(DbError::Constraint(format!("Unknown lot status: {}", s))),
        }
    }
}

/// One stock decrement applied by a dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockMovement {
    pub dispatch_id: String,
    pub lot_id: String,
    pub quantity: u32,
    pub created_at: String,
}

impl Database {
    /// Insert or update a lot. Status follows the quantity, except that a
    /// lot withdrawn as expired stays expired.
    pub fn upsert_lot(&self, lot: &Lot) -> DbResult<()> {
        let status = if lot.is_exhausted() {
            LotStatus::Exhausted
        } else {
            LotStatus::Active
        };

        self.conn.execute(
            r#"
            INSERT INTO lots (
                lot_id, medication_id, lot_number, expiration_date,
                available_quantity, status, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
            ON CONFLICT(lot_id) DO UPDATE SET
                medication_id = excluded.medication_id,
                lot_number = excluded.lot_number,
                expiration_date = excluded.expiration_date,
                available_quantity = excluded.available_quantity,
                status = CASE WHEN lots.status = 'expired' THEN 'expired' ELSE excluded.status END,
                updated_at = datetime('now')
            "#,
            params![
                lot.lot_id,
                lot.medication_id,
                lot.lot_number,
                lot.expiration_date.format(DATE_FORMAT).to_string(),
                lot.available_quantity,
                status.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Get a lot by ID, regardless of status.
    pub fn get_lot(&self, lot_id: &str) -> DbResult<Option<Lot>> {
        self.conn
            .query_row(
                r#"
                SELECT lot_id, medication_id, lot_number, expiration_date, available_quantity
                FROM lots
                WHERE lot_id = ?
                "#,
                [lot_id],
                read_lot_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Get the catalog status of a lot.
    pub fn lot_status(&self, lot_id: &str) -> DbResult<Option<LotStatus>> {
        let status: Option<String> = self
            .conn
            .query_row("SELECT status FROM lots WHERE lot_id = ?", [lot_id], |row| {
                row.get(0)
            })
            .optional()?;
        status.map(|s| LotStatus::parse(&s)).transpose()
    }

    /// Set the catalog status of a lot (e.g. withdraw an expired lot).
    pub fn set_lot_status(&self, lot_id: &str, status: LotStatus) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE lots SET status = ?1, updated_at = datetime('now') WHERE lot_id = ?2",
            params![status.as_str(), lot_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Dispatchable lots for the given medications as of today (UTC).
    pub fn available_lots_for(&self, medication_ids: &[String]) -> DbResult<Vec<Lot>> {
        self.available_lots_as_of(medication_ids, Utc::now().date_naive())
    }

    /// Active, unexpired lots with stock for the given medications, in FEFO order.
    ///
    /// A lot expiring on `as_of` is still dispatchable that day.
    pub fn available_lots_as_of(
        &self,
        medication_ids: &[String],
        as_of: NaiveDate,
    ) -> DbResult<Vec<Lot>> {
        if medication_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; medication_ids.len()].join(", ");
        let sql = format!(
            r#"
            SELECT lot_id, medication_id, lot_number, expiration_date, available_quantity
            FROM lots
            WHERE status = 'active'
              AND available_quantity > 0
              AND expiration_date >= ?
              AND medication_id IN ({})
            ORDER BY expiration_date ASC, lot_id ASC
            "#,
            placeholders
        );

        let mut args = vec![as_of.format(DATE_FORMAT).to_string()];
        args.extend(medication_ids.iter().cloned());

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), read_lot_row)?;

        let mut lots = Vec::new();
        for row in rows {
            lots.push(row?.try_into()?);
        }
        Ok(lots)
    }

    /// Dispatch movements that touched a lot, newest first.
    pub fn list_movements(&self, lot_id: &str) -> DbResult<Vec<StockMovement>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT dispatch_id, lot_id, quantity, created_at
            FROM stock_movements
            WHERE lot_id = ?
            ORDER BY id DESC
            "#,
        )?;

        let rows = stmt.query_map([lot_id], |row| {
            Ok(StockMovement {
                dispatch_id: row.get(0)?,
                lot_id: row.get(1)?,
                quantity: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;

        let mut movements = Vec::new();
        for row in rows {
            movements.push(row?);
        }
        Ok(movements)
    }
}

/// Intermediate row struct for database mapping.
struct LotRow {
    lot_id: String,
    medication_id: String,
    lot_number: String,
    expiration_date: String,
    available_quantity: u32,
}

fn read_lot_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LotRow> {
    Ok(LotRow {
        lot_id: row.get(0)?,
        medication_id: row.get(1)?,
        lot_number: row.get(2)?,
        expiration_date: row.get(3)?,
        available_quantity: row.get(4)?,
    })
}

impl TryFrom<LotRow> for Lot {
    type Error = DbError;

    fn try_from(row: LotRow) -> Result<Self, Self::Error> {
        let expiration_date = NaiveDate::parse_from_str(&row.expiration_date, DATE_FORMAT)
            .map_err(|e| {
                DbError::Constraint(format!(
                    "Invalid expiration date {} for lot {}: {}",
                    row.expiration_date, row.lot_id, e
                ))
            })?;

        Ok(Lot {
            lot_id: row.lot_id,
            medication_id: row.medication_id,
            lot_number: row.lot_number,
            expiration_date,
            available_quantity: row.available_quantity,
        })
    }
}
