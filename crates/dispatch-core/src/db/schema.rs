//! SQLite schema definition.

/// Complete database schema for the dispatch ledger.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Lots
-- ============================================================================

CREATE TABLE IF NOT EXISTS lots (
    lot_id TEXT PRIMARY KEY,
    medication_id TEXT NOT NULL,
    lot_number TEXT NOT NULL,
    expiration_date TEXT NOT NULL,                -- YYYY-MM-DD
    available_quantity INTEGER NOT NULL CHECK (available_quantity >= 0),
    status TEXT NOT NULL DEFAULT 'active',        -- active | exhausted | expired
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_lots_medication ON lots(medication_id, expiration_date);

-- ============================================================================
-- Dispatch Records (append-only)
-- ============================================================================

CREATE TABLE IF NOT EXISTS dispatch_records (
    dispatch_id TEXT PRIMARY KEY,
    prescription_id TEXT NOT NULL,
    mode TEXT NOT NULL,                           -- complete | partial | cancelled
    dispensed_by TEXT,
    medications TEXT NOT NULL DEFAULT '',         -- comma-separated medication IDs (search)
    total_dispatched INTEGER NOT NULL,
    payload TEXT NOT NULL,                        -- canonical record JSON
    digest TEXT NOT NULL,                         -- SHA-256 of payload
    created_at TEXT NOT NULL                      -- RFC 3339
);

CREATE INDEX IF NOT EXISTS idx_dispatch_prescription ON dispatch_records(prescription_id);
CREATE INDEX IF NOT EXISTS idx_dispatch_created ON dispatch_records(created_at);

-- ============================================================================
-- Stock Movements
-- ============================================================================

CREATE TABLE IF NOT EXISTS stock_movements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dispatch_id TEXT NOT NULL REFERENCES dispatch_records(dispatch_id),
    lot_id TEXT NOT NULL REFERENCES lots(lot_id),
    quantity INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_movements_lot ON stock_movements(lot_id);
"#;
