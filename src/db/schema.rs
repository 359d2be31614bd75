//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Initial schema: one row per finished call
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS leads (
            id TEXT PRIMARY KEY,
            caller_number TEXT NOT NULL,
            call_time TEXT NOT NULL,
            investment_interest TEXT
                CHECK(investment_interest IN ('stocks', 'bonds', 'real_estate', 'cryptocurrency')),
            investment_amount TEXT,
            risk_tolerance TEXT
                CHECK(risk_tolerance IN ('conservative', 'moderate', 'aggressive')),
            timeline TEXT,
            qualified INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_leads_call_time ON leads(call_time);
        CREATE INDEX IF NOT EXISTS idx_leads_qualified ON leads(qualified);

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::info!("migrated to schema v1");
    Ok(())
}
