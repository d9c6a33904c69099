//! Local SQLite database layer for the Kagan back-office core.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, the key/value
//! settings store with seeded business defaults, and the shared connection
//! state handed to every domain module.
//!
//! All domain operations run against a single connection behind a mutex, so
//! in-process access is serialized; multi-statement operations additionally
//! run in `BEGIN IMMEDIATE` transactions.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::PosResult;

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Acquire the connection. A poisoned lock is recovered rather than
    /// propagated: the connection itself stays valid across a panicking
    /// caller.
    pub fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Initialize the database at `{data_dir}/kagan.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// runs pending migrations, and seeds default settings. On corruption or
/// open failure, deletes the file and retries once.
pub fn init(data_dir: &Path) -> PosResult<DbState> {
    fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join("kagan.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;
    seed_default_settings(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Migration v1: core tables.
fn migrate_v1(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "
        -- settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- customers
        CREATE TABLE IF NOT EXISTS customers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            phone TEXT UNIQUE NOT NULL,
            birthdate TEXT,
            loyalty_points INTEGER NOT NULL DEFAULT 0,
            wallet_balance REAL NOT NULL DEFAULT 0,
            registration_date TEXT NOT NULL,
            last_visit_date TEXT,
            total_spent REAL NOT NULL DEFAULT 0
        );

        -- employees
        CREATE TABLE IF NOT EXISTS employees (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            phone TEXT,
            role TEXT NOT NULL,
            section TEXT NOT NULL,
            commission_rate REAL NOT NULL DEFAULT 0,
            hire_date TEXT,
            is_active INTEGER NOT NULL DEFAULT 1
        );

        -- unified salon services + cafe menu
        CREATE TABLE IF NOT EXISTS catalog_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            section TEXT NOT NULL,
            unit_price REAL NOT NULL DEFAULT 0,
            duration_minutes INTEGER,
            commission_rate REAL NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1
        );

        -- gaming devices
        CREATE TABLE IF NOT EXISTS devices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_number TEXT UNIQUE NOT NULL,
            device_type TEXT NOT NULL,
            hourly_rate REAL NOT NULL DEFAULT 0,
            is_available INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'available'
        );

        -- gaming sessions
        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL REFERENCES devices(id),
            customer_id INTEGER NOT NULL REFERENCES customers(id),
            start_time TEXT NOT NULL,
            end_time TEXT,
            duration_minutes INTEGER,
            charge REAL
        );

        -- discount campaigns
        CREATE TABLE IF NOT EXISTS campaigns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT,
            discount_percentage REAL NOT NULL DEFAULT 0,
            code TEXT UNIQUE NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1
        );

        -- invoices (rows exist only once finalized)
        CREATE TABLE IF NOT EXISTS invoices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            customer_id INTEGER NOT NULL REFERENCES customers(id),
            invoice_date TEXT NOT NULL,
            line_items TEXT NOT NULL DEFAULT '[]',
            subtotal REAL NOT NULL DEFAULT 0,
            discount_amount REAL NOT NULL DEFAULT 0,
            final_amount REAL NOT NULL DEFAULT 0,
            campaign_code TEXT,
            payment_method TEXT,
            is_paid INTEGER NOT NULL DEFAULT 0,
            paid_at TEXT
        );

        -- employee commission ledger (append-only)
        CREATE TABLE IF NOT EXISTS commissions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            employee_id INTEGER NOT NULL REFERENCES employees(id),
            service_date TEXT NOT NULL,
            service_type TEXT,
            amount REAL NOT NULL
        );

        -- completed service records
        CREATE TABLE IF NOT EXISTS service_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            customer_id INTEGER REFERENCES customers(id),
            employee_id INTEGER NOT NULL REFERENCES employees(id),
            item_id INTEGER NOT NULL REFERENCES catalog_items(id),
            service_date TEXT NOT NULL,
            price REAL NOT NULL,
            commission REAL NOT NULL
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_sessions_device ON sessions(device_id);
        CREATE INDEX IF NOT EXISTS idx_sessions_open ON sessions(device_id) WHERE end_time IS NULL;
        CREATE INDEX IF NOT EXISTS idx_invoices_customer ON invoices(customer_id);
        CREATE INDEX IF NOT EXISTS idx_invoices_date ON invoices(invoice_date);
        CREATE INDEX IF NOT EXISTS idx_commissions_employee ON commissions(employee_id);
        CREATE INDEX IF NOT EXISTS idx_service_records_employee ON service_records(employee_id);
        CREATE INDEX IF NOT EXISTS idx_campaigns_code ON campaigns(code);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        e
    })?;

    info!("Applied migration v1 (core tables)");
    Ok(())
}

/// Migration v2: snapshot the device's hourly rate on the session row so a
/// later rate edit cannot change the bill of a session already underway.
fn migrate_v2(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "
        ALTER TABLE sessions ADD COLUMN hourly_rate REAL;

        UPDATE sessions
        SET hourly_rate = (SELECT d.hourly_rate FROM devices d WHERE d.id = sessions.device_id)
        WHERE hourly_rate IS NULL;

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        e
    })?;

    info!("Applied migration v2 (session rate snapshot)");
    Ok(())
}

/// Migration v3: append-only audit of loyalty point changes.
fn migrate_v3(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS loyalty_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            customer_id INTEGER NOT NULL REFERENCES customers(id),
            transaction_type TEXT NOT NULL,
            points INTEGER NOT NULL,
            description TEXT,
            transaction_date TEXT NOT NULL,
            invoice_id INTEGER REFERENCES invoices(id)
        );

        CREATE INDEX IF NOT EXISTS idx_loyalty_tx_customer ON loyalty_transactions(customer_id);

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        e
    })?;

    info!("Applied migration v3 (loyalty audit)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Business defaults seeded on first run. Existing values are never
/// overwritten.
const DEFAULT_SETTINGS: &[(&str, &str, &str)] = &[
    ("business", "currency", "Toman"),
    ("business", "tax_rate", "9"),
    ("business", "business_hours", "09:00-22:00"),
    ("loyalty", "loyalty_points_rate", "1"),
    ("loyalty", "loyalty_redemption_rate", "100"),
];

fn seed_default_settings(conn: &Connection) -> PosResult<()> {
    for (category, key, value) in DEFAULT_SETTINGS {
        conn.execute(
            "INSERT INTO settings (setting_category, setting_key, setting_value)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(setting_category, setting_key) DO NOTHING",
            params![category, key, value],
        )?;
    }
    Ok(())
}

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> PosResult<()> {
    conn.execute(
        "INSERT INTO settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
    seed_default_settings(conn).expect("seed_default_settings should succeed in test");
}

/// Open an in-memory database with the full schema applied (test helper).
#[cfg(test)]
pub fn test_db() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations_for_test(&conn);
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: list table names in the database.
    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_migrations_create_all_tables() {
        let db = test_db();
        let conn = db.lock();
        let tables = table_names(&conn);

        for expected in [
            "settings",
            "customers",
            "employees",
            "catalog_items",
            "devices",
            "sessions",
            "campaigns",
            "invoices",
            "commissions",
            "service_records",
            "loyalty_transactions",
        ] {
            assert!(
                tables.contains(&expected.to_string()),
                "missing table {expected}"
            );
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = test_db();
        let conn = db.lock();
        run_migrations(&conn).expect("second run is a no-op");

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_sessions_have_rate_column_after_v2() {
        let db = test_db();
        let conn = db.lock();
        conn.execute(
            "INSERT INTO customers (name, phone, registration_date) VALUES ('c', '0912', '2024-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO devices (device_number, device_type, hourly_rate) VALUES ('PC-1', 'PC', 5.0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO sessions (device_id, customer_id, start_time, hourly_rate)
             VALUES (1, 1, '2024-01-01T10:00:00+00:00', 5.0)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_seeded_defaults_present_and_not_overwritten() {
        let db = test_db();
        let conn = db.lock();

        assert_eq!(
            get_setting(&conn, "business", "currency").as_deref(),
            Some("Toman")
        );
        assert_eq!(
            get_setting(&conn, "loyalty", "loyalty_points_rate").as_deref(),
            Some("1")
        );

        set_setting(&conn, "business", "currency", "Rial").unwrap();
        seed_default_settings(&conn).unwrap();
        assert_eq!(
            get_setting(&conn, "business", "currency").as_deref(),
            Some("Rial"),
            "seeding must not clobber an edited value"
        );
    }

    #[test]
    fn test_settings_roundtrip() {
        let db = test_db();
        let conn = db.lock();

        assert_eq!(get_setting(&conn, "business", "contact_phone"), None);
        set_setting(&conn, "business", "contact_phone", "021-555-0199").unwrap();
        assert_eq!(
            get_setting(&conn, "business", "contact_phone").as_deref(),
            Some("021-555-0199")
        );
    }
}
