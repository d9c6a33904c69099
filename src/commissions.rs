//! Employee commissions for completed services and orders.
//!
//! The commission amount is a pure function of price and rate. Recording a
//! completed service appends one service record and one commission ledger
//! row atomically; the ledger is append-only and nothing in this crate
//! updates or deletes it.

use chrono::NaiveDate;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::{self, CatalogItem};
use crate::clock::Clock;
use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::invoices::{LineItem, LineItemKind};
use crate::round2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub id: i64,
    pub employee_id: i64,
    pub service_date: NaiveDate,
    pub service_type: Option<String>,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: i64,
    pub customer_id: Option<i64>,
    pub employee_id: i64,
    pub item_id: i64,
    pub service_date: NaiveDate,
    pub price: f64,
    pub commission: f64,
}

impl ServiceRecord {
    /// A completed service as a billable invoice line.
    pub fn to_line_item(&self, item: &CatalogItem) -> PosResult<LineItem> {
        LineItem::new(
            LineItemKind::from(item.section),
            item.name.clone(),
            self.price,
        )
    }
}

// ---------------------------------------------------------------------------
// Commission computation
// ---------------------------------------------------------------------------

/// Commission owed on a completed service: `price × rate / 100`.
///
/// Pure; keeps full precision. Rounding to two decimals happens only when a
/// record is persisted.
pub fn compute_commission(price: f64, rate_percent: f64) -> PosResult<f64> {
    if !price.is_finite() || price < 0.0 {
        return Err(PosError::invalid_arg(format!(
            "price must not be negative: {price}"
        )));
    }
    if !rate_percent.is_finite() || !(0.0..=100.0).contains(&rate_percent) {
        return Err(PosError::invalid_arg(format!(
            "commission rate must be between 0 and 100: {rate_percent}"
        )));
    }
    Ok(price * (rate_percent / 100.0))
}

// ---------------------------------------------------------------------------
// Record a completed service
// ---------------------------------------------------------------------------

/// Record a completed service performed by an employee.
///
/// Uses the catalog item's price and commission rate, and appends exactly
/// one service record plus exactly one commission ledger row in one
/// transaction. Fails NotFound for an unknown item or employee and
/// InvalidState when either is deactivated.
pub fn record_service(
    db: &DbState,
    clock: &dyn Clock,
    employee_id: i64,
    item_id: i64,
    customer_id: Option<i64>,
) -> PosResult<ServiceRecord> {
    let item = catalog::get_item(db, item_id)?;
    if !item.is_active {
        return Err(PosError::invalid_state(format!(
            "catalog item {} is deactivated",
            item.id
        )));
    }

    let conn = db.lock();

    let employee_active: i64 = conn
        .query_row(
            "SELECT is_active FROM employees WHERE id = ?1",
            params![employee_id],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                PosError::not_found(format!("employee {employee_id}"))
            }
            other => other.into(),
        })?;
    if employee_active == 0 {
        return Err(PosError::invalid_state(format!(
            "employee {employee_id} is deactivated"
        )));
    }

    let commission = round2(compute_commission(item.unit_price, item.commission_rate)?);
    let service_date = clock.today();

    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = (|| -> PosResult<i64> {
        conn.execute(
            "INSERT INTO service_records
                (customer_id, employee_id, item_id, service_date, price, commission)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                customer_id,
                employee_id,
                item_id,
                service_date,
                item.unit_price,
                commission,
            ],
        )?;
        let record_id = conn.last_insert_rowid();

        conn.execute(
            "INSERT INTO commissions (employee_id, service_date, service_type, amount)
             VALUES (?1, ?2, ?3, ?4)",
            params![employee_id, service_date, item.name, commission],
        )?;

        Ok(record_id)
    })();

    let record_id = match result {
        Ok(id) => {
            conn.execute_batch("COMMIT")?;
            id
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    };

    info!(
        record_id,
        employee_id,
        item_id,
        price = item.unit_price,
        commission,
        "Service recorded"
    );

    Ok(ServiceRecord {
        id: record_id,
        customer_id,
        employee_id,
        item_id,
        service_date,
        price: item.unit_price,
        commission,
    })
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Commission ledger rows for one employee, newest first.
pub fn commissions_for_employee(db: &DbState, employee_id: i64) -> PosResult<Vec<CommissionRecord>> {
    let conn = db.lock();
    let mut stmt = conn.prepare(
        "SELECT id, employee_id, service_date, service_type, amount
         FROM commissions
         WHERE employee_id = ?1
         ORDER BY service_date DESC, id DESC",
    )?;
    let records = stmt
        .query_map(params![employee_id], |row| {
            Ok(CommissionRecord {
                id: row.get(0)?,
                employee_id: row.get(1)?,
                service_date: row.get(2)?,
                service_type: row.get(3)?,
                amount: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

// ===========================================================================
// Tests
// ===========================================================================
