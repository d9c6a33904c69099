//! Customer registry and ledger.
//!
//! Customers are keyed by phone number. The ledger fields (total spent,
//! last visit, loyalty points, wallet balance) are mutated only through
//! three paths: registration, the explicit administrative adjustments in
//! this module, and [`apply_payment`] — which the invoice lifecycle calls
//! exactly once per paid invoice.
//!
//! Every balance mutation is a single relative-delta UPDATE (`x = x + ?`)
//! executed under the connection lock, never a read-then-overwrite, so a
//! second connection cannot lose updates.

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::Clock;
use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::input;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub birthdate: Option<NaiveDate>,
    pub loyalty_points: i64,
    pub wallet_balance: f64,
    pub registration_date: NaiveDate,
    pub last_visit_date: Option<NaiveDate>,
    pub total_spent: f64,
}

fn map_customer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Customer> {
    Ok(Customer {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        birthdate: row.get(3)?,
        loyalty_points: row.get(4)?,
        wallet_balance: row.get(5)?,
        registration_date: row.get(6)?,
        last_visit_date: row.get(7)?,
        total_spent: row.get(8)?,
    })
}

const CUSTOMER_COLUMNS: &str = "id, name, phone, birthdate, loyalty_points, wallet_balance, \
                                registration_date, last_visit_date, total_spent";

// ---------------------------------------------------------------------------
// Registration and lookup
// ---------------------------------------------------------------------------

/// Register a customer, keyed by phone. Registering a phone that already
/// exists updates the name/birthdate on the existing row — one row per
/// phone, always.
pub fn register_customer(
    db: &DbState,
    clock: &dyn Clock,
    name: &str,
    phone: &str,
    birthdate: Option<NaiveDate>,
) -> PosResult<Customer> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PosError::invalid_arg("customer name must not be empty"));
    }
    let phone = input::normalize_phone(phone)?;

    let conn = db.lock();
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM customers WHERE phone = ?1",
            params![phone],
            |row| row.get(0),
        )
        .ok();

    let id = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE customers SET name = ?1, birthdate = ?2 WHERE id = ?3",
                params![name, birthdate, id],
            )?;
            id
        }
        None => {
            conn.execute(
                "INSERT INTO customers (name, phone, birthdate, registration_date)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, phone, birthdate, clock.today()],
            )?;
            let id = conn.last_insert_rowid();
            info!(customer_id = id, phone = %phone, "Customer registered");
            id
        }
    };

    get_by_id_tx(&conn, id)
}

/// Look up a customer by phone.
pub fn get_by_phone(db: &DbState, phone: &str) -> PosResult<Customer> {
    let phone = input::normalize_phone(phone)?;
    let conn = db.lock();
    get_by_phone_tx(&conn, &phone)
}

fn get_by_phone_tx(conn: &Connection, phone: &str) -> PosResult<Customer> {
    conn.query_row(
        &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE phone = ?1"),
        params![phone],
        map_customer,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            PosError::not_found(format!("customer with phone {phone}"))
        }
        other => other.into(),
    })
}

/// Look up a customer by id.
pub fn get_by_id(db: &DbState, id: i64) -> PosResult<Customer> {
    let conn = db.lock();
    get_by_id_tx(&conn, id)
}

pub(crate) fn get_by_id_tx(conn: &Connection, id: i64) -> PosResult<Customer> {
    conn.query_row(
        &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?1"),
        params![id],
        map_customer,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => PosError::not_found(format!("customer {id}")),
        other => other.into(),
    })
}

/// Walk-in flow: resolve a phone to a customer, creating a placeholder
/// record if nobody is registered under it yet.
pub fn get_or_create_by_phone(db: &DbState, clock: &dyn Clock, phone: &str) -> PosResult<Customer> {
    let phone = input::normalize_phone(phone)?;
    let conn = db.lock();
    match get_by_phone_tx(&conn, &phone) {
        Ok(customer) => Ok(customer),
        Err(PosError::NotFound(_)) => {
            conn.execute(
                "INSERT INTO customers (name, phone, registration_date) VALUES (?1, ?2, ?3)",
                params![format!("Customer {phone}"), phone, clock.today()],
            )?;
            let id = conn.last_insert_rowid();
            info!(customer_id = id, phone = %phone, "Walk-in customer created");
            get_by_id_tx(&conn, id)
        }
        Err(other) => Err(other),
    }
}

// ---------------------------------------------------------------------------
// Administrative adjustments
// ---------------------------------------------------------------------------

/// Add (or with a negative delta, remove) loyalty points. The balance may
/// not go negative. Appends an audit row.
pub fn adjust_points(
    db: &DbState,
    clock: &dyn Clock,
    phone: &str,
    delta: i64,
) -> PosResult<Customer> {
    let phone = input::normalize_phone(phone)?;
    let conn = db.lock();
    let customer = get_by_phone_tx(&conn, &phone)?;

    if customer.loyalty_points + delta < 0 {
        return Err(PosError::invalid_arg(format!(
            "adjustment of {delta} would leave {} points below zero",
            customer.loyalty_points
        )));
    }

    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = (|| -> PosResult<()> {
        conn.execute(
            "UPDATE customers SET loyalty_points = loyalty_points + ?1 WHERE id = ?2",
            params![delta, customer.id],
        )?;
        conn.execute(
            "INSERT INTO loyalty_transactions
                (customer_id, transaction_type, points, description, transaction_date)
             VALUES (?1, 'adjust', ?2, 'manual adjustment', ?3)",
            params![customer.id, delta, clock.today()],
        )?;
        Ok(())
    })();

    match result {
        Ok(()) => conn.execute_batch("COMMIT")?,
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    }

    info!(customer_id = customer.id, delta, "Loyalty points adjusted");
    get_by_id_tx(&conn, customer.id)
}

/// Add (or with a negative delta, remove) wallet funds. The balance may not
/// go negative.
pub fn adjust_wallet(db: &DbState, phone: &str, delta: f64) -> PosResult<Customer> {
    if !delta.is_finite() {
        return Err(PosError::invalid_arg(format!(
            "not a valid wallet amount: {delta}"
        )));
    }
    let phone = input::normalize_phone(phone)?;
    let conn = db.lock();
    let customer = get_by_phone_tx(&conn, &phone)?;

    if customer.wallet_balance + delta < 0.0 {
        return Err(PosError::invalid_arg(format!(
            "adjustment of {delta:.2} would overdraw wallet balance {:.2}",
            customer.wallet_balance
        )));
    }

    conn.execute(
        "UPDATE customers SET wallet_balance = wallet_balance + ?1 WHERE id = ?2",
        params![delta, customer.id],
    )?;

    info!(customer_id = customer.id, delta, "Wallet adjusted");
    get_by_id_tx(&conn, customer.id)
}

// ---------------------------------------------------------------------------
// Payment ledger
// ---------------------------------------------------------------------------

/// Apply a paid invoice to the customer ledger: spend accumulates, the
/// visit date moves to the payment date, and one loyalty point accrues per
/// whole currency unit. Called exactly once per payment, from the invoice
/// lifecycle's transaction.
pub fn apply_payment(
    db: &DbState,
    customer_id: i64,
    final_amount: f64,
    payment_date: NaiveDate,
    invoice_id: Option<i64>,
) -> PosResult<Customer> {
    let conn = db.lock();
    apply_payment_tx(&conn, customer_id, final_amount, payment_date, invoice_id)
}

pub(crate) fn apply_payment_tx(
    conn: &Connection,
    customer_id: i64,
    final_amount: f64,
    payment_date: NaiveDate,
    invoice_id: Option<i64>,
) -> PosResult<Customer> {
    if !final_amount.is_finite() || final_amount < 0.0 {
        return Err(PosError::invalid_arg(format!(
            "payment amount must not be negative: {final_amount}"
        )));
    }

    let points = final_amount.floor() as i64;

    let changed = conn.execute(
        "UPDATE customers SET
            total_spent = total_spent + ?1,
            last_visit_date = ?2,
            loyalty_points = loyalty_points + ?3
         WHERE id = ?4",
        params![final_amount, payment_date, points, customer_id],
    )?;
    if changed == 0 {
        return Err(PosError::not_found(format!("customer {customer_id}")));
    }

    if points > 0 {
        conn.execute(
            "INSERT INTO loyalty_transactions
                (customer_id, transaction_type, points, description, transaction_date, invoice_id)
             VALUES (?1, 'earn', ?2, 'invoice payment', ?3, ?4)",
            params![customer_id, points, payment_date, invoice_id],
        )?;
    }

    info!(
        customer_id,
        amount = final_amount,
        points,
        "Ledger updated for payment"
    );
    get_by_id_tx(conn, customer_id)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::test_db;

    fn clock() -> FixedClock {
        FixedClock::at("2024-03-15 12:00:00")
    }

    #[test]
    fn test_register_and_lookup() {
        let db = test_db();
        let c = register_customer(&db, &clock(), "Leila", "0912 555 0199", None).unwrap();
        assert_eq!(c.phone, "09125550199");
        assert_eq!(c.loyalty_points, 0);
        assert_eq!(c.total_spent, 0.0);
        assert_eq!(c.registration_date.to_string(), "2024-03-15");

        let fetched = get_by_phone(&db, "09125550199").unwrap();
        assert_eq!(fetched.id, c.id);
        assert_eq!(fetched.name, "Leila");
    }

    #[test]
    fn test_register_twice_updates_in_place() {
        let db = test_db();
        let first = register_customer(&db, &clock(), "Leila", "09125550199", None).unwrap();
        let birthdate = NaiveDate::from_ymd_opt(1990, 6, 1);
        let second =
            register_customer(&db, &clock(), "Leila Karimi", "09125550199", birthdate).unwrap();

        assert_eq!(first.id, second.id, "same phone must stay one row");
        assert_eq!(second.name, "Leila Karimi");
        assert_eq!(second.birthdate, birthdate);
    }

    #[test]
    fn test_get_or_create_walk_in() {
        let db = test_db();
        let c = get_or_create_by_phone(&db, &clock(), "09120001122").unwrap();
        assert_eq!(c.name, "Customer 09120001122");

        let again = get_or_create_by_phone(&db, &clock(), "0912-000-1122").unwrap();
        assert_eq!(again.id, c.id, "normalized phone resolves to the same row");
    }

    #[test]
    fn test_adjust_points_and_audit() {
        let db = test_db();
        register_customer(&db, &clock(), "Leila", "09125550199", None).unwrap();

        let c = adjust_points(&db, &clock(), "09125550199", 50).unwrap();
        assert_eq!(c.loyalty_points, 50);

        let c = adjust_points(&db, &clock(), "09125550199", -20).unwrap();
        assert_eq!(c.loyalty_points, 30);

        // Cannot go negative
        assert!(matches!(
            adjust_points(&db, &clock(), "09125550199", -31),
            Err(PosError::InvalidArgument(_))
        ));

        let conn = db.lock();
        let audit_rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM loyalty_transactions WHERE transaction_type = 'adjust'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(audit_rows, 2, "rejected adjustment must not leave a row");
    }

    #[test]
    fn test_adjust_wallet_guards_overdraft() {
        let db = test_db();
        register_customer(&db, &clock(), "Leila", "09125550199", None).unwrap();

        let c = adjust_wallet(&db, "09125550199", 100.0).unwrap();
        assert_eq!(c.wallet_balance, 100.0);

        assert!(matches!(
            adjust_wallet(&db, "09125550199", -150.0),
            Err(PosError::InvalidArgument(_))
        ));
        assert_eq!(
            get_by_phone(&db, "09125550199").unwrap().wallet_balance,
            100.0
        );
    }

    #[test]
    fn test_apply_payment_bundle() {
        let db = test_db();
        let c = register_customer(&db, &clock(), "Leila", "09125550199", None).unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let updated = apply_payment(&db, c.id, 68.0, date, None).unwrap();

        assert_eq!(updated.total_spent, 68.0);
        assert_eq!(updated.loyalty_points, 68);
        assert_eq!(updated.last_visit_date, Some(date));

        let conn = db.lock();
        let (tx_type, points): (String, i64) = conn
            .query_row(
                "SELECT transaction_type, points FROM loyalty_transactions WHERE customer_id = ?1",
                params![c.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(tx_type, "earn");
        assert_eq!(points, 68);
    }

    #[test]
    fn test_apply_payment_floors_points() {
        let db = test_db();
        let c = register_customer(&db, &clock(), "Leila", "09125550199", None).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();

        let updated = apply_payment(&db, c.id, 19.99, date, None).unwrap();
        assert_eq!(updated.loyalty_points, 19);
        assert_eq!(updated.total_spent, 19.99);
    }

    #[test]
    fn test_ledger_monotonicity() {
        let db = test_db();
        let c = register_customer(&db, &clock(), "Leila", "09125550199", None).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();

        let mut last_spent = 0.0;
        let mut last_points = 0;
        for amount in [0.0, 12.5, 3.0, 100.0] {
            let updated = apply_payment(&db, c.id, amount, date, None).unwrap();
            assert!(updated.total_spent >= last_spent);
            assert!(updated.loyalty_points >= last_points);
            last_spent = updated.total_spent;
            last_points = updated.loyalty_points;
        }
    }

    #[test]
    fn test_apply_payment_unknown_customer() {
        let db = test_db();
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert!(matches!(
            apply_payment(&db, 999, 10.0, date, None),
            Err(PosError::NotFound(_))
        ));
    }
}
