//! Employee registry.
//!
//! Reference data for commission attribution: stylists, baristas, and
//! gamnet operators. Deactivated, never deleted, so the commission ledger
//! keeps resolving.

use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::{Choice, Section};
use crate::clock::Clock;
use crate::db::DbState;
use crate::error::{PosError, PosResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub role: String,
    pub section: Section,
    pub commission_rate: f64,
    pub hire_date: Option<chrono::NaiveDate>,
    pub is_active: bool,
}

/// Input for [`add_employee`].
#[derive(Debug, Clone)]
pub struct NewEmployee {
    pub name: String,
    pub phone: Option<String>,
    pub role: String,
    pub section: Section,
    pub commission_rate: f64,
}

fn map_employee(row: &rusqlite::Row<'_>) -> rusqlite::Result<Employee> {
    let section_raw: String = row.get(4)?;
    let section = Section::parse(&section_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Employee {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        role: row.get(3)?,
        section,
        commission_rate: row.get(5)?,
        hire_date: row.get(6)?,
        is_active: row.get::<_, i64>(7)? != 0,
    })
}

const EMPLOYEE_COLUMNS: &str =
    "id, name, phone, role, section, commission_rate, hire_date, is_active";

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Register an employee, hired today.
pub fn add_employee(db: &DbState, clock: &dyn Clock, new: &NewEmployee) -> PosResult<Employee> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(PosError::invalid_arg("employee name must not be empty"));
    }
    if !new.commission_rate.is_finite() || !(0.0..=100.0).contains(&new.commission_rate) {
        return Err(PosError::invalid_arg(format!(
            "commission rate must be between 0 and 100: {}",
            new.commission_rate
        )));
    }

    let hire_date = clock.today();
    let conn = db.lock();
    conn.execute(
        "INSERT INTO employees (name, phone, role, section, commission_rate, hire_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            name,
            new.phone,
            new.role,
            new.section.as_str(),
            new.commission_rate,
            hire_date,
        ],
    )?;
    let id = conn.last_insert_rowid();

    info!(employee_id = id, name = %name, role = %new.role, "Employee registered");

    Ok(Employee {
        id,
        name: name.to_string(),
        phone: new.phone.clone(),
        role: new.role.clone(),
        section: new.section,
        commission_rate: new.commission_rate,
        hire_date: Some(hire_date),
        is_active: true,
    })
}

/// Look up an employee by id (active or not).
pub fn get_employee(db: &DbState, id: i64) -> PosResult<Employee> {
    let conn = db.lock();
    conn.query_row(
        &format!("SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = ?1"),
        params![id],
        map_employee,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => PosError::not_found(format!("employee {id}")),
        other => other.into(),
    })
}

/// List active employees in a section, ordered by name.
pub fn list_active(db: &DbState, section: Section) -> PosResult<Vec<Employee>> {
    let conn = db.lock();
    let mut stmt = conn.prepare(&format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees
         WHERE section = ?1 AND is_active = 1
         ORDER BY name"
    ))?;
    let employees = stmt
        .query_map(params![section.as_str()], map_employee)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(employees)
}

/// Deactivate an employee.
pub fn deactivate_employee(db: &DbState, id: i64) -> PosResult<()> {
    let conn = db.lock();
    let changed = conn.execute(
        "UPDATE employees SET is_active = 0 WHERE id = ?1",
        params![id],
    )?;
    if changed == 0 {
        return Err(PosError::not_found(format!("employee {id}")));
    }
    info!(employee_id = id, "Employee deactivated");
    Ok(())
}

/// Active employees as `{id, label}` pairs for the UI's stylist/barista
/// pick lists.
pub fn choices(db: &DbState, section: Section) -> PosResult<Vec<Choice>> {
    let conn = db.lock();
    let mut stmt = conn.prepare(
        "SELECT id, name, role FROM employees
         WHERE section = ?1 AND is_active = 1
         ORDER BY name",
    )?;
    let choices = stmt
        .query_map(params![section.as_str()], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let role: String = row.get(2)?;
            Ok(Choice {
                id,
                label: format!("{name} ({role})"),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(choices)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::test_db;

    fn stylist() -> NewEmployee {
        NewEmployee {
            name: "Sara".to_string(),
            phone: Some("09125550100".to_string()),
            role: "stylist".to_string(),
            section: Section::Salon,
            commission_rate: 18.0,
        }
    }

    #[test]
    fn test_add_and_get_employee() {
        let db = test_db();
        let clock = FixedClock::at("2024-03-01 09:00:00");
        let added = add_employee(&db, &clock, &stylist()).unwrap();
        let fetched = get_employee(&db, added.id).unwrap();
        assert_eq!(fetched.name, "Sara");
        assert_eq!(fetched.hire_date.unwrap().to_string(), "2024-03-01");
        assert!(fetched.is_active);
    }

    #[test]
    fn test_rate_validation() {
        let db = test_db();
        let clock = FixedClock::at("2024-03-01 09:00:00");
        let mut bad = stylist();
        bad.commission_rate = 150.0;
        assert!(matches!(
            add_employee(&db, &clock, &bad),
            Err(PosError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_deactivate_hides_from_choices() {
        let db = test_db();
        let clock = FixedClock::at("2024-03-01 09:00:00");
        let added = add_employee(&db, &clock, &stylist()).unwrap();

        assert_eq!(choices(&db, Section::Salon).unwrap().len(), 1);
        deactivate_employee(&db, added.id).unwrap();
        assert!(choices(&db, Section::Salon).unwrap().is_empty());

        // Ledger lookups still resolve
        assert!(!get_employee(&db, added.id).unwrap().is_active);
    }
}
