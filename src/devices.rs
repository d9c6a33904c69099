//! Gaming device registry for the gamnet section.
//!
//! Devices carry the hourly rate used for session billing and an
//! availability flag flipped by the session lifecycle: starting a session
//! takes the device, closing it releases the device. Only the `sessions`
//! module drives the toggle.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::Choice;
use crate::db::DbState;
use crate::error::{PosError, PosResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub device_number: String,
    pub device_type: String,
    pub hourly_rate: f64,
    pub is_available: bool,
    pub status: String,
}

/// Input for [`add_device`].
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub device_number: String,
    pub device_type: String,
    pub hourly_rate: f64,
}

fn map_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        device_number: row.get(1)?,
        device_type: row.get(2)?,
        hourly_rate: row.get(3)?,
        is_available: row.get::<_, i64>(4)? != 0,
        status: row.get(5)?,
    })
}

const DEVICE_COLUMNS: &str = "id, device_number, device_type, hourly_rate, is_available, status";

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Register a gaming device.
pub fn add_device(db: &DbState, new: &NewDevice) -> PosResult<Device> {
    let number = new.device_number.trim();
    if number.is_empty() {
        return Err(PosError::invalid_arg("device number must not be empty"));
    }
    if !new.hourly_rate.is_finite() || new.hourly_rate < 0.0 {
        return Err(PosError::invalid_arg(format!(
            "hourly rate must not be negative: {}",
            new.hourly_rate
        )));
    }

    let conn = db.lock();
    conn.execute(
        "INSERT INTO devices (device_number, device_type, hourly_rate) VALUES (?1, ?2, ?3)",
        params![number, new.device_type, new.hourly_rate],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            PosError::invalid_arg(format!("device number already exists: {number}"))
        }
        other => other.into(),
    })?;
    let id = conn.last_insert_rowid();

    info!(device_id = id, device_number = %number, "Device added");

    Ok(Device {
        id,
        device_number: number.to_string(),
        device_type: new.device_type.clone(),
        hourly_rate: new.hourly_rate,
        is_available: true,
        status: "available".to_string(),
    })
}

/// Look up a device by id.
pub fn get_device(db: &DbState, id: i64) -> PosResult<Device> {
    let conn = db.lock();
    get_device_tx(&conn, id)
}

pub(crate) fn get_device_tx(conn: &Connection, id: i64) -> PosResult<Device> {
    conn.query_row(
        &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1"),
        params![id],
        map_device,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => PosError::not_found(format!("device {id}")),
        other => other.into(),
    })
}

/// List every device, available or not.
pub fn list_devices(db: &DbState) -> PosResult<Vec<Device>> {
    let conn = db.lock();
    let mut stmt = conn.prepare(&format!(
        "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY device_number"
    ))?;
    let devices = stmt
        .query_map([], map_device)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(devices)
}

/// Available devices as `{id, label}` pairs for the session-start pick list.
pub fn choices(db: &DbState) -> PosResult<Vec<Choice>> {
    let conn = db.lock();
    let mut stmt = conn.prepare(
        "SELECT id, device_number, device_type FROM devices
         WHERE is_available = 1
         ORDER BY device_number",
    )?;
    let choices = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let number: String = row.get(1)?;
            let kind: String = row.get(2)?;
            Ok(Choice {
                id,
                label: format!("{number} ({kind})"),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(choices)
}

// ---------------------------------------------------------------------------
// Availability toggle (session lifecycle only)
// ---------------------------------------------------------------------------

pub(crate) fn mark_in_use(conn: &Connection, id: i64) -> PosResult<()> {
    let changed = conn.execute(
        "UPDATE devices SET is_available = 0, status = 'in_use' WHERE id = ?1",
        params![id],
    )?;
    if changed == 0 {
        return Err(PosError::not_found(format!("device {id}")));
    }
    Ok(())
}

pub(crate) fn mark_available(conn: &Connection, id: i64) -> PosResult<()> {
    let changed = conn.execute(
        "UPDATE devices SET is_available = 1, status = 'available' WHERE id = ?1",
        params![id],
    )?;
    if changed == 0 {
        return Err(PosError::not_found(format!("device {id}")));
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
