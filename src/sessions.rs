//! Gaming session lifecycle for the gamnet section.
//!
//! A session opens against an available device (taking it), runs until the
//! cashier closes it, and bills by elapsed time: whole minutes elapsed,
//! charged at the hourly rate snapshotted when the session started. A
//! device has at most one open session; closing is the session's single
//! terminal mutation and releases the device in the same transaction.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::Clock;
use crate::customers;
use crate::db::DbState;
use crate::devices;
use crate::error::{PosError, PosResult};
use crate::invoices::{LineItem, LineItemKind};
use crate::round2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub device_id: i64,
    pub customer_id: i64,
    pub hourly_rate: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub charge: Option<f64>,
}

impl Session {
    /// A closed session as a billable invoice line.
    pub fn to_line_item(&self, device_number: &str) -> PosResult<LineItem> {
        let (duration, charge) = match (self.duration_minutes, self.charge) {
            (Some(d), Some(c)) => (d, c),
            _ => {
                return Err(PosError::invalid_state(format!(
                    "session {} is still open",
                    self.id
                )))
            }
        };
        LineItem::new(
            LineItemKind::GamnetSession,
            format!("Gaming session {device_number} ({duration} min)"),
            charge,
        )
    }
}

fn map_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        device_id: row.get(1)?,
        customer_id: row.get(2)?,
        hourly_rate: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        duration_minutes: row.get(6)?,
        charge: row.get(7)?,
    })
}

const SESSION_COLUMNS: &str =
    "id, device_id, customer_id, hourly_rate, start_time, end_time, duration_minutes, charge";

// ---------------------------------------------------------------------------
// Start session
// ---------------------------------------------------------------------------

/// Start a session on an available device.
///
/// Snapshots the device's hourly rate onto the session row and marks the
/// device in-use, atomically. Fails InvalidState if the device is busy or
/// already has an open session.
pub fn start_session(
    db: &DbState,
    clock: &dyn Clock,
    device_id: i64,
    customer_id: i64,
) -> PosResult<Session> {
    let conn = db.lock();

    let device = devices::get_device_tx(&conn, device_id)?;
    if !device.is_available {
        return Err(PosError::invalid_state(format!(
            "device {} is in use",
            device.device_number
        )));
    }

    let open: Option<i64> = conn
        .query_row(
            "SELECT id FROM sessions WHERE device_id = ?1 AND end_time IS NULL LIMIT 1",
            params![device_id],
            |row| row.get(0),
        )
        .ok();
    if let Some(open_id) = open {
        return Err(PosError::invalid_state(format!(
            "device {} already has open session {open_id}",
            device.device_number
        )));
    }

    // Walk-in customers are created before this point; here the id must
    // resolve.
    customers::get_by_id_tx(&conn, customer_id)?;

    let start_time = clock.now();

    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = (|| -> PosResult<i64> {
        conn.execute(
            "INSERT INTO sessions (device_id, customer_id, hourly_rate, start_time)
             VALUES (?1, ?2, ?3, ?4)",
            params![device_id, customer_id, device.hourly_rate, start_time],
        )?;
        let id = conn.last_insert_rowid();
        devices::mark_in_use(&conn, device_id)?;
        Ok(id)
    })();

    let session_id = match result {
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
        session_id,
        device_id,
        customer_id,
        rate = device.hourly_rate,
        "Session started"
    );

    Ok(Session {
        id: session_id,
        device_id,
        customer_id,
        hourly_rate: device.hourly_rate,
        start_time,
        end_time: None,
        duration_minutes: None,
        charge: None,
    })
}

// ---------------------------------------------------------------------------
// Close session
// ---------------------------------------------------------------------------

/// Close an open session and bill it.
///
/// Duration is whole minutes elapsed (floor of seconds / 60); the charge is
/// `duration / 60 × hourly_rate`, rounded to two decimals only here, at the
/// point of persistence. The device is released in the same transaction,
/// exactly once. Fails InvalidState on a double close or if `now` precedes
/// the session start (clock skew).
pub fn close_session(db: &DbState, clock: &dyn Clock, session_id: i64) -> PosResult<Session> {
    let conn = db.lock();

    let session = conn
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
            params![session_id],
            map_session,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                PosError::not_found(format!("session {session_id}"))
            }
            other => other.into(),
        })?;

    if session.end_time.is_some() {
        return Err(PosError::invalid_state(format!(
            "session {session_id} is already closed"
        )));
    }

    let now = clock.now();
    if now < session.start_time {
        return Err(PosError::invalid_state(format!(
            "clock skew: now {now} precedes session start {}",
            session.start_time
        )));
    }

    let duration_minutes = (now - session.start_time).num_seconds() / 60;
    let charge = round2(duration_minutes as f64 / 60.0 * session.hourly_rate);

    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = (|| -> PosResult<()> {
        conn.execute(
            "UPDATE sessions SET end_time = ?1, duration_minutes = ?2, charge = ?3 WHERE id = ?4",
            params![now, duration_minutes, charge, session_id],
        )?;
        devices::mark_available(&conn, session.device_id)?;
        Ok(())
    })();

    match result {
        Ok(()) => conn.execute_batch("COMMIT")?,
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    }

    info!(
        session_id,
        device_id = session.device_id,
        duration_minutes,
        charge,
        "Session closed"
    );

    Ok(Session {
        end_time: Some(now),
        duration_minutes: Some(duration_minutes),
        charge: Some(charge),
        ..session
    })
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// All currently open sessions, oldest first.
pub fn open_sessions(db: &DbState) -> PosResult<Vec<Session>> {
    let conn = db.lock();
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE end_time IS NULL ORDER BY start_time"
    ))?;
    let sessions = stmt
        .query_map([], map_session)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(sessions)
}

/// The open session on a device, if any.
pub fn open_session_for_device(db: &DbState, device_id: i64) -> PosResult<Option<Session>> {
    let conn = db.lock();
    let session = conn
        .query_row(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE device_id = ?1 AND end_time IS NULL
                 ORDER BY start_time DESC LIMIT 1"
            ),
            params![device_id],
            map_session,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    Ok(session)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::test_db;
    use crate::devices::{add_device, get_device, NewDevice};

    fn setup(db: &DbState, rate: f64) -> (i64, i64) {
        let device = add_device(
            db,
            &NewDevice {
                device_number: "PC-01".to_string(),
                device_type: "PC".to_string(),
                hourly_rate: rate,
            },
        )
        .unwrap();
        let customer = customers::get_or_create_by_phone(
            db,
            &FixedClock::at("2024-03-15 00:00:00"),
            "09125550199",
        )
        .unwrap();
        (device.id, customer.id)
    }

    #[test]
    fn test_close_after_45_minutes() {
        let db = test_db();
        let (device_id, customer_id) = setup(&db, 5.0);

        let start = FixedClock::at("2024-03-15 01:00:00");
        let session = start_session(&db, &start, device_id, customer_id).unwrap();

        let end = FixedClock::at("2024-03-15 01:45:00");
        let closed = close_session(&db, &end, session.id).unwrap();

        assert_eq!(closed.duration_minutes, Some(45));
        assert_eq!(closed.charge, Some(3.75));
    }

    #[test]
    fn test_close_after_90_minutes() {
        let db = test_db();
        let (device_id, customer_id) = setup(&db, 6.0);

        let start = FixedClock::at("2024-03-15 10:00:00");
        let session = start_session(&db, &start, device_id, customer_id).unwrap();

        let end = FixedClock::at("2024-03-15 11:30:00");
        let closed = close_session(&db, &end, session.id).unwrap();

        assert_eq!(closed.duration_minutes, Some(90));
        assert_eq!(closed.charge, Some(9.0));
    }

    #[test]
    fn test_partial_minute_is_floored() {
        let db = test_db();
        let (device_id, customer_id) = setup(&db, 6.0);

        let start = FixedClock::at("2024-03-15 10:00:00");
        let session = start_session(&db, &start, device_id, customer_id).unwrap();

        // 12 minutes 59 seconds elapsed -> 12 whole minutes
        let end = FixedClock::at("2024-03-15 10:12:59");
        let closed = close_session(&db, &end, session.id).unwrap();
        assert_eq!(closed.duration_minutes, Some(12));
        assert_eq!(closed.charge, Some(1.2));
    }

    #[test]
    fn test_device_released_exactly_once() {
        let db = test_db();
        let (device_id, customer_id) = setup(&db, 5.0);

        let start = FixedClock::at("2024-03-15 01:00:00");
        let session = start_session(&db, &start, device_id, customer_id).unwrap();
        assert!(!get_device(&db, device_id).unwrap().is_available);

        let end = FixedClock::at("2024-03-15 02:00:00");
        close_session(&db, &end, session.id).unwrap();
        assert!(get_device(&db, device_id).unwrap().is_available);
    }

    #[test]
    fn test_double_close_rejected() {
        let db = test_db();
        let (device_id, customer_id) = setup(&db, 5.0);

        let start = FixedClock::at("2024-03-15 01:00:00");
        let session = start_session(&db, &start, device_id, customer_id).unwrap();
        let end = FixedClock::at("2024-03-15 02:00:00");
        close_session(&db, &end, session.id).unwrap();

        assert!(matches!(
            close_session(&db, &end, session.id),
            Err(PosError::InvalidState(_))
        ));
    }

    #[test]
    fn test_clock_skew_rejected() {
        let db = test_db();
        let (device_id, customer_id) = setup(&db, 5.0);

        let start = FixedClock::at("2024-03-15 02:00:00");
        let session = start_session(&db, &start, device_id, customer_id).unwrap();

        let before_start = FixedClock::at("2024-03-15 01:59:00");
        assert!(matches!(
            close_session(&db, &before_start, session.id),
            Err(PosError::InvalidState(_))
        ));

        // Session remains open and closable
        let end = FixedClock::at("2024-03-15 03:00:00");
        assert!(close_session(&db, &end, session.id).is_ok());
    }

    #[test]
    fn test_busy_device_rejects_second_session() {
        let db = test_db();
        let (device_id, customer_id) = setup(&db, 5.0);

        let start = FixedClock::at("2024-03-15 01:00:00");
        start_session(&db, &start, device_id, customer_id).unwrap();

        assert!(matches!(
            start_session(&db, &start, device_id, customer_id),
            Err(PosError::InvalidState(_))
        ));
    }

    #[test]
    fn test_rate_snapshot_survives_device_edit() {
        let db = test_db();
        let (device_id, customer_id) = setup(&db, 5.0);

        let start = FixedClock::at("2024-03-15 01:00:00");
        let session = start_session(&db, &start, device_id, customer_id).unwrap();

        // Rate hike mid-session must not affect the running session's bill
        {
            let conn = db.lock();
            conn.execute("UPDATE devices SET hourly_rate = 50.0 WHERE id = ?1", [device_id])
                .unwrap();
        }

        let end = FixedClock::at("2024-03-15 02:00:00");
        let closed = close_session(&db, &end, session.id).unwrap();
        assert_eq!(closed.charge, Some(5.0));
    }

    #[test]
    fn test_to_line_item() {
        let db = test_db();
        let (device_id, customer_id) = setup(&db, 5.0);

        let start = FixedClock::at("2024-03-15 01:00:00");
        let session = start_session(&db, &start, device_id, customer_id).unwrap();
        assert!(session.to_line_item("PC-01").is_err());

        let end = FixedClock::at("2024-03-15 01:45:00");
        let closed = close_session(&db, &end, session.id).unwrap();
        let item = closed.to_line_item("PC-01").unwrap();
        assert_eq!(item.amount, 3.75);
        assert_eq!(item.kind, LineItemKind::GamnetSession);
        assert!(item.description.contains("PC-01"));
        assert!(item.description.contains("45 min"));
    }

    #[test]
    fn test_open_session_queries() {
        let db = test_db();
        let (device_id, customer_id) = setup(&db, 5.0);

        assert!(open_sessions(&db).unwrap().is_empty());
        assert!(open_session_for_device(&db, device_id).unwrap().is_none());

        let start = FixedClock::at("2024-03-15 01:00:00");
        let session = start_session(&db, &start, device_id, customer_id).unwrap();

        assert_eq!(open_sessions(&db).unwrap().len(), 1);
        assert_eq!(
            open_session_for_device(&db, device_id).unwrap().unwrap().id,
            session.id
        );

        close_session(&db, &FixedClock::at("2024-03-15 02:00:00"), session.id).unwrap();
        assert!(open_sessions(&db).unwrap().is_empty());
    }
}
