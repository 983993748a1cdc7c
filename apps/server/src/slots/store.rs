//! SQL used by the slot engine. Every function takes a connection so the
//! caller decides the transaction boundary.

use chrono::{NaiveDate, NaiveTime};
use sqlx::SqliteConnection;

use super::{slot_minutes, ActiveSpan, DEFAULT_SLOT_MINUTES};
use crate::models::{Appointment, Salon, Service, Slot, SlotStatus, WorkingHours};

const SLOT_COLUMNS: &str = "id, salon_id, date, start_time, end_time, status, appointment_id";

pub const APPOINTMENT_COLUMNS: &str = "id, salon_id, slot_id, customer_id, service_id, date, start_time, \
     status, notes, cancellation_reason, created_at, updated_at";

pub async fn salon_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Salon>, sqlx::Error> {
    sqlx::query_as::<_, Salon>("SELECT * FROM salons WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn service_by_id(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<Service>, sqlx::Error> {
    sqlx::query_as::<_, Service>(
        "SELECT id, salon_id, name, description, price, duration_min FROM services WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(conn)
    .await
}

pub async fn appointment_by_id(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<Appointment>, sqlx::Error> {
    sqlx::query_as::<_, Appointment>(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await
}

pub async fn working_hours_for(
    conn: &mut SqliteConnection,
    salon_id: i64,
    weekday: i64,
) -> Result<Option<WorkingHours>, sqlx::Error> {
    sqlx::query_as::<_, WorkingHours>(
        "SELECT salon_id, weekday, is_open, open_time, close_time
         FROM working_hours WHERE salon_id = ? AND weekday = ?",
    )
    .bind(salon_id)
    .bind(weekday)
    .fetch_optional(conn)
    .await
}

pub async fn slot_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Slot>, sqlx::Error> {
    sqlx::query_as::<_, Slot>(&format!("SELECT {SLOT_COLUMNS} FROM slots WHERE id = ?"))
        .bind(id)
        .fetch_optional(conn)
        .await
}

/// Every slot of a salon on `date`, ordered by start time.
pub async fn slots_for_day(
    conn: &mut SqliteConnection,
    salon_id: i64,
    date: NaiveDate,
) -> Result<Vec<Slot>, sqlx::Error> {
    sqlx::query_as::<_, Slot>(&format!(
        "SELECT {SLOT_COLUMNS} FROM slots WHERE salon_id = ? AND date = ? ORDER BY start_time ASC"
    ))
    .bind(salon_id)
    .bind(date)
    .fetch_all(conn)
    .await
}

/// Atomic get-or-create keyed on (salon, date, start_time).
pub async fn insert_slot_if_absent(
    conn: &mut SqliteConnection,
    salon_id: i64,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
) -> Result<Slot, sqlx::Error> {
    sqlx::query(
        "INSERT INTO slots (salon_id, date, start_time, end_time, status)
         VALUES (?, ?, ?, ?, 'available')
         ON CONFLICT (salon_id, date, start_time) DO NOTHING",
    )
    .bind(salon_id)
    .bind(date)
    .bind(start)
    .bind(end)
    .execute(&mut *conn)
    .await?;

    sqlx::query_as::<_, Slot>(&format!(
        "SELECT {SLOT_COLUMNS} FROM slots WHERE salon_id = ? AND date = ? AND start_time = ?"
    ))
    .bind(salon_id)
    .bind(date)
    .bind(start)
    .fetch_one(conn)
    .await
}

pub async fn set_slot_state(
    conn: &mut SqliteConnection,
    slot_id: i64,
    status: SlotStatus,
    appointment_id: Option<i64>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE slots SET status = ?, appointment_id = ? WHERE id = ?")
        .bind(status)
        .bind(appointment_id)
        .bind(slot_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Wall-clock spans of the salon's non-cancelled appointments on `date`.
pub async fn active_spans(
    conn: &mut SqliteConnection,
    salon_id: i64,
    date: NaiveDate,
    exclude: Option<i64>,
) -> Result<Vec<ActiveSpan>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, NaiveTime, Option<i64>, Option<NaiveTime>, Option<NaiveTime>)>(
        "SELECT a.id, a.start_time, sv.duration_min, sl.start_time, sl.end_time
         FROM appointments a
         LEFT JOIN services sv ON sv.id = a.service_id
         LEFT JOIN slots sl ON sl.id = a.slot_id
         WHERE a.salon_id = ? AND a.date = ? AND a.status != 'cancelled' AND a.id IS NOT ?",
    )
    .bind(salon_id)
    .bind(date)
    .bind(exclude)
    .fetch_all(conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, start, duration, anchor_start, anchor_end)| {
            let width = match (anchor_start, anchor_end) {
                (Some(s), Some(e)) => slot_minutes(s, e),
                _ => DEFAULT_SLOT_MINUTES,
            };
            ActiveSpan::new(id, start, duration, width)
        })
        .collect())
}

/// Delete the slots of `date` nobody depends on. Returns how many went.
pub async fn delete_free_slots(
    conn: &mut SqliteConnection,
    salon_id: i64,
    date: NaiveDate,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM slots
         WHERE salon_id = ? AND date = ? AND status = 'available' AND appointment_id IS NULL",
    )
    .bind(salon_id)
    .bind(date)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// True when any slot of `date` is busy, blocked or attributed.
pub async fn day_has_commitments(
    conn: &mut SqliteConnection,
    salon_id: i64,
    date: NaiveDate,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM slots
         WHERE salon_id = ? AND date = ? AND (status != 'available' OR appointment_id IS NOT NULL)",
    )
    .bind(salon_id)
    .bind(date)
    .fetch_one(conn)
    .await
}
