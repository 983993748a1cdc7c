use chrono::NaiveDate;
use sqlx::SqlitePool;

use super::{generator, is_bookable, overlay, store, to_available, Interval};
use crate::{
    error::AppError,
    models::{AppointmentDetail, AvailableSlot, SlotOverlay},
};

/// Appointment listing joined with the names shown in both mini apps.
pub const DETAIL_SELECT: &str = "SELECT a.id, a.salon_id, s.name AS salon_name, a.slot_id,
        a.customer_id, u.first_name AS customer_name, u.username AS customer_username,
        sv.name AS service_name, sv.duration_min AS service_duration_min,
        a.date, a.start_time, a.status, a.notes, a.cancellation_reason, a.created_at
     FROM appointments a
     JOIN salons s ON s.id = a.salon_id
     JOIN user_profiles u ON u.user_id = a.customer_id
     LEFT JOIN services sv ON sv.id = a.service_id";

pub async fn appointment_detail(
    pool: &SqlitePool,
    id: i64,
) -> Result<Option<AppointmentDetail>, sqlx::Error> {
    sqlx::query_as::<_, AppointmentDetail>(&format!("{DETAIL_SELECT} WHERE a.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Slots a customer can pick on `date`. Generates the day first.
pub async fn list_available_slots(
    pool: &SqlitePool,
    salon_id: i64,
    date: NaiveDate,
) -> Result<Vec<AvailableSlot>, AppError> {
    generator::generate_slots(pool, salon_id, date).await?;

    let mut conn = pool.acquire().await?;
    let slots = store::slots_for_day(&mut conn, salon_id, date).await?;
    Ok(slots.iter().filter(|s| is_bookable(s)).map(to_available).collect())
}

/// Owner calendar for `date`: every slot, with coverage by active appointments.
pub async fn slot_status_overlay(
    pool: &SqlitePool,
    salon_id: i64,
    date: NaiveDate,
) -> Result<Vec<SlotOverlay>, AppError> {
    generator::generate_slots(pool, salon_id, date).await?;

    let mut conn = pool.acquire().await?;
    let slots = store::slots_for_day(&mut conn, salon_id, date).await?;
    let spans = store::active_spans(&mut conn, salon_id, date, None).await?;
    Ok(overlay(&slots, &spans))
}

/// Active appointment covering `slot_id`: its attribution first, then any
/// appointment whose wall-clock interval overlaps the slot.
pub async fn find_appointment_for_slot(
    pool: &SqlitePool,
    salon_id: i64,
    slot_id: i64,
) -> Result<Option<AppointmentDetail>, AppError> {
    let mut conn = pool.acquire().await?;
    let slot = store::slot_by_id(&mut conn, slot_id)
        .await?
        .filter(|s| s.salon_id == salon_id)
        .ok_or(AppError::NotFound("Slot"))?;

    let appointment_id = match slot.appointment_id {
        Some(id) => Some(id),
        None => {
            let spans = store::active_spans(&mut conn, salon_id, slot.date, None).await?;
            let interval = Interval::of_slot(&slot);
            spans
                .iter()
                .find(|span| span.interval.overlaps(&interval))
                .map(|span| span.appointment_id)
        }
    };
    drop(conn);

    let Some(id) = appointment_id else {
        return Ok(None);
    };
    let detail = appointment_detail(pool, id).await?;
    Ok(detail.filter(|d| d.status.is_active()))
}
