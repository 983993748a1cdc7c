use sqlx::{SqliteConnection, SqlitePool};

use super::{
    check_availability, minute_of_day, released_state, required_slot_count, slot_minutes, store,
    time_at, weekday_index, Interval,
};
use crate::{
    db,
    error::{unique_violation_as_taken, AppError},
    models::{Appointment, AppointmentStatus, Slot, SlotStatus},
};

/// Desired state of an appointment, as submitted by a customer or owner.
#[derive(Debug, Clone)]
pub struct AppointmentDraft {
    /// `None` creates a new appointment.
    pub id: Option<i64>,
    pub salon_id: i64,
    /// Anchor slot: the first slot of the occupied range.
    pub slot_id: i64,
    pub customer_id: i64,
    pub service_id: Option<i64>,
    pub status: AppointmentStatus,
    pub notes: String,
    pub cancellation_reason: Option<String>,
}

impl AppointmentDraft {
    /// Draft that re-saves `appointment` unchanged. `None` when its anchor
    /// slot no longer exists.
    pub fn from_existing(appointment: &Appointment) -> Option<Self> {
        Some(Self {
            id: Some(appointment.id),
            salon_id: appointment.salon_id,
            slot_id: appointment.slot_id?,
            customer_id: appointment.customer_id,
            service_id: appointment.service_id,
            status: appointment.status,
            notes: appointment.notes.clone(),
            cancellation_reason: appointment.cancellation_reason.clone(),
        })
    }
}

/// Whether a range lookup may create slots (booking) or only reads them (release).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeMode {
    Claim,
    Existing,
}

/// Save an appointment and bring the slot table in line with it, atomically.
///
/// Any error rolls the whole transaction back: no slot is marked or freed
/// unless the appointment row is written too.
pub async fn save_appointment(
    pool: &SqlitePool,
    draft: &AppointmentDraft,
) -> Result<Appointment, AppError> {
    let mut tx = db::begin_salon_write(pool, draft.salon_id)
        .await?
        .ok_or(AppError::NotFound("Salon"))?;
    let appointment = save_locked(&mut tx, draft).await?;
    tx.commit().await?;

    tracing::info!(
        appointment_id = appointment.id,
        salon_id = appointment.salon_id,
        status = ?appointment.status,
        "appointment saved"
    );
    Ok(appointment)
}

async fn save_locked(
    conn: &mut SqliteConnection,
    draft: &AppointmentDraft,
) -> Result<Appointment, AppError> {
    let anchor = store::slot_by_id(conn, draft.slot_id)
        .await?
        .filter(|s| s.salon_id == draft.salon_id)
        .ok_or(AppError::NotFound("Slot"))?;

    let duration = match draft.service_id {
        Some(service_id) => {
            let service = store::service_by_id(conn, service_id)
                .await?
                .filter(|s| s.salon_id == draft.salon_id)
                .ok_or(AppError::NotFound("Service"))?;
            Some(service.duration_min)
        }
        None => None,
    };

    let previous = match draft.id {
        Some(id) => Some(
            store::appointment_by_id(conn, id)
                .await?
                .filter(|a| a.salon_id == draft.salon_id)
                .ok_or(AppError::NotFound("Appointment"))?,
        ),
        None => None,
    };

    // 1. Free the range the appointment held before, if its footprint changes.
    if let Some(prev) = previous.as_ref().filter(|p| p.status.is_active()) {
        let moved = prev.slot_id != Some(anchor.id) || prev.service_id != draft.service_id;
        if moved || !draft.status.is_active() {
            let prev_range = previous_range(conn, prev).await?;
            release_range(conn, &prev_range, Some(prev.id)).await?;
        }
    }

    if draft.status.is_active() {
        // 2-3. Claim and validate the target range before touching anything.
        let target = occupied_range(conn, &anchor, duration, RangeMode::Claim).await?;
        check_availability(&target, draft.id)?;

        // 4-5. Persist, then attribute every slot of the range to it.
        let appointment = persist(conn, draft, &anchor).await?;
        mark_busy(conn, &target, appointment.id).await?;
        Ok(appointment)
    } else {
        // 6. Terminal cleanup for cancellations.
        let appointment = persist(conn, draft, &anchor).await?;
        let target = occupied_range(conn, &anchor, duration, RangeMode::Existing).await?;
        release_range(conn, &target, Some(appointment.id)).await?;
        Ok(appointment)
    }
}

/// Slots covered by `appointment` as currently stored.
async fn previous_range(
    conn: &mut SqliteConnection,
    appointment: &Appointment,
) -> Result<Vec<Slot>, AppError> {
    let Some(slot_id) = appointment.slot_id else {
        return Ok(Vec::new());
    };
    let Some(anchor) = store::slot_by_id(conn, slot_id).await? else {
        return Ok(Vec::new());
    };
    let duration = match appointment.service_id {
        Some(id) => store::service_by_id(conn, id).await?.map(|s| s.duration_min),
        None => None,
    };
    occupied_range(conn, &anchor, duration, RangeMode::Existing).await
}

/// Contiguous slots starting at `anchor` that a service of `duration` occupies.
///
/// The width of every slot must equal the anchor's; a range spanning a
/// width change is rejected rather than guessed at. In claim mode, missing
/// slots are created when they fit inside the day's working hours.
async fn occupied_range(
    conn: &mut SqliteConnection,
    anchor: &Slot,
    duration: Option<i64>,
    mode: RangeMode,
) -> Result<Vec<Slot>, AppError> {
    let width = slot_minutes(anchor.start_time, anchor.end_time);
    let count = required_slot_count(duration.unwrap_or(width), width);
    let day = store::slots_for_day(conn, anchor.salon_id, anchor.date).await?;
    let hours = match mode {
        RangeMode::Claim => {
            store::working_hours_for(conn, anchor.salon_id, weekday_index(anchor.date)).await?
        }
        RangeMode::Existing => None,
    };

    let first = minute_of_day(anchor.start_time);
    let mut range = Vec::with_capacity(count);

    for index in 0..count as i64 {
        let start = first + width * index;
        let end = start + width;
        let (Some(start_time), Some(end_time)) = (time_at(start), time_at(end)) else {
            match mode {
                RangeMode::Claim => return Err(AppError::InsufficientSlots),
                RangeMode::Existing => break,
            }
        };

        match day.iter().find(|s| s.start_time == start_time) {
            Some(slot) if slot.end_time == end_time => range.push(slot.clone()),
            Some(_) if mode == RangeMode::Claim => return Err(AppError::InsufficientSlots),
            Some(_) => {}
            None if mode == RangeMode::Claim => {
                let fits = hours.as_ref().is_some_and(|h| {
                    h.is_open && h.open_time <= start_time && end_time <= h.close_time
                });
                let wanted = Interval { start, end };
                let collides = day.iter().any(|s| Interval::of_slot(s).overlaps(&wanted));
                if !fits || collides {
                    return Err(AppError::InsufficientSlots);
                }
                let slot = store::insert_slot_if_absent(
                    conn,
                    anchor.salon_id,
                    anchor.date,
                    start_time,
                    end_time,
                )
                .await?;
                range.push(slot);
            }
            None => {}
        }
    }

    Ok(range)
}

async fn persist(
    conn: &mut SqliteConnection,
    draft: &AppointmentDraft,
    anchor: &Slot,
) -> Result<Appointment, AppError> {
    let result = match draft.id {
        None => {
            sqlx::query_as::<_, Appointment>(&format!(
                "INSERT INTO appointments
                    (salon_id, slot_id, customer_id, service_id, date, start_time,
                     status, notes, cancellation_reason)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 RETURNING {}",
                store::APPOINTMENT_COLUMNS
            ))
            .bind(draft.salon_id)
            .bind(anchor.id)
            .bind(draft.customer_id)
            .bind(draft.service_id)
            .bind(anchor.date)
            .bind(anchor.start_time)
            .bind(draft.status)
            .bind(&draft.notes)
            .bind(&draft.cancellation_reason)
            .fetch_one(&mut *conn)
            .await
        }
        Some(id) => {
            sqlx::query_as::<_, Appointment>(&format!(
                "UPDATE appointments
                 SET slot_id = ?, service_id = ?, date = ?, start_time = ?, status = ?,
                     notes = ?, cancellation_reason = ?, updated_at = datetime('now')
                 WHERE id = ?
                 RETURNING {}",
                store::APPOINTMENT_COLUMNS
            ))
            .bind(anchor.id)
            .bind(draft.service_id)
            .bind(anchor.date)
            .bind(anchor.start_time)
            .bind(draft.status)
            .bind(&draft.notes)
            .bind(&draft.cancellation_reason)
            .bind(id)
            .fetch_one(&mut *conn)
            .await
        }
    };
    result.map_err(|e| unique_violation_as_taken(e, anchor.id))
}

async fn mark_busy(
    conn: &mut SqliteConnection,
    slots: &[Slot],
    appointment_id: i64,
) -> Result<(), sqlx::Error> {
    for slot in slots {
        if slot.status != SlotStatus::Busy || slot.appointment_id != Some(appointment_id) {
            store::set_slot_state(conn, slot.id, SlotStatus::Busy, Some(appointment_id)).await?;
        }
    }
    Ok(())
}

/// Free `slots` unless another active appointment still overlaps them.
async fn release_range(
    conn: &mut SqliteConnection,
    slots: &[Slot],
    exclude: Option<i64>,
) -> Result<(), sqlx::Error> {
    let Some(first) = slots.first() else {
        return Ok(());
    };
    let others = store::active_spans(conn, first.salon_id, first.date, exclude).await?;

    for slot in slots {
        if let Some((status, owner)) = released_state(slot, &others) {
            if status != slot.status || owner != slot.appointment_id {
                store::set_slot_state(conn, slot.id, status, owner).await?;
            }
        }
    }
    Ok(())
}

/// Block or unblock a slot. A slot with an appointment on it cannot be
/// blocked; only a blocked slot can be unblocked.
pub async fn set_slot_blocked(
    pool: &SqlitePool,
    salon_id: i64,
    slot_id: i64,
    blocked: bool,
) -> Result<Slot, AppError> {
    let mut tx = db::begin_salon_write(pool, salon_id)
        .await?
        .ok_or(AppError::NotFound("Salon"))?;
    let slot = store::slot_by_id(&mut tx, slot_id)
        .await?
        .filter(|s| s.salon_id == salon_id)
        .ok_or(AppError::NotFound("Slot"))?;

    let status = if blocked {
        if slot.status == SlotStatus::Blocked {
            return Ok(slot);
        }
        let spans = store::active_spans(&mut tx, salon_id, slot.date, None).await?;
        let interval = Interval::of_slot(&slot);
        let covered = spans.iter().any(|span| span.interval.overlaps(&interval));
        if slot.status == SlotStatus::Busy || slot.appointment_id.is_some() || covered {
            return Err(AppError::Conflict(
                "This slot has an appointment; cancel it first".into(),
            ));
        }
        SlotStatus::Blocked
    } else {
        if slot.status != SlotStatus::Blocked {
            return Err(AppError::Conflict("Slot is not blocked".into()));
        }
        SlotStatus::Available
    };

    store::set_slot_state(&mut tx, slot.id, status, None).await?;
    tx.commit().await?;
    tracing::info!(salon_id, slot_id, blocked, "slot availability changed");

    Ok(Slot {
        status,
        appointment_id: None,
        ..slot
    })
}
