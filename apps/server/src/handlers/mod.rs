pub mod account;
pub mod admin;
pub mod customer;
pub mod health;
pub mod owner;

use axum::Json;
use chrono::NaiveDate;
use sqlx::SqlitePool;

use crate::{
    error::AppError,
    models::{
        ApiResponse, Appointment, AppointmentStatus, Salon, SalonOverview, Service, Slot,
        WorkingHours,
    },
    notifications::DomainEvent,
    slots::{
        allocation::{save_appointment, AppointmentDraft},
        store,
    },
    AppState,
};

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

/// Salon-local "today"; the server runs in the salons' timezone.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

pub(crate) async fn load_salon(pool: &SqlitePool, id: i64) -> Result<Salon, AppError> {
    let mut conn = pool.acquire().await?;
    store::salon_by_id(&mut conn, id)
        .await?
        .ok_or(AppError::NotFound("Salon"))
}

pub(crate) async fn load_appointment(pool: &SqlitePool, id: i64) -> Result<Appointment, AppError> {
    let mut conn = pool.acquire().await?;
    store::appointment_by_id(&mut conn, id)
        .await?
        .ok_or(AppError::NotFound("Appointment"))
}

/// Slot `id` of `salon_id`.
pub(crate) async fn load_slot(pool: &SqlitePool, salon_id: i64, id: i64) -> Result<Slot, AppError> {
    let mut conn = pool.acquire().await?;
    store::slot_by_id(&mut conn, id)
        .await?
        .filter(|s| s.salon_id == salon_id)
        .ok_or(AppError::NotFound("Slot"))
}

pub(crate) async fn load_overview(pool: &SqlitePool, salon: Salon) -> Result<SalonOverview, AppError> {
    let services = sqlx::query_as::<_, Service>(
        "SELECT id, salon_id, name, description, price, duration_min
         FROM services WHERE salon_id = ? ORDER BY name ASC",
    )
    .bind(salon.id)
    .fetch_all(pool)
    .await?;
    let working_hours = load_hours(pool, salon.id).await?;

    Ok(SalonOverview {
        salon,
        services,
        working_hours,
    })
}

pub(crate) async fn load_hours(pool: &SqlitePool, salon_id: i64) -> Result<Vec<WorkingHours>, sqlx::Error> {
    sqlx::query_as::<_, WorkingHours>(
        "SELECT salon_id, weekday, is_open, open_time, close_time
         FROM working_hours WHERE salon_id = ? ORDER BY weekday ASC",
    )
    .bind(salon_id)
    .fetch_all(pool)
    .await
}

/// Cancel an active appointment and tell the other side.
///
/// Returns the cancelled appointment and a delivery warning, if any.
pub(crate) async fn cancel_and_notify(
    state: &AppState,
    salon: &Salon,
    appointment: &Appointment,
    reason: Option<String>,
    by_owner: bool,
) -> Result<(Appointment, Option<String>), AppError> {
    if !matches!(
        appointment.status,
        AppointmentStatus::Pending | AppointmentStatus::Confirmed
    ) {
        return Err(AppError::Conflict(
            "Only pending or confirmed appointments can be cancelled".into(),
        ));
    }
    let mut draft = AppointmentDraft::from_existing(appointment)
        .ok_or_else(|| AppError::Conflict("Appointment has no slot".into()))?;
    draft.status = AppointmentStatus::Cancelled;
    draft.cancellation_reason = reason.filter(|r| !r.trim().is_empty());

    let cancelled = save_appointment(&state.db, &draft).await?;

    let recipient = if by_owner { cancelled.customer_id } else { salon.owner_id };
    let event = DomainEvent::Cancellation {
        salon_name: salon.name.clone(),
        date: cancelled.date,
        start_time: cancelled.start_time,
        by_owner,
        reason: cancelled.cancellation_reason.clone(),
    };
    let warning = state.notifier.dispatch(recipient, &event).await;
    Ok((cancelled, warning))
}
