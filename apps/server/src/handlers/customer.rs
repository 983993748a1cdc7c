use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;

use super::{cancel_and_notify, load_appointment, load_overview, load_salon, load_slot, today, ApiResult};
use crate::{
    auth,
    error::AppError,
    models::*,
    notifications::DomainEvent,
    slots::{
        allocation::{save_appointment, AppointmentDraft},
        parse_date,
        queries::{self, DETAIL_SELECT},
    },
    AppState,
};

/// Salon visible to customers: approved and active.
async fn public_salon(state: &AppState, id: i64) -> Result<Salon, AppError> {
    let salon = load_salon(&state.db, id).await?;
    if salon.is_approved && salon.is_active {
        Ok(salon)
    } else {
        Err(AppError::NotFound("Salon"))
    }
}

/// GET /api/salons — approved, active salons.
pub async fn list_salons(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Salon>> {
    let salons = sqlx::query_as::<_, Salon>(
        "SELECT * FROM salons WHERE is_approved = 1 AND is_active = 1 ORDER BY name ASC",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(ApiResponse::success(salons)))
}

/// GET /api/salons/{id} — salon with its services and working hours.
pub async fn get_salon(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<SalonOverview> {
    let salon = public_salon(&state, id).await?;
    Ok(Json(ApiResponse::success(load_overview(&state.db, salon).await?)))
}

/// GET /api/salons/{id}/slots?date=YYYY-MM-DD — bookable slots of one day.
pub async fn salon_slots(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Vec<AvailableSlot>> {
    let date = parse_date(&query.date)?;
    let salon = public_salon(&state, id).await?;
    if date < today() {
        return Ok(Json(ApiResponse::success(Vec::new())));
    }

    let slots = queries::list_available_slots(&state.db, salon.id, date).await?;
    Ok(Json(ApiResponse::success(slots)))
}

/// POST /api/appointments — book a slot for a service.
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateAppointmentRequest>,
) -> ApiResult<WithWarning<Appointment>> {
    let user = auth::authenticate(&headers, &state.config.bot_token)?;
    let profile = auth::require_profile(&state.db, &user).await?;
    if profile.role != Role::Customer {
        return Err(AppError::Forbidden("Only customers can book appointments"));
    }

    let salon = public_salon(&state, body.salon_id).await?;
    let slot_id = body
        .slot_id
        .ok_or_else(|| AppError::validation("Choose a time slot"))?;
    let service_id = body
        .service_id
        .ok_or_else(|| AppError::validation("Choose a service"))?;
    let slot = load_slot(&state.db, salon.id, slot_id).await?;

    let now = chrono::Local::now().naive_local();
    if slot.date.and_time(slot.start_time) <= now {
        return Err(AppError::validation("This time has already passed"));
    }

    let draft = AppointmentDraft {
        id: None,
        salon_id: salon.id,
        slot_id: slot.id,
        customer_id: user.id,
        service_id: Some(service_id),
        status: AppointmentStatus::Pending,
        notes: body.notes.trim().to_string(),
        cancellation_reason: None,
    };
    let appointment = save_appointment(&state.db, &draft).await?;

    let service_name = queries::appointment_detail(&state.db, appointment.id)
        .await?
        .and_then(|d| d.service_name);
    let event = DomainEvent::NewBooking {
        salon_name: salon.name.clone(),
        customer_name: user.first_name.clone(),
        service_name,
        date: appointment.date,
        start_time: appointment.start_time,
    };
    let warning = state.notifier.dispatch(salon.owner_id, &event).await;

    Ok(Json(ApiResponse::success(WithWarning {
        data: appointment,
        warning,
    })))
}

/// GET /api/appointments/my — the caller's upcoming and past appointments.
pub async fn my_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<MyAppointments> {
    let user = auth::authenticate(&headers, &state.config.bot_token)?;

    let all = sqlx::query_as::<_, AppointmentDetail>(&format!(
        "{DETAIL_SELECT} WHERE a.customer_id = ? ORDER BY a.date ASC, a.start_time ASC"
    ))
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    let today = today();
    let (future, mut past): (Vec<_>, Vec<_>) = all.into_iter().partition(|a| {
        a.date >= today
            && matches!(a.status, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    });
    past.reverse();

    Ok(Json(ApiResponse::success(MyAppointments { future, past })))
}

/// POST /api/appointments/{id}/cancel — customer cancels their own appointment.
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    body: Option<Json<CancelRequest>>,
) -> ApiResult<WithWarning<Appointment>> {
    let user = auth::authenticate(&headers, &state.config.bot_token)?;
    let appointment = load_appointment(&state.db, id).await?;
    if appointment.customer_id != user.id {
        return Err(AppError::NotFound("Appointment"));
    }
    let salon = load_salon(&state.db, appointment.salon_id).await?;
    let reason = body.and_then(|Json(b)| b.reason);

    let (cancelled, warning) = cancel_and_notify(&state, &salon, &appointment, reason, false).await?;
    Ok(Json(ApiResponse::success(WithWarning {
        data: cancelled,
        warning,
    })))
}
