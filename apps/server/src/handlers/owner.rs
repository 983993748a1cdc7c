use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{NaiveTime, Timelike};
use sqlx::SqliteConnection;
use std::collections::HashSet;
use std::sync::Arc;

use super::{
    cancel_and_notify, load_appointment, load_hours, load_overview, today, ApiResult,
};
use crate::{
    auth, db,
    error::AppError,
    models::*,
    notifications::DomainEvent,
    slots::{
        allocation::{save_appointment, set_slot_blocked, AppointmentDraft},
        maintenance::{change_slot_interval, regenerate_weekday, RegenerationReport},
        parse_date,
        queries::{self, DETAIL_SELECT},
        ALLOWED_INTERVALS, DEFAULT_SLOT_MINUTES,
    },
    AppState,
};

fn default_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default()
}

fn default_close() -> NaiveTime {
    NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default()
}

/// Salon of the authenticated owner.
async fn owned_salon(state: &AppState, headers: &HeaderMap) -> Result<Salon, AppError> {
    let user = auth::authenticate(headers, &state.config.bot_token)?;
    auth::require_owned_salon(&state.db, &user).await
}

// ── Salon ──

/// POST /api/owner/salon — register a salon; it stays hidden until approved.
pub async fn create_salon(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateSalonRequest>,
) -> ApiResult<WithWarning<Salon>> {
    let user = auth::authenticate(&headers, &state.config.bot_token)?;
    let profile = auth::require_profile(&state.db, &user).await?;
    if profile.role != Role::Owner {
        return Err(AppError::Forbidden("Only salon owners can do this"));
    }

    let name = body.name.trim();
    let address = body.address.trim();
    if name.is_empty() || address.is_empty() {
        return Err(AppError::validation("Salon name and address are required"));
    }
    let interval = body.slot_interval_minutes.unwrap_or(DEFAULT_SLOT_MINUTES);
    if !ALLOWED_INTERVALS.contains(&interval) {
        return Err(AppError::validation("Slot interval must be 15, 30 or 60 minutes"));
    }

    let already: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM salons WHERE owner_id = ?")
        .bind(user.id)
        .fetch_one(&state.db)
        .await?;
    if already {
        return Err(AppError::Conflict("You already have a salon".into()));
    }

    let mut tx = state.db.begin().await?;
    let salon = sqlx::query_as::<_, Salon>(
        "INSERT INTO salons (owner_id, name, description, address, phone, slot_interval_minutes)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(user.id)
    .bind(name)
    .bind(body.description.trim())
    .bind(address)
    .bind(body.phone.trim())
    .bind(interval)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::Conflict("A salon with this name already exists".into())
        }
        other => AppError::Database(other),
    })?;

    // Mon-Fri open, weekend closed
    for weekday in 0..7i64 {
        sqlx::query(
            "INSERT INTO working_hours (salon_id, weekday, is_open, open_time, close_time)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(salon.id)
        .bind(weekday)
        .bind(weekday < 5)
        .bind(default_open())
        .bind(default_close())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!(salon_id = salon.id, owner_id = user.id, "salon registered");
    let event = DomainEvent::SalonPendingApproval {
        salon_name: salon.name.clone(),
        owner_name: profile.first_name.clone(),
    };
    let warning = state.notifier.dispatch(state.config.admin_tg_id, &event).await;

    Ok(Json(ApiResponse::success(WithWarning { data: salon, warning })))
}

/// GET /api/owner/salon
pub async fn get_salon(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<SalonOverview> {
    let salon = owned_salon(&state, &headers).await?;
    Ok(Json(ApiResponse::success(load_overview(&state.db, salon).await?)))
}

/// PUT /api/owner/salon/interval — switch slot width and rebuild free days.
pub async fn update_interval(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UpdateIntervalRequest>,
) -> ApiResult<RegenerationReport> {
    let salon = owned_salon(&state, &headers).await?;
    let report = change_slot_interval(
        &state.db,
        salon.id,
        body.slot_interval_minutes,
        today(),
        state.config.horizon_days,
    )
    .await?;
    Ok(Json(ApiResponse::success(report)))
}

// ── Working hours ──

/// GET /api/owner/salon/hours
pub async fn get_hours(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Vec<WorkingHours>> {
    let salon = owned_salon(&state, &headers).await?;
    Ok(Json(ApiResponse::success(load_hours(&state.db, salon.id).await?)))
}

fn resolve_hours(salon_id: i64, entry: &WorkingHoursEntry) -> Result<WorkingHours, AppError> {
    if !(0..7).contains(&entry.weekday) {
        return Err(AppError::validation("Weekday must be between 0 (Monday) and 6 (Sunday)"));
    }
    let hours = WorkingHours {
        salon_id,
        weekday: entry.weekday,
        is_open: entry.is_open,
        open_time: entry.open_time.unwrap_or_else(default_open),
        close_time: entry.close_time.unwrap_or_else(default_close),
    };
    let whole_minute = |t: NaiveTime| t.second() == 0 && t.nanosecond() == 0;
    if !whole_minute(hours.open_time) || !whole_minute(hours.close_time) {
        return Err(AppError::validation("Working hours must be whole minutes"));
    }
    if hours.is_open && hours.open_time >= hours.close_time {
        return Err(AppError::validation("Opening time must be before closing time"));
    }
    Ok(hours)
}

/// PUT /api/owner/salon/hours — replace hours of the listed weekdays and
/// regenerate upcoming days whose hours changed.
pub async fn update_hours(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UpdateWorkingHoursRequest>,
) -> ApiResult<WorkingHoursUpdated> {
    let salon = owned_salon(&state, &headers).await?;

    let mut seen = HashSet::new();
    let mut wanted = Vec::with_capacity(body.days.len());
    for entry in &body.days {
        if !seen.insert(entry.weekday) {
            return Err(AppError::validation("Each weekday may appear only once"));
        }
        wanted.push(resolve_hours(salon.id, entry)?);
    }

    let current = load_hours(&state.db, salon.id).await?;
    let changed: Vec<&WorkingHours> = wanted
        .iter()
        .filter(|w| !current.contains(w))
        .collect();

    if !changed.is_empty() {
        let mut tx = db::begin_salon_write(&state.db, salon.id)
            .await?
            .ok_or(AppError::NotFound("Salon"))?;
        for hours in &changed {
            sqlx::query(
                "INSERT INTO working_hours (salon_id, weekday, is_open, open_time, close_time)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (salon_id, weekday) DO UPDATE SET
                    is_open = excluded.is_open,
                    open_time = excluded.open_time,
                    close_time = excluded.close_time",
            )
            .bind(salon.id)
            .bind(hours.weekday)
            .bind(hours.is_open)
            .bind(hours.open_time)
            .bind(hours.close_time)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
    }

    let mut regenerated_weekdays = Vec::with_capacity(changed.len());
    for hours in &changed {
        regenerate_weekday(
            &state.db,
            salon.id,
            hours.weekday,
            today(),
            state.config.horizon_days,
        )
        .await?;
        regenerated_weekdays.push(hours.weekday);
    }
    regenerated_weekdays.sort_unstable();

    Ok(Json(ApiResponse::success(WorkingHoursUpdated {
        hours: load_hours(&state.db, salon.id).await?,
        regenerated_weekdays,
    })))
}

// ── Services ──

fn validate_service(name: &str, price: i64, duration_min: i64) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::validation("Service name is required"));
    }
    if price <= 0 {
        return Err(AppError::validation("Price must be positive"));
    }
    if duration_min < 5 || duration_min % 5 != 0 {
        return Err(AppError::validation(
            "Duration must be at least 5 minutes, in steps of 5",
        ));
    }
    Ok(())
}

fn service_conflict(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::Conflict("A service with this name already exists".into())
        }
        other => AppError::Database(other),
    }
}

async fn owned_service(state: &AppState, salon_id: i64, id: i64) -> Result<Service, AppError> {
    sqlx::query_as::<_, Service>(
        "SELECT id, salon_id, name, description, price, duration_min
         FROM services WHERE id = ? AND salon_id = ?",
    )
    .bind(id)
    .bind(salon_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("Service"))
}

/// Upcoming non-cancelled appointments depend on the service's duration.
///
/// Run it inside the salon write transaction so no booking lands between the
/// check and the change it guards.
async fn service_in_use(conn: &mut SqliteConnection, service_id: i64) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM appointments
         WHERE service_id = ? AND status != 'cancelled' AND date >= ?",
    )
    .bind(service_id)
    .bind(today())
    .fetch_one(conn)
    .await
}

/// GET /api/owner/services
pub async fn list_services(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Vec<Service>> {
    let salon = owned_salon(&state, &headers).await?;
    let services = sqlx::query_as::<_, Service>(
        "SELECT id, salon_id, name, description, price, duration_min
         FROM services WHERE salon_id = ? ORDER BY name ASC",
    )
    .bind(salon.id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(ApiResponse::success(services)))
}

/// POST /api/owner/services
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateServiceRequest>,
) -> ApiResult<Service> {
    let salon = owned_salon(&state, &headers).await?;
    validate_service(&body.name, body.price, body.duration_min)?;

    let service = sqlx::query_as::<_, Service>(
        "INSERT INTO services (salon_id, name, description, price, duration_min)
         VALUES (?, ?, ?, ?, ?)
         RETURNING id, salon_id, name, description, price, duration_min",
    )
    .bind(salon.id)
    .bind(body.name.trim())
    .bind(body.description.trim())
    .bind(body.price)
    .bind(body.duration_min)
    .fetch_one(&state.db)
    .await
    .map_err(service_conflict)?;

    Ok(Json(ApiResponse::success(service)))
}

/// PUT /api/owner/services/{id}
pub async fn update_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<UpdateServiceRequest>,
) -> ApiResult<Service> {
    let salon = owned_salon(&state, &headers).await?;
    let current = owned_service(&state, salon.id, id).await?;

    let name = body.name.unwrap_or(current.name);
    let description = body.description.unwrap_or(current.description);
    let price = body.price.unwrap_or(current.price);
    let duration_min = body.duration_min.unwrap_or(current.duration_min);
    validate_service(&name, price, duration_min)?;

    let mut tx = db::begin_salon_write(&state.db, salon.id)
        .await?
        .ok_or(AppError::NotFound("Salon"))?;
    if duration_min != current.duration_min && service_in_use(&mut tx, id).await? {
        return Err(AppError::Conflict(
            "Duration cannot change while upcoming appointments use this service".into(),
        ));
    }

    let service = sqlx::query_as::<_, Service>(
        "UPDATE services SET name = ?, description = ?, price = ?, duration_min = ?
         WHERE id = ?
         RETURNING id, salon_id, name, description, price, duration_min",
    )
    .bind(name.trim())
    .bind(description.trim())
    .bind(price)
    .bind(duration_min)
    .bind(id)
    .fetch_one(&mut *tx)
    .await
    .map_err(service_conflict)?;
    tx.commit().await?;

    Ok(Json(ApiResponse::success(service)))
}

/// DELETE /api/owner/services/{id}
pub async fn delete_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<i64> {
    let salon = owned_salon(&state, &headers).await?;
    owned_service(&state, salon.id, id).await?;

    let mut tx = db::begin_salon_write(&state.db, salon.id)
        .await?
        .ok_or(AppError::NotFound("Salon"))?;
    if service_in_use(&mut tx, id).await? {
        return Err(AppError::Conflict(
            "This service has upcoming appointments".into(),
        ));
    }

    sqlx::query("DELETE FROM services WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(Json(ApiResponse::success(id)))
}

// ── Slots ──

/// GET /api/owner/slots?date=YYYY-MM-DD — the day's calendar.
pub async fn list_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<DateQuery>,
) -> ApiResult<Vec<SlotOverlay>> {
    let salon = owned_salon(&state, &headers).await?;
    let date = parse_date(&query.date)?;
    let view = queries::slot_status_overlay(&state.db, salon.id, date).await?;
    Ok(Json(ApiResponse::success(view)))
}

/// POST /api/owner/slots/{id}/block
pub async fn block_slot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Slot> {
    let salon = owned_salon(&state, &headers).await?;
    let slot = set_slot_blocked(&state.db, salon.id, id, true).await?;
    Ok(Json(ApiResponse::success(slot)))
}

/// POST /api/owner/slots/{id}/unblock
pub async fn unblock_slot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Slot> {
    let salon = owned_salon(&state, &headers).await?;
    let slot = set_slot_blocked(&state.db, salon.id, id, false).await?;
    Ok(Json(ApiResponse::success(slot)))
}

/// GET /api/owner/slots/{id}/appointment — appointment covering a slot, if any.
pub async fn slot_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Option<AppointmentDetail>> {
    let salon = owned_salon(&state, &headers).await?;
    let detail = queries::find_appointment_for_slot(&state.db, salon.id, id).await?;
    Ok(Json(ApiResponse::success(detail)))
}

/// POST /api/owner/slots/{id}/cancel — cancel whatever appointment covers the slot.
pub async fn cancel_slot_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    body: Option<Json<CancelRequest>>,
) -> ApiResult<WithWarning<Appointment>> {
    let salon = owned_salon(&state, &headers).await?;
    let detail = queries::find_appointment_for_slot(&state.db, salon.id, id)
        .await?
        .ok_or(AppError::NotFound("Appointment"))?;
    let appointment = load_appointment(&state.db, detail.id).await?;
    let reason = body.and_then(|Json(b)| b.reason);

    let (cancelled, warning) = cancel_and_notify(&state, &salon, &appointment, reason, true).await?;
    Ok(Json(ApiResponse::success(WithWarning {
        data: cancelled,
        warning,
    })))
}

// ── Appointments ──

/// GET /api/owner/appointments?date=YYYY-MM-DD — one day, or everything upcoming.
pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<OptionalDateQuery>,
) -> ApiResult<Vec<AppointmentDetail>> {
    let salon = owned_salon(&state, &headers).await?;

    let appointments = match query.date.as_deref() {
        Some(raw) => {
            let date = parse_date(raw)?;
            sqlx::query_as::<_, AppointmentDetail>(&format!(
                "{DETAIL_SELECT} WHERE a.salon_id = ? AND a.date = ? ORDER BY a.start_time ASC"
            ))
            .bind(salon.id)
            .bind(date)
            .fetch_all(&state.db)
            .await?
        }
        None => {
            sqlx::query_as::<_, AppointmentDetail>(&format!(
                "{DETAIL_SELECT} WHERE a.salon_id = ? AND a.date >= ?
                 ORDER BY a.date ASC, a.start_time ASC"
            ))
            .bind(salon.id)
            .bind(today())
            .fetch_all(&state.db)
            .await?
        }
    };

    Ok(Json(ApiResponse::success(appointments)))
}

/// PUT /api/owner/appointments/{id} — change status, slot, service or notes.
pub async fn update_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<UpdateAppointmentRequest>,
) -> ApiResult<WithWarning<Appointment>> {
    let salon = owned_salon(&state, &headers).await?;
    let current = load_appointment(&state.db, id).await?;
    if current.salon_id != salon.id {
        return Err(AppError::NotFound("Appointment"));
    }

    if body.status == Some(AppointmentStatus::Cancelled) && current.status.is_active() {
        let (cancelled, warning) =
            cancel_and_notify(&state, &salon, &current, body.cancellation_reason, true).await?;
        return Ok(Json(ApiResponse::success(WithWarning {
            data: cancelled,
            warning,
        })));
    }

    let mut draft = AppointmentDraft::from_existing(&current)
        .ok_or_else(|| AppError::Conflict("Appointment has no slot".into()))?;
    if let Some(status) = body.status {
        draft.status = status;
    }
    if let Some(slot_id) = body.slot_id {
        draft.slot_id = slot_id;
    }
    if body.service_id.is_some() {
        draft.service_id = body.service_id;
    }
    if let Some(notes) = body.notes {
        draft.notes = notes.trim().to_string();
    }
    if body.cancellation_reason.is_some() {
        draft.cancellation_reason = body.cancellation_reason;
    }

    let saved = save_appointment(&state.db, &draft).await?;
    Ok(Json(ApiResponse::success(WithWarning {
        data: saved,
        warning: None,
    })))
}
