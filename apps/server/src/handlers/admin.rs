use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;

use super::{load_salon, today, ApiResult};
use crate::{
    auth,
    error::AppError,
    models::*,
    notifications::DomainEvent,
    slots::maintenance::extend_horizon,
    AppState,
};

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<TelegramUser, AppError> {
    let user = auth::authenticate(headers, &state.config.bot_token)?;
    auth::require_admin(&user, state.config.admin_tg_id)?;
    Ok(user)
}

/// GET /api/admin/salons/pending — salons waiting for approval.
pub async fn pending_salons(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Vec<Salon>> {
    require_admin(&state, &headers)?;

    let salons = sqlx::query_as::<_, Salon>(
        "SELECT * FROM salons WHERE is_approved = 0 ORDER BY created_at ASC",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(ApiResponse::success(salons)))
}

/// POST /api/admin/salons/{id}/approve — publish a salon and open its calendar.
pub async fn approve_salon(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<WithWarning<Salon>> {
    require_admin(&state, &headers)?;
    let salon = load_salon(&state.db, id).await?;
    if salon.is_approved {
        return Err(AppError::Conflict("Salon is already approved".into()));
    }

    let salon = sqlx::query_as::<_, Salon>("UPDATE salons SET is_approved = 1 WHERE id = ? RETURNING *")
        .bind(id)
        .fetch_one(&state.db)
        .await?;
    extend_horizon(&state.db, salon.id, today(), state.config.horizon_days).await?;
    tracing::info!(salon_id = salon.id, "salon approved");

    let event = DomainEvent::SalonApproved {
        salon_name: salon.name.clone(),
    };
    let warning = state.notifier.dispatch(salon.owner_id, &event).await;

    Ok(Json(ApiResponse::success(WithWarning { data: salon, warning })))
}
