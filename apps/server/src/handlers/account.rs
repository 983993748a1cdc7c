use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;

use super::ApiResult;
use crate::{auth, error::AppError, models::*, AppState};

/// POST /api/register — create the caller's profile as owner or customer.
///
/// Repeating the call with the same role returns the existing profile.
pub async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<UserProfile> {
    let user = auth::authenticate(&headers, &state.config.bot_token)?;

    if let Some(existing) = auth::find_profile(&state.db, user.id).await? {
        if existing.role != body.role {
            return Err(AppError::Conflict(
                "This account is already registered with another role".into(),
            ));
        }
        return Ok(Json(ApiResponse::success(existing)));
    }

    let profile = sqlx::query_as::<_, UserProfile>(
        "INSERT INTO user_profiles (user_id, role, first_name, username, phone)
         VALUES (?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(user.id)
    .bind(body.role)
    .bind(&user.first_name)
    .bind(&user.username)
    .bind(body.phone.trim())
    .fetch_one(&state.db)
    .await?;

    tracing::info!(user_id = user.id, role = ?profile.role, "user registered");
    Ok(Json(ApiResponse::success(profile)))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::handlers::test_app::*;

    #[tokio::test]
    async fn test_register_is_idempotent_per_role() {
        let app = app(state().await);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/register",
            Some(10),
            Some(json!({"role": "customer", "phone": " +381 60 123 "})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["role"], "customer");
        assert_eq!(body["data"]["phone"], "+381 60 123");
        assert_eq!(body["data"]["first_name"], "User10");

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/register",
            Some(10),
            Some(json!({"role": "customer"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/register",
            Some(10),
            Some(json!({"role": "owner"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_register_requires_auth() {
        let app = app(state().await);
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/register",
            None,
            Some(json!({"role": "customer"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
