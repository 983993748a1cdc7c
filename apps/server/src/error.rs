use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ApiResponse;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed input or a missing required selection.
    #[error("{0}")]
    Validation(String),

    #[error("slot {slot_id} is blocked")]
    SlotBlocked { slot_id: i64 },

    #[error("slot {slot_id} is already taken")]
    SlotTaken { slot_id: i64 },

    /// Not enough contiguous slots exist or fit before closing time.
    #[error("not enough contiguous slots for the requested service")]
    InsufficientSlots,

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::SlotBlocked { .. } | AppError::SlotTaken { .. } => StatusCode::CONFLICT,
            AppError::InsufficientSlots => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show on the booking form.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg) | AppError::Conflict(msg) => msg.clone(),
            AppError::SlotBlocked { .. } => "The selected time is blocked by the salon.".into(),
            AppError::SlotTaken { .. } => "The selected time is already booked.".into(),
            AppError::InsufficientSlots => {
                "There are not enough free slots for the selected service.".into()
            }
            AppError::Unauthorized(msg) | AppError::Forbidden(msg) => (*msg).into(),
            AppError::NotFound(what) => format!("{what} not found"),
            AppError::Database(_) | AppError::Internal(_) => {
                "Something went wrong, please try again.".into()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(ApiResponse::<()>::error(self.user_message()))).into_response()
    }
}

/// Map a unique-index violation to `SlotTaken`; the active-anchor index is
/// the last line of defence against double booking.
pub fn unique_violation_as_taken(err: sqlx::Error, slot_id: i64) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::SlotTaken { slot_id },
        _ => AppError::Database(err),
    }
}
