use axum::http::{header, HeaderMap};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::{
    error::AppError,
    models::{Role, Salon, TelegramUser, UserProfile},
};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of initData before it's considered expired (24 hours).
const MAX_AUTH_AGE_SECS: i64 = 86400;

fn hmac_sha256(key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(data);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Validates Telegram Mini App initData and extracts user info.
/// See: https://core.telegram.org/bots/webapps#validating-data-received-via-the-mini-app
pub fn validate_init_data(init_data: &str, bot_token: &str) -> Option<TelegramUser> {
    let params: BTreeMap<String, String> = url::form_urlencoded::parse(init_data.as_bytes())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let hash = params.get("hash")?;

    // Verify auth_date is recent (prevent replay attacks)
    if let Some(auth_date) = params.get("auth_date").and_then(|d| d.parse::<i64>().ok()) {
        let age = chrono::Utc::now().timestamp() - auth_date;
        if age > MAX_AUTH_AGE_SECS {
            tracing::warn!(auth_date, age, "initData expired");
            return None;
        }
    }

    // Sorted key=value pairs, excluding hash
    let data_check_string: String = params
        .iter()
        .filter(|(k, _)| k.as_str() != "hash")
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    let secret_key = hmac_sha256(b"WebAppData", bot_token.as_bytes())?;
    let computed_hash = hex::encode(hmac_sha256(&secret_key, data_check_string.as_bytes())?);

    if computed_hash != *hash {
        tracing::warn!("initData hash mismatch");
        return None;
    }

    let user_json = params.get("user")?;
    serde_json::from_str::<TelegramUser>(user_json).ok()
}

/// Telegram user from the `Authorization: tma <initData>` header.
pub fn authenticate(headers: &HeaderMap, bot_token: &str) -> Result<TelegramUser, AppError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("tma "))
        .and_then(|init_data| validate_init_data(init_data, bot_token))
        .ok_or(AppError::Unauthorized("Unauthorized"))
}

pub async fn find_profile(pool: &SqlitePool, user_id: i64) -> Result<Option<UserProfile>, sqlx::Error> {
    sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Profile of a registered user; unregistered users must call /api/register first.
pub async fn require_profile(pool: &SqlitePool, user: &TelegramUser) -> Result<UserProfile, AppError> {
    find_profile(pool, user.id)
        .await?
        .ok_or(AppError::Forbidden("Complete registration first"))
}

/// The salon owned by `user`.
pub async fn require_owned_salon(pool: &SqlitePool, user: &TelegramUser) -> Result<Salon, AppError> {
    let profile = require_profile(pool, user).await?;
    if profile.role != Role::Owner {
        return Err(AppError::Forbidden("Only salon owners can do this"));
    }
    sqlx::query_as::<_, Salon>("SELECT * FROM salons WHERE owner_id = ?")
        .bind(user.id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Salon"))
}

pub fn is_admin(user: &TelegramUser, admin_tg_id: i64) -> bool {
    user.id == admin_tg_id
}

pub fn require_admin(user: &TelegramUser, admin_tg_id: i64) -> Result<(), AppError> {
    if is_admin(user, admin_tg_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Admin only"))
    }
}

/// Build a signed initData string the way Telegram does.
#[cfg(test)]
pub(crate) fn sign_init_data(user_json: &str, auth_date: i64, bot_token: &str) -> String {
    let params = BTreeMap::from([
        ("auth_date".to_string(), auth_date.to_string()),
        ("query_id".to_string(), "AAE1".to_string()),
        ("user".to_string(), user_json.to_string()),
    ]);
    let check: String = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n");
    let secret = hmac_sha256(b"WebAppData", bot_token.as_bytes()).unwrap();
    let hash = hex::encode(hmac_sha256(&secret, check.as_bytes()).unwrap());

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in &params {
        query.append_pair(k, v);
    }
    query.append_pair("hash", &hash);
    query.finish()
}

/// `Authorization` header value for a test user.
#[cfg(test)]
pub(crate) fn test_auth_header(user_id: i64, bot_token: &str) -> String {
    let user = format!(r#"{{"id":{user_id},"first_name":"User{user_id}","username":"u{user_id}"}}"#);
    format!("tma {}", sign_init_data(&user, chrono::Utc::now().timestamp(), bot_token))
}
