mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod models;
mod notifications;
mod rate_limit;
mod slots;

use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use anyhow::Context;
use config::Config;
use notifications::Notifier;
use rate_limit::{rate_limit, RateLimiter, Tier};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub notifier: Notifier,
    pub started_at: Instant,
}

/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;
/// How long a writer waits for the salon lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

fn cors_layer(webapp_url: Option<&str>) -> CorsLayer {
    let origin = webapp_url.and_then(|url| match url.parse::<HeaderValue>() {
        Ok(origin) => Some(origin),
        Err(e) => {
            tracing::warn!(url, error = %e, "WEBAPP_URL is not a valid origin, allowing any");
            None
        }
    });

    match origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::list([
                origin,
                HeaderValue::from_static("http://localhost:5173"), // Vite dev server
            ]))
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    }
}

/// All API routes, grouped by rate-limit tier.
pub fn build_router(state: Arc<AppState>, rate_limiter: RateLimiter) -> Router {
    let no_limit_routes = Router::new().route("/api/health", get(handlers::health::health));

    let public_routes = Router::new()
        .route("/api/salons", get(handlers::customer::list_salons))
        .route("/api/salons/{id}", get(handlers::customer::get_salon))
        .route("/api/salons/{id}/slots", get(handlers::customer::salon_slots))
        .layer(from_fn_with_state(
            (rate_limiter.clone(), Tier::Public),
            rate_limit,
        ));

    let booking_routes = Router::new()
        .route("/api/appointments", post(handlers::customer::create_appointment))
        .layer(from_fn_with_state(
            (rate_limiter.clone(), Tier::Booking),
            rate_limit,
        ));

    let auth_routes = Router::new()
        .route("/api/register", post(handlers::account::register))
        .route("/api/appointments/my", get(handlers::customer::my_appointments))
        .route(
            "/api/appointments/{id}/cancel",
            post(handlers::customer::cancel_appointment),
        )
        .layer(from_fn_with_state(
            (rate_limiter.clone(), Tier::Auth),
            rate_limit,
        ));

    let owner_routes = Router::new()
        .route(
            "/api/owner/salon",
            post(handlers::owner::create_salon).get(handlers::owner::get_salon),
        )
        .route("/api/owner/salon/interval", put(handlers::owner::update_interval))
        .route(
            "/api/owner/salon/hours",
            get(handlers::owner::get_hours).put(handlers::owner::update_hours),
        )
        .route(
            "/api/owner/services",
            get(handlers::owner::list_services).post(handlers::owner::create_service),
        )
        .route(
            "/api/owner/services/{id}",
            put(handlers::owner::update_service).delete(handlers::owner::delete_service),
        )
        .route("/api/owner/slots", get(handlers::owner::list_slots))
        .route("/api/owner/slots/{id}/block", post(handlers::owner::block_slot))
        .route("/api/owner/slots/{id}/unblock", post(handlers::owner::unblock_slot))
        .route(
            "/api/owner/slots/{id}/appointment",
            get(handlers::owner::slot_appointment),
        )
        .route(
            "/api/owner/slots/{id}/cancel",
            post(handlers::owner::cancel_slot_appointment),
        )
        .route("/api/owner/appointments", get(handlers::owner::list_appointments))
        .route(
            "/api/owner/appointments/{id}",
            put(handlers::owner::update_appointment),
        )
        .layer(from_fn_with_state(
            (rate_limiter.clone(), Tier::Owner),
            rate_limit,
        ));

    let admin_routes = Router::new()
        .route("/api/admin/salons/pending", get(handlers::admin::pending_salons))
        .route(
            "/api/admin/salons/{id}/approve",
            post(handlers::admin::approve_salon),
        )
        .layer(from_fn_with_state(
            (rate_limiter.clone(), Tier::Admin),
            rate_limit,
        ));

    let cors = cors_layer(state.config.webapp_url.as_deref());

    Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .merge(auth_routes)
        .merge(owner_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    // ── Database ──
    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .with_context(|| format!("invalid DATABASE_URL {}", config.database_url))?
        .busy_timeout(BUSY_TIMEOUT);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await
        .context("failed to open database")?;

    db::run_migrations(&pool).await?;

    let state = Arc::new(AppState {
        db: pool,
        notifier: Notifier::new(&config.bot_token),
        config,
        started_at: Instant::now(),
    });

    // ── Background task: keep the slot horizon generated ──
    let horizon_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(
            horizon_state.config.maintenance_interval_secs,
        ));
        loop {
            interval.tick().await;
            let today = handlers::today();
            match slots::maintenance::extend_all_salons(
                &horizon_state.db,
                today,
                horizon_state.config.horizon_days,
            )
            .await
            {
                Ok(salons) => tracing::info!(salons, %today, "slot horizon extended"),
                Err(e) => tracing::error!(error = %e, "slot horizon maintenance failed"),
            }
        }
    });

    // ── Rate limiter ──
    let rate_limiter = RateLimiter::with_defaults();

    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let app = build_router(state, rate_limiter);

    tracing::info!("Salon booking server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use super::*;
    use crate::handlers::test_app::{call, state};

    #[tokio::test]
    async fn test_booking_tier_is_rate_limited() {
        let limiter = RateLimiter::new();
        limiter.add_tier(
            Tier::Booking,
            rate_limit::RateLimitConfig {
                max_requests: 1,
                window: Duration::from_secs(60),
            },
        );
        let app = build_router(state().await, limiter);

        let (first, _) = call(&app, Method::POST, "/api/appointments", None, None).await;
        assert_ne!(first, StatusCode::TOO_MANY_REQUESTS);
        let (second, body) = call(&app, Method::POST, "/api/appointments", None, None).await;
        assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["ok"], false);

        // Other groups keep their own budget.
        let (health, _) = call(&app, Method::GET, "/api/health", None, None).await;
        assert_eq!(health, StatusCode::OK);
    }

    #[test]
    fn test_cors_accepts_any_origin_setting() {
        let _ = cors_layer(Some("https://salons.example"));
        let _ = cors_layer(Some("bad\norigin"));
        let _ = cors_layer(None);
    }
}
