use chrono::{Duration, NaiveDate};
use serde::Serialize;
use sqlx::SqlitePool;

use super::{generator, store, weekday_index, ALLOWED_INTERVALS};
use crate::{db, error::AppError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegenerationReport {
    pub regenerated_days: u32,
    pub skipped_days: u32,
}

/// Dates `from ..= from + days`.
fn horizon_dates(from: NaiveDate, days: i64) -> impl Iterator<Item = NaiveDate> {
    (0..=days.max(0)).map(move |offset| from + Duration::days(offset))
}

/// Generate slots for every date of the horizon, one transaction per date.
pub async fn extend_horizon(
    pool: &SqlitePool,
    salon_id: i64,
    from: NaiveDate,
    days: i64,
) -> Result<(), AppError> {
    for date in horizon_dates(from, days) {
        generator::generate_slots(pool, salon_id, date).await?;
    }
    Ok(())
}

/// Rebuild the free slots of every upcoming `weekday` after its hours changed.
///
/// Only available, unattributed slots are deleted; busy and blocked ones
/// stay and the generator fills around them.
pub async fn regenerate_weekday(
    pool: &SqlitePool,
    salon_id: i64,
    weekday: i64,
    today: NaiveDate,
    horizon: i64,
) -> Result<u32, AppError> {
    let mut days = 0;
    for date in horizon_dates(today, horizon).filter(|d| weekday_index(*d) == weekday) {
        let mut tx = db::begin_salon_write(pool, salon_id)
            .await?
            .ok_or(AppError::NotFound("Salon"))?;
        let removed = store::delete_free_slots(&mut tx, salon_id, date).await?;
        let slots = generator::generate_locked(&mut tx, salon_id, date).await?;
        tx.commit().await?;

        tracing::debug!(salon_id, %date, removed, kept_or_created = slots.len(), "regenerated day");
        days += 1;
    }
    Ok(days)
}

/// Switch a salon to a new slot interval and rebuild the days that allow it.
///
/// A day with any busy, blocked or attributed slot keeps its old grid and
/// is counted as skipped.
pub async fn change_slot_interval(
    pool: &SqlitePool,
    salon_id: i64,
    interval: i64,
    today: NaiveDate,
    horizon: i64,
) -> Result<RegenerationReport, AppError> {
    if !ALLOWED_INTERVALS.contains(&interval) {
        return Err(AppError::validation("Slot interval must be 15, 30 or 60 minutes"));
    }

    let mut tx = db::begin_salon_write(pool, salon_id)
        .await?
        .ok_or(AppError::NotFound("Salon"))?;
    sqlx::query("UPDATE salons SET slot_interval_minutes = ? WHERE id = ?")
        .bind(interval)
        .bind(salon_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let mut report = RegenerationReport::default();
    for date in horizon_dates(today, horizon) {
        let mut tx = db::begin_salon_write(pool, salon_id)
            .await?
            .ok_or(AppError::NotFound("Salon"))?;
        if store::day_has_commitments(&mut tx, salon_id, date).await? {
            report.skipped_days += 1;
            continue;
        }
        store::delete_free_slots(&mut tx, salon_id, date).await?;
        generator::generate_locked(&mut tx, salon_id, date).await?;
        tx.commit().await?;
        report.regenerated_days += 1;
    }

    tracing::info!(
        salon_id,
        interval,
        regenerated = report.regenerated_days,
        skipped = report.skipped_days,
        "slot interval changed"
    );
    Ok(report)
}

/// Extend the horizon of every approved, active salon. A failing salon is
/// logged and does not stop the others. Returns how many salons succeeded.
pub async fn extend_all_salons(
    pool: &SqlitePool,
    today: NaiveDate,
    days: i64,
) -> Result<usize, AppError> {
    let salon_ids: Vec<i64> =
        sqlx::query_scalar("SELECT id FROM salons WHERE is_approved = 1 AND is_active = 1")
            .fetch_all(pool)
            .await?;

    let mut extended = 0;
    for salon_id in salon_ids {
        match extend_horizon(pool, salon_id, today, days).await {
            Ok(()) => extended += 1,
            Err(e) => tracing::warn!(salon_id, error = %e, "horizon extension failed"),
        }
    }
    Ok(extended)
}
