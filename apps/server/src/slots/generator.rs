use chrono::NaiveDate;
use sqlx::{SqliteConnection, SqlitePool};

use super::{effective_interval, slot_grid, store, weekday_index, Interval};
use crate::{db, error::AppError, models::Slot};

/// Generate (or reuse) the slots of `salon_id` on `date`.
///
/// Idempotent: a second call returns the same slots with the same ids.
pub async fn generate_slots(
    pool: &SqlitePool,
    salon_id: i64,
    date: NaiveDate,
) -> Result<Vec<Slot>, AppError> {
    let mut tx = db::begin_salon_write(pool, salon_id)
        .await?
        .ok_or(AppError::NotFound("Salon"))?;
    let slots = generate_locked(&mut tx, salon_id, date).await?;
    tx.commit().await?;
    Ok(slots)
}

/// Generator body; the caller must hold the salon write lock.
///
/// Walks the working-hours grid, reusing slots that already start on a grid
/// point and creating the missing ones. A grid point that would overlap an
/// existing slot with a different start is left as is: gaps get filled,
/// nothing gets shrunk or replaced.
pub(crate) async fn generate_locked(
    conn: &mut SqliteConnection,
    salon_id: i64,
    date: NaiveDate,
) -> Result<Vec<Slot>, sqlx::Error> {
    let Some(salon) = store::salon_by_id(conn, salon_id).await? else {
        return Ok(Vec::new());
    };
    let hours = store::working_hours_for(conn, salon_id, weekday_index(date)).await?;
    let Some(hours) = hours.filter(|h| h.is_open) else {
        return Ok(Vec::new());
    };

    let interval = effective_interval(salon.slot_interval_minutes);
    let mut existing = store::slots_for_day(conn, salon_id, date).await?;
    let mut slots = Vec::new();
    let mut created = 0usize;

    for (start, end) in slot_grid(hours.open_time, hours.close_time, interval) {
        if let Some(slot) = existing.iter().find(|s| s.start_time == start) {
            slots.push(slot.clone());
            continue;
        }

        let candidate = Interval::new(start, end);
        if existing
            .iter()
            .any(|s| Interval::of_slot(s).overlaps(&candidate))
        {
            continue;
        }

        let slot = store::insert_slot_if_absent(conn, salon_id, date, start, end).await?;
        existing.push(slot.clone());
        slots.push(slot);
        created += 1;
    }

    if created > 0 {
        tracing::debug!(salon_id, %date, created, "generated slots");
    }
    Ok(slots)
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::NaiveDate;
    use sqlx::SqlitePool;

    use crate::models::{Salon, Service};
    use crate::slots::hm;

    /// 2026-03-02, a Monday.
    pub fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    /// Salon with the given interval, open Mon–Fri 09:00–17:00.
    pub async fn seed_salon(pool: &SqlitePool, interval: i64) -> Salon {
        sqlx::query("INSERT INTO user_profiles (user_id, role, first_name) VALUES (1, 'owner', 'Owner')")
            .execute(pool)
            .await
            .unwrap();
        let salon = sqlx::query_as::<_, Salon>(
            "INSERT INTO salons (owner_id, name, address, slot_interval_minutes, is_approved)
             VALUES (1, 'Studio', 'Main St 1', ?, 1) RETURNING *",
        )
        .bind(interval)
        .fetch_one(pool)
        .await
        .unwrap();
        for weekday in 0..7i64 {
            sqlx::query(
                "INSERT INTO working_hours (salon_id, weekday, is_open, open_time, close_time)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(salon.id)
            .bind(weekday)
            .bind(weekday < 5)
            .bind(hm("09:00"))
            .bind(hm("17:00"))
            .execute(pool)
            .await
            .unwrap();
        }
        salon
    }

    pub async fn seed_service(pool: &SqlitePool, salon_id: i64, name: &str, minutes: i64) -> Service {
        sqlx::query_as::<_, Service>(
            "INSERT INTO services (salon_id, name, price, duration_min) VALUES (?, ?, 1000, ?)
             RETURNING id, salon_id, name, description, price, duration_min",
        )
        .bind(salon_id)
        .bind(name)
        .bind(minutes)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    pub async fn seed_customer(pool: &SqlitePool, user_id: i64) {
        sqlx::query("INSERT INTO user_profiles (user_id, role, first_name) VALUES (?, 'customer', 'Client')")
            .bind(user_id)
            .execute(pool)
            .await
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::models::SlotStatus;
    use crate::slots::hm;

    #[tokio::test]
    async fn test_generates_full_day() {
        let pool = db::test_pool().await;
        let salon = seed_salon(&pool, 30).await;

        let slots = generate_slots(&pool, salon.id, monday()).await.unwrap();
        assert_eq!(slots.len(), 16);
        assert_eq!(slots[0].start_time, hm("09:00"));
        assert_eq!(slots[15].end_time, hm("17:00"));
        assert!(slots.iter().all(|s| s.status == SlotStatus::Available));
    }

    #[tokio::test]
    async fn test_generation_is_idempotent() {
        let pool = db::test_pool().await;
        let salon = seed_salon(&pool, 15).await;

        let first = generate_slots(&pool, salon.id, monday()).await.unwrap();
        let second = generate_slots(&pool, salon.id, monday()).await.unwrap();
        assert_eq!(first, second);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM slots")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 32);
    }

    #[tokio::test]
    async fn test_closed_day_is_empty() {
        let pool = db::test_pool().await;
        let salon = seed_salon(&pool, 30).await;
        let saturday = monday() + chrono::Duration::days(5);

        assert!(generate_slots(&pool, salon.id, saturday).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keeps_busy_and_blocked_slots() {
        let pool = db::test_pool().await;
        let salon = seed_salon(&pool, 30).await;
        let slots = generate_slots(&pool, salon.id, monday()).await.unwrap();

        sqlx::query("UPDATE slots SET status = 'blocked' WHERE id = ?")
            .bind(slots[2].id)
            .execute(&pool)
            .await
            .unwrap();

        let again = generate_slots(&pool, salon.id, monday()).await.unwrap();
        assert_eq!(again.len(), 16);
        assert_eq!(again[2].status, SlotStatus::Blocked);
        assert_eq!(again[2].id, slots[2].id);
    }

    #[tokio::test]
    async fn test_fills_gaps_without_overlapping() {
        let pool = db::test_pool().await;
        let salon = seed_salon(&pool, 30).await;

        // An hour-wide busy slot left over from an earlier interval.
        sqlx::query(
            "INSERT INTO slots (salon_id, date, start_time, end_time, status)
             VALUES (?, ?, ?, ?, 'busy')",
        )
        .bind(salon.id)
        .bind(monday())
        .bind(hm("10:00"))
        .bind(hm("11:00"))
        .execute(&pool)
        .await
        .unwrap();

        let slots = generate_slots(&pool, salon.id, monday()).await.unwrap();
        // 16 grid points, 10:30 is swallowed by the 10:00-11:00 slot.
        assert_eq!(slots.len(), 15);
        assert!(slots.iter().all(|s| s.start_time != hm("10:30")));
        let wide = slots.iter().find(|s| s.start_time == hm("10:00")).unwrap();
        assert_eq!(wide.end_time, hm("11:00"));
    }

    #[tokio::test]
    async fn test_unknown_salon() {
        let pool = db::test_pool().await;
        assert!(matches!(
            generate_slots(&pool, 99, monday()).await,
            Err(AppError::NotFound(_))
        ));
    }
}
