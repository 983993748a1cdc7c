use sqlx::{Sqlite, SqlitePool, Transaction};

/// Ordered migrations; each name is recorded in `_migrations` once applied.
const MIGRATIONS: &[(&str, &str)] = &[("001_init", include_str!("../migrations/001_init.sql"))];

pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    // Enable WAL mode for better concurrent access
    sqlx::query("PRAGMA journal_mode=WAL")
        .execute(pool)
        .await?;

    // Create migrations tracking table
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    for (name, sql) in MIGRATIONS {
        let applied: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?")
                .bind(name)
                .fetch_one(pool)
                .await?;
        if applied {
            continue;
        }

        let mut tx = pool.begin().await?;
        for statement in sql.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(&mut *tx).await?;
            }
        }
        sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!("Applied migration: {}", name);
    }

    tracing::info!("Database migrations up to date");
    Ok(())
}

/// Open a transaction that already holds the database write lock for `salon_id`.
///
/// The no-op UPDATE on the salon row is our SELECT ... FOR UPDATE: SQLite
/// takes its RESERVED lock on the first write, so every slot mutation for
/// the salon is serialized from the start of the transaction instead of
/// failing later on a lock upgrade. Returns `Ok(None)` if the salon is gone.
pub async fn begin_salon_write(
    pool: &SqlitePool,
    salon_id: i64,
) -> Result<Option<Transaction<'static, Sqlite>>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let touched = sqlx::query("UPDATE salons SET id = id WHERE id = ?")
        .bind(salon_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if touched == 0 {
        return Ok(None);
    }
    Ok(Some(tx))
}

/// Single-connection in-memory database with all migrations applied.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

/// File-backed database with several connections, for tests where writers
/// really contend for the salon lock. Keep the `TempDir` alive as long as the pool.
#[cfg(test)]
pub async fn shared_test_pool(connections: u32) -> (SqlitePool, tempfile::TempDir) {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    let dir = tempfile::tempdir().unwrap();
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("salon.db"))
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_secs(10));
    let pool = SqlitePoolOptions::new()
        .max_connections(connections)
        .connect_with(options)
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    (pool, dir)
}
