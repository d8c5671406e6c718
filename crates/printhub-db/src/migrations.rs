//! # Schema Migrations
//!
//! SQL files under `migrations/sqlite/` are compiled into the binary and
//! applied in sequence order when the job store opens. sqlx records each
//! applied file in `_sqlx_migrations` and refuses to start if an applied
//! file was edited afterwards.
//!
//! ```text
//! open job store ──► pending migrations ──► recover_interrupted ──► dispatch
//! ```
//!
//! Schema changes go into a new `NNN_description.sql`; shipped files are
//! never edited.

use sqlx::migrate::Migrator;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies every embedded migration the store has not seen yet.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    let embedded = MIGRATOR.iter().count();
    debug!(embedded, "Applying job store migrations");

    MIGRATOR.run(pool).await?;

    info!(embedded, "Job store schema is current");
    Ok(())
}

/// `(embedded, applied)` migration counts.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let embedded = MIGRATOR.iter().count();
    let applied: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?;

    Ok((embedded, usize::try_from(applied).unwrap_or(0)))
}
