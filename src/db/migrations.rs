use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await
        .context("Failed to clear schema version")?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await
        .context("Failed to set schema version")?;

    Ok(())
}

/// v1: timelines and posts tables with the raw payload BLOB.
async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS timelines (
            key TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            kind TEXT NOT NULL,
            first_scraped_at TEXT NOT NULL,
            last_scraped_at TEXT NOT NULL,
            newest_post_id TEXT,
            oldest_post_id TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create timelines table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS posts (
            id TEXT PRIMARY KEY,
            timeline_key TEXT NOT NULL,
            created_at TEXT NOT NULL,
            author_id TEXT NOT NULL,
            author_handle TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            in_reply_to_id TEXT,
            is_retweet INTEGER NOT NULL DEFAULT 0,
            is_quote INTEGER NOT NULL DEFAULT 0,
            has_media INTEGER NOT NULL DEFAULT 0,
            text TEXT NOT NULL,
            raw BLOB NOT NULL,
            stored_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create posts table")?;

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_posts_timeline_key ON posts(timeline_key)",
        "CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_posts_author_id ON posts(author_id)",
        "CREATE INDEX IF NOT EXISTS idx_posts_conversation_id ON posts(conversation_id)",
    ] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to create posts index")?;
    }

    Ok(())
}

/// v2: thread reconstruction support.
async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    sqlx::query("ALTER TABLE posts ADD COLUMN is_self_thread INTEGER NOT NULL DEFAULT 0")
        .execute(pool)
        .await
        .context("Failed to add is_self_thread column")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_in_reply_to_id ON posts(in_reply_to_id)")
        .execute(pool)
        .await
        .context("Failed to create in_reply_to_id index")?;

    Ok(())
}
