use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};

use crate::snapshot::{HistorySnapshot, SnapshotStore, SNAPSHOT_VERSION};

#[derive(Clone)]
pub struct SqliteSnapshotStore {
    pool: Pool<Sqlite>,
}

impl SqliteSnapshotStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        create_database_dir(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid sqlite url '{database_url}'"))?
            .create_if_missing(true);
        // One connection keeps `sqlite::memory:` pointing at a single database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open history database '{database_url}'"))?;

        let store = Self { pool };
        store.ensure_snapshot_table().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn ensure_snapshot_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_history_snapshot (
                slot           INTEGER PRIMARY KEY CHECK (slot = 1),
                schema_version INTEGER NOT NULL,
                body           TEXT NOT NULL,
                updated_at     TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create chat_history_snapshot table")?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn load(&self) -> Result<Option<HistorySnapshot>> {
        let Some(row) =
            sqlx::query("SELECT schema_version, body FROM chat_history_snapshot WHERE slot = 1")
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let schema_version: i64 = row.try_get("schema_version")?;
        if schema_version > i64::from(SNAPSHOT_VERSION) {
            return Err(anyhow!(
                "snapshot schema version {schema_version} is newer than supported {SNAPSHOT_VERSION}"
            ));
        }
        let body: String = row.try_get("body")?;
        let snapshot = serde_json::from_str(&body).context("failed to decode history snapshot")?;
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &HistorySnapshot) -> Result<()> {
        let body = serde_json::to_string(snapshot).context("failed to encode history snapshot")?;
        sqlx::query(
            "INSERT INTO chat_history_snapshot (slot, schema_version, body, updated_at) VALUES (1, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(slot) DO UPDATE SET schema_version = excluded.schema_version, body = excluded.body, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(i64::from(snapshot.version))
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

const MEMORY_URL: &str = "sqlite::memory:";

/// Turns a bare path or `sqlite:path` into a `sqlite://` url and creates the
/// directory a file-backed database lives in.
pub fn prepare_database_url(raw_database_url: &str) -> Result<String> {
    let database_url = to_sqlite_url(raw_database_url);
    create_database_dir(&database_url)?;
    Ok(database_url)
}

fn to_sqlite_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with(MEMORY_URL) || raw.contains("://") {
        return raw.to_string();
    }
    let path = raw.strip_prefix("sqlite:").unwrap_or(raw);
    format!("sqlite://{}", path.replace('\\', "/"))
}

fn database_file(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with(MEMORY_URL) {
        return None;
    }
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = rest.split_once('?').map_or(rest, |(path, _)| path);
    (!path.is_empty()).then(|| PathBuf::from(path))
}

fn create_database_dir(database_url: &str) -> Result<()> {
    let dir = database_file(database_url)
        .and_then(|file| file.parent().map(Path::to_path_buf))
        .filter(|dir| !dir.as_os_str().is_empty());
    let Some(dir) = dir else {
        return Ok(());
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("cannot create '{}' for history database", dir.display()))
}

#[cfg(test)]
#[path = "tests/sqlite_tests.rs"]
mod tests;
