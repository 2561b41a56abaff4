use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::domain::{
    Application, ApplicationForm, ApplicationStatus, ApplicationSubmission, Nickname, RequesterId,
};
use super::repository::{ApplicationStore, StoreError};
use crate::config::DatabaseConfig;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    discord_id INTEGER NOT NULL,
    minecraft_nickname TEXT NOT NULL UNIQUE,
    age TEXT,
    how_found TEXT,
    interests TEXT,
    about TEXT,
    status TEXT DEFAULT 'pending',
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    processed_at TIMESTAMP,
    processed_by TEXT
)";

const COLUMNS: &str = "id, discord_id, minecraft_nickname, age, how_found, interests, about, \
    status, created_at, processed_at, processed_by";

/// SQLite-backed application table, compatible with databases created by the original bot.
#[derive(Debug, Clone)]
pub struct SqliteApplicationStore {
    pub(super) pool: SqlitePool,
}

impl SqliteApplicationStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(unavailable)?
            .create_if_missing(true);

        // Every pooled connection to `:memory:` would see its own empty database.
        let pool_options = if is_memory_url(&config.url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|err| StoreError::Unavailable(err.to_string()))?;
                }
            }
            SqlitePoolOptions::new().max_connections(config.max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(unavailable)?;
        let store = Self { pool };
        store.init_schema().await?;

        info!(url = %config.url, "application store ready");
        Ok(store)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        })
        .await
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    /// Releases every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn unavailable(err: sqlx::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[derive(sqlx::FromRow)]
struct ApplicationRow {
    id: i64,
    discord_id: i64,
    minecraft_nickname: String,
    age: Option<String>,
    how_found: Option<String>,
    interests: Option<String>,
    about: Option<String>,
    status: Option<String>,
    created_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
    processed_by: Option<String>,
}

impl TryFrom<ApplicationRow> for Application {
    type Error = StoreError;

    fn try_from(row: ApplicationRow) -> Result<Self, Self::Error> {
        let status = match row.status.as_deref() {
            None => ApplicationStatus::Pending,
            Some(raw) => ApplicationStatus::from_label(raw).ok_or_else(|| {
                StoreError::Malformed(format!(
                    "unknown status '{raw}' for {}",
                    row.minecraft_nickname
                ))
            })?,
        };
        let created_at = row.created_at.ok_or_else(|| {
            StoreError::Malformed(format!("missing created_at for {}", row.minecraft_nickname))
        })?;

        Ok(Application {
            id: row.id,
            requester_id: RequesterId::from_column(row.discord_id),
            nickname: Nickname::from_stored(row.minecraft_nickname),
            form: ApplicationForm {
                age: row.age.unwrap_or_default(),
                how_found: row.how_found.unwrap_or_default(),
                interests: row.interests.unwrap_or_default(),
                about: row.about.unwrap_or_default(),
            },
            status,
            created_at,
            processed_at: row.processed_at,
            processed_by: row.processed_by,
        })
    }
}

#[async_trait]
impl ApplicationStore for SqliteApplicationStore {
    async fn insert(&self, submission: &ApplicationSubmission) -> Result<Application, StoreError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO users (discord_id, minecraft_nickname, age, how_found, interests, about, \
             status, created_at) VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(submission.requester_id.to_column())
        .bind(submission.nickname.as_str())
        .bind(&submission.form.age)
        .bind(&submission.form.how_found)
        .bind(&submission.form.interests)
        .bind(&submission.form.about)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateKey,
            other => unavailable(other),
        })?;

        Ok(Application {
            id: result.last_insert_rowid(),
            requester_id: submission.requester_id,
            nickname: submission.nickname.clone(),
            form: submission.form.clone(),
            status: ApplicationStatus::Pending,
            created_at,
            processed_at: None,
            processed_by: None,
        })
    }

    async fn exists(&self, nickname: &Nickname) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM users WHERE minecraft_nickname = ?")
            .bind(nickname.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(row.is_some())
    }

    async fn set_status(
        &self,
        nickname: &Nickname,
        status: ApplicationStatus,
        processed_by: &str,
    ) -> Result<Application, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidTransition(status));
        }

        let sql = format!(
            "UPDATE users SET status = ?, processed_at = ?, processed_by = ? \
             WHERE minecraft_nickname = ? AND COALESCE(status, 'pending') = 'pending' \
             RETURNING {COLUMNS}"
        );
        let updated = sqlx::query_as::<_, ApplicationRow>(&sql)
            .bind(status.label())
            .bind(Utc::now())
            .bind(processed_by)
            .bind(nickname.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        match updated {
            Some(row) => Application::try_from(row),
            None => match self.lookup(nickname).await? {
                Some(existing) => Err(StoreError::AlreadyProcessed(existing.status)),
                None => Err(StoreError::NotFound),
            },
        }
    }

    async fn lookup(&self, nickname: &Nickname) -> Result<Option<Application>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM users WHERE minecraft_nickname = ?");
        let row = sqlx::query_as::<_, ApplicationRow>(&sql)
            .bind(nickname.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        row.map(Application::try_from).transpose()
    }

    async fn delete(&self, nickname: &Nickname) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE minecraft_nickname = ?")
            .bind(nickname.as_str())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list(
        &self,
        status: Option<ApplicationStatus>,
        limit: usize,
    ) -> Result<Vec<Application>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM users WHERE COALESCE(status, 'pending') = ? \
                     ORDER BY id LIMIT ?"
                );
                sqlx::query_as::<_, ApplicationRow>(&sql)
                    .bind(status.label())
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!("SELECT {COLUMNS} FROM users ORDER BY id LIMIT ?");
                sqlx::query_as::<_, ApplicationRow>(&sql)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(unavailable)?;

        rows.into_iter().map(Application::try_from).collect()
    }
}
