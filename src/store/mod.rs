//! Account Store — the durable table of accounts and their lease state.
//!
//! Every query is parameterized; `device` and `username` values from the
//! HTTP layer are always bound, never interpolated into SQL text.

use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use std::{path::Path, str::FromStr};

use crate::errors::Result;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub username: String,
    pub password: String,
    pub level: i64,
    pub in_use_by: Option<String>,
    pub last_use: Option<i64>,
    pub last_returned: Option<i64>,
    pub last_burned: Option<i64>,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))
            .map_err(sqlx::Error::from)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        for stmt in include_str!("migrations.sql").split(';') {
            let stmt = stmt.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(pool).await?;
            }
        }
        Ok(())
    }

    /// For tests: an isolated in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:").map_err(sqlx::Error::from)?;
        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    // ─── Importer ───────────────────────────────────────────────────────────

    pub async fn upsert_many(&self, pairs: &[(String, String)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (username, password) in pairs {
            sqlx::query(
                "INSERT INTO accounts (username, password) VALUES (?, ?)
                 ON CONFLICT(username) DO UPDATE SET password = excluded.password",
            )
            .bind(username)
            .bind(password)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ─── Scheduler reads ────────────────────────────────────────────────────

    /// Leasable row ordered by `last_use` ascending (absent = oldest),
    /// tie-broken on `username` ascending. `cooldown_cutoff` is
    /// `now - cooldown_seconds`.
    pub async fn pick_free(&self, min_level: i64, cooldown_cutoff: i64) -> Result<Option<AccountRow>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM accounts
             WHERE in_use_by IS NULL
               AND level >= ?1
               AND max(coalesce(last_returned, 0), coalesce(last_burned, 0)) < ?2
             ORDER BY coalesce(last_use, 0) ASC, username ASC
             LIMIT 1",
        )
        .bind(min_level)
        .bind(cooldown_cutoff)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<AccountRow>> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn current_for(&self, device: &str) -> Result<Option<AccountRow>> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE in_use_by = ?")
            .bind(device)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Max `last_use` over rows held by `device` or whose username is in
    /// `extra_usernames`; 0 if none match.
    pub async fn latest_use_in(&self, device: &str, extra_usernames: &[String]) -> Result<i64> {
        let placeholders = std::iter::repeat("?")
            .take(extra_usernames.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = if extra_usernames.is_empty() {
            "SELECT max(coalesce(last_use, 0)) FROM accounts WHERE in_use_by = ?".to_string()
        } else {
            format!(
                "SELECT max(coalesce(last_use, 0)) FROM accounts WHERE in_use_by = ? OR username IN ({placeholders})"
            )
        };
        let mut query = sqlx::query(&sql).bind(device);
        for username in extra_usernames {
            query = query.bind(username);
        }
        let row = query.fetch_one(&self.pool).await?;
        let latest: Option<i64> = row.try_get(0)?;
        Ok(latest.unwrap_or(0))
    }

    // ─── Scheduler writes ───────────────────────────────────────────────────

    pub async fn release_all_for(&self, device: &str, now: i64) -> Result<()> {
        sqlx::query(
            "UPDATE accounts SET in_use_by = NULL, last_returned = ? WHERE in_use_by = ?",
        )
        .bind(now)
        .bind(device)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn assign(&self, username: &str, device: &str, now: i64, stamp_last_use: bool) -> Result<()> {
        if stamp_last_use {
            sqlx::query("UPDATE accounts SET in_use_by = ?, last_use = ? WHERE username = ?")
                .bind(device)
                .bind(now)
                .bind(username)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("UPDATE accounts SET in_use_by = ? WHERE username = ?")
                .bind(device)
                .bind(username)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn set_level(&self, username: &str, level: i64) -> Result<()> {
        sqlx::query("UPDATE accounts SET level = ? WHERE username = ?")
            .bind(level)
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_burned(&self, username: &str, ts: i64) -> Result<()> {
        sqlx::query("UPDATE accounts SET last_burned = ? WHERE username = ?")
            .bind(ts)
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Stats ──────────────────────────────────────────────────────────────

    pub async fn count_cooldown(&self, cutoff: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT count(*) FROM accounts WHERE max(coalesce(last_returned, 0), coalesce(last_burned, 0)) >= ?",
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get(0)?)
    }

    pub async fn count_in_use(&self) -> Result<i64> {
        let row = sqlx::query("SELECT count(*) FROM accounts WHERE in_use_by IS NOT NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get(0)?)
    }

    pub async fn count_all(&self) -> Result<i64> {
        let row = sqlx::query("SELECT count(*) FROM accounts")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get(0)?)
    }

    // ─── Reclaimer ──────────────────────────────────────────────────────────

    /// Clears `in_use_by` and sets `last_returned := now` for every row held
    /// with `last_returned` absent or older than `older_than_ts`. Returns the
    /// released rows (pre-update snapshot) for logging.
    pub async fn force_release(&self, older_than_ts: i64, now: i64) -> Result<Vec<AccountRow>> {
        let mut tx = self.pool.begin().await?;
        let stale = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM accounts
             WHERE in_use_by IS NOT NULL
               AND (last_returned IS NULL OR last_returned < ?)",
        )
        .bind(older_than_ts)
        .fetch_all(&mut *tx)
        .await?;

        if !stale.is_empty() {
            sqlx::query(
                "UPDATE accounts SET in_use_by = NULL, last_returned = ?
                 WHERE in_use_by IS NOT NULL AND (last_returned IS NULL OR last_returned < ?)",
            )
            .bind(now)
            .bind(older_than_ts)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(stale)
    }
}
