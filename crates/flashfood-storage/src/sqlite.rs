use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flashfood_core::{
    BlockedProduct, CandidateItem, JobRunRecord, JobStatus, MasterProduct, NotificationConfig,
    PriceTrend, SalesStatus, UserSettings,
};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite, Transaction};
use tracing::info;

use crate::repository::{
    BlockedRepository, CandidateRepository, CatalogStore, CatalogTx, JobRunRepository,
    MasterRepository, NotificationRepository, TrendRepository, UserSettingsRepository,
};
use crate::StorageError;

const MASTER_COLUMNS: &str =
    "id, region, platform, standard_title, price, status, trust_score, create_time, update_time";
const CANDIDATE_COLUMNS: &str = "id, group_key, region, title_votes, total_occurrences, \
     last_price, last_status, first_seen_time, last_seen_time";

/// SQLite-backed implementation of every repository contract.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `url` and applies pending migrations.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(url, "sqlite store ready");
        Ok(store)
    }

    /// Private in-memory database; a single pinned connection keeps it alive.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Catalog transaction; rolled back by sqlx when dropped uncommitted.
///
/// Opened with `BEGIN IMMEDIATE` so the write lock is taken up front.
/// Overlapping writers then queue on the busy timeout instead of failing
/// when a read lock would have to be upgraded.
pub struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn CatalogTx>, StorageError> {
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        Ok(Box::new(SqliteTx { tx }))
    }
}

#[async_trait]
impl CatalogTx for SqliteTx {
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn to_u32(value: i64, column: &str) -> Result<u32, StorageError> {
    u32::try_from(value).map_err(|_| StorageError::Corrupt(format!("{column} out of range: {value}")))
}

fn to_i64(value: u64, column: &str) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| StorageError::Corrupt(format!("{column} out of range: {value}")))
}

fn status_from(value: i64) -> Result<SalesStatus, StorageError> {
    SalesStatus::try_from(value).map_err(|err| StorageError::Corrupt(err.to_string()))
}

fn master_from_row(row: &SqliteRow) -> Result<MasterProduct, StorageError> {
    Ok(MasterProduct {
        id: row.try_get("id")?,
        region: row.try_get("region")?,
        platform: row.try_get("platform")?,
        standard_title: row.try_get("standard_title")?,
        price: row.try_get("price")?,
        status: status_from(row.try_get("status")?)?,
        trust_score: to_u32(row.try_get("trust_score")?, "trust_score")?,
        create_time: row.try_get("create_time")?,
        update_time: row.try_get("update_time")?,
    })
}

fn candidate_from_row(row: &SqliteRow) -> Result<CandidateItem, StorageError> {
    let votes: String = row.try_get("title_votes")?;
    Ok(CandidateItem {
        id: row.try_get("id")?,
        group_key: row.try_get("group_key")?,
        region: row.try_get("region")?,
        title_votes: serde_json::from_str(&votes)?,
        total_occurrences: to_u32(row.try_get("total_occurrences")?, "total_occurrences")?,
        last_price: row.try_get("last_price")?,
        last_status: status_from(row.try_get("last_status")?)?,
        first_seen_time: row.try_get("first_seen_time")?,
        last_seen_time: row.try_get("last_seen_time")?,
    })
}

fn trend_from_row(row: &SqliteRow) -> Result<PriceTrend, StorageError> {
    Ok(PriceTrend {
        activity_id: row.try_get("activity_id")?,
        price: row.try_get("price")?,
        record_date: row.try_get("record_date")?,
        create_time: row.try_get("create_time")?,
    })
}

fn notification_from_row(row: &SqliteRow) -> Result<NotificationConfig, StorageError> {
    Ok(NotificationConfig {
        activity_id: row.try_get("activity_id")?,
        user_id: row.try_get("user_id")?,
        target_price: row.try_get("target_price")?,
        last_notify_time: row.try_get("last_notify_time")?,
        create_time: row.try_get("create_time")?,
        update_time: row.try_get("update_time")?,
    })
}

fn job_run_from_row(row: &SqliteRow) -> Result<JobRunRecord, StorageError> {
    let status: String = row.try_get("status")?;
    let item_count: i64 = row.try_get("item_count")?;
    Ok(JobRunRecord {
        job_name: row.try_get("job_name")?,
        run_id: row.try_get("run_id")?,
        run_time: row.try_get("run_time")?,
        status: status.parse::<JobStatus>().map_err(StorageError::Corrupt)?,
        item_count: u64::try_from(item_count)
            .map_err(|_| StorageError::Corrupt(format!("item_count out of range: {item_count}")))?,
        error_message: row.try_get("error_message")?,
    })
}

#[async_trait]
impl MasterRepository for SqliteTx {
    async fn master_by_id(&mut self, id: &str) -> Result<Option<MasterProduct>, StorageError> {
        let sql = format!("SELECT {MASTER_COLUMNS} FROM master_products WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(master_from_row).transpose()
    }

    async fn masters_by_region(&mut self, region: &str) -> Result<Vec<MasterProduct>, StorageError> {
        let sql = format!(
            "SELECT {MASTER_COLUMNS} FROM master_products WHERE region = ? ORDER BY rowid"
        );
        let rows = sqlx::query(&sql)
            .bind(region)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(master_from_row).collect()
    }

    async fn list_masters(&mut self) -> Result<Vec<MasterProduct>, StorageError> {
        let sql = format!("SELECT {MASTER_COLUMNS} FROM master_products ORDER BY rowid");
        let rows = sqlx::query(&sql).fetch_all(&mut *self.tx).await?;
        rows.iter().map(master_from_row).collect()
    }

    async fn create_master(&mut self, master: &MasterProduct) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO master_products \
             (id, region, platform, standard_title, price, status, trust_score, create_time, update_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&master.id)
        .bind(&master.region)
        .bind(&master.platform)
        .bind(&master.standard_title)
        .bind(master.price)
        .bind(i64::from(master.status.code()))
        .bind(i64::from(master.trust_score))
        .bind(master.create_time)
        .bind(master.update_time)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_master(&mut self, master: &MasterProduct) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE master_products \
             SET price = ?, status = ?, trust_score = ?, update_time = ? \
             WHERE id = ?",
        )
        .bind(master.price)
        .bind(i64::from(master.status.code()))
        .bind(i64::from(master.trust_score))
        .bind(master.update_time)
        .bind(&master.id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CandidateRepository for SqliteTx {
    async fn candidate_by_id(&mut self, id: i64) -> Result<Option<CandidateItem>, StorageError> {
        let sql = format!("SELECT {CANDIDATE_COLUMNS} FROM candidate_items WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(candidate_from_row).transpose()
    }

    async fn candidates_by_region(
        &mut self,
        region: &str,
    ) -> Result<Vec<CandidateItem>, StorageError> {
        let sql =
            format!("SELECT {CANDIDATE_COLUMNS} FROM candidate_items WHERE region = ? ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(region)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(candidate_from_row).collect()
    }

    async fn list_candidates(&mut self) -> Result<Vec<CandidateItem>, StorageError> {
        let sql = format!("SELECT {CANDIDATE_COLUMNS} FROM candidate_items ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&mut *self.tx).await?;
        rows.iter().map(candidate_from_row).collect()
    }

    async fn create_candidate(&mut self, candidate: &CandidateItem) -> Result<i64, StorageError> {
        let votes = serde_json::to_string(&candidate.title_votes)?;
        let result = sqlx::query(
            "INSERT INTO candidate_items \
             (group_key, region, title_votes, total_occurrences, last_price, last_status, \
              first_seen_time, last_seen_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&candidate.group_key)
        .bind(&candidate.region)
        .bind(votes)
        .bind(i64::from(candidate.total_occurrences))
        .bind(candidate.last_price)
        .bind(i64::from(candidate.last_status.code()))
        .bind(candidate.first_seen_time)
        .bind(candidate.last_seen_time)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_candidate(&mut self, candidate: &CandidateItem) -> Result<(), StorageError> {
        let votes = serde_json::to_string(&candidate.title_votes)?;
        sqlx::query(
            "UPDATE candidate_items \
             SET title_votes = ?, total_occurrences = ?, last_price = ?, last_status = ?, \
                 last_seen_time = ? \
             WHERE id = ?",
        )
        .bind(votes)
        .bind(i64::from(candidate.total_occurrences))
        .bind(candidate.last_price)
        .bind(i64::from(candidate.last_status.code()))
        .bind(candidate.last_seen_time)
        .bind(candidate.id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_candidates(&mut self, ids: &[i64]) -> Result<u64, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM candidate_items WHERE id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        let result = qb.build().execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TrendRepository for SqliteTx {
    async fn upsert_trend(&mut self, trend: &PriceTrend) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO price_trends (activity_id, price, record_date, create_time) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (activity_id, record_date) DO UPDATE SET price = excluded.price",
        )
        .bind(&trend.activity_id)
        .bind(trend.price)
        .bind(trend.record_date)
        .bind(trend.create_time)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn trends_for(&mut self, activity_id: &str) -> Result<Vec<PriceTrend>, StorageError> {
        let rows = sqlx::query(
            "SELECT activity_id, price, record_date, create_time FROM price_trends \
             WHERE activity_id = ? ORDER BY record_date",
        )
        .bind(activity_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(trend_from_row).collect()
    }

    async fn delete_trends_for(&mut self, activity_ids: &[String]) -> Result<u64, StorageError> {
        if activity_ids.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM price_trends WHERE activity_id IN (");
        let mut separated = qb.separated(", ");
        for id in activity_ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(")");
        let result = qb.build().execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl NotificationRepository for SqliteStore {
    async fn notification(
        &self,
        activity_id: &str,
        user_id: &str,
    ) -> Result<Option<NotificationConfig>, StorageError> {
        let row = sqlx::query(
            "SELECT activity_id, user_id, target_price, last_notify_time, create_time, update_time \
             FROM notification_configs WHERE activity_id = ? AND user_id = ?",
        )
        .bind(activity_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(notification_from_row).transpose()
    }

    async fn notifications_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<NotificationConfig>, StorageError> {
        let rows = sqlx::query(
            "SELECT activity_id, user_id, target_price, last_notify_time, create_time, update_time \
             FROM notification_configs WHERE user_id = ? ORDER BY create_time, activity_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn list_notifications(&self) -> Result<Vec<NotificationConfig>, StorageError> {
        let rows = sqlx::query(
            "SELECT activity_id, user_id, target_price, last_notify_time, create_time, update_time \
             FROM notification_configs ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn upsert_notification(
        &self,
        activity_id: &str,
        user_id: &str,
        target_price: f64,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO notification_configs \
             (activity_id, user_id, target_price, last_notify_time, create_time, update_time) \
             VALUES (?, ?, ?, NULL, ?, ?) \
             ON CONFLICT (activity_id, user_id) DO UPDATE \
             SET target_price = excluded.target_price, update_time = excluded.update_time",
        )
        .bind(activity_id)
        .bind(user_id)
        .bind(target_price)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_notification(
        &self,
        activity_id: &str,
        user_id: &str,
    ) -> Result<bool, StorageError> {
        let result =
            sqlx::query("DELETE FROM notification_configs WHERE activity_id = ? AND user_id = ?")
                .bind(activity_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_notified(
        &self,
        activity_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE notification_configs SET last_notify_time = ?, update_time = ? \
             WHERE activity_id = ? AND user_id = ?",
        )
        .bind(at)
        .bind(at)
        .bind(activity_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BlockedRepository for SqliteStore {
    async fn is_blocked(&self, activity_id: &str, user_id: &str) -> Result<bool, StorageError> {
        let row = sqlx::query(
            "SELECT 1 FROM blocked_products WHERE activity_id = ? AND user_id = ?",
        )
        .bind(activity_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn block(
        &self,
        activity_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO blocked_products (activity_id, user_id, create_time) VALUES (?, ?, ?) \
             ON CONFLICT (activity_id, user_id) DO NOTHING",
        )
        .bind(activity_id)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unblock(&self, activity_id: &str, user_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM blocked_products WHERE activity_id = ? AND user_id = ?")
            .bind(activity_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn blocked_for_user(&self, user_id: &str) -> Result<Vec<BlockedProduct>, StorageError> {
        let rows = sqlx::query(
            "SELECT activity_id, user_id, create_time FROM blocked_products \
             WHERE user_id = ? ORDER BY create_time, activity_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<BlockedProduct, StorageError> {
                Ok(BlockedProduct {
                    activity_id: row.try_get("activity_id")?,
                    user_id: row.try_get("user_id")?,
                    create_time: row.try_get("create_time")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl UserSettingsRepository for SqliteStore {
    async fn user_settings(&self, user_id: &str) -> Result<Option<UserSettings>, StorageError> {
        let row = sqlx::query("SELECT user_id, bark_key, update_time FROM user_settings WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(UserSettings {
                user_id: row.try_get("user_id")?,
                bark_key: row.try_get("bark_key")?,
                update_time: row.try_get("update_time")?,
            })),
            None => Ok(None),
        }
    }

    async fn upsert_user_settings(&self, settings: &UserSettings) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO user_settings (user_id, bark_key, update_time) VALUES (?, ?, ?) \
             ON CONFLICT (user_id) DO UPDATE \
             SET bark_key = excluded.bark_key, update_time = excluded.update_time",
        )
        .bind(&settings.user_id)
        .bind(&settings.bark_key)
        .bind(settings.update_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobRunRepository for SqliteStore {
    async fn record_job_run(&self, record: &JobRunRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO job_runs (job_name, run_id, run_time, status, item_count, error_message) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.job_name)
        .bind(&record.run_id)
        .bind(record.run_time)
        .bind(record.status.as_str())
        .bind(to_i64(record.item_count, "item_count")?)
        .bind(record.error_message.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_job_run(&self, job_name: &str) -> Result<Option<JobRunRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT job_name, run_id, run_time, status, item_count, error_message FROM job_runs \
             WHERE job_name = ? ORDER BY run_time DESC, id DESC LIMIT 1",
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_run_from_row).transpose()
    }
}
