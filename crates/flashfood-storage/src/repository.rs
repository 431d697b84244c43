//! Repository contracts consumed by the cleaning pipeline and the web layer.
//!
//! Catalog tables (masters, candidates, trends) are only reachable through a
//! [`CatalogTx`]; every multi-step mutation runs inside one. Dropping a
//! transaction without calling [`CatalogTx::commit`] rolls it back, so a
//! cancelled future never leaves a half-applied change behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flashfood_core::{
    BlockedProduct, CandidateItem, JobRunRecord, MasterProduct, NotificationConfig, PriceTrend,
    UserSettings,
};

use crate::StorageError;

#[async_trait]
pub trait MasterRepository: Send {
    async fn master_by_id(&mut self, id: &str) -> Result<Option<MasterProduct>, StorageError>;
    /// Masters of one region in insertion order.
    async fn masters_by_region(&mut self, region: &str) -> Result<Vec<MasterProduct>, StorageError>;
    async fn list_masters(&mut self) -> Result<Vec<MasterProduct>, StorageError>;
    async fn create_master(&mut self, master: &MasterProduct) -> Result<(), StorageError>;
    /// Persists price, status, trust score and update time.
    async fn update_master(&mut self, master: &MasterProduct) -> Result<(), StorageError>;
}

#[async_trait]
pub trait CandidateRepository: Send {
    async fn candidate_by_id(&mut self, id: i64) -> Result<Option<CandidateItem>, StorageError>;
    /// Candidates of one region in insertion order.
    async fn candidates_by_region(
        &mut self,
        region: &str,
    ) -> Result<Vec<CandidateItem>, StorageError>;
    async fn list_candidates(&mut self) -> Result<Vec<CandidateItem>, StorageError>;
    /// Inserts the candidate (its `id` is ignored) and returns the assigned id.
    async fn create_candidate(&mut self, candidate: &CandidateItem) -> Result<i64, StorageError>;
    async fn update_candidate(&mut self, candidate: &CandidateItem) -> Result<(), StorageError>;
    async fn delete_candidates(&mut self, ids: &[i64]) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait TrendRepository: Send {
    /// Inserts the day's sample; an existing row for the same (activity, day) is overwritten.
    async fn upsert_trend(&mut self, trend: &PriceTrend) -> Result<(), StorageError>;
    /// Samples for one product, oldest day first.
    async fn trends_for(&mut self, activity_id: &str) -> Result<Vec<PriceTrend>, StorageError>;
    async fn delete_trends_for(&mut self, activity_ids: &[String]) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait CatalogTx: MasterRepository + CandidateRepository + TrendRepository {
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn CatalogTx>, StorageError>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn notification(
        &self,
        activity_id: &str,
        user_id: &str,
    ) -> Result<Option<NotificationConfig>, StorageError>;
    async fn notifications_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<NotificationConfig>, StorageError>;
    async fn list_notifications(&self) -> Result<Vec<NotificationConfig>, StorageError>;
    /// Creates the subscription or changes its target; the last-notified stamp is kept.
    async fn upsert_notification(
        &self,
        activity_id: &str,
        user_id: &str,
        target_price: f64,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    async fn delete_notification(&self, activity_id: &str, user_id: &str)
        -> Result<bool, StorageError>;
    async fn mark_notified(
        &self,
        activity_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait BlockedRepository: Send + Sync {
    async fn is_blocked(&self, activity_id: &str, user_id: &str) -> Result<bool, StorageError>;
    async fn block(
        &self,
        activity_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    async fn unblock(&self, activity_id: &str, user_id: &str) -> Result<bool, StorageError>;
    async fn blocked_for_user(&self, user_id: &str) -> Result<Vec<BlockedProduct>, StorageError>;
}

#[async_trait]
pub trait UserSettingsRepository: Send + Sync {
    async fn user_settings(&self, user_id: &str) -> Result<Option<UserSettings>, StorageError>;
    async fn upsert_user_settings(&self, settings: &UserSettings) -> Result<(), StorageError>;
}

#[async_trait]
pub trait JobRunRepository: Send + Sync {
    async fn record_job_run(&self, record: &JobRunRecord) -> Result<(), StorageError>;
    async fn latest_job_run(&self, job_name: &str) -> Result<Option<JobRunRecord>, StorageError>;
}
