//! Core domain model for flashfood: candidate pool, master catalog, trends and subscriptions.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "flashfood-core";

/// A job run older than this is reported as unhealthy.
pub const JOB_HEALTH_WINDOW_MINUTES: i64 = 30;

/// Binary sale state reported by upstream platforms (`0` sold, `1` on sale).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum SalesStatus {
    #[default]
    Sold,
    OnSale,
}

impl SalesStatus {
    pub fn code(self) -> u8 {
        match self {
            SalesStatus::Sold => 0,
            SalesStatus::OnSale => 1,
        }
    }
}

impl From<SalesStatus> for u8 {
    fn from(status: SalesStatus) -> Self {
        status.code()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown sales status {0}; expected 0 or 1")]
pub struct UnknownSalesStatus(pub i64);

impl TryFrom<u8> for SalesStatus {
    type Error = UnknownSalesStatus;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::try_from(i64::from(value))
    }
}

impl TryFrom<i64> for SalesStatus {
    type Error = UnknownSalesStatus;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SalesStatus::Sold),
            1 => Ok(SalesStatus::OnSale),
            other => Err(UnknownSalesStatus(other)),
        }
    }
}

/// Observation pushed by an upstream platform, before any matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingItem {
    pub title: String,
    pub price: f64,
    pub status: SalesStatus,
    #[serde(default, alias = "crawlTimestamp")]
    pub crawl_time: i64,
    #[serde(default)]
    pub region: String,
}

/// Unresolved group of similar observations waiting for enough evidence to become canonical.
///
/// `id` is assigned by storage; it is `0` until the candidate has been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub id: i64,
    pub group_key: String,
    pub region: String,
    pub title_votes: BTreeMap<String, u32>,
    pub total_occurrences: u32,
    pub last_price: f64,
    pub last_status: SalesStatus,
    pub first_seen_time: DateTime<Utc>,
    pub last_seen_time: DateTime<Utc>,
}

impl CandidateItem {
    /// Seeds a candidate with a single observation.
    pub fn seed(
        group_key: impl Into<String>,
        region: impl Into<String>,
        raw_title: &str,
        price: f64,
        status: SalesStatus,
        seen_at: DateTime<Utc>,
    ) -> Self {
        let mut title_votes = BTreeMap::new();
        if !raw_title.is_empty() {
            title_votes.insert(raw_title.to_string(), 1);
        }
        Self {
            id: 0,
            group_key: group_key.into(),
            region: region.into(),
            title_votes,
            total_occurrences: 1,
            last_price: price,
            last_status: status,
            first_seen_time: seen_at,
            last_seen_time: seen_at,
        }
    }

    /// Folds one more observation in: votes for the title, bumps the occurrence
    /// count and overwrites the last-seen snapshot.
    pub fn record_observation(
        &mut self,
        raw_title: &str,
        price: f64,
        status: SalesStatus,
        seen_at: DateTime<Utc>,
    ) {
        if !raw_title.is_empty() {
            *self.title_votes.entry(raw_title.to_string()).or_default() += 1;
        }
        self.total_occurrences = self.total_occurrences.saturating_add(1);
        self.last_price = price;
        self.last_status = status;
        self.last_seen_time = seen_at;
    }

    pub fn total_votes(&self) -> u64 {
        self.title_votes.values().map(|v| u64::from(*v)).sum()
    }

    pub fn should_promote(&self, threshold: u32) -> bool {
        self.total_occurrences >= threshold
    }
}

/// Canonical, de-duplicated product: the unit users track and get notified about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterProduct {
    pub id: String,
    pub region: String,
    pub platform: String,
    pub standard_title: String,
    pub price: f64,
    pub status: SalesStatus,
    pub trust_score: u32,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl MasterProduct {
    pub fn is_on_sale(&self) -> bool {
        self.status == SalesStatus::OnSale
    }

    pub fn increment_trust_score(&mut self) {
        self.trust_score = self.trust_score.saturating_add(1);
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidTrend {
    #[error("trend activity id cannot be empty")]
    EmptyActivityId,
    #[error("trend price must be a non-negative number, got {0}")]
    BadPrice(f64),
}

/// One price sample per (product, UTC calendar day).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTrend {
    pub activity_id: String,
    pub price: f64,
    pub record_date: NaiveDate,
    pub create_time: DateTime<Utc>,
}

impl PriceTrend {
    /// Builds a sample for the UTC day containing `at`.
    pub fn for_day(
        activity_id: impl Into<String>,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Self, InvalidTrend> {
        let activity_id = activity_id.into();
        if activity_id.is_empty() {
            return Err(InvalidTrend::EmptyActivityId);
        }
        if !price.is_finite() || price < 0.0 {
            return Err(InvalidTrend::BadPrice(price));
        }
        Ok(Self {
            activity_id,
            price,
            record_date: utc_day(at),
            create_time: at,
        })
    }
}

/// Truncates a timestamp to its UTC calendar day.
pub fn utc_day(at: DateTime<Utc>) -> NaiveDate {
    at.date_naive()
}

/// A user's price target on one master product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    pub activity_id: String,
    pub user_id: String,
    pub target_price: f64,
    pub last_notify_time: Option<DateTime<Utc>>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl NotificationConfig {
    /// "Today" here is the server's local calendar day, unlike trend bucketing which is UTC.
    pub fn has_notified_today(&self, now: DateTime<Utc>) -> bool {
        match self.last_notify_time {
            Some(last) => {
                last.with_timezone(&Local).date_naive() == now.with_timezone(&Local).date_naive()
            }
            None => false,
        }
    }

    pub fn should_notify(&self, current_price: f64, now: DateTime<Utc>) -> bool {
        current_price <= self.target_price && !self.has_notified_today(now)
    }

    pub fn mark_notified(&mut self, now: DateTime<Utc>) {
        self.last_notify_time = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedProduct {
    pub activity_id: String,
    pub user_id: String,
    pub create_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub user_id: String,
    pub bark_key: String,
    pub update_time: DateTime<Utc>,
}

/// Description of a catalog change handed back to callers (webhook, promotion pass).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformProduct {
    pub activity_id: String,
    pub platform: String,
    pub region: String,
    pub title: String,
    pub original_price: f64,
    pub current_price: f64,
    pub sales_status: SalesStatus,
    pub activity_create_time: DateTime<Utc>,
}

/// Stable numeric codes shared by the validator, the cleaning service and the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    PriceBelowMin,
    PriceDropExceeded,
    PriceRiseExceeded,
    Database,
    NotificationSend,
}

impl ErrorCode {
    pub fn code(self) -> u32 {
        match self {
            ErrorCode::InvalidInput => 10001,
            ErrorCode::NotFound => 10002,
            ErrorCode::PriceBelowMin => 20001,
            ErrorCode::PriceDropExceeded => 20002,
            ErrorCode::PriceRiseExceeded => 20003,
            ErrorCode::Database => 40001,
            ErrorCode::NotificationSend => 50001,
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::InvalidInput => 400,
            ErrorCode::NotFound => 404,
            _ => 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status {other}")),
        }
    }
}

/// Outcome of one scheduled job run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunRecord {
    pub job_name: String,
    pub run_id: String,
    pub run_time: DateTime<Utc>,
    pub status: JobStatus,
    pub item_count: u64,
    pub error_message: Option<String>,
}

impl JobRunRecord {
    pub fn is_healthy(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Success
            && now.signed_duration_since(self.run_time)
                < chrono::Duration::minutes(JOB_HEALTH_WINDOW_MINUTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 19, h, m, 0).single().unwrap()
    }

    #[test]
    fn sales_status_round_trips_as_integer() {
        let json = serde_json::to_string(&SalesStatus::OnSale).unwrap();
        assert_eq!(json, "1");
        let parsed: SalesStatus = serde_json::from_str("0").unwrap();
        assert_eq!(parsed, SalesStatus::Sold);
        assert!(serde_json::from_str::<SalesStatus>("2").is_err());
    }

    #[test]
    fn incoming_item_accepts_both_crawl_time_spellings() {
        let a: IncomingItem = serde_json::from_str(
            r#"{"title":"蛋糕","price":12.5,"status":1,"crawlTime":1700000000,"region":"sh"}"#,
        )
        .unwrap();
        let b: IncomingItem = serde_json::from_str(
            r#"{"title":"蛋糕","price":12.5,"status":1,"crawlTimestamp":1700000000,"region":"sh"}"#,
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.status, SalesStatus::OnSale);
    }

    #[test]
    fn candidate_fold_keeps_occurrences_at_least_vote_sum() {
        let mut c = CandidateItem::seed("key", "sh", "巧克力蛋糕", 20.0, SalesStatus::OnSale, ts(9, 0));
        c.record_observation("巧克力蛋糕6寸", 18.0, SalesStatus::Sold, ts(10, 0));
        c.record_observation("巧克力蛋糕", 17.0, SalesStatus::OnSale, ts(11, 0));

        assert_eq!(c.total_occurrences, 3);
        assert_eq!(c.total_votes(), 3);
        assert_eq!(c.title_votes["巧克力蛋糕"], 2);
        assert_eq!(c.last_price, 17.0);
        assert_eq!(c.first_seen_time, ts(9, 0));
        assert_eq!(c.last_seen_time, ts(11, 0));
        assert!(c.should_promote(3));
        assert!(!c.should_promote(4));
    }

    #[test]
    fn trend_is_bucketed_to_utc_day_and_rejects_bad_input() {
        let trend = PriceTrend::for_day("DT_x", 9.9, ts(23, 59)).unwrap();
        assert_eq!(trend.record_date, NaiveDate::from_ymd_opt(2026, 2, 19).unwrap());
        assert_eq!(PriceTrend::for_day("", 1.0, ts(1, 0)), Err(InvalidTrend::EmptyActivityId));
        assert!(matches!(
            PriceTrend::for_day("DT_x", -1.0, ts(1, 0)),
            Err(InvalidTrend::BadPrice(_))
        ));
    }

    #[test]
    fn notification_fires_once_per_local_day() {
        let now = Utc::now();
        let mut cfg = NotificationConfig {
            activity_id: "DT_x".into(),
            user_id: "u1".into(),
            target_price: 10.0,
            last_notify_time: None,
            create_time: now,
            update_time: now,
        };
        assert!(cfg.should_notify(10.0, now));
        assert!(!cfg.should_notify(10.01, now));

        cfg.mark_notified(now);
        assert!(cfg.has_notified_today(now));
        assert!(!cfg.should_notify(5.0, now));
        assert!(cfg.should_notify(5.0, now + chrono::Duration::days(2)));
    }

    #[test]
    fn job_run_health_window() {
        let record = JobRunRecord {
            job_name: "promote-candidates".into(),
            run_id: "r1".into(),
            run_time: ts(10, 0),
            status: JobStatus::Success,
            item_count: 4,
            error_message: None,
        };
        assert!(record.is_healthy(ts(10, 29)));
        assert!(!record.is_healthy(ts(10, 30)));

        let failed = JobRunRecord { status: JobStatus::Failed, ..record };
        assert!(!failed.is_healthy(ts(10, 1)));
    }
}
