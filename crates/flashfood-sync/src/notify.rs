//! Price-target notifications and push delivery.

use std::sync::Arc;

use async_trait::async_trait;
use flashfood_core::{MasterProduct, NotificationConfig};
use flashfood_storage::http::{FetchError, HttpClient};
use flashfood_storage::{CatalogStore, NotificationRepository, StorageError, UserSettingsRepository};
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};

#[derive(Debug, Error)]
pub enum PushError {
    #[error("invalid push url: {0}")]
    Url(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[async_trait]
pub trait PushNotifier: Send + Sync {
    /// `device_key` may be empty, meaning the user has no device configured.
    async fn send(&self, device_key: &str, message: &str) -> Result<(), PushError>;
}

/// Bark push over `GET {base}/{key}/{message}?level=critical&volume=5`.
pub struct BarkNotifier {
    base_url: String,
    client: HttpClient,
}

impl BarkNotifier {
    pub fn new(base_url: impl Into<String>, client: HttpClient) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// Accepts either a bare device key or a full Bark URL ending in one.
    pub fn normalize_key(input: &str) -> &str {
        let input = input.trim();
        if input.starts_with("http") {
            input
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or(input)
        } else {
            input
        }
    }

    pub fn push_url(&self, device_key: &str, message: &str) -> Result<Url, PushError> {
        let mut url = Url::parse(&self.base_url).map_err(|err| PushError::Url(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| PushError::Url(format!("{} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .push(Self::normalize_key(device_key))
            .push(message);
        url.query_pairs_mut()
            .append_pair("level", "critical")
            .append_pair("volume", "5");
        Ok(url)
    }
}

#[async_trait]
impl PushNotifier for BarkNotifier {
    async fn send(&self, device_key: &str, message: &str) -> Result<(), PushError> {
        if Self::normalize_key(device_key).is_empty() {
            info!(message, "no bark key configured; skipping delivery");
            return Ok(());
        }
        let url = self.push_url(device_key, message)?;
        self.client.get(url.as_str()).await?;
        Ok(())
    }
}

pub fn alert_message(master: &MasterProduct) -> String {
    format!(
        "【{} {} ¥{:.2}】{}",
        master.platform, master.region, master.price, master.standard_title
    )
}

/// Walks every subscription and pushes an alert when a product is on sale at
/// or below its target, at most once per local calendar day.
pub struct NotificationService<S> {
    store: Arc<S>,
    notifier: Arc<dyn PushNotifier>,
    clock: Arc<dyn Clock>,
}

impl<S> NotificationService<S>
where
    S: CatalogStore + NotificationRepository + UserSettingsRepository + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<dyn PushNotifier>) -> Self {
        Self::with_clock(store, notifier, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<S>, notifier: Arc<dyn PushNotifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    /// Returns how many alerts were delivered. Only listing subscriptions can fail the call.
    pub async fn check_and_notify(&self) -> Result<usize, StorageError> {
        let configs = self.store.list_notifications().await?;
        let mut sent = 0;
        for config in &configs {
            match self.check_one(config).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(err) => {
                    error!(
                        activity_id = %config.activity_id,
                        user_id = %config.user_id,
                        error = %err,
                        "notification check failed"
                    );
                }
            }
        }
        info!(checked = configs.len(), sent, "price check finished");
        Ok(sent)
    }

    async fn check_one(&self, config: &NotificationConfig) -> anyhow::Result<bool> {
        let now = self.clock.now();
        if config.has_notified_today(now) {
            return Ok(false);
        }

        let Some(settings) = self.store.user_settings(&config.user_id).await? else {
            debug!(user_id = %config.user_id, "no user settings; skipping");
            return Ok(false);
        };

        let master = {
            let mut tx = self.store.begin().await?;
            tx.master_by_id(&config.activity_id).await?
        };
        let Some(master) = master else {
            warn!(activity_id = %config.activity_id, "product not found for notification");
            return Ok(false);
        };
        if !master.is_on_sale() || !config.should_notify(master.price, now) {
            return Ok(false);
        }

        let message = alert_message(&master);
        info!(activity_id = %master.id, user_id = %config.user_id, %message, "sending price alert");
        self.notifier.send(&settings.bark_key, &message).await?;
        self.store
            .mark_notified(&config.activity_id, &config.user_id, now)
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use flashfood_core::{SalesStatus, UserSettings};
    use flashfood_storage::http::HttpClientConfig;
    use flashfood_storage::SqliteStore;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl PushNotifier for RecordingNotifier {
        async fn send(&self, device_key: &str, message: &str) -> Result<(), PushError> {
            self.sent
                .lock()
                .await
                .push((device_key.to_string(), message.to_string()));
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).single().unwrap()
    }

    async fn seed(store: &SqliteStore, id: &str, price: f64, status: SalesStatus) {
        let mut tx = store.begin().await.unwrap();
        tx.create_master(&MasterProduct {
            id: id.into(),
            region: "gz".into(),
            platform: "DT".into(),
            standard_title: "鲜肉大包子".into(),
            price,
            status,
            trust_score: 1,
            create_time: t0(),
            update_time: t0(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    async fn settings(store: &SqliteStore, user: &str) {
        store
            .upsert_user_settings(&UserSettings {
                user_id: user.into(),
                bark_key: format!("key-{user}"),
                update_time: t0(),
            })
            .await
            .unwrap();
    }

    #[test]
    fn bark_key_is_taken_from_full_urls() {
        assert_eq!(BarkNotifier::normalize_key(" abc123 "), "abc123");
        assert_eq!(BarkNotifier::normalize_key("https://api.day.app/abc123"), "abc123");
        assert_eq!(BarkNotifier::normalize_key("https://api.day.app/abc123/"), "abc123");
        assert_eq!(BarkNotifier::normalize_key(""), "");
    }

    #[test]
    fn bark_url_escapes_message_and_sets_level() {
        let client = HttpClient::new(HttpClientConfig::default()).unwrap();
        let bark = BarkNotifier::new("https://api.day.app/", client);
        let url = bark.push_url("https://api.day.app/KEY", "【DT gz ¥9.90】包子 a/b").unwrap();
        let s = url.as_str();
        assert!(s.starts_with("https://api.day.app/KEY/"), "{s}");
        assert!(s.ends_with("?level=critical&volume=5"), "{s}");
        assert!(!s["https://api.day.app/KEY/".len()..].contains("a/b"));
    }

    #[test]
    fn alert_message_format() {
        let master = MasterProduct {
            id: "DT_x".into(),
            region: "gz".into(),
            platform: "DT".into(),
            standard_title: "豆沙包".into(),
            price: 9.9,
            status: SalesStatus::OnSale,
            trust_score: 1,
            create_time: t0(),
            update_time: t0(),
        };
        assert_eq!(alert_message(&master), "【DT gz ¥9.90】豆沙包");
    }

    #[tokio::test]
    async fn alerts_once_per_day_when_price_reaches_target() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(FixedClock::new(t0()));
        let service = NotificationService::with_clock(store.clone(), notifier.clone(), clock.clone());

        seed(&store, "DT_cheap", 8.0, SalesStatus::OnSale).await;
        seed(&store, "DT_sold", 1.0, SalesStatus::Sold).await;
        settings(&store, "u1").await;
        store.upsert_notification("DT_cheap", "u1", 8.0, t0()).await.unwrap();
        store.upsert_notification("DT_sold", "u1", 5.0, t0()).await.unwrap();
        store.upsert_notification("DT_gone", "u1", 5.0, t0()).await.unwrap();
        // no settings for u2
        store.upsert_notification("DT_cheap", "u2", 9.0, t0()).await.unwrap();

        assert_eq!(service.check_and_notify().await.unwrap(), 1);
        assert_eq!(service.check_and_notify().await.unwrap(), 0);
        {
            let sent = notifier.sent.lock().await;
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].0, "key-u1");
            assert!(sent[0].1.contains("¥8.00"));
        }
        let cfg = store.notification("DT_cheap", "u1").await.unwrap().unwrap();
        assert_eq!(cfg.last_notify_time, Some(t0()));

        clock.set(t0() + Duration::days(2));
        assert_eq!(service.check_and_notify().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn price_above_target_does_not_alert() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = NotificationService::new(store.clone(), notifier.clone());

        seed(&store, "DT_a", 12.0, SalesStatus::OnSale).await;
        settings(&store, "u1").await;
        store.upsert_notification("DT_a", "u1", 11.99, t0()).await.unwrap();

        assert_eq!(service.check_and_notify().await.unwrap(), 0);
        assert!(notifier.sent.lock().await.is_empty());
    }
}
