//! Routes incoming observations to the master catalog or the candidate pool,
//! and promotes candidates once they have enough corroboration.
//!
//! Every mutation runs inside one catalog transaction. Promotion commits per
//! candidate, so a failure or timeout part way through a pass never leaves a
//! master created while its candidate is still pooled.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flashfood_core::{
    CandidateItem, ErrorCode, IncomingItem, MasterProduct, PlatformProduct, PriceTrend,
};
use flashfood_storage::{CatalogStore, CatalogTx, StorageError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CleaningConfig;
use crate::price::PriceValidator;
use crate::similarity::TitleMatcher;

#[derive(Debug, Error)]
pub enum CleaningError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CleaningError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CleaningError::InvalidInput(_) => ErrorCode::InvalidInput,
            CleaningError::Storage(_) => ErrorCode::Database,
        }
    }
}

/// Counts reported back to a pushing platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub received: usize,
    pub promoted: usize,
}

pub struct DataCleaningService {
    store: Arc<dyn CatalogStore>,
    matcher: TitleMatcher,
    validator: PriceValidator,
    config: CleaningConfig,
    clock: Arc<dyn Clock>,
}

impl DataCleaningService {
    pub fn new(store: Arc<dyn CatalogStore>, config: CleaningConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn CatalogStore>,
        config: CleaningConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            matcher: TitleMatcher::new(config.thresholds()),
            validator: config.validator(),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &CleaningConfig {
        &self.config
    }

    /// Returns the accepted update when the item matched a master, `None` when
    /// it was pooled or its price was rejected.
    pub async fn process_incoming_item(
        &self,
        item: &IncomingItem,
        region: &str,
    ) -> Result<Option<PlatformProduct>, CleaningError> {
        let now = self.clock.now();
        let raw_title = item.title.as_str();
        let clean_key = TitleMatcher::normalize_for_id(raw_title);

        let mut tx = self.store.begin().await?;
        let masters = tx.masters_by_region(region).await?;

        let matched = masters
            .iter()
            .find(|m| self.matcher.is_high(raw_title, &m.standard_title))
            .or_else(|| {
                masters.iter().find(|m| {
                    self.matcher.is_mid(raw_title, &m.standard_title)
                        && self.matcher.price_match(item.price, m.price)
                })
            });

        if let Some(master) = matched {
            let mut master = master.clone();
            let final_price = match self.validator.validate_update_at(
                master.price,
                item.price,
                master.update_time,
                now,
            ) {
                Ok(price) => price,
                Err(rejection) => {
                    debug!(
                        activity_id = %master.id,
                        region,
                        code = rejection.code().code(),
                        %rejection,
                        "price update ignored"
                    );
                    return Ok(None);
                }
            };

            master.price = final_price;
            master.status = item.status;
            master.increment_trust_score();
            master.update_time = now;
            tx.update_master(&master).await?;
            tx.commit().await?;

            debug!(activity_id = %master.id, region, price = final_price, "master updated");
            return Ok(Some(self.product_view(&master, item.price)));
        }

        self.fold_candidate(&mut *tx, region, raw_title, &clean_key, item, now)
            .await?;
        tx.commit().await?;
        Ok(None)
    }

    /// Processes every item independently; failures are logged and skipped.
    pub async fn process_batch(&self, items: &[IncomingItem]) -> IngestSummary {
        let mut summary = IngestSummary {
            received: items.len(),
            promoted: 0,
        };
        for item in items {
            match self.process_incoming_item(item, &item.region).await {
                Ok(Some(_)) => summary.promoted += 1,
                Ok(None) => {}
                Err(err) => {
                    error!(title = %item.title, region = %item.region, error = %err, "failed to process item");
                }
            }
        }
        info!(total = summary.received, promoted = summary.promoted, "push processed");
        summary
    }

    async fn fold_candidate(
        &self,
        tx: &mut dyn CatalogTx,
        region: &str,
        raw_title: &str,
        clean_key: &str,
        item: &IncomingItem,
        now: DateTime<Utc>,
    ) -> Result<(), CleaningError> {
        if raw_title.is_empty() {
            return Err(CleaningError::InvalidInput("empty title".to_string()));
        }
        if !item.price.is_finite() || item.price < 0.0 {
            return Err(CleaningError::InvalidInput(format!(
                "invalid price {}",
                item.price
            )));
        }

        let candidates = tx.candidates_by_region(region).await?;
        match candidates
            .into_iter()
            .find(|c| self.matcher.is_high(clean_key, &c.group_key))
        {
            Some(mut candidate) => {
                candidate.record_observation(raw_title, item.price, item.status, now);
                tx.update_candidate(&candidate).await?;
                debug!(
                    candidate_id = candidate.id,
                    region,
                    occurrences = candidate.total_occurrences,
                    "observation folded into candidate"
                );
            }
            None => {
                let candidate =
                    CandidateItem::seed(clean_key, region, raw_title, item.price, item.status, now);
                let candidate_id = tx.create_candidate(&candidate).await?;
                debug!(candidate_id, region, "candidate seeded");
            }
        }
        Ok(())
    }

    /// Promotes every eligible candidate, grouped by the candidate's region.
    ///
    /// Only failing to list the pool aborts the pass; a candidate that fails
    /// is logged and stays pooled for the next pass.
    pub async fn promote_candidates(
        &self,
    ) -> Result<BTreeMap<String, Vec<PlatformProduct>>, CleaningError> {
        let candidates = {
            let mut tx = self.store.begin().await?;
            tx.list_candidates().await?
        };

        let mut promoted: BTreeMap<String, Vec<PlatformProduct>> = BTreeMap::new();
        let mut count = 0usize;
        for candidate in candidates {
            if !candidate.should_promote(self.config.promotion_threshold) {
                continue;
            }
            match self.promote_one(candidate.id).await {
                Ok(Some(view)) => {
                    count += 1;
                    promoted.entry(candidate.region.clone()).or_default().push(view);
                }
                Ok(None) => {}
                Err(err) => {
                    error!(candidate_id = candidate.id, error = %err, "candidate promotion failed");
                }
            }
        }

        info!(promoted = count, "promotion pass finished");
        Ok(promoted)
    }

    async fn promote_one(&self, candidate_id: i64) -> Result<Option<PlatformProduct>, CleaningError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        // Re-read inside the transaction; the candidate may have been folded
        // into or promoted since the pass listed it.
        let Some(candidate) = tx.candidate_by_id(candidate_id).await? else {
            return Ok(None);
        };
        if !candidate.should_promote(self.config.promotion_threshold) {
            return Ok(None);
        }

        let title = TitleMatcher::elect_title(&candidate.title_votes);
        if title.is_empty() {
            warn!(candidate_id, region = %candidate.region, "skipping candidate with no electable title");
            return Ok(None);
        }
        let activity_id = TitleMatcher::generate_id(&self.config.id_prefix, &title);

        let master = match tx.master_by_id(&activity_id).await? {
            None => {
                let master = MasterProduct {
                    id: activity_id,
                    region: candidate.region.clone(),
                    platform: self.config.platform.clone(),
                    standard_title: title,
                    price: candidate.last_price,
                    status: candidate.last_status,
                    trust_score: candidate.total_occurrences,
                    create_time: now,
                    update_time: now,
                };
                tx.create_master(&master).await?;
                record_trend(&mut *tx, &master.id, master.price, now).await?;
                master
            }
            Some(mut master) => {
                let old_price = master.price;
                match self.validator.validate_update_at(
                    old_price,
                    candidate.last_price,
                    master.update_time,
                    now,
                ) {
                    Ok(price) => {
                        master.price = price;
                        master.increment_trust_score();
                    }
                    Err(rejection) => {
                        debug!(
                            activity_id = %master.id,
                            candidate_id,
                            %rejection,
                            "keeping existing price on re-promotion"
                        );
                    }
                }
                master.status = candidate.last_status;
                master.update_time = now;
                tx.update_master(&master).await?;
                if master.price != old_price {
                    record_trend(&mut *tx, &master.id, master.price, now).await?;
                }
                master
            }
        };

        tx.delete_candidates(&[candidate.id]).await?;
        tx.commit().await?;

        info!(
            candidate_id,
            activity_id = %master.id,
            region = %master.region,
            title = %master.standard_title,
            "candidate promoted"
        );
        Ok(Some(self.product_view(&master, master.price)))
    }

    /// Upserts today's price for every master; returns how many were written.
    pub async fn record_daily_trends(&self) -> Result<usize, CleaningError> {
        let now = self.clock.now();
        let masters = {
            let mut tx = self.store.begin().await?;
            tx.list_masters().await?
        };

        let mut count = 0;
        for master in &masters {
            let trend = match PriceTrend::for_day(master.id.as_str(), master.price, now) {
                Ok(trend) => trend,
                Err(err) => {
                    warn!(activity_id = %master.id, price = master.price, error = %err, "invalid trend sample");
                    continue;
                }
            };
            match self.upsert_trend(&trend).await {
                Ok(()) => count += 1,
                Err(err) => {
                    error!(activity_id = %master.id, error = %err, "failed to record price trend");
                }
            }
        }

        info!(recorded = count, masters = masters.len(), "daily trends recorded");
        Ok(count)
    }

    async fn upsert_trend(&self, trend: &PriceTrend) -> Result<(), StorageError> {
        let mut tx = self.store.begin().await?;
        tx.upsert_trend(trend).await?;
        tx.commit().await
    }

    fn product_view(&self, master: &MasterProduct, observed_price: f64) -> PlatformProduct {
        PlatformProduct {
            activity_id: master.id.clone(),
            platform: self.config.platform.clone(),
            region: master.region.clone(),
            title: master.standard_title.clone(),
            original_price: observed_price,
            current_price: master.price,
            sales_status: master.status,
            activity_create_time: master.update_time,
        }
    }
}

async fn record_trend(
    tx: &mut dyn CatalogTx,
    activity_id: &str,
    price: f64,
    now: DateTime<Utc>,
) -> Result<(), StorageError> {
    match PriceTrend::for_day(activity_id, price, now) {
        Ok(trend) => tx.upsert_trend(&trend).await,
        Err(err) => {
            warn!(activity_id, price, error = %err, "invalid trend sample");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{Duration, TimeZone};
    use flashfood_core::SalesStatus;
    use flashfood_storage::SqliteStore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).single().unwrap()
    }

    fn item(title: &str, price: f64) -> IncomingItem {
        IncomingItem {
            title: title.to_string(),
            price,
            status: SalesStatus::OnSale,
            crawl_time: 0,
            region: "gz".to_string(),
        }
    }

    async fn setup() -> (SqliteStore, Arc<FixedClock>, DataCleaningService) {
        let store = SqliteStore::in_memory().await.unwrap();
        let clock = Arc::new(FixedClock::new(t0()));
        let service = DataCleaningService::with_clock(
            Arc::new(store.clone()),
            CleaningConfig::default(),
            clock.clone(),
        );
        (store, clock, service)
    }

    async fn seed_master(store: &SqliteStore, title: &str, price: f64, at: DateTime<Utc>) -> String {
        let id = TitleMatcher::generate_id("DT", title);
        let mut tx = store.begin().await.unwrap();
        tx.create_master(&MasterProduct {
            id: id.clone(),
            region: "gz".into(),
            platform: "DT".into(),
            standard_title: title.into(),
            price,
            status: SalesStatus::OnSale,
            trust_score: 3,
            create_time: at,
            update_time: at,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
        id
    }

    async fn master(store: &SqliteStore, id: &str) -> Option<MasterProduct> {
        store.begin().await.unwrap().master_by_id(id).await.unwrap()
    }

    async fn candidates(store: &SqliteStore) -> Vec<CandidateItem> {
        store.begin().await.unwrap().list_candidates().await.unwrap()
    }

    #[tokio::test]
    async fn three_similar_items_pool_then_promote_to_one_master() {
        let (store, _clock, service) = setup().await;

        for title in ["巧克力蛋糕6寸", "巧克力蛋糕6寸", "巧克力蛋糕 6寸!"] {
            let out = service.process_incoming_item(&item(title, 25.0), "gz").await.unwrap();
            assert!(out.is_none());
        }

        let pooled = candidates(&store).await;
        assert_eq!(pooled.len(), 1);
        assert_eq!(pooled[0].total_occurrences, 3);
        assert_eq!(pooled[0].title_votes["巧克力蛋糕6寸"], 2);

        let promoted = service.promote_candidates().await.unwrap();
        let views = &promoted["gz"];
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].title, "巧克力蛋糕6寸");
        assert_eq!(views[0].current_price, 25.0);

        assert!(candidates(&store).await.is_empty());
        let id = TitleMatcher::generate_id("DT", "巧克力蛋糕6寸");
        let created = master(&store, &id).await.unwrap();
        assert_eq!(created.standard_title, "巧克力蛋糕6寸");
        assert_eq!(created.trust_score, 3);
        assert_eq!(created.platform, "DT");

        let trends = store.begin().await.unwrap().trends_for(&id).await.unwrap();
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].price, 25.0);
    }

    #[tokio::test]
    async fn below_threshold_candidates_stay_pooled() {
        let (store, _clock, service) = setup().await;
        service.process_incoming_item(&item("抹茶面包", 8.0), "gz").await.unwrap();
        service.process_incoming_item(&item("抹茶面包", 8.0), "gz").await.unwrap();

        assert!(service.promote_candidates().await.unwrap().is_empty());
        assert_eq!(candidates(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn rejected_price_leaves_master_untouched() {
        let (store, _clock, service) = setup().await;
        let id = seed_master(&store, "鲜肉大包子", 100.0, t0() - Duration::hours(1)).await;

        let out = service.process_incoming_item(&item("鲜肉大包子", 40.0), "gz").await.unwrap();
        assert!(out.is_none());

        let stored = master(&store, &id).await.unwrap();
        assert_eq!(stored.price, 100.0);
        assert_eq!(stored.trust_score, 3);
        assert!(candidates(&store).await.is_empty());
    }

    #[tokio::test]
    async fn accepted_update_bumps_trust_and_reports_prices() {
        let (store, _clock, service) = setup().await;
        let id = seed_master(&store, "鲜肉大包子", 100.0, t0() - Duration::hours(1)).await;

        let mut observed = item("鲜肉大包子", 70.0);
        observed.status = SalesStatus::Sold;
        let view = service
            .process_incoming_item(&observed, "gz")
            .await
            .unwrap()
            .expect("matched master");
        assert_eq!(view.activity_id, id);
        assert_eq!(view.original_price, 70.0);
        assert_eq!(view.current_price, 70.0);
        assert_eq!(view.sales_status, SalesStatus::Sold);

        let stored = master(&store, &id).await.unwrap();
        assert_eq!(stored.price, 70.0);
        assert_eq!(stored.trust_score, 4);
        assert_eq!(stored.update_time, t0());
    }

    #[tokio::test]
    async fn high_similarity_beats_an_earlier_mid_price_match() {
        let (store, _clock, service) = setup().await;
        // "牛肉大包" scores 0.6 against the item: mid tier, same price
        let mid = seed_master(&store, "牛肉大包", 10.0, t0() - Duration::hours(1)).await;
        let high = seed_master(&store, "鲜肉大包子", 10.0, t0() - Duration::hours(1)).await;

        let view = service
            .process_incoming_item(&item("鲜肉大包子", 10.0), "gz")
            .await
            .unwrap()
            .expect("matched master");
        assert_eq!(view.activity_id, high);
        assert_eq!(master(&store, &high).await.unwrap().trust_score, 4);
        assert_eq!(master(&store, &mid).await.unwrap().trust_score, 3);
    }

    #[tokio::test]
    async fn first_high_master_wins_over_a_closer_later_one() {
        let (store, _clock, service) = setup().await;
        let first = seed_master(&store, "鲜肉大包子!", 10.0, t0() - Duration::hours(1)).await;
        let exact = seed_master(&store, "鲜肉大包子", 10.0, t0() - Duration::hours(1)).await;

        let view = service
            .process_incoming_item(&item("鲜肉大包子", 10.0), "gz")
            .await
            .unwrap()
            .expect("matched master");
        assert_eq!(view.activity_id, first);
        assert_eq!(master(&store, &exact).await.unwrap().trust_score, 3);
    }

    #[tokio::test]
    async fn observation_folds_into_the_first_high_candidate() {
        let (store, _clock, service) = setup().await;
        let mut tx = store.begin().await.unwrap();
        let first = tx
            .create_candidate(&CandidateItem::seed("鲜肉大包子蛋", "gz", "鲜肉大包子蛋", 10.0, SalesStatus::OnSale, t0()))
            .await
            .unwrap();
        let exact = tx
            .create_candidate(&CandidateItem::seed("鲜肉大包子", "gz", "鲜肉大包子", 10.0, SalesStatus::OnSale, t0()))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        service.process_incoming_item(&item("鲜肉大包子", 10.0), "gz").await.unwrap();

        let pooled = candidates(&store).await;
        assert_eq!(pooled.len(), 2);
        let folded = pooled.iter().find(|c| c.id == first).unwrap();
        assert_eq!(folded.total_occurrences, 2);
        assert_eq!(folded.title_votes["鲜肉大包子"], 1);
        let untouched = pooled.iter().find(|c| c.id == exact).unwrap();
        assert_eq!(untouched.total_occurrences, 1);
    }

    #[tokio::test]
    async fn overlapping_items_on_a_file_database_both_apply() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("flashfood.db").display());
        let store = SqliteStore::connect(&url).await.unwrap();
        let service = DataCleaningService::with_clock(
            Arc::new(store.clone()),
            CleaningConfig::default(),
            Arc::new(FixedClock::new(t0())),
        );
        let id = seed_master(&store, "鲜肉大包子", 10.0, t0() - Duration::hours(1)).await;

        let (first, second) = (item("鲜肉大包子", 10.0), item("鲜肉大包子", 9.5));
        let (a, b) = tokio::join!(
            service.process_incoming_item(&first, "gz"),
            service.process_incoming_item(&second, "gz"),
        );
        assert!(a.unwrap().is_some());
        assert!(b.unwrap().is_some());
        assert_eq!(master(&store, &id).await.unwrap().trust_score, 5);
    }

    #[tokio::test]
    async fn mid_similarity_needs_a_matching_price() {
        let (store, _clock, service) = setup().await;
        let id = seed_master(&store, "abcd", 20.0, t0() - Duration::days(1)).await;

        // "abxy" scores 0.5 against "abcd": mid tier
        let far = service.process_incoming_item(&item("abxy", 35.0), "gz").await.unwrap();
        assert!(far.is_none());
        assert_eq!(candidates(&store).await.len(), 1);

        let near = service.process_incoming_item(&item("abxy", 20.5), "gz").await.unwrap();
        assert_eq!(near.map(|v| v.activity_id), Some(id));
    }

    #[tokio::test]
    async fn masters_in_other_regions_are_ignored() {
        let (store, _clock, service) = setup().await;
        seed_master(&store, "鲜肉大包子", 10.0, t0()).await;

        let out = service.process_incoming_item(&item("鲜肉大包子", 10.0), "sz").await.unwrap();
        assert!(out.is_none());
        let pooled = candidates(&store).await;
        assert_eq!(pooled.len(), 1);
        assert_eq!(pooled[0].region, "sz");
    }

    #[tokio::test]
    async fn invalid_items_are_rejected_before_pooling() {
        let (store, _clock, service) = setup().await;

        let empty = service.process_incoming_item(&item("", 5.0), "gz").await.unwrap_err();
        assert_eq!(empty.code(), ErrorCode::InvalidInput);
        assert!(matches!(
            service.process_incoming_item(&item("豆浆", -1.0), "gz").await,
            Err(CleaningError::InvalidInput(_))
        ));
        assert!(matches!(
            service.process_incoming_item(&item("豆浆", f64::NAN), "gz").await,
            Err(CleaningError::InvalidInput(_))
        ));
        assert!(candidates(&store).await.is_empty());
    }

    #[tokio::test]
    async fn batch_counts_matches_and_survives_bad_items() {
        let (store, _clock, service) = setup().await;
        seed_master(&store, "鲜肉大包子", 10.0, t0() - Duration::days(1)).await;

        let summary = service
            .process_batch(&[item("", 1.0), item("鲜肉大包子", 9.0), item("豆浆", 3.0)])
            .await;
        assert_eq!(summary, IngestSummary { received: 3, promoted: 1 });
        assert_eq!(candidates(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn candidate_without_electable_title_is_left_in_pool() {
        let (store, _clock, service) = setup().await;
        let mut tx = store.begin().await.unwrap();
        let mut blank = CandidateItem::seed("", "gz", "", 5.0, SalesStatus::OnSale, t0());
        blank.total_occurrences = 5;
        tx.create_candidate(&blank).await.unwrap();
        tx.commit().await.unwrap();

        assert!(service.promote_candidates().await.unwrap().is_empty());
        assert_eq!(candidates(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn re_promotion_validates_against_existing_master() {
        let (store, clock, service) = setup().await;
        let id = seed_master(&store, "鲜肉大包子", 100.0, t0()).await;

        // same title in a region without that master: pooled, then promoted onto the existing id
        for _ in 0..3 {
            service.process_incoming_item(&item("鲜肉大包子", 30.0), "sz").await.unwrap();
        }
        clock.set(t0() + Duration::hours(1));
        let promoted = service.promote_candidates().await.unwrap();
        assert!(!promoted.contains_key("gz"));
        assert_eq!(promoted["sz"][0].activity_id, id);
        assert_eq!(promoted["sz"][0].region, "gz");
        assert_eq!(promoted["sz"][0].current_price, 100.0);

        let stored = master(&store, &id).await.unwrap();
        assert_eq!(stored.price, 100.0);
        assert_eq!(stored.trust_score, 3);
        assert!(candidates(&store).await.is_empty());
        assert!(store.begin().await.unwrap().trends_for(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn re_promotion_across_days_records_new_price() {
        let (store, clock, service) = setup().await;
        let id = seed_master(&store, "鲜肉大包子", 100.0, t0()).await;
        for _ in 0..3 {
            service.process_incoming_item(&item("鲜肉大包子", 30.0), "sz").await.unwrap();
        }

        clock.set(t0() + Duration::days(1));
        service.promote_candidates().await.unwrap();

        let stored = master(&store, &id).await.unwrap();
        assert_eq!(stored.price, 30.0);
        assert_eq!(stored.trust_score, 4);
        let trends = store.begin().await.unwrap().trends_for(&id).await.unwrap();
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].price, 30.0);
    }

    #[tokio::test]
    async fn daily_trends_snapshot_every_master_latest_wins() {
        let (store, clock, service) = setup().await;
        let a = seed_master(&store, "鲜肉大包子", 10.0, t0()).await;
        let b = seed_master(&store, "豆沙包", 4.0, t0()).await;

        assert_eq!(service.record_daily_trends().await.unwrap(), 2);

        let mut tx = store.begin().await.unwrap();
        let mut updated = tx.master_by_id(&a).await.unwrap().unwrap();
        updated.price = 8.0;
        tx.update_master(&updated).await.unwrap();
        tx.commit().await.unwrap();

        clock.set(t0() + Duration::hours(5));
        assert_eq!(service.record_daily_trends().await.unwrap(), 2);

        let mut tx = store.begin().await.unwrap();
        let a_trends = tx.trends_for(&a).await.unwrap();
        assert_eq!(a_trends.len(), 1);
        assert_eq!(a_trends[0].price, 8.0);
        assert_eq!(tx.trends_for(&b).await.unwrap().len(), 1);
    }
}
