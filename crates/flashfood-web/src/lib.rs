//! Axum JSON API for flashfood: platform webhook, catalog browsing and per-user watch lists.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use flashfood_core::{IncomingItem, MasterProduct, NotificationConfig, SalesStatus, UserSettings};
use flashfood_storage::{
    BlockedRepository, CatalogStore, JobRunRepository, NotificationRepository, SqliteStore,
    StorageError, UserSettingsRepository,
};
use flashfood_sync::scheduler::{PRICE_CHECK_JOB, PROMOTE_JOB, TRENDS_JOB};
use flashfood_sync::{
    BarkNotifier, CleaningError, Clock, DataCleaningService, NotificationService, SystemClock,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

pub const CRATE_NAME: &str = "flashfood-web";

/// Upper bound on items in one webhook push.
pub const MAX_PUSH_ITEMS: usize = 1000;

pub const USER_HEADER: &str = "x-user-id";

const MISSING_USER: &str = "user id missing; set a bark key first";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub cleaning: Arc<DataCleaningService>,
    pub notifications: Arc<NotificationService<SqliteStore>>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        store: Arc<SqliteStore>,
        cleaning: Arc<DataCleaningService>,
        notifications: Arc<NotificationService<SqliteStore>>,
    ) -> Self {
        Self {
            store,
            cleaning,
            notifications,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Response body shared by every `/api` route; `code` mirrors the HTTP status.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn ok<T: Serialize>(data: T) -> Response {
    Json(Envelope {
        code: StatusCode::OK.as_u16(),
        data: Some(data),
        message: None,
    })
    .into_response()
}

fn done() -> Response {
    Json(Envelope::<()> {
        code: StatusCode::OK.as_u16(),
        data: None,
        message: None,
    })
    .into_response()
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Envelope::<()> {
            code: self.status.as_u16(),
            data: None,
            message: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        error!(error = %err, "storage failure while serving request");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "database error")
    }
}

impl From<CleaningError> for ApiError {
    fn from(err: CleaningError) -> Self {
        match err {
            CleaningError::Storage(err) => err.into(),
            other => {
                let status = StatusCode::from_u16(other.code().http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                Self::new(status, other.to_string())
            }
        }
    }
}

type ApiResult = Result<Response, ApiError>;

/// Caller identity from the `X-User-ID` header; empty when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserId(pub String);

impl UserId {
    fn require(&self) -> Result<&str, ApiError> {
        if self.0.is_empty() {
            Err(ApiError::bad_request(MISSING_USER))
        } else {
            Ok(&self.0)
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .unwrap_or_default();
        Ok(Self(id))
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(v)| v).map_err(|err| {
        debug!(error = %err, "rejected request body");
        ApiError::bad_request("Invalid request body")
    })
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/api/external/dt/push", post(push_handler))
        .route("/api/products", get(products_handler))
        .route("/api/products/blocked", get(blocked_list_handler))
        .route(
            "/api/products/notifications",
            get(notifications_list_handler).post(notification_create_handler),
        )
        .route(
            "/api/products/notifications/{activity_id}",
            put(notification_update_handler).delete(notification_delete_handler),
        )
        .route("/api/products/unblock/{activity_id}", post(unblock_handler))
        .route("/api/products/{activity_id}/trend", get(trend_handler))
        .route("/api/products/{activity_id}/block", post(block_handler))
        .route(
            "/api/user/settings",
            get(settings_get_handler).post(settings_save_handler),
        )
        .route("/api/status", get(status_handler))
        .route("/api/admin/promote", post(admin_promote_handler))
        .route("/api/admin/record-trends", post(admin_trends_handler))
        .route("/api/admin/check-prices", post(admin_check_prices_handler))
        .with_state(Arc::new(state))
}

/// Serves until `shutdown` resolves.
pub async fn serve<F>(state: AppState, port: u16, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "flashfood-web listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("serving http")?;
    Ok(())
}

async fn health_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn ready_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.ping().await {
        Ok(()) => Json(json!({ "status": "ready", "database": "ok" })).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "database": "unreachable",
                "error": err.to_string(),
            })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct PushRequest {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

/// One pushed observation as the platform sends it. Missing fields decode to
/// zero values so a bad item is rejected on its own, not with the whole push.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PushItem {
    title: String,
    price: f64,
    status: i64,
    #[serde(alias = "crawlTimestamp")]
    crawl_time: i64,
    region: String,
}

impl PushItem {
    fn decode(raw: serde_json::Value) -> Result<IncomingItem, String> {
        let item: PushItem = serde_json::from_value(raw).map_err(|e| e.to_string())?;
        let status = SalesStatus::try_from(item.status).map_err(|e| e.to_string())?;
        Ok(IncomingItem {
            title: item.title,
            price: item.price,
            status,
            crawl_time: item.crawl_time,
            region: item.region,
        })
    }
}

async fn push_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PushRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    if request.items.is_empty() {
        return Err(ApiError::bad_request(
            "items array is required and must not be empty",
        ));
    }
    if request.items.len() > MAX_PUSH_ITEMS {
        return Err(ApiError::bad_request(format!(
            "too many items in request (max {MAX_PUSH_ITEMS})"
        )));
    }
    let received = request.items.len();
    let mut items = Vec::with_capacity(received);
    for (index, raw) in request.items.into_iter().enumerate() {
        match PushItem::decode(raw) {
            Ok(item) => items.push(item),
            Err(reason) => warn!(index, %reason, "skipping malformed push item"),
        }
    }
    let mut summary = state.cleaning.process_batch(&items).await;
    summary.received = received;
    info!(
        received = summary.received,
        promoted = summary.promoted,
        "platform push processed"
    );
    Ok(ok(summary))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProductView {
    #[serde(flatten)]
    product: MasterProduct,
    sales_status_text: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    has_notification: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_price: Option<f64>,
}

impl ProductView {
    fn new(product: MasterProduct, watch: Option<&NotificationConfig>) -> Self {
        let sales_status_text = match product.status {
            SalesStatus::OnSale => "在售",
            SalesStatus::Sold => "售罄",
        };
        Self {
            product,
            sales_status_text,
            has_notification: watch.is_some(),
            target_price: watch.map(|n| n.target_price),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductQuery {
    region: Option<String>,
    platform: Option<String>,
    keyword: Option<String>,
    sales_status: Option<String>,
    monitor_status: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

async fn products_handler(
    State(state): State<Arc<AppState>>,
    user: UserId,
    Query(query): Query<ProductQuery>,
) -> ApiResult {
    let (blocked, watches) = if user.0.is_empty() {
        (HashSet::new(), HashMap::new())
    } else {
        let blocked = state
            .store
            .blocked_for_user(&user.0)
            .await?
            .into_iter()
            .map(|b| b.activity_id)
            .collect::<HashSet<_>>();
        let watches = state
            .store
            .notifications_for_user(&user.0)
            .await?
            .into_iter()
            .map(|n| (n.activity_id.clone(), n))
            .collect::<HashMap<_, _>>();
        (blocked, watches)
    };

    let masters = {
        let mut tx = state.store.begin().await?;
        match non_empty(&query.region) {
            Some(region) => tx.masters_by_region(region).await?,
            None => tx.list_masters().await?,
        }
    };

    let platform = non_empty(&query.platform);
    let keyword = non_empty(&query.keyword).map(str::to_lowercase);
    let status = non_empty(&query.sales_status).map(|s| {
        if s == "1" {
            SalesStatus::OnSale
        } else {
            SalesStatus::Sold
        }
    });
    let monitor = non_empty(&query.monitor_status);

    let products = masters
        .into_iter()
        .filter(|m| !blocked.contains(&m.id))
        .filter(|m| platform.map_or(true, |p| m.platform == p))
        .filter(|m| {
            keyword
                .as_deref()
                .map_or(true, |k| m.standard_title.to_lowercase().contains(k))
        })
        .filter(|m| status.map_or(true, |s| m.status == s))
        .filter(|m| match monitor {
            Some("1") => watches.contains_key(&m.id),
            Some("0") => !watches.contains_key(&m.id),
            _ => true,
        })
        .map(|m| {
            let watch = watches.get(&m.id);
            ProductView::new(m, watch)
        })
        .collect::<Vec<_>>();
    Ok(ok(products))
}

#[derive(Debug, Serialize)]
struct TrendPoint {
    date: String,
    price: f64,
}

async fn trend_handler(
    State(state): State<Arc<AppState>>,
    Path(activity_id): Path<String>,
) -> ApiResult {
    let trends = {
        let mut tx = state.store.begin().await?;
        tx.trends_for(&activity_id).await?
    };
    let points = trends
        .into_iter()
        .map(|t| TrendPoint {
            date: t.record_date.format("%Y-%m-%d").to_string(),
            price: t.price,
        })
        .collect::<Vec<_>>();
    Ok(ok(points))
}

async fn block_handler(
    State(state): State<Arc<AppState>>,
    user: UserId,
    Path(activity_id): Path<String>,
) -> ApiResult {
    let user_id = user.require()?;
    state
        .store
        .block(&activity_id, user_id, state.clock.now())
        .await?;
    info!(%activity_id, %user_id, "product blocked");
    Ok(done())
}

async fn unblock_handler(
    State(state): State<Arc<AppState>>,
    user: UserId,
    Path(activity_id): Path<String>,
) -> ApiResult {
    let user_id = user.require()?;
    state.store.unblock(&activity_id, user_id).await?;
    Ok(done())
}

async fn blocked_list_handler(State(state): State<Arc<AppState>>, user: UserId) -> ApiResult {
    if user.0.is_empty() {
        return Ok(ok(Vec::<ProductView>::new()));
    }
    let blocked = state.store.blocked_for_user(&user.0).await?;
    let mut tx = state.store.begin().await?;
    let mut products = Vec::with_capacity(blocked.len());
    for entry in blocked {
        if let Some(master) = tx.master_by_id(&entry.activity_id).await? {
            products.push(ProductView::new(master, None));
        }
    }
    Ok(ok(products))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateNotification {
    #[serde(default)]
    activity_id: String,
    #[serde(default)]
    target_price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateNotification {
    #[serde(default)]
    target_price: f64,
}

fn check_target(target_price: f64) -> Result<(), ApiError> {
    if target_price.is_finite() && target_price > 0.0 {
        Ok(())
    } else {
        Err(ApiError::bad_request("targetPrice must be positive"))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationView {
    activity_id: String,
    target_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_notify_time: Option<DateTime<Utc>>,
}

async fn notifications_list_handler(
    State(state): State<Arc<AppState>>,
    user: UserId,
) -> ApiResult {
    if user.0.is_empty() {
        return Ok(ok(Vec::<NotificationView>::new()));
    }
    let views = state
        .store
        .notifications_for_user(&user.0)
        .await?
        .into_iter()
        .map(|n| NotificationView {
            activity_id: n.activity_id,
            target_price: n.target_price,
            last_notify_time: n.last_notify_time,
        })
        .collect::<Vec<_>>();
    Ok(ok(views))
}

async fn notification_create_handler(
    State(state): State<Arc<AppState>>,
    user: UserId,
    payload: Result<Json<CreateNotification>, JsonRejection>,
) -> ApiResult {
    let user_id = user.require()?;
    let request = body(payload)?;
    let activity_id = request.activity_id.trim();
    if activity_id.is_empty() {
        return Err(ApiError::bad_request("activityId is required"));
    }
    check_target(request.target_price)?;
    state
        .store
        .upsert_notification(activity_id, user_id, request.target_price, state.clock.now())
        .await?;
    info!(%activity_id, %user_id, target_price = request.target_price, "price watch saved");
    Ok(done())
}

async fn notification_update_handler(
    State(state): State<Arc<AppState>>,
    user: UserId,
    Path(activity_id): Path<String>,
    payload: Result<Json<UpdateNotification>, JsonRejection>,
) -> ApiResult {
    let user_id = user.require()?;
    let request = body(payload)?;
    check_target(request.target_price)?;
    if state.store.notification(&activity_id, user_id).await?.is_none() {
        return Err(ApiError::not_found("Notification not found"));
    }
    state
        .store
        .upsert_notification(&activity_id, user_id, request.target_price, state.clock.now())
        .await?;
    Ok(done())
}

async fn notification_delete_handler(
    State(state): State<Arc<AppState>>,
    user: UserId,
    Path(activity_id): Path<String>,
) -> ApiResult {
    let user_id = user.require()?;
    state.store.delete_notification(&activity_id, user_id).await?;
    Ok(done())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveSettings {
    #[serde(default)]
    bark_key: String,
}

async fn settings_get_handler(State(state): State<Arc<AppState>>, user: UserId) -> ApiResult {
    let bark_key = if user.0.is_empty() {
        String::new()
    } else {
        state
            .store
            .user_settings(&user.0)
            .await?
            .map(|s| s.bark_key)
            .unwrap_or_default()
    };
    Ok(ok(json!({ "barkKey": bark_key })))
}

async fn settings_save_handler(
    State(state): State<Arc<AppState>>,
    user: UserId,
    payload: Result<Json<SaveSettings>, JsonRejection>,
) -> ApiResult {
    let user_id = user.require()?;
    let request = body(payload)?;
    let bark_key = BarkNotifier::normalize_key(&request.bark_key).to_string();
    if bark_key.is_empty() {
        return Err(ApiError::bad_request("barkKey is required"));
    }
    state
        .store
        .upsert_user_settings(&UserSettings {
            user_id: user_id.to_string(),
            bark_key: bark_key.clone(),
            update_time: state.clock.now(),
        })
        .await?;
    Ok(ok(json!({ "barkKey": bark_key })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobStatusView {
    job_name: &'static str,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_run_time: Option<DateTime<Utc>>,
    item_count: u64,
    is_healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusView {
    jobs: Vec<JobStatusView>,
    product_count: usize,
    server_time: DateTime<Utc>,
}

async fn status_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let now = state.clock.now();
    let mut jobs = Vec::new();
    for job_name in [PROMOTE_JOB, TRENDS_JOB, PRICE_CHECK_JOB] {
        let view = match state.store.latest_job_run(job_name).await? {
            Some(run) => JobStatusView {
                job_name,
                status: run.status.to_string(),
                last_run_time: Some(run.run_time),
                item_count: run.item_count,
                is_healthy: run.is_healthy(now),
                error_message: run.error_message,
            },
            None => JobStatusView {
                job_name,
                status: "pending".to_string(),
                last_run_time: None,
                item_count: 0,
                is_healthy: false,
                error_message: Some("job has not run yet".to_string()),
            },
        };
        jobs.push(view);
    }
    let product_count = {
        let mut tx = state.store.begin().await?;
        tx.list_masters().await?.len()
    };
    Ok(ok(StatusView {
        jobs,
        product_count,
        server_time: now,
    }))
}

async fn admin_promote_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let promoted = state.cleaning.promote_candidates().await?;
    let count: usize = promoted.values().map(Vec::len).sum();
    info!(promoted = count, "manual promotion triggered");
    Ok(ok(json!({ "promoted": count, "byRegion": promoted })))
}

async fn admin_trends_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let recorded = state.cleaning.record_daily_trends().await?;
    Ok(ok(json!({ "recorded": recorded })))
}

async fn admin_check_prices_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let sent = state.notifications.check_and_notify().await?;
    Ok(ok(json!({ "sent": sent })))
}
