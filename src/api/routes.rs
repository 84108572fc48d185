use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::alerts::AlertManager;
use crate::config::RateBand;
use crate::db::Database;
use crate::delivery::Notifier;
use crate::error::ServiceError;
use crate::models::{
    AlertCondition, AlertSubscription, ConversionSummary, CustomRate, JoinOutcome,
    NotificationIntent, QueueEntry, QueueStatus, Quote, RateField, SubscribeOutcome,
};
use crate::queue::QueueManager;
use crate::rates::{self, custom::CustomRateStore, selector};
use crate::scheduler::SharedSnapshot;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub queue: Arc<QueueManager>,
    pub alerts: Arc<AlertManager>,
    pub custom: Arc<CustomRateStore>,
    pub snapshot: SharedSnapshot,
    pub notifier: Arc<dyn Notifier>,
    pub public_providers: Arc<Vec<String>>,
    pub admin_user_ids: Arc<Vec<String>>,
    pub rate_band: RateBand,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/rates", get(get_rates))
        .route("/api/rates/best", get(get_best_rate))
        .route("/api/convert", get(get_conversion))
        .route("/api/queue/join", post(join_queue))
        .route("/api/queue/status", get(queue_status))
        .route("/api/queue/leave", post(leave_queue))
        .route("/api/alerts", get(get_alert).post(create_alert))
        .route("/api/alerts/cancel", post(cancel_alert))
        .route("/api/admin/rate", post(set_house_rate))
        .route("/api/admin/rate/derive", post(derive_house_rate))
        .route("/api/admin/queue/next", post(serve_next))
        .route("/api/admin/queue/complete", post(complete_current))
        .route("/api/admin/queue", get(list_queue))
        .route("/api/admin/admins", post(register_admin))
        .with_state(state)
}

// ===== Route Handlers =====

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let snap = state.snapshot.load();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        quote_count: snap.quotes.iter().filter(|q| q.status.is_usable()).count(),
        last_refresh: snap.fetched_at.map(|t| t.to_rfc3339()),
    })
}

/// All quotes surfaced to end users: house rate first when set, then the
/// allowlisted market providers.
async fn get_rates(State(state): State<AppState>) -> Result<Json<RatesResponse>, ApiError> {
    let snap = state.snapshot.load();
    let custom = state.custom.get_override()?;

    let quotes = rates::public_quotes(&snap.quotes, &state.public_providers, custom.as_ref());
    let best_buying = selector::select_best(&quotes, RateField::Buying).cloned();

    Ok(Json(RatesResponse {
        house_rate: custom,
        best_buying,
        quotes,
    }))
}

async fn get_best_rate(State(state): State<AppState>) -> Result<Json<Quote>, ApiError> {
    let snap = state.snapshot.load();
    let custom = state.custom.get_override()?;

    let quotes = rates::public_quotes(&snap.quotes, &state.public_providers, custom.as_ref());
    selector::select_best(&quotes, RateField::Buying)
        .cloned()
        .map(Json)
        .ok_or_else(|| ServiceError::NoData.into())
}

async fn get_conversion(
    State(state): State<AppState>,
    Query(params): Query<ConversionQuery>,
) -> Result<Json<ConversionSummary>, ApiError> {
    let snap = state.snapshot.load();
    let custom = state.custom.get_override()?;

    let summary = rates::conversion_summary(
        &snap.quotes,
        &state.public_providers,
        custom.as_ref(),
        params.amount,
    )?;

    Ok(Json(summary))
}

async fn join_queue(
    State(state): State<AppState>,
    Json(req): Json<UserRequest>,
) -> Result<Json<JoinOutcome>, ApiError> {
    let display_name = req.display_name.unwrap_or_else(|| "Customer".to_string());
    let outcome = state.queue.join(&req.user_id, &display_name)?;
    Ok(Json(outcome))
}

async fn queue_status(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
) -> Result<Json<QueueStatusResponse>, ApiError> {
    let position = state.queue.position(&params.user_id)?;
    Ok(Json(QueueStatusResponse {
        in_queue: position.is_some(),
        // Position 0 means the user is currently being served
        ahead: position.map(|p| (p - 1).max(0)),
        position,
    }))
}

async fn leave_queue(
    State(state): State<AppState>,
    Json(req): Json<UserRequest>,
) -> Result<Json<LeaveResponse>, ApiError> {
    let left = state.queue.leave(&req.user_id)?;
    Ok(Json(LeaveResponse { left }))
}

async fn get_alert(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
) -> Result<Json<Option<AlertSubscription>>, ApiError> {
    let subscription = state.alerts.active_subscription(&params.user_id)?;
    Ok(Json(subscription))
}

async fn create_alert(
    State(state): State<AppState>,
    Json(req): Json<CreateAlertRequest>,
) -> Result<Json<SubscribeOutcome>, ApiError> {
    if !state.rate_band.contains(req.target_rate) {
        return Err(ApiError::BadRequest(format!(
            "target rate must be between {:.2} and {:.2}",
            state.rate_band.min, state.rate_band.max
        )));
    }

    let display_name = req.display_name.unwrap_or_else(|| "Customer".to_string());
    let condition = req.condition.unwrap_or(AlertCondition::Above);
    let outcome = state
        .alerts
        .subscribe(&req.user_id, &display_name, req.target_rate, condition)?;

    Ok(Json(outcome))
}

async fn cancel_alert(
    State(state): State<AppState>,
    Json(req): Json<UserRequest>,
) -> Result<Json<CancelResponse>, ApiError> {
    let cancelled = state.alerts.unsubscribe(&req.user_id)?;
    Ok(Json(CancelResponse { cancelled }))
}

async fn set_house_rate(
    State(state): State<AppState>,
    Json(req): Json<SetRateRequest>,
) -> Result<Json<CustomRate>, ApiError> {
    ensure_admin(&state, &req.admin_id)?;

    if !state.rate_band.contains(req.buying) {
        return Err(ApiError::BadRequest(format!(
            "buying rate must be between {:.2} and {:.2}",
            state.rate_band.min, state.rate_band.max
        )));
    }
    if let Some(selling) = req.selling {
        if !state.rate_band.contains(selling) {
            return Err(ApiError::BadRequest(format!(
                "selling rate must be between {:.2} and {:.2}",
                state.rate_band.min, state.rate_band.max
            )));
        }
    }

    let record = state.custom.set_override(req.buying, req.selling)?;
    Ok(Json(record))
}

/// Set the house rate from the latest reference quote instead of a typed
/// value.
async fn derive_house_rate(
    State(state): State<AppState>,
    Json(req): Json<DeriveRateRequest>,
) -> Result<Json<CustomRate>, ApiError> {
    ensure_admin(&state, &req.admin_id)?;

    let provider = req
        .provider
        .unwrap_or_else(|| crate::config::PROVIDER_BOT_REFERENCE.to_string());

    let snap = state.snapshot.load();
    let reference = snap
        .quotes
        .iter()
        .find(|q| q.provider == provider)
        .ok_or(ServiceError::NoData)?;

    let record = state
        .custom
        .derive_from_reference(reference)?
        .ok_or(ServiceError::NoData)?;

    Ok(Json(record))
}

async fn serve_next(
    State(state): State<AppState>,
    Json(req): Json<AdminRequest>,
) -> Result<Json<ServeNextResponse>, ApiError> {
    ensure_admin(&state, &req.admin_id)?;

    let entry = state.queue.dequeue_next()?;

    if let Some(entry) = &entry {
        // Notification is an intent; the dequeue stands even if it fails
        if let Err(e) = state
            .notifier
            .notify(&entry.user_id, NotificationIntent::QueueTurn)
            .await
        {
            tracing::warn!("⚠️  Failed to notify {}: {:#}", entry.user_id, e);
        }
    }

    Ok(Json(ServeNextResponse {
        empty: entry.is_none(),
        entry,
    }))
}

async fn complete_current(
    State(state): State<AppState>,
    Json(req): Json<CompleteRequest>,
) -> Result<Json<QueueEntry>, ApiError> {
    ensure_admin(&state, &req.admin_id)?;

    // Without an explicit ticket id, finish whoever is being served
    let entry_id = match req.entry_id {
        Some(id) => id,
        None => state
            .queue
            .list_active()?
            .into_iter()
            .find(|e| e.status == QueueStatus::Processing)
            .map(|e| e.id)
            .ok_or_else(|| ServiceError::NotFound("no customer is being served".to_string()))?,
    };

    let entry = state.queue.complete(entry_id)?;

    if let Err(e) = state
        .notifier
        .notify(&entry.user_id, NotificationIntent::QueueCompleted)
        .await
    {
        tracing::warn!("⚠️  Failed to notify {}: {:#}", entry.user_id, e);
    }

    Ok(Json(entry))
}

async fn list_queue(
    State(state): State<AppState>,
    Query(params): Query<AdminQuery>,
) -> Result<Json<QueueListResponse>, ApiError> {
    ensure_admin(&state, &params.admin_id)?;

    let entries = state.queue.list_active()?;
    Ok(Json(QueueListResponse {
        count: entries.len(),
        entries,
    }))
}

async fn register_admin(
    State(state): State<AppState>,
    Json(req): Json<RegisterAdminRequest>,
) -> Result<Json<RegisterAdminResponse>, ApiError> {
    ensure_admin(&state, &req.admin_id)?;

    let added = state
        .db
        .add_admin(&req.user_id, req.display_name.as_deref())?;
    Ok(Json(RegisterAdminResponse { added }))
}

/// Role check against the configured id list and the persisted registry.
/// Authentication of the caller is out of scope.
fn ensure_admin(state: &AppState, user_id: &str) -> Result<(), ApiError> {
    if state.admin_user_ids.iter().any(|id| id == user_id) || state.db.is_admin(user_id)? {
        return Ok(());
    }
    Err(ApiError::Forbidden)
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
struct ConversionQuery {
    amount: f64,
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: String,
}

#[derive(Deserialize)]
struct AdminQuery {
    admin_id: String,
}

#[derive(Deserialize)]
struct UserRequest {
    user_id: String,
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct CreateAlertRequest {
    user_id: String,
    display_name: Option<String>,
    target_rate: f64,
    condition: Option<AlertCondition>,
}

#[derive(Deserialize)]
struct SetRateRequest {
    admin_id: String,
    buying: f64,
    selling: Option<f64>,
}

#[derive(Deserialize)]
struct DeriveRateRequest {
    admin_id: String,
    provider: Option<String>,
}

#[derive(Deserialize)]
struct AdminRequest {
    admin_id: String,
}

#[derive(Deserialize)]
struct CompleteRequest {
    admin_id: String,
    entry_id: Option<i64>,
}

#[derive(Deserialize)]
struct RegisterAdminRequest {
    admin_id: String,
    user_id: String,
    display_name: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    quote_count: usize,
    last_refresh: Option<String>,
}

#[derive(Serialize)]
struct RatesResponse {
    house_rate: Option<CustomRate>,
    best_buying: Option<Quote>,
    quotes: Vec<Quote>,
}

#[derive(Serialize)]
struct QueueStatusResponse {
    in_queue: bool,
    position: Option<i64>,
    ahead: Option<i64>,
}

#[derive(Serialize)]
struct LeaveResponse {
    left: bool,
}

#[derive(Serialize)]
struct CancelResponse {
    cancelled: bool,
}

#[derive(Serialize)]
struct ServeNextResponse {
    empty: bool,
    entry: Option<QueueEntry>,
}

#[derive(Serialize)]
struct QueueListResponse {
    count: usize,
    entries: Vec<QueueEntry>,
}

#[derive(Serialize)]
struct RegisterAdminResponse {
    added: bool,
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    Service(ServiceError),
    Internal(anyhow::Error),
    BadRequest(String),
    Forbidden,
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Service(ServiceError::NoData) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "no usable rate data available yet".to_string(),
            ),
            ApiError::Service(ServiceError::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            ApiError::Service(ServiceError::ServiceBusy) => (
                StatusCode::CONFLICT,
                "a customer is already being served".to_string(),
            ),
            ApiError::Service(ServiceError::NotFound(msg)) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Service(ServiceError::Storage(err)) => {
                tracing::error!("Storage error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "admin privileges required".to_string(),
            ),
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: ApiError = ServiceError::NoData.into();
        match err {
            ApiError::Service(ServiceError::NoData) => (),
            _ => panic!("Expected NoData"),
        }

        let err: ApiError = ServiceError::ServiceBusy.into();
        match err {
            ApiError::Service(ServiceError::ServiceBusy) => (),
            _ => panic!("Expected ServiceBusy"),
        }
    }
}
