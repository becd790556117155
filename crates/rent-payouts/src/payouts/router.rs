use std::sync::Arc;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use super::calculator::PayoutCalculator;
use super::domain::{
    BatchId, BatchMetadata, BatchStatus, BatchType, PayoutCalculation, RecipientType,
};
use super::orchestrator::PayoutOrchestrator;
use crate::error::PayoutError;

pub const OPERATOR_ID_HEADER: &str = "x-operator-id";
pub const OPERATOR_ROLE_HEADER: &str = "x-operator-role";

/// Shared handler state.
pub struct PayoutApi {
    pub calculator: Arc<PayoutCalculator>,
    pub orchestrator: Arc<PayoutOrchestrator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OperatorRole {
    Viewer,
    Finance,
    Admin,
}

impl OperatorRole {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "viewer" => Some(OperatorRole::Viewer),
            "finance" => Some(OperatorRole::Finance),
            "admin" => Some(OperatorRole::Admin),
            _ => None,
        }
    }
}

/// Caller identity taken from the operator headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub id: String,
    pub role: OperatorRole,
}

impl Operator {
    fn require(&self, role: OperatorRole) -> Result<(), PayoutError> {
        if self.role >= role {
            Ok(())
        } else {
            Err(PayoutError::Forbidden(format!(
                "operator {} lacks the {role:?} role",
                self.id
            )))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Operator
where
    S: Send + Sync,
{
    type Rejection = PayoutError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };
        let id = header(OPERATOR_ID_HEADER)
            .ok_or_else(|| PayoutError::Forbidden("operator identity required".to_string()))?;
        let role = header(OPERATOR_ROLE_HEADER)
            .and_then(OperatorRole::parse)
            .ok_or_else(|| PayoutError::Forbidden("operator role required".to_string()))?;
        Ok(Operator {
            id: id.to_string(),
            role,
        })
    }
}

/// Operator endpoints for calculating, running and approving payouts.
pub fn payout_router(api: Arc<PayoutApi>) -> Router {
    Router::new()
        .route("/api/v1/payouts/calculations", post(calculate_handler))
        .route(
            "/api/v1/payouts/batches",
            post(create_batch_handler).get(list_batches_handler),
        )
        .route("/api/v1/payouts/batches/:batch_id", get(batch_handler))
        .route(
            "/api/v1/payouts/batches/:batch_id/approve",
            post(approve_batch_handler),
        )
        .route(
            "/api/v1/payouts/batches/:batch_id/items/:recipient_id/approve",
            post(approve_item_handler),
        )
        .route("/api/v1/payouts/stats", get(stats_handler))
        .route("/api/v1/payouts/providers", get(providers_handler))
        .with_state(api)
}

#[derive(Debug, Deserialize)]
pub struct CalculationRequest {
    pub recipient_type: RecipientType,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

fn default_batch_type() -> BatchType {
    BatchType::Manual
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub batch_id: Option<String>,
    pub calculations: Vec<PayoutCalculation>,
    #[serde(default = "default_batch_type")]
    pub batch_type: BatchType,
    #[serde(default)]
    pub triggered_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchFilter {
    #[serde(default)]
    pub status: Option<String>,
}

/// Malformed bodies are validation failures like any other bad input.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, PayoutError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| PayoutError::Validation(rejection.body_text()))
}

pub(crate) async fn calculate_handler(
    State(api): State<Arc<PayoutApi>>,
    operator: Operator,
    payload: Result<Json<CalculationRequest>, JsonRejection>,
) -> Response {
    if let Err(err) = operator.require(OperatorRole::Finance) {
        return err.into_response();
    }
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };

    match api
        .calculator
        .calculate_pending_payouts(request.recipient_type, request.start_date, request.end_date)
        .await
    {
        Ok(calculations) => {
            let total: Decimal = calculations.iter().map(|calc| calc.amount).sum();
            let payload = json!({
                "recipient_type": request.recipient_type,
                "count": calculations.len(),
                "total_amount": total,
                "calculations": calculations,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn create_batch_handler(
    State(api): State<Arc<PayoutApi>>,
    operator: Operator,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> Response {
    if let Err(err) = operator.require(OperatorRole::Finance) {
        return err.into_response();
    }
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };

    let mut metadata = BatchMetadata::new(
        request.batch_type,
        request.triggered_by.unwrap_or_else(|| operator.id.clone()),
    );
    metadata.notes = request.notes;
    let batch_id = request.batch_id.map(BatchId);

    match api
        .orchestrator
        .process_payout_batch(request.calculations, metadata, batch_id)
        .await
    {
        Ok(batch) => {
            let status = if batch.metadata.awaiting_approval {
                StatusCode::ACCEPTED
            } else {
                StatusCode::OK
            };
            (status, Json(batch.view())).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn list_batches_handler(
    State(api): State<Arc<PayoutApi>>,
    _operator: Operator,
    Query(filter): Query<BatchFilter>,
) -> Response {
    let status = match filter.status.as_deref() {
        None => None,
        Some(raw) => match BatchStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return PayoutError::Validation(format!("unknown batch status '{raw}'"))
                    .into_response()
            }
        },
    };

    match api.orchestrator.list_batches(status).await {
        Ok(batches) => {
            let views: Vec<_> = batches.iter().map(|batch| batch.view()).collect();
            (StatusCode::OK, Json(json!({ "batches": views }))).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn batch_handler(
    State(api): State<Arc<PayoutApi>>,
    _operator: Operator,
    Path(batch_id): Path<String>,
) -> Response {
    match api.orchestrator.get_batch(&BatchId(batch_id)).await {
        Ok(batch) => (StatusCode::OK, Json(batch.view())).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn approve_batch_handler(
    State(api): State<Arc<PayoutApi>>,
    operator: Operator,
    Path(batch_id): Path<String>,
) -> Response {
    if let Err(err) = operator.require(OperatorRole::Admin) {
        return err.into_response();
    }

    match api
        .orchestrator
        .approve_batch(&BatchId(batch_id), &operator.id)
        .await
    {
        Ok(batch) => (StatusCode::OK, Json(batch.view())).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn approve_item_handler(
    State(api): State<Arc<PayoutApi>>,
    operator: Operator,
    Path((batch_id, recipient_id)): Path<(String, String)>,
) -> Response {
    if let Err(err) = operator.require(OperatorRole::Admin) {
        return err.into_response();
    }

    match api
        .orchestrator
        .approve_payout(&BatchId(batch_id), &recipient_id, &operator.id)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn stats_handler(
    State(api): State<Arc<PayoutApi>>,
    _operator: Operator,
) -> Response {
    match api.orchestrator.payout_stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn providers_handler(
    State(api): State<Arc<PayoutApi>>,
    _operator: Operator,
) -> Response {
    let integrations = api.orchestrator.registry().integration_stats();
    match api.orchestrator.config().get_all_active_configs().await {
        Ok(configs) => {
            let services: Vec<_> = configs.iter().map(|config| config.view()).collect();
            let payload = json!({
                "integrations": integrations,
                "services": services,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(err) => err.into_response(),
    }
}
