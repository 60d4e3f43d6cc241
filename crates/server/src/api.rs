//! JSON API for the approval workflow.
//!
//! Every route except `/api/v1/attestation/status` acts on behalf of the user
//! named in the `x-actor-id` header, resolved through the user directory.
//!
//! - `POST  /api/v1/requests`                        submit a request
//! - `GET   /api/v1/requests`                        requests visible to the actor
//! - `GET   /api/v1/requests/pending`                pending requests for the actor
//! - `GET   /api/v1/requests/{id}`                   one request
//! - `PATCH /api/v1/requests/{id}`                   amend a pending request
//! - `POST  /api/v1/requests/{id}/decision`          stores approve or reject
//! - `POST  /api/v1/requests/{id}/chain`             rebuild a missing chain (admin)
//! - `GET   /api/v1/requests/{id}/approvals`         chain and aggregate status
//! - `GET   /api/v1/requests/{id}/attestations`      attestation records
//! - `GET   /api/v1/approvals`                       stages visible to the actor
//! - `GET   /api/v1/approvals/pending`               the actor's open stages
//! - `POST  /api/v1/approvals/{id}/decision`         decide one stage
//! - `POST  /api/v1/attestations`                    delivery, relocation or damage report
//! - `GET   /api/v1/attestation/status`              attestation mode

use axum::{
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use stockflow_core::attestation::AttestationMode;
use stockflow_core::domain::actor::{Actor, UserId};
use stockflow_core::domain::approval::{ApprovalStage, StageAction, StageId};
use stockflow_core::domain::attestation::{AttestationEvent, AttestationRecord};
use stockflow_core::domain::request::{
    NewRequest, Request, RequestAmendment, RequestId, StoresDecision,
};
use stockflow_core::errors::{ApplicationError, DomainError, InterfaceError};
use stockflow_workflow::{
    AttestationOutcome, ChainBuild, ChainSummary, StageDecision, StoresOutcome, WorkflowServices,
};

pub const ACTOR_HEADER: &str = "x-actor-id";

#[derive(Clone)]
pub struct ApiState {
    pub services: WorkflowServices,
}

pub fn router(services: WorkflowServices) -> Router {
    Router::new()
        .route("/api/v1/requests", post(create_request).get(list_requests))
        .route("/api/v1/requests/pending", get(list_pending_requests))
        .route("/api/v1/requests/{id}", get(get_request).patch(amend_request))
        .route("/api/v1/requests/{id}/decision", post(decide_request))
        .route("/api/v1/requests/{id}/chain", post(ensure_chain))
        .route("/api/v1/requests/{id}/approvals", get(chain_summary))
        .route("/api/v1/requests/{id}/attestations", get(list_attestations))
        .route("/api/v1/approvals", get(list_stages))
        .route("/api/v1/approvals/pending", get(list_pending_stages))
        .route("/api/v1/approvals/{id}/decision", post(decide_stage))
        .route("/api/v1/attestations", post(attest_inventory_event))
        .route("/api/v1/attestation/status", get(attestation_status))
        .with_state(ApiState { services })
}

// ---------------------------------------------------------------------------
// Actor extraction and error mapping
// ---------------------------------------------------------------------------

pub struct CurrentActor(pub Actor);

impl FromRequestParts<ApiState> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ApiState,
    ) -> Result<Self, Self::Rejection> {
        let actor_id = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| UserId(value.to_string()));

        let Some(actor_id) = actor_id else {
            return Err(ApiError::from(ApplicationError::from(DomainError::unauthorized(
                format!("missing `{ACTOR_HEADER}` header"),
            ))));
        };

        Ok(Self(state.services.resolve_actor(&actor_id).await?))
    }
}

/// JSON body whose rejections are reported as `invalid_input`.
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(
        request: axum::extract::Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(request, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::from(ApplicationError::from(
                DomainError::InvalidInput(rejection.body_text()),
            ))),
        }
    }
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub correlation_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

impl From<ApplicationError> for ApiError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        match &value {
            ApplicationError::Domain(domain) => warn!(
                event_name = "api.request.refused",
                correlation_id = %correlation_id,
                kind = domain.kind(),
                error = %domain,
                "request refused"
            ),
            other => error!(
                event_name = "api.request.failed",
                correlation_id = %correlation_id,
                kind = other.kind(),
                error = %other,
                "request failed"
            ),
        }
        Self(value.into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let (status, detail) = match &error {
            InterfaceError::NotFound { message, .. } => (StatusCode::NOT_FOUND, Some(message)),
            InterfaceError::Forbidden { message, .. } => (StatusCode::FORBIDDEN, Some(message)),
            InterfaceError::Conflict { message, .. } => (StatusCode::CONFLICT, Some(message)),
            InterfaceError::BadRequest { message, .. } => (StatusCode::BAD_REQUEST, Some(message)),
            InterfaceError::ServiceUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, None),
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        let body = ErrorEnvelope {
            error: ErrorBody {
                kind: error.kind().to_string(),
                message: error.user_message().to_string(),
                detail: detail.cloned(),
                correlation_id: error.correlation_id().to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StoresDecisionBody {
    pub decision: StoresDecision,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Deserialize)]
pub struct StageDecisionBody {
    pub action: StageAction,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AttestationStatus {
    pub mode: AttestationMode,
    pub simulated: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_request(
    State(state): State<ApiState>,
    CurrentActor(actor): CurrentActor,
    JsonBody(body): JsonBody<NewRequest>,
) -> Result<(StatusCode, Json<Request>), ApiError> {
    let request = state.services.requests.create(&actor, body).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn list_requests(
    State(state): State<ApiState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<Request>> {
    Ok(Json(state.services.requests.list_visible(&actor).await?))
}

async fn list_pending_requests(
    State(state): State<ApiState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<Request>> {
    Ok(Json(state.services.requests.list_pending(&actor).await?))
}

async fn get_request(
    State(state): State<ApiState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Request> {
    Ok(Json(state.services.requests.get(&actor, &RequestId(id)).await?))
}

async fn amend_request(
    State(state): State<ApiState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<RequestAmendment>,
) -> ApiResult<Request> {
    Ok(Json(state.services.requests.amend(&actor, &RequestId(id), body).await?))
}

async fn decide_request(
    State(state): State<ApiState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<StoresDecisionBody>,
) -> ApiResult<StoresOutcome> {
    let outcome = state
        .services
        .requests
        .decide_stores_stage(&actor, &RequestId(id), body.decision, &body.comment)
        .await?;
    Ok(Json(outcome))
}

async fn ensure_chain(
    State(state): State<ApiState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<ChainBuild> {
    Ok(Json(state.services.chains.ensure_chain(&actor, &RequestId(id)).await?))
}

async fn chain_summary(
    State(state): State<ApiState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<ChainSummary> {
    Ok(Json(state.services.stages.chain_summary(&actor, &RequestId(id)).await?))
}

async fn list_attestations(
    State(state): State<ApiState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Vec<AttestationRecord>> {
    let request = state.services.requests.get(&actor, &RequestId(id)).await?;
    Ok(Json(state.services.recorder().records_for_request(&request.id).await?))
}

async fn list_stages(
    State(state): State<ApiState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<ApprovalStage>> {
    Ok(Json(state.services.stages.list_visible(&actor).await?))
}

async fn list_pending_stages(
    State(state): State<ApiState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<ApprovalStage>> {
    Ok(Json(state.services.stages.list_pending(&actor).await?))
}

async fn decide_stage(
    State(state): State<ApiState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<StageDecisionBody>,
) -> ApiResult<StageDecision> {
    let decision = state
        .services
        .stages
        .decide(&actor, &StageId(id), body.action, &body.comment)
        .await?;
    Ok(Json(decision))
}

async fn attest_inventory_event(
    State(state): State<ApiState>,
    CurrentActor(actor): CurrentActor,
    JsonBody(event): JsonBody<AttestationEvent>,
) -> ApiResult<AttestationOutcome> {
    Ok(Json(state.services.attest_inventory_event(&actor, event).await?))
}

async fn attestation_status(State(state): State<ApiState>) -> Json<AttestationStatus> {
    let mode = state.services.recorder().mode();
    Json(AttestationStatus { mode, simulated: mode == AttestationMode::Simulation })
}
