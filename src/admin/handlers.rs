use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::controller::{CapacityVersion, ControllerError, CurrentRecord, FleetStatus, MemberView};
use crate::fleet::MemberId;
use crate::routing::RoutingRule;
use crate::state::VersionId;

const DEFAULT_ACTOR: &str = "admin-api";

/// Controller errors as HTTP responses.
pub struct ApiError(ControllerError);

impl From<ControllerError> for ApiError {
    fn from(e: ControllerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ControllerError::LockUnavailable { .. } => StatusCode::LOCKED,
            ControllerError::StaleWrite(_) => StatusCode::CONFLICT,
            ControllerError::InvalidCapacity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ControllerError::Store(crate::state::StoreError::VersionNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Admin request failed");
        }
        (
            status,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SetDesiredRequest {
    pub desired: u32,
    pub actor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub version: VersionId,
    pub actor: Option<String>,
}

#[derive(Serialize)]
pub struct RoutesView {
    pub rules: Vec<RoutingRule>,
    pub target_group: String,
    pub healthy: Vec<MemberId>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<FleetStatus> {
    Json(state.controller.status())
}

pub async fn get_members(State(state): State<AdminState>) -> Json<Vec<MemberView>> {
    Json(state.controller.members())
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<RoutesView> {
    let registry = state.controller.registry();
    Json(RoutesView {
        rules: state.router.rules().rules().to_vec(),
        target_group: registry.group().to_string(),
        healthy: registry.current_healthy_set().ids(),
    })
}

pub async fn get_capacity(State(state): State<AdminState>) -> Json<CurrentRecord> {
    Json(state.controller.current_record().as_ref().clone())
}

pub async fn get_capacity_versions(
    State(state): State<AdminState>,
) -> Result<Json<Vec<CapacityVersion>>, ApiError> {
    Ok(Json(state.controller.capacity_history()?))
}

pub async fn put_capacity(
    State(state): State<AdminState>,
    Json(request): Json<SetDesiredRequest>,
) -> Result<Json<CurrentRecord>, ApiError> {
    let actor = request.actor.as_deref().unwrap_or(DEFAULT_ACTOR);
    let updated = state
        .controller
        .set_desired_capacity(request.desired, actor)?;
    Ok(Json(updated.as_ref().clone()))
}

pub async fn post_rollback(
    State(state): State<AdminState>,
    Json(request): Json<RollbackRequest>,
) -> Result<Json<CurrentRecord>, ApiError> {
    let actor = request.actor.as_deref().unwrap_or(DEFAULT_ACTOR);
    let updated = state.controller.rollback_capacity(request.version, actor)?;
    Ok(Json(updated.as_ref().clone()))
}
