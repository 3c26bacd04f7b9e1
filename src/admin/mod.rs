//! Operator API.
//!
//! Read endpoints expose fleet, member, routing and capacity-history state;
//! the two write endpoints go through the controller's locked
//! read-modify-write path. Every route requires the bearer API key.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::controller::CapacityController;
use crate::routing::TrafficRouter;

#[derive(Clone)]
pub struct AdminState {
    pub controller: Arc<CapacityController>,
    pub router: Arc<TrafficRouter>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/members", get(get_members))
        .route("/admin/routes", get(get_routes))
        .route("/admin/capacity", get(get_capacity).put(put_capacity))
        .route("/admin/capacity/versions", get(get_capacity_versions))
        .route("/admin/capacity/rollback", post(post_rollback))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
