//! Listener ingress filter.
//! Rejects connections whose source is not allowed by the listener's permission set.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use crate::provision::{NetworkPolicy, Protocol};

#[derive(Debug, Clone)]
pub struct IngressState {
    pub policy: Arc<NetworkPolicy>,
    /// Local port the listener is bound to.
    pub port: u16,
}

pub async fn ingress_middleware(
    State(state): State<IngressState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !state.policy.allows_ingress(Protocol::Tcp, peer.ip(), state.port) {
        warn!(peer = %peer, port = state.port, "Ingress denied");
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }
    next.run(req).await
}
