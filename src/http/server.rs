//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up middleware (ingress filter, tracing, timeout, request ID)
//! - Bind server to listener, stop on the shutdown broadcast
//! - Dispatch requests to the traffic router
//! - Forward requests to the chosen fleet member
//! - Observability (metrics, correlation IDs)

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::RoutingConfig;
use crate::http::middleware::{ingress_middleware, IngressState};
use crate::http::request::{
    propagate_request_id_layer, request_id, route_request, set_request_id_layer, upstream_uri,
};
use crate::observability::metrics;
use crate::routing::{FixedResponse, RouteDecision, RouteError, TrafficRouter};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<TrafficRouter>,
    pub client: Client<HttpConnector, Body>,
}

/// Data-plane listener.
pub struct HttpServer {
    state: AppState,
    config: RoutingConfig,
}

impl HttpServer {
    pub fn new(router: Arc<TrafficRouter>, config: RoutingConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            state: AppState { router, client },
            config,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(&self, port: u16) -> Router {
        let ingress = IngressState {
            policy: Arc::new(self.config.ingress.clone()),
            port,
        };
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(self.state.clone())
            .layer(middleware::from_fn_with_state(ingress, ingress_middleware))
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(propagate_request_id_layer())
                    .layer(TimeoutLayer::new(Duration::from_secs(
                        self.config.request_timeout_secs,
                    ))),
            )
    }

    /// Serve on `listener` until the shutdown broadcast fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Router listening");

        let app = self
            .build_router(addr.port())
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("Router stopped");
        Ok(())
    }
}

fn fixed_response(response: &FixedResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, response.content_type.clone())],
        response.body.clone(),
    )
        .into_response()
}

/// Route the request, then either answer it directly or forward it to the
/// selected member.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let request_id = request_id(request.headers()).to_string();
    let decision = state
        .router
        .route(&route_request(request.headers(), request.uri()));

    let (group, member) = match decision {
        Ok(RouteDecision::Forward { group, member, .. }) => (group, member),
        Ok(RouteDecision::Fixed { priority, response }) => {
            tracing::debug!(request_id = %request_id, priority, status = response.status, "Fixed response");
            metrics::record_request(response.status, start);
            return fixed_response(&response);
        }
        Err(RouteError::NoHealthyTargets { group }) => {
            tracing::warn!(request_id = %request_id, group = %group, "No healthy targets");
            metrics::record_request(503, start);
            return (StatusCode::SERVICE_UNAVAILABLE, "No healthy targets").into_response();
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Routing failed");
            metrics::record_request(500, start);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Routing failed").into_response();
        }
    };

    // counted until the member's response headers arrive
    let guard = member.begin_request();
    let (mut parts, body) = request.into_parts();
    parts.uri = match upstream_uri(&parts.uri, guard.address) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Failed to build upstream URI");
            metrics::record_request(500, start);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Bad upstream address").into_response();
        }
    };

    tracing::debug!(
        request_id = %request_id,
        group = %group,
        member = %guard.id,
        uri = %parts.uri,
        "Forwarding request"
    );

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            metrics::record_request(response.status().as_u16(), start);
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, member = %guard.id, error = %e, "Upstream error");
            metrics::record_request(502, start);
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}
