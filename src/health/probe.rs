//! Health probes.
//!
//! # Responsibilities
//! - Issue one check against a member over HTTP or TCP
//! - Classify the result as success or a typed failure
//!
//! # Design Decisions
//! - Probes carry no deadline of their own; the checker wraps every call in
//!   a timeout so all protocols time out the same way
//! - HTTP success is decided by a status matcher ("200", "200-299,302")

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::config::schema::{HealthCheckConfig, ProbeProtocol};
use crate::fleet::FleetMember;

/// Why a probe failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("invalid probe request: {0}")]
    Request(String),
}

/// A single health check against one member.
#[async_trait]
pub trait Probe: Send + Sync + fmt::Debug {
    async fn check(&self, member: &FleetMember) -> Result<(), ProbeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid status matcher {0:?}")]
pub struct InvalidMatcher(String);

/// Set of inclusive status ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMatcher(Vec<(u16, u16)>);

impl StatusMatcher {
    pub fn matches(&self, status: u16) -> bool {
        self.0.iter().any(|(lo, hi)| (*lo..=*hi).contains(&status))
    }
}

impl FromStr for StatusMatcher {
    type Err = InvalidMatcher;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidMatcher(s.to_string());
        let parse = |code: &str| -> Result<u16, InvalidMatcher> {
            match code.trim().parse::<u16>() {
                Ok(c) if (100..=599).contains(&c) => Ok(c),
                _ => Err(invalid()),
            }
        };

        let mut ranges = Vec::new();
        for part in s.split(',') {
            let range = match part.split_once('-') {
                Some((lo, hi)) => (parse(lo)?, parse(hi)?),
                None => {
                    let code = parse(part)?;
                    (code, code)
                }
            };
            if range.0 > range.1 {
                return Err(invalid());
            }
            ranges.push(range);
        }
        Ok(Self(ranges))
    }
}

/// `GET <path>` against the member.
pub struct HttpProbe {
    client: Client<HttpConnector, Body>,
    path: String,
    matcher: StatusMatcher,
}

impl HttpProbe {
    pub fn new(path: impl Into<String>, matcher: StatusMatcher) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            path: path.into(),
            matcher,
        }
    }
}

impl fmt::Debug for HttpProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProbe")
            .field("path", &self.path)
            .field("matcher", &self.matcher)
            .finish()
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self, member: &FleetMember) -> Result<(), ProbeError> {
        let url = member
            .url_for(&self.path)
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let request = Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header("user-agent", "fleet-controller-health-check")
            .body(Body::empty())
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ProbeError::Connect(e.to_string()))?;

        let status = response.status().as_u16();
        if self.matcher.matches(status) {
            Ok(())
        } else {
            Err(ProbeError::Status(status))
        }
    }
}

/// TCP connect succeeds.
#[derive(Debug, Default)]
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self, member: &FleetMember) -> Result<(), ProbeError> {
        TcpStream::connect(member.address)
            .await
            .map(drop)
            .map_err(|e| ProbeError::Connect(e.to_string()))
    }
}

/// Build the probe described by the health check section.
pub fn build_probe(config: &HealthCheckConfig) -> Result<Arc<dyn Probe>, InvalidMatcher> {
    Ok(match config.protocol {
        ProbeProtocol::Http => Arc::new(HttpProbe::new(
            config.path.clone(),
            config.matcher.parse()?,
        )),
        ProbeProtocol::Tcp => Arc::new(TcpProbe),
    })
}
