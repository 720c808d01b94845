use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One attempted upstream in a request's fan-out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamAttempt {
    pub server: String,
    pub attempt: u32,
    pub rtt_ms: Option<f64>,
    pub error: Option<String>,
}

/// Where the answer ultimately came from: an upstream address,
/// `"cache"`, or `"custom"`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseSummary {
    pub source: String,
    pub rcode: String,
    pub answer_count: usize,
    pub rtt_ms: f64,
}

/// Terminal outcome of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Success,
    CacheHit,
    CustomResolution,
    AllUpstreamsFailed,
    MalformedQuery,
    RateLimited,
}

impl RequestStatus {
    /// Whether the client received a usable answer, used by
    /// `top_clients`' success-rate aggregate and `overview`'s
    /// `successful` count.
    pub fn is_successful(self) -> bool {
        matches!(
            self,
            RequestStatus::Success | RequestStatus::CacheHit | RequestStatus::CustomResolution
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestSummary {
    pub client_addr: String,
    pub query_name: String,
    pub query_type: String,
    pub query_id: u16,
}

/// The unit written per request, immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub uuid: String,
    pub timestamp: DateTime<Utc>,
    pub request: RequestSummary,
    pub upstreams: Vec<UpstreamAttempt>,
    pub response: Option<ResponseSummary>,
    pub answers: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub status: RequestStatus,
    pub duration_ms: f64,
    pub cache_hit: bool,
}

impl LogRecord {
    /// An 8-hex-char opaque id, unique per request.
    pub fn new_uuid() -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }
}
