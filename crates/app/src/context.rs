use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Header callers use to supply their own correlation identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation context tying together every log line of one operation.
///
/// Handlers build the context at the top of each inbound operation; the
/// service receives it as an opaque value and never creates its own.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    started_at: DateTime<Utc>,
}

impl RequestContext {
    /// Adopts the caller-supplied `X-Request-ID` or generates a fresh one.
    pub fn from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Self {
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            request_id,
            started_at: now,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Seconds elapsed since the operation started, for latency reporting.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}
