use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tracing::{error, info};

use loan_ledger_storage::Database;

use crate::context::RequestContext;
use crate::service::LoanService;
use crate::{loans, stats, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    loans: LoanService,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database) -> Self {
        let clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> = Arc::new(Utc::now);
        let loans = LoanService::new(storage.clone(), clock.clone());
        Self {
            metrics,
            storage,
            clock,
            loans,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock.clone();
        self.loans = LoanService::new(self.storage.clone(), clock);
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn loans(&self) -> &LoanService {
        &self.loans
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/healthz/db", get(health_db))
        .route("/metrics", get(metrics))
        .route("/api/loans", get(loans::list).post(loans::create))
        .route("/api/loans/:id", get(loans::get))
        .route("/api/stats", get(stats::get))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn health_db(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let ctx = RequestContext::from_headers(&headers, state.now());
    let probe = state.storage().ping().await;
    let elapsed = ctx.elapsed_seconds(state.now());

    match probe {
        Ok(()) => {
            info!(
                request_id = %ctx.request_id(),
                duration_seconds = elapsed,
                "database probe succeeded"
            );
            Json(json!({ "status": "ok", "duration_seconds": elapsed })).into_response()
        }
        Err(err) => {
            error!(request_id = %ctx.request_id(), error = %err, "database probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap()
}
