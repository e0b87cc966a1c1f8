use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics::{counter, histogram};

use loan_ledger_core::validate::CreateLoanRequest;

use crate::context::RequestContext;
use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::service::ServiceError;

/// `GET /api/loans` — every loan, newest first.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ProblemResponse> {
    let ctx = RequestContext::from_headers(&headers, state.now());
    let result = state
        .loans()
        .list_loans(&ctx)
        .await
        .map(|loans| Json(loans).into_response());
    finish(&state, &ctx, "list_loans", result)
}

/// `GET /api/loans/:id` — one loan by id.
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ProblemResponse> {
    let ctx = RequestContext::from_headers(&headers, state.now());
    let result = state
        .loans()
        .get_loan(&ctx, &id)
        .await
        .map(|view| Json(view).into_response());
    finish(&state, &ctx, "get_loan", result)
}

/// `POST /api/loans` — validate and record a new loan application.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    let ctx = RequestContext::from_headers(&headers, state.now());

    let request: CreateLoanRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            counter!("api_requests_total", "endpoint" => "create_loan", "result" => "error")
                .increment(1);
            return Err(ProblemResponse::new(
                StatusCode::BAD_REQUEST,
                "invalid_json",
                format!("failed to parse payload: {err}"),
            ));
        }
    };

    let result = state
        .loans()
        .create_loan(&ctx, request)
        .await
        .map(|view| (StatusCode::CREATED, Json(view)).into_response());
    finish(&state, &ctx, "create_loan", result)
}

/// Records the per-endpoint outcome metrics and maps service errors to
/// problem responses.
pub(crate) fn finish(
    state: &AppState,
    ctx: &RequestContext,
    endpoint: &'static str,
    result: Result<Response, ServiceError>,
) -> Result<Response, ProblemResponse> {
    let outcome = if result.is_ok() { "ok" } else { "error" };
    counter!("api_requests_total", "endpoint" => endpoint, "result" => outcome).increment(1);
    histogram!("api_request_seconds", "endpoint" => endpoint)
        .record(ctx.elapsed_seconds(state.now()));
    result.map_err(ProblemResponse::from)
}
