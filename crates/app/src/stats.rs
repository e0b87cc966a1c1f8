use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};

use crate::context::RequestContext;
use crate::loans::finish;
use crate::problem::ProblemResponse;
use crate::router::AppState;

/// `GET /api/stats` — aggregate statistics over the full ledger.
pub async fn get(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ProblemResponse> {
    let ctx = RequestContext::from_headers(&headers, state.now());
    let result = state
        .loans()
        .stats(&ctx)
        .await
        .map(|view| Json(view).into_response());
    finish(&state, &ctx, "get_stats", result)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::router::{app_router, AppState};
    use crate::telemetry;
    use loan_ledger_storage::Database;

    async fn setup_state() -> (AppState, TempDir) {
        let metrics = telemetry::init_metrics().expect("metrics init");
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("loans.db").display());
        let database = Database::connect(&url).await.expect("connect");
        database.run_migrations().await.expect("migrations");
        (AppState::new(metrics, database), dir)
    }

    async fn fetch_stats(app: &axum::Router) -> Value {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        serde_json::from_slice(&collected.to_bytes()).expect("json body")
    }

    async fn create_loan(app: &axum::Router, amount: &str, currency: &str) {
        let payload = json!({
            "borrower_id": Uuid::new_v4().to_string(),
            "amount": amount,
            "currency": currency,
            "term_months": 12,
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/loans")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn stats_on_an_empty_ledger_are_all_zero() {
        let (state, _dir) = setup_state().await;
        let app = app_router(state);

        let body = fetch_stats(&app).await;
        assert_eq!(body["total_loans"], 0);
        assert_eq!(body["total_amount"], 0.0);
        assert_eq!(body["avg_amount"], 0.0);
        assert_eq!(body["by_status"], json!({}));
        assert_eq!(body["by_currency"], json!({}));
    }

    #[tokio::test]
    async fn stats_aggregate_the_full_ledger() {
        let (state, _dir) = setup_state().await;
        let app = app_router(state);

        create_loan(&app, "100.00", "USD").await;
        create_loan(&app, "200.00", "USD").await;
        create_loan(&app, "50.00", "EUR").await;

        let body = fetch_stats(&app).await;
        assert_eq!(body["total_loans"], 3);
        assert_eq!(body["total_amount"], 350.0);
        let avg = body["avg_amount"].as_f64().expect("avg should be a number");
        assert!((avg - 350.0 / 3.0).abs() < 1e-9);
        assert_eq!(body["by_currency"], json!({ "EUR": 1, "USD": 2 }));
        assert_eq!(body["by_status"], json!({ "pending": 3 }));
    }

    #[tokio::test]
    async fn stats_are_idempotent_between_writes() {
        let (state, _dir) = setup_state().await;
        let app = app_router(state);

        create_loan(&app, "75.25", "CHF").await;

        let first = fetch_stats(&app).await;
        let second = fetch_stats(&app).await;
        assert_eq!(first, second);
    }
}
