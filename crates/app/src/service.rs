use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use loan_ledger_core::types::{LoanView, StatsView};
use loan_ledger_core::validate::{validate_create, CreateLoanRequest, ValidationError};
use loan_ledger_storage::{Database, LoanRepositoryError, StorageError};

use crate::context::RequestContext;
use crate::problem::ProblemResponse;

/// Boundary operations over the loan ledger.
///
/// Each operation opens exactly one transactional scope, commits on success
/// and relies on the scope's rollback-on-drop for every failure path.
#[derive(Clone)]
pub struct LoanService {
    database: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl LoanService {
    pub fn new(database: Database, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        Self { database, clock }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Lists every loan, newest first.
    pub async fn list_loans(&self, ctx: &RequestContext) -> Result<Vec<LoanView>, ServiceError> {
        let repo = self.database.loans();
        let mut scope = repo.begin().await?;
        let loans = repo.list_all(scope.tx()).await?;
        scope.commit().await?;

        info!(request_id = %ctx.request_id(), count = loans.len(), "listed loans");
        Ok(loans.into_iter().map(LoanView::from).collect())
    }

    /// Fetches one loan by its textual id.
    ///
    /// A malformed id is rejected before any storage access.
    pub async fn get_loan(
        &self,
        ctx: &RequestContext,
        id_text: &str,
    ) -> Result<LoanView, ServiceError> {
        let id = Uuid::parse_str(id_text)
            .map_err(|_| ServiceError::InvalidIdentifier(id_text.to_string()))?;

        let repo = self.database.loans();
        let mut scope = repo.begin().await?;
        let loan = repo.fetch_by_id(scope.tx(), id).await?;
        scope.commit().await?;

        match loan {
            Some(loan) => {
                info!(request_id = %ctx.request_id(), loan_id = %id, "retrieved loan");
                Ok(LoanView::from(loan))
            }
            None => {
                warn!(request_id = %ctx.request_id(), loan_id = %id, "loan not found");
                Err(ServiceError::NotFound(id))
            }
        }
    }

    /// Validates and persists a new loan application.
    pub async fn create_loan(
        &self,
        ctx: &RequestContext,
        request: CreateLoanRequest,
    ) -> Result<LoanView, ServiceError> {
        let input = validate_create(&request).map_err(|err| {
            counter!("loan_validation_failures_total").increment(1);
            warn!(
                request_id = %ctx.request_id(),
                violations = err.violations().len(),
                "rejected loan payload"
            );
            ServiceError::Validation(err)
        })?;

        let repo = self.database.loans();
        let mut scope = repo.begin().await?;
        let loan = repo.insert(scope.tx(), &input, self.now()).await?;
        scope.commit().await?;

        counter!("loans_created_total").increment(1);
        info!(
            request_id = %ctx.request_id(),
            loan_id = %loan.id,
            borrower_id = %loan.borrower_id,
            currency = %loan.currency,
            "created loan"
        );
        Ok(LoanView::from(loan))
    }

    /// Computes aggregate statistics over the full loan set.
    pub async fn stats(&self, ctx: &RequestContext) -> Result<StatsView, ServiceError> {
        let repo = self.database.loans();
        let mut scope = repo.begin().await?;
        let stats = repo.aggregate(scope.tx()).await?;
        scope.commit().await?;

        info!(
            request_id = %ctx.request_id(),
            total_loans = stats.total_loans,
            status_count = stats.by_status.len(),
            currency_count = stats.by_currency.len(),
            "computed loan statistics"
        );
        Ok(StatsView::from(stats))
    }
}

/// Errors the boundary operations surface to the routing layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid loan payload: {0}")]
    Validation(ValidationError),
    #[error("invalid loan id: {0}")]
    InvalidIdentifier(String),
    #[error("loan {0} not found")]
    NotFound(Uuid),
    #[error("loan repository error: {0}")]
    Repository(#[from] LoanRepositoryError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<ServiceError> for ProblemResponse {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(err) => {
                ProblemResponse::new(StatusCode::BAD_REQUEST, "validation_failed", err.to_string())
                    .with_violations(err.messages())
            }
            ServiceError::InvalidIdentifier(raw) => ProblemResponse::new(
                StatusCode::BAD_REQUEST,
                "invalid_loan_id",
                format!("'{raw}' is not a valid loan id"),
            ),
            ServiceError::NotFound(id) => ProblemResponse::new(
                StatusCode::NOT_FOUND,
                "loan_not_found",
                format!("no loan exists with id {id}"),
            ),
            ServiceError::Repository(err) => ProblemResponse::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "storage_unavailable",
                err.to_string(),
            ),
            ServiceError::Storage(err) => ProblemResponse::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "storage_unavailable",
                err.to_string(),
            ),
        }
    }
}
