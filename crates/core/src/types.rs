use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a loan application.
///
/// Creation is the only lifecycle operation the ledger supports, so every
/// persisted loan carries [`LoanStatus::Pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
}

impl LoanStatus {
    /// Returns the canonical database representation for the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
        }
    }
}

/// A persisted loan application record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: Uuid,
    pub borrower_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub term_months: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interest_rate_apr: Option<Decimal>,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
}

/// Boundary representation of a loan.
///
/// `amount` and `interest_rate_apr` serialize as exact decimal strings so
/// monetary values never pass through binary floating point on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanView {
    pub id: Uuid,
    pub borrower_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub term_months: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interest_rate_apr: Option<Decimal>,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Loan> for LoanView {
    fn from(loan: Loan) -> Self {
        Self {
            id: loan.id,
            borrower_id: loan.borrower_id,
            amount: loan.amount,
            currency: loan.currency,
            term_months: loan.term_months,
            interest_rate_apr: loan.interest_rate_apr,
            status: loan.status,
            created_at: loan.created_at,
        }
    }
}

/// Aggregate statistics computed over the full loan set.
///
/// Totals stay in exact decimal; breakdown maps carry keys only for values
/// that occur at least once.
#[derive(Debug, Clone, PartialEq)]
pub struct LoanStats {
    pub total_loans: u64,
    pub total_amount: Decimal,
    pub avg_amount: Decimal,
    pub by_status: BTreeMap<String, u64>,
    pub by_currency: BTreeMap<String, u64>,
}

/// Reporting representation of [`LoanStats`].
///
/// Totals are converted to floating point here and only here; the conversion
/// is for reporting and never feeds back into stored amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsView {
    pub total_loans: u64,
    pub total_amount: f64,
    pub avg_amount: f64,
    pub by_status: BTreeMap<String, u64>,
    pub by_currency: BTreeMap<String, u64>,
}

impl From<LoanStats> for StatsView {
    fn from(stats: LoanStats) -> Self {
        Self {
            total_loans: stats.total_loans,
            total_amount: stats.total_amount.to_f64().unwrap_or_default(),
            avg_amount: stats.avg_amount.to_f64().unwrap_or_default(),
            by_status: stats.by_status,
            by_currency: stats.by_currency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_loan() -> Loan {
        Loan {
            id: Uuid::new_v4(),
            borrower_id: Uuid::new_v4(),
            amount: dec!(1250.50),
            currency: "USD".to_string(),
            term_months: 24,
            interest_rate_apr: Some(dec!(4.75)),
            status: LoanStatus::Pending,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn amounts_serialize_as_decimal_strings() {
        let view = LoanView::from(sample_loan());
        let value = serde_json::to_value(&view).expect("view should serialize");

        assert_eq!(value["amount"], "1250.50");
        assert_eq!(value["interest_rate_apr"], "4.75");
        assert_eq!(value["status"], "pending");
    }

    #[test]
    fn absent_interest_rate_is_omitted() {
        let mut loan = sample_loan();
        loan.interest_rate_apr = None;
        let value = serde_json::to_value(LoanView::from(loan)).expect("view should serialize");

        assert!(value.get("interest_rate_apr").is_none());
    }

    #[test]
    fn stats_view_converts_totals_to_floats() {
        let stats = LoanStats {
            total_loans: 3,
            total_amount: dec!(350.00),
            avg_amount: dec!(350.00) / dec!(3),
            by_status: [("pending".to_string(), 3)].into_iter().collect(),
            by_currency: [("USD".to_string(), 2), ("EUR".to_string(), 1)]
                .into_iter()
                .collect(),
        };

        let view = StatsView::from(stats);
        assert_eq!(view.total_amount, 350.0);
        assert!((view.avg_amount - 350.0 / 3.0).abs() < 1e-9);
        assert_eq!(view.by_currency.get("USD"), Some(&2));
    }

    #[test]
    fn status_round_trips_through_its_canonical_form() {
        assert_eq!(LoanStatus::Pending.as_str(), "pending");
        let value = serde_json::to_value(LoanStatus::Pending).expect("status should serialize");
        assert_eq!(value, "pending");
    }
}
