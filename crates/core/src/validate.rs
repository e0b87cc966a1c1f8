use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Raw creation payload as submitted by a caller.
///
/// Fields deserialize as loose JSON values so one pass over the payload can
/// report every violation, wrong types included, instead of stopping at the
/// first field serde fails to coerce.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateLoanRequest {
    pub borrower_id: Option<Value>,
    pub amount: Option<Value>,
    pub currency: Option<Value>,
    pub term_months: Option<Value>,
    pub interest_rate_apr: Option<Value>,
}

/// A fully validated creation payload ready for persistence.
///
/// `currency` is already normalized to uppercase.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidLoanInput {
    pub borrower_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub term_months: u32,
    pub interest_rate_apr: Option<Decimal>,
}

/// A single field-level rule violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: &'static str,
    pub message: &'static str,
}

impl Violation {
    fn new(field: &'static str, message: &'static str) -> Self {
        Self { field, message }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Aggregate of every violation found in one creation payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    violations: Vec<Violation>,
}

impl ValidationError {
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Violations rendered as `field: message` strings for error bodies.
    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(Violation::to_string).collect()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.messages().join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// Validates a creation payload, accumulating every violation found.
///
/// Pure input-to-result: this function never touches storage.
pub fn validate_create(request: &CreateLoanRequest) -> Result<ValidLoanInput, ValidationError> {
    let mut violations = Vec::new();

    let borrower_id = validate_borrower_id(&request.borrower_id, &mut violations);
    let amount = validate_amount(&request.amount, &mut violations);
    let currency = validate_currency(&request.currency, &mut violations);
    let term_months = validate_term(&request.term_months, &mut violations);
    let interest_rate_apr = validate_interest(&request.interest_rate_apr, &mut violations);

    match (borrower_id, amount, currency, term_months) {
        (Some(borrower_id), Some(amount), Some(currency), Some(term_months))
            if violations.is_empty() =>
        {
            Ok(ValidLoanInput {
                borrower_id,
                amount,
                currency,
                term_months,
                interest_rate_apr,
            })
        }
        _ => Err(ValidationError { violations }),
    }
}

fn validate_borrower_id(value: &Option<Value>, violations: &mut Vec<Violation>) -> Option<Uuid> {
    match value {
        None | Some(Value::Null) => {
            violations.push(Violation::new("borrower_id", "is required"));
            None
        }
        Some(Value::String(raw)) => match Uuid::parse_str(raw.trim()) {
            Ok(id) => Some(id),
            Err(_) => {
                violations.push(Violation::new("borrower_id", "must be a valid UUID"));
                None
            }
        },
        Some(_) => {
            violations.push(Violation::new("borrower_id", "must be a UUID string"));
            None
        }
    }
}

fn validate_amount(value: &Option<Value>, violations: &mut Vec<Violation>) -> Option<Decimal> {
    match value {
        None | Some(Value::Null) => {
            violations.push(Violation::new("amount", "is required"));
            None
        }
        Some(value) => match parse_decimal(value) {
            Some(amount) if amount > Decimal::ZERO => Some(amount),
            Some(_) => {
                violations.push(Violation::new("amount", "must be greater than zero"));
                None
            }
            None => {
                violations.push(Violation::new("amount", "must be a decimal number"));
                None
            }
        },
    }
}

fn validate_currency(value: &Option<Value>, violations: &mut Vec<Violation>) -> Option<String> {
    match value {
        None | Some(Value::Null) => {
            violations.push(Violation::new("currency", "is required"));
            None
        }
        Some(Value::String(raw)) => {
            let code = raw.trim();
            if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
                Some(code.to_ascii_uppercase())
            } else {
                violations.push(Violation::new("currency", "must be a 3-letter code"));
                None
            }
        }
        Some(_) => {
            violations.push(Violation::new("currency", "must be a 3-letter code"));
            None
        }
    }
}

fn validate_term(value: &Option<Value>, violations: &mut Vec<Violation>) -> Option<u32> {
    match value {
        None | Some(Value::Null) => {
            violations.push(Violation::new("term_months", "is required"));
            None
        }
        Some(Value::Number(num)) => match num.as_u64() {
            Some(term) if (1..=u64::from(u32::MAX)).contains(&term) => Some(term as u32),
            _ => {
                violations.push(Violation::new("term_months", "must be a positive integer"));
                None
            }
        },
        Some(_) => {
            violations.push(Violation::new("term_months", "must be a positive integer"));
            None
        }
    }
}

fn validate_interest(value: &Option<Value>, violations: &mut Vec<Violation>) -> Option<Decimal> {
    match value {
        None | Some(Value::Null) => None,
        Some(value) => match parse_decimal(value) {
            Some(rate) if rate >= Decimal::ZERO => Some(rate),
            Some(_) => {
                violations.push(Violation::new("interest_rate_apr", "must not be negative"));
                None
            }
            None => {
                violations.push(Violation::new(
                    "interest_rate_apr",
                    "must be a decimal number",
                ));
                None
            }
        },
    }
}

/// Parses a JSON string or number into an exact decimal.
fn parse_decimal(value: &Value) -> Option<Decimal> {
    let raw = match value {
        Value::String(raw) => raw.trim().to_string(),
        Value::Number(num) => num.to_string(),
        _ => return None,
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
}
