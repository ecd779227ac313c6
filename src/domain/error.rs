use thiserror::Error;

/// Why a single spreadsheet row could not be turned into a domain record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("required field `{field}` is missing")]
    MissingField { field: &'static str },
    #[error("field `{field}` holds `{value}`, which is not a number")]
    InvalidNumber { field: &'static str, value: String },
    #[error("field `{field}` must not be negative, got {value}")]
    Negative { field: &'static str, value: f64 },
}

impl ParseError {
    pub fn missing(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    pub fn invalid_number(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidNumber {
            field,
            value: value.into(),
        }
    }

    pub fn negative(field: &'static str, value: f64) -> Self {
        Self::Negative { field, value }
    }
}
