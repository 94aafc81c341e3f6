use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CashAppError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (bad timeout, unknown policy, etc.).
    ConfigValidation(String),
    /// A static lookup table is incomplete or inconsistent.
    TableValidation(String),
    /// Payment failed boundary validation and cannot enter a batch.
    InvalidPayment { payment_id: String, reason: String },
    /// Missing required column in CSV input.
    MissingColumn { column: String },
    /// A CSV cell could not be parsed into its field type.
    FieldParse { record_id: String, field: String, value: String },
    /// Batch refused a membership change.
    BatchRejected { batch_id: String, reason: String },
    /// Batch status transition not allowed.
    InvalidTransition { batch_id: String, from: String, to: String },
    /// Line item not present in the batch.
    UnknownLineItem { batch_id: String, payment_id: String },
    /// IO error (file read, etc.).
    Io(String),
    /// JSON (de)serialization error.
    Json(String),
}

impl fmt::Display for CashAppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::TableValidation(msg) => write!(f, "lookup table error: {msg}"),
            Self::InvalidPayment { payment_id, reason } => {
                write!(f, "payment '{payment_id}': {reason}")
            }
            Self::MissingColumn { column } => write!(f, "missing column '{column}'"),
            Self::FieldParse { record_id, field, value } => {
                write!(f, "record '{record_id}': cannot parse {field} '{value}'")
            }
            Self::BatchRejected { batch_id, reason } => {
                write!(f, "batch '{batch_id}' rejected change: {reason}")
            }
            Self::InvalidTransition { batch_id, from, to } => {
                write!(f, "batch '{batch_id}': cannot move from {from} to {to}")
            }
            Self::UnknownLineItem { batch_id, payment_id } => {
                write!(f, "batch '{batch_id}' has no line for payment '{payment_id}'")
            }
            Self::Io(msg) => write!(f, "IO error: {msg}"),
            Self::Json(msg) => write!(f, "JSON error: {msg}"),
        }
    }
}

impl std::error::Error for CashAppError {}

impl From<serde_json::Error> for CashAppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value.to_string())
    }
}

impl From<std::io::Error> for CashAppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}
