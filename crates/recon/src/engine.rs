use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::batch::PaymentBatch;
use crate::classify::classify_in_place;
use crate::config::{CashAppConfig, CsvConfig};
use crate::error::CashAppError;
use crate::evidence::{compute_summary, ExceptionSummary};
use crate::model::Payment;

/// Identity of the batch a run assembles.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub batch_id: String,
    pub batch_name: String,
    pub posting_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub payment_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashAppResult {
    pub meta: RunMeta,
    pub summary: ExceptionSummary,
    /// How many payments each classifier rule claimed.
    pub rules: BTreeMap<String, usize>,
    pub rejected: Vec<Rejection>,
    pub batch: PaymentBatch,
    pub payments: Vec<Payment>,
}

/// Classify every payment, then assemble the accepted ones into one batch.
/// A payment that fails validation is reported in `rejected`; it does not
/// abort the run.
pub fn run(
    config: &CashAppConfig,
    mut payments: Vec<Payment>,
    options: &BatchOptions,
) -> Result<CashAppResult, CashAppError> {
    config.validate()?;

    let mut rules: BTreeMap<String, usize> = BTreeMap::new();
    for payment in payments.iter_mut() {
        let rule = classify_in_place(payment);
        let key = serde_json::to_value(rule)?
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{rule:?}"));
        *rules.entry(key).or_insert(0) += 1;
    }

    let mut batch = PaymentBatch::from_config(
        options.batch_id.clone(),
        options.batch_name.clone(),
        options.posting_date,
        &config.batch,
    );
    let mut rejected = Vec::new();
    for payment in &payments {
        if let Err(e) = batch.add_payment(payment) {
            log::warn!("payment {} rejected: {e}", payment.id);
            rejected.push(Rejection { payment_id: payment.id.clone(), error: e.to_string() });
        }
    }

    let summary = compute_summary(&payments, batch.line_items());
    log::info!(
        "run '{}': {} payment(s), {} exception(s), {} rejected",
        config.name,
        payments.len(),
        summary.exceptions,
        rejected.len()
    );

    Ok(CashAppResult {
        meta: RunMeta {
            config_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
        },
        summary,
        rules,
        rejected,
        batch,
        payments,
    })
}

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

pub fn load_payments_json(input: &str) -> Result<Vec<Payment>, CashAppError> {
    Ok(serde_json::from_str(input)?)
}

const REQUIRED_COLUMNS: [&str; 4] = ["id", "amount_cents", "currency", "bank_account"];

const BOOL_COLUMNS: [&str; 8] = [
    "parse_error",
    "ach_return",
    "on_account",
    "je_required",
    "legacy_je_required",
    "intercompany",
    "bank_match_ready",
    "exception_open",
];

const INT_COLUMNS: [&str; 2] = ["amount_cents", "match_confidence"];

/// Header-driven CSV load. Columns are named after [`Payment`] fields; an
/// empty cell means the field is absent. Unknown columns are ignored.
pub fn load_payments_csv(input: &str, config: &CsvConfig) -> Result<Vec<Payment>, CashAppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(config.delimiter_byte())
        .trim(csv::Trim::All)
        .from_reader(input.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| CashAppError::Io(e.to_string()))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(CashAppError::MissingColumn { column: column.into() });
        }
    }

    let id_col = headers.iter().position(|h| h == "id");
    let mut payments = Vec::new();
    for (row_no, record) in reader.records().enumerate() {
        let record = record.map_err(|e| CashAppError::Io(e.to_string()))?;
        let record_id = match id_col.and_then(|i| record.get(i)) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("row {}", row_no + 1),
        };

        let mut object = Map::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            if cell.is_empty() {
                continue;
            }
            let value = typed_cell(header, cell).ok_or_else(|| CashAppError::FieldParse {
                record_id: record_id.clone(),
                field: header.clone(),
                value: cell.to_string(),
            })?;
            object.insert(header.clone(), value);
        }

        let payment: Payment =
            serde_json::from_value(Value::Object(object)).map_err(|e| CashAppError::FieldParse {
                record_id: record_id.clone(),
                field: "row".into(),
                value: e.to_string(),
            })?;
        payments.push(payment);
    }
    Ok(payments)
}

fn typed_cell(header: &str, cell: &str) -> Option<Value> {
    if BOOL_COLUMNS.contains(&header) {
        return parse_bool(cell).map(Value::Bool);
    }
    if INT_COLUMNS.contains(&header) {
        return cell.parse::<i64>().ok().map(Value::from);
    }
    Some(Value::String(cell.to_string()))
}

fn parse_bool(cell: &str) -> Option<bool> {
    match cell.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// `.json` files are JSON arrays; anything else is read as CSV.
pub fn load_payments_file(path: &Path, csv: &CsvConfig) -> Result<Vec<Payment>, CashAppError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| CashAppError::Io(format!("cannot read {}: {e}", path.display())))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        load_payments_json(&data)
    } else {
        load_payments_csv(&data, csv)
    }
}
