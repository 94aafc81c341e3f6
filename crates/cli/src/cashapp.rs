//! `cashapp classify | batch | validate`: cash application from the shell.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use clap::Subcommand;
use serde::Serialize;

use cashapp_recon::derive::derive_line_item;
use cashapp_recon::engine::{load_payments_file, Rejection};
use cashapp_recon::evidence::{compute_summary, ExceptionSummary};
use cashapp_recon::gateway::PostingReport;
use cashapp_recon::model::Payment;
use cashapp_recon::tables::validate_tables;
use cashapp_recon::{
    classify_in_place, BatchOptions, CancelToken, CashAppConfig, CashAppError, CashAppResult,
    InMemoryLedger, Poster, SharedBatch,
};

use crate::exit_codes::{cashapp_exit_code, EXIT_CASHAPP_REJECTED, EXIT_CASHAPP_RUNTIME};
use crate::CliError;

#[derive(Subcommand)]
pub enum CashAppCommands {
    /// Classify exceptions on a payments file (JSON array or CSV)
    #[command(after_help = "\
Examples:
  cashapp classify payments.csv
  cashapp classify payments.json --json
  cashapp classify payments.csv --config cashapp.toml --output classified.json")]
    Classify {
        /// Payments file (.json, otherwise CSV)
        payments: PathBuf,

        /// Config file (only the [csv] section is used)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Classify payments and assemble them into a posting batch
    #[command(after_help = "\
Examples:
  cashapp batch payments.csv --config cashapp.toml
  cashapp batch payments.csv --config cashapp.toml --posting-date 2026-01-31 --json
  cashapp batch payments.csv --config cashapp.toml --simulate-post")]
    Batch {
        /// Payments file (.json, otherwise CSV)
        payments: PathBuf,

        /// Path to the cash application TOML config
        #[arg(long)]
        config: PathBuf,

        /// Batch id (defaults to batch-<posting date>)
        #[arg(long)]
        id: Option<String>,

        /// Batch name (defaults to the config name)
        #[arg(long)]
        name: Option<String>,

        /// Posting date, YYYY-MM-DD (defaults to today, UTC)
        #[arg(long)]
        posting_date: Option<NaiveDate>,

        /// Post READY lines against an in-memory ledger and report the outcome
        #[arg(long)]
        simulate_post: bool,

        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Validate a config file and the exception lookup tables
    #[command(after_help = "\
Examples:
  cashapp validate cashapp.toml")]
    Validate {
        /// Path to the cash application TOML config
        config: PathBuf,
    },
}

pub fn cmd_cashapp(cmd: CashAppCommands) -> Result<(), CliError> {
    validate_tables()?;
    match cmd {
        CashAppCommands::Classify { payments, config, json, output } => {
            cmd_classify(payments, config, json, output)
        }
        CashAppCommands::Batch {
            payments,
            config,
            id,
            name,
            posting_date,
            simulate_post,
            json,
            output,
        } => cmd_batch(payments, config, id, name, posting_date, simulate_post, json, output),
        CashAppCommands::Validate { config } => cmd_validate(config),
    }
}

fn cashapp_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

impl From<CashAppError> for CliError {
    fn from(err: CashAppError) -> Self {
        let hint = match &err {
            CashAppError::MissingColumn { .. } => {
                Some("CSV needs id, amount_cents, currency and bank_account columns".to_string())
            }
            CashAppError::ConfigParse(_) => {
                Some("run `cashapp validate <config>` to check the file".to_string())
            }
            _ => None,
        };
        CliError { code: cashapp_exit_code(&err), message: err.to_string(), hint }
    }
}

fn load_config(path: Option<&Path>) -> Result<CashAppConfig, CliError> {
    match path {
        Some(path) => Ok(CashAppConfig::load(path)?),
        None => Ok(CashAppConfig::default()),
    }
}

fn emit_json<T: Serialize>(value: &T, json_output: bool, output_file: Option<&Path>) -> Result<(), CliError> {
    if !json_output && output_file.is_none() {
        return Ok(());
    }
    let json_str = serde_json::to_string_pretty(value)
        .map_err(|e| cashapp_err(EXIT_CASHAPP_RUNTIME, format!("JSON serialization error: {e}")))?;

    if let Some(path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| cashapp_err(EXIT_CASHAPP_RUNTIME, format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }
    if json_output {
        println!("{json_str}");
    }
    Ok(())
}

fn print_summary(s: &ExceptionSummary) {
    eprintln!(
        "{} payment(s): {} exception(s), {} open, {} cents under exception",
        s.total_payments, s.exceptions, s.open_exceptions, s.exception_amount_cents,
    );
    for (category, count) in &s.by_category {
        eprintln!("  {category}: {count}");
    }
}

// ---------------------------------------------------------------------------
// classify
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ClassifyOutput<'a> {
    summary: &'a ExceptionSummary,
    rejected: &'a [Rejection],
    payments: &'a [Payment],
}

fn cmd_classify(
    payments_path: PathBuf,
    config_path: Option<PathBuf>,
    json_output: bool,
    output_file: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = load_config(config_path.as_deref())?;
    let mut payments = load_payments_file(&payments_path, &config.csv)?;

    for payment in payments.iter_mut() {
        classify_in_place(payment);
    }
    let mut lines = Vec::with_capacity(payments.len());
    let mut rejected = Vec::new();
    for payment in &payments {
        match derive_line_item(payment) {
            Ok(line) => lines.push(line),
            Err(e) => rejected.push(Rejection { payment_id: payment.id.clone(), error: e.to_string() }),
        }
    }
    let summary = compute_summary(&payments, &lines);

    emit_json(
        &ClassifyOutput { summary: &summary, rejected: &rejected, payments: &payments },
        json_output,
        output_file.as_deref(),
    )?;
    print_summary(&summary);
    report_rejections(&rejected)
}

// ---------------------------------------------------------------------------
// batch
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct BatchOutput<'a> {
    #[serde(flatten)]
    result: &'a CashAppResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    posting: Option<&'a PostingReport>,
}

#[allow(clippy::too_many_arguments)]
fn cmd_batch(
    payments_path: PathBuf,
    config_path: PathBuf,
    id: Option<String>,
    name: Option<String>,
    posting_date: Option<NaiveDate>,
    simulate_post: bool,
    json_output: bool,
    output_file: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = load_config(Some(&config_path))?;
    let payments = load_payments_file(&payments_path, &config.csv)?;

    let posting_date = posting_date.unwrap_or_else(|| chrono::Utc::now().date_naive());
    let options = BatchOptions {
        batch_id: id.unwrap_or_else(|| format!("batch-{posting_date}")),
        batch_name: name.unwrap_or_else(|| config.name.clone()),
        posting_date,
    };

    let mut result = cashapp_recon::run(&config, payments, &options)?;

    let report = if simulate_post {
        let shared = SharedBatch::new(result.batch.clone());
        let poster = Poster::new(Arc::new(InMemoryLedger::new()), &config.posting);
        let report = poster.post_batch(&shared, &CancelToken::new())?;
        result.batch = shared.snapshot();
        Some(report)
    } else {
        None
    };

    emit_json(
        &BatchOutput { result: &result, posting: report.as_ref() },
        json_output,
        output_file.as_deref(),
    )?;

    print_summary(&result.summary);
    let m = result.batch.metrics();
    eprintln!(
        "batch '{}' ({}): {} line(s), {} ready, {} blocked, {} failed, {} posted, status {}",
        result.batch.name,
        result.batch.id,
        m.total_payments,
        m.ready_count,
        m.blocked_count,
        m.failed_count,
        m.posted_count,
        result.batch.status(),
    );
    if let Some(ref report) = report {
        eprintln!("simulated post: {}", report.summary);
    }
    report_rejections(&result.rejected)
}

/// List rejected payments on stderr; any rejection fails the command.
fn report_rejections(rejected: &[Rejection]) -> Result<(), CliError> {
    for rejection in rejected {
        eprintln!("  rejected {}: {}", rejection.payment_id, rejection.error);
    }
    if rejected.is_empty() {
        return Ok(());
    }
    Err(cashapp_err(EXIT_CASHAPP_REJECTED, format!("{} payment(s) rejected", rejected.len()))
        .with_hint("rejected payments are listed under `rejected` in --json output"))
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = CashAppConfig::load(&config_path)?;
    eprintln!(
        "valid: '{}' for entity '{}' in {}, {} bank account policy, {}ms posting timeout",
        config.name,
        config.batch.entity,
        config.batch.currency,
        config.batch.account_policy,
        config.posting.timeout_ms,
    );
    Ok(())
}
