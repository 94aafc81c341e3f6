use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CashAppError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CashAppConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub posting: PostingConfig,
    #[serde(default)]
    pub csv: CsvConfig,
}

impl Default for CashAppConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            batch: BatchConfig::default(),
            posting: PostingConfig::default(),
            csv: CsvConfig::default(),
        }
    }
}

fn default_name() -> String {
    "cash application".into()
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Owning legal entity stamped on new batches.
    #[serde(default)]
    pub entity: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub account_policy: AccountPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            entity: String::new(),
            currency: default_currency(),
            account_policy: AccountPolicy::default(),
        }
    }
}

fn default_currency() -> String {
    "USD".into()
}

/// Whether a batch may span several bank accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountPolicy {
    /// Every line shares the batch's first bank account.
    #[default]
    Single,
    /// Lines may come from any account; the batch lists all of them.
    Multi,
}

impl std::fmt::Display for AccountPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Multi => write!(f, "multi"),
        }
    }
}

// ---------------------------------------------------------------------------
// Posting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PostingConfig {
    /// Per-item gateway timeout. A timeout is recorded as an ERROR outcome.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub idempotency_scope: IdempotencyScope,
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            idempotency_scope: IdempotencyScope::default(),
        }
    }
}

impl PostingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_timeout_ms() -> u64 {
    5_000
}

/// What the ledger adapter deduplicates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyScope {
    Payment,
    #[default]
    BatchPayment,
}

// ---------------------------------------------------------------------------
// CSV input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CsvConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self { delimiter: default_delimiter() }
    }
}

impl CsvConfig {
    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter.as_bytes().first().copied().unwrap_or(b',')
    }
}

fn default_delimiter() -> String {
    ",".into()
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl CashAppConfig {
    pub fn from_toml(input: &str) -> Result<Self, CashAppError> {
        let config: CashAppConfig =
            toml::from_str(input).map_err(|e| CashAppError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CashAppError> {
        let input = std::fs::read_to_string(path)
            .map_err(|e| CashAppError::Io(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&input)
    }

    pub fn validate(&self) -> Result<(), CashAppError> {
        let currency = &self.batch.currency;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(CashAppError::ConfigValidation(format!(
                "batch.currency must be a 3-letter ISO code, got '{currency}'"
            )));
        }

        if self.posting.timeout_ms == 0 {
            return Err(CashAppError::ConfigValidation(
                "posting.timeout_ms must be greater than 0".into(),
            ));
        }

        if self.csv.delimiter.len() != 1 || !self.csv.delimiter.is_ascii() {
            return Err(CashAppError::ConfigValidation(format!(
                "csv.delimiter must be a single ASCII character, got '{}'",
                self.csv.delimiter
            )));
        }

        crate::tables::validate_tables()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
