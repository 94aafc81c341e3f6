//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 1       | Universal        | General error (unspecified)              |
//! | 2       | Universal        | CLI usage error (bad args, missing file) |
//! | 60-69   | cashapp          | Cash application codes                   |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use cashapp_recon::CashAppError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Cash application (60-69)
// =============================================================================

/// Config file failed to parse or validate, or lookup tables are inconsistent.
pub const EXIT_CASHAPP_INVALID_CONFIG: u8 = 60;

/// Payments file could not be parsed (bad JSON, missing column, bad cell).
pub const EXIT_CASHAPP_INPUT: u8 = 61;

/// Run completed but at least one payment was rejected from the batch.
pub const EXIT_CASHAPP_REJECTED: u8 = 62;

/// Runtime failure (IO, batch lifecycle, posting).
pub const EXIT_CASHAPP_RUNTIME: u8 = 63;

/// Map an engine error to its exit code.
pub fn cashapp_exit_code(err: &CashAppError) -> u8 {
    match err {
        CashAppError::ConfigParse(_)
        | CashAppError::ConfigValidation(_)
        | CashAppError::TableValidation(_) => EXIT_CASHAPP_INVALID_CONFIG,
        CashAppError::MissingColumn { .. }
        | CashAppError::FieldParse { .. }
        | CashAppError::Json(_) => EXIT_CASHAPP_INPUT,
        CashAppError::InvalidPayment { .. } => EXIT_CASHAPP_REJECTED,
        CashAppError::BatchRejected { .. }
        | CashAppError::InvalidTransition { .. }
        | CashAppError::UnknownLineItem { .. }
        | CashAppError::Io(_) => EXIT_CASHAPP_RUNTIME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_map_to_invalid_config() {
        let err = CashAppError::ConfigValidation("bad".into());
        assert_eq!(cashapp_exit_code(&err), EXIT_CASHAPP_INVALID_CONFIG);
    }

    #[test]
    fn input_errors_map_to_input() {
        let err = CashAppError::MissingColumn { column: "id".into() };
        assert_eq!(cashapp_exit_code(&err), EXIT_CASHAPP_INPUT);
    }

    #[test]
    fn codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_ERROR,
            EXIT_USAGE,
            EXIT_CASHAPP_INVALID_CONFIG,
            EXIT_CASHAPP_INPUT,
            EXIT_CASHAPP_REJECTED,
            EXIT_CASHAPP_RUNTIME,
        ];
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }
}
