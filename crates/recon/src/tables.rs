//! Fixed lookup tables for the exception taxonomy.
//!
//! Every lookup is an exhaustive `match`, so the compiler rejects a new
//! variant that has no entry. [`validate_tables`] checks the cross-table
//! rules the type system cannot see (legacy pairs agree with the
//! reason→category table, labels are unique, every category is reachable).

use std::collections::HashSet;

use crate::error::CashAppError;
use crate::model::{
    CreditMemoProblem, ExceptionCategory, ExceptionReason, InvoiceProblem, LegacyExceptionType,
};

/// The unique category that owns `reason`.
pub fn category_for(reason: ExceptionReason) -> ExceptionCategory {
    use ExceptionCategory as C;
    use ExceptionReason as R;
    match reason {
        R::RemittanceParseError | R::RemittanceMissing => C::MissingRemittance,
        R::InvoiceNotFound | R::InvoiceClosed | R::InvoiceAlreadyPaid | R::InvoiceInvalid => {
            C::InvoiceIssue
        }
        R::CreditMemoInvalid | R::CreditMemoAlreadyApplied | R::CreditMemoNotFound => {
            C::CreditIssue
        }
        R::SettlementPending | R::AchFailed | R::BankReturn | R::SettlementFailed => C::Settlement,
        R::UnappliedCash | R::ManualJeRequired => C::JournalEntryNeeded,
        R::ShortPayment | R::Overpayment => C::AmountVariance,
        R::UnidentifiedPayer => C::CustomerIdentity,
        R::DuplicatePayment => C::Duplicate,
    }
}

/// Human label shown on exception queues.
pub fn label_for(reason: ExceptionReason) -> &'static str {
    use ExceptionReason as R;
    match reason {
        R::RemittanceParseError => "Remittance parse error",
        R::RemittanceMissing => "Remittance missing",
        R::InvoiceNotFound => "Invoice not found",
        R::InvoiceClosed => "Invoice closed",
        R::InvoiceAlreadyPaid => "Invoice already paid",
        R::InvoiceInvalid => "Invoice invalid",
        R::CreditMemoInvalid => "Credit memo invalid",
        R::CreditMemoAlreadyApplied => "Credit memo already applied",
        R::CreditMemoNotFound => "Credit memo not found",
        R::SettlementPending => "Settlement pending",
        R::AchFailed => "ACH failed",
        R::BankReturn => "Bank return",
        R::SettlementFailed => "Settlement failed",
        R::UnappliedCash => "Unapplied cash",
        R::ManualJeRequired => "Manual JE required",
        R::ShortPayment => "Short payment",
        R::Overpayment => "Overpayment",
        R::UnidentifiedPayer => "Unidentified payer",
        R::DuplicatePayment => "Duplicate payment",
    }
}

pub fn invoice_reason(problem: InvoiceProblem) -> ExceptionReason {
    match problem {
        InvoiceProblem::NotFound => ExceptionReason::InvoiceNotFound,
        InvoiceProblem::Closed => ExceptionReason::InvoiceClosed,
        InvoiceProblem::Paid => ExceptionReason::InvoiceAlreadyPaid,
        InvoiceProblem::Invalid => ExceptionReason::InvoiceInvalid,
    }
}

pub fn credit_memo_reason(problem: CreditMemoProblem) -> ExceptionReason {
    match problem {
        CreditMemoProblem::Invalid => ExceptionReason::CreditMemoInvalid,
        CreditMemoProblem::AlreadyApplied => ExceptionReason::CreditMemoAlreadyApplied,
        CreditMemoProblem::NotFound => ExceptionReason::CreditMemoNotFound,
    }
}

/// Legacy coarse type → (category, reason).
pub fn legacy_mapping(kind: LegacyExceptionType) -> (ExceptionCategory, ExceptionReason) {
    use ExceptionCategory as C;
    use ExceptionReason as R;
    match kind {
        LegacyExceptionType::MissingRemittance => (C::MissingRemittance, R::RemittanceMissing),
        LegacyExceptionType::ShortPay => (C::AmountVariance, R::ShortPayment),
        LegacyExceptionType::OverPay => (C::AmountVariance, R::Overpayment),
        LegacyExceptionType::Unidentified => (C::CustomerIdentity, R::UnidentifiedPayer),
        LegacyExceptionType::Duplicate => (C::Duplicate, R::DuplicatePayment),
        LegacyExceptionType::InvoiceMismatch => (C::InvoiceIssue, R::InvoiceNotFound),
        LegacyExceptionType::JeRequired => (C::JournalEntryNeeded, R::ManualJeRequired),
    }
}

/// Cross-table consistency check, run once at startup.
pub fn validate_tables() -> Result<(), CashAppError> {
    let mut labels = HashSet::new();
    for reason in ExceptionReason::ALL {
        let label = label_for(*reason);
        if label.trim().is_empty() {
            return Err(CashAppError::TableValidation(format!("{reason} has an empty label")));
        }
        if !labels.insert(label) {
            return Err(CashAppError::TableValidation(format!("duplicate label '{label}'")));
        }
    }

    let owned: HashSet<ExceptionCategory> =
        ExceptionReason::ALL.iter().map(|r| category_for(*r)).collect();
    for category in ExceptionCategory::ALL {
        if !owned.contains(category) {
            return Err(CashAppError::TableValidation(format!(
                "category {category} is not owned by any reason"
            )));
        }
    }

    for problem in InvoiceProblem::ALL {
        let reason = invoice_reason(*problem);
        if category_for(reason) != ExceptionCategory::InvoiceIssue {
            return Err(CashAppError::TableValidation(format!(
                "invoice problem {problem} maps to {reason} outside INVOICE_ISSUE"
            )));
        }
    }

    for problem in CreditMemoProblem::ALL {
        let reason = credit_memo_reason(*problem);
        if category_for(reason) != ExceptionCategory::CreditIssue {
            return Err(CashAppError::TableValidation(format!(
                "credit memo problem {problem} maps to {reason} outside CREDIT_ISSUE"
            )));
        }
    }

    for kind in LegacyExceptionType::ALL {
        let (category, reason) = legacy_mapping(*kind);
        if category_for(reason) != category {
            return Err(CashAppError::TableValidation(format!(
                "legacy type {kind} pairs {reason} with {category}, expected {}",
                category_for(reason)
            )));
        }
    }

    Ok(())
}
