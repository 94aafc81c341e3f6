//! Exception classification.
//!
//! `classify` is pure: it reads a payment and proposes a [`PaymentDelta`]
//! holding only the fields that would change. Callers merge the delta with
//! [`PaymentDelta::apply`]. Rules are evaluated in a fixed order and the
//! first match wins; an already-assigned reason is never re-derived, only
//! its missing category and label are backfilled.

use serde::Serialize;

use crate::model::{
    ExceptionCategory, ExceptionReason, Payment, PaymentStatus, SettlementReason,
    SettlementState,
};
use crate::settlement::resolve_settlement_state;
use crate::tables::{category_for, credit_memo_reason, invoice_reason, label_for, legacy_mapping};

/// Which branch of the decision table fired. Exactly one per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierRule {
    Backfill,
    ParseError,
    InvoiceProblem,
    CreditMemoProblem,
    SettlementPending,
    AchReturn,
    BankReturn,
    SettlementFailed,
    OnAccount,
    JournalEntryRequired,
    LegacyExceptionType,
    Unclassified,
}

/// Proposed field updates. `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PaymentDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_reason: Option<ExceptionReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_category: Option<ExceptionCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_state: Option<SettlementState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_open: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub je_required: Option<bool>,
}

impl PaymentDelta {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge into `payment`. Only set fields are written.
    pub fn apply(&self, payment: &mut Payment) {
        if let Some(reason) = self.exception_reason {
            payment.exception_reason = Some(reason);
        }
        if let Some(category) = self.exception_category {
            payment.exception_category = Some(category);
        }
        if let Some(ref label) = self.exception_label {
            payment.exception_label = Some(label.clone());
        }
        if let Some(state) = self.settlement_state {
            payment.settlement_state = Some(state);
        }
        if let Some(open) = self.exception_open {
            payment.exception_open = Some(open);
        }
        if let Some(required) = self.je_required {
            payment.je_required = Some(required);
        }
    }

    pub fn merged(&self, payment: &Payment) -> Payment {
        let mut out = payment.clone();
        self.apply(&mut out);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub rule: ClassifierRule,
    pub delta: PaymentDelta,
}

pub fn classify(payment: &Payment) -> Classification {
    let settlement = resolve_settlement_state(payment);
    let mut delta = PaymentDelta::default();

    let rule = match payment.exception_reason {
        Some(reason) => {
            if payment.exception_category.is_none() {
                delta.exception_category = Some(category_for(reason));
            }
            if payment.exception_label.is_none() {
                delta.exception_label = Some(label_for(reason).to_string());
            }
            ClassifierRule::Backfill
        }
        None => {
            let (rule, assigned) = select_reason(payment, settlement);
            if let Some((category, reason)) = assigned {
                delta.exception_reason = Some(reason);
                if payment.exception_category != Some(category) {
                    delta.exception_category = Some(category);
                }
                if payment.exception_label.is_none() {
                    delta.exception_label = Some(label_for(reason).to_string());
                }
            }
            rule
        }
    };

    if payment.settlement_state.is_none() && settlement != SettlementState::None {
        delta.settlement_state = Some(settlement);
    }

    if payment.exception_open.is_none()
        && payment.status == PaymentStatus::Exception
        && payment.resolution_state.is_none()
    {
        delta.exception_open = Some(true);
    }

    if payment.je_required.is_none() && payment.legacy_je_required {
        delta.je_required = Some(true);
    }

    log::debug!("payment {}: {:?} ({} field(s) proposed)", payment.id, rule, delta_width(&delta));

    Classification { rule, delta }
}

/// Classify and merge in one step. Returns the rule that fired.
pub fn classify_in_place(payment: &mut Payment) -> ClassifierRule {
    let Classification { rule, delta } = classify(payment);
    delta.apply(payment);
    rule
}

/// Decision table for payments without a reason. First match wins.
fn select_reason(
    payment: &Payment,
    settlement: SettlementState,
) -> (ClassifierRule, Option<(ExceptionCategory, ExceptionReason)>) {
    use ExceptionCategory as C;
    use ExceptionReason as R;

    if payment.parse_error {
        return (ClassifierRule::ParseError, Some((C::MissingRemittance, R::RemittanceParseError)));
    }
    if let Some(problem) = payment.invoice_problem {
        return (ClassifierRule::InvoiceProblem, Some((C::InvoiceIssue, invoice_reason(problem))));
    }
    if let Some(problem) = payment.credit_memo_problem {
        return (
            ClassifierRule::CreditMemoProblem,
            Some((C::CreditIssue, credit_memo_reason(problem))),
        );
    }
    if settlement == SettlementState::Pending {
        return (ClassifierRule::SettlementPending, Some((C::Settlement, R::SettlementPending)));
    }
    if payment.ach_return {
        return (ClassifierRule::AchReturn, Some((C::Settlement, R::AchFailed)));
    }
    if payment.settlement_reason == Some(SettlementReason::Reversed) {
        return (ClassifierRule::BankReturn, Some((C::Settlement, R::BankReturn)));
    }
    if settlement == SettlementState::Failed {
        return (ClassifierRule::SettlementFailed, Some((C::Settlement, R::SettlementFailed)));
    }
    if payment.on_account {
        return (ClassifierRule::OnAccount, Some((C::JournalEntryNeeded, R::UnappliedCash)));
    }
    if payment.requires_journal_entry() {
        return (
            ClassifierRule::JournalEntryRequired,
            Some((C::JournalEntryNeeded, R::ManualJeRequired)),
        );
    }
    if let Some(kind) = payment.legacy_exception_type {
        return (ClassifierRule::LegacyExceptionType, Some(legacy_mapping(kind)));
    }
    (ClassifierRule::Unclassified, None)
}

fn delta_width(delta: &PaymentDelta) -> usize {
    [
        delta.exception_reason.is_some(),
        delta.exception_category.is_some(),
        delta.exception_label.is_some(),
        delta.settlement_state.is_some(),
        delta.exception_open.is_some(),
        delta.je_required.is_some(),
    ]
    .iter()
    .filter(|set| **set)
    .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CreditMemoProblem, InvoiceProblem, LegacyExceptionType, LegacySettlementStatus,
        ResolutionState,
    };

    fn payment() -> Payment {
        Payment::new("pmt_1", 125_000, "USD", "chase-1")
    }

    fn reason_of(p: &Payment) -> (Option<ExceptionReason>, Option<ExceptionCategory>) {
        let merged = classify(p).delta.merged(p);
        (merged.exception_reason, merged.exception_category)
    }

    #[test]
    fn parse_error_is_missing_remittance() {
        let mut p = payment();
        p.parse_error = true;
        let c = classify(&p);
        assert_eq!(c.rule, ClassifierRule::ParseError);
        assert_eq!(c.delta.exception_reason, Some(ExceptionReason::RemittanceParseError));
        assert_eq!(c.delta.exception_category, Some(ExceptionCategory::MissingRemittance));
        assert_eq!(c.delta.exception_label.as_deref(), Some("Remittance parse error"));
    }

    #[test]
    fn settlement_pending_status_classifies_as_settlement_pending() {
        let mut p = payment();
        p.status = PaymentStatus::SettlementPending;
        let c = classify(&p);
        assert_eq!(c.rule, ClassifierRule::SettlementPending);
        assert_eq!(c.delta.settlement_state, Some(SettlementState::Pending));
        assert_eq!(c.delta.exception_reason, Some(ExceptionReason::SettlementPending));
        assert_eq!(c.delta.exception_category, Some(ExceptionCategory::Settlement));
    }

    #[test]
    fn parse_error_outranks_invoice_problem() {
        let mut p = payment();
        p.parse_error = true;
        p.invoice_problem = Some(InvoiceProblem::Closed);
        assert_eq!(classify(&p).rule, ClassifierRule::ParseError);
    }

    #[test]
    fn invoice_problem_table() {
        let cases = [
            (InvoiceProblem::NotFound, ExceptionReason::InvoiceNotFound),
            (InvoiceProblem::Closed, ExceptionReason::InvoiceClosed),
            (InvoiceProblem::Paid, ExceptionReason::InvoiceAlreadyPaid),
            (InvoiceProblem::Invalid, ExceptionReason::InvoiceInvalid),
        ];
        for (problem, expected) in cases {
            let mut p = payment();
            p.invoice_problem = Some(problem);
            p.credit_memo_problem = Some(CreditMemoProblem::Invalid);
            assert_eq!(reason_of(&p), (Some(expected), Some(ExceptionCategory::InvoiceIssue)));
        }
    }

    #[test]
    fn credit_memo_problem_outranks_settlement() {
        let mut p = payment();
        p.credit_memo_problem = Some(CreditMemoProblem::AlreadyApplied);
        p.status = PaymentStatus::SettlementPending;
        assert_eq!(
            reason_of(&p),
            (
                Some(ExceptionReason::CreditMemoAlreadyApplied),
                Some(ExceptionCategory::CreditIssue)
            )
        );
    }

    #[test]
    fn settlement_pending_outranks_ach_return() {
        let mut p = payment();
        p.settlement_state = Some(SettlementState::Pending);
        p.ach_return = true;
        assert_eq!(classify(&p).rule, ClassifierRule::SettlementPending);
    }

    #[test]
    fn ach_return_outranks_reversal_and_failure() {
        let mut p = payment();
        p.ach_return = true;
        p.settlement_reason = Some(SettlementReason::Reversed);
        p.settlement_status = Some(LegacySettlementStatus::Failed);
        let c = classify(&p);
        assert_eq!(c.rule, ClassifierRule::AchReturn);
        assert_eq!(c.delta.exception_reason, Some(ExceptionReason::AchFailed));
    }

    #[test]
    fn reversal_is_bank_return() {
        let mut p = payment();
        p.settlement_reason = Some(SettlementReason::Reversed);
        p.settlement_status = Some(LegacySettlementStatus::Returned);
        let c = classify(&p);
        assert_eq!(c.rule, ClassifierRule::BankReturn);
        assert_eq!(c.delta.exception_reason, Some(ExceptionReason::BankReturn));
        assert_eq!(c.delta.settlement_state, Some(SettlementState::Failed));
    }

    #[test]
    fn legacy_failed_status_is_settlement_failed() {
        let mut p = payment();
        p.legacy_settlement_status = Some(LegacySettlementStatus::Failed);
        p.on_account = true;
        assert_eq!(classify(&p).rule, ClassifierRule::SettlementFailed);
    }

    #[test]
    fn on_account_is_unapplied_cash() {
        let mut p = payment();
        p.on_account = true;
        p.je_required = Some(true);
        assert_eq!(
            reason_of(&p),
            (Some(ExceptionReason::UnappliedCash), Some(ExceptionCategory::JournalEntryNeeded))
        );
    }

    #[test]
    fn legacy_je_flag_classifies_and_backfills() {
        let mut p = payment();
        p.legacy_je_required = true;
        let c = classify(&p);
        assert_eq!(c.rule, ClassifierRule::JournalEntryRequired);
        assert_eq!(c.delta.exception_reason, Some(ExceptionReason::ManualJeRequired));
        assert_eq!(c.delta.je_required, Some(true));
    }

    #[test]
    fn explicit_false_je_flag_masks_legacy_flag() {
        let mut p = payment();
        p.je_required = Some(false);
        p.legacy_je_required = true;
        let c = classify(&p);
        assert_eq!(c.rule, ClassifierRule::Unclassified);
        assert_eq!(c.delta.je_required, None);
    }

    #[test]
    fn legacy_exception_type_maps_through_table() {
        let mut p = payment();
        p.legacy_exception_type = Some(LegacyExceptionType::ShortPay);
        assert_eq!(
            reason_of(&p),
            (Some(ExceptionReason::ShortPayment), Some(ExceptionCategory::AmountVariance))
        );
    }

    #[test]
    fn clean_payment_is_unclassified() {
        let c = classify(&payment());
        assert_eq!(c.rule, ClassifierRule::Unclassified);
        assert!(c.delta.is_empty());
    }

    #[test]
    fn existing_reason_only_backfills() {
        let mut p = payment();
        p.exception_reason = Some(ExceptionReason::DuplicatePayment);
        p.parse_error = true;
        let c = classify(&p);
        assert_eq!(c.rule, ClassifierRule::Backfill);
        assert_eq!(c.delta.exception_reason, None);
        assert_eq!(c.delta.exception_category, Some(ExceptionCategory::Duplicate));
        assert_eq!(c.delta.exception_label.as_deref(), Some("Duplicate payment"));
    }

    #[test]
    fn existing_label_is_never_overwritten() {
        let mut p = payment();
        p.exception_reason = Some(ExceptionReason::ShortPayment);
        p.exception_label = Some("Short by $12 per AP".into());
        let merged = classify(&p).delta.merged(&p);
        assert_eq!(merged.exception_label.as_deref(), Some("Short by $12 per AP"));
        assert_eq!(merged.exception_category, Some(ExceptionCategory::AmountVariance));
    }

    #[test]
    fn second_pass_proposes_nothing() {
        let mut p = payment();
        p.status = PaymentStatus::Exception;
        p.legacy_je_required = true;
        p.legacy_settlement_status = Some(LegacySettlementStatus::Cleared);
        classify_in_place(&mut p);
        let again = classify(&p);
        assert_eq!(again.rule, ClassifierRule::Backfill);
        assert!(again.delta.is_empty());
    }

    #[test]
    fn exception_opens_once_without_resolution() {
        let mut p = payment();
        p.status = PaymentStatus::Exception;
        assert_eq!(classify(&p).delta.exception_open, Some(true));

        p.resolution_state = Some(ResolutionState::Resolved);
        assert_eq!(classify(&p).delta.exception_open, None);

        let mut closed = payment();
        closed.status = PaymentStatus::Exception;
        closed.exception_open = Some(false);
        assert_eq!(classify(&closed).delta.exception_open, None);
    }

    #[test]
    fn confirmed_settlement_is_recorded_without_reason() {
        let mut p = payment();
        p.settlement_status = Some(LegacySettlementStatus::Final);
        let c = classify(&p);
        assert_eq!(c.rule, ClassifierRule::Unclassified);
        assert_eq!(c.delta.settlement_state, Some(SettlementState::Confirmed));
    }
}
