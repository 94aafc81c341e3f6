//! Workstream + readiness derivation: Payment → BatchLineItem.

use crate::error::CashAppError;
use crate::model::{
    BatchLineItem, BlockedReason, Payment, PaymentStatus, PendingPostState, PostingResult,
    PostingStatus, ReadyState, Workstream,
};
use crate::tables::category_for;

/// Boundary check. A payment that fails here never enters a batch.
pub fn validate_payment(payment: &Payment) -> Result<(), CashAppError> {
    let reject = |reason: String| CashAppError::InvalidPayment {
        payment_id: if payment.id.is_empty() { "<missing id>".into() } else { payment.id.clone() },
        reason,
    };

    if payment.id.trim().is_empty() {
        return Err(reject("id is empty".into()));
    }
    if payment.currency.len() != 3 || !payment.currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(reject(format!("currency '{}' is not an ISO 4217 code", payment.currency)));
    }
    if payment.bank_account.trim().is_empty() {
        return Err(reject("bank account is empty".into()));
    }
    if let Some(confidence) = payment.match_confidence {
        if confidence > 100 {
            return Err(reject(format!("match confidence {confidence} exceeds 100")));
        }
    }
    match (payment.exception_reason, payment.exception_category) {
        (Some(reason), Some(category)) if category_for(reason) != category => {
            return Err(reject(format!("reason {reason} does not belong to category {category}")))
        }
        (None, Some(category)) => {
            return Err(reject(format!("category {category} set without a reason")))
        }
        _ => {}
    }
    Ok(())
}

/// JE-required, then intercompany, then exception status, else auto-matched.
pub fn derive_workstream(payment: &Payment) -> Workstream {
    if payment.requires_journal_entry() {
        Workstream::JeRequired
    } else if payment.intercompany {
        Workstream::Intercompany
    } else if payment.status == PaymentStatus::Exception {
        Workstream::Exception
    } else {
        Workstream::AutoMatched
    }
}

/// Never READY without explicit approval.
pub fn derive_ready_state(payment: &Payment) -> ReadyState {
    match payment.status {
        PaymentStatus::Posted => return ReadyState::Posted,
        PaymentStatus::PostFailed => return ReadyState::Failed,
        _ => {}
    }
    match payment.pending_post_state {
        Some(PendingPostState::Failed) => ReadyState::Failed,
        Some(PendingPostState::Ready) if payment.is_approved() => ReadyState::Ready,
        _ => ReadyState::Blocked,
    }
}

pub fn derive_blocked_reason(payment: &Payment) -> BlockedReason {
    match payment.pending_post_state {
        Some(PendingPostState::JeApprovalPending) => BlockedReason::JeApproval,
        Some(PendingPostState::SyncPending) => BlockedReason::SyncPending,
        Some(PendingPostState::NeedsApproval) => BlockedReason::EvidenceRequired,
        Some(PendingPostState::Ready) | Some(PendingPostState::Failed) | None => {
            if payment.requires_journal_entry() {
                BlockedReason::JeApproval
            } else {
                BlockedReason::DimensionsMissing
            }
        }
    }
}

/// Seed result carried forward from the payment's own ledger fields.
fn seed_posting_result(payment: &Payment, ready_state: ReadyState) -> PostingResult {
    match ready_state {
        ReadyState::Posted => PostingResult {
            status: PostingStatus::Success,
            ledger_payment_id: payment.ledger_payment_id.clone(),
            ledger_je_id: payment.ledger_je_id.clone(),
            attempted_at: payment.post_attempted_at,
            ..PostingResult::default()
        },
        ReadyState::Failed => PostingResult {
            status: PostingStatus::Error,
            error_code: payment.post_error_code.clone(),
            error_message: payment.post_error_message.clone(),
            attempted_at: payment.post_attempted_at,
            ..PostingResult::default()
        },
        ReadyState::Ready | ReadyState::Blocked => PostingResult::default(),
    }
}

pub fn derive_line_item(payment: &Payment) -> Result<BatchLineItem, CashAppError> {
    validate_payment(payment)?;

    let ready_state = derive_ready_state(payment);
    let blocked_reason = match ready_state {
        ReadyState::Blocked => Some(derive_blocked_reason(payment)),
        _ => None,
    };

    Ok(BatchLineItem {
        payment_id: payment.id.clone(),
        payer_name: payment.payer_name.clone(),
        customer_id: payment.customer_id.clone(),
        customer_name: payment.customer_name.clone(),
        amount_cents: payment.amount_cents,
        currency: payment.currency.clone(),
        bank_account: payment.bank_account.clone(),
        workstream: derive_workstream(payment),
        ready_state,
        blocked_reason,
        posting_result: seed_posting_result(payment, ready_state),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApprovalState, ExceptionCategory, ExceptionReason};

    fn payment() -> Payment {
        let mut p = Payment::new("pmt_7", 48_250, "USD", "chase-1");
        p.payer_name = "Acme Corp".into();
        p
    }

    fn approved_ready() -> Payment {
        let mut p = payment();
        p.approval_state = Some(ApprovalState::Approved);
        p.pending_post_state = Some(PendingPostState::Ready);
        p
    }

    #[test]
    fn je_required_beats_intercompany() {
        let mut p = payment();
        p.je_required = Some(true);
        p.intercompany = true;
        assert_eq!(derive_workstream(&p), Workstream::JeRequired);
    }

    #[test]
    fn workstream_priority_chain() {
        let mut p = payment();
        p.intercompany = true;
        p.status = PaymentStatus::Exception;
        assert_eq!(derive_workstream(&p), Workstream::Intercompany);
        p.intercompany = false;
        assert_eq!(derive_workstream(&p), Workstream::Exception);
        p.status = PaymentStatus::AutoMatched;
        assert_eq!(derive_workstream(&p), Workstream::AutoMatched);
    }

    #[test]
    fn ready_requires_approval() {
        let mut p = payment();
        p.pending_post_state = Some(PendingPostState::Ready);
        assert_eq!(derive_ready_state(&p), ReadyState::Blocked);
        p.approval_state = Some(ApprovalState::NeedsApproval);
        assert_eq!(derive_ready_state(&p), ReadyState::Blocked);
        assert_eq!(derive_ready_state(&approved_ready()), ReadyState::Ready);
    }

    #[test]
    fn approval_alone_is_not_ready() {
        let mut p = payment();
        p.approval_state = Some(ApprovalState::Approved);
        assert_eq!(derive_ready_state(&p), ReadyState::Blocked);
        assert_eq!(derive_blocked_reason(&p), BlockedReason::DimensionsMissing);
    }

    #[test]
    fn failed_pending_post_is_failed() {
        let mut p = approved_ready();
        p.pending_post_state = Some(PendingPostState::Failed);
        p.post_error_code = Some("ERP-409".into());
        p.post_error_message = Some("period closed".into());
        let item = derive_line_item(&p).unwrap();
        assert_eq!(item.ready_state(), ReadyState::Failed);
        assert_eq!(item.blocked_reason(), None);
        assert_eq!(item.posting_result().status, PostingStatus::Error);
        assert_eq!(item.posting_result().error_code.as_deref(), Some("ERP-409"));
        item.check_invariants().unwrap();
    }

    #[test]
    fn posted_status_carries_ledger_ids() {
        let mut p = payment();
        p.status = PaymentStatus::Posted;
        p.ledger_payment_id = Some("NS-PMT-1".into());
        let item = derive_line_item(&p).unwrap();
        assert_eq!(item.ready_state(), ReadyState::Posted);
        assert_eq!(item.posting_result().status, PostingStatus::Success);
        assert_eq!(item.posting_result().ledger_payment_id.as_deref(), Some("NS-PMT-1"));
    }

    #[test]
    fn blocked_reason_mapping() {
        let cases = [
            (Some(PendingPostState::JeApprovalPending), false, BlockedReason::JeApproval),
            (Some(PendingPostState::SyncPending), false, BlockedReason::SyncPending),
            (Some(PendingPostState::NeedsApproval), true, BlockedReason::EvidenceRequired),
            (None, true, BlockedReason::JeApproval),
            (None, false, BlockedReason::DimensionsMissing),
            (Some(PendingPostState::Ready), false, BlockedReason::DimensionsMissing),
        ];
        for (state, je, expected) in cases {
            let mut p = payment();
            p.pending_post_state = state;
            p.je_required = Some(je);
            let item = derive_line_item(&p).unwrap();
            assert_eq!(item.ready_state(), ReadyState::Blocked);
            assert_eq!(item.blocked_reason(), Some(expected), "state {state:?}, je {je}");
            assert_eq!(item.posting_result().status, PostingStatus::NotStarted);
        }
    }

    #[test]
    fn ready_line_has_no_blocked_reason() {
        let item = derive_line_item(&approved_ready()).unwrap();
        assert_eq!(item.ready_state(), ReadyState::Ready);
        assert_eq!(item.blocked_reason(), None);
        assert_eq!(item.payer_name, "Acme Corp");
        assert_eq!(item.amount_cents, 48_250);
    }

    #[test]
    fn malformed_payments_are_rejected() {
        let mut p = payment();
        p.id = String::new();
        assert!(matches!(derive_line_item(&p), Err(CashAppError::InvalidPayment { .. })));

        let mut p = payment();
        p.currency = "usd".into();
        assert!(derive_line_item(&p).is_err());

        let mut p = payment();
        p.bank_account = "  ".into();
        assert!(derive_line_item(&p).is_err());

        let mut p = payment();
        p.exception_reason = Some(ExceptionReason::BankReturn);
        p.exception_category = Some(ExceptionCategory::InvoiceIssue);
        assert!(derive_line_item(&p).is_err());

        let mut p = payment();
        p.exception_category = Some(ExceptionCategory::Duplicate);
        assert!(derive_line_item(&p).is_err());
    }
}
