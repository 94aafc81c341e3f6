//! Settlement state resolution: normalizes heterogeneous settlement fields.
//!
//! Rule order:
//! - explicit `settlement_state` wins
//! - lifecycle `SettlementPending` forces Pending
//! - a failed/returned status in either the current or the legacy field forces Failed
//! - a final/cleared status in either field forces Confirmed
//! - otherwise None
//!
//! The classifier's settlement rules read this value, never the raw fields.

use crate::model::{LegacySettlementStatus, Payment, PaymentStatus, SettlementState};

pub fn resolve_settlement_state(payment: &Payment) -> SettlementState {
    if let Some(state) = payment.settlement_state {
        return state;
    }

    if payment.status == PaymentStatus::SettlementPending {
        return SettlementState::Pending;
    }

    let statuses = [payment.settlement_status, payment.legacy_settlement_status];

    if statuses.iter().flatten().any(|s| is_failed(*s)) {
        return SettlementState::Failed;
    }

    if statuses.iter().flatten().any(|s| is_final(*s)) {
        return SettlementState::Confirmed;
    }

    SettlementState::None
}

fn is_failed(status: LegacySettlementStatus) -> bool {
    matches!(status, LegacySettlementStatus::Failed | LegacySettlementStatus::Returned)
}

fn is_final(status: LegacySettlementStatus) -> bool {
    matches!(status, LegacySettlementStatus::Final | LegacySettlementStatus::Cleared)
}
