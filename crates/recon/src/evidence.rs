use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{BatchLineItem, Payment};

/// Exception and lane counts for dashboards and the CLI summary line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExceptionSummary {
    pub total_payments: usize,
    pub exceptions: usize,
    pub open_exceptions: usize,
    pub exception_amount_cents: i64,
    pub by_category: BTreeMap<String, usize>,
    pub by_reason: BTreeMap<String, usize>,
    pub by_workstream: BTreeMap<String, usize>,
    pub by_ready_state: BTreeMap<String, usize>,
}

/// Compute summary statistics from classified payments and their line items.
pub fn compute_summary(payments: &[Payment], lines: &[BatchLineItem]) -> ExceptionSummary {
    let mut summary = ExceptionSummary {
        total_payments: payments.len(),
        ..ExceptionSummary::default()
    };

    for p in payments {
        let Some(reason) = p.exception_reason else {
            continue;
        };
        summary.exceptions += 1;
        summary.exception_amount_cents =
            summary.exception_amount_cents.saturating_add(p.amount_cents);
        if p.exception_open == Some(true) {
            summary.open_exceptions += 1;
        }
        *summary.by_reason.entry(reason.to_string()).or_insert(0) += 1;
        if let Some(category) = p.exception_category {
            *summary.by_category.entry(category.to_string()).or_insert(0) += 1;
        }
    }

    for line in lines {
        *summary.by_workstream.entry(line.workstream().to_string()).or_insert(0) += 1;
        *summary.by_ready_state.entry(line.ready_state().to_string()).or_insert(0) += 1;
    }

    summary
}
