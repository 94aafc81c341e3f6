//! Posting result recording.
//!
//! [`record_post_result`] is the only writer of a line's posting result after
//! a real attempt. The batch-level side (one audit entry per attempt, status
//! settlement) lives in [`crate::batch::PaymentBatch::apply_post_results`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::{BatchLineItem, PostingResult, PostingStatus, ReadyState};

/// What the ledger said about one posting attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PostOutcome {
    Success {
        ledger_payment_id: String,
        ledger_je_id: Option<String>,
        posted_at: DateTime<Utc>,
    },
    Failure {
        code: Option<String>,
        message: String,
        attempted_at: DateTime<Utc>,
    },
}

impl PostOutcome {
    pub fn success(ledger_payment_id: impl Into<String>, ledger_je_id: Option<String>) -> Self {
        Self::Success {
            ledger_payment_id: ledger_payment_id.into(),
            ledger_je_id,
            posted_at: Utc::now(),
        }
    }

    pub fn failure(code: Option<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            code,
            message: message.into(),
            attempted_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Counts for one attempt. `Display` is the audit message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PostAttemptSummary {
    pub posted: usize,
    pub failed: usize,
}

impl std::fmt::Display for PostAttemptSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} posted, {} failed", self.posted, self.failed)
    }
}

/// Apply one outcome to a line. The journal-entry id is only kept for
/// workstreams that produce a journal entry.
pub fn record_post_result(item: &BatchLineItem, outcome: &PostOutcome) -> BatchLineItem {
    let mut next = item.clone();
    next.blocked_reason = None;

    match outcome {
        PostOutcome::Success { ledger_payment_id, ledger_je_id, posted_at } => {
            next.ready_state = ReadyState::Posted;
            next.posting_result = PostingResult {
                status: PostingStatus::Success,
                ledger_payment_id: Some(ledger_payment_id.clone()),
                ledger_je_id: if item.workstream.produces_journal_entry() {
                    ledger_je_id.clone()
                } else {
                    None
                },
                attempted_at: Some(*posted_at),
                ..PostingResult::default()
            };
        }
        PostOutcome::Failure { code, message, attempted_at } => {
            let code = code
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| opaque_error_code(&item.payment_id, message));
            log::warn!("payment {}: posting failed [{code}] {message}", item.payment_id);
            next.ready_state = ReadyState::Failed;
            next.posting_result = PostingResult {
                status: PostingStatus::Error,
                error_code: Some(code),
                error_message: Some(message.clone()),
                attempted_at: Some(*attempted_at),
                ..PostingResult::default()
            };
        }
    }
    next
}

/// Stable code for a failure the ledger did not code itself: `PST-` plus the
/// first 8 hex digits of SHA-256 over `payment_id:message`.
pub fn opaque_error_code(payment_id: &str, message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payment_id.as_bytes());
    hasher.update(b":");
    hasher.update(message.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(4).map(|b| format!("{b:02X}")).collect();
    format!("PST-{hex}")
}
