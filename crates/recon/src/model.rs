use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Wire name + `Display` for closed enums. Every enum also lists its
/// variants in `ALL` so lookup tables can be checked for totality.
macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Payment lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    New,
    AutoMatched,
    Exception,
    SettlementPending,
    PendingToPost,
    Posted,
    PostFailed,
    NonAr,
}

wire_enum!(PaymentStatus {
    New => "NEW",
    AutoMatched => "AUTO_MATCHED",
    Exception => "EXCEPTION",
    SettlementPending => "SETTLEMENT_PENDING",
    PendingToPost => "PENDING_TO_POST",
    Posted => "POSTED",
    PostFailed => "POST_FAILED",
    NonAr => "NON_AR",
});

// ---------------------------------------------------------------------------
// Exception taxonomy
// ---------------------------------------------------------------------------

/// Coarse exception bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionCategory {
    MissingRemittance,
    InvoiceIssue,
    CreditIssue,
    Settlement,
    JournalEntryNeeded,
    AmountVariance,
    CustomerIdentity,
    Duplicate,
}

wire_enum!(ExceptionCategory {
    MissingRemittance => "MISSING_REMITTANCE",
    InvoiceIssue => "INVOICE_ISSUE",
    CreditIssue => "CREDIT_ISSUE",
    Settlement => "SETTLEMENT",
    JournalEntryNeeded => "JOURNAL_ENTRY_NEEDED",
    AmountVariance => "AMOUNT_VARIANCE",
    CustomerIdentity => "CUSTOMER_IDENTITY",
    Duplicate => "DUPLICATE",
});

/// Fine-grained exception cause. Each reason is owned by exactly one
/// [`ExceptionCategory`] (see [`crate::tables::category_for`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionReason {
    RemittanceParseError,
    RemittanceMissing,
    InvoiceNotFound,
    InvoiceClosed,
    InvoiceAlreadyPaid,
    InvoiceInvalid,
    CreditMemoInvalid,
    CreditMemoAlreadyApplied,
    CreditMemoNotFound,
    SettlementPending,
    AchFailed,
    BankReturn,
    SettlementFailed,
    UnappliedCash,
    ManualJeRequired,
    ShortPayment,
    Overpayment,
    UnidentifiedPayer,
    DuplicatePayment,
}

wire_enum!(ExceptionReason {
    RemittanceParseError => "REMITTANCE_PARSE_ERROR",
    RemittanceMissing => "REMITTANCE_MISSING",
    InvoiceNotFound => "INVOICE_NOT_FOUND",
    InvoiceClosed => "INVOICE_CLOSED",
    InvoiceAlreadyPaid => "INVOICE_ALREADY_PAID",
    InvoiceInvalid => "INVOICE_INVALID",
    CreditMemoInvalid => "CREDIT_MEMO_INVALID",
    CreditMemoAlreadyApplied => "CREDIT_MEMO_ALREADY_APPLIED",
    CreditMemoNotFound => "CREDIT_MEMO_NOT_FOUND",
    SettlementPending => "SETTLEMENT_PENDING",
    AchFailed => "ACH_FAILED",
    BankReturn => "BANK_RETURN",
    SettlementFailed => "SETTLEMENT_FAILED",
    UnappliedCash => "UNAPPLIED_CASH",
    ManualJeRequired => "MANUAL_JE_REQUIRED",
    ShortPayment => "SHORT_PAYMENT",
    Overpayment => "OVERPAYMENT",
    UnidentifiedPayer => "UNIDENTIFIED_PAYER",
    DuplicatePayment => "DUPLICATE_PAYMENT",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceProblem {
    NotFound,
    Closed,
    Paid,
    Invalid,
}

wire_enum!(InvoiceProblem {
    NotFound => "NOT_FOUND",
    Closed => "CLOSED",
    Paid => "PAID",
    Invalid => "INVALID",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditMemoProblem {
    Invalid,
    AlreadyApplied,
    NotFound,
}

wire_enum!(CreditMemoProblem {
    Invalid => "INVALID",
    AlreadyApplied => "ALREADY_APPLIED",
    NotFound => "NOT_FOUND",
});

/// Coarse exception type written by older ingestion paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegacyExceptionType {
    MissingRemittance,
    ShortPay,
    OverPay,
    Unidentified,
    Duplicate,
    InvoiceMismatch,
    JeRequired,
}

wire_enum!(LegacyExceptionType {
    MissingRemittance => "MISSING_REMITTANCE",
    ShortPay => "SHORT_PAY",
    OverPay => "OVER_PAY",
    Unidentified => "UNIDENTIFIED",
    Duplicate => "DUPLICATE",
    InvoiceMismatch => "INVOICE_MISMATCH",
    JeRequired => "JE_REQUIRED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionState {
    Open,
    Resolved,
    WrittenOff,
}

wire_enum!(ResolutionState {
    Open => "OPEN",
    Resolved => "RESOLVED",
    WrittenOff => "WRITTEN_OFF",
});

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Bank-side confirmation lifecycle, independent of ledger posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementState {
    #[default]
    None,
    Pending,
    Failed,
    Confirmed,
}

wire_enum!(SettlementState {
    None => "NONE",
    Pending => "PENDING",
    Failed => "FAILED",
    Confirmed => "CONFIRMED",
});

/// Raw settlement status as delivered by bank feeds (both field generations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegacySettlementStatus {
    Pending,
    Failed,
    Returned,
    Final,
    Cleared,
}

wire_enum!(LegacySettlementStatus {
    Pending => "PENDING",
    Failed => "FAILED",
    Returned => "RETURNED",
    Final => "FINAL",
    Cleared => "CLEARED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementReason {
    Reversed,
    InsufficientFunds,
    AccountClosed,
    Other,
}

wire_enum!(SettlementReason {
    Reversed => "REVERSED",
    InsufficientFunds => "INSUFFICIENT_FUNDS",
    AccountClosed => "ACCOUNT_CLOSED",
    Other => "OTHER",
});

// ---------------------------------------------------------------------------
// Matching + approval signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Exact,
    Tolerance,
    Intercompany,
}

wire_enum!(MatchType {
    Exact => "EXACT",
    Tolerance => "TOLERANCE",
    Intercompany => "INTERCOMPANY",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalState {
    Approved,
    NeedsApproval,
}

wire_enum!(ApprovalState {
    Approved => "APPROVED",
    NeedsApproval => "NEEDS_APPROVAL",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingPostState {
    Ready,
    Failed,
    JeApprovalPending,
    SyncPending,
    NeedsApproval,
}

wire_enum!(PendingPostState {
    Ready => "READY",
    Failed => "FAILED",
    JeApprovalPending => "JE_APPROVAL_PENDING",
    SyncPending => "SYNC_PENDING",
    NeedsApproval => "NEEDS_APPROVAL",
});

// ---------------------------------------------------------------------------
// Payment
// ---------------------------------------------------------------------------

/// One incoming remittance / cash event.
///
/// Created on ingestion with `status = New`. Later stages only fill fields;
/// nothing here is ever replaced wholesale (see [`crate::classify::PaymentDelta`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Payment {
    pub id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub bank_account: String,
    pub entity: Option<String>,
    pub received_on: Option<NaiveDate>,
    pub payer_name: String,
    pub memo: String,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,

    pub status: PaymentStatus,
    pub exception_reason: Option<ExceptionReason>,
    pub exception_category: Option<ExceptionCategory>,
    pub exception_label: Option<String>,
    pub exception_open: Option<bool>,
    pub resolution_state: Option<ResolutionState>,
    pub legacy_exception_type: Option<LegacyExceptionType>,

    pub settlement_state: Option<SettlementState>,
    pub settlement_status: Option<LegacySettlementStatus>,
    pub legacy_settlement_status: Option<LegacySettlementStatus>,
    pub settlement_reason: Option<SettlementReason>,

    pub parse_error: bool,
    pub ach_return: bool,
    pub on_account: bool,
    pub je_required: Option<bool>,
    pub legacy_je_required: bool,
    pub intercompany: bool,
    pub invoice_problem: Option<InvoiceProblem>,
    pub credit_memo_problem: Option<CreditMemoProblem>,

    pub match_type: Option<MatchType>,
    pub match_confidence: Option<u8>,
    pub bank_transaction_ref: Option<String>,
    pub clearing_account: Option<String>,
    pub bank_match_ready: bool,

    pub approval_state: Option<ApprovalState>,
    pub pending_post_state: Option<PendingPostState>,

    pub ledger_payment_id: Option<String>,
    pub ledger_je_id: Option<String>,
    pub post_error_code: Option<String>,
    pub post_error_message: Option<String>,
    pub post_attempted_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn new(
        id: impl Into<String>,
        amount_cents: i64,
        currency: impl Into<String>,
        bank_account: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            amount_cents,
            currency: currency.into(),
            bank_account: bank_account.into(),
            ..Self::default()
        }
    }

    /// Explicit flag wins; the legacy flag only counts when no explicit value exists.
    pub fn requires_journal_entry(&self) -> bool {
        self.je_required.unwrap_or(self.legacy_je_required)
    }

    pub fn is_approved(&self) -> bool {
        self.approval_state == Some(ApprovalState::Approved)
    }
}

// ---------------------------------------------------------------------------
// Batch line items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Workstream {
    AutoMatched,
    Intercompany,
    JeRequired,
    Exception,
}

wire_enum!(Workstream {
    AutoMatched => "AUTO_MATCHED",
    Intercompany => "INTERCOMPANY",
    JeRequired => "JE_REQUIRED",
    Exception => "EXCEPTION",
});

impl Workstream {
    /// Only these lanes produce a journal-entry artifact when posted.
    pub fn produces_journal_entry(&self) -> bool {
        matches!(self, Self::JeRequired | Self::Intercompany)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadyState {
    Ready,
    Blocked,
    Failed,
    Posted,
}

wire_enum!(ReadyState {
    Ready => "READY",
    Blocked => "BLOCKED",
    Failed => "FAILED",
    Posted => "POSTED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockedReason {
    JeApproval,
    SyncPending,
    EvidenceRequired,
    DimensionsMissing,
}

wire_enum!(BlockedReason {
    JeApproval => "JE_APPROVAL",
    SyncPending => "SYNC_PENDING",
    EvidenceRequired => "EVIDENCE_REQUIRED",
    DimensionsMissing => "DIMENSIONS_MISSING",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostingStatus {
    #[default]
    NotStarted,
    Success,
    Error,
}

wire_enum!(PostingStatus {
    NotStarted => "NOT_STARTED",
    Success => "SUCCESS",
    Error => "ERROR",
});

/// Outcome of the most recent ledger posting attempt for one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PostingResult {
    pub status: PostingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_je_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempted_at: Option<DateTime<Utc>>,
}

/// Per-payment projection inside one batch.
///
/// State fields are private: they are written by the deriver
/// ([`crate::derive::derive_line_item`]) and the recorder
/// ([`crate::posting::record_post_result`]) only, which keeps
/// `Blocked ⇔ blocked_reason.is_some()` and the `Failed`/`Posted` ⇒ matching
/// posting status pairing intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLineItem {
    pub payment_id: String,
    pub payer_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub bank_account: String,
    pub(crate) workstream: Workstream,
    pub(crate) ready_state: ReadyState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) blocked_reason: Option<BlockedReason>,
    pub(crate) posting_result: PostingResult,
}

impl BatchLineItem {
    pub fn workstream(&self) -> Workstream {
        self.workstream
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    pub fn blocked_reason(&self) -> Option<BlockedReason> {
        self.blocked_reason
    }

    pub fn posting_result(&self) -> &PostingResult {
        &self.posting_result
    }

    /// Checks the state pairing rules. Deserialized items must pass this
    /// before they are trusted.
    pub fn check_invariants(&self) -> Result<(), String> {
        match (self.ready_state, self.blocked_reason) {
            (ReadyState::Blocked, None) => {
                return Err("BLOCKED line without a blocked reason".into())
            }
            (state, Some(_)) if state != ReadyState::Blocked => {
                return Err(format!("{state} line carries a blocked reason"))
            }
            _ => {}
        }
        match (self.ready_state, self.posting_result.status) {
            (ReadyState::Failed, status) if status != PostingStatus::Error => {
                Err(format!("FAILED line has posting status {status}"))
            }
            (ReadyState::Posted, status) if status != PostingStatus::Success => {
                Err(format!("POSTED line has posting status {status}"))
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    #[default]
    Draft,
    Ready,
    Posting,
    Posted,
    Partial,
    Failed,
}

wire_enum!(BatchStatus {
    Draft => "DRAFT",
    Ready => "READY",
    Posting => "POSTING",
    Posted => "POSTED",
    Partial => "PARTIAL",
    Failed => "FAILED",
});

/// Cached projection of a batch's line items. Only
/// [`crate::batch::PaymentBatch::refresh_metrics`] writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BatchMetrics {
    pub total_payments: usize,
    pub total_amount_cents: i64,
    pub ready_count: usize,
    pub blocked_count: usize,
    pub failed_count: usize,
    pub posted_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    Created,
    ItemAdded,
    ItemRemoved,
    ItemRefreshed,
    StatusChanged,
    PostAttempt,
}

wire_enum!(AuditKind {
    Created => "CREATED",
    ItemAdded => "ITEM_ADDED",
    ItemRemoved => "ITEM_REMOVED",
    ItemRefreshed => "ITEM_REFRESHED",
    StatusChanged => "STATUS_CHANGED",
    PostAttempt => "POST_ATTEMPT",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub kind: AuditKind,
    pub message: String,
}
