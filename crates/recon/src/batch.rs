//! Payment batches: membership, cached aggregates, lifecycle, audit timeline.
//!
//! Aggregates are a projection of `line_items` and live in a private field.
//! Every mutation path ends in [`PaymentBatch::refresh_metrics`]; nothing
//! increments a count directly.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::config::{AccountPolicy, BatchConfig};
use crate::derive::derive_line_item;
use crate::error::CashAppError;
use crate::model::{
    AuditEvent, AuditKind, BatchLineItem, BatchMetrics, BatchStatus, Payment, PostingStatus,
    ReadyState,
};
use crate::posting::{record_post_result, PostAttemptSummary, PostOutcome};

/// Pure aggregate over a set of line items.
pub fn compute_metrics(items: &[BatchLineItem]) -> BatchMetrics {
    let mut metrics = BatchMetrics {
        total_payments: items.len(),
        ..BatchMetrics::default()
    };
    for item in items {
        metrics.total_amount_cents = metrics.total_amount_cents.saturating_add(item.amount_cents);
        match item.ready_state {
            ReadyState::Ready => metrics.ready_count += 1,
            ReadyState::Blocked => metrics.blocked_count += 1,
            ReadyState::Failed => metrics.failed_count += 1,
            ReadyState::Posted => metrics.posted_count += 1,
        }
    }
    metrics
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentBatch {
    pub id: String,
    pub name: String,
    pub posting_date: NaiveDate,
    pub entity: String,
    pub currency: String,
    pub account_policy: AccountPolicy,
    bank_accounts: Vec<String>,
    status: BatchStatus,
    #[serde(skip)]
    resume_status: Option<BatchStatus>,
    #[serde(flatten)]
    metrics: BatchMetrics,
    line_items: Vec<BatchLineItem>,
    audit: Vec<AuditEvent>,
}

impl PaymentBatch {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        posting_date: NaiveDate,
        entity: impl Into<String>,
        currency: impl Into<String>,
        account_policy: AccountPolicy,
    ) -> Self {
        let mut batch = Self {
            id: id.into(),
            name: name.into(),
            posting_date,
            entity: entity.into(),
            currency: currency.into(),
            account_policy,
            bank_accounts: Vec::new(),
            status: BatchStatus::Draft,
            resume_status: None,
            metrics: BatchMetrics::default(),
            line_items: Vec::new(),
            audit: Vec::new(),
        };
        let message = format!("batch '{}' created for {}", batch.name, batch.posting_date);
        batch.record(AuditKind::Created, message, Utc::now());
        batch
    }

    pub fn from_config(
        id: impl Into<String>,
        name: impl Into<String>,
        posting_date: NaiveDate,
        config: &BatchConfig,
    ) -> Self {
        Self::new(
            id,
            name,
            posting_date,
            config.entity.clone(),
            config.currency.clone(),
            config.account_policy,
        )
    }

    // -----------------------------------------------------------------------
    // Read access
    // -----------------------------------------------------------------------

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn metrics(&self) -> BatchMetrics {
        self.metrics
    }

    pub fn line_items(&self) -> &[BatchLineItem] {
        &self.line_items
    }

    pub fn line(&self, payment_id: &str) -> Option<&BatchLineItem> {
        self.line_items.iter().find(|l| l.payment_id == payment_id)
    }

    pub fn bank_accounts(&self) -> &[String] {
        &self.bank_accounts
    }

    /// Append-only timeline, oldest first.
    pub fn audit(&self) -> &[AuditEvent] {
        &self.audit
    }

    /// Items a posting run may dispatch: READY lines plus FAILED retries.
    pub fn postable_items(&self) -> Vec<BatchLineItem> {
        self.line_items
            .iter()
            .filter(|l| matches!(l.ready_state, ReadyState::Ready | ReadyState::Failed))
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    pub fn add_payment(&mut self, payment: &Payment) -> Result<(), CashAppError> {
        let item = derive_line_item(payment)?;
        self.add_line(item)
    }

    pub fn add_line(&mut self, item: BatchLineItem) -> Result<(), CashAppError> {
        self.ensure_membership_open()?;
        item.check_invariants().map_err(|reason| self.reject(&item.payment_id, reason))?;
        if self.line(&item.payment_id).is_some() {
            return Err(self.reject(&item.payment_id, "payment is already in the batch".into()));
        }
        self.check_placement(&item)?;
        if self.metrics.total_amount_cents.checked_add(item.amount_cents).is_none() {
            return Err(self.reject(&item.payment_id, "batch total would overflow".into()));
        }

        if !self.bank_accounts.contains(&item.bank_account) {
            self.bank_accounts.push(item.bank_account.clone());
        }
        let message = format!(
            "added {} ({} {}, {})",
            item.payment_id, item.amount_cents, item.currency, item.ready_state
        );
        self.line_items.push(item);
        self.refresh_metrics();
        self.record(AuditKind::ItemAdded, message, Utc::now());
        Ok(())
    }

    pub fn remove_line(&mut self, payment_id: &str) -> Result<BatchLineItem, CashAppError> {
        self.ensure_membership_open()?;
        let idx = self.index_of(payment_id)?;
        let removed = self.line_items.remove(idx);
        self.rebuild_accounts();
        self.refresh_metrics();
        self.record(AuditKind::ItemRemoved, format!("removed {payment_id}"), Utc::now());
        Ok(removed)
    }

    /// Re-derive one line from an updated payment. Only lines that have never
    /// been attempted are replaced; returns whether the line changed.
    pub fn refresh_line(&mut self, payment: &Payment) -> Result<bool, CashAppError> {
        if matches!(self.status, BatchStatus::Posting | BatchStatus::Posted) {
            return Err(self.reject(&payment.id, format!("batch is {}", self.status)));
        }
        let idx = self.index_of(&payment.id)?;
        if self.line_items[idx].posting_result.status != PostingStatus::NotStarted {
            return Ok(false);
        }
        let item = derive_line_item(payment)?;
        if item.currency != self.currency || item.bank_account != self.line_items[idx].bank_account
        {
            return Err(self.reject(&payment.id, "currency or bank account changed".into()));
        }
        if item == self.line_items[idx] {
            return Ok(false);
        }
        let message = format!(
            "refreshed {}: {} -> {}",
            payment.id, self.line_items[idx].ready_state, item.ready_state
        );
        self.line_items[idx] = item;
        self.refresh_metrics();
        self.record(AuditKind::ItemRefreshed, message, Utc::now());
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Aggregates
    // -----------------------------------------------------------------------

    /// Recompute every aggregate from the current line items.
    pub fn refresh_metrics(&mut self) {
        self.metrics = compute_metrics(&self.line_items);
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn mark_ready(&mut self) -> Result<(), CashAppError> {
        self.transition(BatchStatus::Ready)
    }

    /// Enter POSTING and return the items to dispatch.
    pub fn begin_posting(&mut self) -> Result<Vec<BatchLineItem>, CashAppError> {
        if self.line_items.is_empty() {
            return Err(CashAppError::BatchRejected {
                batch_id: self.id.clone(),
                reason: "batch has no line items".into(),
            });
        }
        let prior = self.status;
        self.transition(BatchStatus::Posting)?;
        self.resume_status = Some(prior);
        Ok(self.postable_items())
    }

    /// Record every outcome of one posting attempt, recompute aggregates,
    /// append one audit entry and settle the batch status.
    ///
    /// POSTED lines accept no further outcome. A success is only accepted
    /// for READY or FAILED lines.
    pub fn apply_post_results(
        &mut self,
        outcomes: &[(String, PostOutcome)],
        at: DateTime<Utc>,
    ) -> Result<PostAttemptSummary, CashAppError> {
        if self.status != BatchStatus::Posting {
            return Err(CashAppError::InvalidTransition {
                batch_id: self.id.clone(),
                from: self.status.to_string(),
                to: "recorded results".into(),
            });
        }
        // Resolve and check every outcome before touching anything so a bad
        // entry leaves the batch intact.
        let mut indexed = Vec::with_capacity(outcomes.len());
        for (payment_id, outcome) in outcomes {
            let idx = self.index_of(payment_id)?;
            let state = self.line_items[idx].ready_state;
            if state == ReadyState::Posted {
                return Err(self.reject(payment_id, "line is already posted".into()));
            }
            if outcome.is_success() && !matches!(state, ReadyState::Ready | ReadyState::Failed) {
                let reason = format!("cannot record a posting for a {state} line");
                return Err(self.reject(payment_id, reason));
            }
            indexed.push((idx, outcome));
        }

        let mut summary = PostAttemptSummary::default();
        for (idx, outcome) in indexed {
            let updated = record_post_result(&self.line_items[idx], outcome);
            match outcome {
                PostOutcome::Success { .. } => summary.posted += 1,
                PostOutcome::Failure { .. } => summary.failed += 1,
            }
            self.line_items[idx] = updated;
        }
        self.refresh_metrics();
        self.record(AuditKind::PostAttempt, summary.to_string(), at);

        let next = self.settled_status(summary.posted + summary.failed > 0);
        self.transition(next)?;
        self.resume_status = None;
        Ok(summary)
    }

    fn settled_status(&self, attempted: bool) -> BatchStatus {
        let m = &self.metrics;
        if !attempted {
            return self.resume_status.unwrap_or(BatchStatus::Ready);
        }
        if m.posted_count == m.total_payments {
            BatchStatus::Posted
        } else if m.posted_count > 0 {
            BatchStatus::Partial
        } else if m.failed_count > 0 {
            BatchStatus::Failed
        } else {
            self.resume_status.unwrap_or(BatchStatus::Ready)
        }
    }

    fn transition(&mut self, to: BatchStatus) -> Result<(), CashAppError> {
        use BatchStatus as S;
        let allowed = match (self.status, to) {
            (S::Draft, S::Ready) | (S::Draft, S::Posting) | (S::Ready, S::Posting) => true,
            (S::Partial, S::Posting) | (S::Failed, S::Posting) => true,
            (S::Posting, next) => Some(next) == self.resume_status
                || matches!(next, S::Posted | S::Partial | S::Failed),
            _ => false,
        };
        if !allowed {
            return Err(CashAppError::InvalidTransition {
                batch_id: self.id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        log::info!("batch {}: {} -> {}", self.id, self.status, to);
        let message = format!("{} -> {}", self.status, to);
        self.status = to;
        self.record(AuditKind::StatusChanged, message, Utc::now());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn record(&mut self, kind: AuditKind, message: String, at: DateTime<Utc>) {
        self.audit.push(AuditEvent { at, kind, message });
    }

    fn ensure_membership_open(&self) -> Result<(), CashAppError> {
        match self.status {
            BatchStatus::Draft | BatchStatus::Ready => Ok(()),
            other => Err(CashAppError::BatchRejected {
                batch_id: self.id.clone(),
                reason: format!("membership is frozen once the batch is {other}"),
            }),
        }
    }

    fn check_placement(&self, item: &BatchLineItem) -> Result<(), CashAppError> {
        if item.currency != self.currency {
            return Err(self.reject(
                &item.payment_id,
                format!("currency {} does not match batch currency {}", item.currency, self.currency),
            ));
        }
        if self.account_policy == AccountPolicy::Single {
            if let Some(account) = self.bank_accounts.first() {
                if *account != item.bank_account {
                    return Err(self.reject(
                        &item.payment_id,
                        format!(
                            "bank account {} differs from batch account {account}",
                            item.bank_account
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn rebuild_accounts(&mut self) {
        let mut accounts: Vec<String> = Vec::new();
        for item in &self.line_items {
            if !accounts.contains(&item.bank_account) {
                accounts.push(item.bank_account.clone());
            }
        }
        self.bank_accounts = accounts;
    }

    fn index_of(&self, payment_id: &str) -> Result<usize, CashAppError> {
        self.line_items
            .iter()
            .position(|l| l.payment_id == payment_id)
            .ok_or_else(|| CashAppError::UnknownLineItem {
                batch_id: self.id.clone(),
                payment_id: payment_id.to_string(),
            })
    }

    fn reject(&self, payment_id: &str, reason: String) -> CashAppError {
        log::warn!("batch {}: rejected {payment_id}: {reason}", self.id);
        CashAppError::BatchRejected {
            batch_id: self.id.clone(),
            reason: format!("{payment_id}: {reason}"),
        }
    }
}
