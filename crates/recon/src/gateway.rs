//! Posting gateway seam and the batch posting run.
//!
//! The ledger adapter deduplicates on [`IdempotencyKey`]; in-process we also
//! keep at most one in-flight post per payment id. Each post runs on its own
//! worker thread and is awaited with the configured timeout. A timeout is
//! recorded as an ERROR outcome and is retryable on the next run.
//! Cancellation stops new dispatches; a post already in flight is awaited
//! and its real outcome recorded.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::batch::PaymentBatch;
use crate::config::{IdempotencyScope, PostingConfig};
use crate::error::CashAppError;
use crate::model::{BatchLineItem, BatchMetrics, BatchStatus, Workstream};
use crate::posting::{PostAttemptSummary, PostOutcome};

pub const TIMEOUT_CODE: &str = "GATEWAY_TIMEOUT";
pub const WORKER_LOST_CODE: &str = "GATEWAY_WORKER_LOST";

// ---------------------------------------------------------------------------
// Gateway contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(scope: IdempotencyScope, batch_id: &str, payment_id: &str) -> Self {
        match scope {
            IdempotencyScope::Payment => Self(payment_id.to_string()),
            IdempotencyScope::BatchPayment => Self(format!("{batch_id}:{payment_id}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRequest {
    pub idempotency_key: IdempotencyKey,
    pub batch_id: String,
    pub payment_id: String,
    pub posting_date: NaiveDate,
    pub amount_cents: i64,
    pub currency: String,
    pub bank_account: String,
    pub customer_id: Option<String>,
    pub workstream: Workstream,
}

impl PostRequest {
    fn for_item(
        item: &BatchLineItem,
        batch_id: &str,
        posting_date: NaiveDate,
        scope: IdempotencyScope,
    ) -> Self {
        Self {
            idempotency_key: IdempotencyKey::new(scope, batch_id, &item.payment_id),
            batch_id: batch_id.to_string(),
            payment_id: item.payment_id.clone(),
            posting_date,
            amount_cents: item.amount_cents,
            currency: item.currency.clone(),
            bank_account: item.bank_account.clone(),
            customer_id: item.customer_id.clone(),
            workstream: item.workstream(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerReceipt {
    pub ledger_payment_id: String,
    pub ledger_je_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayError {
    pub code: Option<String>,
    pub message: String,
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for GatewayError {}

/// ERP / ledger adapter. Implementations must treat a repeated
/// idempotency key as the same posting, never a second booking.
pub trait PostingGateway: Send + Sync {
    fn post(&self, request: &PostRequest) -> Result<LedgerReceipt, GatewayError>;
}

// ---------------------------------------------------------------------------
// In-memory ledger
// ---------------------------------------------------------------------------

/// Ledger adapter that books into memory. Used for dry runs and tests.
#[derive(Default)]
pub struct InMemoryLedger {
    booked: Mutex<HashMap<IdempotencyKey, LedgerReceipt>>,
    scripted_failures: Mutex<HashMap<String, GatewayError>>,
    delay: Option<Duration>,
    calls: AtomicU64,
    sequence: AtomicU64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every post sleeps this long before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    /// Reject posts for `payment_id` until [`InMemoryLedger::clear_failure`].
    pub fn fail_payment(&self, payment_id: &str, code: Option<&str>, message: &str) {
        self.scripted_failures.lock().insert(
            payment_id.to_string(),
            GatewayError { code: code.map(str::to_string), message: message.to_string() },
        );
    }

    pub fn clear_failure(&self, payment_id: &str) {
        self.scripted_failures.lock().remove(payment_id);
    }

    /// Distinct bookings made (duplicates by key are not counted).
    pub fn bookings(&self) -> usize {
        self.booked.lock().len()
    }

    /// Total `post` calls received, including duplicates and failures.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PostingGateway for InMemoryLedger {
    fn post(&self, request: &PostRequest) -> Result<LedgerReceipt, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if let Some(err) = self.scripted_failures.lock().get(&request.payment_id) {
            return Err(err.clone());
        }

        let mut booked = self.booked.lock();
        if let Some(existing) = booked.get(&request.idempotency_key) {
            log::debug!("ledger: replayed key {}", request.idempotency_key.as_str());
            return Ok(existing.clone());
        }
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let receipt = LedgerReceipt {
            ledger_payment_id: format!("LP-{seq:06}"),
            ledger_je_id: request
                .workstream
                .produces_journal_entry()
                .then(|| format!("LJE-{seq:06}")),
        };
        booked.insert(request.idempotency_key.clone(), receipt.clone());
        Ok(receipt)
    }
}

// ---------------------------------------------------------------------------
// Shared batch + cancellation
// ---------------------------------------------------------------------------

/// A batch behind a lock. Each method is one critical section, so
/// aggregates are never observed half-updated.
#[derive(Clone)]
pub struct SharedBatch(Arc<RwLock<PaymentBatch>>);

impl SharedBatch {
    pub fn new(batch: PaymentBatch) -> Self {
        Self(Arc::new(RwLock::new(batch)))
    }

    pub fn snapshot(&self) -> PaymentBatch {
        self.0.read().clone()
    }

    pub fn metrics(&self) -> BatchMetrics {
        self.0.read().metrics()
    }

    pub fn status(&self) -> BatchStatus {
        self.0.read().status()
    }

    pub fn update<T>(
        &self,
        f: impl FnOnce(&mut PaymentBatch) -> Result<T, CashAppError>,
    ) -> Result<T, CashAppError> {
        let mut guard = self.0.write();
        f(&mut guard)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Payment ids with a post in flight.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<String>>>);

impl InFlight {
    fn try_claim(&self, payment_id: &str) -> Option<InFlightGuard> {
        let mut set = self.0.lock();
        if !set.insert(payment_id.to_string()) {
            return None;
        }
        Some(InFlightGuard { registry: self.clone(), payment_id: payment_id.to_string() })
    }

    fn contains(&self, payment_id: &str) -> bool {
        self.0.lock().contains(payment_id)
    }
}

struct InFlightGuard {
    registry: InFlight,
    payment_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.0.lock().remove(&self.payment_id);
    }
}

// ---------------------------------------------------------------------------
// Posting run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PostingReport {
    pub batch_id: String,
    pub status: BatchStatus,
    pub summary: PostAttemptSummary,
    pub metrics: BatchMetrics,
    pub cancelled: bool,
    /// Left untouched because cancellation arrived before dispatch.
    pub not_dispatched: Vec<String>,
    /// Skipped because an earlier post for the same payment is still running.
    pub skipped_in_flight: Vec<String>,
}

pub struct Poster {
    gateway: Arc<dyn PostingGateway>,
    timeout: Duration,
    scope: IdempotencyScope,
    in_flight: InFlight,
}

impl Poster {
    pub fn new(gateway: Arc<dyn PostingGateway>, config: &PostingConfig) -> Self {
        Self {
            gateway,
            timeout: config.timeout(),
            scope: config.idempotency_scope,
            in_flight: InFlight::default(),
        }
    }

    pub fn is_in_flight(&self, payment_id: &str) -> bool {
        self.in_flight.contains(payment_id)
    }

    /// Post every READY and FAILED line of `batch`. POSTED and BLOCKED lines
    /// are never dispatched. Retrying is always an explicit new call.
    pub fn post_batch(
        &self,
        batch: &SharedBatch,
        cancel: &CancelToken,
    ) -> Result<PostingReport, CashAppError> {
        let (items, batch_id, posting_date) = batch.update(|b| {
            let items = b.begin_posting()?;
            Ok((items, b.id.clone(), b.posting_date))
        })?;
        log::info!("batch {batch_id}: dispatching {} item(s)", items.len());

        let mut outcomes = Vec::with_capacity(items.len());
        let mut not_dispatched = Vec::new();
        let mut skipped_in_flight = Vec::new();

        for item in &items {
            if cancel.is_cancelled() {
                not_dispatched.push(item.payment_id.clone());
                continue;
            }
            let Some(guard) = self.in_flight.try_claim(&item.payment_id) else {
                log::warn!("batch {batch_id}: {} already in flight, skipped", item.payment_id);
                skipped_in_flight.push(item.payment_id.clone());
                continue;
            };
            let request = PostRequest::for_item(item, &batch_id, posting_date, self.scope);
            let outcome = self.dispatch(request, guard);
            outcomes.push((item.payment_id.clone(), outcome));
        }

        if !not_dispatched.is_empty() {
            log::info!(
                "batch {batch_id}: cancelled, {} item(s) not dispatched",
                not_dispatched.len()
            );
        }

        let (summary, status, metrics) = batch.update(|b| {
            let summary = b.apply_post_results(&outcomes, Utc::now())?;
            Ok((summary, b.status(), b.metrics()))
        })?;
        log::info!("batch {batch_id}: {summary} -> {status}");

        Ok(PostingReport {
            batch_id,
            status,
            summary,
            metrics,
            cancelled: cancel.is_cancelled(),
            not_dispatched,
            skipped_in_flight,
        })
    }

    fn dispatch(&self, request: PostRequest, guard: InFlightGuard) -> PostOutcome {
        let (tx, rx) = mpsc::channel();
        let gateway = Arc::clone(&self.gateway);
        let worker_request = request.clone();
        thread::spawn(move || {
            // Released when the gateway call returns, even after a timeout.
            let _guard = guard;
            let result = gateway.post(&worker_request);
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(receipt)) => PostOutcome::Success {
                ledger_payment_id: receipt.ledger_payment_id,
                ledger_je_id: receipt.ledger_je_id,
                posted_at: Utc::now(),
            },
            Ok(Err(err)) => PostOutcome::Failure {
                code: err.code,
                message: err.message,
                attempted_at: Utc::now(),
            },
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "payment {}: no ledger response within {} ms",
                    request.payment_id,
                    self.timeout.as_millis()
                );
                PostOutcome::Failure {
                    code: Some(TIMEOUT_CODE.into()),
                    message: format!("no ledger response within {} ms", self.timeout.as_millis()),
                    attempted_at: Utc::now(),
                }
            }
            Err(RecvTimeoutError::Disconnected) => PostOutcome::Failure {
                code: Some(WORKER_LOST_CODE.into()),
                message: "gateway worker exited without a response".into(),
                attempted_at: Utc::now(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountPolicy;
    use crate::model::{ApprovalState, Payment, PendingPostState, ReadyState};

    fn ready(id: &str) -> Payment {
        let mut p = Payment::new(id, 1_000, "USD", "chase-1");
        p.approval_state = Some(ApprovalState::Approved);
        p.pending_post_state = Some(PendingPostState::Ready);
        p
    }

    fn shared(payments: &[Payment]) -> SharedBatch {
        let mut batch = PaymentBatch::new(
            "b_9",
            "Lockbox",
            NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
            "US01",
            "USD",
            AccountPolicy::Single,
        );
        for p in payments {
            batch.add_payment(p).unwrap();
        }
        SharedBatch::new(batch)
    }

    fn config(timeout_ms: u64) -> PostingConfig {
        PostingConfig { timeout_ms, idempotency_scope: IdempotencyScope::BatchPayment }
    }

    #[test]
    fn idempotency_key_scopes() {
        assert_eq!(IdempotencyKey::new(IdempotencyScope::Payment, "b", "p").as_str(), "p");
        assert_eq!(IdempotencyKey::new(IdempotencyScope::BatchPayment, "b", "p").as_str(), "b:p");
    }

    #[test]
    fn in_memory_ledger_replays_duplicate_keys() {
        let ledger = InMemoryLedger::new();
        let item = crate::derive::derive_line_item(&ready("p1")).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        let req = PostRequest::for_item(&item, "b", date, IdempotencyScope::BatchPayment);
        let first = ledger.post(&req).unwrap();
        let second = ledger.post(&req).unwrap();
        assert_eq!(first, second);
        assert_eq!(ledger.bookings(), 1);
        assert_eq!(ledger.calls(), 2);
    }

    #[test]
    fn posts_all_ready_items() {
        let batch = shared(&[ready("p1"), ready("p2")]);
        let ledger = Arc::new(InMemoryLedger::new());
        let poster = Poster::new(ledger.clone(), &config(1_000));
        let report = poster.post_batch(&batch, &CancelToken::new()).unwrap();
        assert_eq!(report.summary.posted, 2);
        assert_eq!(report.status, BatchStatus::Posted);
        assert_eq!(ledger.bookings(), 2);
    }

    #[test]
    fn retry_only_reposts_failed_items() {
        let batch = shared(&[ready("p1"), ready("p2")]);
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.fail_payment("p2", Some("ERP-503"), "ledger busy");
        let poster = Poster::new(ledger.clone(), &config(1_000));

        let first = poster.post_batch(&batch, &CancelToken::new()).unwrap();
        assert_eq!(first.status, BatchStatus::Partial);
        assert_eq!(ledger.calls(), 2);

        ledger.clear_failure("p2");
        let second = poster.post_batch(&batch, &CancelToken::new()).unwrap();
        assert_eq!(second.summary.posted, 1);
        assert_eq!(second.status, BatchStatus::Posted);
        assert_eq!(ledger.calls(), 3);
        assert_eq!(ledger.bookings(), 2);
    }

    #[test]
    fn timeout_is_recorded_as_error() {
        let batch = shared(&[ready("p1")]);
        let ledger = Arc::new(InMemoryLedger::with_delay(Duration::from_millis(300)));
        let poster = Poster::new(ledger, &config(20));
        let report = poster.post_batch(&batch, &CancelToken::new()).unwrap();
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.status, BatchStatus::Failed);
        let snapshot = batch.snapshot();
        let line = snapshot.line("p1").unwrap();
        assert_eq!(line.ready_state(), ReadyState::Failed);
        assert_eq!(line.posting_result().error_code.as_deref(), Some(TIMEOUT_CODE));
    }

    #[test]
    fn timed_out_post_blocks_duplicate_dispatch() {
        let batch = shared(&[ready("p1")]);
        let ledger = Arc::new(InMemoryLedger::with_delay(Duration::from_millis(400)));
        let poster = Poster::new(ledger.clone(), &config(20));
        poster.post_batch(&batch, &CancelToken::new()).unwrap();
        assert!(poster.is_in_flight("p1"));

        let retry = poster.post_batch(&batch, &CancelToken::new()).unwrap();
        assert_eq!(retry.skipped_in_flight, vec!["p1".to_string()]);
        assert_eq!(retry.status, BatchStatus::Failed);
    }

    #[test]
    fn cancelled_run_dispatches_nothing() {
        let batch = shared(&[ready("p1"), ready("p2")]);
        let ledger = Arc::new(InMemoryLedger::new());
        let poster = Poster::new(ledger.clone(), &config(1_000));
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = poster.post_batch(&batch, &cancel).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.not_dispatched.len(), 2);
        assert_eq!(ledger.calls(), 0);
        assert_eq!(report.status, BatchStatus::Draft);
        assert_eq!(batch.metrics().ready_count, 2);
    }

    #[test]
    fn cancel_mid_run_lets_in_flight_post_finish() {
        let batch = shared(&[ready("p1"), ready("p2"), ready("p3")]);
        let ledger = Arc::new(InMemoryLedger::with_delay(Duration::from_millis(200)));
        let poster = Poster::new(ledger.clone(), &config(2_000));
        let cancel = CancelToken::new();

        let canceller = {
            let ledger = Arc::clone(&ledger);
            let cancel = cancel.clone();
            thread::spawn(move || {
                while ledger.calls() == 0 {
                    thread::sleep(Duration::from_millis(5));
                }
                cancel.cancel();
            })
        };
        let report = poster.post_batch(&batch, &cancel).unwrap();
        canceller.join().unwrap();

        assert!(report.cancelled);
        assert_eq!(ledger.calls(), 1);
        assert_eq!(report.summary.posted, 1);
        assert_eq!(report.not_dispatched, vec!["p2".to_string(), "p3".to_string()]);
        assert_eq!(report.status, BatchStatus::Partial);

        let snapshot = batch.snapshot();
        let p1 = snapshot.line("p1").unwrap();
        assert_eq!(p1.ready_state(), ReadyState::Posted);
        assert!(p1.posting_result().ledger_payment_id.is_some());
        for id in ["p2", "p3"] {
            let line = snapshot.line(id).unwrap();
            assert_eq!(line.ready_state(), ReadyState::Ready);
            assert_eq!(line.posting_result().status, crate::model::PostingStatus::NotStarted);
        }
        assert_eq!(snapshot.metrics().ready_count, 2);
    }

    #[test]
    fn blocked_items_are_never_dispatched() {
        let blocked = Payment::new("p2", 500, "USD", "chase-1");
        let batch = shared(&[ready("p1"), blocked]);
        let ledger = Arc::new(InMemoryLedger::new());
        let poster = Poster::new(ledger.clone(), &config(1_000));
        let report = poster.post_batch(&batch, &CancelToken::new()).unwrap();
        assert_eq!(ledger.calls(), 1);
        assert_eq!(report.status, BatchStatus::Partial);
        assert_eq!(report.metrics.blocked_count, 1);
    }
}
