//! `cashapp-recon`: cash application reconciliation engine.
//!
//! Pure engine crate: receives pre-loaded payments, classifies exceptions,
//! derives workstream and readiness, assembles posting batches and records
//! ledger outcomes. No CLI dependencies.

pub mod batch;
pub mod classify;
pub mod config;
pub mod derive;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod gateway;
pub mod model;
pub mod posting;
pub mod settlement;
pub mod tables;

pub use batch::PaymentBatch;
pub use classify::{classify, classify_in_place, ClassifierRule, PaymentDelta};
pub use config::CashAppConfig;
pub use engine::{run, BatchOptions, CashAppResult};
pub use error::CashAppError;
pub use gateway::{CancelToken, InMemoryLedger, Poster, PostingGateway, SharedBatch};
pub use model::{BatchLineItem, Payment};
pub use posting::{record_post_result, PostOutcome};
