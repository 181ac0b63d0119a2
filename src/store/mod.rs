//! Durable storage for runs and calls.
//!
//! The [`Store`] trait exposes the five coarse operations the runtime needs;
//! everything else (SQL, row mapping, dialect quirks) stays behind it. The
//! UNIQUE index on `(run_id, step_name, idempotency_key, phase)` is the only
//! coordination primitive: [`Store::claim_call`] must surface a violation of
//! that index as [`StoreError::UniqueViolation`] so the executor can fall
//! back to waiting on the winning row, and must normalize every other
//! backend failure to [`StoreError::Backend`].

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{CallRecord, CallStatus, LlmUsage, Phase, RunRecord, RunStatus, RunTotals};

pub mod memory;
pub mod schema;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Errors from store operations, normalized across backends.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// The `(run_id, step_name, idempotency_key, phase)` tuple already
    /// exists. Internal claim signal; never escapes to the user.
    #[error("call already claimed for this (run, step, idempotency key, phase)")]
    #[diagnostic(code(agenttrail::store::unique_violation))]
    UniqueViolation,

    /// A row required by the operation does not exist.
    #[error("not found: {what}")]
    #[diagnostic(code(agenttrail::store::not_found))]
    NotFound { what: String },

    /// Backend failure (connectivity, SQL, serialization of row payloads).
    #[error("store backend error: {message}")]
    #[diagnostic(
        code(agenttrail::store::backend),
        help("Check database connectivity and schema; backend message: {message}.")
    )]
    Backend { message: String },
}

impl StoreError {
    pub(crate) fn backend(message: impl Into<String>) -> Self {
        StoreError::Backend {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable key/row operations over the `runs` and `calls` tables.
///
/// Implementations must be `Send + Sync`; many sessions across many workers
/// share one store. All timestamps are UTC.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new run row. Fails if the id collides.
    async fn create_run(&self, run: &RunRecord) -> Result<()>;

    /// Update a run's terminal fields. Does not error when the run is absent.
    async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output_json: Option<String>,
        error: Option<String>,
        totals: &RunTotals,
    ) -> Result<()>;

    /// Read one run row.
    async fn read_run(&self, run_id: Uuid) -> Result<Option<RunRecord>>;

    /// Insert a pending call row — the idempotency claim. Returns
    /// [`StoreError::UniqueViolation`] when the `(run, step, key, phase)`
    /// tuple already exists; all other failures propagate as `Backend`.
    async fn claim_call(&self, call: &CallRecord) -> Result<()>;

    /// Transition a call to success/error with outputs and usage numbers.
    /// Idempotent on identical inputs.
    async fn finalize_call(
        &self,
        call_id: Uuid,
        status: CallStatus,
        output_json: Option<String>,
        error: Option<String>,
        usage: Option<&LlmUsage>,
    ) -> Result<()>;

    /// Read a single call by its uniqueness tuple (the wait-on-claim path).
    async fn read_call(
        &self,
        run_id: Uuid,
        step_name: &str,
        idempotency_key: &str,
        phase: Phase,
    ) -> Result<Option<CallRecord>>;

    /// All calls of a run in ascending `seq_no` order (the replay path).
    async fn read_call_list(&self, run_id: Uuid) -> Result<Vec<CallRecord>>;
}
