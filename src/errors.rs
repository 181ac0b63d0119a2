//! Runtime error taxonomy.
//!
//! Store-level errors ([`crate::store::StoreError`]) are kept separate so the
//! unique-violation claim signal never leaks past the executor; everything
//! the user can observe surfaces as a [`TrailError`].

use miette::Diagnostic;
use thiserror::Error;

use crate::store::StoreError;
use crate::types::{CallStatus, Phase};

/// Boxed error type accepted from user step functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by sessions, the step executor, and the replay driver.
#[derive(Debug, Error, Diagnostic)]
pub enum TrailError {
    /// The run's accumulated cost crossed its configured cap.
    #[error("budget cap exceeded: total_cost={total_cost} limit={limit}")]
    #[diagnostic(
        code(agenttrail::budget_exceeded),
        help("Raise the session's budget_limit or reduce LLM spend before this step.")
    )]
    BudgetExceeded { total_cost: f64, limit: f64 },

    /// A user step function failed; the message is persisted on the call row
    /// before this error propagates.
    #[error("step `{step}` failed: {message}")]
    #[diagnostic(code(agenttrail::step_failed))]
    StepFailed { step: String, message: String },

    /// Waiting on another worker's pending claim passed the deadline.
    #[error("timed out waiting for pending call: {step}/{phase}")]
    #[diagnostic(
        code(agenttrail::pending_claim_timeout),
        help("Another worker claimed this call but never finalized it; check that worker's logs or raise pending_timeout.")
    )]
    PendingClaimTimeout { step: String, phase: Phase },

    /// A claim lost the insert race but the winning row could not be read back.
    #[error("claimed call row vanished: {step}/{phase}")]
    #[diagnostic(code(agenttrail::claim_vanished))]
    ClaimVanished { step: String, phase: Phase },

    /// Replay advanced past the end of the recorded call list.
    #[error("replay exceeded recorded calls")]
    #[diagnostic(code(agenttrail::replay_exhausted))]
    ReplayExhausted,

    /// The workflow diverged from the recorded trace.
    #[error(
        "replay mismatch: expected {expected_step}/{expected_phase}, recorded {recorded_step}/{recorded_phase}"
    )]
    #[diagnostic(
        code(agenttrail::replay_mismatch),
        help("The workflow function made a different call than the recorded run; replay requires the same code path.")
    )]
    ReplayMismatch {
        expected_step: String,
        expected_phase: Phase,
        recorded_step: String,
        recorded_phase: Phase,
    },

    /// The recorded call being replayed did not finish successfully.
    #[error("replayed call ended in status {status}")]
    #[diagnostic(code(agenttrail::replay_not_success))]
    ReplayNotSuccess { status: CallStatus },

    /// Invalid session or runtime configuration.
    #[error("configuration error: {message}")]
    #[diagnostic(code(agenttrail::config))]
    Config { message: String },

    /// Payload (de)serialization failure.
    #[error("serialization error: {0}")]
    #[diagnostic(code(agenttrail::serde))]
    Serde(#[from] serde_json::Error),

    /// Store failure other than the internal unique-violation signal.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

impl TrailError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        TrailError::Config {
            message: message.into(),
        }
    }
}
