//! # AgentTrail: durable step execution for agentic workflows
//!
//! AgentTrail wraps ordinary functions ("steps") with persistent event
//! logging, idempotency deduplication, LLM cost accounting, saga-style
//! compensation, and deterministic replay — exactly-once *effects* on top of
//! at-least-once *invocations*, coordinated through nothing but a UNIQUE
//! constraint in a relational store.
//!
//! ## Core Concepts
//!
//! - **Run**: one execution of a workflow, owned by a [`runtime::Session`]
//! - **Step**: a function registered by name with the [`runtime::Runtime`]
//! - **Call**: one attempt of a step inside a run; one row per attempt
//! - **Claim**: the INSERT of a pending call row under the uniqueness tuple
//!   `(run, step, fingerprint, phase)` — whoever inserts first runs the
//!   function, everyone else adopts the recorded result
//! - **Compensation**: registered undo-steps, walked in reverse when a run
//!   fails
//! - **Replay**: re-running a workflow against a recorded call list without
//!   touching side effects
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agenttrail::errors::BoxError;
//! use agenttrail::runtime::{Runtime, SessionOptions};
//! use agenttrail::types::StepArgs;
//! use serde_json::{json, Value};
//!
//! async fn reserve(args: StepArgs) -> Result<Value, BoxError> {
//!     let email = args.positional[0].as_str().unwrap_or_default();
//!     Ok(json!({ "hold": format!("H:{email}") }))
//! }
//!
//! async fn refund(_args: StepArgs) -> Result<Value, BoxError> {
//!     Ok(json!("refunded"))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = Runtime::connect("sqlite://agenttrail.db?mode=rwc").await?;
//!     let reserve = runtime.step("reserve", reserve);
//!     runtime.step("refund", refund);
//!     runtime.register_compensation("reserve", "refund");
//!
//!     let output = runtime
//!         .session(SessionOptions::named("checkout"), |_session| async {
//!             reserve.call(StepArgs::new().arg("a@x")).await
//!         })
//!         .await?;
//!     println!("{output}");
//!     Ok(())
//! }
//! ```
//!
//! Calling a [`runtime::StepHandle`] outside any session passes straight
//! through to the underlying function — workflow code stays callable as
//! plain code.
//!
//! ## Module Guide
//!
//! - [`runtime`] - Registry, sessions, the step executor, and replay
//! - [`store`] - The `Store` trait and the in-memory/SQLite/Postgres backends
//! - [`fingerprint`] - Canonical type-tagged hashing of call inputs
//! - [`context`] - Ambient session / current-call task-local slots
//! - [`types`] - Run/call records, phases, step arguments, usage accounting
//! - [`errors`] - The `TrailError` taxonomy
//! - [`config`] - Environment resolution and runtime tunables
//! - [`telemetry`] - Optional `tracing` subscriber setup

pub mod config;
pub mod context;
pub mod errors;
pub mod fingerprint;
pub mod runtime;
pub mod store;
pub mod telemetry;
pub mod types;
