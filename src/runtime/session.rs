//! Per-run session state machine.
//!
//! A session owns one run: its sequence counter, the executed-step stack
//! that drives saga compensation, the usage totals and budget check, and (in
//! replay mode) the cursor over the recorded trace. Sessions are entered
//! through [`crate::runtime::Runtime::session`], which guarantees
//! finalization on every exit path and publishes the session in the ambient
//! context for the duration of the body.

use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::replay::ReplayDriver;
use super::Runtime;
use crate::context;
use crate::errors::TrailError;
use crate::types::{
    CallRecord, LlmUsage, Phase, RunRecord, RunStatus, RunTotals, StepArgs,
};

/// Options for opening a session.
///
/// # Examples
///
/// ```
/// use agenttrail::runtime::SessionOptions;
///
/// let opts = SessionOptions::named("checkout")
///     .with_tags(["payments", "demo"])
///     .with_budget_limit(0.50);
/// assert_eq!(opts.name, "checkout");
/// ```
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub name: String,
    pub input_payload: Option<Value>,
    pub tags: Vec<String>,
    pub budget_limit: Option<f64>,
    pub compensate_on_budget_exceeded: bool,
    pub replay: bool,
    pub replay_run_id: Option<Uuid>,
    pub replay_calls: Option<Vec<CallRecord>>,
}

impl SessionOptions {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_payload: None,
            tags: Vec::new(),
            budget_limit: None,
            compensate_on_budget_exceeded: true,
            replay: false,
            replay_run_id: None,
            replay_calls: None,
        }
    }

    #[must_use]
    pub fn with_input(mut self, payload: Value) -> Self {
        self.input_payload = Some(payload);
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_budget_limit(mut self, limit: f64) -> Self {
        self.budget_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_compensate_on_budget_exceeded(mut self, compensate: bool) -> Self {
        self.compensate_on_budget_exceeded = compensate;
        self
    }

    /// Replay a persisted run: recorded calls are loaded from the store.
    #[must_use]
    pub fn replaying(mut self, run_id: Uuid) -> Self {
        self.replay = true;
        self.replay_run_id = Some(run_id);
        self
    }

    /// Replay from a supplied call list (e.g. an exported run).
    #[must_use]
    pub fn with_replay_calls(mut self, run_id: Uuid, calls: Vec<CallRecord>) -> Self {
        self.replay = true;
        self.replay_run_id = Some(run_id);
        self.replay_calls = Some(calls);
        self
    }
}

/// Frame pushed onto the compensation stack when a forward call is claimed.
#[derive(Clone, Debug)]
pub struct ExecutedStep {
    pub step_name: String,
    pub compensator: Option<String>,
    pub args: StepArgs,
}

/// One open run. Cheap to share (`Arc`); all mutable state is interior.
pub struct Session {
    pub(crate) runtime: Arc<Runtime>,
    run_id: Uuid,
    name: String,
    budget_limit: Option<f64>,
    compensate_on_budget_exceeded: bool,
    replay: bool,
    /// Held across the claim INSERT so concurrent claims get distinct,
    /// gap-free numbers and losing racers never advance the counter.
    pub(crate) seq: tokio::sync::Mutex<i64>,
    pub(crate) executed: Mutex<Vec<ExecutedStep>>,
    totals: Mutex<RunTotals>,
    output: Mutex<Option<Value>>,
    pub(crate) replay_driver: Option<Mutex<ReplayDriver>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("run_id", &self.run_id)
            .field("name", &self.name)
            .field("replay", &self.replay)
            .finish()
    }
}

impl Session {
    /// Open a session: create the run row, or (replay) load the trace.
    pub(crate) async fn open(
        runtime: Arc<Runtime>,
        options: SessionOptions,
    ) -> Result<Arc<Self>, TrailError> {
        if options.replay {
            let run_id = options
                .replay_run_id
                .ok_or_else(|| TrailError::config("replay session requires a replay_run_id"))?;
            let calls = match options.replay_calls {
                Some(calls) => calls,
                None => runtime.store.read_call_list(run_id).await?,
            };
            debug!(%run_id, recorded = calls.len(), "opening replay session");
            return Ok(Arc::new(Self {
                runtime,
                run_id,
                name: options.name,
                budget_limit: options.budget_limit,
                compensate_on_budget_exceeded: options.compensate_on_budget_exceeded,
                replay: true,
                seq: tokio::sync::Mutex::new(0),
                executed: Mutex::new(Vec::new()),
                totals: Mutex::new(RunTotals::default()),
                output: Mutex::new(None),
                replay_driver: Some(Mutex::new(ReplayDriver::new(calls))),
            }));
        }

        let run_id = Uuid::new_v4();
        let mut run = RunRecord::new(run_id, options.name.clone());
        run.tags = options.tags;
        run.budget_limit = options.budget_limit;
        run.input_json = options
            .input_payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        runtime.store.create_run(&run).await?;
        debug!(%run_id, name = %options.name, "opened session");

        Ok(Arc::new(Self {
            runtime,
            run_id,
            name: options.name,
            budget_limit: options.budget_limit,
            compensate_on_budget_exceeded: options.compensate_on_budget_exceeded,
            replay: false,
            seq: tokio::sync::Mutex::new(0),
            executed: Mutex::new(Vec::new()),
            totals: Mutex::new(RunTotals::default()),
            output: Mutex::new(None),
            replay_driver: None,
        }))
    }

    /// Run `body` inside the session scope and finalize on every exit path.
    pub(crate) async fn drive<T, F, Fut>(
        runtime: Arc<Runtime>,
        options: SessionOptions,
        body: F,
    ) -> Result<T, TrailError>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, TrailError>>,
        T: Serialize,
    {
        let session = Self::open(runtime, options).await?;
        let outcome =
            context::scope_session(Arc::clone(&session), body(Arc::clone(&session))).await;
        session.close(outcome).await
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_replay(&self) -> bool {
        self.replay
    }

    pub fn budget_limit(&self) -> Option<f64> {
        self.budget_limit
    }

    /// Snapshot of the accumulated usage totals.
    pub fn totals(&self) -> RunTotals {
        self.totals.lock().map(|t| *t).unwrap_or_default()
    }

    /// Record the workflow's return value; persisted on the run row at exit.
    pub fn set_output<T: Serialize>(&self, value: T) -> Result<(), TrailError> {
        let encoded = serde_json::to_value(value)?;
        if let Ok(mut slot) = self.output.lock() {
            *slot = Some(encoded);
        }
        Ok(())
    }

    /// Fold one LLM usage report into the run totals, then re-check the cap.
    /// Cost accumulates with 6-decimal rounding.
    pub(crate) fn record_usage(&self, usage: &LlmUsage) -> Result<(), TrailError> {
        let total_cost = {
            let mut totals = self
                .totals
                .lock()
                .map_err(|_| TrailError::config("totals lock poisoned"))?;
            totals.prompt_tokens += usage.prompt_tokens;
            totals.completion_tokens += usage.completion_tokens;
            totals.total_tokens += usage.total_tokens;
            totals.total_cost = round6(totals.total_cost + usage.total_cost);
            totals.total_cost
        };
        match self.budget_limit {
            Some(limit) if total_cost > limit => Err(TrailError::BudgetExceeded {
                total_cost,
                limit,
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn budget_exceeded(&self) -> Option<TrailError> {
        let limit = self.budget_limit?;
        let total_cost = self.totals().total_cost;
        (total_cost > limit).then_some(TrailError::BudgetExceeded { total_cost, limit })
    }

    /// Finalize the run according to the body's outcome.
    async fn close<T>(
        self: &Arc<Self>,
        outcome: Result<T, TrailError>,
    ) -> Result<T, TrailError>
    where
        T: Serialize,
    {
        match outcome {
            Ok(value) => {
                let output = {
                    let mut slot = self
                        .output
                        .lock()
                        .map_err(|_| TrailError::config("output lock poisoned"))?;
                    if slot.is_none() {
                        *slot = Some(serde_json::to_value(&value)?);
                    }
                    slot.clone()
                };
                if !self.replay {
                    let output_json = output.as_ref().map(serde_json::to_string).transpose()?;
                    self.runtime
                        .store
                        .finalize_run(
                            self.run_id,
                            RunStatus::Success,
                            output_json,
                            None,
                            &self.totals(),
                        )
                        .await?;
                }
                Ok(value)
            }
            Err(err) => {
                let mut message = err.to_string();
                if message.is_empty() {
                    message = "unknown error".to_string();
                }

                let budget_abort = matches!(err, TrailError::BudgetExceeded { .. });
                let should_compensate =
                    !self.replay && !(budget_abort && !self.compensate_on_budget_exceeded);
                if should_compensate {
                    self.run_compensations().await;
                }

                if !self.replay {
                    let output = self.output.lock().ok().and_then(|slot| slot.clone());
                    let output_json = output
                        .as_ref()
                        .and_then(|v| serde_json::to_string(v).ok());
                    if let Err(persist) = self
                        .runtime
                        .store
                        .finalize_run(
                            self.run_id,
                            RunStatus::Error,
                            output_json,
                            Some(message),
                            &self.totals(),
                        )
                        .await
                    {
                        warn!(run_id = %self.run_id, error = %persist, "failed to persist run failure");
                    }
                }
                Err(err)
            }
        }
    }

    /// Walk the executed-step stack in reverse and invoke registered
    /// compensators, each as a regular call under the compensation phase.
    /// Individual failures are logged and swallowed so one bad compensator
    /// cannot starve the rest of the unwind.
    async fn run_compensations(self: &Arc<Self>) {
        let frames: Vec<ExecutedStep> = match self.executed.lock() {
            Ok(stack) => stack.iter().rev().cloned().collect(),
            Err(_) => {
                warn!(run_id = %self.run_id, "executed-step stack lock poisoned; skipping compensation");
                return;
            }
        };

        for frame in frames {
            let Some(comp_name) = frame.compensator else {
                continue;
            };
            let Some(func) = self.runtime.step_fn(&comp_name) else {
                warn!(step = %comp_name, "compensator not registered; skipping");
                continue;
            };
            let spec = super::executor::CallSpec::new(&comp_name, Phase::Compensation, frame.args);
            debug!(run_id = %self.run_id, step = %frame.step_name, compensator = %comp_name, "compensating");
            if let Err(err) = self.execute(spec, move |args| func(args)).await {
                warn!(step = %comp_name, error = %err, "compensation step failed");
            }
        }
    }
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round6_clamps_float_noise() {
        assert_eq!(round6(0.1 + 0.2), 0.3);
        assert_eq!(round6(1.0000004), 1.0);
        assert_eq!(round6(1.0000006), 1.000001);
    }
}
