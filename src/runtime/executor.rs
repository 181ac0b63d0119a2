//! The claim/execute/finalize protocol for a single step call.
//!
//! At most one worker runs the user function for a given fingerprint within
//! a run: the INSERT of the pending call row is the claim, and everyone who
//! loses that race blocks on the winner's row and adopts its result. This is
//! what turns at-least-once invocation into exactly-once effect.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::session::{ExecutedStep, Session};
use super::{StepFuture, UsageParser};
use crate::context;
use crate::errors::TrailError;
use crate::fingerprint;
use crate::store::StoreError;
use crate::types::{CallRecord, CallStatus, Phase, StepArgs};

/// Everything the executor needs to know about one call besides the function
/// itself.
pub struct CallSpec {
    pub step_name: String,
    pub phase: Phase,
    pub args: StepArgs,
    /// Step registered to undo this one; recorded on the compensation stack.
    pub compensator: Option<String>,
    /// Explicit parent; falls back to the ambient call id.
    pub parent_call_id: Option<Uuid>,
    /// Marks infrastructure calls (LLM requests) rather than user steps.
    pub internal: bool,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub request_fingerprint: Option<String>,
    pub usage_parser: Option<UsageParser>,
    /// Overrides the persisted/fingerprinted inputs when the wrapper
    /// synthesizes them (LLM calls log a request fingerprint, not the args).
    pub logged_args: Option<StepArgs>,
}

impl CallSpec {
    #[must_use]
    pub fn new(step_name: impl Into<String>, phase: Phase, args: StepArgs) -> Self {
        Self {
            step_name: step_name.into(),
            phase,
            args,
            compensator: None,
            parent_call_id: None,
            internal: false,
            provider: None,
            model: None,
            request_fingerprint: None,
            usage_parser: None,
            logged_args: None,
        }
    }

    #[must_use]
    pub fn with_compensator(mut self, compensator: Option<String>) -> Self {
        self.compensator = compensator;
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent_call_id: Option<Uuid>) -> Self {
        self.parent_call_id = parent_call_id;
        self
    }

    #[must_use]
    pub fn with_internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_request_fingerprint(mut self, request_fingerprint: Option<String>) -> Self {
        self.request_fingerprint = request_fingerprint;
        self
    }

    #[must_use]
    pub fn with_usage_parser(mut self, parser: UsageParser) -> Self {
        self.usage_parser = Some(parser);
        self
    }

    #[must_use]
    pub fn with_logged_args(mut self, logged_args: StepArgs) -> Self {
        self.logged_args = Some(logged_args);
        self
    }
}

impl std::fmt::Debug for CallSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSpec")
            .field("step_name", &self.step_name)
            .field("phase", &self.phase)
            .field("internal", &self.internal)
            .finish()
    }
}

/// Metadata for an LLM request logged as an internal call.
#[derive(Clone, Debug)]
pub struct LlmCall {
    pub provider: String,
    pub model: String,
    pub step_name: String,
    pub request_fingerprint: Option<String>,
}

impl Session {
    /// Execute one step call under the claim protocol.
    ///
    /// `func` receives the call's arguments and is invoked at most once; if
    /// another caller already claimed this fingerprint, the recorded result
    /// is adopted instead.
    pub async fn execute<F>(
        self: &Arc<Self>,
        spec: CallSpec,
        func: F,
    ) -> Result<Value, TrailError>
    where
        F: FnOnce(StepArgs) -> StepFuture,
    {
        if let Some(driver) = &self.replay_driver {
            let mut driver = driver
                .lock()
                .map_err(|_| TrailError::config("replay driver lock poisoned"))?;
            return driver.next(&spec.step_name, spec.phase);
        }

        if spec.phase == Phase::Forward {
            if let Some(err) = self.budget_exceeded() {
                return Err(err);
            }
        }

        let logged = spec.logged_args.as_ref().unwrap_or(&spec.args);
        let idem_key = fingerprint::fingerprint(&spec.step_name, logged, spec.phase);
        let parent = spec.parent_call_id.or_else(context::current_call_id);
        let input_json = serde_json::to_string(&logged.to_payload())?;

        let call_id = Uuid::new_v4();
        let claimed = {
            let mut seq = self.seq.lock().await;
            let now = Utc::now();
            let record = CallRecord {
                id: call_id,
                run_id: self.run_id(),
                seq_no: *seq + 1,
                step_name: spec.step_name.clone(),
                idempotency_key: idem_key.clone(),
                phase: spec.phase,
                status: CallStatus::Pending,
                parent_call_id: parent,
                internal: spec.internal,
                provider: spec.provider.clone(),
                model: spec.model.clone(),
                request_fingerprint: spec.request_fingerprint.clone(),
                prompt_tokens: None,
                completion_tokens: None,
                total_tokens: None,
                input_cost: None,
                output_cost: None,
                total_cost: None,
                input_json: Some(input_json),
                output_json: None,
                error: None,
                created_at: now,
                updated_at: now,
            };
            match self.runtime.store.claim_call(&record).await {
                Ok(()) => {
                    *seq += 1;
                    true
                }
                Err(StoreError::UniqueViolation) => false,
                Err(other) => return Err(other.into()),
            }
        };

        if !claimed {
            debug!(step = %spec.step_name, phase = %spec.phase, "claim lost; waiting on existing call");
            return self
                .wait_for_existing(&spec.step_name, &idem_key, spec.phase)
                .await;
        }

        if spec.phase == Phase::Forward {
            if let Ok(mut stack) = self.executed.lock() {
                stack.push(ExecutedStep {
                    step_name: spec.step_name.clone(),
                    compensator: spec.compensator.clone(),
                    args: spec.args.clone(),
                });
            }
        }

        let outcome = context::scope_session(
            Arc::clone(self),
            context::scope_call_id(call_id, func(spec.args.clone())),
        )
        .await;

        match outcome {
            Ok(output) => {
                let usage = spec.usage_parser.as_ref().and_then(|parse| parse(&output));
                let output_json = serde_json::to_string(&output)?;
                self.runtime
                    .store
                    .finalize_call(
                        call_id,
                        CallStatus::Success,
                        Some(output_json),
                        None,
                        usage.as_ref(),
                    )
                    .await?;
                if let Some(usage) = usage {
                    self.record_usage(&usage)?;
                }
                Ok(output)
            }
            Err(err) => {
                let message = err.to_string();
                if let Err(persist) = self
                    .runtime
                    .store
                    .finalize_call(call_id, CallStatus::Error, None, Some(message.clone()), None)
                    .await
                {
                    warn!(step = %spec.step_name, error = %persist, "failed to persist call failure");
                }
                Err(TrailError::StepFailed {
                    step: spec.step_name,
                    message,
                })
            }
        }
    }

    /// Adopt the result of a call claimed by another worker: poll its row
    /// until it finalizes or the deadline passes.
    async fn wait_for_existing(
        &self,
        step_name: &str,
        idempotency_key: &str,
        phase: Phase,
    ) -> Result<Value, TrailError> {
        let deadline = tokio::time::Instant::now() + self.runtime.pending_timeout;
        loop {
            let row = self
                .runtime
                .store
                .read_call(self.run_id(), step_name, idempotency_key, phase)
                .await?;
            let Some(call) = row else {
                return Err(TrailError::ClaimVanished {
                    step: step_name.to_string(),
                    phase,
                });
            };
            match call.status {
                CallStatus::Success => {
                    return match call.output_json {
                        None => Ok(Value::Null),
                        Some(text) => serde_json::from_str(&text).map_err(TrailError::from),
                    };
                }
                CallStatus::Error => {
                    return Err(TrailError::StepFailed {
                        step: step_name.to_string(),
                        message: call.error.unwrap_or_else(|| "unknown error".to_string()),
                    });
                }
                CallStatus::Pending => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(TrailError::PendingClaimTimeout {
                            step: step_name.to_string(),
                            phase,
                        });
                    }
                    tokio::time::sleep(self.runtime.poll_interval).await;
                }
            }
        }
    }

    /// Log an LLM request as an internal forward call and fold its usage into
    /// the run totals.
    ///
    /// The request itself is opaque to the runtime; `parser` extracts the
    /// usage numbers from the response value. Inputs are logged as the
    /// request fingerprint rather than the raw prompt.
    pub async fn execute_llm<F>(
        self: &Arc<Self>,
        call: LlmCall,
        parser: UsageParser,
        request: F,
    ) -> Result<Value, TrailError>
    where
        F: FnOnce() -> StepFuture,
    {
        let logged = StepArgs::new().kwarg("request_fingerprint", call.request_fingerprint.clone());
        let spec = CallSpec::new(&call.step_name, Phase::Forward, StepArgs::new())
            .with_internal(true)
            .with_provider(call.provider)
            .with_model(call.model)
            .with_request_fingerprint(call.request_fingerprint)
            .with_usage_parser(parser)
            .with_logged_args(logged)
            .with_parent(context::current_call_id());
        self.execute(spec, |_args| request()).await
    }
}
