//! Deterministic replay of a recorded run.
//!
//! The driver walks the recorded call list in order, handing back each call's
//! persisted output instead of invoking the user function. Any divergence
//! between the live workflow and the trace is an error: the whole point of
//! replay is that it either reproduces the run exactly or refuses.

use serde_json::Value;

use crate::errors::TrailError;
use crate::types::{CallRecord, CallStatus, Phase};

/// Cursor over the recorded calls of one run.
#[derive(Debug)]
pub struct ReplayDriver {
    calls: Vec<CallRecord>,
    cursor: usize,
}

impl ReplayDriver {
    #[must_use]
    pub fn new(calls: Vec<CallRecord>) -> Self {
        Self { calls, cursor: 0 }
    }

    /// Number of records consumed so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Total number of recorded calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Serve the next recorded output for a call to `(step_name, phase)`.
    ///
    /// The recorded output is JSON text (the canonical on-disk encoding) and
    /// is decoded exactly once; an absent output decodes to JSON null.
    pub fn next(&mut self, step_name: &str, phase: Phase) -> Result<Value, TrailError> {
        let Some(record) = self.calls.get(self.cursor) else {
            return Err(TrailError::ReplayExhausted);
        };
        self.cursor += 1;

        if record.step_name != step_name || record.phase != phase {
            return Err(TrailError::ReplayMismatch {
                expected_step: step_name.to_string(),
                expected_phase: phase,
                recorded_step: record.step_name.clone(),
                recorded_phase: record.phase,
            });
        }
        if record.status != CallStatus::Success {
            return Err(TrailError::ReplayNotSuccess {
                status: record.status,
            });
        }
        match &record.output_json {
            None => Ok(Value::Null),
            Some(text) => serde_json::from_str(text).map_err(TrailError::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn recorded(step: &str, phase: Phase, status: CallStatus, output: Option<&str>) -> CallRecord {
        let now = Utc::now();
        CallRecord {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            seq_no: 1,
            step_name: step.to_string(),
            idempotency_key: "0".repeat(64),
            phase,
            status,
            parent_call_id: None,
            internal: false,
            provider: None,
            model: None,
            request_fingerprint: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            input_cost: None,
            output_cost: None,
            total_cost: None,
            input_json: None,
            output_json: output.map(str::to_string),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn serves_recorded_outputs_in_order() {
        let mut driver = ReplayDriver::new(vec![
            recorded("a", Phase::Forward, CallStatus::Success, Some("{\"n\":1}")),
            recorded("b", Phase::Forward, CallStatus::Success, None),
        ]);
        assert_eq!(driver.next("a", Phase::Forward).unwrap(), json!({"n": 1}));
        assert_eq!(driver.next("b", Phase::Forward).unwrap(), Value::Null);
        assert_eq!(driver.position(), 2);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let mut driver = ReplayDriver::new(vec![]);
        assert!(matches!(
            driver.next("a", Phase::Forward),
            Err(TrailError::ReplayExhausted)
        ));
    }

    #[test]
    fn divergent_step_name_is_a_mismatch() {
        let mut driver = ReplayDriver::new(vec![recorded(
            "a",
            Phase::Forward,
            CallStatus::Success,
            None,
        )]);
        let err = driver.next("b", Phase::Forward).unwrap_err();
        match err {
            TrailError::ReplayMismatch {
                expected_step,
                recorded_step,
                ..
            } => {
                assert_eq!(expected_step, "b");
                assert_eq!(recorded_step, "a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn recorded_failure_refuses_to_replay() {
        let mut driver = ReplayDriver::new(vec![recorded(
            "a",
            Phase::Forward,
            CallStatus::Error,
            None,
        )]);
        assert!(matches!(
            driver.next("a", Phase::Forward),
            Err(TrailError::ReplayNotSuccess {
                status: CallStatus::Error
            })
        ));
    }
}
