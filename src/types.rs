//! Core data model: run and call records, execution phases, step arguments,
//! and LLM usage accounting.
//!
//! Everything that crosses the [`crate::store::Store`] boundary lives here.
//! Payloads (step inputs, outputs, run input/output) are persisted as JSON
//! text; the `*_json` fields hold that canonical on-disk encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Execution phase of a call: normal forward execution or saga unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Forward,
    Compensation,
}

impl Phase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Forward => "forward",
            Phase::Compensation => "compensation",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "forward" => Some(Phase::Forward),
            "compensation" => Some(Phase::Compensation),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal and intermediate states of a run row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Success,
    Error,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "success" => Some(RunStatus::Success),
            "error" => Some(RunStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States of a call row. A call is inserted `pending` (the idempotency claim)
/// and transitions exactly once to `success` or `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Pending,
    Success,
    Error,
}

impl CallStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CallStatus::Pending),
            "success" => Some(CallStatus::Success),
            "error" => Some(CallStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Positional and named arguments of one step call.
///
/// Step inputs are opaque JSON values at the runtime boundary: they are
/// serialized once into the call row and hashed into the idempotency
/// fingerprint. Values that cannot be represented as JSON enter through
/// [`StepArgs::opaque_arg`] / [`StepArgs::opaque_kwarg`], which fold them
/// into a stable type-plus-repr leaf.
///
/// # Examples
///
/// ```
/// use agenttrail::types::StepArgs;
///
/// let args = StepArgs::new().arg("a@x").arg(100).kwarg("retries", 3);
/// assert_eq!(args.positional.len(), 2);
/// assert!(args.named.contains_key("retries"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepArgs {
    #[serde(rename = "args")]
    pub positional: Vec<Value>,
    #[serde(rename = "kwargs")]
    pub named: Map<String, Value>,
}

/// Reserved marker key for values that could not serialize to JSON.
pub(crate) const OPAQUE_TYPE_KEY: &str = "__opaque__";
pub(crate) const OPAQUE_REPR_KEY: &str = "repr";

fn opaque_leaf(type_name: &str, repr: impl std::fmt::Display) -> Value {
    let mut leaf = Map::new();
    leaf.insert(OPAQUE_TYPE_KEY.to_string(), Value::String(type_name.to_string()));
    leaf.insert(OPAQUE_REPR_KEY.to_string(), Value::String(repr.to_string()));
    Value::Object(leaf)
}

impl StepArgs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already-serialized positional values.
    #[must_use]
    pub fn positional<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Self {
            positional: values.into_iter().collect(),
            named: Map::new(),
        }
    }

    /// Append a positional argument. Values that fail JSON serialization are
    /// folded into an opaque type-plus-repr leaf instead of erroring.
    #[must_use]
    pub fn arg<T: Serialize>(mut self, value: T) -> Self {
        let encoded = serde_json::to_value(&value)
            .unwrap_or_else(|_| opaque_leaf(std::any::type_name::<T>(), "<unserializable>"));
        self.positional.push(encoded);
        self
    }

    /// Append a named argument, with the same fallback as [`StepArgs::arg`].
    #[must_use]
    pub fn kwarg<T: Serialize>(mut self, key: impl Into<String>, value: T) -> Self {
        let encoded = serde_json::to_value(&value)
            .unwrap_or_else(|_| opaque_leaf(std::any::type_name::<T>(), "<unserializable>"));
        self.named.insert(key.into(), encoded);
        self
    }

    /// Append a non-JSON positional value as a stable `{type, repr}` leaf.
    /// Identical reprs produce identical fingerprints.
    #[must_use]
    pub fn opaque_arg(mut self, type_name: &str, repr: impl std::fmt::Display) -> Self {
        self.positional.push(opaque_leaf(type_name, repr));
        self
    }

    /// Named-argument form of [`StepArgs::opaque_arg`].
    #[must_use]
    pub fn opaque_kwarg(
        mut self,
        key: impl Into<String>,
        type_name: &str,
        repr: impl std::fmt::Display,
    ) -> Self {
        self.named.insert(key.into(), opaque_leaf(type_name, repr));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    /// The `{"args": [...], "kwargs": {...}}` shape persisted on call rows.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("args".to_string(), Value::Array(self.positional.clone()));
        payload.insert("kwargs".to_string(), Value::Object(self.named.clone()));
        Value::Object(payload)
    }
}

/// Token and cost breakdown reported by one LLM request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

/// Running totals accumulated on a run row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
}

/// One row of the `runs` table: a single workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub name: String,
    pub status: RunStatus,
    pub tags: Vec<String>,
    pub budget_limit: Option<f64>,
    pub total_prompt_tokens: i64,
    pub total_completion_tokens: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub input_json: Option<String>,
    pub output_json: Option<String>,
    pub error: Option<String>,
    pub replay_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// A fresh pending run with zeroed totals.
    #[must_use]
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            status: RunStatus::Pending,
            tags: Vec::new(),
            budget_limit: None,
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
            total_tokens: 0,
            total_cost: 0.0,
            input_json: None,
            output_json: None,
            error: None,
            replay_of: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn totals(&self) -> RunTotals {
        RunTotals {
            prompt_tokens: self.total_prompt_tokens,
            completion_tokens: self.total_completion_tokens,
            total_tokens: self.total_tokens,
            total_cost: self.total_cost,
        }
    }
}

/// One row of the `calls` table: a single attempt of one step within a run.
///
/// The tuple `(run_id, step_name, idempotency_key, phase)` is UNIQUE; the
/// insert of a pending row under that tuple is the claim primitive the whole
/// exactly-once-effect protocol rests on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: Uuid,
    pub run_id: Uuid,
    pub seq_no: i64,
    pub step_name: String,
    pub idempotency_key: String,
    pub phase: Phase,
    pub status: CallStatus,
    pub parent_call_id: Option<Uuid>,
    /// Infrastructure calls (LLM requests) rather than user steps.
    pub internal: bool,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub request_fingerprint: Option<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub input_cost: Option<f64>,
    pub output_cost: Option<f64>,
    pub total_cost: Option<f64>,
    pub input_json: Option<String>,
    pub output_json: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A run together with its ordered calls, shaped for archival or replay.
///
/// Serializes to `{"run": {...}, "calls": [...]}` and is accepted back by
/// [`crate::runtime::Runtime::replay_export`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedRun {
    pub run: RunRecord,
    pub calls: Vec<CallRecord>,
}
