#![allow(dead_code)]

//! Shared fixtures: an in-memory runtime with fast polling and the payment
//! workflow steps used across the integration suites.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use agenttrail::config::RuntimeConfig;
use agenttrail::errors::BoxError;
use agenttrail::runtime::{Runtime, StepFuture, StepHandle, UsageParser};
use agenttrail::store::InMemoryStore;
use agenttrail::types::{LlmUsage, StepArgs};

/// Runtime over the in-memory store with a fast pending-claim poll.
pub fn test_runtime() -> Arc<Runtime> {
    Runtime::with_store_config(
        Arc::new(InMemoryStore::new()),
        RuntimeConfig::new()
            .with_pending_timeout(Duration::from_secs(5))
            .with_poll_interval(Duration::from_millis(10)),
    )
}

pub async fn reserve(args: StepArgs) -> Result<Value, BoxError> {
    let email = args.positional[0].as_str().unwrap_or_default().to_string();
    let cents = args.positional[1].as_i64().unwrap_or_default();
    Ok(json!({ "hold": format!("H:{email}:{cents}") }))
}

pub async fn slow_reserve(args: StepArgs) -> Result<Value, BoxError> {
    tokio::time::sleep(Duration::from_millis(50)).await;
    reserve(args).await
}

pub async fn refund(_args: StepArgs) -> Result<Value, BoxError> {
    Ok(json!({ "refunded": true }))
}

pub async fn echo(args: StepArgs) -> Result<Value, BoxError> {
    Ok(Value::Array(args.positional))
}

pub async fn boom(_args: StepArgs) -> Result<Value, BoxError> {
    Err("card declined".into())
}

pub fn reserve_args() -> StepArgs {
    StepArgs::new().arg("a@x").arg(100)
}

/// Wrap a step function with an invocation counter.
pub fn counted<F, Fut>(
    counter: Arc<AtomicUsize>,
    func: F,
) -> impl Fn(StepArgs) -> Fut + Send + Sync + 'static
where
    F: Fn(StepArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    move |args| {
        counter.fetch_add(1, Ordering::SeqCst);
        func(args)
    }
}

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// A step that records its name into `log` and succeeds.
pub fn recording(
    log: CallLog,
    name: &'static str,
) -> impl Fn(StepArgs) -> std::future::Ready<Result<Value, BoxError>> + Send + Sync + 'static {
    move |_args| {
        log.lock().unwrap().push(name.to_string());
        std::future::ready(Ok(json!({ "step": name })))
    }
}

/// Call a step through its handle, adapting the runtime error for use inside
/// another step's body.
pub async fn call_step(handle: StepHandle, args: StepArgs) -> Result<Value, BoxError> {
    handle.call(args).await.map_err(Into::into)
}

/// An already-resolved step future, for synthesized calls.
pub fn ready_response(value: Value) -> StepFuture {
    let out: Result<Value, BoxError> = Ok(value);
    Box::pin(std::future::ready(out))
}

/// Usage parser reporting a fixed cost regardless of the response.
pub fn fixed_usage(cost: f64) -> UsageParser {
    Arc::new(move |_value: &Value| {
        Some(LlmUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            input_cost: cost / 2.0,
            output_cost: cost / 2.0,
            total_cost: cost,
        })
    })
}

pub type RunIdSlot = Arc<Mutex<Option<Uuid>>>;

pub fn run_id_slot() -> RunIdSlot {
    Arc::new(Mutex::new(None))
}

pub fn take_run_id(slot: &RunIdSlot) -> Uuid {
    slot.lock().unwrap().expect("session body did not record a run id")
}
