//! Volatile process-local store.
//!
//! Fast, non-durable; suitable for tests and ephemeral runs. Implements the
//! same claim semantics as the SQL backends so the executor's race handling
//! can be exercised without a database.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use super::{Result, Store, StoreError};
use crate::types::{CallRecord, CallStatus, LlmUsage, Phase, RunRecord, RunStatus, RunTotals};

#[derive(Default)]
struct Inner {
    runs: FxHashMap<Uuid, RunRecord>,
    calls: Vec<CallRecord>,
}

/// In-memory [`Store`] backed by a `RwLock`.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::backend("lock poisoned")
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_run(&self, run: &RunRecord) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if inner.runs.contains_key(&run.id) {
            return Err(StoreError::backend(format!("run id collision: {}", run.id)));
        }
        inner.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output_json: Option<String>,
        error: Option<String>,
        totals: &RunTotals,
    ) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if let Some(run) = inner.runs.get_mut(&run_id) {
            run.status = status;
            run.output_json = output_json;
            run.error = error;
            run.total_prompt_tokens = totals.prompt_tokens;
            run.total_completion_tokens = totals.completion_tokens;
            run.total_tokens = totals.total_tokens;
            run.total_cost = totals.total_cost;
            run.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn read_run(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.runs.get(&run_id).cloned())
    }

    async fn claim_call(&self, call: &CallRecord) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let taken = inner.calls.iter().any(|existing| {
            existing.run_id == call.run_id
                && existing.step_name == call.step_name
                && existing.idempotency_key == call.idempotency_key
                && existing.phase == call.phase
        });
        if taken {
            return Err(StoreError::UniqueViolation);
        }
        inner.calls.push(call.clone());
        Ok(())
    }

    async fn finalize_call(
        &self,
        call_id: Uuid,
        status: CallStatus,
        output_json: Option<String>,
        error: Option<String>,
        usage: Option<&LlmUsage>,
    ) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let call = inner
            .calls
            .iter_mut()
            .find(|c| c.id == call_id)
            .ok_or_else(|| StoreError::NotFound {
                what: format!("call {call_id}"),
            })?;
        call.status = status;
        call.output_json = output_json;
        call.error = error;
        if let Some(usage) = usage {
            call.prompt_tokens = Some(usage.prompt_tokens);
            call.completion_tokens = Some(usage.completion_tokens);
            call.total_tokens = Some(usage.total_tokens);
            call.input_cost = Some(usage.input_cost);
            call.output_cost = Some(usage.output_cost);
            call.total_cost = Some(usage.total_cost);
        }
        call.updated_at = Utc::now();
        Ok(())
    }

    async fn read_call(
        &self,
        run_id: Uuid,
        step_name: &str,
        idempotency_key: &str,
        phase: Phase,
    ) -> Result<Option<CallRecord>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .calls
            .iter()
            .find(|c| {
                c.run_id == run_id
                    && c.step_name == step_name
                    && c.idempotency_key == idempotency_key
                    && c.phase == phase
            })
            .cloned())
    }

    async fn read_call_list(&self, run_id: Uuid) -> Result<Vec<CallRecord>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut calls: Vec<CallRecord> = inner
            .calls
            .iter()
            .filter(|c| c.run_id == run_id)
            .cloned()
            .collect();
        calls.sort_by_key(|c| c.seq_no);
        Ok(calls)
    }
}
