//! Runtime: the step/compensator registry, session factory, and the
//! export/replay entry points.
//!
//! A [`Runtime`] is built once at startup, steps and compensator pairings are
//! registered, and the value is shared behind an `Arc` for the life of the
//! process. Registration is an idempotent overwrite; during runs the
//! registries are read-only.

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::context;
use crate::errors::{BoxError, TrailError};
use crate::store::{Store, StoreError};
use crate::types::{ExportedRun, Phase, StepArgs};

pub mod executor;
pub mod replay;
pub mod session;

pub use executor::{CallSpec, LlmCall};
pub use replay::ReplayDriver;
pub use session::{ExecutedStep, Session, SessionOptions};

/// Boxed future returned by step functions.
pub type StepFuture = BoxFuture<'static, Result<Value, BoxError>>;

/// A registered step function: opaque JSON in, opaque JSON out.
pub type StepFunction = dyn Fn(StepArgs) -> StepFuture + Send + Sync;

/// Extracts usage numbers from an LLM response value.
pub type UsageParser = Arc<dyn Fn(&Value) -> Option<crate::types::LlmUsage> + Send + Sync>;

/// Process-wide runtime: store handle, registries, and wait-loop tunables.
pub struct Runtime {
    pub(crate) store: Arc<dyn Store>,
    steps: RwLock<FxHashMap<String, Arc<StepFunction>>>,
    compensations: RwLock<FxHashMap<String, String>>,
    pub(crate) pending_timeout: Duration,
    pub(crate) poll_interval: Duration,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("pending_timeout", &self.pending_timeout)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl Runtime {
    /// Build a runtime over an existing store with default tunables.
    #[must_use]
    pub fn with_store(store: Arc<dyn Store>) -> Arc<Self> {
        Self::with_store_config(store, RuntimeConfig::default())
    }

    /// Build a runtime over an existing store with explicit tunables.
    #[must_use]
    pub fn with_store_config(store: Arc<dyn Store>, config: RuntimeConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            steps: RwLock::new(FxHashMap::default()),
            compensations: RwLock::new(FxHashMap::default()),
            pending_timeout: config.pending_timeout,
            poll_interval: config.poll_interval,
        })
    }

    /// Volatile runtime for tests and ephemeral runs.
    #[must_use]
    pub fn in_memory() -> Arc<Self> {
        Self::with_store(Arc::new(crate::store::InMemoryStore::new()))
    }

    /// Connect to a database by URL scheme (`sqlite://...`, `postgres://...`).
    pub async fn connect(url: &str) -> Result<Arc<Self>, TrailError> {
        Self::connect_with(RuntimeConfig::new().with_database_url(url)).await
    }

    /// Connect using a full [`RuntimeConfig`]; the URL falls back to the
    /// `AGENTTRAIL_DB_URL` environment resolution.
    pub async fn connect_with(config: RuntimeConfig) -> Result<Arc<Self>, TrailError> {
        let url = config.resolve_database_url();

        #[cfg(feature = "sqlite")]
        if url.starts_with("sqlite") {
            let store = crate::store::SqliteStore::connect(&url).await?;
            return Ok(Self::with_store_config(Arc::new(store), config));
        }

        #[cfg(feature = "postgres")]
        if url.starts_with("postgres") {
            let store = crate::store::PostgresStore::connect(&url).await?;
            return Ok(Self::with_store_config(Arc::new(store), config));
        }

        Err(TrailError::config(format!(
            "no enabled store backend for database url: {url}"
        )))
    }

    /// Connect using only the environment.
    pub async fn from_env() -> Result<Arc<Self>, TrailError> {
        Self::connect_with(RuntimeConfig::default()).await
    }

    /// Register a step function under `name`. Idempotent overwrite.
    pub fn register_step<F, Fut>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(StepArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        let boxed: Arc<StepFunction> = Arc::new(move |args| -> StepFuture { Box::pin(func(args)) });
        if let Ok(mut steps) = self.steps.write() {
            steps.insert(name.into(), boxed);
        }
    }

    /// Pair a step with the step that undoes it. Idempotent overwrite.
    pub fn register_compensation(
        &self,
        step_name: impl Into<String>,
        compensation_step_name: impl Into<String>,
    ) {
        if let Ok(mut comps) = self.compensations.write() {
            comps.insert(step_name.into(), compensation_step_name.into());
        }
    }

    /// Register and wrap in one call.
    pub fn step<F, Fut>(self: &Arc<Self>, name: impl Into<String>, func: F) -> StepHandle
    where
        F: Fn(StepArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        let name = name.into();
        self.register_step(name.clone(), func);
        self.handle(name)
    }

    /// Wrap an already-registered step.
    #[must_use]
    pub fn handle(self: &Arc<Self>, name: impl Into<String>) -> StepHandle {
        StepHandle {
            runtime: Arc::clone(self),
            name: name.into(),
        }
    }

    pub(crate) fn step_fn(&self, name: &str) -> Option<Arc<StepFunction>> {
        self.steps.read().ok()?.get(name).cloned()
    }

    pub(crate) fn compensation_for(&self, name: &str) -> Option<String> {
        self.compensations.read().ok()?.get(name).cloned()
    }

    /// Open a session and run `body` inside it; finalization is guaranteed on
    /// every exit path, including compensation on failure.
    pub async fn session<T, F, Fut>(
        self: &Arc<Self>,
        options: SessionOptions,
        body: F,
    ) -> Result<T, TrailError>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, TrailError>>,
        T: Serialize,
    {
        Session::drive(Arc::clone(self), options, body).await
    }

    /// The run row plus its ordered calls, shaped for archival or replay.
    #[instrument(skip(self), err)]
    pub async fn export_run(&self, run_id: Uuid) -> Result<ExportedRun, TrailError> {
        let run = self
            .store
            .read_run(run_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                what: format!("run {run_id}"),
            })?;
        let calls = self.store.read_call_list(run_id).await?;
        Ok(ExportedRun { run, calls })
    }

    /// Replay a persisted run against `body`, serving recorded outputs.
    pub async fn replay_run<T, F, Fut>(
        self: &Arc<Self>,
        run_id: Uuid,
        body: F,
    ) -> Result<T, TrailError>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, TrailError>>,
        T: Serialize,
    {
        self.session(SessionOptions::named("replay").replaying(run_id), body)
            .await
    }

    /// Replay an exported run without touching the store.
    pub async fn replay_export<T, F, Fut>(
        self: &Arc<Self>,
        exported: &ExportedRun,
        body: F,
    ) -> Result<T, TrailError>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, TrailError>>,
        T: Serialize,
    {
        let options = SessionOptions::named("replay_export")
            .with_replay_calls(exported.run.id, exported.calls.clone());
        self.session(options, body).await
    }
}

/// Callable wrapper around a registered step.
///
/// Inside a session the call routes through the claim/execute protocol with
/// the step's registered compensator; outside any session it passes through
/// to the bare function.
#[derive(Clone)]
pub struct StepHandle {
    runtime: Arc<Runtime>,
    name: String,
}

impl std::fmt::Debug for StepHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepHandle").field("name", &self.name).finish()
    }
}

impl StepHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the step using the ambient session if one is active.
    pub async fn call(&self, args: StepArgs) -> Result<Value, TrailError> {
        match context::current_session() {
            Some(session) => self.call_in(&session, args).await,
            None => {
                let func = self.unregistered_check()?;
                func(args).await.map_err(|e| TrailError::StepFailed {
                    step: self.name.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Invoke the step under an explicit session. Needed from spawned tasks,
    /// which do not inherit the ambient context.
    pub async fn call_in(
        &self,
        session: &Arc<Session>,
        args: StepArgs,
    ) -> Result<Value, TrailError> {
        let func = self.unregistered_check()?;
        let spec = CallSpec::new(&self.name, Phase::Forward, args)
            .with_compensator(self.runtime.compensation_for(&self.name));
        session.execute(spec, move |args| func(args)).await
    }

    fn unregistered_check(&self) -> Result<Arc<StepFunction>, TrailError> {
        self.runtime
            .step_fn(&self.name)
            .ok_or_else(|| TrailError::config(format!("step not registered: {}", self.name)))
    }
}
