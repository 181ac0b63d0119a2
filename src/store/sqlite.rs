//! SQLite-backed store.
//!
//! Default backend for local development and single-host deployments. Opens
//! the pool in WAL mode with foreign keys on and applies the embedded schema
//! on connect (idempotent). UUIDs and timestamps are stored as TEXT; the
//! timestamps are RFC 3339 UTC.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

use super::{schema, Result, Store, StoreError};
use crate::types::{CallRecord, CallStatus, LlmUsage, Phase, RunRecord, RunStatus, RunTotals};

/// [`Store`] implementation over a SQLite connection pool.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

fn map_sqlx(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::UniqueViolation;
        }
    }
    StoreError::backend(e.to_string())
}

fn parse_uuid(text: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(text).map_err(|e| StoreError::backend(format!("{what} is not a uuid: {e}")))
}

fn parse_ts(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn decode_tags(text: Option<String>) -> Vec<String> {
    text.and_then(|t| serde_json::from_str(&t).ok())
        .unwrap_or_default()
}

impl SqliteStore {
    /// Connect (or create) a SQLite database at `url` and apply the schema.
    /// Example URL: `sqlite://agenttrail.db?mode=rwc`, or `sqlite::memory:`.
    #[instrument(skip(url))]
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::backend(format!("invalid sqlite url: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| StoreError::backend(format!("connect error: {e}")))?;
        for stmt in schema::statements(schema::SQLITE_SCHEMA) {
            sqlx::query(stmt).execute(&pool).await.map_err(map_sqlx)?;
        }
        Ok(Self { pool })
    }

    fn row_to_run(row: &SqliteRow) -> Result<RunRecord> {
        let id: String = row.try_get("id").map_err(map_sqlx)?;
        let status: String = row.try_get("status").map_err(map_sqlx)?;
        let replay_of: Option<String> = row.try_get("replay_of").map_err(map_sqlx)?;
        let created_at: String = row.try_get("created_at").map_err(map_sqlx)?;
        let updated_at: String = row.try_get("updated_at").map_err(map_sqlx)?;
        Ok(RunRecord {
            id: parse_uuid(&id, "runs.id")?,
            name: row.try_get("name").map_err(map_sqlx)?,
            status: RunStatus::parse(&status)
                .ok_or_else(|| StoreError::backend(format!("unknown run status: {status}")))?,
            tags: decode_tags(row.try_get("tags").map_err(map_sqlx)?),
            budget_limit: row.try_get("budget_limit").map_err(map_sqlx)?,
            total_prompt_tokens: row.try_get("total_prompt_tokens").map_err(map_sqlx)?,
            total_completion_tokens: row.try_get("total_completion_tokens").map_err(map_sqlx)?,
            total_tokens: row.try_get("total_tokens").map_err(map_sqlx)?,
            total_cost: row.try_get("total_cost").map_err(map_sqlx)?,
            input_json: row.try_get("input_json").map_err(map_sqlx)?,
            output_json: row.try_get("output_json").map_err(map_sqlx)?,
            error: row.try_get("error").map_err(map_sqlx)?,
            replay_of: replay_of
                .map(|r| parse_uuid(&r, "runs.replay_of"))
                .transpose()?,
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        })
    }

    fn row_to_call(row: &SqliteRow) -> Result<CallRecord> {
        let id: String = row.try_get("id").map_err(map_sqlx)?;
        let run_id: String = row.try_get("run_id").map_err(map_sqlx)?;
        let phase: String = row.try_get("phase").map_err(map_sqlx)?;
        let status: String = row.try_get("status").map_err(map_sqlx)?;
        let parent: Option<String> = row.try_get("parent_call_id").map_err(map_sqlx)?;
        let internal: i64 = row.try_get("internal").map_err(map_sqlx)?;
        let created_at: String = row.try_get("created_at").map_err(map_sqlx)?;
        let updated_at: String = row.try_get("updated_at").map_err(map_sqlx)?;
        Ok(CallRecord {
            id: parse_uuid(&id, "calls.id")?,
            run_id: parse_uuid(&run_id, "calls.run_id")?,
            seq_no: row.try_get("seq_no").map_err(map_sqlx)?,
            step_name: row.try_get("step_name").map_err(map_sqlx)?,
            idempotency_key: row.try_get("idempotency_key").map_err(map_sqlx)?,
            phase: Phase::parse(&phase)
                .ok_or_else(|| StoreError::backend(format!("unknown phase: {phase}")))?,
            status: CallStatus::parse(&status)
                .ok_or_else(|| StoreError::backend(format!("unknown call status: {status}")))?,
            parent_call_id: parent
                .map(|p| parse_uuid(&p, "calls.parent_call_id"))
                .transpose()?,
            internal: internal != 0,
            provider: row.try_get("provider").map_err(map_sqlx)?,
            model: row.try_get("model").map_err(map_sqlx)?,
            request_fingerprint: row.try_get("request_fingerprint").map_err(map_sqlx)?,
            prompt_tokens: row.try_get("prompt_tokens").map_err(map_sqlx)?,
            completion_tokens: row.try_get("completion_tokens").map_err(map_sqlx)?,
            total_tokens: row.try_get("total_tokens").map_err(map_sqlx)?,
            input_cost: row.try_get("input_cost").map_err(map_sqlx)?,
            output_cost: row.try_get("output_cost").map_err(map_sqlx)?,
            total_cost: row.try_get("total_cost").map_err(map_sqlx)?,
            input_json: row.try_get("input_json").map_err(map_sqlx)?,
            output_json: row.try_get("output_json").map_err(map_sqlx)?,
            error: row.try_get("error").map_err(map_sqlx)?,
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip(self, run), err)]
    async fn create_run(&self, run: &RunRecord) -> Result<()> {
        let tags = serde_json::to_string(&run.tags)
            .map_err(|e| StoreError::backend(format!("tags encode: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO runs (
                id, name, status, tags, budget_limit,
                total_prompt_tokens, total_completion_tokens, total_tokens, total_cost,
                input_json, output_json, error, replay_of, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(run.id.to_string())
        .bind(&run.name)
        .bind(run.status.as_str())
        .bind(tags)
        .bind(run.budget_limit)
        .bind(run.total_prompt_tokens)
        .bind(run.total_completion_tokens)
        .bind(run.total_tokens)
        .bind(run.total_cost)
        .bind(&run.input_json)
        .bind(&run.output_json)
        .bind(&run.error)
        .bind(run.replay_of.map(|id| id.to_string()))
        .bind(run.created_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    #[instrument(skip(self, output_json, error, totals), err)]
    async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output_json: Option<String>,
        error: Option<String>,
        totals: &RunTotals,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE runs
            SET status = ?1,
                output_json = ?2,
                error = ?3,
                total_prompt_tokens = ?4,
                total_completion_tokens = ?5,
                total_tokens = ?6,
                total_cost = ?7,
                updated_at = ?8
            WHERE id = ?9
            "#,
        )
        .bind(status.as_str())
        .bind(output_json)
        .bind(error)
        .bind(totals.prompt_tokens)
        .bind(totals.completion_tokens)
        .bind(totals.total_tokens)
        .bind(totals.total_cost)
        .bind(Utc::now().to_rfc3339())
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn read_run(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?1")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(Self::row_to_run).transpose()
    }

    #[instrument(skip(self, call), fields(step = %call.step_name, phase = %call.phase))]
    async fn claim_call(&self, call: &CallRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO calls (
                id, run_id, seq_no, step_name, idempotency_key,
                phase, status, parent_call_id, internal,
                provider, model, request_fingerprint,
                input_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(call.id.to_string())
        .bind(call.run_id.to_string())
        .bind(call.seq_no)
        .bind(&call.step_name)
        .bind(&call.idempotency_key)
        .bind(call.phase.as_str())
        .bind(call.status.as_str())
        .bind(call.parent_call_id.map(|id| id.to_string()))
        .bind(i64::from(call.internal))
        .bind(&call.provider)
        .bind(&call.model)
        .bind(&call.request_fingerprint)
        .bind(&call.input_json)
        .bind(call.created_at.to_rfc3339())
        .bind(call.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    #[instrument(skip(self, output_json, error, usage), err)]
    async fn finalize_call(
        &self,
        call_id: Uuid,
        status: CallStatus,
        output_json: Option<String>,
        error: Option<String>,
        usage: Option<&LlmUsage>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE calls
            SET status = ?1,
                output_json = ?2,
                error = ?3,
                prompt_tokens = ?4,
                completion_tokens = ?5,
                total_tokens = ?6,
                input_cost = ?7,
                output_cost = ?8,
                total_cost = ?9,
                updated_at = ?10
            WHERE id = ?11
            "#,
        )
        .bind(status.as_str())
        .bind(output_json)
        .bind(error)
        .bind(usage.map(|u| u.prompt_tokens))
        .bind(usage.map(|u| u.completion_tokens))
        .bind(usage.map(|u| u.total_tokens))
        .bind(usage.map(|u| u.input_cost))
        .bind(usage.map(|u| u.output_cost))
        .bind(usage.map(|u| u.total_cost))
        .bind(Utc::now().to_rfc3339())
        .bind(call_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    #[instrument(skip(self, idempotency_key), err)]
    async fn read_call(
        &self,
        run_id: Uuid,
        step_name: &str,
        idempotency_key: &str,
        phase: Phase,
    ) -> Result<Option<CallRecord>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM calls
            WHERE run_id = ?1 AND step_name = ?2 AND idempotency_key = ?3 AND phase = ?4
            "#,
        )
        .bind(run_id.to_string())
        .bind(step_name)
        .bind(idempotency_key)
        .bind(phase.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.as_ref().map(Self::row_to_call).transpose()
    }

    #[instrument(skip(self), err)]
    async fn read_call_list(&self, run_id: Uuid) -> Result<Vec<CallRecord>> {
        let rows = sqlx::query("SELECT * FROM calls WHERE run_id = ?1 ORDER BY seq_no ASC")
            .bind(run_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(Self::row_to_call).collect()
    }
}
