//! Schema DDL per dialect.
//!
//! Column semantics are identical everywhere: two tables, one UNIQUE
//! constraint on `(run_id, step_name, idempotency_key, phase)`, one index on
//! `(run_id, seq_no)` for ordered reads, timestamps in UTC. Payload columns
//! (`tags`, `input_json`, `output_json`) hold JSON text; the runtime owns the
//! encoding, the database just stores it.
//!
//! The SQLite and Postgres statements are applied by the built-in backends on
//! connect. The MySQL DDL is published for external migration tooling; the
//! crate does not ship a MySQL backend.

pub const SQLITE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    tags TEXT,
    budget_limit REAL,
    total_prompt_tokens INTEGER NOT NULL DEFAULT 0,
    total_completion_tokens INTEGER NOT NULL DEFAULT 0,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    total_cost REAL NOT NULL DEFAULT 0,
    input_json TEXT,
    output_json TEXT,
    error TEXT,
    replay_of TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_name ON runs (name);
CREATE INDEX IF NOT EXISTS idx_runs_status ON runs (status);

CREATE TABLE IF NOT EXISTS calls (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    seq_no INTEGER NOT NULL,
    step_name TEXT NOT NULL,
    idempotency_key TEXT NOT NULL,
    phase TEXT NOT NULL,
    status TEXT NOT NULL,
    parent_call_id TEXT,
    internal INTEGER NOT NULL DEFAULT 0,
    provider TEXT,
    model TEXT,
    request_fingerprint TEXT,
    prompt_tokens INTEGER,
    completion_tokens INTEGER,
    total_tokens INTEGER,
    input_cost REAL,
    output_cost REAL,
    total_cost REAL,
    input_json TEXT,
    output_json TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (run_id, step_name, idempotency_key, phase),
    FOREIGN KEY (run_id) REFERENCES runs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_calls_run_seq ON calls (run_id, seq_no);
CREATE INDEX IF NOT EXISTS idx_calls_parent ON calls (parent_call_id);
"#;

pub const POSTGRES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    tags TEXT,
    budget_limit DOUBLE PRECISION,
    total_prompt_tokens BIGINT NOT NULL DEFAULT 0,
    total_completion_tokens BIGINT NOT NULL DEFAULT 0,
    total_tokens BIGINT NOT NULL DEFAULT 0,
    total_cost DOUBLE PRECISION NOT NULL DEFAULT 0,
    input_json TEXT,
    output_json TEXT,
    error TEXT,
    replay_of UUID,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_runs_name ON runs (name);
CREATE INDEX IF NOT EXISTS idx_runs_status ON runs (status);

CREATE TABLE IF NOT EXISTS calls (
    id UUID PRIMARY KEY,
    run_id UUID NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    seq_no BIGINT NOT NULL,
    step_name TEXT NOT NULL,
    idempotency_key TEXT NOT NULL,
    phase TEXT NOT NULL,
    status TEXT NOT NULL,
    parent_call_id UUID,
    internal BOOLEAN NOT NULL DEFAULT FALSE,
    provider TEXT,
    model TEXT,
    request_fingerprint TEXT,
    prompt_tokens BIGINT,
    completion_tokens BIGINT,
    total_tokens BIGINT,
    input_cost DOUBLE PRECISION,
    output_cost DOUBLE PRECISION,
    total_cost DOUBLE PRECISION,
    input_json TEXT,
    output_json TEXT,
    error TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (run_id, step_name, idempotency_key, phase)
);

CREATE INDEX IF NOT EXISTS idx_calls_run_seq ON calls (run_id, seq_no);
CREATE INDEX IF NOT EXISTS idx_calls_parent ON calls (parent_call_id);
"#;

pub const MYSQL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id CHAR(36) PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    status VARCHAR(32) NOT NULL,
    tags TEXT,
    budget_limit DOUBLE,
    total_prompt_tokens BIGINT NOT NULL DEFAULT 0,
    total_completion_tokens BIGINT NOT NULL DEFAULT 0,
    total_tokens BIGINT NOT NULL DEFAULT 0,
    total_cost DOUBLE NOT NULL DEFAULT 0,
    input_json TEXT,
    output_json TEXT,
    error TEXT,
    replay_of CHAR(36),
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS calls (
    id CHAR(36) PRIMARY KEY,
    run_id CHAR(36) NOT NULL,
    seq_no BIGINT NOT NULL,
    step_name VARCHAR(255) NOT NULL,
    idempotency_key VARCHAR(64) NOT NULL,
    phase VARCHAR(32) NOT NULL,
    status VARCHAR(32) NOT NULL,
    parent_call_id CHAR(36),
    internal TINYINT(1) NOT NULL DEFAULT 0,
    provider VARCHAR(64),
    model VARCHAR(128),
    request_fingerprint VARCHAR(255),
    prompt_tokens BIGINT,
    completion_tokens BIGINT,
    total_tokens BIGINT,
    input_cost DOUBLE,
    output_cost DOUBLE,
    total_cost DOUBLE,
    input_json TEXT,
    output_json TEXT,
    error TEXT,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
    UNIQUE KEY uq_calls_claim (run_id, step_name, idempotency_key, phase),
    INDEX idx_calls_run_seq (run_id, seq_no),
    INDEX idx_calls_parent (parent_call_id),
    CONSTRAINT fk_calls_run_id FOREIGN KEY (run_id) REFERENCES runs(id) ON DELETE CASCADE
);
"#;

/// Split a DDL blob into individual statements for drivers that execute one
/// statement at a time.
pub fn statements(ddl: &str) -> impl Iterator<Item = &str> {
    ddl.split(';').map(str::trim).filter(|s| !s.is_empty())
}
