//! Runtime configuration and environment resolution.

use std::time::Duration;

/// Preferred database URL variable.
pub const DB_URL_ENV: &str = "AGENTTRAIL_DB_URL";
/// Accepted alias for [`DB_URL_ENV`].
pub const DB_URL_ENV_ALIAS: &str = "AGENTTRAIL_DATABASE_URL";
/// Last-resort conventional variable.
pub const DB_URL_ENV_FALLBACK: &str = "DATABASE_URL";

/// Local SQLite file used when no database URL is configured.
pub const DEFAULT_SQLITE_URL: &str = "sqlite://agenttrail.db?mode=rwc";

/// Resolve the database URL: `AGENTTRAIL_DB_URL`, then
/// `AGENTTRAIL_DATABASE_URL`, then `DATABASE_URL`, then the local SQLite
/// default. Loads `.env` first so local development picks up dotfiles.
#[must_use]
pub fn database_url() -> String {
    dotenvy::dotenv().ok();
    std::env::var(DB_URL_ENV)
        .or_else(|_| std::env::var(DB_URL_ENV_ALIAS))
        .or_else(|_| std::env::var(DB_URL_ENV_FALLBACK))
        .unwrap_or_else(|_| DEFAULT_SQLITE_URL.to_string())
}

/// Tunables for a [`crate::runtime::Runtime`].
///
/// `pending_timeout` bounds how long a losing claimant waits on another
/// worker's pending call; `poll_interval` is the sleep between store reads in
/// that wait loop.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub database_url: Option<String>,
    pub pending_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            pending_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The configured URL, or the environment resolution of [`database_url`].
    #[must_use]
    pub fn resolve_database_url(&self) -> String {
        self.database_url.clone().unwrap_or_else(database_url)
    }
}
