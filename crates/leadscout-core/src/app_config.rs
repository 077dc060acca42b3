use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub connector_timeout_secs: u64,
    pub connector_user_agent: String,
    /// Base URL of the connector gateway. `None` means every platform cycle is
    /// skipped as a configuration error.
    pub connector_base_url: Option<String>,
    pub connector_token: Option<String>,
    pub scan_cron: String,
    /// Length of one scheduling slot. Cycle ids are derived from it so a
    /// restart inside the same slot resumes instead of repeating work.
    pub scan_slot_minutes: u32,
    pub scan_max_concurrent_monitors: usize,
    pub stagger_jitter_ratio: f64,
    pub analysis_batch_threshold: usize,
    pub webhook_timeout_secs: u64,
    pub webhook_max_attempts: u32,
    pub webhook_retention_days: u32,
    pub webhook_sweep_cron: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("connector_timeout_secs", &self.connector_timeout_secs)
            .field("connector_user_agent", &self.connector_user_agent)
            .field("connector_base_url", &self.connector_base_url)
            .field(
                "connector_token",
                &self.connector_token.as_ref().map(|_| "[redacted]"),
            )
            .field("scan_cron", &self.scan_cron)
            .field("scan_slot_minutes", &self.scan_slot_minutes)
            .field(
                "scan_max_concurrent_monitors",
                &self.scan_max_concurrent_monitors,
            )
            .field("stagger_jitter_ratio", &self.stagger_jitter_ratio)
            .field("analysis_batch_threshold", &self.analysis_batch_threshold)
            .field("webhook_timeout_secs", &self.webhook_timeout_secs)
            .field("webhook_max_attempts", &self.webhook_max_attempts)
            .field("webhook_retention_days", &self.webhook_retention_days)
            .field("webhook_sweep_cron", &self.webhook_sweep_cron)
            .finish()
    }
}
