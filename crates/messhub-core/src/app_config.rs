use std::path::PathBuf;

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
    pub backend_url: String,
    pub backend_anon_key: String,
    pub env: Environment,
    pub log_level: String,
    pub state_dir: PathBuf,
    pub stores_path: PathBuf,
    pub request_timeout_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub store_max_retries: u32,
    pub store_backoff_base_ms: u64,
    pub store_backoff_cap_ms: u64,
    pub error_throttle_ms: u64,
    pub lookup_timeout_ms: Option<u64>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("backend_url", &self.backend_url)
            .field("backend_anon_key", &"[redacted]")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("state_dir", &self.state_dir)
            .field("stores_path", &self.stores_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("retry_max_attempts", &self.retry_max_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("store_max_retries", &self.store_max_retries)
            .field("store_backoff_base_ms", &self.store_backoff_base_ms)
            .field("store_backoff_cap_ms", &self.store_backoff_cap_ms)
            .field("error_throttle_ms", &self.error_throttle_ms)
            .field("lookup_timeout_ms", &self.lookup_timeout_ms)
            .finish()
    }
}
