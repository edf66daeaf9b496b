use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::k8s::{Backoff, RetryPolicy};

/// Where the process runs, which decides how cluster credentials are found.
///
/// Names are matched case-insensitively, so `PROD` and `prod` are the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Environment {
    /// Local kubeconfig
    Dev,
    /// In-cluster service account
    Prod,
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!(
                "unknown environment `{}`, expected DEV or PROD",
                value
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_environment")]
    pub environment: Environment,

    #[serde(default)]
    pub kubeconfig: Option<String>,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// 1.0 keeps the delay fixed; anything larger grows it per attempt.
    #[serde(default = "default_retry_backoff_factor")]
    pub retry_backoff_factor: f64,

    #[serde(default = "default_mutation_timeout_secs")]
    pub mutation_timeout_secs: u64,

    #[serde(default = "default_cors_allowed_origins")]
    pub cors_allowed_origins: String,

    #[serde(default)]
    pub log_format: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_environment() -> Environment {
    Environment::Dev
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    10
}

fn default_retry_backoff_factor() -> f64 {
    1.0
}

fn default_mutation_timeout_secs() -> u64 {
    30
}

fn default_cors_allowed_origins() -> String {
    "http://localhost:3000,http://127.0.0.1:3000".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        let settings: Config = config.try_deserialize()?;

        Ok(settings)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Retry policy shared by restart and image updates.
    pub fn retry_policy(&self) -> RetryPolicy {
        let delay = Duration::from_millis(self.retry_backoff_ms);
        let backoff = if self.retry_backoff_factor > 1.0 {
            Backoff::Exponential {
                initial: delay,
                factor: self.retry_backoff_factor,
                max: Duration::from_secs(1),
            }
        } else {
            Backoff::Fixed(delay)
        };
        RetryPolicy::new(self.retry_max_attempts, backoff)
    }

    /// Deadline for one whole mutate call; zero disables it.
    pub fn mutation_timeout(&self) -> Option<Duration> {
        (self.mutation_timeout_secs > 0).then(|| Duration::from_secs(self.mutation_timeout_secs))
    }

    pub fn json_logs(&self) -> bool {
        self.log_format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("json"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            kubeconfig: None,
            retry_max_attempts: default_retry_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            retry_backoff_factor: default_retry_backoff_factor(),
            mutation_timeout_secs: default_mutation_timeout_secs(),
            cors_allowed_origins: default_cors_allowed_origins(),
            log_format: None,
        }
    }
}
