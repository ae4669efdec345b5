use std::time::Duration;

use rotator_retry::RetryConfig;
use serde::Deserialize;

/// Application configuration for the rotator operator.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(content)?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

/// ServerConfig はヘルスチェック・メトリクス用 HTTP リスナーの設定を表す。
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

/// ControllerConfig はリコンサイルループの再試行・再キュー設定を表す。
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// 監視対象の namespace。未指定なら全 namespace を監視する。
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_conflict_max_attempts")]
    pub conflict_max_attempts: u32,
    #[serde(default)]
    pub conflict_retry_delay_ms: u64,
    #[serde(default = "default_error_backoff_initial_ms")]
    pub error_backoff_initial_ms: u64,
    #[serde(default = "default_error_backoff_max_secs")]
    pub error_backoff_max_secs: u64,
    #[serde(default = "default_invalid_spec_retry_secs")]
    pub invalid_spec_retry_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            conflict_max_attempts: default_conflict_max_attempts(),
            conflict_retry_delay_ms: 0,
            error_backoff_initial_ms: default_error_backoff_initial_ms(),
            error_backoff_max_secs: default_error_backoff_max_secs(),
            invalid_spec_retry_secs: default_invalid_spec_retry_secs(),
        }
    }
}

impl ControllerConfig {
    /// conflict_retry は競合時にリコンサイル全体をやり直すためのリトライ設定を返す。
    pub fn conflict_retry(&self) -> RetryConfig {
        RetryConfig::immediate(self.conflict_max_attempts.max(1))
            .with_initial_delay(Duration::from_millis(self.conflict_retry_delay_ms))
    }

    /// error_backoff は一時的な障害に対する再キュー間隔（指数バックオフ）の設定を返す。
    pub fn error_backoff(&self) -> RetryConfig {
        RetryConfig::new(u32::MAX)
            .with_initial_delay(Duration::from_millis(self.error_backoff_initial_ms.max(1)))
            .with_max_delay(Duration::from_secs(self.error_backoff_max_secs.max(1)))
            .with_multiplier(2.0)
            .with_jitter(true)
    }

    /// invalid_spec_retry は不正な spec を再評価するまでの間隔。0 は 1 秒に切り上げる。
    pub fn invalid_spec_retry(&self) -> Duration {
        Duration::from_secs(self.invalid_spec_retry_secs.max(1))
    }
}

fn default_conflict_max_attempts() -> u32 {
    3
}

fn default_error_backoff_initial_ms() -> u64 {
    500
}

fn default_error_backoff_max_secs() -> u64 {
    300
}

fn default_invalid_spec_retry_secs() -> u64 {
    300
}

/// LoggingConfig はログレベルと出力形式を表す。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}
