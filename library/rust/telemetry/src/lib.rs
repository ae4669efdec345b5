pub mod logger;
pub mod metrics;


pub use metrics::Metrics;

/// TelemetryConfig は telemetry ライブラリの初期化設定を保持する。
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub version: String,
    pub log_level: String,
    /// ログ出力フォーマット。"text" の場合はプレーンテキスト、それ以外は JSON。
    pub log_format: String,
}

/// init_telemetry はログ出力を初期化し、サービス起動ログを 1 件出力する。
/// 既にグローバル subscriber が設定済みの場合はエラーを返す。
pub fn init_telemetry(
    cfg: &TelemetryConfig,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    logger::init_logger(&cfg.log_level, &cfg.log_format)?;
    tracing::debug!(
        service = %cfg.service_name,
        version = %cfg.version,
        "telemetry initialized"
    );
    Ok(())
}
