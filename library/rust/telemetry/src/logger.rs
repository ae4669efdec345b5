//! 構造化ログユーティリティ。
//! tracing クレートを使用し、JSON またはテキスト形式の構造化ログを出力する。
//!
//! # 使用例
//!
//! ```ignore
//! use tracing::{info, warn};
//!
//! info!(namespace = "default", name = "app-config", "ConfigMap rotated");
//! warn!(error = %e, "status update conflict");
//! ```

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter,
};

/// init_logger は tracing-subscriber を初期化する。
///
/// 環境変数 RUST_LOG が設定されている場合はそちらを優先し、
/// 未設定の場合は level をフィルタとして使用する。
/// format が "text" の場合はプレーンテキスト出力、それ以外は JSON 出力。
pub fn init_logger(level: &str, format: &str) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(build_filter(level));

    if format == "text" {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_span_events(fmt::format::FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_events(fmt::format::FmtSpan::CLOSE),
            )
            .try_init()
    }
}

/// build_filter は RUST_LOG を優先し、無効または未設定なら level からフィルタを作る。
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(normalize_level(level)))
}

/// normalize_level は設定ファイルのログレベル文字列を正規化する。
/// 未知の値は "info" として扱う。
pub fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}
