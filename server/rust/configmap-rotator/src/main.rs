use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context as _;
use tracing::info;

use configmap_rotator::adapter;
use configmap_rotator::domain::clock::SystemClock;
use configmap_rotator::infrastructure::config::Config;
use configmap_rotator::infrastructure::controller::{self, ControllerContext};
use configmap_rotator::infrastructure::kube_store::KubeRotatorStore;
use configmap_rotator::usecase::ReconcileRotatorUseCase;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/config.yaml".to_string());
    let cfg = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    let telemetry_cfg = rotator_telemetry::TelemetryConfig {
        service_name: cfg.app.name.clone(),
        version: cfg.app.version.clone(),
        log_level: cfg.logging.level.clone(),
        log_format: cfg.logging.format.clone(),
    };
    rotator_telemetry::init_telemetry(&telemetry_cfg).context("failed to init telemetry")?;

    info!(
        app_name = %cfg.app.name,
        version = %cfg.app.version,
        environment = %cfg.app.environment,
        "starting configmap-rotator"
    );

    let client = kube::Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;

    let metrics = Arc::new(rotator_telemetry::Metrics::new(&cfg.app.name)?);
    let store = Arc::new(KubeRotatorStore::new(client.clone()));
    let usecase = Arc::new(ReconcileRotatorUseCase::with_conflict_retry(
        store,
        Arc::new(SystemClock),
        cfg.controller.conflict_retry(),
    ));
    let ctx = Arc::new(ControllerContext::new(
        usecase,
        metrics.clone(),
        cfg.controller.error_backoff(),
        cfg.controller.invalid_spec_retry(),
    ));

    let ready = Arc::new(AtomicBool::new(false));
    let app = adapter::handler::router(adapter::handler::AppState {
        metrics,
        ready: ready.clone(),
    });

    let addr = cfg.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("probe server starting on {}", addr);
    let server_future = axum::serve(listener, app);

    let controller_future = controller::run(client, ctx, cfg.controller.namespace.as_deref(), ready);

    // コントローラはシグナル受信で終了する。プローブサーバはそれに合わせて停止する。
    tokio::select! {
        result = controller_future => {
            result?;
        }
        result = server_future => {
            if let Err(e) = result {
                tracing::error!("probe server error: {}", e);
            }
        }
    }

    info!("configmap-rotator stopped");
    Ok(())
}
