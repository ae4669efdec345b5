use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use futures::StreamExt;
use kube::api::{Api, ListParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::Client;
use rotator_retry::RetryConfig;
use rotator_telemetry::Metrics;
use tracing::{debug, info, warn};

use crate::domain::entity::{ConfigMapRotator, ObjectKey};
use crate::usecase::{ReconcileError, ReconcileErrorKind, ReconcileOutcome, ReconcileRotatorUseCase};

/// 再キュー間隔の上限。これより長い周期でも途中で一度起床して残り時間を再計算する。
pub const MAX_REQUEUE_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("ConfigMapRotator {0} has no namespace")]
    MissingNamespace(String),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

struct FailureState {
    count: u32,
    last_failure: Instant,
}

/// ErrorBackoff はオブジェクトごとの連続失敗回数から再キュー間隔を求める。
///
/// 成功したオブジェクトのカウンタは reset で消去する。
/// 失敗し続けているオブジェクトは max_delay 以内に再び失敗を記録するので、
/// それより十分長く更新されていないエントリ（削除済みオブジェクトなど）は次回記録時に捨てる。
pub struct ErrorBackoff {
    policy: RetryConfig,
    retention: Duration,
    failures: Mutex<HashMap<ObjectKey, FailureState>>,
}

impl ErrorBackoff {
    pub fn new(policy: RetryConfig) -> Self {
        let retention = policy.max_delay.saturating_mul(2).max(Duration::from_secs(60));
        Self {
            policy,
            retention,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_delay(&self, key: &ObjectKey) -> Duration {
        self.next_delay_at(key, Instant::now())
    }

    fn next_delay_at(&self, key: &ObjectKey, now: Instant) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        failures.retain(|_, state| now.saturating_duration_since(state.last_failure) <= self.retention);

        let state = failures.entry(key.clone()).or_insert(FailureState {
            count: 0,
            last_failure: now,
        });
        let delay = self.policy.compute_delay(state.count);
        state.count = state.count.saturating_add(1);
        state.last_failure = now;
        delay
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn reset(&self, key: &ObjectKey) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// ControllerContext はリコンサイル関数とエラーポリシーが共有する依存。
pub struct ControllerContext {
    usecase: Arc<ReconcileRotatorUseCase>,
    metrics: Arc<Metrics>,
    backoff: ErrorBackoff,
    invalid_spec_retry: Duration,
}

impl ControllerContext {
    pub fn new(
        usecase: Arc<ReconcileRotatorUseCase>,
        metrics: Arc<Metrics>,
        backoff: RetryConfig,
        invalid_spec_retry: Duration,
    ) -> Self {
        Self {
            usecase,
            metrics,
            backoff: ErrorBackoff::new(backoff),
            invalid_spec_retry,
        }
    }

    /// retry_delay はエラー種別に応じた再キュー間隔を返す。
    pub fn retry_delay(&self, key: Option<&ObjectKey>, err: &ControllerError) -> Duration {
        match err {
            ControllerError::MissingNamespace(_) => self.invalid_spec_retry,
            ControllerError::Reconcile(e) => match e.kind() {
                ReconcileErrorKind::Conflict => Duration::ZERO,
                ReconcileErrorKind::InvalidSpec => self.invalid_spec_retry,
                ReconcileErrorKind::Transient => match key {
                    Some(key) => self.backoff.next_delay(key),
                    None => self.invalid_spec_retry,
                },
            },
        }
    }
}

/// outcome_to_action は ReconcileOutcome をランタイムへの再キュー指示に変換する。
pub fn outcome_to_action(outcome: &ReconcileOutcome) -> Action {
    match outcome.requeue_after {
        Some(delay) => Action::requeue(delay.min(MAX_REQUEUE_DELAY)),
        None => Action::await_change(),
    }
}

pub async fn reconcile(
    rotator: Arc<ConfigMapRotator>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ControllerError> {
    let key = ObjectKey::for_resource(rotator.as_ref()).ok_or_else(|| {
        ControllerError::MissingNamespace(rotator.metadata.name.clone().unwrap_or_default())
    })?;

    let started = Instant::now();
    let result = ctx.usecase.execute(&key).await;
    let elapsed = started.elapsed().as_secs_f64();

    match result {
        Ok(outcome) => {
            ctx.backoff.reset(&key);
            ctx.metrics.record_reconcile(outcome.result_label(), elapsed);
            if outcome.rotation.is_some() {
                ctx.metrics.record_rotation();
            }
            Ok(outcome_to_action(&outcome))
        }
        Err(e) => {
            ctx.metrics.record_reconcile("error", elapsed);
            Err(e.into())
        }
    }
}

pub fn error_policy(
    rotator: Arc<ConfigMapRotator>,
    err: &ControllerError,
    ctx: Arc<ControllerContext>,
) -> Action {
    let key = ObjectKey::for_resource(rotator.as_ref());
    let delay = ctx.retry_delay(key.as_ref(), err);
    warn!(
        error = %err,
        requeue_after_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        "reconcile failed"
    );
    Action::requeue(delay)
}

/// run は ConfigMapRotator を監視するコントローラを起動し、シグナル受信で終了するまで待つ。
/// 監視開始前に CRD が参照可能か確認し、確認できた時点で ready を true にする。
pub async fn run(
    client: Client,
    ctx: Arc<ControllerContext>,
    namespace: Option<&str>,
    ready: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let api: Api<ConfigMapRotator> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    api.list(&ListParams::default().limit(1))
        .await
        .context("ConfigMapRotator CRD is not queryable; is it installed?")?;

    ready.store(true, Ordering::SeqCst);
    info!(namespace = namespace.unwrap_or("*"), "starting ConfigMapRotator controller");

    Controller::new(api, watcher::Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!(object = %obj, ?action, "reconciled"),
                Err(e) => debug!(error = %e, "controller event error"),
            }
        })
        .await;

    ready.store(false, Ordering::SeqCst);
    info!("controller terminated");
    Ok(())
}
