use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Resource;
use rotator_retry::{with_retry_if, RetryConfig, RetryError};
use tracing::{debug, info, Instrument};

use crate::domain::clock::Clock;
use crate::domain::entity::ObjectKey;
use crate::domain::repository::{RotatorStore, StoreError, UpsertOutcome};
use crate::domain::service::{apply_rotation, generate_rotation_data};
use crate::domain::value_object::RotationSchedule;

/// ReconcileErrorKind はランタイム側の再試行方針を決めるための分類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileErrorKind {
    /// spec が不正。修正されるまで一定間隔で再評価する
    InvalidSpec,
    /// 同時更新の競合。読み直して即時再試行する
    Conflict,
    /// ストア障害など。指数バックオフで再試行する
    Transient,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("invalid spec for {key}: {reason}")]
    InvalidSpec { key: ObjectKey, reason: String },

    #[error("write conflict while reconciling {key}: {source}")]
    Conflict {
        key: ObjectKey,
        #[source]
        source: StoreError,
    },

    #[error("store failure during {stage} of {key}: {source}")]
    Transient {
        key: ObjectKey,
        stage: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ReconcileError {
    pub fn kind(&self) -> ReconcileErrorKind {
        match self {
            ReconcileError::InvalidSpec { .. } => ReconcileErrorKind::InvalidSpec,
            ReconcileError::Conflict { .. } => ReconcileErrorKind::Conflict,
            ReconcileError::Transient { .. } => ReconcileErrorKind::Transient,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ReconcileErrorKind::Conflict
    }

    fn from_store(key: &ObjectKey, stage: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => ReconcileError::Conflict {
                key: key.clone(),
                source: err,
            },
            StoreError::Mutate(e) => ReconcileError::InvalidSpec {
                key: key.clone(),
                reason: e.to_string(),
            },
            StoreError::Invalid(reason) => ReconcileError::InvalidSpec {
                key: key.clone(),
                reason,
            },
            StoreError::NotFound(_) | StoreError::Other(_) => ReconcileError::Transient {
                key: key.clone(),
                stage,
                source: err,
            },
        }
    }

    fn invalid(key: &ObjectKey, reason: impl Into<String>) -> Self {
        ReconcileError::InvalidSpec {
            key: key.clone(),
            reason: reason.into(),
        }
    }
}

/// RotationRecord はこの呼び出しで完了したローテーションの記録。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationRecord {
    pub generation: i64,
    pub rotated_at: DateTime<Utc>,
    pub upsert: UpsertOutcome,
}

/// ReconcileOutcome はリコンサイル結果と、次回呼び出しまでの待ち時間。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// None はオブジェクトが存在せず再スケジュール不要であることを示す
    pub requeue_after: Option<Duration>,
    pub rotation: Option<RotationRecord>,
}

impl ReconcileOutcome {
    fn gone() -> Self {
        Self {
            requeue_after: None,
            rotation: None,
        }
    }

    fn waiting(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
            rotation: None,
        }
    }

    /// result_label はメトリクス用の結果ラベルを返す。
    pub fn result_label(&self) -> &'static str {
        match (&self.rotation, self.requeue_after) {
            (Some(_), _) => "rotated",
            (None, Some(_)) => "skipped",
            (None, None) => "not_found",
        }
    }
}

/// ReconcileRotatorUseCase は ConfigMapRotator 1 件分のリコンサイルを行う。
///
/// 呼び出し間で状態を保持せず、毎回ストアから読み直す。
/// 競合が発生した場合は途中から再開せず、取得から全体をやり直す。
pub struct ReconcileRotatorUseCase {
    store: Arc<dyn RotatorStore>,
    clock: Arc<dyn Clock>,
    conflict_retry: RetryConfig,
}

impl ReconcileRotatorUseCase {
    pub fn new(store: Arc<dyn RotatorStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_conflict_retry(store, clock, RetryConfig::immediate(3))
    }

    pub fn with_conflict_retry(
        store: Arc<dyn RotatorStore>,
        clock: Arc<dyn Clock>,
        conflict_retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            clock,
            conflict_retry,
        }
    }

    pub async fn execute(&self, key: &ObjectKey) -> Result<ReconcileOutcome, ReconcileError> {
        let span = tracing::info_span!(
            "reconcile",
            namespace = %key.namespace,
            name = %key.name
        );
        with_retry_if(&self.conflict_retry, ReconcileError::is_conflict, || {
            self.reconcile_once(key)
        })
        .instrument(span)
        .await
        .map_err(RetryError::into_inner)
    }

    async fn reconcile_once(&self, key: &ObjectKey) -> Result<ReconcileOutcome, ReconcileError> {
        let rotator = match self.store.get(key).await {
            Ok(rotator) => rotator,
            Err(StoreError::NotFound(_)) => {
                debug!("ConfigMapRotator not found; nothing to do");
                return Ok(ReconcileOutcome::gone());
            }
            Err(e) => return Err(ReconcileError::from_store(key, "fetch", e)),
        };

        let schedule = RotationSchedule::from_hours(rotator.spec.rotation_interval_hours)
            .map_err(|e| ReconcileError::invalid(key, e.to_string()))?;

        let now = self.clock.now();
        let mut status = rotator.status_or_default();

        if !schedule.is_due(status.last_rotation_time, now) {
            let delay = schedule.next_delay(status.last_rotation_time, now);
            debug!(requeue_after_secs = delay.as_secs(), "rotation not due yet");
            return Ok(ReconcileOutcome::waiting(delay));
        }

        let target_name = rotator.spec.config_map_name.trim();
        if target_name.is_empty() {
            return Err(ReconcileError::invalid(key, "configMapName must not be empty"));
        }
        let target = key.sibling(target_name);

        let owner = rotator
            .controller_owner_ref(&())
            .ok_or_else(|| ReconcileError::invalid(key, "object has no uid; cannot set owner reference"))?;

        let data = generate_rotation_data(&rotator.spec.data_template, now);
        let mutate = move |cm: &mut ConfigMap| apply_rotation(cm, &data, &owner);

        let upsert = self
            .store
            .create_or_update(&target, &mutate)
            .await
            .map_err(|e| ReconcileError::from_store(key, "configmap upsert", e))?;

        info!(configmap = %target.name, operation = %upsert, "ConfigMap operation completed");

        // status の書き込みは必ず最後に行う。途中で失敗した場合は「未ローテーション」と観測される。
        let generation = status
            .current_generation
            .checked_add(1)
            .ok_or_else(|| ReconcileError::invalid(key, "currentGeneration overflow"))?;
        status.last_rotation_time = Some(now);
        status.current_generation = generation;

        let mut updated = rotator;
        updated.status = Some(status);
        match self.store.update_status(&updated).await {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                // ローテーション中に削除された。ConfigMap は owner 参照により回収される。
                info!("ConfigMapRotator deleted during rotation");
                return Ok(ReconcileOutcome::gone());
            }
            Err(e) => return Err(ReconcileError::from_store(key, "status update", e)),
        }

        info!(configmap = %target.name, generation, "ConfigMap rotated");

        Ok(ReconcileOutcome {
            requeue_after: Some(schedule.interval_std()),
            rotation: Some(RotationRecord {
                generation,
                rotated_at: now,
                upsert,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::MockClock;
    use crate::domain::entity::{ConfigMapRotator, ConfigMapRotatorSpec, ConfigMapRotatorStatus};
    use crate::test_support::{rotator, InMemoryRotatorStore};
    use chrono::{TimeDelta, TimeZone};
    use std::collections::BTreeMap;

    fn fixed_now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000, 0).unwrap()
    }

    fn clock_at(now: DateTime<Utc>) -> Arc<dyn Clock> {
        let mut clock = MockClock::new();
        clock.expect_now().returning(move || now);
        Arc::new(clock)
    }

    fn key() -> ObjectKey {
        ObjectKey::new("default", "rotator")
    }

    async fn seeded_store(spec_hours: i64, status: Option<ConfigMapRotatorStatus>) -> Arc<InMemoryRotatorStore> {
        let store = Arc::new(InMemoryRotatorStore::new());
        let mut obj = rotator("default", "rotator", "app-config", spec_hours, &[("token", "abc")]);
        obj.status = status;
        store.insert_rotator(obj).await;
        store
    }

    async fn outcome_label(uc: &ReconcileRotatorUseCase) -> &'static str {
        uc.execute(&key()).await.unwrap().result_label()
    }

    #[tokio::test]
    async fn first_rotation_creates_config_map() {
        let store = seeded_store(1, None).await;
        let uc = ReconcileRotatorUseCase::new(store.clone(), clock_at(fixed_now()));

        let outcome = uc.execute(&key()).await.unwrap();

        assert_eq!(outcome.requeue_after, Some(Duration::from_secs(3600)));
        let record = outcome.rotation.unwrap();
        assert_eq!(record.generation, 1);
        assert_eq!(record.upsert, UpsertOutcome::Created);

        let cm = store.config_map(&key().sibling("app-config")).await.unwrap();
        let expected: BTreeMap<String, String> =
            [("token".to_string(), "abc-1750000000".to_string())].into();
        assert_eq!(cm.data, Some(expected));
    }

    #[tokio::test]
    async fn second_reconcile_at_same_instant_is_skipped() {
        let store = seeded_store(1, None).await;
        let uc = ReconcileRotatorUseCase::new(store.clone(), clock_at(fixed_now()));

        assert_eq!(outcome_label(&uc).await, "rotated");
        let writes = store.write_counts().await;

        assert_eq!(outcome_label(&uc).await, "skipped");
        assert_eq!(store.write_counts().await, writes);
    }

    #[tokio::test]
    async fn not_due_only_reschedules() {
        let status = ConfigMapRotatorStatus {
            last_rotation_time: Some(fixed_now() - TimeDelta::minutes(59)),
            current_generation: 4,
        };
        let store = seeded_store(1, Some(status)).await;
        let uc = ReconcileRotatorUseCase::new(store.clone(), clock_at(fixed_now()));

        let outcome = uc.execute(&key()).await.unwrap();

        assert_eq!(outcome.requeue_after, Some(Duration::from_secs(60)));
        assert!(outcome.rotation.is_none());
        assert_eq!(store.write_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn overdue_rotates_and_increments_generation() {
        let status = ConfigMapRotatorStatus {
            last_rotation_time: Some(fixed_now() - TimeDelta::minutes(61)),
            current_generation: 4,
        };
        let store = seeded_store(1, Some(status)).await;
        let uc = ReconcileRotatorUseCase::new(store.clone(), clock_at(fixed_now()));

        let outcome = uc.execute(&key()).await.unwrap();
        assert_eq!(outcome.rotation.map(|r| r.generation), Some(5));

        let stored = store.rotator(&key()).await.unwrap().status.unwrap();
        assert_eq!(stored.current_generation, 5);
        assert_eq!(stored.last_rotation_time, Some(fixed_now()));
    }

    #[tokio::test]
    async fn non_positive_interval_is_invalid_spec() {
        let store = seeded_store(0, None).await;
        let uc = ReconcileRotatorUseCase::new(store.clone(), clock_at(fixed_now()));

        let err = uc.execute(&key()).await.unwrap_err();
        assert_eq!(err.kind(), ReconcileErrorKind::InvalidSpec);
        assert_eq!(store.write_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn empty_target_name_is_invalid_spec() {
        let store = Arc::new(InMemoryRotatorStore::new());
        store
            .insert_rotator(ConfigMapRotator::new(
                "rotator",
                ConfigMapRotatorSpec {
                    config_map_name: "  ".to_string(),
                    rotation_interval_hours: 1,
                    data_template: BTreeMap::new(),
                },
            ))
            .await;
        let uc = ReconcileRotatorUseCase::new(store.clone(), clock_at(fixed_now()));

        let err = uc.execute(&key()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidSpec { .. }));
    }

    #[tokio::test]
    async fn missing_object_is_success_without_requeue() {
        let store = Arc::new(InMemoryRotatorStore::new());
        // 時刻は参照されない
        let mut clock = MockClock::new();
        clock.expect_now().never();
        let uc = ReconcileRotatorUseCase::new(store.clone(), Arc::new(clock));

        let outcome = uc.execute(&key()).await.unwrap();
        assert_eq!(outcome.requeue_after, None);
        assert_eq!(outcome.result_label(), "not_found");
        assert_eq!(store.write_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn transient_fetch_failure_is_not_retried() {
        let store = seeded_store(1, None).await;
        store
            .fail_next_get(StoreError::Other("connection refused".to_string()))
            .await;
        let uc = ReconcileRotatorUseCase::new(store.clone(), clock_at(fixed_now()));

        let err = uc.execute(&key()).await.unwrap_err();
        assert_eq!(err.kind(), ReconcileErrorKind::Transient);
        assert_eq!(store.write_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn status_failure_after_upsert_keeps_generated_data() {
        let store = seeded_store(1, None).await;
        store
            .fail_next_status(StoreError::Other("etcd timeout".to_string()))
            .await;
        let uc = ReconcileRotatorUseCase::new(store.clone(), clock_at(fixed_now()));

        let err = uc.execute(&key()).await.unwrap_err();
        assert_eq!(err.kind(), ReconcileErrorKind::Transient);

        // ConfigMap は書き込まれているが status は未更新
        assert!(store.config_map(&key().sibling("app-config")).await.is_some());
        assert!(store.rotator(&key()).await.unwrap().status.is_none());
    }

    #[tokio::test]
    async fn foreign_owned_target_is_invalid_spec() {
        let store = seeded_store(1, None).await;
        store
            .put_foreign_config_map(&key().sibling("app-config"), "other-controller")
            .await;
        let uc = ReconcileRotatorUseCase::new(store.clone(), clock_at(fixed_now()));

        let err = uc.execute(&key()).await.unwrap_err();
        assert_eq!(err.kind(), ReconcileErrorKind::InvalidSpec);
        assert!(store.rotator(&key()).await.unwrap().status.is_none());
    }

    #[tokio::test]
    async fn rejected_upsert_is_invalid_spec() {
        let store = seeded_store(1, None).await;
        store
            .fail_next_upsert(StoreError::Invalid("metadata.name: Invalid value".to_string()))
            .await;
        let uc = ReconcileRotatorUseCase::new(store.clone(), clock_at(fixed_now()));

        let err = uc.execute(&key()).await.unwrap_err();
        assert_eq!(err.kind(), ReconcileErrorKind::InvalidSpec);
        assert!(store.rotator(&key()).await.unwrap().status.is_none());
    }

    #[tokio::test]
    async fn conflict_exhaustion_surfaces_conflict() {
        let store = seeded_store(1, None).await;
        for _ in 0..3 {
            store
                .fail_next_upsert(StoreError::Conflict("resourceVersion mismatch".to_string()))
                .await;
        }
        let uc = ReconcileRotatorUseCase::new(store.clone(), clock_at(fixed_now()));

        let err = uc.execute(&key()).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(store.rotator(&key()).await.unwrap().status.is_none());
    }
}
