//! 統合テスト・ユニットテスト共通のインメモリ実装。
//!
//! `InMemoryRotatorStore` は API サーバの振る舞いのうちリコンサイラが依存する部分だけを再現する:
//! resourceVersion による楽観ロック、status サブリソースの分離、
//! コントローラ owner 参照によるカスケード削除。

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use tokio::sync::Mutex;

use crate::domain::clock::Clock;
use crate::domain::entity::{ConfigMapRotator, ConfigMapRotatorSpec, ObjectKey};
use crate::domain::repository::{MutateFn, RotatorStore, StoreError, UpsertOutcome};

/// rotator はテスト用の ConfigMapRotator を組み立てる。
pub fn rotator(
    namespace: &str,
    name: &str,
    target: &str,
    interval_hours: i64,
    template: &[(&str, &str)],
) -> ConfigMapRotator {
    let mut obj = ConfigMapRotator::new(
        name,
        ConfigMapRotatorSpec {
            config_map_name: target.to_string(),
            rotation_interval_hours: interval_hours,
            data_template: template
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        },
    );
    obj.metadata.namespace = Some(namespace.to_string());
    obj
}

#[derive(Default)]
struct StoreState {
    rotators: BTreeMap<ObjectKey, ConfigMapRotator>,
    config_maps: BTreeMap<ObjectKey, ConfigMap>,
    version_seq: u64,
    uid_seq: u64,
    get_faults: VecDeque<StoreError>,
    upsert_faults: VecDeque<StoreError>,
    status_faults: VecDeque<StoreError>,
    upsert_writes: usize,
    status_writes: usize,
    reads: usize,
    status_conflicts: usize,
}

impl StoreState {
    fn next_version(&mut self) -> String {
        self.version_seq += 1;
        self.version_seq.to_string()
    }
}

/// InMemoryRotatorStore は RotatorStore のインメモリ実装。
#[derive(Default)]
pub struct InMemoryRotatorStore {
    state: Mutex<StoreState>,
    interleave: bool,
}

impl InMemoryRotatorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// interleaved は各操作の前にタスクを譲るストアを返す。
    /// 同一タスク内で並行に走らせたリコンサイルが操作単位で交互に進む。
    pub fn interleaved() -> Self {
        Self {
            interleave: true,
            ..Self::default()
        }
    }

    async fn pause(&self) {
        if self.interleave {
            tokio::task::yield_now().await;
        }
    }

    /// insert_rotator は rotator を登録（既存なら置換）し、uid と resourceVersion を採番する。
    /// namespace 未設定の場合は "default" とみなす。
    pub async fn insert_rotator(&self, mut rotator: ConfigMapRotator) -> ConfigMapRotator {
        let mut state = self.state.lock().await;
        if rotator.metadata.namespace.is_none() {
            rotator.metadata.namespace = Some("default".to_string());
        }
        if rotator.metadata.uid.is_none() {
            state.uid_seq += 1;
            rotator.metadata.uid = Some(format!("uid-{}", state.uid_seq));
        }
        rotator.metadata.resource_version = Some(state.next_version());
        let key = ObjectKey::for_resource(&rotator)
            .unwrap_or_else(|| ObjectKey::new("default", rotator.metadata.name.clone().unwrap_or_default()));
        state.rotators.insert(key, rotator.clone());
        rotator
    }

    /// update_spec は外部アクタによる spec 変更を再現する。status はそのまま残る。
    pub async fn update_spec<F>(&self, key: &ObjectKey, f: F) -> bool
    where
        F: FnOnce(&mut ConfigMapRotatorSpec),
    {
        let mut state = self.state.lock().await;
        let version = state.next_version();
        match state.rotators.get_mut(key) {
            Some(rotator) => {
                f(&mut rotator.spec);
                rotator.metadata.resource_version = Some(version);
                true
            }
            None => false,
        }
    }

    /// delete_rotator は rotator を削除し、その uid をコントローラ owner に持つ ConfigMap を回収する。
    pub async fn delete_rotator(&self, key: &ObjectKey) -> bool {
        let mut state = self.state.lock().await;
        let Some(removed) = state.rotators.remove(key) else {
            return false;
        };
        let uid = removed.metadata.uid.unwrap_or_default();
        state.config_maps.retain(|_, cm| {
            !cm.metadata
                .owner_references
                .as_ref()
                .is_some_and(|refs| refs.iter().any(|r| r.controller == Some(true) && r.uid == uid))
        });
        true
    }

    pub async fn rotator(&self, key: &ObjectKey) -> Option<ConfigMapRotator> {
        self.state.lock().await.rotators.get(key).cloned()
    }

    pub async fn config_map(&self, key: &ObjectKey) -> Option<ConfigMap> {
        self.state.lock().await.config_maps.get(key).cloned()
    }

    /// put_foreign_config_map は別コントローラが管理する ConfigMap を配置する。
    pub async fn put_foreign_config_map(&self, key: &ObjectKey, owner_name: &str) {
        let mut state = self.state.lock().await;
        let version = state.next_version();
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(key.name.clone()),
                namespace: Some(key.namespace.clone()),
                resource_version: Some(version),
                owner_references: Some(vec![OwnerReference {
                    api_version: "rotation.my.domain/v1".to_string(),
                    kind: "ConfigMapRotator".to_string(),
                    name: owner_name.to_string(),
                    uid: format!("foreign-{owner_name}"),
                    controller: Some(true),
                    block_owner_deletion: Some(true),
                }]),
                ..Default::default()
            },
            ..Default::default()
        };
        state.config_maps.insert(key.clone(), cm);
    }

    pub async fn fail_next_get(&self, err: StoreError) {
        self.state.lock().await.get_faults.push_back(err);
    }

    pub async fn fail_next_upsert(&self, err: StoreError) {
        self.state.lock().await.upsert_faults.push_back(err);
    }

    pub async fn fail_next_status(&self, err: StoreError) {
        self.state.lock().await.status_faults.push_back(err);
    }

    /// read_count は成功した get の回数を返す。
    pub async fn read_count(&self) -> usize {
        self.state.lock().await.reads
    }

    /// conflict_count は resourceVersion 不一致で拒否した status 書き込みの回数を返す。
    pub async fn conflict_count(&self) -> usize {
        self.state.lock().await.status_conflicts
    }

    /// write_counts は成功した (ConfigMap 書き込み数, status 書き込み数) を返す。
    pub async fn write_counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.upsert_writes, state.status_writes)
    }
}

#[async_trait]
impl RotatorStore for InMemoryRotatorStore {
    async fn get(&self, key: &ObjectKey) -> Result<ConfigMapRotator, StoreError> {
        self.pause().await;
        let mut state = self.state.lock().await;
        if let Some(err) = state.get_faults.pop_front() {
            return Err(err);
        }
        let rotator = state
            .rotators
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        state.reads += 1;
        Ok(rotator)
    }

    async fn create_or_update(
        &self,
        target: &ObjectKey,
        mutate: &MutateFn,
    ) -> Result<UpsertOutcome, StoreError> {
        self.pause().await;
        let mut state = self.state.lock().await;
        if let Some(err) = state.upsert_faults.pop_front() {
            return Err(err);
        }

        match state.config_maps.get(target).cloned() {
            None => {
                let mut cm = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(target.name.clone()),
                        namespace: Some(target.namespace.clone()),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                mutate(&mut cm)?;
                cm.metadata.resource_version = Some(state.next_version());
                state.config_maps.insert(target.clone(), cm);
                state.upsert_writes += 1;
                Ok(UpsertOutcome::Created)
            }
            Some(existing) => {
                let mut cm = existing.clone();
                mutate(&mut cm)?;
                if cm == existing {
                    return Ok(UpsertOutcome::Unchanged);
                }
                cm.metadata.resource_version = Some(state.next_version());
                state.config_maps.insert(target.clone(), cm);
                state.upsert_writes += 1;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    async fn update_status(
        &self,
        rotator: &ConfigMapRotator,
    ) -> Result<ConfigMapRotator, StoreError> {
        self.pause().await;
        let mut state = self.state.lock().await;
        if let Some(err) = state.status_faults.pop_front() {
            return Err(err);
        }
        let key = ObjectKey::for_resource(rotator)
            .ok_or_else(|| StoreError::Other("rotator has no namespace".to_string()))?;
        let version = state.next_version();

        let stale = state
            .rotators
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?
            .metadata
            .resource_version
            != rotator.metadata.resource_version;
        if stale {
            state.status_conflicts += 1;
            return Err(StoreError::Conflict(format!(
                "{key}: resourceVersion {:?} is stale",
                rotator.metadata.resource_version
            )));
        }

        let current = state
            .rotators
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        // status サブリソースへの書き込みは spec を変更しない
        current.status = rotator.status.clone();
        current.metadata.resource_version = Some(version);
        let stored = current.clone();
        state.status_writes += 1;
        Ok(stored)
    }
}

/// ManualClock はテストから明示的に進める時計。
pub struct ManualClock {
    now: StdMutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: StdMutex::new(now),
        }
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
