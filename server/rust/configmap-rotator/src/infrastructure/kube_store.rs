use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;

use crate::domain::entity::{ConfigMapRotator, ObjectKey};
use crate::domain::repository::{MutateFn, RotatorStore, StoreError, UpsertOutcome};

/// KubeRotatorStore は Kubernetes API サーバを RotatorStore として扱う。
///
/// 置換・status 更新はいずれも取得時の resourceVersion を付けて送信し、
/// API サーバの 409 Conflict を `StoreError::Conflict` に変換する。
#[derive(Clone)]
pub struct KubeRotatorStore {
    client: Client,
}

impl KubeRotatorStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn rotators(&self, namespace: &str) -> Api<ConfigMapRotator> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl RotatorStore for KubeRotatorStore {
    async fn get(&self, key: &ObjectKey) -> Result<ConfigMapRotator, StoreError> {
        self.rotators(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(|e| map_kube_error(key, e))?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn create_or_update(
        &self,
        target: &ObjectKey,
        mutate: &MutateFn,
    ) -> Result<UpsertOutcome, StoreError> {
        let api = self.config_maps(&target.namespace);
        let pp = PostParams::default();

        match api.get_opt(&target.name).await.map_err(|e| map_kube_error(target, e))? {
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
                // 同名オブジェクトが先に作成されていれば 409 となり、リコンサイル全体をやり直す
                api.create(&pp, &cm)
                    .await
                    .map_err(|e| map_kube_error(target, e))?;
                Ok(UpsertOutcome::Created)
            }
            Some(existing) => {
                let mut cm = existing.clone();
                mutate(&mut cm)?;
                if cm == existing {
                    return Ok(UpsertOutcome::Unchanged);
                }
                // labels / annotations / binaryData は既存値のまま、resourceVersion も取得時の値で送る
                api.replace(&target.name, &pp, &cm)
                    .await
                    .map_err(|e| map_kube_error(target, e))?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    async fn update_status(
        &self,
        rotator: &ConfigMapRotator,
    ) -> Result<ConfigMapRotator, StoreError> {
        let key = ObjectKey::for_resource(rotator)
            .ok_or_else(|| StoreError::Other("ConfigMapRotator has no namespace".to_string()))?;
        let body = serde_json::to_vec(rotator)
            .map_err(|e| StoreError::Other(format!("{key}: failed to encode status: {e}")))?;

        self.rotators(&key.namespace)
            .replace_status(&key.name, &PostParams::default(), body)
            .await
            .map_err(|e| map_kube_error(&key, e))
    }
}

/// map_kube_error は kube のエラーを StoreError の分類に変換する。
pub fn map_kube_error(key: &ObjectKey, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(resp) if resp.code == 409 => {
            StoreError::Conflict(format!("{key}: {}", resp.message))
        }
        kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound(key.to_string()),
        kube::Error::Api(resp) if resp.code == 422 => {
            StoreError::Invalid(format!("{key}: {}", resp.message))
        }
        other => StoreError::Other(format!("{key}: {other}")),
    }
}
