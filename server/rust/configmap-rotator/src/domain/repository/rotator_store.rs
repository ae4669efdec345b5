use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;

use crate::domain::entity::{ConfigMapRotator, ObjectKey};
use crate::domain::service::MutateError;

/// StoreError はオブジェクトストア操作の失敗を分類する。
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    /// バージョン不一致などの同時更新。最初から読み直せば解消する。
    #[error("write conflict: {0}")]
    Conflict(String),

    /// ストアが内容を不正として拒否した（HTTP 422 など）。spec を直すまで解消しない。
    #[error("rejected as invalid: {0}")]
    Invalid(String),

    #[error(transparent)]
    Mutate(#[from] MutateError),

    #[error("store error: {0}")]
    Other(String),
}

/// UpsertOutcome は create_or_update が実際に行った操作。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpsertOutcome::Created => "created",
            UpsertOutcome::Updated => "updated",
            UpsertOutcome::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

/// MutateFn は create_or_update に渡す ConfigMap の変更関数。
/// 適用後の ConfigMap を既存値と比較するため、借用期間を呼び出しごとに限定する。
pub type MutateFn = dyn for<'a> Fn(&'a mut ConfigMap) -> Result<(), MutateError> + Send + Sync;

/// RotatorStore はリコンサイラが読み書きする外部オブジェクトストア。
///
/// 書き込みはすべてバージョン検査付きで、同時更新は `StoreError::Conflict` として返す。
#[async_trait]
pub trait RotatorStore: Send + Sync {
    /// get は ConfigMapRotator を spec と status ごと取得する。
    async fn get(&self, key: &ObjectKey) -> Result<ConfigMapRotator, StoreError>;

    /// create_or_update は target の ConfigMap を取得（無ければ名前と namespace だけの空オブジェクト）し、
    /// mutate を適用して作成または置換する。変更が無ければ書き込まずに Unchanged を返す。
    async fn create_or_update(
        &self,
        target: &ObjectKey,
        mutate: &MutateFn,
    ) -> Result<UpsertOutcome, StoreError>;

    /// update_status は status サブリソースのみを書き込む。spec は変更しない。
    async fn update_status(&self, rotator: &ConfigMapRotator)
        -> Result<ConfigMapRotator, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::service::apply_rotation;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use std::collections::BTreeMap;

    // ストア実装と同じ手順: 変更関数を適用した後に元の値と比較・更新する
    fn apply_and_compare(mutate: &MutateFn, existing: &ConfigMap) -> Result<bool, StoreError> {
        let mut cm = existing.clone();
        mutate(&mut cm)?;
        let changed = cm != *existing;
        cm.metadata.resource_version = Some("2".to_string());
        Ok(changed)
    }

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "rotation.my.domain/v1".to_string(),
            kind: "ConfigMapRotator".to_string(),
            name: "rotator".to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    #[test]
    fn mutate_fn_borrow_ends_with_each_call() {
        let data = BTreeMap::from([("k".to_string(), "v-1".to_string())]);
        let owner = owner();
        let mutate = move |cm: &mut ConfigMap| apply_rotation(cm, &data, &owner);

        let empty = ConfigMap::default();
        assert!(apply_and_compare(&mutate, &empty).unwrap());

        let mut rotated = ConfigMap::default();
        mutate(&mut rotated).unwrap();
        assert!(!apply_and_compare(&mutate, &rotated).unwrap());
    }

    #[test]
    fn mutate_error_converts_to_store_error() {
        let err: StoreError = MutateError::AlreadyOwned {
            config_map: "cm".to_string(),
            owner_kind: "ConfigMapRotator".to_string(),
            owner_name: "other".to_string(),
        }
        .into();
        assert!(matches!(err, StoreError::Mutate(_)));
    }
}
