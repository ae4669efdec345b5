use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

/// MutateError は対象 ConfigMap への変更関数が適用を拒否したことを表す。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutateError {
    #[error("ConfigMap {config_map} is already controlled by {owner_kind}/{owner_name}")]
    AlreadyOwned {
        config_map: String,
        owner_kind: String,
        owner_name: String,
    },
}

/// generate_rotation_data はテンプレートの各値に UNIX 秒を付加した新しいデータを生成する。
///
/// 値は `<template>-<unix seconds>` 形式。時刻由来の一意性しか持たないため、
/// 設定値のローテーション専用であり秘密情報の生成には使わないこと。
pub fn generate_rotation_data(
    template: &BTreeMap<String, String>,
    now: DateTime<Utc>,
) -> BTreeMap<String, String> {
    let timestamp = now.timestamp();
    template
        .iter()
        .map(|(key, value)| (key.clone(), format!("{value}-{timestamp}")))
        .collect()
}

/// apply_rotation は ConfigMap の data を丸ごと置き換え、owner をコントローラ参照として設定する。
///
/// 既存キーとのマージは行わない。別オブジェクトがコントローラ参照を持っている場合は
/// 何も変更せずに `MutateError::AlreadyOwned` を返す。
pub fn apply_rotation(
    target: &mut ConfigMap,
    data: &BTreeMap<String, String>,
    owner: &OwnerReference,
) -> Result<(), MutateError> {
    set_controller_reference(target, owner)?;
    target.data = Some(data.clone());
    Ok(())
}

fn set_controller_reference(target: &mut ConfigMap, owner: &OwnerReference) -> Result<(), MutateError> {
    let refs = target.metadata.owner_references.get_or_insert_with(Vec::new);

    if let Some(other) = refs
        .iter()
        .find(|r| r.controller == Some(true) && !same_object(r, owner))
    {
        return Err(MutateError::AlreadyOwned {
            config_map: target.metadata.name.clone().unwrap_or_default(),
            owner_kind: other.kind.clone(),
            owner_name: other.name.clone(),
        });
    }

    match refs.iter().position(|r| same_object(r, owner)) {
        // 同名で再作成された owner の場合も uid を最新に置き換える
        Some(pos) => refs[pos] = owner.clone(),
        None => refs.push(owner.clone()),
    }
    Ok(())
}

/// same_object は API グループ・kind・名前が一致すれば同一オブジェクトへの参照とみなす。
fn same_object(a: &OwnerReference, b: &OwnerReference) -> bool {
    api_group(&a.api_version) == api_group(&b.api_version) && a.kind == b.kind && a.name == b.name
}

fn api_group(api_version: &str) -> &str {
    api_version.rsplit_once('/').map_or("", |(group, _)| group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kube::api::ObjectMeta;

    fn owner(name: &str, uid: &str) -> OwnerReference {
        OwnerReference {
            api_version: "rotation.my.domain/v1".to_string(),
            kind: "ConfigMapRotator".to_string(),
            name: name.to_string(),
            uid: uid.to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn template(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn generates_timestamp_suffixed_values() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let data = generate_rotation_data(&template(&[("a", "x"), ("b", "y")]), now);
        assert_eq!(data.get("a").map(String::as_str), Some("x-1700000000"));
        assert_eq!(data.get("b").map(String::as_str), Some("y-1700000000"));
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn different_times_produce_different_values() {
        let t = template(&[("k", "v")]);
        let first = generate_rotation_data(&t, Utc.timestamp_opt(100, 0).unwrap());
        let second = generate_rotation_data(&t, Utc.timestamp_opt(101, 0).unwrap());
        assert_ne!(first, second);
    }

    #[test]
    fn empty_template_produces_empty_data() {
        let data = generate_rotation_data(&BTreeMap::new(), Utc::now());
        assert!(data.is_empty());
    }

    #[test]
    fn apply_sets_data_and_owner_on_new_config_map() {
        let mut cm = config_map("target");
        apply_rotation(&mut cm, &template(&[("a", "x-1")]), &owner("rot", "uid-1")).unwrap();

        assert_eq!(cm.data, Some(template(&[("a", "x-1")])));
        let refs = cm.metadata.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].uid, "uid-1");
        assert_eq!(refs[0].controller, Some(true));
    }

    #[test]
    fn apply_replaces_data_without_merging() {
        let mut cm = config_map("target");
        cm.data = Some(template(&[("a", "x-1"), ("b", "y-1")]));

        apply_rotation(&mut cm, &template(&[("a", "x-2")]), &owner("rot", "uid-1")).unwrap();
        assert_eq!(cm.data, Some(template(&[("a", "x-2")])));
    }

    #[test]
    fn apply_is_idempotent_for_existing_owner() {
        let mut cm = config_map("target");
        let o = owner("rot", "uid-1");
        apply_rotation(&mut cm, &template(&[("a", "x")]), &o).unwrap();
        apply_rotation(&mut cm, &template(&[("a", "x")]), &o).unwrap();
        assert_eq!(cm.metadata.owner_references.map(|r| r.len()), Some(1));
    }

    #[test]
    fn apply_keeps_unrelated_non_controller_references() {
        let mut cm = config_map("target");
        let mut unrelated = owner("other", "uid-9");
        unrelated.kind = "Deployment".to_string();
        unrelated.api_version = "apps/v1".to_string();
        unrelated.controller = None;
        cm.metadata.owner_references = Some(vec![unrelated]);

        apply_rotation(&mut cm, &template(&[]), &owner("rot", "uid-1")).unwrap();
        assert_eq!(cm.metadata.owner_references.map(|r| r.len()), Some(2));
    }

    #[test]
    fn apply_refreshes_uid_of_recreated_owner() {
        let mut cm = config_map("target");
        cm.metadata.owner_references = Some(vec![owner("rot", "old-uid")]);

        apply_rotation(&mut cm, &template(&[]), &owner("rot", "new-uid")).unwrap();
        let refs = cm.metadata.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].uid, "new-uid");
    }

    #[test]
    fn apply_rejects_foreign_controller() {
        let mut cm = config_map("target");
        cm.data = Some(template(&[("keep", "me")]));
        cm.metadata.owner_references = Some(vec![owner("someone-else", "uid-2")]);

        let err = apply_rotation(&mut cm, &template(&[("a", "x")]), &owner("rot", "uid-1"))
            .unwrap_err();
        assert_eq!(
            err,
            MutateError::AlreadyOwned {
                config_map: "target".to_string(),
                owner_kind: "ConfigMapRotator".to_string(),
                owner_name: "someone-else".to_string(),
            }
        );
        // 拒否時はデータを変更しない
        assert_eq!(cm.data, Some(template(&[("keep", "me")])));
    }

    #[test]
    fn api_group_parsing() {
        assert_eq!(api_group("rotation.my.domain/v1"), "rotation.my.domain");
        assert_eq!(api_group("v1"), "");
    }
}
