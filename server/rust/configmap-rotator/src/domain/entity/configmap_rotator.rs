use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ConfigMapRotatorSpec はローテーション対象 ConfigMap と周期の宣言（desired state）。
///
/// フィールド名は既存マニフェストとの互換のため `configMapName` 等を正とし、
/// `targetName` / `intervalHours` / `template` も別名として受け付ける。
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "rotation.my.domain",
    version = "v1",
    kind = "ConfigMapRotator",
    plural = "configmaprotators",
    shortname = "cmr",
    namespaced,
    status = "ConfigMapRotatorStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"ConfigMap","type":"string","jsonPath":".spec.configMapName"}"#,
    printcolumn = r#"{"name":"Interval","type":"integer","jsonPath":".spec.rotationIntervalHours"}"#,
    printcolumn = r#"{"name":"Generation","type":"integer","jsonPath":".status.currentGeneration"}"#,
    printcolumn = r#"{"name":"Last Rotation","type":"date","jsonPath":".status.lastRotationTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapRotatorSpec {
    /// 生成する ConfigMap の名前（rotator と同じ namespace に作成される）
    #[serde(alias = "targetName")]
    pub config_map_name: String,

    /// ローテーション周期（時間）
    #[serde(alias = "intervalHours")]
    pub rotation_interval_hours: i64,

    /// 生成データのキーとテンプレート値
    #[serde(alias = "template")]
    pub data_template: BTreeMap<String, String>,
}

/// ConfigMapRotatorStatus はコントローラのみが更新する観測状態。
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapRotatorStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rotation_time: Option<DateTime<Utc>>,

    /// ローテーション成功ごとにちょうど 1 ずつ増加する
    #[serde(default)]
    pub current_generation: i64,
}

impl ConfigMapRotator {
    /// status_or_default は status 未作成（初回リコンサイル前）なら空の status を返す。
    pub fn status_or_default(&self) -> ConfigMapRotatorStatus {
        self.status.clone().unwrap_or_default()
    }
}
