use std::fmt;

use kube::{Resource, ResourceExt};

/// ObjectKey は namespace 付きオブジェクトの参照（namespace/name）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// for_resource は namespace を持つリソースからキーを作る。
    /// cluster スコープのリソースや namespace 未設定のオブジェクトは None。
    pub fn for_resource<K: Resource>(resource: &K) -> Option<Self> {
        let namespace = resource.namespace()?;
        Some(Self::new(namespace, resource.name_any()))
    }

    /// sibling は同じ namespace 内の別オブジェクトを指すキーを返す。
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::new(self.namespace.clone(), name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    #[test]
    fn display_format() {
        assert_eq!(ObjectKey::new("default", "app").to_string(), "default/app");
    }

    #[test]
    fn for_resource_requires_namespace() {
        let mut cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("cm".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(ObjectKey::for_resource(&cm).is_none());

        cm.metadata.namespace = Some("ns".to_string());
        assert_eq!(ObjectKey::for_resource(&cm), Some(ObjectKey::new("ns", "cm")));
    }

    #[test]
    fn sibling_keeps_namespace() {
        let key = ObjectKey::new("team-a", "rotator");
        assert_eq!(key.sibling("generated"), ObjectKey::new("team-a", "generated"));
    }
}
