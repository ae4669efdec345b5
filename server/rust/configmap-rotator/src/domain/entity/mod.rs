pub mod configmap_rotator;
pub mod object_key;

pub use configmap_rotator::{ConfigMapRotator, ConfigMapRotatorSpec, ConfigMapRotatorStatus};
pub use object_key::ObjectKey;
