use kube::CustomResourceExt;

use configmap_rotator::domain::entity::ConfigMapRotator;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&ConfigMapRotator::crd())?);
    Ok(())
}
