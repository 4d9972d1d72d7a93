//! Emits the CRD manifests for all Metalgrid resources as a multi-document
//! YAML stream, suitable for `kubectl apply -f -`.

use crds::{BindingIp, Subnet};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&Subnet::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&BindingIp::crd())?);
    Ok(())
}
