//! Prints the CustomResourceDefinitions as a multi-document YAML stream.

use crds::{FloatingIP, FloatingIPPool, FloatingIPProjectQuota};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        FloatingIPPool::crd(),
        FloatingIPProjectQuota::crd(),
        FloatingIP::crd(),
    ];

    for crd in crds {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }

    Ok(())
}
