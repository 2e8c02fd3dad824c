//! Prints the Coastie CustomResourceDefinition as YAML
//!
//! `cargo run --bin crdgen > config/crd/coastie-crd.yaml`

use coastie_operator::crd::Coastie;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Coastie::crd())?);
    Ok(())
}
