//! Print the `Cluster` CRD, and with `--plans` every provider's plans and parameter schema
use kluster::{provider::SimulatedClouds, runtime::bootstrap, Cluster};
use kube::CustomResourceExt;
use serde_json::json;

#[derive(clap::Parser)]
struct App {
    /// Print provider plans as JSON instead of the CRD
    #[arg(long)]
    plans: bool,
}

fn main() -> anyhow::Result<()> {
    let app: App = clap::Parser::parse();
    if !app.plans {
        print!("{}", serde_yaml::to_string(&Cluster::crd())?);
        return Ok(());
    }

    let registry = SimulatedClouds::new().registry(bootstrap::manifests("kluster"))?;
    let mut out = serde_json::Map::new();
    for name in registry.types() {
        let provider = registry.get(name)?;
        out.insert(
            name.to_string(),
            json!({
                "policy": provider.default_plan_policy(),
                "plans": provider.default_plans(),
                "schema": provider.plan_json_schema(),
            }),
        );
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
