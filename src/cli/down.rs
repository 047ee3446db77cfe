use super::descriptor_store;
use anyhow::{Context, Result, bail};
use clap::Args;
use dockyard::domain::{ContainerRuntime, RemoveOptions};
use dockyard::infra::config::Settings;
use dockyard::infra::{DescriptorStore, PodmanAdapter};
use std::path::Path;
use tracing::{info, warn};

#[derive(Args)]
pub struct DownArgs {
    /// Name the application was deployed under
    pub name: String,
}

pub fn run(args: DownArgs, config_dir: &Path, settings: &Settings) -> Result<()> {
    let store = descriptor_store(settings, config_dir);
    let runtime = PodmanAdapter::with_binary(settings.runtime_binary());
    remove_application(&store, &runtime, &args.name)
}

/// Removes every container of a persisted application, then its descriptor.
fn remove_application(
    store: &DescriptorStore,
    runtime: &dyn ContainerRuntime,
    name: &str,
) -> Result<()> {
    if !store.path_for(name).exists() {
        bail!("no application named {name} in {:?}", store.dir());
    }
    let config = store
        .load(name)
        .with_context(|| format!("loading descriptor of {name}"))?;

    for (goal, gc) in &config.goals {
        let container = gc.container_name_in(name, goal);
        match runtime.find_container_by_name(&container)? {
            Some(id) => {
                info!("🗑️  removing {container}");
                if let Err(e) = runtime.remove_container(&id, RemoveOptions::purge()) {
                    warn!("could not remove {container}: {e:#}");
                }
            }
            None => info!("{container} does not exist"),
        }
    }

    store.delete(name)?;
    println!("✅ {name} removed");
    Ok(())
}
