use super::descriptor_store;
use anyhow::Result;
use dockyard::domain::ContainerRuntime;
use dockyard::infra::PodmanAdapter;
use dockyard::infra::config::Settings;
use std::path::Path;
use tracing::warn;

pub fn run(config_dir: &Path, settings: &Settings) -> Result<()> {
    let store = descriptor_store(settings, config_dir);
    let runtime = PodmanAdapter::with_binary(settings.runtime_binary());

    let names = store.list()?;
    if names.is_empty() {
        println!("No applications in {:?}", store.dir());
        return Ok(());
    }

    for name in names {
        let config = match store.load(&name) {
            Ok(config) => config,
            Err(e) => {
                warn!("skipping {name}: {e:#}");
                continue;
            }
        };

        println!("📦 {} (main goal: {})", name, config.main_goal);
        for (goal, gc) in &config.goals {
            let container = gc.container_name_in(&name, goal);
            println!("   {:<24} {}", goal, container_state(&runtime, &container));
        }
    }

    Ok(())
}

fn container_state(runtime: &dyn ContainerRuntime, container: &str) -> String {
    let id = match runtime.find_container_by_name(container) {
        Ok(Some(id)) => id,
        Ok(None) => return "not created".to_string(),
        Err(e) => return format!("unknown ({e:#})"),
    };

    match runtime.inspect_container(&id) {
        Ok(inspection) if inspection.running => "running".to_string(),
        Ok(inspection) => format!("exited ({})", inspection.exit_code),
        Err(e) => format!("unknown ({e:#})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard::test_support::{ContainerState, MockRuntime};

    #[test]
    fn describes_container_states() {
        let mock = MockRuntime::new();
        mock.add_container("running", ContainerState::Running);
        mock.add_container("done", ContainerState::Exited(2));

        assert_eq!(container_state(&mock, "running"), "running");
        assert_eq!(container_state(&mock, "done"), "exited (2)");
        assert_eq!(container_state(&mock, "missing"), "not created");
    }
}
