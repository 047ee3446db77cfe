use super::descriptor_store;
use anyhow::{Context, Result, bail};
use clap::Args;
use dockyard::domain::ContainerRuntime;
use dockyard::infra::config::Settings;
use dockyard::infra::{DescriptorStore, PodmanAdapter};
use dockyard::services::OUTPUT_TAIL_LENGTH;
use std::path::Path;

#[derive(Args)]
pub struct LogsArgs {
    /// Name the application was deployed under
    pub name: String,
    /// Goal whose container output to show
    pub goal: String,
    /// Number of lines to show
    #[arg(short = 'n', long, default_value_t = OUTPUT_TAIL_LENGTH)]
    pub lines: usize,
}

pub fn run(args: LogsArgs, config_dir: &Path, settings: &Settings) -> Result<()> {
    let store = descriptor_store(settings, config_dir);
    let runtime = PodmanAdapter::with_binary(settings.runtime_binary());

    let output = goal_output(&store, &runtime, &args.name, &args.goal, args.lines)?;
    println!("{}", output.trim_end());
    Ok(())
}

/// Output of the container a persisted goal runs in
fn goal_output(
    store: &DescriptorStore,
    runtime: &dyn ContainerRuntime,
    name: &str,
    goal: &str,
    lines: usize,
) -> Result<String> {
    if !store.path_for(name).exists() {
        bail!("no application named {name} in {:?}", store.dir());
    }
    let config = store
        .load(name)
        .with_context(|| format!("loading descriptor of {name}"))?;

    let Some(gc) = config.goals.get(goal) else {
        bail!("application {name} has no goal {goal}");
    };
    let container = gc.container_name_in(name, goal);
    let Some(id) = runtime.find_container_by_name(&container)? else {
        bail!("{container} does not exist");
    };

    runtime
        .container_logs(&id, lines)
        .with_context(|| format!("reading output of {container}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard::domain::{ApplicationConfiguration, GoalConfiguration};
    use dockyard::test_support::{ContainerState, MockRuntime};
    use tempfile::tempdir;

    fn saved_application(store: &DescriptorStore) {
        let mut config = ApplicationConfiguration {
            main_goal: "web".into(),
            ..Default::default()
        };
        for goal in ["web", "db"] {
            config.goals.insert(
                goal.into(),
                GoalConfiguration {
                    image: "alpine:3.4".into(),
                    ..Default::default()
                },
            );
        }
        store.save("shop", &config).unwrap();
    }

    #[test]
    fn reads_last_lines_of_goal_container() {
        let dir = tempdir().unwrap();
        let store = DescriptorStore::new(dir.path());
        saved_application(&store);
        let mock = MockRuntime::new();
        mock.add_container("ap_shop_web", ContainerState::Running);
        mock.set_output("ap_shop_web", &["one", "two", "three"]);

        let output = goal_output(&store, &mock, "shop", "web", 2).unwrap();

        assert_eq!(output, "two\nthree");
        assert!(mock.get_commands().contains(&"logs:ap_shop_web".to_string()));
    }

    #[test]
    fn missing_goal_or_container_is_an_error() {
        let dir = tempdir().unwrap();
        let store = DescriptorStore::new(dir.path());
        saved_application(&store);
        let mock = MockRuntime::new();

        assert!(goal_output(&store, &mock, "shop", "cache", 10).is_err());
        assert!(goal_output(&store, &mock, "shop", "db", 10).is_err());
        assert!(goal_output(&store, &mock, "ghost", "web", 10).is_err());
        assert!(mock.get_commands().iter().all(|c| !c.starts_with("logs:")));
    }
}
