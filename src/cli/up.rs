use super::{application_name, descriptor_dir, descriptor_store, print_status, read_descriptor};
use anyhow::{Context, Result, bail};
use clap::Args;
use dockyard::domain::{ApplicationStatus, GoalState};
use dockyard::infra::PodmanAdapter;
use dockyard::infra::config::Settings;
use dockyard::services::{ApplicationSettings, DEFAULT_TRANSITION_LOG_LENGTH, Registry};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Args)]
pub struct UpArgs {
    /// Application descriptor (JSON, or YAML by extension)
    pub file: PathBuf,
    /// Application name (default: descriptor file name)
    #[arg(long)]
    pub name: Option<String>,
    /// Exit once the main goal is running, leaving the containers behind
    #[arg(long)]
    pub detach: bool,
}

pub async fn run(args: UpArgs, config_dir: &Path, settings: &Settings) -> Result<()> {
    let config = read_descriptor(&args.file)?;
    let name = application_name(&args.file, args.name)?;

    let runtime = Arc::new(PodmanAdapter::with_binary(settings.runtime_binary()));
    let registry = Arc::new(Registry::new(
        runtime,
        descriptor_store(settings, config_dir),
        ApplicationSettings {
            transition_log_length: settings
                .transition_log_length()
                .unwrap_or(DEFAULT_TRANSITION_LOG_LENGTH),
            working_dir: descriptor_dir(&args.file)?,
        },
    ));
    registry.start_event_pump()?;

    let initial = registry.new_application(&name, config)?;
    info!("🚀 deploying {name} with {}", settings.runtime_binary());

    let app = registry
        .application(&name)
        .with_context(|| format!("application {name} vanished"))?;
    let mut updates = app
        .subscribe()
        .with_context(|| format!("application {name} already terminated"))?;

    let mut seen = BTreeMap::new();
    print_changes(&mut seen, &initial);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last = initial;
    while !is_done(&last, args.detach) {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                last = updates.borrow_and_update().clone();
                print_changes(&mut seen, &last);
            }
            _ = &mut ctrl_c => {
                warn!("interrupted, tearing down {name}");
                break;
            }
        }
    }

    let main_running = last
        .goal(&last.main_goal)
        .is_some_and(|g| g.status == GoalState::Running);
    if args.detach && main_running {
        print_status(&last);
        println!("↪️  {name} left running; use `dockyard down {name}` to remove it");
        return Ok(());
    }

    let failed = matches!(
        last.goal(&last.main_goal).map(|g| &g.status),
        Some(GoalState::Failed) | Some(GoalState::Error(_))
    );
    let tail = if failed {
        registry.goal_tail(&name, &last.main_goal)?
    } else {
        Vec::new()
    };

    registry.terminate_application(&name).await?;
    registry.shutdown().await;
    print_status(&last);

    if failed {
        for line in &tail {
            println!("   │ {line}");
        }
        bail!("main goal {} of {name} did not complete", last.main_goal)
    }
    Ok(())
}

fn is_done(status: &ApplicationStatus, detach: bool) -> bool {
    let Some(main) = status.goal(&status.main_goal) else {
        return true;
    };

    if detach && main.status == GoalState::Running {
        return true;
    }
    main.status.is_finished()
}

fn print_changes(seen: &mut BTreeMap<String, GoalState>, status: &ApplicationStatus) {
    for goal in status.goals.values() {
        if seen.get(&goal.name) == Some(&goal.status) {
            continue;
        }
        println!("   {:<24} {}", goal.name, goal.status);
        seen.insert(goal.name.clone(), goal.status.clone());
    }
}
