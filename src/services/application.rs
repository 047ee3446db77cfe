use super::goal::{Goal, GoalMessage};
use crate::domain::{
    ApplicationConfiguration, ApplicationStatus, ContainerInspection, ContainerRuntime,
    ContainerSpec, GoalState, RuntimeEvent, TransitionLogEntry,
};
use crate::infra::DescriptorStore;
use anyhow::{Result, anyhow};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_TRANSITION_LOG_LENGTH: usize = 255;

/// Knobs shared by every goal of an application
#[derive(Debug, Clone)]
pub struct ApplicationSettings {
    pub transition_log_length: usize,
    /// Anchor for `./relative` volume sources
    pub working_dir: PathBuf,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            transition_log_length: DEFAULT_TRANSITION_LOG_LENGTH,
            working_dir: PathBuf::from("."),
        }
    }
}

/// One deployed application: its goals and the relay that propagates their statuses.
#[derive(Debug)]
pub struct Application {
    name: String,
    config: ApplicationConfiguration,
    goals: BTreeMap<String, Arc<Goal>>,
    store: DescriptorStore,
    listeners: Mutex<Option<watch::Sender<ApplicationStatus>>>,
    relay: Mutex<Option<JoinHandle<()>>>,
}

impl Application {
    /// Builds every goal, spawns the relay task and starts the main goal.
    ///
    /// Must be called within a tokio runtime. The configuration is expected to be valid.
    pub fn new(
        name: &str,
        config: ApplicationConfiguration,
        runtime: Arc<dyn ContainerRuntime>,
        store: DescriptorStore,
        settings: &ApplicationSettings,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let goals = config
            .goals
            .iter()
            .filter_map(|(goal_name, gc)| {
                let spec =
                    ContainerSpec::for_goal(name, goal_name, &config, &settings.working_dir)?;
                let goal = Goal::new(
                    name,
                    goal_name,
                    gc,
                    spec,
                    Arc::clone(&runtime),
                    tx.clone(),
                    settings.transition_log_length,
                );
                Some((goal_name.clone(), goal))
            })
            .collect();
        drop(tx);

        let app = Arc::new(Self {
            name: name.to_string(),
            config,
            goals,
            store,
            listeners: Mutex::new(None),
            relay: Mutex::new(None),
        });

        let (listeners, _) = watch::channel(app.status());
        *lock(&app.listeners) = Some(listeners);
        *lock(&app.relay) = Some(tokio::spawn(relay(Arc::downgrade(&app), rx)));

        info!(
            "application {} created with {} goal(s)",
            app.name,
            app.goals.len()
        );
        app.start_goals();
        app
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn goal(&self, name: &str) -> Option<Arc<Goal>> {
        self.goals.get(name).cloned()
    }

    pub fn goal_names(&self) -> Vec<String> {
        self.goals.keys().cloned().collect()
    }

    pub fn status(&self) -> ApplicationStatus {
        ApplicationStatus {
            name: self.name.clone(),
            main_goal: self.config.main_goal.clone(),
            goals: self
                .goals
                .iter()
                .map(|(name, goal)| (name.clone(), goal.status()))
                .collect(),
        }
    }

    pub fn transition_log(&self, goal: &str) -> Option<Vec<TransitionLogEntry>> {
        self.goals.get(goal).map(|g| g.transition_log())
    }

    pub fn tail(&self, goal: &str) -> Option<Vec<String>> {
        self.goals.get(goal).map(|g| g.tail())
    }

    /// Inspects a goal's container. Blocks on the runtime.
    pub fn inspect(&self, goal: &str) -> Result<ContainerInspection> {
        self.existing_goal(goal)?.inspect()
    }

    /// The last `lines` lines of a goal's container output. Blocks on the runtime.
    pub fn logs(&self, goal: &str, lines: usize) -> Result<String> {
        self.existing_goal(goal)?.logs(lines)
    }

    /// Watch the aggregated status; `None` once the application has been terminated
    pub fn subscribe(&self) -> Option<watch::Receiver<ApplicationStatus>> {
        lock(&self.listeners).as_ref().map(|tx| tx.subscribe())
    }

    pub fn handle_runtime_event(&self, event: &RuntimeEvent) {
        for goal in self.goals.values() {
            goal.handle_runtime_event(event);
        }
    }

    /// Delivers a goal's new status to its siblings, then republishes the application status.
    pub fn goal_status_update(&self, name: &str, status: &GoalState) {
        for (other, goal) in &self.goals {
            if other != name {
                goal.sibling_status_update(name, status);
            }
        }

        self.publish_status();
    }

    pub fn request_goal_start(&self, name: &str) {
        match self.goals.get(name) {
            Some(goal) => goal.start(),
            None => warn!(
                "application {} asked to start unknown goal {}",
                self.name, name
            ),
        }
    }

    /// Deletes the descriptor and terminates every goal. Blocks on the runtime.
    pub fn terminate(&self) {
        info!("terminating application {}", self.name);

        if let Err(e) = self.store.delete(&self.name) {
            error!("failed to delete descriptor of {}: {:#}", self.name, e);
        }

        for goal in self.goals.values() {
            goal.terminate();
        }

        lock(&self.listeners).take();
        if let Some(relay) = lock(&self.relay).take() {
            relay.abort();
        }
    }

    fn existing_goal(&self, goal: &str) -> Result<&Arc<Goal>> {
        self.goals
            .get(goal)
            .ok_or_else(|| anyhow!("application {} has no goal {}", self.name, goal))
    }

    fn start_goals(&self) {
        match self.goals.get(&self.config.main_goal) {
            Some(main) => main.start(),
            None => warn!(
                "application {} has no main goal {}",
                self.name, self.config.main_goal
            ),
        }
    }

    fn publish_status(&self) {
        let status = self.status();
        if let Some(tx) = lock(&self.listeners).as_ref() {
            tx.send_replace(status);
        }
    }
}

async fn relay(app: Weak<Application>, mut messages: UnboundedReceiver<GoalMessage>) {
    while let Some(message) = messages.recv().await {
        let Some(app) = app.upgrade() else {
            break;
        };

        match message {
            GoalMessage::StatusChanged { goal, status } => {
                app.goal_status_update(&goal, &status)
            }
            GoalMessage::StartRequested { goal } => app.request_goal_start(&goal),
        }
    }
    debug!("relay stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
