//! Per-container lifecycle state machine.
//!
//! A goal reacts to four inputs: `start` requests, completions of its own runtime calls,
//! runtime events for its container, and status changes of the goals it depends on. Runtime
//! calls never run under the goal's lock; they are dispatched to the blocking pool and re-take
//! the lock only to record their outcome. Status changes leave through the owning application's
//! relay channel, so a goal never calls into a sibling directly.

use crate::domain::{
    AuthConfiguration, ContainerInspection, ContainerRuntime, ContainerSpec, GoalConfiguration,
    GoalState, GoalStatus, RemoveOptions, RuntimeEvent, RuntimeEventKind, TransitionLogEntry,
};
use anyhow::{Result, bail};
use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lines of container output a goal keeps in memory
pub const OUTPUT_TAIL_LENGTH: usize = 400;

/// Messages a goal sends to its owning application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoalMessage {
    StatusChanged { goal: String, status: GoalState },
    StartRequested { goal: String },
}

/// The inputs of the two transition predicates
#[derive(Debug, Clone)]
pub(crate) struct Lifecycle {
    should_run: bool,
    image_exists: bool,
    smart_restart: bool,
    current: GoalState,
    run_after: BTreeMap<String, GoalState>,
    links: BTreeMap<String, GoalState>,
}

impl Lifecycle {
    fn new(config: &GoalConfiguration) -> Self {
        Self {
            should_run: false,
            image_exists: false,
            smart_restart: config.smart_restart,
            current: GoalState::NotRunning,
            run_after: config
                .run_after
                .iter()
                .map(|name| (name.clone(), GoalState::NotRunning))
                .collect(),
            links: config
                .linked_containers()
                .into_iter()
                .map(|lc| (lc.name, GoalState::NotRunning))
                .collect(),
        }
    }

    fn can_run(&self) -> bool {
        if !self.should_run || !self.image_exists {
            return false;
        }

        if self
            .run_after
            .values()
            .any(|status| *status != GoalState::Terminated)
        {
            return false;
        }
        if self.links.values().any(|status| *status != GoalState::Running) {
            return false;
        }

        match self.current {
            GoalState::WaitingForDependencies | GoalState::FetchingImage => true,
            GoalState::Failed => self.smart_restart,
            _ => false,
        }
    }

    fn should_stop(&self) -> bool {
        if self.current != GoalState::Running {
            return false;
        }

        !self.should_run || self.links.values().any(|status| *status != GoalState::Running)
    }

    /// Returns whether `goal` is one of the tracked dependencies
    fn record_dependency(&mut self, goal: &str, status: &GoalState) -> bool {
        let mut tracked = false;
        if let Some(entry) = self.run_after.get_mut(goal) {
            *entry = status.clone();
            tracked = true;
        }
        if let Some(entry) = self.links.get_mut(goal) {
            *entry = status.clone();
            tracked = true;
        }
        tracked
    }

    fn unmet_dependencies(&self) -> Vec<String> {
        let mut unmet: Vec<String> = self
            .run_after
            .iter()
            .filter(|(_, status)| **status != GoalState::Terminated)
            .map(|(name, _)| name.clone())
            .collect();

        for (name, status) in &self.links {
            if *status != GoalState::Running && !unmet.contains(name) {
                unmet.push(name.clone());
            }
        }

        unmet
    }
}

struct GoalInner {
    lifecycle: Lifecycle,
    container_id: Option<String>,
    exit_code: Option<i64>,
    transitions: VecDeque<TransitionLogEntry>,
    transition_log_length: usize,
    tail: VecDeque<String>,
    torn_down: bool,
    listeners: Option<watch::Sender<GoalStatus>>,
}

pub struct Goal {
    name: String,
    application: String,
    image: String,
    auth: Option<AuthConfiguration>,
    spec: ContainerSpec,
    runtime: Arc<dyn ContainerRuntime>,
    relay: UnboundedSender<GoalMessage>,
    inner: Mutex<GoalInner>,
}

impl std::fmt::Debug for Goal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Goal")
            .field("application", &self.application)
            .field("name", &self.name)
            .field("status", &self.status().status)
            .finish()
    }
}

impl Goal {
    /// Builds the goal in `not_running` and launches its image fetch.
    pub(crate) fn new(
        application: &str,
        name: &str,
        config: &GoalConfiguration,
        spec: ContainerSpec,
        runtime: Arc<dyn ContainerRuntime>,
        relay: UnboundedSender<GoalMessage>,
        transition_log_length: usize,
    ) -> Arc<Self> {
        let (listeners, _) = watch::channel(GoalStatus {
            name: name.to_string(),
            status: GoalState::NotRunning,
            exit_code: None,
        });

        let goal = Arc::new(Self {
            name: name.to_string(),
            application: application.to_string(),
            image: config.image.clone(),
            auth: config.auth_config.clone().filter(|a| !a.is_empty()),
            spec,
            runtime,
            relay,
            inner: Mutex::new(GoalInner {
                lifecycle: Lifecycle::new(config),
                container_id: None,
                exit_code: None,
                transitions: VecDeque::new(),
                transition_log_length: transition_log_length.max(1),
                tail: VecDeque::new(),
                torn_down: false,
                listeners: Some(listeners),
            }),
        });

        goal.fetch_image();
        goal
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> GoalStatus {
        let inner = self.lock();
        self.snapshot(&inner)
    }

    pub fn container_id(&self) -> Option<String> {
        self.lock().container_id.clone()
    }

    pub fn transition_log(&self) -> Vec<TransitionLogEntry> {
        self.lock().transitions.iter().cloned().collect()
    }

    /// The most recent output of the goal's containers, oldest line first.
    ///
    /// Each container the goal starts opens with a separator line and its ID. The tail survives
    /// restarts and keeps at most [`OUTPUT_TAIL_LENGTH`] lines.
    pub fn tail(&self) -> Vec<String> {
        self.lock().tail.iter().cloned().collect()
    }

    /// Asks the runtime for the last `lines` lines of output. Blocks on the runtime.
    pub fn logs(&self, lines: usize) -> Result<String> {
        let Some(id) = self.container_id() else {
            bail!("goal {} has no container", self.name);
        };
        self.runtime.container_logs(&id, lines)
    }

    /// Watch this goal's status; `None` once the goal has been terminated.
    ///
    /// The channel closes when the goal is terminated.
    pub fn subscribe(&self) -> Option<watch::Receiver<GoalStatus>> {
        self.lock().listeners.as_ref().map(|tx| tx.subscribe())
    }

    /// Inspects the goal's current container. Blocks on the runtime.
    pub fn inspect(&self) -> Result<ContainerInspection> {
        let Some(id) = self.container_id() else {
            bail!("goal {} has no container", self.name);
        };
        self.runtime.inspect_container(&id)
    }

    pub fn start(self: &Arc<Self>) {
        let mut inner = self.lock();
        if inner.torn_down {
            return;
        }

        let already_requested = inner.lifecycle.should_run;
        inner.lifecycle.should_run = true;

        if inner.lifecycle.can_run() {
            self.start_container(&mut inner);
            return;
        }

        if !inner.lifecycle.current.is_idle() {
            debug!(
                "goal {}/{} already {}, start recorded",
                self.application, self.name, inner.lifecycle.current
            );
            return;
        }

        let pending = if inner.lifecycle.image_exists {
            GoalState::WaitingForDependencies
        } else {
            GoalState::FetchingImage
        };
        if already_requested && inner.lifecycle.current == pending {
            return;
        }
        self.transition(&mut inner, pending);

        for dependency in inner.lifecycle.unmet_dependencies() {
            debug!(
                "goal {}/{} requests start of {}",
                self.application, self.name, dependency
            );
            self.relay
                .send(GoalMessage::StartRequested { goal: dependency })
                .ok();
        }
    }

    pub fn sibling_status_update(self: &Arc<Self>, goal: &str, status: &GoalState) {
        let mut inner = self.lock();
        if inner.torn_down {
            return;
        }

        inner.lifecycle.record_dependency(goal, status);

        if inner.lifecycle.can_run() {
            self.start_container(&mut inner);
        } else if inner.lifecycle.should_stop() {
            self.stop_container(&mut inner);
        }
    }

    /// Reacts to a runtime event; events for other containers are ignored.
    pub fn handle_runtime_event(self: &Arc<Self>, event: &RuntimeEvent) {
        let mut inner = self.lock();
        if inner.container_id.as_deref() != Some(event.container_id.as_str()) {
            return;
        }

        match &event.kind {
            RuntimeEventKind::Start => {
                self.transition(&mut inner, GoalState::Running);
                if inner.torn_down {
                    return;
                }
                push_tail(&mut inner, "----------".to_string());
                push_tail(
                    &mut inner,
                    format!("container {} started", event.container_id),
                );
                drop(inner);
                self.follow_output(&event.container_id);
            }
            RuntimeEventKind::Die => {
                let goal = Arc::clone(self);
                let id = event.container_id.clone();
                tokio::task::spawn_blocking(move || match goal.runtime.inspect_container(&id) {
                    Ok(inspection) => goal.set_exit_code(inspection.exit_code),
                    Err(e) => goal.set_status(GoalState::error(format!("{e:#}"))),
                });
            }
            RuntimeEventKind::Other(_) => {}
        }
    }

    pub fn set_exit_code(self: &Arc<Self>, exit_code: i64) {
        let mut inner = self.lock();
        inner.exit_code = Some(exit_code);

        if exit_code == 0 {
            self.transition(&mut inner, GoalState::Terminated);
            return;
        }

        self.transition(&mut inner, GoalState::Failed);
        if inner.lifecycle.can_run() {
            info!(
                "goal {}/{} exited with {}, restarting",
                self.application, self.name, exit_code
            );
            self.start_container(&mut inner);
        }
    }

    pub fn set_status(&self, status: GoalState) {
        let mut inner = self.lock();
        self.transition(&mut inner, status);
    }

    /// Removes the goal's container and closes its status channel.
    ///
    /// Blocks on the runtime. Removal failures are logged, never returned.
    pub fn terminate(&self) {
        let (container_id, listeners) = {
            let mut inner = self.lock();
            inner.torn_down = true;
            (inner.container_id.clone(), inner.listeners.take())
        };

        if let Some(id) = container_id {
            match self.runtime.remove_container(&id, RemoveOptions::purge()) {
                Ok(()) => debug!("removed container {} of {}/{}", id, self.application, self.name),
                Err(e) => error!(
                    "failed to remove container {} of {}/{}: {:#}",
                    id, self.application, self.name, e
                ),
            }
        }

        drop(listeners);
    }

    /// Feeds the container's output into the tail until the runtime closes the stream.
    fn follow_output(self: &Arc<Self>, id: &str) {
        let mut output = match self.runtime.follow_logs(id) {
            Ok(output) => output,
            Err(e) => {
                warn!("cannot follow output of {}/{}: {:#}", self.application, self.name, e);
                self.add_to_tail(format!("could not follow output: {e:#}"));
                return;
            }
        };

        let goal: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(line) = output.recv().await {
                let Some(goal) = goal.upgrade() else {
                    return;
                };
                goal.add_to_tail(line);
            }
            if let Some(goal) = goal.upgrade() {
                goal.add_to_tail("output closed".to_string());
            }
        });
    }

    fn add_to_tail(&self, line: String) {
        let mut inner = self.lock();
        if !inner.torn_down {
            push_tail(&mut inner, line);
        }
    }

    fn fetch_image(self: &Arc<Self>) {
        let goal = Arc::clone(self);
        tokio::task::spawn_blocking(move || match goal.pull_if_missing() {
            Ok(()) => goal.fetch_image_finished(),
            Err(e) => goal.fetch_image_failed(&format!("{e:#}")),
        });
    }

    fn pull_if_missing(&self) -> Result<()> {
        if self.runtime.image_exists(&self.image)? {
            return Ok(());
        }

        info!("pulling {} for {}/{}", self.image, self.application, self.name);
        self.runtime.pull_image(&self.image, self.auth.as_ref())
    }

    fn fetch_image_finished(self: &Arc<Self>) {
        let mut inner = self.lock();
        inner.lifecycle.image_exists = true;

        if matches!(
            inner.lifecycle.current,
            GoalState::NotRunning | GoalState::FetchingImage
        ) {
            self.transition(&mut inner, GoalState::WaitingForDependencies);
        }

        if inner.lifecycle.can_run() {
            self.start_container(&mut inner);
        }
    }

    fn fetch_image_failed(&self, reason: &str) {
        warn!(
            "fetching {} for {}/{} failed: {}",
            self.image, self.application, self.name, reason
        );
        self.set_status(GoalState::error(reason));
    }

    fn start_container(self: &Arc<Self>, inner: &mut GoalInner) {
        if inner.torn_down {
            return;
        }
        self.transition(inner, GoalState::Starting);

        let goal = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = goal.run_container() {
                warn!(
                    "starting container for {}/{} failed: {:#}",
                    goal.application, goal.name, e
                );
                goal.set_status(GoalState::error(format!("{e:#}")));
            }
        });
    }

    /// Replaces any stale container with the goal's name, then creates and starts a new one.
    fn run_container(&self) -> Result<()> {
        if let Some(stale) = self.runtime.find_container_by_name(&self.spec.name)? {
            debug!("removing stale container {} ({})", self.spec.name, stale);
            self.runtime.remove_container(&stale, RemoveOptions::purge())?;
        }

        let id = self.runtime.create_container(&self.spec)?;

        if !self.record_container_id(&id) {
            debug!(
                "{}/{} was terminated while its container was created",
                self.application, self.name
            );
            if let Err(e) = self.runtime.remove_container(&id, RemoveOptions::purge()) {
                warn!("failed to remove late container {}: {:#}", id, e);
            }
            return Ok(());
        }

        self.runtime.start_container(&id)
    }

    fn record_container_id(&self, id: &str) -> bool {
        let mut inner = self.lock();
        if inner.torn_down {
            return false;
        }
        inner.container_id = Some(id.to_string());
        true
    }

    fn stop_container(self: &Arc<Self>, inner: &mut GoalInner) {
        let Some(id) = inner.container_id.clone() else {
            return;
        };
        self.transition(inner, GoalState::StoppingContainer);

        let goal = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = goal.runtime.stop_container(&id) {
                goal.set_status(GoalState::error(format!("{e:#}")));
            }
        });
    }

    /// Records a new status and publishes it. A torn-down goal keeps its last status.
    fn transition(&self, inner: &mut GoalInner, status: GoalState) {
        if inner.torn_down {
            return;
        }

        debug!("goal {}/{} -> {}", self.application, self.name, status);

        inner.lifecycle.current = status.clone();
        if inner.transitions.len() >= inner.transition_log_length {
            inner.transitions.pop_front();
        }
        inner.transitions.push_back(TransitionLogEntry {
            time: Utc::now(),
            status: status.clone(),
        });

        let snapshot = self.snapshot(inner);
        if let Some(tx) = &inner.listeners {
            tx.send_replace(snapshot);
        }

        self.relay
            .send(GoalMessage::StatusChanged {
                goal: self.name.clone(),
                status,
            })
            .ok();
    }

    fn snapshot(&self, inner: &GoalInner) -> GoalStatus {
        GoalStatus {
            name: self.name.clone(),
            status: inner.lifecycle.current.clone(),
            exit_code: inner.exit_code,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GoalInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn push_tail(inner: &mut GoalInner, line: String) {
    if inner.tail.len() >= OUTPUT_TAIL_LENGTH {
        inner.tail.pop_front();
    }
    inner.tail.push_back(line);
}
