use crate::domain::{
    AuthConfiguration, ContainerInspection, ContainerRuntime, ContainerSpec, RemoveOptions,
    RuntimeEvent, RuntimeEventKind,
};
use anyhow::{Result, anyhow, bail};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, RwLock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Exit code a stopped container reports (SIGTERM)
pub const STOPPED_EXIT_CODE: i64 = 143;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Exited(i64),
}

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    pub spec: ContainerSpec,
}

/// In-memory runtime recording every call.
///
/// Containers never exit on their own: tests drive exits with [`MockRuntime::finish_container`].
#[derive(Debug, Default)]
pub struct MockRuntime {
    images: RwLock<HashSet<String>>,
    containers: RwLock<HashMap<String, MockContainer>>,
    commands: RwLock<Vec<String>>,
    fail_on: RwLock<Option<String>>,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<UnboundedSender<RuntimeEvent>>>,
    pulls_held: Mutex<bool>,
    pulls_released: Condvar,
    creates_held: Mutex<bool>,
    creates_released: Condvar,
    outputs: RwLock<HashMap<String, Vec<String>>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an image as already present locally
    pub fn add_image(&self, reference: &str) {
        self.images.write().unwrap().insert(reference.to_string());
    }

    /// Adds a container that exists before any goal runs
    pub fn add_container(&self, name: &str, state: ContainerState) -> String {
        let id = self.allocate_id();
        self.containers.write().unwrap().insert(
            id.clone(),
            MockContainer {
                id: id.clone(),
                name: name.to_string(),
                state,
                spec: ContainerSpec {
                    name: name.to_string(),
                    ..Default::default()
                },
            },
        );
        id
    }

    pub fn set_fail_on(&self, operation: &str) {
        *self.fail_on.write().unwrap() = Some(operation.to_string());
    }

    /// Blocks every pull until [`MockRuntime::release_pulls`]
    pub fn hold_pulls(&self) {
        *self.pulls_held.lock().unwrap() = true;
    }

    pub fn release_pulls(&self) {
        *self.pulls_held.lock().unwrap() = false;
        self.pulls_released.notify_all();
    }

    /// Blocks every create until [`MockRuntime::release_creates`]
    pub fn hold_creates(&self) {
        *self.creates_held.lock().unwrap() = true;
    }

    pub fn release_creates(&self) {
        *self.creates_held.lock().unwrap() = false;
        self.creates_released.notify_all();
    }

    /// Canned output for the container named `name`, served by both log calls
    pub fn set_output(&self, name: &str, lines: &[&str]) {
        self.outputs.write().unwrap().insert(
            name.to_string(),
            lines.iter().map(|line| line.to_string()).collect(),
        );
    }

    pub fn get_commands(&self) -> Vec<String> {
        self.commands.read().unwrap().clone()
    }

    pub fn position_of(&self, command: &str) -> Option<usize> {
        self.get_commands().iter().position(|c| c == command)
    }

    pub fn container_exists(&self, name: &str) -> bool {
        self.container_id(name).is_some()
    }

    pub fn container_id(&self, name: &str) -> Option<String> {
        self.containers
            .read()
            .unwrap()
            .values()
            .find(|c| c.name == name)
            .map(|c| c.id.clone())
    }

    pub fn get_state(&self, name: &str) -> Option<ContainerState> {
        self.containers
            .read()
            .unwrap()
            .values()
            .find(|c| c.name == name)
            .map(|c| c.state.clone())
    }

    pub fn spec(&self, name: &str) -> Option<ContainerSpec> {
        self.containers
            .read()
            .unwrap()
            .values()
            .find(|c| c.name == name)
            .map(|c| c.spec.clone())
    }

    /// Makes a running container exit with `exit_code`, emitting a `die` event
    pub fn finish_container(&self, name: &str, exit_code: i64) -> Result<()> {
        let id = self
            .container_id(name)
            .ok_or_else(|| anyhow!("no container named {name}"))?;
        self.set_exited(&id, exit_code);
        Ok(())
    }

    /// Emits an arbitrary event, e.g. for a container no goal owns
    pub fn emit(&self, event: RuntimeEvent) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_exited(&self, id: &str, exit_code: i64) {
        if let Some(container) = self.containers.write().unwrap().get_mut(id) {
            container.state = ContainerState::Exited(exit_code);
        }
        self.emit(RuntimeEvent::new(id, RuntimeEventKind::Die));
    }

    fn allocate_id(&self) -> String {
        format!("{:012x}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn name_of(&self, id: &str) -> String {
        self.containers
            .read()
            .unwrap()
            .get(id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn record_command(&self, cmd: &str) {
        self.commands.write().unwrap().push(cmd.to_string());
    }

    fn output_of(&self, id: &str) -> Vec<String> {
        self.outputs
            .read()
            .unwrap()
            .get(&self.name_of(id))
            .cloned()
            .unwrap_or_default()
    }

    fn check_fail(&self, operation: &str) -> Result<()> {
        if let Some(ref fail_on) = *self.fail_on.read().unwrap() {
            if fail_on == operation {
                bail!("Mock failure on: {}", operation);
            }
        }
        Ok(())
    }
}

impl ContainerRuntime for MockRuntime {
    fn image_exists(&self, reference: &str) -> Result<bool> {
        self.record_command(&format!("image_exists:{}", reference));
        self.check_fail("image_exists")?;
        Ok(self.images.read().unwrap().contains(reference))
    }

    fn pull_image(&self, reference: &str, auth: Option<&AuthConfiguration>) -> Result<()> {
        let mut held = self.pulls_held.lock().unwrap();
        while *held {
            held = self.pulls_released.wait(held).unwrap();
        }
        drop(held);

        match auth.and_then(|a| a.username.as_deref()) {
            Some(user) => self.record_command(&format!("pull:{}@{}", reference, user)),
            None => self.record_command(&format!("pull:{}", reference)),
        }
        self.check_fail("pull")?;

        self.images.write().unwrap().insert(reference.to_string());
        Ok(())
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut held = self.creates_held.lock().unwrap();
        while *held {
            held = self.creates_released.wait(held).unwrap();
        }
        drop(held);

        self.record_command(&format!("create:{}", spec.name));
        self.check_fail("create")?;

        let mut containers = self.containers.write().unwrap();
        if containers.values().any(|c| c.name == spec.name) {
            bail!("container name {} is already in use", spec.name);
        }

        let id = self.allocate_id();
        containers.insert(
            id.clone(),
            MockContainer {
                id: id.clone(),
                name: spec.name.clone(),
                state: ContainerState::Created,
                spec: spec.clone(),
            },
        );
        Ok(id)
    }

    fn start_container(&self, id: &str) -> Result<()> {
        self.record_command(&format!("start:{}", self.name_of(id)));
        self.check_fail("start")?;

        match self.containers.write().unwrap().get_mut(id) {
            Some(container) => container.state = ContainerState::Running,
            None => bail!("no such container: {id}"),
        }
        self.emit(RuntimeEvent::new(id, RuntimeEventKind::Start));
        Ok(())
    }

    fn stop_container(&self, id: &str) -> Result<()> {
        self.record_command(&format!("stop:{}", self.name_of(id)));
        self.check_fail("stop")?;

        let running = matches!(
            self.containers.read().unwrap().get(id).map(|c| &c.state),
            Some(ContainerState::Running)
        );
        if running {
            self.set_exited(id, STOPPED_EXIT_CODE);
        }
        Ok(())
    }

    fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<()> {
        let flags = if options.remove_volumes { " -v" } else { "" };
        self.record_command(&format!("remove:{}{}", self.name_of(id), flags));
        self.check_fail("remove")?;

        if self.containers.write().unwrap().remove(id).is_none() {
            bail!("no such container: {id}");
        }
        Ok(())
    }

    fn inspect_container(&self, id: &str) -> Result<ContainerInspection> {
        self.record_command(&format!("inspect:{}", self.name_of(id)));
        self.check_fail("inspect")?;

        let containers = self.containers.read().unwrap();
        let container = containers
            .get(id)
            .ok_or_else(|| anyhow!("no such container: {id}"))?;

        Ok(ContainerInspection {
            id: container.id.clone(),
            name: container.name.clone(),
            image: container.spec.image.clone(),
            running: container.state == ContainerState::Running,
            exit_code: match container.state {
                ContainerState::Exited(code) => code,
                _ => 0,
            },
        })
    }

    fn find_container_by_name(&self, name: &str) -> Result<Option<String>> {
        self.record_command(&format!("find:{}", name));
        self.check_fail("find")?;
        Ok(self.container_id(name))
    }

    fn container_logs(&self, id: &str, tail: usize) -> Result<String> {
        self.record_command(&format!("logs:{}", self.name_of(id)));
        self.check_fail("logs")?;

        let output = self.output_of(id);
        let skip = output.len().saturating_sub(tail);
        Ok(output[skip..].join("\n"))
    }

    fn follow_logs(&self, id: &str) -> Result<UnboundedReceiver<String>> {
        self.record_command(&format!("follow:{}", self.name_of(id)));
        self.check_fail("follow")?;

        let (tx, rx) = mpsc::unbounded_channel();
        for line in self.output_of(id) {
            tx.send(line).ok();
        }
        Ok(rx)
    }

    fn events(&self) -> Result<UnboundedReceiver<RuntimeEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        Ok(rx)
    }
}
