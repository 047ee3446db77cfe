//! The set of deployed applications and the runtime event pump feeding them.

use super::application::{Application, ApplicationSettings};
use crate::domain::validation::is_valid_goal_name;
use crate::domain::{
    ApplicationConfiguration, ApplicationStatus, ContainerRuntime, RuntimeEvent,
    TransitionLogEntry, ValidationError, validate,
};
use crate::infra::DescriptorStore;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("application {0:?} already exists")]
    AlreadyExists(String),

    #[error("application {0:?} not found")]
    ApplicationNotFound(String),

    #[error("goal {goal:?} not found in application {application:?}")]
    GoalNotFound { application: String, goal: String },

    #[error("application name {0:?} is invalid")]
    InvalidName(String),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("failed to persist application {application:?}: {reason}")]
    Persistence { application: String, reason: String },
}

pub struct Registry {
    runtime: Arc<dyn ContainerRuntime>,
    store: DescriptorStore,
    settings: ApplicationSettings,
    applications: RwLock<BTreeMap<String, Arc<Application>>>,
    /// Names being deployed; only touched under the `applications` write lock
    reserved: Mutex<BTreeSet<String>>,
    names: watch::Sender<Vec<String>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Registry {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: DescriptorStore,
        settings: ApplicationSettings,
    ) -> Self {
        let (names, _) = watch::channel(Vec::new());
        Self {
            runtime,
            store,
            settings,
            applications: RwLock::new(BTreeMap::new()),
            reserved: Mutex::new(BTreeSet::new()),
            names,
            pump: Mutex::new(None),
        }
    }

    /// Validates, persists and deploys an application, starting its main goal.
    ///
    /// The name is reserved first; validation, persistence and construction run without the
    /// registry lock. Must be called within a tokio runtime.
    pub fn new_application(
        &self,
        name: &str,
        config: ApplicationConfiguration,
    ) -> Result<ApplicationStatus, RegistryError> {
        if !is_valid_goal_name(name) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        self.reserve(name)?;

        let deployed = self.deploy(name, config);

        let mut applications = self
            .applications
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        let app = deployed?;
        applications.insert(name.to_string(), Arc::clone(&app));
        drop(applications);

        self.publish_names();
        Ok(app.status())
    }

    /// Unregisters the application, then removes its containers and descriptor.
    pub async fn terminate_application(&self, name: &str) -> Result<(), RegistryError> {
        let app = self
            .applications
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| RegistryError::ApplicationNotFound(name.to_string()))?;

        terminate(app).await;
        self.publish_names();
        Ok(())
    }

    pub fn application(&self, name: &str) -> Option<Arc<Application>> {
        self.applications
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Sorted
    pub fn application_names(&self) -> Vec<String> {
        self.applications
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn application_status(&self, name: &str) -> Result<ApplicationStatus, RegistryError> {
        Ok(self.get(name)?.status())
    }

    pub fn goal_transition_log(
        &self,
        application: &str,
        goal: &str,
    ) -> Result<Vec<TransitionLogEntry>, RegistryError> {
        self.get(application)?
            .transition_log(goal)
            .ok_or_else(|| RegistryError::GoalNotFound {
                application: application.to_string(),
                goal: goal.to_string(),
            })
    }

    /// The in-memory output tail of a goal's containers
    pub fn goal_tail(
        &self,
        application: &str,
        goal: &str,
    ) -> Result<Vec<String>, RegistryError> {
        self.get(application)?
            .tail(goal)
            .ok_or_else(|| RegistryError::GoalNotFound {
                application: application.to_string(),
                goal: goal.to_string(),
            })
    }

    pub fn container_id_for_goal(
        &self,
        application: &str,
        goal: &str,
    ) -> Result<Option<String>, RegistryError> {
        let goal = self
            .get(application)?
            .goal(goal)
            .ok_or_else(|| RegistryError::GoalNotFound {
                application: application.to_string(),
                goal: goal.to_string(),
            })?;
        Ok(goal.container_id())
    }

    /// Watch the sorted list of application names
    pub fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.names.subscribe()
    }

    /// Subscribes to the runtime's event feed and forwards every event to every application.
    pub fn start_event_pump(self: &Arc<Self>) -> anyhow::Result<()> {
        let mut events = self.runtime.events()?;
        let registry: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.dispatch(&event);
            }
            debug!("runtime event stream ended");
        });

        let previous = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    /// Stops the event pump and terminates every application.
    pub async fn shutdown(&self) {
        let pump = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pump) = pump {
            pump.abort();
        }

        let applications = std::mem::take(
            &mut *self
                .applications
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
        info!("shutting down {} application(s)", applications.len());

        for app in applications.into_values() {
            terminate(app).await;
        }
        self.publish_names();
    }

    fn reserve(&self, name: &str) -> Result<(), RegistryError> {
        let applications = self
            .applications
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);

        if applications.contains_key(name) || !reserved.insert(name.to_string()) {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }

    fn deploy(
        &self,
        name: &str,
        config: ApplicationConfiguration,
    ) -> Result<Arc<Application>, RegistryError> {
        validate(&config)?;

        self.store
            .save(name, &config)
            .map_err(|e| RegistryError::Persistence {
                application: name.to_string(),
                reason: format!("{e:#}"),
            })?;

        Ok(Application::new(
            name,
            config,
            Arc::clone(&self.runtime),
            self.store.clone(),
            &self.settings,
        ))
    }

    fn dispatch(&self, event: &RuntimeEvent) {
        let applications: Vec<Arc<Application>> = self
            .applications
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        for app in applications {
            app.handle_runtime_event(event);
        }
    }

    fn get(&self, name: &str) -> Result<Arc<Application>, RegistryError> {
        self.application(name)
            .ok_or_else(|| RegistryError::ApplicationNotFound(name.to_string()))
    }

    fn publish_names(&self) {
        self.names.send_replace(self.application_names());
    }
}

async fn terminate(app: Arc<Application>) {
    let name = app.name().to_string();
    if let Err(e) = tokio::task::spawn_blocking(move || app.terminate()).await {
        error!("terminating application {} panicked: {}", name, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GoalConfiguration;
    use crate::test_support::MockRuntime;
    use tempfile::tempdir;

    fn single_goal() -> ApplicationConfiguration {
        let mut config = ApplicationConfiguration {
            main_goal: "g1".into(),
            ..Default::default()
        };
        config.goals.insert(
            "g1".into(),
            GoalConfiguration {
                image: "alpine:3.4".into(),
                ..Default::default()
            },
        );
        config
    }

    fn registry(dir: &std::path::Path) -> Registry {
        Registry::new(
            Arc::new(MockRuntime::new()),
            DescriptorStore::new(dir),
            ApplicationSettings::default(),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_invalid_configuration_without_persisting() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        let mut config = single_goal();
        config.main_goal = String::new();

        let err = registry.new_application("shop", config).unwrap_err();

        assert!(matches!(
            err,
            RegistryError::Invalid(ValidationError::MainGoalNotSet)
        ));
        assert!(registry.application_names().is_empty());
        assert!(!DescriptorStore::new(dir.path()).path_for("shop").exists());

        registry.new_application("shop", single_goal()).unwrap();
        assert_eq!(registry.application_names(), vec!["shop"]);
        registry.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_registrations_of_one_name_admit_one() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(registry(dir.path()));

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.new_application("shop", single_goal()) })
            })
            .collect();
        let mut admitted = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(e) => assert!(matches!(e, RegistryError::AlreadyExists(_)), "{e}"),
            }
        }

        assert_eq!(admitted, 1);
        assert_eq!(registry.application_names(), vec!["shop"]);
        assert!(registry.reserved.lock().unwrap().is_empty());
        registry.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_invalid_application_name() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());

        let err = registry
            .new_application("../escape", single_goal())
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_goal_is_reported() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        registry.new_application("shop", single_goal()).unwrap();

        let err = registry.goal_transition_log("shop", "ghost").unwrap_err();
        assert!(matches!(err, RegistryError::GoalNotFound { .. }));
        assert!(registry.container_id_for_goal("shop", "ghost").is_err());

        registry.shutdown().await;
        assert!(registry.application_names().is_empty());
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            RegistryError::ApplicationNotFound("shop".into()).to_string(),
            "application \"shop\" not found"
        );
        assert_eq!(
            RegistryError::from(ValidationError::MainGoalNotSet).to_string(),
            "main goal is not set"
        );
    }
}
