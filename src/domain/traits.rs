use super::{AuthConfiguration, ContainerInspection, ContainerSpec, RemoveOptions, RuntimeEvent};
use anyhow::Result;
use std::fmt::Debug;
use tokio::sync::mpsc::UnboundedReceiver;

/// Trait for container runtime operations
///
/// Every method except [`ContainerRuntime::events`] may block; goals call them from
/// `spawn_blocking` tasks. Implementations must tolerate concurrent calls about different
/// containers.
pub trait ContainerRuntime: Send + Sync + Debug {
    /// Check whether an image is present locally
    fn image_exists(&self, reference: &str) -> Result<bool>;

    /// Pull an image, optionally authenticating against its registry
    fn pull_image(&self, reference: &str, auth: Option<&AuthConfiguration>) -> Result<()>;

    /// Create a container from a spec, returning its ID
    fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a container
    fn start_container(&self, id: &str) -> Result<()>;

    /// Stop a container
    fn stop_container(&self, id: &str) -> Result<()>;

    /// Remove a container
    fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<()>;

    /// Inspect a container (state and exit code)
    fn inspect_container(&self, id: &str) -> Result<ContainerInspection>;

    /// Find the ID of a container by its exact name
    fn find_container_by_name(&self, name: &str) -> Result<Option<String>>;

    /// The last `tail` lines a container wrote to stdout and stderr, timestamped
    fn container_logs(&self, id: &str, tail: usize) -> Result<String>;

    /// Follow a container's output line by line until it stops writing.
    ///
    /// Like [`ContainerRuntime::events`], this does not block and must be called from within a
    /// tokio runtime.
    fn follow_logs(&self, id: &str) -> Result<UnboundedReceiver<String>>;

    /// Subscribe to the runtime-wide container event feed.
    ///
    /// Must be called from within a tokio runtime. The stream is not restartable: once it
    /// ends, no further events are delivered.
    fn events(&self) -> Result<UnboundedReceiver<RuntimeEvent>>;
}
