pub mod domain;
pub mod infra;
pub mod services;

// Make test_support available for integration tests
pub mod test_support;

pub use domain::{
    ApplicationConfiguration, ApplicationStatus, ContainerRuntime, GoalConfiguration, GoalState,
    GoalStatus, ValidationError, validate,
};
pub use infra::{DescriptorStore, PodmanAdapter};
pub use services::{Application, ApplicationSettings, Goal, Registry, RegistryError};
