mod application;
mod goal;
mod registry;

pub use application::{Application, ApplicationSettings, DEFAULT_TRANSITION_LOG_LENGTH};
pub use goal::{Goal, GoalMessage, OUTPUT_TAIL_LENGTH};
pub use registry::{Registry, RegistryError};
