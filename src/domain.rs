mod container;
mod descriptor;
pub mod status;
pub mod traits;
pub mod validation;

pub use container::{
    ContainerInspection, ContainerSpec, RemoveOptions, RuntimeEvent, RuntimeEventKind,
};
pub use descriptor::{
    ApplicationConfiguration, AuthConfiguration, GoalConfiguration, LinkedContainer,
};
pub use status::{ApplicationStatus, GoalState, GoalStatus, TransitionLogEntry};
pub use traits::ContainerRuntime;
pub use validation::{ValidationError, validate};
