use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const ERROR_PREFIX: &str = "error: ";

/// Observable lifecycle state of a goal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum GoalState {
    NotRunning,
    FetchingImage,
    WaitingForDependencies,
    Starting,
    Running,
    StoppingContainer,
    Terminated,
    Failed,
    Error(String),
}

impl GoalState {
    pub fn error(reason: impl fmt::Display) -> Self {
        Self::Error(reason.to_string())
    }

    /// States from which `start` may still move the goal forward
    pub fn is_idle(&self) -> bool {
        matches!(
            self,
            Self::NotRunning | Self::FetchingImage | Self::WaitingForDependencies
        )
    }

    /// The container has finished and will not run again on its own
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Terminated | Self::Failed | Self::Error(_))
    }
}

impl fmt::Display for GoalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRunning => write!(f, "not_running"),
            Self::FetchingImage => write!(f, "fetching_image"),
            Self::WaitingForDependencies => write!(f, "waiting_for_dependencies"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::StoppingContainer => write!(f, "stopping_container"),
            Self::Terminated => write!(f, "terminated"),
            Self::Failed => write!(f, "failed"),
            Self::Error(reason) => write!(f, "{ERROR_PREFIX}{reason}"),
        }
    }
}

impl FromStr for GoalState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(reason) = s.strip_prefix(ERROR_PREFIX) {
            return Ok(Self::Error(reason.to_string()));
        }

        match s {
            "not_running" => Ok(Self::NotRunning),
            "fetching_image" => Ok(Self::FetchingImage),
            "waiting_for_dependencies" => Ok(Self::WaitingForDependencies),
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "stopping_container" => Ok(Self::StoppingContainer),
            "terminated" => Ok(Self::Terminated),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown goal state '{other}'")),
        }
    }
}

impl From<GoalState> for String {
    fn from(state: GoalState) -> Self {
        state.to_string()
    }
}

impl TryFrom<String> for GoalState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalStatus {
    pub name: String,
    pub status: GoalState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationStatus {
    pub name: String,
    pub main_goal: String,
    pub goals: BTreeMap<String, GoalStatus>,
}

impl ApplicationStatus {
    pub fn goal(&self, name: &str) -> Option<&GoalStatus> {
        self.goals.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionLogEntry {
    pub time: DateTime<Utc>,
    pub status: GoalState,
}
