//! Structural checks on an application descriptor.
//!
//! Runs before any goal exists. Checks happen in a fixed order and only the first violation is
//! reported.

use super::ApplicationConfiguration;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("main goal is not set")]
    MainGoalNotSet,

    #[error("main goal {0:?} is not defined")]
    MainGoalNotDefined(String),

    #[error("goal {0:?} has invalid name")]
    InvalidGoalName(String),

    #[error("goal {0:?} has invalid image name")]
    InvalidImage(String),

    #[error("goal {goal:?} should run after goal {dependency:?} that does not exist")]
    UnknownRunAfter { goal: String, dependency: String },

    #[error("goal {goal:?} links goal {dependency:?} that does not exist")]
    UnknownLink { goal: String, dependency: String },

    #[error("goal {goal:?} has a circular dependency through {ancestor:?}")]
    CircularDependency { goal: String, ancestor: String },
}

pub fn validate(config: &ApplicationConfiguration) -> Result<(), ValidationError> {
    if config.main_goal.is_empty() {
        return Err(ValidationError::MainGoalNotSet);
    }
    if !config.goals.contains_key(&config.main_goal) {
        return Err(ValidationError::MainGoalNotDefined(config.main_goal.clone()));
    }

    for (name, goal) in &config.goals {
        if !is_valid_goal_name(name) {
            return Err(ValidationError::InvalidGoalName(name.clone()));
        }
        if !is_valid_image(&goal.image) {
            return Err(ValidationError::InvalidImage(name.clone()));
        }

        for dependency in &goal.run_after {
            if !config.goals.contains_key(dependency) {
                return Err(ValidationError::UnknownRunAfter {
                    goal: name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        for link in goal.linked_containers() {
            if !config.goals.contains_key(&link.name) {
                return Err(ValidationError::UnknownLink {
                    goal: name.clone(),
                    dependency: link.name,
                });
            }
        }
    }

    for name in config.goals.keys() {
        let mut path = vec![name.as_str()];
        find_circular_dependency(config, name, &mut path)?;
    }

    Ok(())
}

/// Depth-first walk keeping the current path; reaching a goal already on the path is a cycle.
fn find_circular_dependency<'a>(
    config: &'a ApplicationConfiguration,
    goal: &'a str,
    path: &mut Vec<&'a str>,
) -> Result<(), ValidationError> {
    let Some(gc) = config.goals.get(goal) else {
        return Ok(());
    };

    for dependency in gc.depends_on() {
        let Some((dependency, _)) = config.goals.get_key_value(&dependency) else {
            continue;
        };

        if path.contains(&dependency.as_str()) {
            return Err(ValidationError::CircularDependency {
                goal: goal.to_string(),
                ancestor: dependency.clone(),
            });
        }

        path.push(dependency);
        find_circular_dependency(config, dependency, path)?;
        path.pop();
    }

    Ok(())
}

static GOAL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-zA-Z_.\-]+$").expect("goal name pattern"));

/// `repo:tag`; the repository may carry a registry host, port and path.
static IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-zA-Z.\-/:_]+:[0-9a-zA-Z.\-_]+$").expect("image pattern")
});

pub fn is_valid_goal_name(name: &str) -> bool {
    GOAL_NAME.is_match(name)
}

pub fn is_valid_image(image: &str) -> bool {
    IMAGE.is_match(image)
}
