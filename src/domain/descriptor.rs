use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Declarative description of one application: a graph of goals and its entry point.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplicationConfiguration {
    #[serde(default)]
    pub goals: BTreeMap<String, GoalConfiguration>,
    #[serde(default)]
    pub main_goal: String,
}

/// Credentials used when pulling a goal's image
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serveraddress: Option<String>,
}

impl AuthConfiguration {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none()
    }
}

/// Container options and dependency edges of a single goal
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoalConfiguration {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_after: Vec<String>,
    /// Sibling goals as `name` or `name:alias`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    /// Containers outside the application as `container` or `container:alias`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_links: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expose: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_search: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_add: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_drop: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_opt: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memswap_limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_shares: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpuset: Option<String>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub stdin_open: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_driver: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub log_config: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_config: Option<AuthConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(default)]
    pub smart_restart: bool,
}

/// A parsed `links` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedContainer {
    pub name: String,
    pub alias: String,
}

impl LinkedContainer {
    /// Parses `name` or `name:alias`; the alias defaults to the name.
    pub fn parse(link: &str) -> Self {
        match link.split_once(':') {
            Some((name, alias)) => Self {
                name: name.to_string(),
                alias: alias.to_string(),
            },
            None => Self {
                name: link.to_string(),
                alias: link.to_string(),
            },
        }
    }
}

impl GoalConfiguration {
    pub fn linked_containers(&self) -> Vec<LinkedContainer> {
        self.links
            .iter()
            .map(|link| LinkedContainer::parse(link))
            .collect()
    }

    pub fn external_linked_containers(&self) -> Vec<LinkedContainer> {
        self.external_links
            .iter()
            .map(|link| LinkedContainer::parse(link))
            .collect()
    }

    /// Every goal this one depends on (run-after and link targets), sorted and deduplicated
    pub fn depends_on(&self) -> Vec<String> {
        let deps: BTreeSet<String> = self
            .linked_containers()
            .into_iter()
            .map(|lc| lc.name)
            .chain(self.run_after.iter().cloned())
            .collect();
        deps.into_iter().collect()
    }

    /// Runtime container name for this goal inside `application`
    pub fn container_name_in(&self, application: &str, goal: &str) -> String {
        match self.container_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("ap_{application}_{goal}"),
        }
    }
}
