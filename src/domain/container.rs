use super::ApplicationConfiguration;
use std::path::Path;

/// Everything the runtime needs to create one goal's container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub entrypoint: Vec<String>,
    /// `KEY=VALUE` pairs
    pub env: Vec<String>,
    /// `KEY=VALUE` pairs
    pub labels: Vec<String>,
    pub ports: Vec<String>,
    pub expose: Vec<String>,
    /// Bind mounts with relative host paths already resolved
    pub volumes: Vec<String>,
    /// `container:alias` pairs
    pub links: Vec<String>,
    pub extra_hosts: Vec<String>,
    pub network: Option<String>,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub devices: Vec<String>,
    pub security_opt: Vec<String>,
    pub workdir: Option<String>,
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub memory: Option<i64>,
    pub memory_swap: Option<i64>,
    pub cpu_shares: Option<i64>,
    pub cpuset: Option<String>,
    pub privileged: bool,
    pub read_only: bool,
    pub restart: Option<String>,
    pub tty: bool,
    pub interactive: bool,
    pub log_driver: Option<String>,
    /// `KEY=VALUE` log driver options
    pub log_opts: Vec<String>,
}

impl ContainerSpec {
    /// Resolves the runtime options of `goal` inside `application`.
    ///
    /// Link targets are translated to the container names their goals will get.
    /// `cwd` anchors `./relative` volume sources.
    pub fn for_goal(
        application: &str,
        goal: &str,
        config: &ApplicationConfiguration,
        cwd: &Path,
    ) -> Option<Self> {
        let gc = config.goals.get(goal)?;

        let mut links: Vec<String> = gc
            .linked_containers()
            .into_iter()
            .map(|lc| {
                let target = config
                    .goals
                    .get(&lc.name)
                    .map(|dep| dep.container_name_in(application, &lc.name))
                    .unwrap_or_else(|| format!("ap_{application}_{}", lc.name));
                format!("{target}:{}", lc.alias)
            })
            .collect();
        links.extend(
            gc.external_linked_containers()
                .into_iter()
                .map(|lc| format!("{}:{}", lc.name, lc.alias)),
        );

        Some(Self {
            name: gc.container_name_in(application, goal),
            image: gc.image.clone(),
            command: gc.command.clone(),
            entrypoint: gc.entrypoint.clone(),
            env: key_values(&gc.environment),
            labels: key_values(&gc.labels),
            ports: gc.ports.clone(),
            expose: gc.expose.clone(),
            volumes: gc.volumes.iter().map(|v| resolve_volume(v, cwd)).collect(),
            links,
            extra_hosts: gc.extra_hosts.clone(),
            network: gc.net.clone(),
            dns: gc.dns.clone(),
            dns_search: gc.dns_search.clone(),
            cap_add: gc.cap_add.clone(),
            cap_drop: gc.cap_drop.clone(),
            devices: gc.devices.clone(),
            security_opt: gc.security_opt.clone(),
            workdir: gc.working_dir.clone(),
            user: gc.user.clone(),
            hostname: gc.hostname.clone(),
            memory: gc.mem_limit.filter(|m| *m > 0),
            memory_swap: gc.memswap_limit.filter(|m| *m != 0),
            cpu_shares: gc.cpu_shares.filter(|c| *c > 0),
            cpuset: gc.cpuset.clone(),
            privileged: gc.privileged,
            read_only: gc.read_only,
            restart: gc.restart.clone().filter(|r| !r.is_empty()),
            tty: gc.tty,
            interactive: gc.stdin_open,
            log_driver: gc.log_driver.clone().filter(|d| !d.is_empty()),
            log_opts: key_values(&gc.log_config),
        })
    }
}

fn key_values(map: &std::collections::BTreeMap<String, String>) -> Vec<String> {
    map.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

/// `path` mounts at the same location, `path:ro|rw` keeps the mode, anything else passes through.
/// Sources starting with `./` are made absolute against `cwd`.
fn resolve_volume(volume: &str, cwd: &Path) -> String {
    let parts: Vec<&str> = volume.split(':').collect();
    let bind = match parts.as_slice() {
        [path] => format!("{path}:{path}"),
        [path, mode] if *mode == "ro" || *mode == "rw" => format!("{path}:{path}:{mode}"),
        _ => volume.to_string(),
    };

    match bind.strip_prefix("./") {
        Some(rest) => format!("{}/{rest}", cwd.display()),
        None => bind,
    }
}

/// Options for removing a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOptions {
    pub force: bool,
    pub remove_volumes: bool,
}

impl RemoveOptions {
    /// Force removal together with anonymous volumes
    pub fn purge() -> Self {
        Self {
            force: true,
            remove_volumes: true,
        }
    }
}

/// The subset of a container inspection the goals act on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInspection {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    pub exit_code: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEventKind {
    Start,
    Die,
    Other(String),
}

impl RuntimeEventKind {
    /// Maps a runtime status string; podman reports `died` where docker reports `die`.
    pub fn parse(status: &str) -> Self {
        match status {
            "start" => Self::Start,
            "die" | "died" => Self::Die,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One entry of the runtime's container event feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
    pub container_id: String,
    pub kind: RuntimeEventKind,
}

impl RuntimeEvent {
    pub fn new(container_id: impl Into<String>, kind: RuntimeEventKind) -> Self {
        Self {
            container_id: container_id.into(),
            kind,
        }
    }
}
