use crate::domain::{
    AuthConfiguration, ContainerInspection, ContainerRuntime, ContainerSpec, RemoveOptions,
    RuntimeEvent, RuntimeEventKind,
};
use crate::infra::config::DEFAULT_RUNTIME_BINARY;
use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Deserialize;
use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::debug;

/// Drives a docker-compatible CLI (`podman` unless configured otherwise)
#[derive(Debug, Clone)]
pub struct PodmanAdapter {
    binary: String,
    /// Unix time of construction; the event feed replays from here
    since: i64,
}

impl PodmanAdapter {
    pub fn new() -> Self {
        Self::with_binary(DEFAULT_RUNTIME_BINARY)
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            since: Utc::now().timestamp(),
        }
    }

    /// podman has no `--link`; its containers reach each other through network DNS.
    fn accepts_links(&self) -> bool {
        Path::new(&self.binary)
            .file_name()
            .is_none_or(|name| name != DEFAULT_RUNTIME_BINARY)
    }

    fn podman<I, S>(&self, args: I, context: &str) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.podman_output(args, context).map(|_| ())
    }

    fn podman_output<I, S>(&self, args: I, context: &str) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| context.to_string())?;

        ensure_success(&self.binary, &output, context)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for PodmanAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime for PodmanAdapter {
    fn image_exists(&self, reference: &str) -> Result<bool> {
        let status = Command::new(&self.binary)
            .args(["image", "inspect", reference])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("checking image {reference}"))?;
        Ok(status.success())
    }

    fn pull_image(&self, reference: &str, auth: Option<&AuthConfiguration>) -> Result<()> {
        let mut args: Vec<String> = vec!["pull".into()];
        if let Some(creds) = auth.and_then(credentials) {
            args.push("--creds".into());
            args.push(creds);
        }
        args.push(reference.into());

        self.podman(args, &format!("pulling image {reference}"))
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let id = self.podman_output(
            create_args(spec, self.accepts_links()),
            &format!("creating container {}", spec.name),
        )?;

        match id.lines().last() {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => bail!("{} create printed no container ID for {}", self.binary, spec.name),
        }
    }

    fn start_container(&self, id: &str) -> Result<()> {
        self.podman(["start", id], &format!("starting container {id}"))
    }

    fn stop_container(&self, id: &str) -> Result<()> {
        self.podman(["stop", id], &format!("stopping container {id}"))
    }

    fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<()> {
        let mut args = vec!["rm"];
        if options.force {
            args.push("-f");
        }
        if options.remove_volumes {
            args.push("-v");
        }
        args.push(id);

        self.podman(args, &format!("removing container {id}"))
    }

    fn inspect_container(&self, id: &str) -> Result<ContainerInspection> {
        let json = self.podman_output(
            ["container", "inspect", id],
            &format!("inspecting container {id}"),
        )?;
        parse_inspection(&json).with_context(|| format!("parsing inspection of {id}"))
    }

    fn find_container_by_name(&self, name: &str) -> Result<Option<String>> {
        let filter = format!("name=^{name}$");
        let output = self.podman_output(
            ["ps", "-a", "--filter", filter.as_str(), "--format", "{{.ID}}"],
            &format!("looking up container {name}"),
        )?;

        Ok(output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string))
    }

    fn container_logs(&self, id: &str, tail: usize) -> Result<String> {
        let context = format!("reading output of container {id}");
        let output = Command::new(&self.binary)
            .args(["logs", "--timestamps", "--tail", &tail.to_string(), id])
            .stdin(Stdio::null())
            .output()
            .with_context(|| context.clone())?;
        ensure_success(&self.binary, &output, &context)?;

        // the container's stderr comes back on ours
        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }

    fn follow_logs(&self, id: &str) -> Result<UnboundedReceiver<String>> {
        let mut child = tokio::process::Command::new(&self.binary)
            .args(["logs", "--follow", "--timestamps", id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("following output of container {id}"))?;

        let stdout = child.stdout.take().context("log stream has no stdout")?;
        let stderr = child.stderr.take().context("log stream has no stderr")?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let _child = child;
            let mut stdout = BufReader::new(stdout).lines();
            let mut stderr = BufReader::new(stderr).lines();
            let (mut stdout_open, mut stderr_open) = (true, true);

            while stdout_open || stderr_open {
                let line = tokio::select! {
                    line = stdout.next_line(), if stdout_open => match line {
                        Ok(Some(line)) => Some(line),
                        _ => {
                            stdout_open = false;
                            None
                        }
                    },
                    line = stderr.next_line(), if stderr_open => match line {
                        Ok(Some(line)) => Some(line),
                        _ => {
                            stderr_open = false;
                            None
                        }
                    },
                };

                if let Some(line) = line {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }
            debug!("log stream closed");
        });

        Ok(rx)
    }

    fn events(&self) -> Result<UnboundedReceiver<RuntimeEvent>> {
        let mut child = tokio::process::Command::new(&self.binary)
            .args(events_args(self.since))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("starting {} events", self.binary))?;

        let stdout = child
            .stdout
            .take()
            .context("event stream has no stdout")?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let _child = child;
            let mut lines = BufReader::new(stdout).lines();

            while let Ok(Some(line)) = lines.next_line().await {
                let Some(event) = parse_event(&line) else {
                    debug!("skipping runtime event line: {line}");
                    continue;
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
            debug!("runtime event stream closed");
        });

        Ok(rx)
    }
}

/// `--since` replays what happened between construction and subscription.
fn events_args(since: i64) -> Vec<String> {
    vec![
        "events".into(),
        "--since".into(),
        since.to_string(),
        "--filter".into(),
        "type=container".into(),
        "--format".into(),
        "{{json .}}".into(),
    ]
}

fn ensure_success(binary: &str, output: &Output, context: &str) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        bail!("{binary} returned {} ({context})", output.status)
    }
    bail!("{binary} returned {} ({context}): {stderr}", output.status)
}

fn credentials(auth: &AuthConfiguration) -> Option<String> {
    let username = auth.username.as_deref().filter(|u| !u.is_empty())?;
    match auth.password.as_deref() {
        Some(password) => Some(format!("{username}:{password}")),
        None => Some(username.to_string()),
    }
}

fn push_all(args: &mut Vec<String>, flag: &str, values: &[String]) {
    for value in values {
        args.push(flag.into());
        args.push(value.clone());
    }
}

fn push_opt<T: ToString>(args: &mut Vec<String>, flag: &str, value: &Option<T>) {
    if let Some(value) = value {
        args.push(flag.into());
        args.push(value.to_string());
    }
}

fn create_args(spec: &ContainerSpec, links: bool) -> Vec<String> {
    let mut args: Vec<String> = vec!["create".into(), "--name".into(), spec.name.clone()];

    push_all(&mut args, "-e", &spec.env);
    push_all(&mut args, "--label", &spec.labels);
    push_all(&mut args, "-p", &spec.ports);
    push_all(&mut args, "--expose", &spec.expose);
    push_all(&mut args, "-v", &spec.volumes);
    if links {
        push_all(&mut args, "--link", &spec.links);
    }
    push_all(&mut args, "--add-host", &spec.extra_hosts);
    push_opt(&mut args, "--network", &spec.network);
    push_all(&mut args, "--dns", &spec.dns);
    push_all(&mut args, "--dns-search", &spec.dns_search);
    push_all(&mut args, "--cap-add", &spec.cap_add);
    push_all(&mut args, "--cap-drop", &spec.cap_drop);
    push_all(&mut args, "--device", &spec.devices);
    push_all(&mut args, "--security-opt", &spec.security_opt);
    push_opt(&mut args, "-w", &spec.workdir);
    push_opt(&mut args, "-u", &spec.user);
    push_opt(&mut args, "--hostname", &spec.hostname);
    push_opt(&mut args, "--memory", &spec.memory);
    push_opt(&mut args, "--memory-swap", &spec.memory_swap);
    push_opt(&mut args, "--cpu-shares", &spec.cpu_shares);
    push_opt(&mut args, "--cpuset-cpus", &spec.cpuset);
    push_opt(&mut args, "--restart", &spec.restart);
    push_opt(&mut args, "--log-driver", &spec.log_driver);
    push_all(&mut args, "--log-opt", &spec.log_opts);

    if spec.privileged {
        args.push("--privileged".into());
    }
    if spec.read_only {
        args.push("--read-only".into());
    }
    if spec.tty {
        args.push("-t".into());
    }
    if spec.interactive {
        args.push("-i".into());
    }

    match spec.entrypoint.as_slice() {
        [] => {}
        [single] => {
            args.push("--entrypoint".into());
            args.push(single.clone());
        }
        many => {
            args.push("--entrypoint".into());
            args.push(serde_json::to_string(many).unwrap_or_else(|_| many.join(" ")));
        }
    }

    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

#[derive(Deserialize, Debug, Default)]
struct InspectState {
    #[serde(rename = "Running", default)]
    running: bool,
    #[serde(rename = "ExitCode", default)]
    exit_code: i64,
}

#[derive(Deserialize, Debug, Default)]
struct InspectConfig {
    #[serde(rename = "Image", default)]
    image: String,
}

#[derive(Deserialize, Debug)]
struct InspectEntry {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "ImageName", default)]
    image_name: Option<String>,
    #[serde(rename = "Config", default)]
    config: InspectConfig,
    #[serde(rename = "State", default)]
    state: InspectState,
}

fn parse_inspection(json: &str) -> Result<ContainerInspection> {
    let entries: Vec<InspectEntry> = serde_json::from_str(json)?;
    let Some(entry) = entries.into_iter().next() else {
        bail!("inspection returned no containers");
    };

    Ok(ContainerInspection {
        id: entry.id,
        name: entry.name.trim_start_matches('/').to_string(),
        image: entry.image_name.unwrap_or(entry.config.image),
        running: entry.state.running,
        exit_code: entry.state.exit_code,
    })
}

/// Podman prints `ID`/`Status`, docker prints `id`/`status` plus `Action`.
#[derive(Deserialize, Debug)]
struct EventLine {
    #[serde(alias = "ID", alias = "id")]
    id: String,
    #[serde(alias = "Status", default)]
    status: Option<String>,
    #[serde(rename = "Action", default)]
    action: Option<String>,
}

fn parse_event(line: &str) -> Option<RuntimeEvent> {
    let event: EventLine = serde_json::from_str(line).ok()?;
    if event.id.is_empty() {
        return None;
    }

    let status = event.status.or(event.action)?;
    Some(RuntimeEvent::new(event.id, RuntimeEventKind::parse(&status)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_create_arguments() {
        let spec = ContainerSpec {
            name: "ap_shop_web".into(),
            image: "nginx:1.25".into(),
            command: vec!["nginx".into(), "-g".into(), "daemon off;".into()],
            env: vec!["MODE=prod".into()],
            ports: vec!["8080:80".into()],
            links: vec!["ap_shop_db:db".into()],
            memory: Some(268_435_456),
            privileged: true,
            ..Default::default()
        };

        let args = create_args(&spec, true);

        assert_eq!(&args[..3], ["create", "--name", "ap_shop_web"]);
        let image = args.iter().position(|a| a == "nginx:1.25").unwrap();
        assert_eq!(&args[image + 1..], ["nginx", "-g", "daemon off;"]);
        assert!(args.windows(2).any(|w| w == ["-e", "MODE=prod"]));
        assert!(args.windows(2).any(|w| w == ["--link", "ap_shop_db:db"]));
        assert!(args.windows(2).any(|w| w == ["--memory", "268435456"]));
        assert!(args[..image].contains(&"--privileged".to_string()));
    }

    #[test]
    fn podman_gets_no_link_flags() {
        let spec = ContainerSpec {
            name: "c".into(),
            image: "alpine:3.4".into(),
            links: vec!["ap_shop_db:db".into()],
            ..Default::default()
        };

        assert!(!create_args(&spec, false).contains(&"--link".to_string()));
        assert!(!PodmanAdapter::with_binary("/usr/bin/podman").accepts_links());
        assert!(PodmanAdapter::with_binary("docker").accepts_links());
    }

    #[test]
    fn multi_part_entrypoint_is_json() {
        let spec = ContainerSpec {
            name: "c".into(),
            image: "alpine:3.4".into(),
            entrypoint: vec!["sh".into(), "-c".into()],
            ..Default::default()
        };

        let args = create_args(&spec, true);
        assert!(args.windows(2).any(|w| w == ["--entrypoint", r#"["sh","-c"]"#]));
    }

    #[test]
    fn builds_credentials() {
        let auth = AuthConfiguration {
            username: Some("bob".into()),
            password: Some("secret".into()),
            ..Default::default()
        };
        assert_eq!(credentials(&auth).as_deref(), Some("bob:secret"));
        assert_eq!(credentials(&AuthConfiguration::default()), None);
    }

    #[test]
    fn event_feed_replays_from_construction() {
        let adapter = PodmanAdapter::with_binary("podman");
        let since = adapter.since.to_string();
        let args = events_args(adapter.since);

        assert_eq!(args[0], "events");
        assert!(args.windows(2).any(|w| w == ["--since", since.as_str()]));
        assert!(adapter.since <= Utc::now().timestamp());
        assert!(args.windows(2).any(|w| w == ["--filter", "type=container"]));
    }

    #[test]
    fn parses_podman_event() {
        let line = r#"{"ID":"4f2a9c","Image":"docker.io/library/alpine:3.4","Name":"ap_shop_g1","Status":"died","Time":"2024-05-01T10:00:00Z","Type":"container"}"#;
        assert_eq!(
            parse_event(line),
            Some(RuntimeEvent::new("4f2a9c", RuntimeEventKind::Die))
        );
    }

    #[test]
    fn parses_docker_event() {
        let line = r#"{"status":"start","id":"9e8d","from":"alpine:3.4","Type":"container","Action":"start","Actor":{"ID":"9e8d"},"time":1714557600}"#;
        assert_eq!(
            parse_event(line),
            Some(RuntimeEvent::new("9e8d", RuntimeEventKind::Start))
        );
    }

    #[test]
    fn skips_garbage_event_lines() {
        assert_eq!(parse_event("not json"), None);
        assert_eq!(parse_event(r#"{"ID":"","Status":"start"}"#), None);
    }

    #[test]
    fn parses_container_inspection() {
        let json = r#"[{"Id":"abc123","Name":"/ap_shop_g1","Config":{"Image":"alpine:3.4"},"State":{"Running":false,"ExitCode":3}}]"#;

        let inspection = parse_inspection(json).unwrap();

        assert_eq!(inspection.id, "abc123");
        assert_eq!(inspection.name, "ap_shop_g1");
        assert_eq!(inspection.image, "alpine:3.4");
        assert!(!inspection.running);
        assert_eq!(inspection.exit_code, 3);
    }

    #[test]
    fn empty_inspection_is_an_error() {
        assert!(parse_inspection("[]").is_err());
    }
}
