//! Thin contract over the external compose tool.
//!
//! The daemon never talks to the container API directly; everything goes
//! through `docker compose` (or the standalone `docker-compose` binary when
//! the subcommand is unavailable) in the working directory of a bundle.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// One row of `compose ps --format json`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
pub struct ContainerStatus {
    /// Container name.
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Compose service name.
    #[serde(rename = "Service", default)]
    pub service: String,
    /// Container state; compose may append detail after `running`.
    #[serde(rename = "State", default)]
    pub state: String,
    /// Health string; empty when no healthcheck is declared.
    #[serde(rename = "Health", default)]
    pub health: String,
}

impl ContainerStatus {
    /// Running, and healthy whenever a healthcheck is declared.
    pub fn is_ready(&self) -> bool {
        let state = self.state.to_lowercase();
        if !state.starts_with("running") {
            return false;
        }
        let health = self.health.to_lowercase();
        health.is_empty() || health == "healthy"
    }
}

/// Compose subprocess failures.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    /// The subprocess exited non-zero; `message` carries its combined output.
    #[error("{command}: {message}")]
    CommandFailed {
        /// The command line that failed.
        command: String,
        /// Trimmed combined stdout/stderr.
        message: String,
    },
    /// The subprocess could not be started at all.
    #[error("spawn {command}: {source}")]
    Spawn {
        /// The command line that failed to spawn.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// `compose ps` produced output we could not parse.
    #[error("parse compose ps json: {0}")]
    Parse(#[source] serde_json::Error),
    /// Services never became running and healthy within the deadline.
    #[error("timeout waiting for services to become healthy")]
    HealthTimeout,
}

impl ComposeError {
    /// Pull errors for component names not present in the bundle are benign.
    pub fn is_no_such_service(&self) -> bool {
        matches!(
            self,
            ComposeError::CommandFailed { message, .. } if message.contains("No such service")
        )
    }
}

/// The operations the deploy engine and API layer need from compose.
#[async_trait]
pub trait ComposeBackend: Send + Sync {
    /// `compose pull [services…]` in `dir`; returns combined output.
    async fn pull(&self, dir: &Path, services: &[String]) -> Result<String, ComposeError>;
    /// `compose up -d [services…]` in `dir`; returns combined output.
    async fn up(&self, dir: &Path, services: &[String]) -> Result<String, ComposeError>;
    /// `compose ps --format json` in `dir`, tolerating array and lines forms.
    async fn ps_status(&self, dir: &Path) -> Result<Vec<ContainerStatus>, ComposeError>;
    /// Captured `compose logs` for one service.
    async fn logs(&self, dir: &Path, service: &str, tail: usize) -> Result<String, ComposeError>;
    /// Follow logs into `sink` until the process ends or the receiver drops.
    async fn logs_follow(
        &self,
        dir: &Path,
        service: &str,
        tail: usize,
        sink: mpsc::Sender<Bytes>,
    ) -> Result<(), ComposeError>;
    /// Cheap reachability probe of the container daemon.
    async fn verify_daemon(&self) -> Result<(), ComposeError>;
    /// Standalone image pull, used for port auto-detection.
    async fn pull_image(&self, image: &str) -> Result<(), ComposeError>;
    /// First exposed port declared by a locally available image.
    async fn inspect_image_port(&self, image: &str) -> Result<Option<u16>, ComposeError>;
    /// Declared volume mount points of a locally available image.
    async fn inspect_image_volumes(&self, image: &str) -> Result<Vec<String>, ComposeError>;
}

/// Poll `ps_status` until every target service is running and healthy.
///
/// An empty `services` filter checks all services. Polls every
/// `poll_interval` until `timeout` elapses.
pub async fn wait_healthy(
    backend: &dyn ComposeBackend,
    dir: &Path,
    services: &[String],
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), ComposeError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let targets: Vec<String> = services.iter().map(|s| s.to_lowercase()).collect();
    let check_all = targets.is_empty();

    loop {
        if tokio::time::Instant::now() > deadline {
            return Err(ComposeError::HealthTimeout);
        }

        if let Ok(containers) = backend.ps_status(dir).await {
            if !containers.is_empty() {
                let all_ready = containers
                    .iter()
                    .filter(|c| check_all || targets.contains(&c.service.to_lowercase()))
                    .all(ContainerStatus::is_ready);
                if all_ready {
                    return Ok(());
                }
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Compose driver shelling out to the container CLI.
pub struct CliCompose {
    use_legacy_compose: bool,
}

impl CliCompose {
    /// Probe which compose front-end is available. The choice is made once
    /// and reused for every subsequent call.
    pub async fn detect() -> Self {
        let subcommand_works = Command::new("docker")
            .args(["compose", "version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false);

        let use_legacy_compose = if subcommand_works {
            false
        } else {
            let legacy_works = Command::new("docker-compose")
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|status| status.success())
                .unwrap_or(false);
            if legacy_works {
                info!("compose: using legacy docker-compose binary");
            }
            legacy_works
        };

        Self { use_legacy_compose }
    }

    /// The compose command in use, for diagnostics.
    pub fn compose_command(&self) -> &'static str {
        if self.use_legacy_compose {
            "docker-compose"
        } else {
            "docker compose"
        }
    }

    fn command_for(&self, args: &[String]) -> (Command, String) {
        if self.use_legacy_compose && args.first().map(String::as_str) == Some("compose") {
            let rest = &args[1..];
            let mut cmd = Command::new("docker-compose");
            cmd.args(rest);
            (cmd, format!("docker-compose {}", rest.join(" ")))
        } else {
            let mut cmd = Command::new("docker");
            cmd.args(args);
            (cmd, format!("docker {}", args.join(" ")))
        }
    }

    async fn run(&self, dir: Option<&Path>, args: &[String]) -> Result<String, ComposeError> {
        let (mut cmd, desc) = self.command_for(args);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        debug!(command = %desc, "compose: run");

        let output = cmd.output().await.map_err(|source| ComposeError::Spawn {
            command: desc.clone(),
            source,
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ComposeError::CommandFailed {
                command: desc,
                message: combined.trim().to_string(),
            });
        }
        Ok(combined)
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Parse `compose ps --format json`, which is either one JSON array or one
/// JSON object per line depending on the compose version.
pub fn parse_ps_output(raw: &str) -> Result<Vec<ContainerStatus>, ComposeError> {
    if let Ok(containers) = serde_json::from_str::<Vec<ContainerStatus>>(raw) {
        return Ok(containers);
    }
    let mut containers = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let status: ContainerStatus =
            serde_json::from_str(line).map_err(ComposeError::Parse)?;
        containers.push(status);
    }
    Ok(containers)
}

#[async_trait]
impl ComposeBackend for CliCompose {
    async fn pull(&self, dir: &Path, services: &[String]) -> Result<String, ComposeError> {
        let mut argv = args(&["compose", "pull"]);
        argv.extend(services.iter().cloned());
        self.run(Some(dir), &argv).await
    }

    async fn up(&self, dir: &Path, services: &[String]) -> Result<String, ComposeError> {
        let mut argv = args(&["compose", "up", "-d"]);
        argv.extend(services.iter().cloned());
        self.run(Some(dir), &argv).await
    }

    async fn ps_status(&self, dir: &Path) -> Result<Vec<ContainerStatus>, ComposeError> {
        let raw = self
            .run(Some(dir), &args(&["compose", "ps", "--format", "json"]))
            .await?;
        parse_ps_output(&raw)
    }

    async fn logs(&self, dir: &Path, service: &str, tail: usize) -> Result<String, ComposeError> {
        let mut argv = args(&["compose", "logs"]);
        if tail > 0 {
            argv.push("--tail".to_string());
            argv.push(tail.to_string());
        }
        argv.push(service.to_string());
        self.run(Some(dir), &argv).await
    }

    async fn logs_follow(
        &self,
        dir: &Path,
        service: &str,
        tail: usize,
        sink: mpsc::Sender<Bytes>,
    ) -> Result<(), ComposeError> {
        let mut argv = args(&["compose", "logs", "-f", "--no-log-prefix"]);
        if tail > 0 {
            argv.push("--tail".to_string());
            argv.push(tail.to_string());
        }
        argv.push(service.to_string());

        let (mut cmd, desc) = self.command_for(&argv);
        cmd.current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ComposeError::Spawn {
            command: desc,
            source,
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Both streams feed the same sink; a dropped receiver means the
        // client went away, so the child is killed on drop.
        let out_task = forward_stream(stdout, sink.clone());
        let err_task = forward_stream(stderr, sink);
        tokio::join!(out_task, err_task);

        let _ = child.kill().await;
        let _ = child.wait().await;
        Ok(())
    }

    async fn verify_daemon(&self) -> Result<(), ComposeError> {
        self.run(None, &args(&["info"])).await.map(|_| ())
    }

    async fn pull_image(&self, image: &str) -> Result<(), ComposeError> {
        self.run(None, &args(&["pull", image])).await.map(|_| ())
    }

    async fn inspect_image_port(&self, image: &str) -> Result<Option<u16>, ComposeError> {
        let raw = self
            .run(
                None,
                &args(&[
                    "image",
                    "inspect",
                    image,
                    "--format",
                    "{{json .Config.ExposedPorts}}",
                ]),
            )
            .await?;
        Ok(parse_exposed_ports(&raw))
    }

    async fn inspect_image_volumes(&self, image: &str) -> Result<Vec<String>, ComposeError> {
        let raw = self
            .run(
                None,
                &args(&[
                    "image",
                    "inspect",
                    image,
                    "--format",
                    "{{json .Config.Volumes}}",
                ]),
            )
            .await?;
        Ok(parse_image_volumes(&raw))
    }
}

async fn forward_stream<R: AsyncRead + Unpin>(reader: Option<R>, sink: mpsc::Sender<Bytes>) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if sink.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// First exposed port from `{"80/tcp":{}}`-style inspect output, smallest
/// port first so the answer is stable.
pub fn parse_exposed_ports(raw: &str) -> Option<u16> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" || trimmed == "{}" {
        return None;
    }
    let ports: serde_json::Map<String, serde_json::Value> = serde_json::from_str(trimmed).ok()?;
    let mut numbers: Vec<u16> = ports
        .keys()
        .filter_map(|spec| spec.split('/').next())
        .filter_map(|p| p.parse().ok())
        .filter(|p| *p > 0)
        .collect();
    numbers.sort_unstable();
    numbers.first().copied()
}

/// Declared mount points from `{"/data":{}}`-style inspect output, sorted.
pub fn parse_image_volumes(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" || trimmed == "{}" {
        return Vec::new();
    }
    let volumes: serde_json::Map<String, serde_json::Value> =
        match serde_json::from_str(trimmed) {
            Ok(map) => map,
            Err(_) => return Vec::new(),
        };
    let mut paths: Vec<String> = volumes.keys().cloned().collect();
    paths.sort();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ps_output_parses_json_array_form() {
        let raw = r#"[{"Name":"proj-web-1","Service":"web","State":"running","Health":"healthy"}]"#;
        let containers = parse_ps_output(raw).unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].service, "web");
        assert!(containers[0].is_ready());
    }

    #[test]
    fn ps_output_parses_json_lines_form() {
        let raw = "\
{\"Name\":\"proj-web-1\",\"Service\":\"web\",\"State\":\"running\",\"Health\":\"\"}\n\
{\"Name\":\"proj-db-1\",\"Service\":\"db\",\"State\":\"restarting\",\"Health\":\"unhealthy\"}\n";
        let containers = parse_ps_output(raw).unwrap();
        assert_eq!(containers.len(), 2);
        assert!(containers[0].is_ready());
        assert!(!containers[1].is_ready());
    }

    #[test]
    fn ps_output_rejects_garbage_lines() {
        assert!(parse_ps_output("not json at all").is_err());
        assert!(parse_ps_output("").unwrap().is_empty());
    }

    #[test]
    fn readiness_requires_running_and_healthy() {
        let mk = |state: &str, health: &str| ContainerStatus {
            name: "c".into(),
            service: "s".into(),
            state: state.into(),
            health: health.into(),
        };
        assert!(mk("running", "").is_ready());
        assert!(mk("Running (Paused)", "healthy").is_ready());
        assert!(!mk("running", "starting").is_ready());
        assert!(!mk("exited", "").is_ready());
        assert!(!mk("restarting", "unhealthy").is_ready());
    }

    #[test]
    fn exposed_ports_pick_smallest_declared() {
        assert_eq!(parse_exposed_ports(r#"{"8080/tcp":{},"80/tcp":{}}"#), Some(80));
        assert_eq!(parse_exposed_ports(r#"{"443/tcp":{}}"#), Some(443));
        assert_eq!(parse_exposed_ports("null"), None);
        assert_eq!(parse_exposed_ports("{}"), None);
        assert_eq!(parse_exposed_ports(""), None);
    }

    #[test]
    fn image_volumes_sort_mount_points() {
        assert_eq!(
            parse_image_volumes(r#"{"/var/lib/b":{},"/data/a":{}}"#),
            vec!["/data/a".to_string(), "/var/lib/b".to_string()]
        );
        assert!(parse_image_volumes("null").is_empty());
    }

    #[test]
    fn no_such_service_detection() {
        let err = ComposeError::CommandFailed {
            command: "docker compose pull app".into(),
            message: "Error response: No such service: app".into(),
        };
        assert!(err.is_no_such_service());
        let other = ComposeError::CommandFailed {
            command: "docker compose pull app".into(),
            message: "network unreachable".into(),
        };
        assert!(!other.is_no_such_service());
    }
}
