//! Docker CLI container runtime
//!
//! Drives the `docker` binary with generated argument lists. The argument
//! generators and output parsers are pure and unit tested; [`DockerCli`] is the
//! thin I/O layer around them.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{
    ContainerConfig, ContainerInspect, ContainerRuntime, ContainerStats, MountInfo, MountKind,
    RegistryAuth,
};
use crate::capabilities::{CapabilityError, CapabilityResult};
use crate::progress::ProgressSender;

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Generate Docker create arguments
pub fn generate_create_args(config: &ContainerConfig) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        config.name.clone(),
        "--restart".to_string(),
        "unless-stopped".to_string(),
    ];

    if !config.network.is_empty() {
        args.push("--network".to_string());
        args.push(config.network.clone());
    }

    if config.nano_cpus > 0 {
        args.push("--cpus".to_string());
        args.push(format_cpus(config.nano_cpus));
    }

    if config.memory_mb > 0 {
        args.push("--memory".to_string());
        args.push(format!("{}m", config.memory_mb));
    }

    for (host, container) in &config.ports {
        args.push("-p".to_string());
        args.push(format!("{}:{}/tcp", host, container));
        args.push("-p".to_string());
        args.push(format!("{}:{}/udp", host, container));
    }

    for env in &config.env {
        args.push("-e".to_string());
        args.push(env.clone());
    }

    if let Some((host, container)) = &config.volume {
        args.push("-v".to_string());
        args.push(format!("{}:{}", host, container));
    }

    args.push(config.image.clone());
    args.extend(config.commands.iter().cloned());

    args
}

/// Generate Docker login arguments for the registry hosting `repotag`
/// Returns (args, password) where password should be piped to stdin
pub fn generate_login_args(repotag: &str, auth: &RegistryAuth) -> (Vec<String>, String) {
    let mut args = vec![
        "login".to_string(),
        "-u".to_string(),
        auth.username.clone(),
        "--password-stdin".to_string(),
    ];
    if let Some(registry) = registry_host(repotag) {
        args.push(registry.to_string());
    }
    (args, auth.password.clone())
}

/// Registry host of an image reference, `None` for Docker Hub
pub fn registry_host(repotag: &str) -> Option<&str> {
    let (first, rest) = repotag.split_once('/')?;
    if rest.is_empty() {
        return None;
    }
    if first.contains('.') || first.contains(':') || first == "localhost" {
        Some(first)
    } else {
        None
    }
}

/// Generate Docker stop arguments
pub fn generate_stop_args(container_name: &str) -> Vec<String> {
    vec!["stop".to_string(), container_name.to_string()]
}

/// Generate Docker rm arguments
pub fn generate_rm_args(container_name: &str) -> Vec<String> {
    vec!["rm".to_string(), "-f".to_string(), container_name.to_string()]
}

/// Generate Docker update arguments for a new CPU quota
pub fn generate_update_cpus_args(container_name: &str, nano_cpus: u64) -> Vec<String> {
    vec![
        "update".to_string(),
        "--cpus".to_string(),
        format_cpus(nano_cpus),
        container_name.to_string(),
    ]
}

/// Generate the prune commands run after a removal
pub fn generate_prune_args() -> Vec<Vec<String>> {
    ["container", "image", "volume", "network"]
        .iter()
        .map(|kind| vec![kind.to_string(), "prune".to_string(), "-f".to_string()])
        .collect()
}

/// Format nano-CPUs for `--cpus` ("1.5")
pub fn format_cpus(nano_cpus: u64) -> String {
    let cpus = nano_cpus as f64 / 1e9;
    let formatted = format!("{:.3}", cpus);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// Parse a size such as "1.5GiB", "512MB" or "0B" into bytes
pub fn parse_size(input: &str) -> Option<u64> {
    let input = input.trim();
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let value: f64 = number.parse().ok()?;
    let multiplier: f64 = match unit.trim() {
        "" | "B" => 1.0,
        "kB" | "KB" => 1e3,
        "KiB" => 1024.0,
        "MB" => 1e6,
        "MiB" => 1024.0 * 1024.0,
        "GB" => 1e9,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TB" => 1e12,
        "TiB" => 1024.0_f64.powi(4),
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatsLine {
    #[serde(rename = "CPUPerc")]
    cpu_perc: String,
    mem_usage: String,
    #[serde(rename = "PIDs")]
    pids: String,
}

/// Parse one line of `docker stats --no-stream --format '{{json .}}'`
pub fn parse_stats_line(line: &str) -> Option<ContainerStats> {
    let raw: StatsLine = serde_json::from_str(line.trim()).ok()?;
    let cpu_percent = raw.cpu_perc.trim_end_matches('%').trim().parse().ok()?;
    let (usage, limit) = raw.mem_usage.split_once('/')?;
    Some(ContainerStats {
        cpu_percent,
        memory_usage_bytes: parse_size(usage)?,
        memory_limit_bytes: parse_size(limit)?,
        pids: raw.pids.trim().parse().unwrap_or(0),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    state: InspectState,
    host_config: InspectHostConfig,
    #[serde(default)]
    mounts: Vec<InspectMount>,
    #[serde(default)]
    size_root_fs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostConfig {
    #[serde(default)]
    nano_cpus: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectMount {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    destination: String,
}

/// Parse the JSON array printed by `docker inspect --size`
pub fn parse_inspect(output: &str) -> Option<ContainerInspect> {
    let entries: Vec<InspectEntry> = serde_json::from_str(output).ok()?;
    let entry = entries.into_iter().next()?;
    Some(ContainerInspect {
        running: entry.state.running,
        nano_cpus: entry.host_config.nano_cpus,
        mounts: entry
            .mounts
            .into_iter()
            .map(|m| MountInfo {
                kind: match m.kind.as_str() {
                    "bind" => MountKind::Bind,
                    "volume" => MountKind::Volume,
                    _ => MountKind::Other,
                },
                source: m.source,
                destination: m.destination,
            })
            .collect(),
        size_root_fs: entry.size_root_fs.unwrap_or(0),
    })
}

// ============================================================================
// I/O boundary
// ============================================================================

/// Container runtime backed by the `docker` CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    /// Use a different docker-compatible binary (e.g., "podman")
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    async fn docker(&self, args: &[String]) -> CapabilityResult<String> {
        debug!("{} {:?}", self.binary, args);
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                CapabilityError::Runtime(format!("Failed to run {}: {}", self.binary, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CapabilityError::Runtime(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().map(String::as_str).unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn login(&self, repotag: &str, auth: &RegistryAuth) -> CapabilityResult<()> {
        let (args, password) = generate_login_args(repotag, auth);
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CapabilityError::Runtime(format!("Failed to run docker login: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(password.as_bytes())
                .await
                .map_err(|e| CapabilityError::Runtime(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CapabilityError::Runtime(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CapabilityError::Runtime(format!(
                "Registry login failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn pull_image(
        &self,
        repotag: &str,
        auth: Option<&RegistryAuth>,
        progress: &ProgressSender,
    ) -> CapabilityResult<()> {
        if let Some(auth) = auth {
            self.login(repotag, auth).await?;
        }

        info!("Pulling image {}", repotag);
        let mut child = Command::new(&self.binary)
            .args(["pull", repotag])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CapabilityError::Runtime(format!("Failed to run docker pull: {}", e)))?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                progress.status(line);
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CapabilityError::Runtime(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CapabilityError::Runtime(format!(
                "Pulling {} failed: {}",
                repotag,
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn create_container(&self, config: &ContainerConfig) -> CapabilityResult<()> {
        self.docker(&generate_create_args(config)).await.map(|_| ())
    }

    async fn start_container(&self, name: &str) -> CapabilityResult<()> {
        self.docker(&["start".to_string(), name.to_string()])
            .await
            .map(|_| ())
    }

    async fn stop_container(&self, name: &str) -> CapabilityResult<()> {
        self.docker(&generate_stop_args(name)).await.map(|_| ())
    }

    async fn remove_container(&self, name: &str) -> CapabilityResult<()> {
        self.docker(&generate_rm_args(name)).await.map(|_| ())
    }

    async fn inspect_container(&self, name: &str) -> CapabilityResult<Option<ContainerInspect>> {
        let args = vec![
            "inspect".to_string(),
            "--size".to_string(),
            "--type".to_string(),
            "container".to_string(),
            name.to_string(),
        ];
        match self.docker(&args).await {
            Ok(output) => Ok(parse_inspect(&output)),
            Err(CapabilityError::Runtime(msg)) if msg.contains("No such") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn container_stats(&self, name: &str) -> CapabilityResult<ContainerStats> {
        let args = vec![
            "stats".to_string(),
            "--no-stream".to_string(),
            "--format".to_string(),
            "{{json .}}".to_string(),
            name.to_string(),
        ];
        let output = self.docker(&args).await?;
        output
            .lines()
            .find_map(parse_stats_line)
            .ok_or_else(|| CapabilityError::Runtime(format!("No stats for {}", name)))
    }

    async fn update_cpu_quota(&self, name: &str, nano_cpus: u64) -> CapabilityResult<()> {
        self.docker(&generate_update_cpus_args(name, nano_cpus))
            .await
            .map(|_| ())
    }

    async fn remove_image(&self, repotag: &str) -> CapabilityResult<()> {
        self.docker(&["rmi".to_string(), repotag.to_string()])
            .await
            .map(|_| ())
    }

    async fn create_network(&self, name: &str) -> CapabilityResult<()> {
        let args = vec![
            "network".to_string(),
            "create".to_string(),
            name.to_string(),
        ];
        match self.docker(&args).await {
            Ok(_) => Ok(()),
            Err(CapabilityError::Runtime(msg)) if msg.contains("already exists") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn remove_network(&self, name: &str) -> CapabilityResult<()> {
        let args = vec!["network".to_string(), "rm".to_string(), name.to_string()];
        self.docker(&args).await.map(|_| ())
    }

    async fn prune(&self) -> CapabilityResult<()> {
        for args in generate_prune_args() {
            if let Err(e) = self.docker(&args).await {
                warn!("Prune step {:?} failed: {}", args, e);
            }
        }
        Ok(())
    }
}
