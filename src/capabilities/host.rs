//! Host shell access through tokio processes

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{CapabilityError, CapabilityResult, HostSystem};

#[derive(Debug, Clone, Default)]
pub struct TokioHost;

impl TokioHost {
    pub fn new() -> Self {
        Self
    }
}

/// Parse the byte count printed by `du -sb`
pub fn parse_du_bytes(output: &str) -> Option<u64> {
    output.split_whitespace().next()?.parse().ok()
}

#[async_trait]
impl HostSystem for TokioHost {
    async fn run(&self, program: &str, args: &[String]) -> CapabilityResult<String> {
        debug!("exec {} {:?}", program, args);
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| CapabilityError::Host(format!("Failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CapabilityError::Host(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn read_crontab(&self) -> CapabilityResult<String> {
        let output = Command::new("crontab")
            .arg("-l")
            .output()
            .await
            .map_err(|e| CapabilityError::Host(format!("Failed to run crontab: {}", e)))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no crontab") {
            Ok(String::new())
        } else {
            Err(CapabilityError::Host(format!(
                "crontab -l failed: {}",
                stderr.trim()
            )))
        }
    }

    async fn write_crontab(&self, content: &str) -> CapabilityResult<()> {
        let mut child = Command::new("crontab")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CapabilityError::Host(format!("Failed to run crontab: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(content.as_bytes())
                .await
                .map_err(|e| CapabilityError::Host(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CapabilityError::Host(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CapabilityError::Host(format!(
                "crontab update failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn directory_size(&self, path: &str) -> CapabilityResult<u64> {
        let output = self
            .run("du", &["-sb".to_string(), path.to_string()])
            .await?;
        parse_du_bytes(&output)
            .ok_or_else(|| CapabilityError::Host(format!("Unexpected du output for {}", path)))
    }
}
