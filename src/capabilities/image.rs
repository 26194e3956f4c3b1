//! Image policy checks before pulling
//!
//! Rejects malformed or blocked repotags, then optionally inspects the registry
//! manifest through `docker manifest inspect -v` to check the architecture and
//! the compressed size.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::{CapabilityError, CapabilityResult, HostSystem, ImageVerifier};
use crate::config::ImagesConfig;
use crate::runtime::RegistryAuth;
use crate::spec::AppSpecification;

const REPOTAG_PATTERN: &str = r"^[a-zA-Z0-9][a-zA-Z0-9._\-/:]*:[a-zA-Z0-9_][a-zA-Z0-9._\-]{0,127}$";

/// One platform entry of an image manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub architecture: String,
    /// Sum of the compressed layer sizes in bytes
    pub size: u64,
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

pub fn is_valid_repotag(repotag: &str) -> bool {
    Regex::new(REPOTAG_PATTERN)
        .map(|re| re.is_match(repotag))
        .unwrap_or(false)
}

/// Parse `docker manifest inspect -v` output (single object or list)
pub fn parse_manifest_entries(output: &str) -> Vec<ManifestEntry> {
    let Ok(value) = serde_json::from_str::<Value>(output) else {
        return Vec::new();
    };
    let entries = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    entries
        .iter()
        .filter_map(|entry| {
            let architecture = entry
                .pointer("/Descriptor/platform/architecture")?
                .as_str()?
                .to_string();
            let size = entry
                .pointer("/SchemaV2Manifest/layers")
                .and_then(Value::as_array)
                .map(|layers| {
                    layers
                        .iter()
                        .filter_map(|l| l.get("size").and_then(Value::as_u64))
                        .sum()
                })
                .unwrap_or(0);
            Some(ManifestEntry { architecture, size })
        })
        .collect()
}

/// Check manifest entries against the accepted architectures and size ceiling
pub fn check_manifest(
    repotag: &str,
    entries: &[ManifestEntry],
    config: &ImagesConfig,
) -> Result<(), String> {
    let entry = entries
        .iter()
        .find(|e| config.architectures.contains(&e.architecture))
        .ok_or_else(|| {
            format!(
                "Architecture of image {} is not supported by this node",
                repotag
            )
        })?;

    let max_bytes = config.max_size_gb * 1_000_000_000;
    if entry.size > max_bytes {
        return Err(format!(
            "Image {} exceeds the maximum size of {} GB",
            repotag, config.max_size_gb
        ));
    }
    Ok(())
}

/// Split plain `user:secret` registry credentials
pub fn parse_repoauth(repoauth: &str) -> Option<RegistryAuth> {
    let (username, password) = repoauth.split_once(':')?;
    if username.is_empty() || password.is_empty() {
        return None;
    }
    Some(RegistryAuth {
        username: username.to_string(),
        password: password.to_string(),
    })
}

// ============================================================================
// I/O boundary
// ============================================================================

pub struct PolicyImageVerifier {
    config: ImagesConfig,
    host: Arc<dyn HostSystem>,
}

impl PolicyImageVerifier {
    pub fn new(config: ImagesConfig, host: Arc<dyn HostSystem>) -> Self {
        Self { config, host }
    }
}

#[async_trait]
impl ImageVerifier for PolicyImageVerifier {
    async fn verify_image(
        &self,
        repotag: &str,
        auth: Option<&RegistryAuth>,
    ) -> CapabilityResult<()> {
        if !is_valid_repotag(repotag) {
            return Err(CapabilityError::ImageRejected(format!(
                "Repository {} is not in valid format namespace/repository:tag",
                repotag
            )));
        }

        if self
            .config
            .blocked
            .iter()
            .any(|b| repotag.starts_with(b.as_str()))
        {
            return Err(CapabilityError::ImageRejected(format!(
                "Repository {} is blocked on this node",
                repotag
            )));
        }

        // private manifests are only readable after login, which happens at pull time
        if !self.config.inspect_manifest || auth.is_some() {
            debug!("Skipping manifest inspection of {}", repotag);
            return Ok(());
        }

        let args = vec![
            "manifest".to_string(),
            "inspect".to_string(),
            "-v".to_string(),
            repotag.to_string(),
        ];
        let output = self.host.run("docker", &args).await.map_err(|e| {
            CapabilityError::ImageRejected(format!(
                "Unable to inspect image {}: {}",
                repotag, e
            ))
        })?;

        check_manifest(repotag, &parse_manifest_entries(&output), &self.config)
            .map_err(CapabilityError::ImageRejected)
    }

    async fn decrypt_auth(
        &self,
        repoauth: &str,
        spec: &AppSpecification,
    ) -> CapabilityResult<RegistryAuth> {
        if spec.is_enterprise() {
            return Err(CapabilityError::ImageRejected(format!(
                "Encrypted registry credentials of {} cannot be decrypted on this node",
                spec.name
            )));
        }
        parse_repoauth(repoauth).ok_or_else(|| {
            CapabilityError::ImageRejected(format!(
                "Registry credentials of {} are malformed",
                spec.name
            ))
        })
    }
}
