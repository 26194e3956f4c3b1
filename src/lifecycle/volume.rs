//! Loop-mounted app volumes
//!
//! A hard install backs every component with an ext4 filesystem in a sparse
//! file of exactly the declared size, placed on the real block device with the
//! most free space. The mount is restored at boot by a crontab entry tagged with
//! the app id.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capabilities::{CapabilityError, HostSystem};
use crate::progress::ProgressSender;
use crate::spec::ContainerData;

/// Suffix of the backing file of a volume
pub const VOLUME_FILE_SUFFIX: &str = "FSVOL";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProvisioningError {
    #[error("Insufficient space on node to create a {0} GB volume")]
    NoSuitableDevice(u64),

    #[error("Volume provisioning failed: {0}")]
    Command(#[from] CapabilityError),
}

/// One line of `df --output=source,target,avail,size`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedDevice {
    pub source: String,
    pub target: String,
    pub avail_gb: u64,
    pub size_gb: u64,
}

/// Host paths of an app volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePaths {
    /// Sparse backing file
    pub file: String,
    /// Loop mount target
    pub mountpoint: String,
    /// Directory bound into the container
    pub appdata: String,
}

// ==== SBIO: Pure business logic (no I/O) ====

pub fn generate_df_args() -> Vec<String> {
    vec![
        "--block-size=GB".to_string(),
        "--output=source,target,avail,size".to_string(),
    ]
}

fn parse_gb(field: &str) -> Option<u64> {
    field.trim_end_matches("GB").parse().ok()
}

/// Parse `df` output, skipping the header and malformed lines
pub fn parse_df(output: &str) -> Vec<MountedDevice> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }
            Some(MountedDevice {
                source: fields[0].to_string(),
                target: fields[1].to_string(),
                avail_gb: parse_gb(fields[2])?,
                size_gb: parse_gb(fields[3])?,
            })
        })
        .collect()
}

/// Pick the device with the most free space that can hold `required_gb`.
///
/// Only real block devices qualify; loop devices only when mounted at `/`,
/// and nothing under `/boot`.
pub fn select_device(devices: &[MountedDevice], required_gb: u64) -> Option<&MountedDevice> {
    devices
        .iter()
        .filter(|d| d.source.starts_with("/dev/"))
        .filter(|d| !d.source.starts_with("/dev/loop") || d.target == "/")
        .filter(|d| !d.target.starts_with("/boot"))
        .filter(|d| d.avail_gb >= required_gb)
        .max_by_key(|d| d.avail_gb)
}

/// Paths of the volume of `app_id`; the backing file lives on `device_target`
/// unless that is the root filesystem, in which case it sits in the apps folder
pub fn volume_paths(apps_folder: &str, device_target: &str, app_id: &str) -> VolumePaths {
    let apps_folder = apps_folder.trim_end_matches('/');
    let file_dir = if device_target == "/" {
        apps_folder
    } else {
        device_target.trim_end_matches('/')
    };
    let mountpoint = format!("{}/{}", apps_folder, app_id);
    VolumePaths {
        file: format!("{}/{}{}", file_dir, app_id, VOLUME_FILE_SUFFIX),
        appdata: format!("{}/appdata", mountpoint),
        mountpoint,
    }
}

/// Mountpoint and appdata paths, without a backing file location
pub fn mount_paths(apps_folder: &str, app_id: &str) -> VolumePaths {
    volume_paths(apps_folder, "/", app_id)
}

pub fn crontab_entry(paths: &VolumePaths, app_id: &str) -> String {
    format!(
        "@reboot mount -o loop {} {} # {}",
        paths.file, paths.mountpoint, app_id
    )
}

fn is_entry_for(line: &str, app_id: &str) -> bool {
    line.rsplit_once(" # ")
        .map(|(_, tag)| tag.trim() == app_id)
        .unwrap_or(false)
}

/// Crontab with the entry of `app_id` replaced by `entry`
pub fn add_crontab_entry(crontab: &str, app_id: &str, entry: &str) -> String {
    let mut lines: Vec<&str> = crontab
        .lines()
        .filter(|line| !is_entry_for(line, app_id))
        .collect();
    lines.push(entry);
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Crontab without the entry of `app_id`, or `None` when there is none
pub fn remove_crontab_entry(crontab: &str, app_id: &str) -> Option<String> {
    if !crontab.lines().any(|line| is_entry_for(line, app_id)) {
        return None;
    }
    let lines: Vec<&str> = crontab
        .lines()
        .filter(|line| !is_entry_for(line, app_id))
        .collect();
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    Some(out)
}

/// Backing file recorded in the crontab entry of `app_id`
pub fn backing_file_from_crontab(crontab: &str, app_id: &str) -> Option<String> {
    crontab
        .lines()
        .find(|line| is_entry_for(line, app_id))
        .and_then(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let loop_at = fields.iter().position(|f| *f == "loop")?;
            fields.get(loop_at + 1).map(|f| f.to_string())
        })
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

// ==== I/O ====

/// Creates and releases loop-mounted volumes through the host shell
#[derive(Clone)]
pub struct VolumeProvisioner {
    host: Arc<dyn HostSystem>,
    apps_folder: String,
    headroom_gb: u64,
}

impl VolumeProvisioner {
    pub fn new(host: Arc<dyn HostSystem>, apps_folder: impl Into<String>, headroom_gb: u64) -> Self {
        Self {
            host,
            apps_folder: apps_folder.into(),
            headroom_gb,
        }
    }

    pub fn apps_folder(&self) -> &str {
        &self.apps_folder
    }

    async fn run(&self, program: &str, values: &[&str]) -> Result<(), CapabilityError> {
        self.host.run(program, &args(values)).await.map(|_| ())
    }

    /// Allocate, format and mount the volume of `app_id`.
    /// A failure after allocation removes whatever was created.
    pub async fn provision(
        &self,
        app_id: &str,
        hdd_gb: u64,
        data: &ContainerData,
        progress: &ProgressSender,
    ) -> Result<VolumePaths, ProvisioningError> {
        let df = self.host.run("df", &generate_df_args()).await?;
        let devices = parse_df(&df);
        let required = hdd_gb + self.headroom_gb;
        let device = select_device(&devices, required)
            .ok_or(ProvisioningError::NoSuitableDevice(hdd_gb))?;
        debug!(
            "Volume of {} placed on {} ({} GB free)",
            app_id, device.source, device.avail_gb
        );

        let paths = volume_paths(&self.apps_folder, &device.target, app_id);
        progress.status(format!("Allocating {} GB volume for {}", hdd_gb, app_id));
        self.run("mkdir", &["-p", &self.apps_folder]).await?;
        self.run("truncate", &["-s", &format!("{}G", hdd_gb), &paths.file])
            .await?;

        if let Err(e) = self.format_and_mount(app_id, &paths, data, progress).await {
            warn!("Volume of {} could not be set up, cleaning up: {}", app_id, e);
            self.release_paths(app_id, &paths).await;
            return Err(e.into());
        }

        info!("Volume of {} mounted at {}", app_id, paths.mountpoint);
        Ok(paths)
    }

    async fn format_and_mount(
        &self,
        app_id: &str,
        paths: &VolumePaths,
        data: &ContainerData,
        progress: &ProgressSender,
    ) -> Result<(), CapabilityError> {
        progress.status(format!("Creating filesystem for {}", app_id));
        self.run("mkfs.ext4", &["-F", &paths.file]).await?;

        progress.status(format!("Mounting volume of {}", app_id));
        self.run("mkdir", &["-p", &paths.mountpoint]).await?;
        self.run("mount", &["-o", "loop", &paths.file, &paths.mountpoint])
            .await?;
        self.run("mkdir", &["-p", &paths.appdata]).await?;
        self.run("chmod", &["777", &paths.mountpoint]).await?;
        self.run("chmod", &["777", &paths.appdata]).await?;

        if data.sync {
            let marker = format!("{}/.stfolder", paths.appdata);
            self.run("mkdir", &["-p", &marker]).await?;
        }

        let crontab = self.host.read_crontab().await?;
        let updated = add_crontab_entry(&crontab, app_id, &crontab_entry(paths, app_id));
        self.host.write_crontab(&updated).await?;
        Ok(())
    }

    /// Unmount the volume of `app_id`, drop its crontab entry and delete it
    pub async fn release(&self, app_id: &str) {
        let mut paths = mount_paths(&self.apps_folder, app_id);
        if let Ok(crontab) = self.host.read_crontab().await {
            if let Some(file) = backing_file_from_crontab(&crontab, app_id) {
                paths.file = file;
            }
        }
        self.release_paths(app_id, &paths).await;
    }

    async fn release_paths(&self, app_id: &str, paths: &VolumePaths) {
        if let Err(e) = self.run("umount", &[&paths.mountpoint]).await {
            debug!("Unmounting {} failed: {}", paths.mountpoint, e);
        }

        match self.host.read_crontab().await {
            Ok(crontab) => {
                if let Some(updated) = remove_crontab_entry(&crontab, app_id) {
                    if let Err(e) = self.host.write_crontab(&updated).await {
                        warn!("Crontab entry of {} not removed: {}", app_id, e);
                    }
                }
            }
            Err(e) => warn!("Crontab not readable: {}", e),
        }

        if let Err(e) = self.run("rm", &["-f", &paths.file]).await {
            warn!("Volume file {} not removed: {}", paths.file, e);
        }
        if let Err(e) = self.run("rm", &["-rf", &paths.mountpoint]).await {
            warn!("Mountpoint {} not removed: {}", paths.mountpoint, e);
        }
    }
}
