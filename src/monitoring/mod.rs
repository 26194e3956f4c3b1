//! Per-container monitoring and CPU quota control
//!
//! Each monitored container gets its own sampler task writing into a
//! [`MonitoringRecord`]. The throttle controller reads the hour window of every
//! record and adjusts CPU quotas through the container runtime.

pub mod throttle;
pub mod window;

pub use window::TimeWindow;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::capabilities::{CapabilityResult, HostSystem};
use crate::config::MonitoringConfig;
use crate::runtime::{ContainerInspect, ContainerRuntime, MountKind};
use crate::scheduler::{spawn_scheduled, Schedule, ScheduledHandle};

/// Every Nth sample is also kept in the week window
const WEEK_SAMPLE_EVERY: u64 = 3;

/// One stats sample of a container
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub pids: u64,
    /// Bind mounts, volumes and the root filesystem together
    pub disk_usage_bytes: u64,
    /// CPU quota at sample time; week samples only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nano_cpus: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MonitoringRecord {
    /// Declared CPU the quota is measured against
    pub declared_cpu: f64,
    pub hour: TimeWindow<StatsSample>,
    pub week: TimeWindow<StatsSample>,
    ticks: u64,
}

impl MonitoringRecord {
    pub fn new(declared_cpu: f64) -> Self {
        Self {
            declared_cpu,
            hour: TimeWindow::new(chrono::Duration::minutes(60)),
            week: TimeWindow::new(chrono::Duration::days(7)),
            ticks: 0,
        }
    }

    /// Append a sample taken at `now`; every third one also lands in the week window
    pub fn record(&mut self, now: DateTime<Utc>, sample: StatsSample) {
        self.ticks += 1;
        if self.ticks % WEEK_SAMPLE_EVERY == 0 {
            self.week.push(now, sample.clone());
        }
        self.hour.push(
            now,
            StatsSample {
                nano_cpus: None,
                ..sample
            },
        );
    }
}

/// Serializable copy of a record
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSnapshot {
    pub app_id: String,
    pub declared_cpu: f64,
    pub last_hour: Vec<StatsSample>,
    pub last_week: Vec<StatsSample>,
}

struct Inner {
    config: MonitoringConfig,
    runtime: Arc<dyn ContainerRuntime>,
    host: Arc<dyn HostSystem>,
    records: DashMap<String, MonitoringRecord>,
}

impl Inner {
    async fn sample(&self, app_id: &str) -> Schedule {
        let interval = self.config.sample_interval();

        let inspect = match self.runtime.inspect_container(app_id).await {
            Ok(Some(inspect)) => inspect,
            Ok(None) => {
                warn!("Container {} no longer exists, monitoring stopped", app_id);
                self.records.remove(app_id);
                return Schedule::Stop;
            }
            Err(e) => {
                warn!("Failed to inspect {}: {}", app_id, e);
                return Schedule::After(interval);
            }
        };

        let stats = match self.runtime.container_stats(app_id).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Failed to read stats of {}: {}", app_id, e);
                return Schedule::After(interval);
            }
        };
        let disk_usage_bytes = self.disk_usage(app_id, &inspect).await;

        let now = Utc::now();
        let sample = StatsSample {
            timestamp: now,
            cpu_percent: stats.cpu_percent,
            memory_usage_bytes: stats.memory_usage_bytes,
            memory_limit_bytes: stats.memory_limit_bytes,
            pids: stats.pids,
            disk_usage_bytes,
            nano_cpus: Some(inspect.nano_cpus),
        };

        match self.records.get_mut(app_id) {
            Some(mut record) => {
                record.record(now, sample);
                Schedule::After(interval)
            }
            None => Schedule::Stop,
        }
    }

    async fn disk_usage(&self, app_id: &str, inspect: &ContainerInspect) -> u64 {
        let mut total = inspect.size_root_fs;
        for mount in &inspect.mounts {
            if !matches!(mount.kind, MountKind::Bind | MountKind::Volume) {
                continue;
            }
            match self.host.directory_size(&mount.source).await {
                Ok(size) => total += size,
                Err(e) => debug!("Size of {} mount {} unknown: {}", app_id, mount.source, e),
            }
        }
        total
    }

    async fn throttle(&self, app_id: &str) -> CapabilityResult<()> {
        let min_samples = self.config.throttle_min_samples;
        let (samples, declared_cpu) = match self.records.get(app_id) {
            Some(record) => (
                record.hour.iter().map(|s| s.cpu_percent).collect::<Vec<_>>(),
                record.declared_cpu,
            ),
            None => return Ok(()),
        };
        if samples.len() < min_samples {
            debug!(
                "{} has {} samples, throttle evaluation skipped",
                app_id,
                samples.len()
            );
            return Ok(());
        }

        let Some(inspect) = self.runtime.inspect_container(app_id).await? else {
            return Ok(());
        };
        let fraction = throttle::quota_fraction(inspect.nano_cpus, declared_cpu);
        let next = throttle::next_quota(&samples, declared_cpu, fraction, min_samples);

        if let Some(mut record) = self.records.get_mut(app_id) {
            record.hour.clear();
        }

        if let Some(next) = next {
            info!(
                "CPU quota of {} changed from {:.0}% to {:.0}%",
                app_id,
                fraction * 100.0,
                next * 100.0
            );
            self.runtime
                .update_cpu_quota(app_id, throttle::nano_cpus_for(declared_cpu, next))
                .await?;
        }
        Ok(())
    }
}

/// Owns the monitoring records and their sampler tasks
pub struct MonitoringEngine {
    inner: Arc<Inner>,
    samplers: DashMap<String, ScheduledHandle>,
}

impl MonitoringEngine {
    pub fn new(
        config: MonitoringConfig,
        runtime: Arc<dyn ContainerRuntime>,
        host: Arc<dyn HostSystem>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                runtime,
                host,
                records: DashMap::new(),
            }),
            samplers: DashMap::new(),
        }
    }

    /// Start sampling `app_id`, replacing any running sampler.
    /// An existing record keeps its collected samples.
    pub fn start_monitoring(&self, app_id: &str, declared_cpu: f64) {
        self.inner
            .records
            .entry(app_id.to_string())
            .and_modify(|r| r.declared_cpu = declared_cpu)
            .or_insert_with(|| MonitoringRecord::new(declared_cpu));

        let inner = self.inner.clone();
        let id = app_id.to_string();
        let handle = spawn_scheduled(
            format!("monitor {}", app_id),
            self.inner.config.sample_interval(),
            move || {
                let inner = inner.clone();
                let id = id.clone();
                async move { inner.sample(&id).await }
            },
        );

        if let Some(previous) = self.samplers.insert(app_id.to_string(), handle) {
            previous.stop();
        }
        info!("Monitoring of {} started", app_id);
    }

    /// Stop sampling `app_id`; the record is dropped only when `delete_data`
    pub fn stop_monitoring(&self, app_id: &str, delete_data: bool) {
        if let Some((_, handle)) = self.samplers.remove(app_id) {
            handle.stop();
        }
        if delete_data {
            self.inner.records.remove(app_id);
        }
        info!("Monitoring of {} stopped", app_id);
    }

    pub fn stop_all(&self) {
        let ids: Vec<String> = self.samplers.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop_monitoring(&id, false);
        }
    }

    /// Take one sample right away
    pub async fn sample_now(&self, app_id: &str) -> Schedule {
        self.inner.sample(app_id).await
    }

    /// Containers with a live sampler
    pub fn monitored(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .samplers
            .iter()
            .filter(|e| !e.value().is_finished())
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn has_record(&self, app_id: &str) -> bool {
        self.inner.records.contains_key(app_id)
    }

    pub fn snapshot(&self, app_id: &str) -> Option<MonitoringSnapshot> {
        self.inner.records.get(app_id).map(|record| MonitoringSnapshot {
            app_id: app_id.to_string(),
            declared_cpu: record.declared_cpu,
            last_hour: record.hour.iter().cloned().collect(),
            last_week: record.week.iter().cloned().collect(),
        })
    }

    /// Evaluate every record once
    pub async fn run_throttle_cycle(&self) {
        let ids: Vec<String> = self
            .inner
            .records
            .iter()
            .map(|e| e.key().clone())
            .collect();
        for id in ids {
            if let Err(e) = self.inner.throttle(&id).await {
                warn!("CPU quota adjustment of {} failed: {}", id, e);
            }
        }
    }

    pub fn spawn_throttle_controller(self: &Arc<Self>) -> ScheduledHandle {
        let engine = self.clone();
        let interval = self.inner.config.throttle_interval();
        spawn_scheduled("cpu throttle", interval, move || {
            let engine = engine.clone();
            async move {
                engine.run_throttle_cycle().await;
                Schedule::After(interval)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f64, nano: u64) -> StatsSample {
        StatsSample {
            timestamp: Utc::now(),
            cpu_percent: cpu,
            memory_usage_bytes: 0,
            memory_limit_bytes: 0,
            pids: 1,
            disk_usage_bytes: 0,
            nano_cpus: Some(nano),
        }
    }

    #[test]
    fn test_every_third_sample_reaches_week_window() {
        let start = Utc::now();
        let mut record = MonitoringRecord::new(2.0);
        for i in 0..7 {
            record.record(start + chrono::Duration::minutes(i), sample(10.0, 2_000_000_000));
        }
        assert_eq!(record.hour.len(), 7);
        assert_eq!(record.week.len(), 2);
        assert!(record.hour.iter().all(|s| s.nano_cpus.is_none()));
        assert!(record.week.iter().all(|s| s.nano_cpus == Some(2_000_000_000)));
    }

    #[test]
    fn test_hour_window_drops_old_samples() {
        let start = Utc::now();
        let mut record = MonitoringRecord::new(1.0);
        record.record(start, sample(10.0, 0));
        record.record(start + chrono::Duration::minutes(61), sample(20.0, 0));
        let cpus: Vec<f64> = record.hour.iter().map(|s| s.cpu_percent).collect();
        assert_eq!(cpus, vec![20.0]);
    }

    #[test]
    fn test_sample_wire_format() {
        let json = serde_json::to_value(sample(12.5, 0)).unwrap();
        assert_eq!(json["cpuPercent"], 12.5);
        assert!(json.get("diskUsageBytes").is_some());
    }
}
