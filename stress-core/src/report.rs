// stress-core/src/report.rs
// Run summary: per-stressor throughput, CPU time, failures and metrics

use crate::config::InstanceMode;
use crate::error::*;
use crate::metrics::{Metric, Reduction};
use crate::shared::InstanceSlot;
use crate::status::ExitStatus;
use crate::system;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub kernel_release: String,
    pub cpus: usize,
    pub page_size: usize,
    pub phys_mem_bytes: u64,
}

impl HostInfo {
    pub fn detect() -> Self {
        Self {
            kernel_release: system::kernel_release(),
            cpus: system::online_cpus(),
            page_size: system::page_size(),
            phys_mem_bytes: system::phys_mem_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressorSummary {
    pub name: String,
    pub instances: u32,
    pub bogo_ops: u64,
    pub real_time_secs: f64,
    pub user_time_secs: f64,
    pub system_time_secs: f64,
    /// bogo ops over wall clock time
    pub bogo_ops_per_sec_real: f64,
    /// bogo ops over usr+sys time
    pub bogo_ops_per_sec_cpu: f64,
    pub failures: u64,
    pub status: ExitStatus,
    pub instance_statuses: Vec<ExitStatus>,
    pub metrics: Vec<Metric>,
}

impl StressorSummary {
    /// Collate the slots of all instances of one stressor
    pub fn from_slots(name: &str, slots: &[&InstanceSlot], real_time: Duration) -> Self {
        let mut bogo_ops = 0u64;
        let mut failures = 0u64;
        let mut user = Duration::ZERO;
        let mut sys = Duration::ZERO;
        let mut status = ExitStatus::Success;
        let mut instance_statuses = Vec::with_capacity(slots.len());

        for slot in slots {
            bogo_ops += slot.bogo_ops();
            failures += slot.failures();
            let (u, s) = slot.cpu_time();
            user += u;
            sys += s;
            let st = slot.status().unwrap_or(ExitStatus::Failure);
            instance_statuses.push(st);
            status = status.worst(st);
        }

        let real = real_time.as_secs_f64();
        let cpu = (user + sys).as_secs_f64();

        Self {
            name: name.to_string(),
            instances: slots.len() as u32,
            bogo_ops,
            real_time_secs: real,
            user_time_secs: user.as_secs_f64(),
            system_time_secs: sys.as_secs_f64(),
            bogo_ops_per_sec_real: rate(bogo_ops, real),
            bogo_ops_per_sec_cpu: rate(bogo_ops, cpu),
            failures,
            status,
            instance_statuses,
            metrics: combine_metrics(slots),
        }
    }
}

fn rate(ops: u64, secs: f64) -> f64 {
    if secs > 0.0 {
        ops as f64 / secs
    } else {
        0.0
    }
}

/// Reduce same-named metrics across instances, first-seen order
fn combine_metrics(slots: &[&InstanceSlot]) -> Vec<Metric> {
    let mut grouped: Vec<(String, Reduction, Vec<f64>)> = Vec::new();
    for metric in slots.iter().flat_map(|s| s.metrics()) {
        match grouped.iter_mut().find(|(name, _, _)| *name == metric.name) {
            Some((_, _, values)) => values.push(metric.value),
            None => grouped.push((metric.name, metric.reduction, vec![metric.value])),
        }
    }
    grouped
        .into_iter()
        .filter_map(|(name, reduction, values)| {
            reduction.combine(&values).map(|value| Metric {
                name,
                value,
                reduction,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: InstanceMode,
    pub host: HostInfo,
    pub stressors: Vec<StressorSummary>,
    pub total_failures: u64,
    /// Worst status over every instance
    pub status: ExitStatus,
}

impl RunReport {
    pub fn new(
        started_at: DateTime<Utc>,
        mode: InstanceMode,
        stressors: Vec<StressorSummary>,
    ) -> Self {
        let status = stressors
            .iter()
            .fold(ExitStatus::Success, |acc, s| acc.worst(s.status));
        let total_failures = stressors.iter().map(|s| s.failures).sum();
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            mode,
            host: HostInfo::detect(),
            stressors,
            total_failures,
            status,
        }
    }

    pub fn exit_status(&self) -> ExitStatus {
        self.status
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)
            .map_err(|e| StressError::io(&format!("write {}", path.display()), e))?;
        info!("report written to {}", path.display());
        Ok(())
    }

    /// Log the result table
    pub fn log_summary(&self) {
        info!("run {} ({} mode) on {}", self.run_id, self.mode, self.host.kernel_release);
        info!(
            "{:<10} {:>12} {:>9} {:>9} {:>9} {:>14} {:>14}",
            "stressor", "bogo ops", "real (s)", "usr (s)", "sys (s)", "ops/s (real)", "ops/s (cpu)"
        );
        for s in &self.stressors {
            info!(
                "{:<10} {:>12} {:>9.2} {:>9.2} {:>9.2} {:>14.2} {:>14.2}",
                s.name,
                s.bogo_ops,
                s.real_time_secs,
                s.user_time_secs,
                s.system_time_secs,
                s.bogo_ops_per_sec_real,
                s.bogo_ops_per_sec_cpu
            );
            for m in &s.metrics {
                info!("{:<10} {:>12.2} {} ({:?})", "", m.value, m.name, m.reduction);
            }
        }
        for s in self.stressors.iter().filter(|s| s.status != ExitStatus::Success) {
            if s.status.is_failure() {
                warn!("{}: {} ({} failures)", s.name, s.status, s.failures);
            } else {
                info!("{}: {}", s.name, s.status);
            }
        }
        let skipped = self.stressors.iter().filter(|s| s.status.is_skip()).count();
        let failed = self.stressors.iter().filter(|s| s.status.is_failure()).count();
        info!(
            "overall: {} ({} stressors, {} skipped, {} failed)",
            self.status,
            self.stressors.len(),
            skipped,
            failed
        );
    }
}
