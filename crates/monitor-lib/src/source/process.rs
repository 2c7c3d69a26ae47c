//! Process memory readings from cgroup v2
//!
//! Reads the unified hierarchy:
//! - memory.current for current usage
//! - memory.max for the limit ("max" means unlimited)
//!
//! When the cgroup is unlimited the host's MemTotal from /proc/meminfo is
//! used as the limit instead.

use std::path::PathBuf;

use tokio::fs;

use crate::error::MetricsError;
use crate::models::ProcessStats;

/// Reader for the memory controller of the process's own cgroup
#[derive(Debug, Clone)]
pub struct CgroupMemoryReader {
    cgroup_path: PathBuf,
    proc_path: PathBuf,
}

impl CgroupMemoryReader {
    pub fn new(cgroup_path: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_path: cgroup_path.into(),
            proc_path: PathBuf::from("/proc"),
        }
    }

    /// Create reader with custom proc path (for testing)
    pub fn with_proc_path(cgroup_path: impl Into<PathBuf>, proc_path: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_path: cgroup_path.into(),
            proc_path: proc_path.into(),
        }
    }

    pub async fn read(&self) -> Result<ProcessStats, MetricsError> {
        let current = fs::read_to_string(self.cgroup_path.join("memory.current")).await?;
        let used_bytes = parse_value(&current, "memory.current")?;

        let max = fs::read_to_string(self.cgroup_path.join("memory.max")).await?;
        let limit_bytes = match max.trim() {
            "max" => self.host_memory_total().await?,
            value => parse_value(value, "memory.max")?,
        };

        Ok(ProcessStats {
            used_bytes,
            limit_bytes,
        })
    }

    async fn host_memory_total(&self) -> Result<u64, MetricsError> {
        let content = fs::read_to_string(self.proc_path.join("meminfo")).await?;
        parse_meminfo_total(&content)
            .ok_or_else(|| MetricsError::Query("MemTotal missing from meminfo".to_string()))
    }
}

fn parse_value(content: &str, file: &str) -> Result<u64, MetricsError> {
    content
        .trim()
        .parse()
        .map_err(|_| MetricsError::Query(format!("failed to parse {} value", file)))
}

/// Parse `MemTotal:  16318412 kB` into bytes
fn parse_meminfo_total(content: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let rest = line.strip_prefix("MemTotal:")?;
        let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
        Some(kb * 1024)
    })
}
