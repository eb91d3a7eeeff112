//! Container memory accounting from the cgroup filesystem.
//!
//! Two hierarchies are supported, selected once at startup by [`detect_version`]:
//! the unified hierarchy (cgroup v2) and the legacy memory controller (cgroup v1).

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default mount of the unified hierarchy.
pub const CGROUP_V2_ROOT: &str = "/sys/fs/cgroup";
/// Default mount of the legacy memory controller.
pub const CGROUP_V1_ROOT: &str = "/sys/fs/cgroup/memory";

/// Memory figures for the container, in bytes unless noted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryMetrics {
    /// Total usage, page cache included
    pub usage: u64,
    /// Hard limit, 0 when unlimited
    pub limit: u64,
    /// Anonymous (non-reclaimable) memory
    pub rss: u64,
    /// Reclaimable inactive page cache
    pub inactive_file: u64,
    /// `usage - inactive_file`, never negative
    pub working_set: u64,
    /// `working_set / limit`, 0 when unlimited
    pub oom_ratio: f64,
    /// `rss / limit`, 0 when unlimited
    pub oom_floor_ratio: f64,
}

impl MemoryMetrics {
    /// Fills in the derived fields from the raw readings.
    pub fn derive(usage: u64, limit: u64, rss: u64, inactive_file: u64) -> Self {
        let working_set = usage.saturating_sub(inactive_file);
        let (oom_ratio, oom_floor_ratio) = if limit > 0 {
            (working_set as f64 / limit as f64, rss as f64 / limit as f64)
        } else {
            (0.0, 0.0)
        };
        Self {
            usage,
            limit,
            rss,
            inactive_file,
            working_set,
            oom_ratio,
            oom_floor_ratio,
        }
    }
}

/// Source of container memory metrics.
pub trait MemoryReader: Send + Sync {
    /// Reads a fresh snapshot.
    fn read_memory_metrics(&self) -> Result<MemoryMetrics>;
}

/// Detected cgroup hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    /// Legacy per-controller hierarchy
    V1,
    /// Unified hierarchy
    V2,
    /// Neither marker file present
    Unknown,
}

/// Probes `root` (normally `/sys/fs/cgroup`) for the unified marker, then the legacy one.
pub fn detect_version(root: &Path) -> CgroupVersion {
    if root.join("memory.current").exists() {
        CgroupVersion::V2
    } else if root.join("memory").join("memory.usage_in_bytes").exists() {
        CgroupVersion::V1
    } else {
        CgroupVersion::Unknown
    }
}

/// Builds the reader for the hierarchy mounted under `root`, defaulting to v2.
pub fn reader_for_root(root: &Path) -> Box<dyn MemoryReader> {
    match detect_version(root) {
        CgroupVersion::V1 => {
            info!("detected cgroup v1");
            Box::new(CgroupV1Reader::with_base_path(root.join("memory")))
        }
        CgroupVersion::V2 => {
            info!("detected cgroup v2");
            Box::new(CgroupV2Reader::with_base_path(root))
        }
        CgroupVersion::Unknown => {
            warn!("cgroup version not detected, using v2 paths as default");
            Box::new(CgroupV2Reader::with_base_path(root))
        }
    }
}

/// Reader for the host's cgroup mount.
pub fn detect_reader() -> Box<dyn MemoryReader> {
    reader_for_root(Path::new(CGROUP_V2_ROOT))
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read {}: {}", path.display(), e),
        ))
    })
}

/// Reads a single integer; the literal `max` means unlimited and reads as 0.
fn read_value(path: &Path) -> Result<u64> {
    let raw = read_file(path)?;
    let raw = raw.trim();
    if raw == "max" {
        return Ok(0);
    }
    raw.parse::<u64>().map_err(|e| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{}: invalid value {:?}: {}", path.display(), raw, e),
        ))
    })
}

/// Parses `name value` lines. Lines with a non-integer value are skipped with a warning.
fn read_stat(path: &Path) -> Result<HashMap<String, u64>> {
    let raw = read_file(path)?;
    let mut stats = HashMap::new();
    for line in raw.lines() {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value), None) = (fields.next(), fields.next(), fields.next()) else {
            continue;
        };
        match value.parse::<u64>() {
            Ok(v) => {
                stats.insert(key.to_string(), v);
            }
            Err(e) => warn!(key, value, error = %e, "failed to parse stat value"),
        }
    }
    Ok(stats)
}

/// Reader for the unified hierarchy (`memory.current`, `memory.max`, `memory.stat`).
#[derive(Debug, Clone)]
pub struct CgroupV2Reader {
    base_path: PathBuf,
}

impl CgroupV2Reader {
    /// Reads from `/sys/fs/cgroup`.
    pub fn new() -> Self {
        Self::with_base_path(CGROUP_V2_ROOT)
    }

    /// Reads from a custom directory.
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }
}

impl Default for CgroupV2Reader {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryReader for CgroupV2Reader {
    fn read_memory_metrics(&self) -> Result<MemoryMetrics> {
        let usage = read_value(&self.base_path.join("memory.current"))?;
        let limit = read_value(&self.base_path.join("memory.max"))?;
        let stats = read_stat(&self.base_path.join("memory.stat"))?;

        // `anon` is the unified hierarchy's equivalent of rss.
        let rss = stats.get("anon").copied().unwrap_or(0);
        let inactive_file = stats.get("inactive_file").copied().unwrap_or(0);
        Ok(MemoryMetrics::derive(usage, limit, rss, inactive_file))
    }
}

/// Reader for the legacy memory controller
/// (`memory.usage_in_bytes`, `memory.limit_in_bytes`, `memory.stat`).
#[derive(Debug, Clone)]
pub struct CgroupV1Reader {
    base_path: PathBuf,
}

impl CgroupV1Reader {
    /// Reads from `/sys/fs/cgroup/memory`.
    pub fn new() -> Self {
        Self::with_base_path(CGROUP_V1_ROOT)
    }

    /// Reads from a custom directory.
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }
}

impl Default for CgroupV1Reader {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryReader for CgroupV1Reader {
    fn read_memory_metrics(&self) -> Result<MemoryMetrics> {
        let usage = read_value(&self.base_path.join("memory.usage_in_bytes"))?;
        let limit = read_value(&self.base_path.join("memory.limit_in_bytes"))?;
        let stats = read_stat(&self.base_path.join("memory.stat"))?;

        let rss = stats.get("rss").copied().unwrap_or(0);
        let inactive_file = stats.get("inactive_file").copied().unwrap_or(0);
        Ok(MemoryMetrics::derive(usage, limit, rss, inactive_file))
    }
}
