//! Prometheus exposition of container memory metrics.
//!
//! [`MemoryCollector`] reads the cgroup files on every scrape, so the exported
//! gauges are never staler than the scrape itself.

use super::cgroup::{MemoryMetrics, MemoryReader};
use crate::error::Result;
use prometheus::core::{Collector, Desc};
use prometheus::proto::{Gauge, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

const NAMESPACE: &str = "kafka";
const SUBSYSTEM: &str = "memory";

/// Name and help of every exported gauge, in [`MemoryCollector::values`] order.
const GAUGES: [(&str, &str); 8] = [
    ("usage_bytes", "Total memory usage in bytes"),
    ("limit_bytes", "Memory limit in bytes (container limit)"),
    ("rss_bytes", "Resident set size (non-reclaimable memory) in bytes"),
    ("inactive_file_bytes", "Inactive file (reclaimable page cache) in bytes"),
    ("working_set_bytes", "Working set (usage - inactive_file) in bytes"),
    ("non_reclaimable_bytes", "Non-reclaimable memory (RSS only) in bytes"),
    ("oom_ratio", "OOM ratio (working_set / limit)"),
    ("oom_floor_ratio", "OOM floor ratio (rss / limit)"),
];

/// Collector exporting `kafka_memory_*` gauges.
///
/// Every scrape builds its samples from a single read, so concurrent scrapes
/// never mix values from different reads.
#[derive(Clone)]
pub struct MemoryCollector {
    reader: Arc<dyn MemoryReader>,
    descs: Vec<Desc>,
}

impl MemoryCollector {
    /// Creates a collector backed by `reader`.
    pub fn new(reader: Arc<dyn MemoryReader>) -> Result<Self> {
        let descs = GAUGES
            .iter()
            .map(|(name, help)| {
                Desc::new(
                    format!("{}_{}_{}", NAMESPACE, SUBSYSTEM, name),
                    help.to_string(),
                    Vec::new(),
                    HashMap::new(),
                )
            })
            .collect::<prometheus::Result<Vec<_>>>()?;
        Ok(Self { reader, descs })
    }

    /// Registers with `registry`. Registering twice fails.
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.clone()))?;
        Ok(())
    }

    fn values(m: &MemoryMetrics) -> [f64; 8] {
        [
            m.usage as f64,
            m.limit as f64,
            m.rss as f64,
            m.inactive_file as f64,
            m.working_set as f64,
            m.rss as f64,
            m.oom_ratio,
            m.oom_floor_ratio,
        ]
    }

    fn families(&self, m: &MemoryMetrics) -> Vec<MetricFamily> {
        self.descs
            .iter()
            .zip(Self::values(m))
            .map(|(desc, value)| {
                let mut gauge = Gauge::default();
                gauge.set_value(value);
                let mut metric = Metric::default();
                metric.set_gauge(gauge);

                let mut family = MetricFamily::default();
                family.set_name(desc.fq_name.clone());
                family.set_help(desc.help.clone());
                family.set_field_type(MetricType::GAUGE);
                family.mut_metric().push(metric);
                family
            })
            .collect()
    }
}

impl Collector for MemoryCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        match self.reader.read_memory_metrics() {
            Ok(m) => self.families(&m),
            Err(e) => {
                error!(error = %e, "failed to read memory metrics");
                Vec::new()
            }
        }
    }
}

/// Renders every metric in `registry` in the text exposition format.
pub fn render(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
