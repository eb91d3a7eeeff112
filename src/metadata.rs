//! Point-in-time views of cluster state returned by the administrative client.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Controller ID reported when no controller is elected.
pub const NO_CONTROLLER: i32 = -1;

/// A registered broker and its advertised listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerInfo {
    /// Broker node ID
    pub id: i32,
    /// Advertised host
    pub host: String,
    /// Advertised port
    pub port: i32,
}

impl BrokerInfo {
    /// `host:port` form of the advertised listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionDescriptor {
    /// Partition index
    pub partition: i32,
    /// Ordered replica broker IDs
    pub replicas: Vec<i32>,
    /// Broker IDs currently in the in-sync replica set
    pub isr: Vec<i32>,
}

impl PartitionDescriptor {
    /// A partition is under-replicated for `broker_id` when the broker is an
    /// assigned replica but missing from the ISR.
    pub fn is_under_replicated_for(&self, broker_id: i32) -> bool {
        self.replicas.contains(&broker_id) && !self.isr.contains(&broker_id)
    }
}

/// Partitions of a single topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicDescriptor {
    /// Topic name
    pub name: String,
    /// Partition descriptors
    pub partitions: Vec<PartitionDescriptor>,
}

/// Cluster metadata snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterMetadata {
    /// Registered brokers
    pub brokers: Vec<BrokerInfo>,
    /// Current controller ID, [`NO_CONTROLLER`] when none is elected
    pub controller_id: i32,
    /// Topics and their partitions
    pub topics: Vec<TopicDescriptor>,
}

impl ClusterMetadata {
    /// Whether `broker_id` is present in the registered broker set.
    pub fn has_broker(&self, broker_id: i32) -> bool {
        self.brokers.iter().any(|b| b.id == broker_id)
    }

    /// Looks up a registered broker.
    pub fn broker(&self, broker_id: i32) -> Option<&BrokerInfo> {
        self.brokers.iter().find(|b| b.id == broker_id)
    }

    /// Whether a controller is currently elected.
    pub fn controller_elected(&self) -> bool {
        self.controller_id >= 0
    }

    /// Counts partitions, across all topics, where `broker_id` is an assigned
    /// replica but not in sync.
    pub fn under_replicated_partitions(&self, broker_id: i32) -> usize {
        self.topics
            .iter()
            .flat_map(|t| t.partitions.iter())
            .filter(|p| p.is_under_replicated_for(broker_id))
            .count()
    }
}

/// A partition placement inside a log directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogDirPartition {
    /// Topic name
    pub topic: String,
    /// Partition index
    pub partition: i32,
    /// Size on disk in bytes
    pub size: i64,
    /// Whether this placement is a future replica still being migrated in
    pub is_future: bool,
}

/// One log directory of a broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogDirDescriptor {
    /// Directory path
    pub path: String,
    /// Directory-level error reported by the broker
    pub error: Option<String>,
    /// Partition placements
    pub partitions: Vec<LogDirPartition>,
}

impl LogDirDescriptor {
    /// Healthy when the directory reports no error and holds no future placement.
    pub fn is_healthy(&self) -> bool {
        self.error.is_none() && !self.partitions.iter().any(|p| p.is_future)
    }
}

/// Log directories of one broker, keyed by path.
pub type LogDirs = BTreeMap<String, LogDirDescriptor>;

/// Problems found while scanning a broker's log directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogDirFindings {
    /// `(path, error)` for every directory reporting an error
    pub dir_errors: Vec<(String, String)>,
    /// Future placements, `(path, topic, partition)`
    pub future_partitions: BTreeSet<(String, String, i32)>,
}

impl LogDirFindings {
    /// Scans every directory and placement.
    pub fn scan(dirs: &LogDirs) -> Self {
        let mut findings = Self::default();
        for (path, dir) in dirs {
            if let Some(err) = &dir.error {
                findings.dir_errors.push((path.clone(), err.clone()));
            }
            for p in dir.partitions.iter().filter(|p| p.is_future) {
                findings
                    .future_partitions
                    .insert((path.clone(), p.topic.clone(), p.partition));
            }
        }
        findings
    }

    /// No directory errors and no future placements.
    pub fn is_healthy(&self) -> bool {
        self.dir_errors.is_empty() && self.future_partitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(partition: i32, replicas: &[i32], isr: &[i32]) -> PartitionDescriptor {
        PartitionDescriptor {
            partition,
            replicas: replicas.to_vec(),
            isr: isr.to_vec(),
        }
    }

    fn snapshot(topics: Vec<TopicDescriptor>) -> ClusterMetadata {
        ClusterMetadata {
            brokers: vec![BrokerInfo { id: 1, host: "b1".into(), port: 9092 }],
            controller_id: 1,
            topics,
        }
    }

    #[test]
    fn test_under_replication_counts_per_partition() {
        let md = snapshot(vec![
            TopicDescriptor {
                name: "orders".into(),
                partitions: vec![partition(0, &[1, 2], &[2]), partition(1, &[1, 2], &[1, 2])],
            },
            TopicDescriptor {
                name: "payments".into(),
                partitions: vec![partition(0, &[2, 1], &[2])],
            },
        ]);
        assert_eq!(md.under_replicated_partitions(1), 2);
        assert_eq!(md.under_replicated_partitions(2), 0);
    }

    #[test]
    fn test_non_replica_broker_is_never_counted() {
        let md = snapshot(vec![TopicDescriptor {
            name: "orders".into(),
            partitions: vec![partition(0, &[2, 3], &[]), partition(1, &[2, 3], &[2])],
        }]);
        assert_eq!(md.under_replicated_partitions(1), 0);
    }

    #[test]
    fn test_controller_and_registration() {
        let mut md = snapshot(vec![]);
        assert!(md.has_broker(1));
        assert!(!md.has_broker(2));
        assert!(md.controller_elected());
        md.controller_id = NO_CONTROLLER;
        assert!(!md.controller_elected());
        assert_eq!(md.broker(1).map(BrokerInfo::address).as_deref(), Some("b1:9092"));
    }

    #[test]
    fn test_log_dir_findings() {
        let mut dirs = LogDirs::new();
        dirs.insert(
            "/data/a".into(),
            LogDirDescriptor {
                path: "/data/a".into(),
                error: None,
                partitions: vec![LogDirPartition {
                    topic: "orders".into(),
                    partition: 3,
                    size: 10,
                    is_future: false,
                }],
            },
        );
        assert!(LogDirFindings::scan(&dirs).is_healthy());

        dirs.insert(
            "/data/b".into(),
            LogDirDescriptor {
                path: "/data/b".into(),
                error: Some("KAFKA_STORAGE_ERROR".into()),
                partitions: vec![],
            },
        );
        let findings = LogDirFindings::scan(&dirs);
        assert!(!findings.is_healthy());
        assert_eq!(findings.dir_errors.len(), 1);
        assert!(findings.future_partitions.is_empty());
    }
}
