//! Broker identity and peer-address discovery.
//!
//! Values come from an explicit override when one is configured, otherwise
//! from identifiers the platform injects into the replica's environment:
//!
//! - `HOSTNAME`: `{workload}-{replicaIndex}`, the index becomes the broker ID
//! - `CPLN_WORKLOAD`: `/org/{org}/gvc/{gvc}/workload/{workload}`
//! - `CPLN_LOCATION`: path-style link, the location is the last segment
//! - `CPLN_GVC` / `CPLN_GVC_ALIAS`: plain names
//!
//! Every resolver takes the environment as a lookup function so callers can
//! substitute a map in tests.

use crate::error::{Error, Result};

/// Host name of the replica, `{workload}-{index}`.
pub const HOSTNAME_VAR: &str = "HOSTNAME";
/// Workload link injected by the platform.
pub const WORKLOAD_VAR: &str = "CPLN_WORKLOAD";
/// Location link injected by the platform.
pub const LOCATION_VAR: &str = "CPLN_LOCATION";
/// GVC name injected by the platform.
pub const GVC_VAR: &str = "CPLN_GVC";
/// Legacy GVC alias injected by the platform.
pub const GVC_ALIAS_VAR: &str = "CPLN_GVC_ALIAS";

const WORKLOAD_SEGMENT: &str = "/workload/";

/// Reads a variable from the process environment, treating empty values as unset.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn lookup_non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|v| !v.is_empty())
}

/// Extracts the replica index from a host name using the last hyphen.
///
/// `"kafka-7"` yields 7 and `"my-kafka-cluster-2"` yields 2.
pub fn parse_broker_id_from_hostname(hostname: &str) -> Result<i32> {
    let last_hyphen = hostname.rfind('-').ok_or_else(|| {
        Error::invalid_identity(format!("invalid hostname format (no hyphen): {}", hostname))
    })?;

    let suffix = &hostname[last_hyphen + 1..];
    if suffix.is_empty() {
        return Err(Error::invalid_identity(format!(
            "invalid hostname format (trailing hyphen): {}",
            hostname
        )));
    }

    suffix.parse::<i32>().map_err(|e| {
        Error::invalid_identity(format!(
            "failed to parse replica index from hostname {}: {}",
            hostname, e
        ))
    })
}

/// Returns the explicit broker ID, or derives it from `HOSTNAME`.
pub fn resolve_broker_id<F>(explicit: Option<i32>, lookup: &F) -> Result<i32>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(id) = explicit {
        return Ok(id);
    }
    let hostname = lookup_non_empty(lookup, HOSTNAME_VAR).ok_or_else(|| {
        Error::invalid_identity(format!("{} environment variable not set", HOSTNAME_VAR))
    })?;
    parse_broker_id_from_hostname(&hostname)
}

/// Extracts the workload name from a workload link.
///
/// `"/org/gitops/gvc/igor-kafka/workload/kafka-fix-cluster"` yields `"kafka-fix-cluster"`.
pub fn parse_workload_name_from_link(link: &str) -> Result<String> {
    let idx = link.rfind(WORKLOAD_SEGMENT).ok_or_else(|| {
        Error::missing_source(format!(
            "invalid {} format (missing {}): {}",
            WORKLOAD_VAR, WORKLOAD_SEGMENT, link
        ))
    })?;

    let rest = &link[idx + WORKLOAD_SEGMENT.len()..];
    let name = rest.split('/').next().unwrap_or_default();
    if name.is_empty() {
        return Err(Error::missing_source(format!(
            "invalid {} format (empty workload name): {}",
            WORKLOAD_VAR, link
        )));
    }

    Ok(name.to_string())
}

/// Extracts the location name, the segment after the last `/`.
pub fn parse_location_from_link(link: &str) -> Result<String> {
    let name = link.rsplit('/').next().unwrap_or_default();
    if name.is_empty() {
        return Err(Error::missing_source(format!(
            "invalid {} format (empty location): {}",
            LOCATION_VAR, link
        )));
    }
    Ok(name.to_string())
}

fn explicit_or<F, P>(explicit: Option<&str>, lookup: &F, key: &str, parse: P) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Result<String>,
{
    if let Some(value) = explicit.filter(|v| !v.is_empty()) {
        return Ok(value.to_string());
    }
    let raw = lookup_non_empty(lookup, key)
        .ok_or_else(|| Error::missing_source(format!("{} environment variable not set", key)))?;
    parse(&raw)
}

/// Returns the explicit workload name, or the one embedded in `CPLN_WORKLOAD`.
pub fn resolve_workload_name<F>(explicit: Option<&str>, lookup: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    explicit_or(explicit, lookup, WORKLOAD_VAR, parse_workload_name_from_link)
}

/// Returns the explicit location, or the last segment of `CPLN_LOCATION`.
pub fn resolve_location<F>(explicit: Option<&str>, lookup: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    explicit_or(explicit, lookup, LOCATION_VAR, parse_location_from_link)
}

/// Returns the explicit GVC name, or `CPLN_GVC`.
pub fn resolve_gvc_name<F>(explicit: Option<&str>, lookup: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    explicit_or(explicit, lookup, GVC_VAR, |raw| Ok(raw.to_string()))
}

/// Returns the explicit GVC alias, or `CPLN_GVC_ALIAS`.
pub fn resolve_gvc_alias<F>(explicit: Option<&str>, lookup: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    explicit_or(explicit, lookup, GVC_ALIAS_VAR, |raw| Ok(raw.to_string()))
}

/// Builds the replica-direct address list,
/// `replica-{i}.{workload}.{location}.{gvc}.cpln.local:{port}` joined with `,`.
///
/// Non-positive replica counts are treated as 1.
pub fn build_bootstrap_servers(
    workload: &str,
    location: &str,
    gvc: &str,
    replica_count: i32,
    port: u16,
) -> String {
    let replica_count = replica_count.max(1);
    (0..replica_count)
        .map(|i| format!("replica-{}.{}.{}.{}.cpln.local:{}", i, workload, location, gvc, port))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_broker_id_uses_last_hyphen() {
        assert_eq!(parse_broker_id_from_hostname("kafka-7").unwrap(), 7);
        assert_eq!(parse_broker_id_from_hostname("my-kafka-cluster-2").unwrap(), 2);
        assert_eq!(parse_broker_id_from_hostname("kafka-0").unwrap(), 0);
    }

    #[test]
    fn test_broker_id_rejects_malformed_hostnames() {
        for hostname in ["kafka", "", "kafka-", "kafka-abc", "kafka-1a", "kafka-99999999999"] {
            let err = parse_broker_id_from_hostname(hostname).unwrap_err();
            assert!(
                matches!(err, Error::InvalidIdentity(_)),
                "{} should be rejected, got {:?}",
                hostname,
                err
            );
        }
    }

    #[test]
    fn test_resolve_broker_id_prefers_explicit() {
        let env = env_of(&[(HOSTNAME_VAR, "kafka-3")]);
        assert_eq!(resolve_broker_id(Some(11), &env).unwrap(), 11);
        assert_eq!(resolve_broker_id(None, &env).unwrap(), 3);
    }

    #[test]
    fn test_resolve_broker_id_without_hostname() {
        let env = env_of(&[]);
        assert!(matches!(
            resolve_broker_id(None, &env),
            Err(Error::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_workload_name_from_link() {
        assert_eq!(
            parse_workload_name_from_link("/org/gitops/gvc/igor-kafka/workload/kafka-fix-cluster")
                .unwrap(),
            "kafka-fix-cluster"
        );
        assert_eq!(
            parse_workload_name_from_link("/org/o/gvc/g/workload/kafka/extra").unwrap(),
            "kafka"
        );
        assert!(matches!(
            parse_workload_name_from_link("/org/gitops/gvc/igor-kafka"),
            Err(Error::MissingDiscoverySource(_))
        ));
        assert!(parse_workload_name_from_link("/org/o/gvc/g/workload/").is_err());
    }

    #[test]
    fn test_location_takes_last_segment() {
        let env = env_of(&[(LOCATION_VAR, "/org/gitops/location/aws-us-west-2")]);
        assert_eq!(resolve_location(None, &env).unwrap(), "aws-us-west-2");

        let plain = env_of(&[(LOCATION_VAR, "gcp-us-east1")]);
        assert_eq!(resolve_location(None, &plain).unwrap(), "gcp-us-east1");

        let trailing = env_of(&[(LOCATION_VAR, "/org/gitops/location/")]);
        assert!(resolve_location(None, &trailing).is_err());
    }

    #[test]
    fn test_overrides_win_and_empty_overrides_fall_through() {
        let env = env_of(&[(GVC_VAR, "from-env"), (WORKLOAD_VAR, "/org/o/gvc/g/workload/wl")]);
        assert_eq!(resolve_gvc_name(Some("explicit"), &env).unwrap(), "explicit");
        assert_eq!(resolve_gvc_name(Some(""), &env).unwrap(), "from-env");
        assert_eq!(resolve_workload_name(None, &env).unwrap(), "wl");
    }

    #[test]
    fn test_missing_sources_are_reported() {
        let env = env_of(&[(GVC_ALIAS_VAR, "")]);
        assert!(matches!(resolve_gvc_name(None, &env), Err(Error::MissingDiscoverySource(_))));
        assert!(matches!(resolve_gvc_alias(None, &env), Err(Error::MissingDiscoverySource(_))));
        assert!(matches!(resolve_workload_name(None, &env), Err(Error::MissingDiscoverySource(_))));
    }

    #[test]
    fn test_build_bootstrap_servers() {
        assert_eq!(
            build_bootstrap_servers("kafka", "aws-us-west-2", "test-gvc", 3, 9092),
            "replica-0.kafka.aws-us-west-2.test-gvc.cpln.local:9092,\
             replica-1.kafka.aws-us-west-2.test-gvc.cpln.local:9092,\
             replica-2.kafka.aws-us-west-2.test-gvc.cpln.local:9092"
        );
    }

    #[test]
    fn test_build_bootstrap_servers_normalizes_replica_count() {
        let one = build_bootstrap_servers("kafka", "loc", "gvc", 1, 9092);
        assert_eq!(one, "replica-0.kafka.loc.gvc.cpln.local:9092");
        assert_eq!(build_bootstrap_servers("kafka", "loc", "gvc", 0, 9092), one);
        assert_eq!(build_bootstrap_servers("kafka", "loc", "gvc", -1, 9092), one);
    }
}
