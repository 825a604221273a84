//! Topology resolver: shard names -> backing volume targets.
//!
//! Имена томов: закрытый контракт с контроллером StatefulSet:
//!   pod   = "<statefulset>-<ordinal>"
//!   claim = "<template>-<pod>"  =>  "<template>-<shard>-<ordinal>"
//! Порядок вывода: shard (как во входе) -> ordinal -> template (как в спеке).

use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::cluster::WorkloadSpecReader;
use crate::error::TopologyError;

/// How many replicas (ordinals `0..N`) of each shard are captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicaScope {
    /// Only ordinal 0, the primary.
    #[default]
    Primary,
    /// Ordinals `0..n`; `n` must not exceed the workload's replica count.
    Count(u32),
    /// Every replica the workload declares.
    All,
}

impl ReplicaScope {
    /// Replica bound for a workload declaring `declared` replicas.
    pub fn bound(&self, shard: &str, declared: u32) -> Result<u32, TopologyError> {
        let n = match *self {
            ReplicaScope::Primary => 1,
            ReplicaScope::Count(n) => {
                if n > declared {
                    return Err(TopologyError::ReplicaBoundExceeded {
                        shard: shard.to_string(),
                        requested: n,
                        declared,
                    });
                }
                n
            }
            ReplicaScope::All => declared,
        };
        if n == 0 {
            return Err(TopologyError::NoReplicas {
                shard: shard.to_string(),
            });
        }
        Ok(n)
    }
}

impl FromStr for ReplicaScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "primary" => Ok(ReplicaScope::Primary),
            "all" => Ok(ReplicaScope::All),
            other => match other.parse::<u32>() {
                Ok(0) => Err("replica count must be at least 1".to_string()),
                Ok(n) => Ok(ReplicaScope::Count(n)),
                Err(_) => Err(format!(
                    "invalid replicas '{other}': use primary|all|<count>"
                )),
            },
        }
    }
}

impl fmt::Display for ReplicaScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaScope::Primary => f.write_str("primary"),
            ReplicaScope::Count(n) => write!(f, "{n}"),
            ReplicaScope::All => f.write_str("all"),
        }
    }
}

/// A resolved backing volume of one shard replica.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeTarget {
    pub volume_name: String,
    pub shard: String,
    pub ordinal: u32,
    pub template: String,
}

pub fn pod_name(shard: &str, ordinal: u32) -> String {
    format!("{shard}-{ordinal}")
}

pub fn volume_name(template: &str, shard: &str, ordinal: u32) -> String {
    format!("{}-{}", template, pod_name(shard, ordinal))
}

/// Resolve the volume targets of `shards` in `namespace`.
///
/// Reads each shard's workload spec once; fails on the first unreadable spec,
/// spec without storage templates, or replica bound that does not fit.
pub fn resolve(
    reader: &dyn WorkloadSpecReader,
    namespace: &str,
    shards: &[String],
    scope: ReplicaScope,
) -> Result<Vec<VolumeTarget>, TopologyError> {
    if shards.is_empty() {
        return Err(TopologyError::NoShards);
    }

    let mut targets = Vec::new();
    for (pos, shard) in shards.iter().enumerate() {
        let shard = shard.trim();
        if shard.is_empty() {
            return Err(TopologyError::BlankShard(pos));
        }

        let spec = reader
            .get_workload_spec(namespace, shard)
            .map_err(|cause| TopologyError::Unreadable {
                shard: shard.to_string(),
                cause,
            })?;
        if spec.volume_claim_templates.is_empty() {
            return Err(TopologyError::NoStorageTemplates {
                shard: shard.to_string(),
            });
        }

        let bound = scope.bound(shard, spec.replicas)?;
        for ordinal in 0..bound {
            for template in spec.storage_templates() {
                targets.push(VolumeTarget {
                    volume_name: volume_name(template, shard, ordinal),
                    shard: shard.to_string(),
                    ordinal,
                    template: template.to_string(),
                });
            }
        }
        debug!(
            "topology: shard={} replicas={} bound={} templates={}",
            shard,
            spec.replicas,
            bound,
            spec.volume_claim_templates.len()
        );
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::MemoryCluster;
    use crate::cluster::WorkloadSpec;

    fn names(targets: &[VolumeTarget]) -> Vec<&str> {
        targets.iter().map(|t| t.volume_name.as_str()).collect()
    }

    #[test]
    fn replica_scope_parse_and_display() {
        assert_eq!("primary".parse::<ReplicaScope>().unwrap(), ReplicaScope::Primary);
        assert_eq!("ALL".parse::<ReplicaScope>().unwrap(), ReplicaScope::All);
        assert_eq!("3".parse::<ReplicaScope>().unwrap(), ReplicaScope::Count(3));
        assert!("0".parse::<ReplicaScope>().is_err());
        assert!("some".parse::<ReplicaScope>().is_err());
        assert_eq!(ReplicaScope::Count(2).to_string(), "2");
    }

    #[test]
    fn order_is_shard_then_ordinal_then_template() {
        let c = MemoryCluster::new();
        c.add_workload("db", WorkloadSpec::new("s1", 2, &["data", "wal"]));
        c.add_workload("db", WorkloadSpec::new("s0", 2, &["data", "wal"]));

        let shards = vec!["s1".to_string(), "s0".to_string()];
        let t = resolve(&c, "db", &shards, ReplicaScope::All).unwrap();
        assert_eq!(
            names(&t),
            vec![
                "data-s1-0", "wal-s1-0", "data-s1-1", "wal-s1-1",
                "data-s0-0", "wal-s0-0", "data-s0-1", "wal-s0-1",
            ]
        );
        assert_eq!(t[3].ordinal, 1);
        assert_eq!(t[3].template, "wal");
        assert_eq!(t[3].shard, "s1");
    }

    #[test]
    fn primary_scope_takes_ordinal_zero_only() {
        let c = MemoryCluster::new();
        c.add_workload("db", WorkloadSpec::new("shard0", 3, &["data"]));
        let t = resolve(&c, "db", &["shard0".to_string()], ReplicaScope::Primary).unwrap();
        assert_eq!(names(&t), vec!["data-shard0-0"]);
    }

    #[test]
    fn errors_abort_resolution() {
        let c = MemoryCluster::new();
        c.add_workload("db", WorkloadSpec::new("empty", 1, &[]));
        c.add_workload("db", WorkloadSpec::new("two", 2, &["data"]));
        c.add_workload("db", WorkloadSpec::new("zero", 0, &["data"]));

        assert_eq!(resolve(&c, "db", &[], ReplicaScope::Primary), Err(TopologyError::NoShards));
        assert_eq!(
            resolve(&c, "db", &["two".into(), " ".into()], ReplicaScope::Primary),
            Err(TopologyError::BlankShard(1))
        );
        assert!(matches!(
            resolve(&c, "db", &["missing".into()], ReplicaScope::Primary),
            Err(TopologyError::Unreadable { ref shard, ref cause }) if shard == "missing" && cause.is_not_found()
        ));
        assert_eq!(
            resolve(&c, "db", &["empty".into()], ReplicaScope::Primary),
            Err(TopologyError::NoStorageTemplates { shard: "empty".into() })
        );
        assert_eq!(
            resolve(&c, "db", &["two".into()], ReplicaScope::Count(3)),
            Err(TopologyError::ReplicaBoundExceeded { shard: "two".into(), requested: 3, declared: 2 })
        );
        assert_eq!(
            resolve(&c, "db", &["zero".into()], ReplicaScope::All),
            Err(TopologyError::NoReplicas { shard: "zero".into() })
        );
    }
}
