//! cluster: control-plane collaborators of a backup run.
//!
//! The orchestrator only needs three capabilities from the cluster:
//! - read a workload (StatefulSet) spec: storage templates + replica count;
//! - create a VolumeSnapshot object;
//! - read a VolumeSnapshot object's status by identity.
//!
//! Реализации:
//! - [`dir::DirCluster`]: файловое хранилище объектов (JSON) в каталоге состояния кластера;
//! - [`memory::MemoryCluster`]: in-memory хранилище со сценариями готовности (тесты, встраивание).

pub mod dir;
pub mod memory;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ClusterError;

pub const KIND_STATEFULSET: &str = "statefulset";
pub const KIND_VOLUME_SNAPSHOT: &str = "volumesnapshot";

/// Source kind of every snapshot request: the shard's claim.
pub const KIND_PERSISTENT_VOLUME_CLAIM: &str = "PersistentVolumeClaim";

/// Identity of a namespaced cluster object (namespace + name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Named volume claim template of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTemplate {
    pub name: String,
}

/// The part of a StatefulSet spec the topology resolver reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    pub name: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub volume_claim_templates: Vec<ClaimTemplate>,
}

fn default_replicas() -> u32 {
    1
}

impl WorkloadSpec {
    pub fn new(name: impl Into<String>, replicas: u32, templates: &[&str]) -> Self {
        Self {
            name: name.into(),
            replicas,
            volume_claim_templates: templates
                .iter()
                .map(|t| ClaimTemplate { name: t.to_string() })
                .collect(),
        }
    }

    /// Template names in declaration order.
    pub fn storage_templates(&self) -> impl Iterator<Item = &str> {
        self.volume_claim_templates.iter().map(|t| t.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedLocalObjectReference {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSpec {
    pub volume_snapshot_class_name: String,
    pub source: TypedLocalObjectReference,
}

/// Declarative VolumeSnapshot object as submitted to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRequest {
    pub metadata: ObjectMeta,
    pub spec: SnapshotSpec,
}

impl SnapshotRequest {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(&self.metadata.namespace, &self.metadata.name)
    }

    pub fn source_volume(&self) -> &str {
        &self.spec.source.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotErrorStatus {
    #[serde(default)]
    pub message: Option<String>,
}

/// Status published by the storage driver. Absent status means Pending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStatus {
    #[serde(default)]
    pub ready_to_use: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SnapshotErrorStatus>,
}

/// Driver-side view of one snapshot, derived from [`SnapshotStatus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotPhase {
    Pending,
    Ready,
    Error(String),
}

impl SnapshotStatus {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn ready() -> Self {
        Self {
            ready_to_use: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ready_to_use: false,
            error: Some(SnapshotErrorStatus {
                message: Some(message.into()),
            }),
        }
    }

    /// readyToUse wins over a stale error condition.
    pub fn phase(&self) -> SnapshotPhase {
        if self.ready_to_use {
            return SnapshotPhase::Ready;
        }
        match &self.error {
            Some(e) => SnapshotPhase::Error(
                e.message
                    .clone()
                    .unwrap_or_else(|| "driver reported an error".to_string()),
            ),
            None => SnapshotPhase::Pending,
        }
    }
}

/// "get workload spec" capability.
pub trait WorkloadSpecReader: Send + Sync {
    fn get_workload_spec(&self, namespace: &str, name: &str) -> Result<WorkloadSpec, ClusterError>;
}

/// "create snapshot object" / "get snapshot object by identity" capability.
pub trait SnapshotStore: Send + Sync {
    fn create(&self, request: &SnapshotRequest) -> Result<ObjectRef, ClusterError>;
    fn get(&self, id: &ObjectRef) -> Result<SnapshotStatus, ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_from_status() {
        assert_eq!(SnapshotStatus::pending().phase(), SnapshotPhase::Pending);
        assert_eq!(SnapshotStatus::ready().phase(), SnapshotPhase::Ready);
        assert_eq!(
            SnapshotStatus::failed("quota exceeded").phase(),
            SnapshotPhase::Error("quota exceeded".into())
        );

        let stale = SnapshotStatus {
            ready_to_use: true,
            error: Some(SnapshotErrorStatus { message: None }),
        };
        assert_eq!(stale.phase(), SnapshotPhase::Ready);
    }

    #[test]
    fn workload_spec_json_layout() {
        let spec: WorkloadSpec = serde_json::from_str(
            r#"{"name":"shard0","replicas":3,"volumeClaimTemplates":[{"name":"data"},{"name":"journal"}]}"#,
        )
        .unwrap();
        assert_eq!(spec.replicas, 3);
        assert_eq!(spec.storage_templates().collect::<Vec<_>>(), vec!["data", "journal"]);

        let bare: WorkloadSpec = serde_json::from_str(r#"{"name":"shard1"}"#).unwrap();
        assert_eq!(bare.replicas, 1);
        assert!(bare.volume_claim_templates.is_empty());
    }

    #[test]
    fn error_status_without_message() {
        let st: SnapshotStatus = serde_json::from_str(r#"{"readyToUse":false,"error":{}}"#).unwrap();
        assert_eq!(st.phase(), SnapshotPhase::Error("driver reported an error".into()));
    }
}
