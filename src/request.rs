//! Snapshot requester: VolumeTarget -> submitted VolumeSnapshot object.
//!
//! Name: "<volume>-<token>", token = run start in Unix seconds, so all objects of one
//! run share a sortable suffix. Submission is NOT idempotent: a retry of the same run
//! hits AlreadyExists, a retry with a new token creates a second snapshot.

use log::{debug, warn};
use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::cluster::{
    ObjectMeta, ObjectRef, SnapshotRequest, SnapshotSpec, SnapshotStore, TypedLocalObjectReference,
    KIND_PERSISTENT_VOLUME_CLAIM,
};
use crate::error::SubmissionError;
use crate::metrics::record_submission;
use crate::topology::VolumeTarget;

/// DNS-subdomain limit for object names.
pub const MAX_OBJECT_NAME_LEN: usize = 253;

pub const LABEL_SHARD: &str = "shardsnap.io/shard";
pub const LABEL_ORDINAL: &str = "shardsnap.io/ordinal";
pub const LABEL_RUN: &str = "shardsnap.io/run";

/// Tracking identity of a submitted snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHandle {
    pub id: ObjectRef,
    pub target: VolumeTarget,
    pub submitted_at: SystemTime,
}

pub fn snapshot_name(target: &VolumeTarget, token: &str) -> String {
    format!("{}-{}", target.volume_name, token)
}

/// Build the VolumeSnapshot definition for `target`.
pub fn build_request(
    target: &VolumeTarget,
    token: &str,
    namespace: &str,
    snapshot_class: &str,
) -> SnapshotRequest {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_SHARD.to_string(), target.shard.clone());
    labels.insert(LABEL_ORDINAL.to_string(), target.ordinal.to_string());
    labels.insert(LABEL_RUN.to_string(), token.to_string());

    SnapshotRequest {
        metadata: ObjectMeta {
            name: snapshot_name(target, token),
            namespace: namespace.to_string(),
            labels,
        },
        spec: SnapshotSpec {
            volume_snapshot_class_name: snapshot_class.to_string(),
            source: TypedLocalObjectReference {
                kind: KIND_PERSISTENT_VOLUME_CLAIM.to_string(),
                name: target.volume_name.clone(),
            },
        },
    }
}

/// Submit a snapshot request for `target`; the storage driver takes it from there.
pub fn request(
    store: &dyn SnapshotStore,
    target: &VolumeTarget,
    token: &str,
    namespace: &str,
    snapshot_class: &str,
) -> Result<SnapshotHandle, SubmissionError> {
    let req = build_request(target, token, namespace, snapshot_class);
    let name = &req.metadata.name;
    if name.len() > MAX_OBJECT_NAME_LEN {
        record_submission(false);
        return Err(SubmissionError::NameTooLong {
            name: name.clone(),
            len: name.len(),
            limit: MAX_OBJECT_NAME_LEN,
        });
    }

    match store.create(&req) {
        Ok(id) => {
            record_submission(true);
            debug!("request: created {} for volume {}", id, target.volume_name);
            Ok(SnapshotHandle {
                id,
                target: target.clone(),
                submitted_at: SystemTime::now(),
            })
        }
        Err(cause) => {
            record_submission(false);
            warn!("request: create {}/{} rejected: {}", namespace, name, cause);
            Err(SubmissionError::Rejected {
                namespace: namespace.to_string(),
                name: name.clone(),
                cause,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::MemoryCluster;
    use crate::error::ClusterError;

    fn target(volume: &str) -> VolumeTarget {
        VolumeTarget {
            volume_name: volume.to_string(),
            shard: "shard0".to_string(),
            ordinal: 0,
            template: "data".to_string(),
        }
    }

    #[test]
    fn request_definition_points_at_claim() {
        let r = build_request(&target("data-shard0-0"), "1700000000", "db", "csi-snap");
        assert_eq!(r.metadata.name, "data-shard0-0-1700000000");
        assert_eq!(r.metadata.namespace, "db");
        assert_eq!(r.spec.volume_snapshot_class_name, "csi-snap");
        assert_eq!(r.spec.source.kind, "PersistentVolumeClaim");
        assert_eq!(r.spec.source.name, "data-shard0-0");
        assert_eq!(r.metadata.labels.get(LABEL_RUN).map(String::as_str), Some("1700000000"));
        assert_eq!(r.metadata.labels.get(LABEL_SHARD).map(String::as_str), Some("shard0"));
    }

    #[test]
    fn duplicate_name_is_a_submission_error() {
        let c = MemoryCluster::new();
        let t = target("data-shard0-0");
        let h = request(&c, &t, "42", "db", "cls").unwrap();
        assert_eq!(h.id, ObjectRef::new("db", "data-shard0-0-42"));
        assert_eq!(h.target, t);

        let err = request(&c, &t, "42", "db", "cls").unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::Rejected { cause: ClusterError::AlreadyExists { .. }, .. }
        ));
        assert_eq!(c.create_calls(), 2);
    }

    #[test]
    fn overlong_name_never_reaches_the_store() {
        let c = MemoryCluster::new();
        let long = "v".repeat(MAX_OBJECT_NAME_LEN);
        let err = request(&c, &target(&long), "1", "db", "cls").unwrap_err();
        assert!(matches!(err, SubmissionError::NameTooLong { limit: MAX_OBJECT_NAME_LEN, .. }));
        assert_eq!(c.create_calls(), 0);
    }
}
