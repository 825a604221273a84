//! MemoryCluster: in-memory control plane with scripted driver behaviour.
//!
//! Readiness is scripted per source volume (the snapshot name carries the run token,
//! which callers usually do not know up front). Each `get()` counts as one poll.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::error::ClusterError;

use super::{
    ObjectRef, SnapshotRequest, SnapshotStatus, SnapshotStore, WorkloadSpec, WorkloadSpecReader,
    KIND_STATEFULSET, KIND_VOLUME_SNAPSHOT,
};

/// Scripted storage-driver behaviour for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The n-th poll (1-based) observes readyToUse=true.
    AfterPolls(u32),
    /// The n-th poll observes a driver error with the given message.
    FailAfterPolls(u32, String),
    /// Stays pending forever.
    Never,
}

#[derive(Debug)]
struct StoredObject {
    request: SnapshotRequest,
    readiness: Readiness,
    polls: u32,
}

#[derive(Debug)]
struct Inner {
    workloads: HashMap<(String, String), WorkloadSpec>,
    objects: BTreeMap<ObjectRef, StoredObject>,
    created: Vec<ObjectRef>,
    default_readiness: Readiness,
    readiness_by_volume: HashMap<String, Readiness>,
    create_failures: HashMap<String, ClusterError>,
    spec_reads: u64,
    create_calls: u64,
    get_calls: u64,
}

#[derive(Debug)]
pub struct MemoryCluster {
    inner: Mutex<Inner>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    /// Empty cluster; snapshots become ready on the first poll unless scripted otherwise.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                workloads: HashMap::new(),
                objects: BTreeMap::new(),
                created: Vec::new(),
                default_readiness: Readiness::AfterPolls(1),
                readiness_by_volume: HashMap::new(),
                create_failures: HashMap::new(),
                spec_reads: 0,
                create_calls: 0,
                get_calls: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a panicking test thread must not hide the state from the others
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_workload(&self, namespace: &str, spec: WorkloadSpec) {
        self.lock()
            .workloads
            .insert((namespace.to_string(), spec.name.clone()), spec);
    }

    pub fn set_default_readiness(&self, readiness: Readiness) {
        self.lock().default_readiness = readiness;
    }

    /// Script the driver for snapshots whose source is `volume`.
    pub fn set_readiness(&self, volume: &str, readiness: Readiness) {
        self.lock()
            .readiness_by_volume
            .insert(volume.to_string(), readiness);
    }

    /// Reject every create() whose source is `volume` with `err`.
    pub fn fail_create(&self, volume: &str, err: ClusterError) {
        self.lock().create_failures.insert(volume.to_string(), err);
    }

    /// Pre-existing object (e.g. left over from an earlier run with the same token).
    pub fn seed_snapshot(&self, request: SnapshotRequest) {
        let mut g = self.lock();
        let readiness = g.default_readiness.clone();
        g.objects.insert(
            request.object_ref(),
            StoredObject {
                request,
                readiness,
                polls: 0,
            },
        );
    }

    /// Objects created through `create()`, in creation order.
    pub fn created(&self) -> Vec<ObjectRef> {
        self.lock().created.clone()
    }

    pub fn request_of(&self, id: &ObjectRef) -> Option<SnapshotRequest> {
        self.lock().objects.get(id).map(|o| o.request.clone())
    }

    pub fn polls_of(&self, id: &ObjectRef) -> u32 {
        self.lock().objects.get(id).map(|o| o.polls).unwrap_or(0)
    }

    pub fn spec_reads(&self) -> u64 {
        self.lock().spec_reads
    }

    pub fn create_calls(&self) -> u64 {
        self.lock().create_calls
    }

    pub fn get_calls(&self) -> u64 {
        self.lock().get_calls
    }

    /// Drop an object, as an external cleanup would.
    pub fn delete(&self, id: &ObjectRef) -> bool {
        self.lock().objects.remove(id).is_some()
    }
}

impl WorkloadSpecReader for MemoryCluster {
    fn get_workload_spec(&self, namespace: &str, name: &str) -> Result<WorkloadSpec, ClusterError> {
        let mut g = self.lock();
        g.spec_reads += 1;
        g.workloads
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: KIND_STATEFULSET,
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}

impl SnapshotStore for MemoryCluster {
    fn create(&self, request: &SnapshotRequest) -> Result<ObjectRef, ClusterError> {
        let mut g = self.lock();
        g.create_calls += 1;

        if let Some(err) = g.create_failures.get(request.source_volume()) {
            return Err(err.clone());
        }
        let id = request.object_ref();
        if g.objects.contains_key(&id) {
            return Err(ClusterError::AlreadyExists {
                kind: KIND_VOLUME_SNAPSHOT,
                namespace: id.namespace,
                name: id.name,
            });
        }

        let readiness = g
            .readiness_by_volume
            .get(request.source_volume())
            .cloned()
            .unwrap_or_else(|| g.default_readiness.clone());
        g.objects.insert(
            id.clone(),
            StoredObject {
                request: request.clone(),
                readiness,
                polls: 0,
            },
        );
        g.created.push(id.clone());
        Ok(id)
    }

    fn get(&self, id: &ObjectRef) -> Result<SnapshotStatus, ClusterError> {
        let mut g = self.lock();
        g.get_calls += 1;

        let obj = g.objects.get_mut(id).ok_or_else(|| ClusterError::NotFound {
            kind: KIND_VOLUME_SNAPSHOT,
            namespace: id.namespace.clone(),
            name: id.name.clone(),
        })?;
        obj.polls = obj.polls.saturating_add(1);

        let status = match &obj.readiness {
            Readiness::AfterPolls(n) if obj.polls >= *n => SnapshotStatus::ready(),
            Readiness::FailAfterPolls(n, msg) if obj.polls >= *n => SnapshotStatus::failed(msg.clone()),
            _ => SnapshotStatus::pending(),
        };
        Ok(status)
    }
}
