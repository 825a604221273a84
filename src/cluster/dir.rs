//! DirCluster: file-backed control-plane state.
//!
//! Раскладка каталога состояния кластера:
//!
//! ```text
//! <root>/namespaces/<ns>/LOCK
//! <root>/namespaces/<ns>/statefulsets/<name>.json      WorkloadSpec
//! <root>/namespaces/<ns>/volumesnapshots/<name>.json   StoredSnapshot (request + status)
//! <root>/volumesnapshotclasses/<class>.json            (optional) known classes
//! ```
//!
//! Объекты пишутся через tmp + rename, создание снапшота идёт с семантикой create_new
//! (повтор имени -> AlreadyExists). Все записи берут эксклюзивный lock namespace-каталога,
//! чтения статуса берут shared lock, так что драйвер-шим, обновляющий status, не даёт рваных чтений.
//!
//! Если каталог volumesnapshotclasses/ существует, create() отклоняет неизвестный класс
//! (аналог admission-проверки); если каталога нет, класс не проверяется.

use anyhow::{anyhow, Context, Result};
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::ClusterError;
use crate::lock::{acquire_exclusive_lock, acquire_shared_lock};

use super::{
    ObjectRef, SnapshotRequest, SnapshotStatus, SnapshotStore, WorkloadSpec, WorkloadSpecReader,
    KIND_STATEFULSET, KIND_VOLUME_SNAPSHOT,
};

const NAMESPACES_DIR: &str = "namespaces";
const STATEFULSETS_DIR: &str = "statefulsets";
const VOLUME_SNAPSHOTS_DIR: &str = "volumesnapshots";
const SNAPSHOT_CLASSES_DIR: &str = "volumesnapshotclasses";

/// A snapshot object as persisted: the submitted request plus driver status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    #[serde(flatten)]
    pub request: SnapshotRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SnapshotStatus>,
}

#[derive(Debug, Clone)]
pub struct DirCluster {
    root: PathBuf,
}

impl DirCluster {
    /// Open an existing cluster state directory.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(anyhow!(
                "cluster state directory {} does not exist",
                root.display()
            ));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Create (if needed) and open a cluster state directory.
    pub fn init(root: &Path) -> Result<Self> {
        fs::create_dir_all(root.join(NAMESPACES_DIR))
            .with_context(|| format!("create cluster state dir {}", root.display()))?;
        Self::open(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(NAMESPACES_DIR).join(namespace)
    }

    pub fn statefulset_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(STATEFULSETS_DIR)
            .join(format!("{name}.json"))
    }

    pub fn snapshot_path(&self, id: &ObjectRef) -> PathBuf {
        self.namespace_dir(&id.namespace)
            .join(VOLUME_SNAPSHOTS_DIR)
            .join(format!("{}.json", id.name))
    }

    fn classes_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOT_CLASSES_DIR)
    }

    /// Register (or overwrite) a workload spec.
    pub fn put_workload(&self, namespace: &str, spec: &WorkloadSpec) -> Result<(), ClusterError> {
        check_name(namespace)?;
        check_name(&spec.name)?;
        let _lock = acquire_exclusive_lock(&self.namespace_dir(namespace))?;
        write_json_atomic(&self.statefulset_path(namespace, &spec.name), spec)
    }

    /// Register a VolumeSnapshotClass; enables class validation on create.
    pub fn put_snapshot_class(&self, name: &str) -> Result<(), ClusterError> {
        check_name(name)?;
        let dir = self.classes_dir();
        fs::create_dir_all(&dir)?;
        write_json_atomic(
            &dir.join(format!("{name}.json")),
            &serde_json::json!({ "name": name }),
        )
    }

    /// Publish driver status for a snapshot object (storage-driver shim entry point).
    pub fn set_status(&self, id: &ObjectRef, status: &SnapshotStatus) -> Result<(), ClusterError> {
        check_name(&id.namespace)?;
        check_name(&id.name)?;
        let _lock = acquire_exclusive_lock(&self.namespace_dir(&id.namespace))?;
        let path = self.snapshot_path(id);
        let mut stored: StoredSnapshot = read_json(&path, KIND_VOLUME_SNAPSHOT, id)?;
        stored.status = Some(status.clone());
        write_json_atomic(&path, &stored)
    }

    /// Read a full snapshot object (request + status).
    pub fn read_snapshot(&self, id: &ObjectRef) -> Result<StoredSnapshot, ClusterError> {
        check_name(&id.namespace)?;
        check_name(&id.name)?;
        let _lock = acquire_shared_lock(&self.namespace_dir(&id.namespace))?;
        read_json(&self.snapshot_path(id), KIND_VOLUME_SNAPSHOT, id)
    }

    /// Snapshot objects of a namespace, sorted by name.
    pub fn list_snapshots(&self, namespace: &str) -> Result<Vec<ObjectRef>, ClusterError> {
        check_name(namespace)?;
        let dir = self.namespace_dir(namespace).join(VOLUME_SNAPSHOTS_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for e in fs::read_dir(&dir)? {
            let p = e?.path();
            if p.extension().map(|ext| ext == "json").unwrap_or(false) {
                if let Some(stem) = p.file_stem().and_then(|s| s.to_str()) {
                    out.push(ObjectRef::new(namespace, stem));
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

impl WorkloadSpecReader for DirCluster {
    fn get_workload_spec(&self, namespace: &str, name: &str) -> Result<WorkloadSpec, ClusterError> {
        check_name(namespace)?;
        check_name(name)?;
        let _lock = acquire_shared_lock(&self.namespace_dir(namespace))?;
        let id = ObjectRef::new(namespace, name);
        read_json(&self.statefulset_path(namespace, name), KIND_STATEFULSET, &id)
    }
}

impl SnapshotStore for DirCluster {
    fn create(&self, request: &SnapshotRequest) -> Result<ObjectRef, ClusterError> {
        let id = request.object_ref();
        check_name(&id.namespace)?;
        check_name(&id.name)?;

        let class = &request.spec.volume_snapshot_class_name;
        check_name(class)?;
        let classes = self.classes_dir();
        if classes.is_dir() && !classes.join(format!("{class}.json")).exists() {
            return Err(ClusterError::Rejected(format!(
                "volumesnapshotclass '{class}' not found"
            )));
        }

        let _lock = acquire_exclusive_lock(&self.namespace_dir(&id.namespace))?;
        let path = self.snapshot_path(&id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let stored = StoredSnapshot {
            request: request.clone(),
            status: None,
        };
        let json = serde_json::to_string_pretty(&stored).map_err(|e| ClusterError::Malformed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut f = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ClusterError::AlreadyExists {
                    kind: KIND_VOLUME_SNAPSHOT,
                    namespace: id.namespace,
                    name: id.name,
                })
            }
            Err(e) => return Err(e.into()),
        };
        // no partially written object survives a failed create
        remove_on_err(&path, f.write_all(json.as_bytes()).and_then(|_| f.sync_all()))?;

        debug!("dir-cluster: created {} at {}", id, path.display());
        Ok(id)
    }

    fn get(&self, id: &ObjectRef) -> Result<SnapshotStatus, ClusterError> {
        let stored = self.read_snapshot(id)?;
        Ok(stored.status.unwrap_or_default())
    }
}

// ------------- helpers -------------

// Имена объектов становятся именами файлов: без разделителей и "..".
fn check_name(name: &str) -> Result<(), ClusterError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(ClusterError::Rejected(format!("invalid object name '{name}'")));
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(
    path: &Path,
    kind: &'static str,
    id: &ObjectRef,
) -> Result<T, ClusterError> {
    let buf = match fs::read_to_string(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ClusterError::NotFound {
                kind,
                namespace: id.namespace.clone(),
                name: id.name.clone(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&buf).map_err(|e| ClusterError::Malformed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ClusterError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|e| ClusterError::Malformed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let tmp = path.with_extension("tmp");
    {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        remove_on_err(&tmp, f.write_all(json.as_bytes()).and_then(|_| f.flush()))?;
    }
    remove_on_err(&tmp, fs::rename(&tmp, path))?;
    Ok(())
}

/// Drop `path` when `res` failed, then pass `res` through.
fn remove_on_err<T>(path: &Path, res: io::Result<T>) -> io::Result<T> {
    if res.is_err() {
        let _ = fs::remove_file(path);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_name_rejects_path_tricks() {
        assert!(check_name("data-shard0-0").is_ok());
        assert!(check_name("").is_err());
        assert!(check_name("..").is_err());
        assert!(check_name("a/b").is_err());
        assert!(check_name("a\\b").is_err());
    }

    #[test]
    fn failed_write_leaves_no_file_behind() -> Result<()> {
        let dir = std::env::temp_dir().join(format!(
            "sstest-dir-unit-{}-{}",
            std::process::id(),
            crate::util::unix_secs(std::time::SystemTime::now())
        ));
        fs::create_dir_all(&dir)?;
        let path = dir.join("data-shard0-0-1700000000.json");

        fs::write(&path, b"{")?;
        let res: io::Result<()> = Err(io::Error::new(ErrorKind::Other, "disk full"));
        assert!(remove_on_err(&path, res).is_err());
        assert!(!path.exists());

        fs::write(&path, b"{}")?;
        assert!(remove_on_err(&path, Ok(())).is_ok());
        assert!(path.exists());

        let _ = fs::remove_dir_all(&dir);
        Ok(())
    }
}
