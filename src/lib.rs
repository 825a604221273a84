#![allow(non_snake_case)]

// Базовые модули
pub mod config;
pub mod error;
pub mod metrics;
pub mod lock;
pub mod util;   // src/util/mod.rs

// Control plane: модель объектов + реализации (dir, memory)
pub mod cluster; // src/cluster/{mod,dir,memory}.rs

// Write fence (freeze/resume hooks)
pub mod fence;   // src/fence/mod.rs

// Пайплайн бэкапа
pub mod topology;
pub mod request;
pub mod waiter;
pub mod report;
pub mod orchestrator;

// Команды CLI (src/cli.rs + src/cli/{backup,inspect}.rs)
pub mod cli;

// Удобные реэкспорты
pub use cluster::dir::DirCluster;
pub use cluster::memory::{MemoryCluster, Readiness};
pub use cluster::{ObjectRef, SnapshotStore, WorkloadSpec, WorkloadSpecReader};
pub use config::BackupConfig;
pub use error::{BackupError, ClusterError, FenceError, SubmissionError, TopologyError, WaitError};
pub use fence::{CommandFence, PauseFence, WriteFence};
pub use orchestrator::{BackupRequest, BackupRun, Orchestrator};
pub use report::{BackupOutput, BackupReport, Phase, SnapshotOutcome};
pub use topology::{resolve, ReplicaScope, VolumeTarget};
pub use waiter::WaitPolicy;
