//! Command implementations behind the `shardsnap` binary.
//!
//! Живут в библиотеке, чтобы правила команд (слои конфига, выбор fence, код выхода)
//! тестировались из tests/ без запуска процесса.

pub mod backup;
pub mod inspect;

pub use backup::{build_fence, check_run, cmd_backup, layered_config, BackupArgs};
pub use inspect::cmd_inspect;
