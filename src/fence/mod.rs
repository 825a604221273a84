//! fence: freeze/resume of the workload's write path.
//!
//! The orchestrator only sees [`WriteFence`]; hooks are injected so tests can count
//! calls and inject failures without real pauses.
//!
//! Реализации:
//! - CommandFence: запускает внешнюю команду для freeze и для resume (через `sh -c`);
//!   ненулевой код выхода -> FenceError::Exit.
//! - PauseFence: логирует и выдерживает паузу (поведение "заглушки" без реального механизма заморозки).

use log::{info, warn};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use crate::error::{FenceError, FenceStage};

/// Pause/restore of write activity on the workload.
pub trait WriteFence {
    fn freeze(&self) -> Result<(), FenceError>;
    fn resume(&self) -> Result<(), FenceError>;
}

impl<T: WriteFence + ?Sized> WriteFence for &T {
    fn freeze(&self) -> Result<(), FenceError> {
        (**self).freeze()
    }
    fn resume(&self) -> Result<(), FenceError> {
        (**self).resume()
    }
}

/// A shell command line run as a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookCommand {
    pub command_line: String,
}

impl HookCommand {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
        }
    }

    fn run(&self, stage: FenceStage) -> Result<(), FenceError> {
        let program = format!("sh -c {}", self.command_line);
        info!("{stage}: running hook `{}`", self.command_line);
        let status = Command::new("sh")
            .arg("-c")
            .arg(&self.command_line)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| FenceError::Spawn {
                stage,
                program: program.clone(),
                reason: e.to_string(),
            })?;
        if !status.success() {
            return Err(FenceError::Exit {
                stage,
                program,
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

/// Runs external commands for freeze and resume.
#[derive(Debug, Clone)]
pub struct CommandFence {
    freeze: HookCommand,
    resume: HookCommand,
}

impl CommandFence {
    pub fn new(freeze: HookCommand, resume: HookCommand) -> Self {
        Self { freeze, resume }
    }
}

impl WriteFence for CommandFence {
    fn freeze(&self) -> Result<(), FenceError> {
        self.freeze.run(FenceStage::Freeze)?;
        info!("database has been frozen successfully");
        Ok(())
    }

    fn resume(&self) -> Result<(), FenceError> {
        self.resume.run(FenceStage::Resume)?;
        info!("database has been resumed successfully");
        Ok(())
    }
}

/// Logs and sleeps for `pause` on each side of the fence.
#[derive(Debug, Clone)]
pub struct PauseFence {
    pause: Duration,
}

impl PauseFence {
    pub fn new(pause: Duration) -> Self {
        if pause.is_zero() {
            warn!("pause fence with zero pause: writes are not actually quiesced");
        }
        Self { pause }
    }
}

impl WriteFence for PauseFence {
    fn freeze(&self) -> Result<(), FenceError> {
        info!("freezing database ({:?})", self.pause);
        thread::sleep(self.pause);
        info!("database has been frozen successfully");
        Ok(())
    }

    fn resume(&self) -> Result<(), FenceError> {
        info!("resuming database ({:?})", self.pause);
        thread::sleep(self.pause);
        info!("database has been resumed successfully");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn command_fence_success_and_exit_code() {
        let ok = CommandFence::new(HookCommand::new("true"), HookCommand::new("exit 3"));
        assert!(ok.freeze().is_ok());

        let err = ok.resume().unwrap_err();
        assert_eq!(err.stage(), FenceStage::Resume);
        assert!(matches!(err, FenceError::Exit { .. }), "got {err:?}");
    }

    #[test]
    fn pause_fence_zero_is_immediate() {
        let f = PauseFence::new(Duration::ZERO);
        assert!(f.freeze().is_ok());
        assert!(f.resume().is_ok());
    }
}
