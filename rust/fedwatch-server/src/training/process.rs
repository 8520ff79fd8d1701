//! Child processes of a training run.

use std::{
    path::Path,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use futures::FutureExt;
use tokio::{
    process::{Child, Command},
    time,
};
use tracing::{debug, info, warn};

use super::TrainingError;

/// Substitutes `{name}` placeholders in every argument of a command template.
pub fn render_command(template: &[String], vars: &[(&str, String)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |arg, (name, value)| {
                arg.replace(&format!("{{{}}}", name), value)
            })
        })
        .collect()
}

/// A launched server or client process.
#[derive(Debug)]
pub struct Process {
    name: String,
    child: Child,
    status: Option<ExitStatus>,
}

impl Process {
    /// Launches `command`. The process is killed when the handle is dropped.
    pub fn spawn(
        name: impl Into<String>,
        command: &[String],
        working_dir: Option<&Path>,
    ) -> Result<Self, TrainingError> {
        let name = name.into();
        let (program, args) = command.split_first().ok_or_else(|| TrainingError::Spawn {
            command: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        let child = cmd.spawn().map_err(|source| TrainingError::Spawn {
            command: command.join(" "),
            source,
        })?;
        info!("started {} (pid {}): {}", name, child.id(), command.join(" "));
        Ok(Self {
            name,
            child,
            status: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the exit status if the process has exited, without waiting.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        if self.status.is_none() {
            match (&mut self.child).now_or_never() {
                Some(Ok(status)) => {
                    debug!("{} exited with {}", self.name, status);
                    self.status = Some(status);
                }
                Some(Err(err)) => warn!("failed to check {}: {}", self.name, err),
                None => {}
            }
        }
        self.status
    }

    pub fn is_running(&mut self) -> bool {
        self.exit_status().is_none()
    }

    /// Kills the process and waits at most `timeout` for it to exit.
    pub async fn terminate(mut self, timeout: Duration) {
        if !self.is_running() {
            return;
        }
        info!("terminating {}", self.name);
        if let Err(err) = self.child.kill() {
            warn!("failed to kill {}: {}", self.name, err);
        }
        match time::timeout(timeout, &mut self.child).await {
            Ok(Ok(status)) => debug!("{} exited with {}", self.name, status),
            Ok(Err(err)) => warn!("failed to wait for {}: {}", self.name, err),
            Err(_) => warn!("{} did not exit within {:?}", self.name, timeout),
        }
    }
}
