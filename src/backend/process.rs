//! Backend process spawned in its own process group

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::backend::traits::ProcessSupervisor;
use crate::config::BackendConfig;
use crate::error::{AppError, Result};

/// The WebUI process and everything it forks.
///
/// The child becomes the leader of a new process group, so terminating the
/// group also takes down the python workers it starts.
pub struct ProcessGroup {
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
    child: Mutex<Option<Child>>,
    running: AtomicBool,
}

impl ProcessGroup {
    pub fn new(command: impl Into<String>, args: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: working_dir.into(),
            child: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone(), config.working_dir.clone())
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProcessSupervisor for ProcessGroup {
    async fn spawn(&self) -> Result<()> {
        let mut slot = self.child.lock().await;

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(false);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| {
            AppError::Process(format!(
                "Failed to spawn '{}' in {}: {}",
                self.command,
                self.working_dir.display(),
                e
            ))
        })?;

        info!(pid = ?child.id(), command = %self.command, "Spawned backend process");
        *slot = Some(child);
        self.set_running(true);
        Ok(())
    }

    async fn terminate(&self) {
        let mut slot = self.child.lock().await;
        self.set_running(false);

        let Some(mut child) = slot.take() else {
            debug!("No backend process to stop");
            return;
        };
        let pid = child.id();

        match child.try_wait() {
            Ok(Some(status)) => {
                info!(pid = ?pid, status = %status, "Backend process is not running");
                return;
            }
            Ok(None) => {}
            Err(e) if is_no_child(&e) => {
                warn!(pid = ?pid, error = %e, "Backend process already reaped");
                return;
            }
            Err(e) => {
                error!(pid = ?pid, error = %e, "Unexpected error checking backend process");
            }
        }

        signal_group(&mut child, pid);

        match child.wait().await {
            Ok(status) => info!(pid = ?pid, status = %status, "Backend process stopped"),
            Err(e) if is_no_child(&e) => {
                warn!(pid = ?pid, error = %e, "Backend process already reaped")
            }
            Err(e) => error!(pid = ?pid, error = %e, "Unexpected error stopping backend process"),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(unix)]
fn signal_group(_child: &mut Child, pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };

    match killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => debug!(pgid = pid, "Sent SIGTERM to backend process group"),
        Err(Errno::ESRCH) => warn!(pgid = pid, "Backend process group already gone"),
        Err(e) => error!(pgid = pid, error = %e, "Unexpected error signalling backend process group"),
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, pid: Option<u32>) {
    if let Err(e) = child.start_kill() {
        warn!(pid = ?pid, error = %e, "Failed to kill backend process");
    }
}

#[cfg(unix)]
fn is_no_child(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(nix::libc::ECHILD)
}

#[cfg(not(unix))]
fn is_no_child(_e: &std::io::Error) -> bool {
    false
}
