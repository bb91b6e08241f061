use crate::error::{Result, TorError};
use crate::torrc::{RuntimeConfig, StateDir};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Grace period between SIGTERM and SIGKILL on shutdown
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    /// Launched, control port not yet confirmed
    Spawning,
    Running,
    Exited,
}

/// The one tor process a [`Supervisor`] owns.
#[derive(Debug)]
pub struct DaemonHandle {
    pub state: DaemonState,
    pub binary: PathBuf,
    pub state_dir: StateDir,
    pub started_at: Instant,
    process: Child,
}

impl DaemonHandle {
    pub fn pid(&self) -> Option<u32> {
        self.process.id()
    }

    pub fn is_live(&self) -> bool {
        self.state != DaemonState::Exited
    }

    /// Check with the OS whether the child is still there.
    fn refresh(&mut self) {
        if self.state == DaemonState::Exited {
            return;
        }
        match self.process.try_wait() {
            Ok(Some(status)) => {
                warn!("tor (binary {}) exited: {}", self.binary.display(), status);
                self.state = DaemonState::Exited;
            }
            Ok(None) => {}
            Err(e) => {
                error!("Failed to query tor process status: {}", e);
                self.state = DaemonState::Exited;
            }
        }
    }
}

/// Owns at most one tor child process.
///
/// The child is spawned with `kill_on_drop`, and tor is told to watch the
/// host pid via `__OwningControllerProcess`, so it does not outlive its
/// owner either way.
#[derive(Debug, Default)]
pub struct Supervisor {
    daemon: Option<DaemonHandle>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self { daemon: None }
    }

    /// The live daemon, if any. An exited daemon is forgotten here.
    pub fn live(&mut self) -> Option<&DaemonHandle> {
        if let Some(daemon) = self.daemon.as_mut() {
            daemon.refresh();
        }
        if self.daemon.as_ref().is_some_and(|d| !d.is_live()) {
            self.daemon = None;
        }
        self.daemon.as_ref()
    }

    /// Launch `binary` with `config`.
    ///
    /// Only one daemon may be supervised at a time; callers that might find
    /// one running go through [`Supervisor::live`] first.
    pub fn spawn(&mut self, binary: &Path, config: &RuntimeConfig) -> Result<&DaemonHandle> {
        if let Some(running) = self.live() {
            return Err(TorError::AlreadySupervising { pid: running.pid() });
        }

        config.state_dir.clear_published()?;

        let mut cmd = Command::new(binary);
        cmd.arg("-f")
            .arg(&config.torrc_path)
            .arg("__OwningControllerProcess")
            .arg(std::process::id().to_string());
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to start tor from {}: {}", binary.display(), e);
                return Err(TorError::BinaryNotFound {
                    path: binary.to_path_buf(),
                    source: e,
                });
            }
        };

        info!("Started tor {} with PID {:?}", binary.display(), child.id());
        spawn_log_readers(&mut child);

        let daemon = self.daemon.insert(DaemonHandle {
            state: DaemonState::Spawning,
            binary: binary.to_path_buf(),
            state_dir: config.state_dir.clone(),
            started_at: Instant::now(),
            process: child,
        });
        Ok(&*daemon)
    }

    /// Record that the daemon's control port came up.
    pub fn mark_running(&mut self) {
        if let Some(daemon) = self.daemon.as_mut() {
            if daemon.state == DaemonState::Spawning {
                daemon.state = DaemonState::Running;
            }
        }
    }

    /// Stop the daemon: SIGTERM first (Unix), SIGKILL if it lingers.
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(mut daemon) = self.daemon.take() else {
            return Ok(());
        };
        daemon.refresh();
        if daemon.state == DaemonState::Exited {
            return Ok(());
        }

        info!(
            "Stopping tor (PID {:?}, up {:.1?})",
            daemon.pid(),
            daemon.started_at.elapsed()
        );

        #[cfg(unix)]
        {
            if let Some(pid) = daemon.process.id() {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }
        }
        #[cfg(not(unix))]
        {
            daemon.process.start_kill()?;
        }

        match tokio::time::timeout(STOP_TIMEOUT, daemon.process.wait()).await {
            Ok(_) => debug!("tor stopped"),
            Err(_) => {
                warn!("tor did not stop in time, force killing");
                daemon.process.kill().await?;
            }
        }

        Ok(())
    }
}

/// Forward tor's stdout/stderr lines into the log under the `tor` target.
fn spawn_log_readers(child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "tor", "{}", line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(target: "tor", "{}", line);
            }
        });
    }
}
