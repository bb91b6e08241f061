//! Choosing how to reach tor and driving the launch to an authenticated
//! control connection.
//!
//! One [`TorConnector`] owns the [`Supervisor`] for its host. Calls to
//! [`TorConnector::connect`] are serialized: a call that arrives while
//! another is spawning waits, then finds the daemon live and reuses it.
//!
//! ```text
//! Idle -> Spawning -> AwaitingReady -> Authenticating -> Ready
//! Idle -> Authenticating              (reuse, system)
//! any stage -> Failed;  Ready | Failed -> Idle on the next call
//! ```

use crate::clienv;
use crate::control::{authenticate, AuthenticatedChannel};
use crate::error::{Result, TorError};
use crate::provision::{BinaryProvisioner, ExpertBundle, Platform};
use crate::readiness::{await_published, read_published, PollPolicy};
use crate::supervisor::Supervisor;
use crate::system::SystemDaemon;
use crate::torrc::{write_config, StateDir};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// Per-call connection options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Explicit tor binary; overrides provisioning
    pub tor: Option<PathBuf>,
    /// Talk to the system-wide tor service instead of launching one
    #[serde(alias = "useSystem")]
    pub use_system: bool,
    /// Don't look for a newer bundle if one is installed
    #[serde(alias = "noUpdate")]
    pub no_update: bool,
}

/// How a single connect call reaches tor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Authenticate against the daemon already supervised
    Reuse,
    /// Launch this binary
    Explicit(PathBuf),
    /// Use the system service
    System,
    /// Obtain a binary from the provisioner, then launch it
    Provision,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Reuse => "reuse",
            Self::Explicit(_) => "explicit",
            Self::System => "system",
            Self::Provision => "provision",
        }
    }
}

/// First matching rule wins; there is no fallback between strategies.
pub fn select_strategy(options: &ConnectOptions, env_tor: Option<PathBuf>, daemon_live: bool) -> Strategy {
    if daemon_live {
        return Strategy::Reuse;
    }
    if let Some(binary) = options.tor.clone().or(env_tor) {
        return Strategy::Explicit(binary);
    }
    if options.use_system {
        return Strategy::System;
    }
    Strategy::Provision
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPhase {
    Idle,
    Spawning,
    AwaitingReady,
    Authenticating,
    Ready,
    Failed,
}

impl ConnectPhase {
    pub fn can_transition_to(self, next: ConnectPhase) -> bool {
        use ConnectPhase::*;
        matches!(
            (self, next),
            (Idle, Spawning)
                | (Idle, Authenticating)
                | (Idle, Failed)
                | (Spawning, AwaitingReady)
                | (Spawning, Failed)
                | (AwaitingReady, Authenticating)
                | (AwaitingReady, Failed)
                | (Authenticating, Ready)
                | (Authenticating, Failed)
                | (Ready, Idle)
                | (Failed, Idle)
        )
    }
}

pub struct TorConnector {
    working_dir: PathBuf,
    /// Fixed replacement for the `tor` environment variable
    env_tor: Option<Option<PathBuf>>,
    provisioner: Box<dyn BinaryProvisioner>,
    system: SystemDaemon,
    poll: PollPolicy,
    supervisor: Mutex<Supervisor>,
    phase: watch::Sender<ConnectPhase>,
}

impl TorConnector {
    pub fn new(working_dir: impl Into<PathBuf>, provisioner: Box<dyn BinaryProvisioner>) -> Self {
        let (phase, _) = watch::channel(ConnectPhase::Idle);
        Self {
            working_dir: working_dir.into(),
            env_tor: None,
            provisioner,
            system: SystemDaemon::default(),
            poll: PollPolicy::default(),
            supervisor: Mutex::new(Supervisor::new()),
            phase,
        }
    }

    /// Current directory as working directory, expert bundle provisioning.
    pub fn from_env() -> Result<Self> {
        let working_dir = std::env::current_dir()?;
        Ok(Self::new(working_dir, Box::new(ExpertBundle::from_env()?)))
    }

    /// Use `binary` instead of reading the `tor` environment variable on
    /// each connect.
    pub fn with_env_tor(mut self, binary: Option<PathBuf>) -> Self {
        self.env_tor = Some(binary);
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_system_daemon(mut self, system: SystemDaemon) -> Self {
        self.system = system;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn state_dir(&self) -> StateDir {
        StateDir::for_working_dir(&self.working_dir)
    }

    pub fn phase(&self) -> ConnectPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<ConnectPhase> {
        self.phase.subscribe()
    }

    /// PID of the supervised tor, if one is running.
    pub async fn daemon_pid(&self) -> Option<u32> {
        let mut supervisor = self.supervisor.lock().await;
        supervisor.live().and_then(|d| d.pid())
    }

    /// Binary from the `tor` environment variable, read at call time.
    fn env_tor(&self) -> Option<PathBuf> {
        match &self.env_tor {
            Some(binary) => binary.clone(),
            None => clienv::tor_binary(),
        }
    }

    fn advance(&self, next: ConnectPhase) {
        let current = self.phase();
        if !current.can_transition_to(next) {
            warn!("Unexpected connect phase change {:?} -> {:?}", current, next);
            debug_assert!(false, "invalid phase transition {:?} -> {:?}", current, next);
        }
        debug!("Connect phase {:?} -> {:?}", current, next);
        self.phase.send_replace(next);
    }

    /// Reach tor by exactly one strategy and return an authenticated control
    /// connection, or `Unavailable` carrying the stage that failed.
    pub async fn connect(&self, options: &ConnectOptions) -> Result<AuthenticatedChannel> {
        let mut supervisor = self.supervisor.lock().await;

        if matches!(self.phase(), ConnectPhase::Ready | ConnectPhase::Failed) {
            self.advance(ConnectPhase::Idle);
        }

        let live = supervisor.live().is_some();
        let strategy = select_strategy(options, self.env_tor(), live);
        info!("Connecting to tor via {} strategy", strategy.name());

        let outcome = self.run(&mut supervisor, &strategy, options).await;

        match outcome {
            Ok(channel) => {
                self.advance(ConnectPhase::Ready);
                Ok(channel)
            }
            Err(e) => {
                error!("Failed to connect to tor ({}): {}", strategy.name(), e);
                self.advance(ConnectPhase::Failed);
                Err(TorError::Unavailable {
                    strategy: strategy.name(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Stop the supervised daemon, if any.
    pub async fn shutdown(&self) -> Result<()> {
        self.supervisor.lock().await.shutdown().await
    }

    async fn run(
        &self,
        supervisor: &mut Supervisor,
        strategy: &Strategy,
        options: &ConnectOptions,
    ) -> Result<AuthenticatedChannel> {
        match strategy {
            Strategy::Reuse => {
                let state_dir = supervisor
                    .live()
                    .map(|daemon| daemon.state_dir.clone())
                    .ok_or_else(|| TorError::connection_failed("supervised tor", "daemon exited"))?;
                self.advance(ConnectPhase::Authenticating);
                self.reauthenticate(&state_dir).await
            }
            Strategy::System => {
                self.advance(ConnectPhase::Authenticating);
                self.system.connect().await
            }
            Strategy::Explicit(binary) => self.launch(supervisor, binary).await,
            Strategy::Provision => {
                let platform = Platform::current().ok_or_else(|| TorError::ProvisioningFailed {
                    platform: std::env::consts::OS.to_string(),
                })?;
                let binary = self
                    .provisioner
                    .acquire(platform, !options.no_update)
                    .await
                    .ok_or_else(|| TorError::ProvisioningFailed {
                        platform: platform.to_string(),
                    })?;
                self.launch(supervisor, &binary).await
            }
        }
    }

    /// Write config, spawn, wait for the control port, authenticate.
    async fn launch(&self, supervisor: &mut Supervisor, binary: &Path) -> Result<AuthenticatedChannel> {
        self.advance(ConnectPhase::Spawning);
        let config = write_config(&self.working_dir)?;
        supervisor.spawn(binary, &config)?;

        self.advance(ConnectPhase::AwaitingReady);
        let outcome = async {
            let (endpoint, cookie) = await_published(&config.state_dir, self.poll).await?;
            supervisor.mark_running();

            self.advance(ConnectPhase::Authenticating);
            authenticate(&endpoint, &cookie).await
        }
        .await;

        if outcome.is_err() {
            if let Err(e) = supervisor.shutdown().await {
                warn!("Failed to stop tor after unsuccessful launch: {}", e);
            }
        }
        outcome
    }

    /// Re-read what the running daemon published and authenticate again.
    async fn reauthenticate(&self, state_dir: &StateDir) -> Result<AuthenticatedChannel> {
        let (endpoint, cookie) = read_published(state_dir).await.ok_or_else(|| {
            TorError::connection_failed(
                state_dir.control_port_file().display(),
                "running tor has no readable control-port file or cookie",
            )
        })?;
        authenticate(&endpoint, &cookie).await
    }
}
