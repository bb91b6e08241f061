//! Waiting for a freshly spawned tor to publish its control port.
//!
//! tor writes `control-port` once its control listener is bound, and the
//! auth cookie alongside it; the process API gives no other readiness
//! signal, so both files are polled.

use crate::control::{AuthCookie, ControlEndpoint};
use crate::error::{Result, TorError};
use crate::torrc::StateDir;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, trace};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 50;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Bounded, fixed-interval retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl PollPolicy {
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Run `probe` until it yields a value or the policy is exhausted.
///
/// Returns the value together with the 1-based attempt that produced it, or
/// `None` after exactly `max_attempts` probes. There is no sleep after the
/// final attempt.
pub async fn poll_until<T, F, Fut>(policy: PollPolicy, mut probe: F) -> Option<(T, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 1..=policy.max_attempts {
        if let Some(value) = probe(attempt).await {
            return Some((value, attempt));
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    None
}

/// Read the published endpoint, treating absence or garbage as "not yet".
pub async fn read_control_endpoint(state_dir: &StateDir) -> Option<ControlEndpoint> {
    let path = state_dir.control_port_file();
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => match contents.parse() {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                trace!("control-port not parseable yet: {}", e);
                None
            }
        },
        Err(_) => None,
    }
}

/// Endpoint and cookie of one tor, or `None` until both are written.
///
/// tor writes `control-port` and the cookie separately; a missing or empty
/// cookie next to a valid endpoint is still "not ready".
pub async fn read_published(state_dir: &StateDir) -> Option<(ControlEndpoint, AuthCookie)> {
    let endpoint = read_control_endpoint(state_dir).await?;
    match AuthCookie::read(&state_dir.cookie_file()).await {
        Ok(cookie) if !cookie.is_empty() => Some((endpoint, cookie)),
        Ok(_) => {
            trace!("Auth cookie is empty");
            None
        }
        Err(e) => {
            trace!("Auth cookie not readable yet: {}", e);
            None
        }
    }
}

/// Wait until tor has published both a usable `control-port` file and its
/// auth cookie.
pub async fn await_published(
    state_dir: &StateDir,
    policy: PollPolicy,
) -> Result<(ControlEndpoint, AuthCookie)> {
    debug!(
        dir = %state_dir.root().display(),
        attempts = policy.max_attempts,
        "Waiting for tor control port"
    );

    let outcome = poll_until(policy, |attempt| async move {
        trace!(attempt, "Polling control-port and cookie");
        read_published(state_dir).await
    })
    .await;

    match outcome {
        Some(((endpoint, cookie), attempt)) => {
            debug!("Control port {} published after {} attempt(s)", endpoint, attempt);
            Ok((endpoint, cookie))
        }
        None => Err(TorError::Timeout {
            state_dir: state_dir.root().to_path_buf(),
            attempts: policy.max_attempts,
            waited: policy.budget(),
        }),
    }
}
