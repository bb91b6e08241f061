pub mod clienv;
pub mod completions;
pub mod control;
pub mod error;
pub mod logging;
pub mod provision;
pub mod readiness;
pub mod router;
pub mod supervisor;
pub mod system;
pub mod torrc;
pub mod user_config;

pub use control::{AuthCookie, AuthenticatedChannel, ControlEndpoint};
pub use error::{ErrorKind, Result, TorError};
pub use provision::{BinaryProvisioner, ExpertBundle, Platform};
pub use readiness::PollPolicy;
pub use router::{ConnectOptions, ConnectPhase, Strategy, TorConnector};
pub use supervisor::{DaemonHandle, DaemonState, Supervisor};

/// Connect with `options` using a fresh connector for the current directory.
///
/// The returned connector owns the launched tor, if any; keep it alive as
/// long as the daemon is needed.
pub async fn connect(options: &ConnectOptions) -> Result<(TorConnector, AuthenticatedChannel)> {
    let connector = TorConnector::from_env()?;
    let channel = connector.connect(options).await?;
    Ok((connector, channel))
}
