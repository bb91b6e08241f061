use std::path::PathBuf;

use connect_tor::user_config::UserConfig;
use connect_tor::{ConnectOptions, TorConnector};

pub(crate) async fn cmd_connect(
    tor: Option<PathBuf>,
    system: bool,
    no_update: bool,
    hold: bool,
) -> anyhow::Result<()> {
    let config = UserConfig::load()?;
    let options = config.connect_options(ConnectOptions {
        tor,
        use_system: system,
        no_update,
    });

    let connector = TorConnector::from_env()?.with_poll_policy(config.poll_policy());

    let channel = match connector.connect(&options).await {
        Ok(channel) => channel,
        Err(e) => {
            connector.shutdown().await.ok();
            return Err(e.into());
        }
    };

    println!("Authenticated to tor control port at {}", channel.endpoint());
    if let Some(pid) = connector.daemon_pid().await {
        println!("Supervising tor (pid {})", pid);
    }

    if hold && connector.daemon_pid().await.is_some() {
        println!("Press Ctrl+C to stop tor");
        tokio::signal::ctrl_c().await?;
    }

    drop(channel);
    connector.shutdown().await?;

    Ok(())
}
