use std::path::PathBuf;

use connect_tor::torrc;

pub(crate) fn cmd_torrc(dir: Option<PathBuf>) -> anyhow::Result<()> {
    let working_dir = match dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let config = torrc::write_config(&working_dir)?;
    println!("{}", config.torrc_path.display());

    Ok(())
}
