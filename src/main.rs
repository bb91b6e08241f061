mod args;
mod commands;

use args::{Cli, Commands};
use clap::Parser;
use connect_tor::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    logging::init(cli.verbose);

    match cli.command {
        Commands::Connect {
            tor,
            system,
            no_update,
            hold,
        } => commands::connect::cmd_connect(tor, system, no_update, hold).await?,
        Commands::Download { no_update } => commands::download::cmd_download(no_update).await?,
        Commands::Torrc { dir } => commands::torrc::cmd_torrc(dir)?,
        Commands::Completions { shell } => commands::completions::cmd_completions(shell),
    }

    Ok(())
}
