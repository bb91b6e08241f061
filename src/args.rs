use std::path::PathBuf;

use clap::{Parser, Subcommand};
use connect_tor::completions::CompletionShell;

#[derive(Parser)]
#[command(name = "connect-tor")]
#[command(version)]
#[command(about = "Launch or find tor and open an authenticated control connection", long_about = None)]
pub(crate) struct Cli {
    /// Show debug output, including tor's own log lines
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Connect to tor and authenticate on its control port
    Connect {
        /// Tor binary to launch (overrides the `tor` environment variable)
        #[arg(long)]
        tor: Option<PathBuf>,

        /// Use the system tor service instead of launching one
        #[arg(long)]
        system: bool,

        /// Don't check for a newer tor bundle
        #[arg(long)]
        no_update: bool,

        /// Keep the launched tor running until interrupted
        #[arg(long)]
        hold: bool,
    },

    /// Download or update the tor expert bundle for this platform
    Download {
        /// Don't check for a newer tor bundle
        #[arg(long)]
        no_update: bool,
    },

    /// Write the runtime torrc into a working directory
    Torrc {
        /// Working directory (default: current directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_connect_flags() {
        let cli = Cli::parse_from(["connect-tor", "connect", "--tor", "/opt/tor", "--no-update", "--hold"]);
        match cli.command {
            Commands::Connect {
                tor,
                system,
                no_update,
                hold,
            } => {
                assert_eq!(tor, Some(PathBuf::from("/opt/tor")));
                assert!(!system);
                assert!(no_update);
                assert!(hold);
            }
            _ => panic!("expected connect"),
        }
    }
}
