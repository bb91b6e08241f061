use std::time::Duration;

use anyhow::anyhow;
use connect_tor::{BinaryProvisioner, ExpertBundle, Platform};
use indicatif::{ProgressBar, ProgressStyle};

pub(crate) async fn cmd_download(no_update: bool) -> anyhow::Result<()> {
    let platform = Platform::current()
        .ok_or_else(|| anyhow!("No tor expert bundle for {}", std::env::consts::OS))?;
    let bundle = ExpertBundle::from_env()?;

    let pb = create_progress_bar(&format!("Fetching tor expert bundle for {}", platform));
    let binary = bundle.acquire(platform, !no_update).await;

    match binary {
        Some(path) => {
            let version = bundle
                .installed()
                .and_then(|record| record.version)
                .unwrap_or_else(|| "unknown".to_string());
            pb.finish_with_message(format!("tor {} ready", version));
            println!("{}", path.display());
            Ok(())
        }
        None => {
            pb.finish_and_clear();
            Err(anyhow!("Failed to provision tor for {}", platform))
        }
    }
}

fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
