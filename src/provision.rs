use async_trait::async_trait;
use flate2::read::GzDecoder;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::{debug, error, info, warn};
use zip::ZipArchive;

use crate::clienv;
use crate::error::{Result, TorError};

const RECORD_FILE: &str = "bundle.json";
const BUNDLE_DIR: &str = "bundle";

/// Platforms tor publishes an expert bundle for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    LinuxX86_64,
    LinuxI686,
    MacosX86_64,
    MacosAarch64,
    WindowsX86_64,
    WindowsI686,
}

impl Platform {
    pub fn current() -> Option<Self> {
        if cfg!(target_os = "linux") {
            if cfg!(target_arch = "x86_64") {
                Some(Self::LinuxX86_64)
            } else if cfg!(target_arch = "x86") {
                Some(Self::LinuxI686)
            } else {
                None
            }
        } else if cfg!(target_os = "macos") {
            if cfg!(target_arch = "aarch64") {
                Some(Self::MacosAarch64)
            } else if cfg!(target_arch = "x86_64") {
                Some(Self::MacosX86_64)
            } else {
                None
            }
        } else if cfg!(target_os = "windows") {
            if cfg!(target_arch = "x86_64") {
                Some(Self::WindowsX86_64)
            } else if cfg!(target_arch = "x86") {
                Some(Self::WindowsI686)
            } else {
                None
            }
        } else {
            None
        }
    }

    /// The `<os>-<arch>` part of a bundle file name.
    pub fn bundle_tag(&self) -> &'static str {
        match self {
            Self::LinuxX86_64 => "linux-x86_64",
            Self::LinuxI686 => "linux-i686",
            Self::MacosX86_64 => "macos-x86_64",
            Self::MacosAarch64 => "macos-aarch64",
            Self::WindowsX86_64 => "windows-x86_64",
            Self::WindowsI686 => "windows-i686",
        }
    }

    pub fn binary_name(&self) -> &'static str {
        match self {
            Self::WindowsX86_64 | Self::WindowsI686 => "tor.exe",
            _ => "tor",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.bundle_tag())
    }
}

/// Something that can put a tor binary on disk.
#[async_trait]
pub trait BinaryProvisioner: Send + Sync {
    /// Path to a usable tor for `platform`, or `None` when none can be had.
    async fn acquire(&self, platform: Platform, allow_update: bool) -> Option<PathBuf>;
}

/// What was installed last time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    pub url: String,
    pub version: Option<String>,
    pub binary: PathBuf,
}

/// Keeps a tor expert bundle from torproject.org unpacked in a cache
/// directory and up to date.
pub struct ExpertBundle {
    download_page: String,
    install_dir: PathBuf,
    client: reqwest::Client,
}

impl ExpertBundle {
    pub fn new(download_page: impl Into<String>, install_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("connect-tor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TorError::Provision(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            download_page: download_page.into(),
            install_dir: install_dir.into(),
            client,
        })
    }

    /// Bundle page and cache directory from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(clienv::bundle_url(), clienv::cache_dir())
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    fn record_path(&self) -> PathBuf {
        self.install_dir.join(RECORD_FILE)
    }

    /// The previous install, if its binary is still there.
    pub fn installed(&self) -> Option<InstallRecord> {
        let content = std::fs::read_to_string(self.record_path()).ok()?;
        let record: InstallRecord = match serde_json::from_str(&content) {
            Ok(record) => record,
            Err(e) => {
                warn!("Ignoring unreadable install record: {}", e);
                return None;
            }
        };
        record.binary.is_file().then_some(record)
    }

    fn save_record(&self, record: &InstallRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| TorError::Provision(format!("Failed to encode install record: {}", e)))?;
        std::fs::write(self.record_path(), json)?;
        Ok(())
    }

    async fn try_acquire(&self, platform: Platform, allow_update: bool) -> Result<PathBuf> {
        let installed = self.installed();

        if let (false, Some(record)) = (allow_update, installed.as_ref()) {
            debug!("Update check skipped, using {}", record.binary.display());
            return Ok(record.binary.clone());
        }

        let url = self.fetch_download_link(platform).await?;

        if let Some(record) = installed.filter(|r| r.url == url) {
            debug!("Bundle {} already installed", url);
            return Ok(record.binary);
        }

        info!("Downloading tor from {}", url);
        let bytes = self.download(&url).await?;

        tokio::fs::create_dir_all(&self.install_dir).await?;
        let target = self.install_dir.join(BUNDLE_DIR);
        if target.exists() {
            tokio::fs::remove_dir_all(&target).await?;
        }
        let archive_url = url.clone();
        let binary = tokio::task::spawn_blocking(move || {
            install_bundle(&archive_url, &bytes, &target, platform.binary_name())
        })
        .await
        .map_err(|e| TorError::Provision(format!("Bundle extraction task failed: {}", e)))??;

        let record = InstallRecord {
            version: bundle_version(&url),
            url,
            binary: binary.clone(),
        };
        self.save_record(&record)?;
        info!("Installed tor {} at {}", record.version.as_deref().unwrap_or("(unknown version)"), binary.display());

        Ok(binary)
    }

    async fn fetch_download_link(&self, platform: Platform) -> Result<String> {
        let response = self
            .client
            .get(&self.download_page)
            .send()
            .await
            .map_err(|e| TorError::Provision(format!("Failed to fetch download page: {}", e)))?;

        if !response.status().is_success() {
            return Err(TorError::Provision(format!(
                "Download page returned status: {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TorError::Provision(format!("Failed to read download page: {}", e)))?;

        find_bundle_link(&body, &self.download_page, platform).ok_or_else(|| {
            TorError::Provision(format!("No expert bundle listed for platform: {}", platform))
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TorError::Provision(format!("Failed to download bundle: {}", e)))?;

        if !response.status().is_success() {
            return Err(TorError::Provision(format!(
                "Bundle download returned status: {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TorError::Provision(format!("Failed to read bundle bytes: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl BinaryProvisioner for ExpertBundle {
    async fn acquire(&self, platform: Platform, allow_update: bool) -> Option<PathBuf> {
        match self.try_acquire(platform, allow_update).await {
            Ok(path) => Some(path),
            Err(e) => {
                error!("Failed to acquire tor for {}: {}", platform, e);
                None
            }
        }
    }
}

/// Find the expert bundle link for `platform` in the download page `html`.
/// Relative links are resolved against `page_url`.
pub fn find_bundle_link(html: &str, page_url: &str, platform: Platform) -> Option<String> {
    let pattern = format!(
        r#"href="([^"]*tor-expert-bundle-{}-[^"/]*\.(?:tar\.gz|zip))""#,
        regex::escape(platform.bundle_tag())
    );
    let re = Regex::new(&pattern).ok()?;
    let href = re.captures(html)?.get(1)?.as_str();

    match Url::parse(href) {
        Ok(url) => Some(url.to_string()),
        Err(_) => Url::parse(page_url).ok()?.join(href).ok().map(|u| u.to_string()),
    }
}

/// Version number embedded in a bundle file name.
pub fn bundle_version(url: &str) -> Option<String> {
    let re = Regex::new(r"tor-expert-bundle-[a-z]+-[a-z0-9_]+-([0-9][0-9A-Za-z.\-]*?)\.(?:tar\.gz|zip)$").ok()?;
    re.captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Unpack the archive into `target` and return the executable tor binary.
/// Blocking; run off the async runtime.
fn install_bundle(url: &str, bytes: &[u8], target: &Path, binary_name: &str) -> Result<PathBuf> {
    unpack(url, bytes, target)?;
    let binary = locate_binary(target, binary_name)
        .ok_or_else(|| TorError::Provision(format!("{} not found in bundle", binary_name)))?;
    make_executable(&binary)?;
    Ok(binary)
}

fn unpack(url: &str, bytes: &[u8], target: &Path) -> Result<()> {
    if url.ends_with(".zip") {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| TorError::Provision(format!("Failed to read zip archive: {}", e)))?;
        archive
            .extract(target)
            .map_err(|e| TorError::Provision(format!("Failed to extract zip archive: {}", e)))?;
    } else {
        let mut archive = Archive::new(GzDecoder::new(Cursor::new(bytes)));
        archive
            .unpack(target)
            .map_err(|e| TorError::Provision(format!("Failed to extract tar archive: {}", e)))?;
    }
    Ok(())
}

/// Depth-first search for `name` below `dir`.
fn locate_binary(dir: &Path, name: &str) -> Option<PathBuf> {
    let direct = dir.join("tor").join(name);
    if direct.is_file() {
        return Some(direct);
    }

    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = locate_binary(&path, name) {
                return Some(found);
            }
        } else if path.file_name().is_some_and(|f| f == name) {
            return Some(path);
        }
    }
    None
}

fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
