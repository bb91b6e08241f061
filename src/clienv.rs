use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvVar {
    Tor,
    ConfigDir,
    CacheDir,
    BundleUrl,
    SystemSocket,
    SystemCookie,
}

impl EnvVar {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tor => "tor",
            Self::ConfigDir => "CONNECT_TOR_CONFIG_DIR",
            Self::CacheDir => "CONNECT_TOR_CACHE_DIR",
            Self::BundleUrl => "CONNECT_TOR_BUNDLE_URL",
            Self::SystemSocket => "CONNECT_TOR_SYSTEM_SOCKET",
            Self::SystemCookie => "CONNECT_TOR_SYSTEM_COOKIE",
        }
    }
}

const FALLBACK_CONFIG_DIR: &str = "~/.config";
const FALLBACK_DATA_DIR: &str = "~/.local/share";
const APP_SUBDIR: &str = "connect-tor";
const DEFAULT_BUNDLE_URL: &str = "https://www.torproject.org/download/tor/";
const DEFAULT_SYSTEM_SOCKET: &str = "/var/run/tor/control";
const DEFAULT_SYSTEM_COOKIE: &str = "/var/run/tor/control.authcookie";

/// Non-empty value of an environment variable.
fn env_opt(var: EnvVar) -> Option<String> {
    std::env::var(var.as_str()).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(var: EnvVar, default: &str) -> String {
    env_opt(var).unwrap_or_else(|| default.to_string())
}

/// Explicit tor binary ($tor)
pub fn tor_binary() -> Option<PathBuf> {
    let val = env_opt(EnvVar::Tor).map(PathBuf::from);
    tracing::trace!(value = ?val, "tor env var");
    val
}

/// Config directory ($CONNECT_TOR_CONFIG_DIR or ~/.config/connect-tor)
pub fn config_dir() -> PathBuf {
    let dir = env_opt(EnvVar::ConfigDir)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from(FALLBACK_CONFIG_DIR))
                .join(APP_SUBDIR)
        });
    tracing::trace!(dir = %dir.display(), "Resolved config directory");
    dir
}

/// Where downloaded bundles live ($CONNECT_TOR_CACHE_DIR or ~/.local/share/connect-tor)
pub fn cache_dir() -> PathBuf {
    let dir = env_opt(EnvVar::CacheDir)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from(FALLBACK_DATA_DIR))
                .join(APP_SUBDIR)
        });
    tracing::trace!(dir = %dir.display(), "Resolved cache directory");
    dir
}

/// Page listing the expert bundle downloads ($CONNECT_TOR_BUNDLE_URL or torproject.org)
pub fn bundle_url() -> String {
    let url = env_or(EnvVar::BundleUrl, DEFAULT_BUNDLE_URL);
    tracing::trace!(url = %url, "Bundle download page");
    url
}

/// Control socket of a system tor service
pub fn system_socket_path() -> PathBuf {
    PathBuf::from(env_or(EnvVar::SystemSocket, DEFAULT_SYSTEM_SOCKET))
}

/// Cookie file of a system tor service
pub fn system_cookie_path() -> PathBuf {
    PathBuf::from(env_or(EnvVar::SystemCookie, DEFAULT_SYSTEM_COOKIE))
}
