//! Runtime configuration for a supervised tor.
//!
//! Everything tor needs lives in a private state directory under the working
//! directory:
//!
//! ```text
//! .tor/
//! ├── torrc                generated on every launch
//! ├── control-port         written by tor once the control listener is up
//! └── control_auth_cookie  written by tor, read back for AUTHENTICATE
//! ```

use crate::error::Result;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

pub const STATE_DIR_NAME: &str = ".tor";
pub const TORRC_FILE: &str = "torrc";
pub const CONTROL_PORT_FILE: &str = "control-port";
pub const COOKIE_FILE: &str = "control_auth_cookie";

/// Paths inside a state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// State directory for `working_dir` (`<working_dir>/.tor`).
    pub fn for_working_dir(working_dir: &Path) -> Self {
        Self {
            root: working_dir.join(STATE_DIR_NAME),
        }
    }

    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn torrc(&self) -> PathBuf {
        self.root.join(TORRC_FILE)
    }

    pub fn control_port_file(&self) -> PathBuf {
        self.root.join(CONTROL_PORT_FILE)
    }

    pub fn cookie_file(&self) -> PathBuf {
        self.root.join(COOKIE_FILE)
    }

    /// Create the directory if needed; tor refuses a group/world readable
    /// DataDirectory on Unix.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.root, fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }

    /// Remove the files a previous tor published so only values written by
    /// the next launch can be observed.
    pub fn clear_published(&self) -> Result<()> {
        for path in [self.control_port_file(), self.cookie_file()] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed stale file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// A written torrc and the state directory it points at.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub state_dir: StateDir,
    pub torrc_path: PathBuf,
    pub contents: String,
}

/// Render the torrc for `state_dir`.
pub fn render(state_dir: &StateDir) -> String {
    let mut torrc = String::from(
        "AvoidDiskWrites 1\n\
         Log notice stderr\n\
         SocksPort auto IPv6Traffic PreferIPv6 KeepAliveIsolateSOCKSAuth\n\
         ControlPort auto\n",
    );
    // Writing to a String cannot fail.
    let _ = writeln!(
        torrc,
        "ControlPortWriteToFile {}",
        state_dir.control_port_file().display()
    );
    torrc.push_str("CookieAuthentication 1\n");
    let _ = writeln!(torrc, "CookieAuthFile {}", state_dir.cookie_file().display());
    torrc.push_str("DirReqStatistics 0\nHiddenServiceStatistics 0\n");
    let _ = writeln!(torrc, "DataDirectory {}", state_dir.root().display());
    torrc
}

/// Write a fresh torrc under `<working_dir>/.tor`, replacing any previous one.
pub fn write_config(working_dir: &Path) -> Result<RuntimeConfig> {
    let state_dir = StateDir::for_working_dir(working_dir);
    state_dir.ensure()?;

    let contents = render(&state_dir);
    let torrc_path = state_dir.torrc();
    fs::write(&torrc_path, &contents)?;
    trace!(path = %torrc_path.display(), "Wrote torrc");

    Ok(RuntimeConfig {
        state_dir,
        torrc_path,
        contents,
    })
}
