//! Cross-platform socket and configuration paths
//!
//! Unix/macOS: side channels are Unix domain sockets under $XDG_RUNTIME_DIR or /tmp
//! Windows: side channels are named pipes named after the owning process

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

/// Name used for sockets, config and log directories
const APP_NAME: &str = "e2e-conductor";

/// Environment variable through which the worker learns the side channel name
pub const SIDE_CHANNEL_ENV: &str = "CONDUCTOR_SIDE_CHANNEL";

static SIDE_CHANNEL_SEQ: AtomicU32 = AtomicU32::new(0);

/// Directory holding side-channel sockets
///
/// - Unix: `$XDG_RUNTIME_DIR/e2e-conductor/` or `/tmp/e2e-conductor-<uid>/`
#[cfg(unix)]
pub fn socket_dir() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_NAME);
    }

    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid))
}

/// Allocate a fresh side-channel name for one worker process
///
/// Names are unique per orchestrator process and worker instance.
#[cfg(unix)]
pub fn next_side_channel_name() -> String {
    let seq = SIDE_CHANNEL_SEQ.fetch_add(1, Ordering::Relaxed);
    socket_dir()
        .join(format!("worker-{}-{}.sock", std::process::id(), seq))
        .to_string_lossy()
        .into_owned()
}

#[cfg(windows)]
pub fn next_side_channel_name() -> String {
    let seq = SIDE_CHANNEL_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-worker-{}-{}", APP_NAME, std::process::id(), seq)
}

/// Ensure the socket directory exists with owner-only permissions
#[cfg(unix)]
pub fn ensure_socket_dir() -> io::Result<PathBuf> {
    let dir = socket_dir();

    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(dir)
}

#[cfg(windows)]
pub fn ensure_socket_dir() -> io::Result<PathBuf> {
    // Named pipes don't need a directory on Windows
    Ok(PathBuf::new())
}

/// Remove a side-channel socket file if it exists
#[cfg(unix)]
pub fn remove_socket(name: &str) -> io::Result<()> {
    let path = PathBuf::from(name);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

#[cfg(windows)]
pub fn remove_socket(_name: &str) -> io::Result<()> {
    Ok(())
}

/// Get the configuration directory path
///
/// - Linux: `~/.config/e2e-conductor/`
/// - macOS: `~/Library/Application Support/e2e-conductor/`
/// - Windows: `%APPDATA%\e2e-conductor\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_channel_names_are_unique() {
        let a = next_side_channel_name();
        let b = next_side_channel_name();
        assert_ne!(a, b);
        assert!(a.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_config_path_is_toml() {
        if let Some(path) = config_path() {
            assert_eq!(path.extension().and_then(|e| e.to_str()), Some("toml"));
        }
    }
}
