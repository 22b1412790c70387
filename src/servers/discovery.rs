//! Locating the backend server and ubridge executables.

use std::path::PathBuf;

/// Command name of the backend server.
pub const LOCAL_SERVER_NAME: &str = "gns3server";
/// Command name of the bridging helper.
pub const UBRIDGE_NAME: &str = "ubridge";

/// Where to look for bundled executables.
#[derive(Clone, Debug, Default)]
pub struct PlatformHints {
    /// Packaged desktop build: helpers ship beside the client executable
    pub packaged: bool,
    /// Directory of the running executable
    pub exe_dir: Option<PathBuf>,
    /// Platform executable suffix (`.exe` on Windows)
    pub exe_suffix: &'static str,
}

impl PlatformHints {
    /// Hints for the running process. Windows and macOS builds are shipped
    /// as bundles with the server beside the client.
    pub fn current() -> Self {
        Self {
            packaged: cfg!(any(windows, target_os = "macos")),
            exe_dir: std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf())),
            exe_suffix: std::env::consts::EXE_SUFFIX,
        }
    }
}

/// Find an executable by name.
///
/// Packaged builds look beside the running executable first; otherwise (or
/// when nothing is there) `PATH` is searched for the bare command name.
/// Not finding it is a normal outcome and yields `None`.
pub fn find_executable(name: &str, hints: &PlatformHints) -> Option<PathBuf> {
    if hints.packaged {
        if let Some(dir) = &hints.exe_dir {
            let candidate = dir.join(format!("{}{}", name, hints.exe_suffix));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    which::which(name).ok()
}

pub fn find_local_server(hints: &PlatformHints) -> Option<PathBuf> {
    find_executable(LOCAL_SERVER_NAME, hints)
}

pub fn find_ubridge(hints: &PlatformHints) -> Option<PathBuf> {
    find_executable(UBRIDGE_NAME, hints)
}
