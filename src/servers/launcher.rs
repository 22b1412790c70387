//! Local server process: pre-flight checks, spawn, and escalating shutdown.

use crate::process;
use crate::prompt::UserPrompt;
use netlab_core::ConnectionHandle;

use std::fmt;
use std::io;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Dialog title used for every local server message.
pub const DIALOG_TITLE: &str = "Local server";

/// Errors that prevent the local server from being started.
#[derive(Debug, Error)]
pub enum LauncherError {
    #[error("No local server is configured")]
    NotConfigured,
    #[error("Could not find local server {}", .0.display())]
    NotFound(PathBuf),
    #[error("{} is not an executable", .0.display())]
    NotExecutable(PathBuf),
    #[error(
        "Could not bind with {host}: {source} (please check your host binding setting in the preferences)"
    )]
    Unbindable {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("Could not find an unused port for the local server: {0}")]
    NoUnusedPort(#[source] io::Error),
    #[error("Could not start local server \"{command}\": {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl LauncherError {
    /// Closest I/O error kind, for callers that classify failures.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            LauncherError::NotConfigured | LauncherError::NotFound(_) => io::ErrorKind::NotFound,
            LauncherError::NotExecutable(_) => io::ErrorKind::PermissionDenied,
            LauncherError::Unbindable { source, .. }
            | LauncherError::NoUnusedPort(source)
            | LauncherError::Spawn { source, .. } => source.kind(),
        }
    }
}

/// Which step of the shutdown escalation is in progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopStage {
    Graceful,
    Interrupted,
    Killed,
}

/// Lifecycle of the local server process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalServerState {
    Unconfigured,
    PathResolved(PathBuf),
    Bound { host: String, port: u16 },
    Running,
    Stopping(StopStage),
    Stopped,
}

/// How long each shutdown tier waits before escalating.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StopTimeouts {
    pub graceful: Duration,
    pub interrupt: Duration,
}

impl Default for StopTimeouts {
    fn default() -> Self {
        Self {
            graceful: Duration::from_secs(2),
            interrupt: Duration::from_secs(2),
        }
    }
}

/// The configured server path must point at an existing file.
pub fn resolve_path(path: &str) -> Result<PathBuf, LauncherError> {
    if path.is_empty() {
        return Err(LauncherError::NotConfigured);
    }
    let path = PathBuf::from(path);
    if path.is_file() {
        Ok(path)
    } else {
        Err(LauncherError::NotFound(path))
    }
}

pub fn verify_executable(path: &Path) -> Result<(), LauncherError> {
    std::fs::metadata(path).map_err(|_| LauncherError::NotFound(path.to_path_buf()))?;
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
            .map_err(|_| LauncherError::NotFound(path.to_path_buf()))?;
        // executable by this process, not just by someone
        if unsafe { libc::access(c_path.as_ptr(), libc::X_OK) } != 0 {
            return Err(LauncherError::NotExecutable(path.to_path_buf()));
        }
    }
    Ok(())
}

/// Check that the host address still exists on this machine.
pub fn check_bindable(host: &str) -> Result<(), LauncherError> {
    TcpListener::bind((host, 0))
        .map(drop)
        .map_err(|source| LauncherError::Unbindable {
            host: host.to_string(),
            source,
        })
}

/// Return `port` if it can be bound on `host`, otherwise an unused port on
/// the same host. A busy port never blocks startup.
pub fn check_port_available(host: &str, port: u16) -> Result<u16, LauncherError> {
    // std sets SO_REUSEADDR on Unix listeners
    match TcpListener::bind((host, port)) {
        Ok(_) => Ok(port),
        Err(e) => {
            log::warn!("Could not use socket {}:{} {}", host, port, e);
            let fallback = find_unused_port(host).map_err(LauncherError::NoUnusedPort)?;
            log::warn!(
                "The server port {} is already in use, fallback to port {}",
                port,
                fallback
            );
            Ok(fallback)
        }
    }
}

/// Let the OS pick a free port on `host`.
pub fn find_unused_port(host: &str) -> io::Result<u16> {
    let listener = TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

/// Whether the spawned server should log at debug level.
pub fn debug_enabled() -> bool {
    log::max_level() >= log::LevelFilter::Debug
}

/// Program and arguments for the local server.
///
/// Arguments are passed as a list, never through a shell, so paths with
/// spaces or quotes need no escaping. `Display` renders the command line
/// with the executable quoted, for logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalServerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LocalServerCommand {
    pub fn to_command(&self) -> std::process::Command {
        let mut cmd = process::command(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for LocalServerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

pub fn build_command(
    path: &Path,
    host: &str,
    port: u16,
    allow_console_from_anywhere: bool,
    debug: bool,
) -> LocalServerCommand {
    let mut args = vec![
        format!("--host={}", host),
        format!("--port={}", port),
        "--local".to_string(),
    ];
    if allow_console_from_anywhere {
        // allow connections to console from remote addresses
        args.push("--allow".to_string());
    }
    if debug {
        args.push("--debug".to_string());
    }
    LocalServerCommand {
        program: path.to_path_buf(),
        args,
    }
}

/// Owns the local server connection handle and its process.
pub struct LocalServer {
    handle: Arc<dyn ConnectionHandle>,
    process: Option<Child>,
    state: LocalServerState,
    timeouts: StopTimeouts,
}

impl LocalServer {
    pub fn new(handle: Arc<dyn ConnectionHandle>) -> Self {
        handle.set_local(true);
        Self {
            handle,
            process: None,
            state: LocalServerState::Unconfigured,
            timeouts: StopTimeouts::default(),
        }
    }

    pub fn handle(&self) -> &Arc<dyn ConnectionHandle> {
        &self.handle
    }

    /// Replace the connection handle (host or port changed).
    pub fn set_handle(&mut self, handle: Arc<dyn ConnectionHandle>) {
        handle.set_local(true);
        log::info!("New local server connection {} registered", handle.url());
        self.handle = handle;
    }

    pub fn state(&self) -> &LocalServerState {
        &self.state
    }

    pub(crate) fn set_state(&mut self, state: LocalServerState) {
        self.state = state;
    }

    pub fn timeouts(&self) -> StopTimeouts {
        self.timeouts
    }

    pub fn set_timeouts(&mut self, timeouts: StopTimeouts) {
        self.timeouts = timeouts;
    }

    /// PID of the server process, if one was started.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|child| child.id())
    }

    /// Spawn the server. Spawn failures are logged and reported as `false`.
    pub fn start(&mut self, command: &LocalServerCommand) -> bool {
        if self.is_running() {
            log::info!("Local server is already running (PID={:?})", self.pid());
            return true;
        }

        log::info!("Starting local server process with {}", command);
        match command.to_command().spawn() {
            Ok(child) => {
                log::info!("Local server process has started (PID={})", child.id());
                self.process = Some(child);
                self.state = LocalServerState::Running;
                true
            }
            Err(source) => {
                let err = LauncherError::Spawn {
                    command: command.to_string(),
                    source,
                };
                log::warn!("{}", err);
                false
            }
        }
    }

    pub fn is_running(&mut self) -> bool {
        let Some(child) = self.process.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                log::info!("Local server process exited with {}", status);
                self.process = None;
                self.state = LocalServerState::Stopped;
                false
            }
            Err(e) => {
                log::error!("Failed to check local server status: {}", e);
                false
            }
        }
    }

    /// Stop the local server.
    ///
    /// Without `wait` nothing beyond logging happens and the process is
    /// left to exit on its own. With `wait` the shutdown escalates: wait for
    /// a natural exit, then interrupt and wait again, then ask the user
    /// before killing. Declining leaves the process running.
    pub fn stop(&mut self, wait: bool, prompt: &dyn UserPrompt) {
        if !self.is_running() {
            return;
        }
        log::info!("Stopping local server (PID={:?})", self.pid());
        if !wait {
            return;
        }

        let timeouts = self.timeouts;
        let Some(child) = self.process.as_mut() else {
            return;
        };

        self.state = LocalServerState::Stopping(StopStage::Graceful);
        if let Some(status) = wait_logged(child, timeouts.graceful) {
            self.finish(status);
            return;
        }

        // the local server couldn't be stopped with the normal procedure
        self.state = LocalServerState::Stopping(StopStage::Interrupted);
        if let Err(e) = process::interrupt(child) {
            log::warn!("Could not interrupt local server: {}", e);
        }
        if let Some(status) = wait_logged(child, timeouts.interrupt) {
            self.finish(status);
            return;
        }

        let proceed = prompt.question(
            DIALOG_TITLE,
            "The Local server cannot be stopped, would you like to kill it?",
        );
        if !proceed {
            log::warn!("Local server left running (PID={})", child.id());
            self.state = LocalServerState::Running;
            return;
        }

        self.state = LocalServerState::Stopping(StopStage::Killed);
        if let Err(e) = child.kill() {
            log::error!("Could not kill local server: {}", e);
        }
        match child.wait() {
            Ok(status) => self.finish(status),
            Err(e) => {
                log::error!("Error waiting for local server to die: {}", e);
                self.process = None;
                self.state = LocalServerState::Stopped;
            }
        }
    }

    fn finish(&mut self, status: ExitStatus) {
        log::info!("Local server stopped with {}", status);
        self.process = None;
        self.state = LocalServerState::Stopped;
    }
}

fn wait_logged(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    match process::wait_timeout(child, timeout) {
        Ok(status) => status,
        Err(e) => {
            log::warn!("Error waiting for local server: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockServer, ScriptedPrompt};
    use netlab_core::{Protocol, ServerDescriptor};

    fn local_server() -> LocalServer {
        let desc = ServerDescriptor::new(Protocol::Http, "127.0.0.1", 3080);
        LocalServer::new(Arc::new(MockServer::new(desc)))
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-server");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn short_timeouts() -> StopTimeouts {
        StopTimeouts {
            graceful: Duration::from_millis(200),
            interrupt: Duration::from_millis(200),
        }
    }

    #[test]
    fn build_command_minimal() {
        let cmd = build_command(Path::new("/opt/gns3/gns3server"), "127.0.0.1", 3080, false, false);
        assert_eq!(cmd.args, vec!["--host=127.0.0.1", "--port=3080", "--local"]);
        assert_eq!(
            cmd.to_string(),
            "\"/opt/gns3/gns3server\" --host=127.0.0.1 --port=3080 --local"
        );
    }

    #[test]
    fn build_command_with_allow_and_debug() {
        let cmd = build_command(Path::new("/srv/my server/gns3server"), "0.0.0.0", 8000, true, true);
        assert_eq!(
            cmd.args,
            vec!["--host=0.0.0.0", "--port=8000", "--local", "--allow", "--debug"]
        );
        assert_eq!(cmd.program, PathBuf::from("/srv/my server/gns3server"));
    }

    #[test]
    fn resolve_path_requires_existing_file() {
        assert!(matches!(resolve_path(""), Err(LauncherError::NotConfigured)));

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gns3server");
        let err = resolve_path(missing.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, LauncherError::NotFound(_)));
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        // a directory is not a server executable
        assert!(resolve_path(dir.path().to_str().unwrap()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn verify_executable_rejects_plain_files() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gns3server");
        std::fs::write(&path, b"data").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = verify_executable(&path).unwrap_err();
        assert!(matches!(err, LauncherError::NotExecutable(_)));
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(verify_executable(&path).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn verify_executable_checks_this_process() {
        use std::os::unix::fs::PermissionsExt;
        // root may execute any file with an x bit
        if unsafe { libc::geteuid() } == 0 {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gns3server");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();

        // only "others" may execute; the owner may not
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o641)).unwrap();
        assert!(matches!(
            verify_executable(&path),
            Err(LauncherError::NotExecutable(_))
        ));

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o744)).unwrap();
        assert!(verify_executable(&path).is_ok());
    }

    #[test]
    fn check_bindable_accepts_loopback() {
        assert!(check_bindable("127.0.0.1").is_ok());
    }

    #[test]
    fn check_bindable_rejects_foreign_address() {
        // TEST-NET-2 is never assigned to a local interface
        let err = check_bindable("198.51.100.4").unwrap_err();
        assert!(matches!(err, LauncherError::Unbindable { .. }));
        assert!(err.to_string().contains("198.51.100.4"));
    }

    #[test]
    fn free_port_is_kept() {
        let port = find_unused_port("127.0.0.1").unwrap();
        assert_eq!(check_port_available("127.0.0.1", port).unwrap(), port);
    }

    #[test]
    fn busy_port_falls_back_to_unused_port() {
        let busy = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let busy_port = busy.local_addr().unwrap().port();

        let port = check_port_available("127.0.0.1", busy_port).unwrap();
        assert_ne!(port, busy_port);
        assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
    }

    #[test]
    fn new_handle_is_marked_local() {
        let server = local_server();
        assert!(server.handle().is_local());
        assert_eq!(server.state(), &LocalServerState::Unconfigured);
    }

    #[test]
    fn start_reports_spawn_failure() {
        let mut server = local_server();
        let cmd = build_command(Path::new("/nonexistent/gns3server"), "127.0.0.1", 3080, false, false);
        assert!(!server.start(&cmd));
        assert!(!server.is_running());
        assert_eq!(server.pid(), None);
    }

    #[test]
    fn stop_without_process_is_noop() {
        let mut server = local_server();
        let prompt = ScriptedPrompt::answering(true);
        server.stop(true, &prompt);
        assert!(prompt.questions().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn start_and_detect_exit() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "exit 0");
        let mut server = local_server();
        assert!(server.start(&build_command(&path, "127.0.0.1", 3080, false, false)));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while server.is_running() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!server.is_running());
        assert_eq!(server.state(), &LocalServerState::Stopped);
    }

    #[cfg(unix)]
    #[test]
    fn stop_interrupts_server() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "exec sleep 30");
        let mut server = local_server();
        server.set_timeouts(short_timeouts());
        assert!(server.start(&build_command(&path, "127.0.0.1", 3080, false, false)));
        assert!(server.is_running());

        let prompt = ScriptedPrompt::answering(false);
        server.stop(true, &prompt);
        assert!(!server.is_running());
        assert!(prompt.questions().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn stop_without_wait_leaves_server_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "exec sleep 30");
        let mut server = local_server();
        assert!(server.start(&build_command(&path, "127.0.0.1", 3080, false, false)));

        let prompt = ScriptedPrompt::answering(true);
        server.stop(false, &prompt);
        assert!(server.is_running());

        server.set_timeouts(short_timeouts());
        server.stop(true, &prompt);
        assert!(!server.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn declined_kill_leaves_stubborn_server_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "trap '' INT\nexec sleep 30");
        let mut server = local_server();
        server.set_timeouts(short_timeouts());
        assert!(server.start(&build_command(&path, "127.0.0.1", 3080, false, false)));

        let declined = ScriptedPrompt::answering(false);
        server.stop(true, &declined);
        assert_eq!(declined.questions().len(), 1);
        assert!(server.is_running());
        assert_eq!(server.state(), &LocalServerState::Running);

        let confirmed = ScriptedPrompt::answering(true);
        server.stop(true, &confirmed);
        assert_eq!(confirmed.questions().len(), 1);
        assert!(!server.is_running());
        assert_eq!(server.state(), &LocalServerState::Stopped);
    }
}
