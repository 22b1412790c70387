//! Child-process helpers for the local server.

use std::ffi::OsStr;
use std::io;
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

/// Interval between exit checks while waiting on a child.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Create a [`std::process::Command`] for a long-lived server child.
///
/// On Windows the child is put in its own process group so that a
/// CTRL_BREAK event can later be delivered to it alone. On other platforms
/// this is identical to `std::process::Command::new(program)`.
pub fn command(program: impl AsRef<OsStr>) -> std::process::Command {
    #![allow(unused_mut)]
    let mut cmd = std::process::Command::new(program);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }
    cmd
}

/// Ask a child to stop: SIGINT on Unix, CTRL_BREAK on Windows.
pub fn interrupt(child: &Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        let pid = child.id() as libc::pid_t;
        if unsafe { libc::kill(pid, libc::SIGINT) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};
        if unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, child.id()) } != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = child;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "interrupting a process is not supported on this platform",
        ))
    }
}

/// Wait up to `timeout` for the child to exit.
///
/// Returns `Ok(None)` when the child is still running at the deadline.
pub fn wait_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn wait_timeout_returns_exit_status() {
        let mut child = command("sh").args(["-c", "exit 3"]).spawn().unwrap();
        let status = wait_timeout(&mut child, Duration::from_secs(5)).unwrap();
        assert_eq!(status.and_then(|s| s.code()), Some(3));
    }

    #[test]
    fn wait_timeout_gives_up_on_running_child() {
        let mut child = command("sleep").arg("5").spawn().unwrap();
        let status = wait_timeout(&mut child, Duration::from_millis(100)).unwrap();
        assert!(status.is_none());
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn interrupt_stops_default_child() {
        let mut child = command("sleep").arg("5").spawn().unwrap();
        interrupt(&child).unwrap();
        let status = wait_timeout(&mut child, Duration::from_secs(5)).unwrap();
        assert!(status.is_some_and(|s| !s.success()));
    }
}
