//! Process signalling
//!
//! Thin wrappers over `kill(2)` for interrupting units and driving the
//! application under test.

use std::io;
use std::process::ExitStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT, graceful shutdown
    Interrupt,
    /// SIGKILL
    Kill,
    /// SIGUSR1, deliberate fault in the application under test
    User1,
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Kill => "SIGKILL",
            Signal::User1 => "SIGUSR1",
        }
    }

    #[cfg(unix)]
    fn raw(&self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Kill => libc::SIGKILL,
            Signal::User1 => libc::SIGUSR1,
        }
    }
}

/// Signal a single process
pub fn send(pid: u32, signal: Signal) -> io::Result<()> {
    deliver(to_pid(pid)?, signal)
}

/// Signal every process in the group led by `pgid`
pub fn send_group(pgid: u32, signal: Signal) -> io::Result<()> {
    deliver(-to_pid(pgid)?, signal)
}

#[cfg(unix)]
fn to_pid(pid: u32) -> io::Result<libc::pid_t> {
    libc::pid_t::try_from(pid)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {pid}")))
}

#[cfg(unix)]
fn deliver(target: libc::pid_t, signal: Signal) -> io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions.
    if unsafe { libc::kill(target, signal.raw()) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn to_pid(pid: u32) -> io::Result<i64> {
    Ok(i64::from(pid))
}

#[cfg(not(unix))]
fn deliver(_target: i64, signal: Signal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} is not supported on this platform", signal.name()),
    ))
}

/// Shell-style exit code: the status code, or 128 + signal number
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}
