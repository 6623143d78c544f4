//! OS glue: current user, advisory `flock`, and shutdown signals.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub uid: u32,
    pub name: String,
}

#[cfg(unix)]
pub fn current_user() -> UserIdentity {
    use nix::unistd::{Uid, User};

    let uid = Uid::current();
    let name = User::from_uid(uid)
        .ok()
        .flatten()
        .map(|u| u.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| uid.to_string());
    UserIdentity {
        uid: uid.as_raw(),
        name,
    }
}

#[cfg(not(unix))]
pub fn current_user() -> UserIdentity {
    UserIdentity {
        uid: 0,
        name: std::env::var("USERNAME").unwrap_or_else(|_| "unknown".to_string()),
    }
}

/// An exclusive advisory lock, released on drop.
#[derive(Debug)]
pub struct ExclusiveLock {
    #[cfg_attr(not(unix), allow(dead_code))]
    file: File,
}

impl ExclusiveLock {
    /// `Ok(None)` when another open file description holds a lock.
    #[cfg(unix)]
    pub fn try_acquire(path: &Path) -> io::Result<Option<ExclusiveLock>> {
        use nix::errno::Errno;
        use nix::fcntl::{flock, FlockArg};
        use std::os::fd::AsRawFd;

        let file = File::open(path)?;
        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => Ok(Some(ExclusiveLock { file })),
            Err(Errno::EWOULDBLOCK) => Ok(None),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    #[cfg(not(unix))]
    pub fn try_acquire(path: &Path) -> io::Result<Option<ExclusiveLock>> {
        Ok(Some(ExclusiveLock {
            file: File::open(path)?,
        }))
    }
}

#[cfg(unix)]
impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        use nix::fcntl::{flock, FlockArg};
        use std::os::fd::AsRawFd;

        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
    }
}

/// True when some other holder has `path` exclusively locked.
/// Missing files are never locked.
#[cfg(unix)]
pub fn is_exclusively_locked(path: &Path) -> io::Result<bool> {
    use nix::errno::Errno;
    use nix::fcntl::{flock, FlockArg};
    use std::os::fd::AsRawFd;

    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    match flock(file.as_raw_fd(), FlockArg::LockSharedNonblock) {
        Ok(()) => {
            let _ = flock(file.as_raw_fd(), FlockArg::Unlock);
            Ok(false)
        }
        Err(Errno::EWOULDBLOCK) => Ok(true),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
pub fn is_exclusively_locked(_path: &Path) -> io::Result<bool> {
    Ok(false)
}

/// Whether a process with `pid` exists. A permission error still means it does.
#[cfg(unix)]
pub fn process_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid <= 0 {
        return false;
    }
    !matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}

#[cfg(not(unix))]
pub fn process_alive(_pid: i32) -> bool {
    true
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_shutdown_signal(_signal: nix::libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to a flag the poll loop checks between cycles.
#[cfg(unix)]
pub fn install_shutdown_handler() -> io::Result<&'static AtomicBool> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action = SigAction::new(
        SigHandler::Handler(on_shutdown_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic.
        unsafe { sigaction(signal, &action) }.map_err(io::Error::from)?;
    }
    Ok(&SHUTDOWN)
}

#[cfg(not(unix))]
pub fn install_shutdown_handler() -> io::Result<&'static AtomicBool> {
    Ok(&SHUTDOWN)
}
