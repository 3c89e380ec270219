// Process-wide stdout/stderr redirection guarded by scoped acquisition
// Restores the original descriptors on drop, including during unwinding

use crate::errors::LogLocatorError;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

const STDOUT_FD: RawFd = 1;
const STDERR_FD: RawFd = 2;

/// Set while a redirection is active anywhere in the process
static REDIRECTED: AtomicBool = AtomicBool::new(false);

/// Returns true while some `StdStreamRedirect` holds the streams
pub fn is_redirected() -> bool {
    REDIRECTED.load(Ordering::SeqCst)
}

/// Exclusive hold on fd 1 and fd 2 pointing at a log file.
///
/// Nesting is not supported: entering while another guard is alive fails
/// with `LogLocatorError::AlreadyRedirected`.
pub struct StdStreamRedirect {
    saved_stdout: OwnedFd,
    saved_stderr: OwnedFd,
}

impl StdStreamRedirect {
    pub fn enter(target: &File) -> Result<Self, LogLocatorError> {
        if REDIRECTED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LogLocatorError::AlreadyRedirected);
        }

        match Self::swap_in(target) {
            Ok(guard) => Ok(guard),
            Err(e) => {
                REDIRECTED.store(false, Ordering::SeqCst);
                Err(LogLocatorError::Redirect(e))
            }
        }
    }

    fn swap_in(target: &File) -> io::Result<Self> {
        flush_std_streams();

        let saved_stdout = duplicate(STDOUT_FD)?;
        let saved_stderr = duplicate(STDERR_FD)?;

        dup2(target.as_raw_fd(), STDOUT_FD)?;
        if let Err(e) = dup2(target.as_raw_fd(), STDERR_FD) {
            // stderr never moved; put stdout back before reporting
            let _ = dup2(saved_stdout.as_raw_fd(), STDOUT_FD);
            return Err(e);
        }

        Ok(Self {
            saved_stdout,
            saved_stderr,
        })
    }
}

impl Drop for StdStreamRedirect {
    fn drop(&mut self) {
        flush_std_streams();
        // Nothing sensible to do if restoring fails; the saved descriptors
        // are closed when the OwnedFds drop either way.
        let _ = dup2(self.saved_stdout.as_raw_fd(), STDOUT_FD);
        let _ = dup2(self.saved_stderr.as_raw_fd(), STDERR_FD);
        REDIRECTED.store(false, Ordering::SeqCst);
    }
}

fn flush_std_streams() {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
}

fn duplicate(fd: RawFd) -> io::Result<OwnedFd> {
    // SAFETY: fd 1 and fd 2 stay open for the life of the process
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    borrowed.try_clone_to_owned()
}

fn dup2(src: RawFd, dst: RawFd) -> io::Result<()> {
    loop {
        // SAFETY: plain descriptor syscall, no memory is passed
        let rc = unsafe { libc::dup2(src, dst) };
        if rc != -1 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
