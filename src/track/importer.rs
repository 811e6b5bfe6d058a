//! Handle on one running importer process.
//!
//! The importer decodes a file to raw PCM on its stdout; its stderr stays
//! on the terminal. The read end of the pipe is non-blocking so the I/O
//! thread never stalls on it.

use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::types::ImportError;

pub struct Importer {
    child: Child,
    stdout: ChildStdout,
}

impl Importer {
    /// Launch `importer` on `path`.
    ///
    /// `Command` reports a failed exec back through its own channel and the
    /// child exits without running any of our code, so an `Err` here means
    /// no process is left behind.
    pub fn spawn(importer: &Path, path: &Path) -> Result<Self, ImportError> {
        let mut child = Command::new(importer)
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ImportError::Spawn {
                importer: importer.to_path_buf(),
                source,
            })?;

        let Some(stdout) = child.stdout.take() else {
            reap(child);
            return Err(ImportError::NonBlocking(io::Error::other(
                "importer stdout was not captured",
            )));
        };

        if let Err(e) = set_nonblocking(stdout.as_raw_fd()) {
            drop(stdout);
            reap(child);
            return Err(ImportError::NonBlocking(e));
        }

        debug!(pid = child.id(), importer = %importer.display(), path = %path.display(), "importer started");
        Ok(Self { child, stdout })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Descriptor to watch for read readiness.
    pub fn fd(&self) -> RawFd {
        self.stdout.as_raw_fd()
    }

    /// Ask the importer to exit (SIGTERM).
    pub fn terminate(&self) -> io::Result<()> {
        let pid = self.child.id() as libc::pid_t;
        // SAFETY: `pid` is our own unreaped child, so it cannot have been recycled.
        if unsafe { libc::kill(pid, libc::SIGTERM) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Close the pipe and reap the process. Returns whether it exited
    /// successfully.
    ///
    /// With a `grace` period, a process still running once it has elapsed
    /// is killed outright.
    pub fn wait(self, grace: Option<Duration>) -> bool {
        let Importer { mut child, stdout } = self;
        drop(stdout);

        let pid = child.id();
        if let Some(grace) = grace {
            let deadline = Instant::now() + grace;
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(5)),
                    Ok(None) => {
                        warn!(pid, grace_ms = grace.as_millis() as u64, "importer ignored SIGTERM, killing");
                        if let Err(e) = child.kill() {
                            error!(pid, error = %e, "failed to kill importer");
                        }
                        break;
                    }
                    Err(e) => {
                        error!(pid, error = %e, "failed to poll importer");
                        break;
                    }
                }
            }
        }

        match child.wait() {
            Ok(status) => {
                debug!(pid, %status, "importer exited");
                status.success()
            }
            Err(e) => {
                error!(pid, error = %e, "failed to wait for importer");
                false
            }
        }
    }
}

impl Read for Importer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout.read(buf)
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: `fd` is an open descriptor owned by the caller for the
    // duration of this call.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Dispose of a child we failed to finish setting up.
fn reap(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}
