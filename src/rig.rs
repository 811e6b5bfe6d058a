//! The I/O loop that services tracks.
//!
//! One thread polls every track's importer pipe alongside a self-wake
//! socket, and hands readiness to [`Track::handle`]. It is the only caller
//! of `handle` for the tracks it owns. Other threads nudge it through the
//! [`RigWaker`] when there is a new descriptor to watch, or to shut down.

use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use crate::track::{Awaken, Track};

pub struct RigWaker {
    tx: UnixStream,
    quit: AtomicBool,
}

impl Awaken for RigWaker {
    fn awaken(&self) {
        match (&self.tx).write(&[1]) {
            Ok(_) => {}
            // Socket buffer full: a wakeup is already pending.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!(error = %e, "failed to awaken rig"),
        }
    }
}

pub struct Rig {
    tracks: Vec<Arc<Track>>,
    wake_rx: UnixStream,
    waker: Arc<RigWaker>,
}

impl Rig {
    pub fn new() -> io::Result<Self> {
        let (tx, rx) = UnixStream::pair()?;
        tx.set_nonblocking(true)?;
        rx.set_nonblocking(true)?;

        Ok(Self {
            tracks: Vec::new(),
            wake_rx: rx,
            waker: Arc::new(RigWaker {
                tx,
                quit: AtomicBool::new(false),
            }),
        })
    }

    /// Wake primitive to hand to each [`Track`] this rig will service.
    pub fn waker(&self) -> Arc<RigWaker> {
        self.waker.clone()
    }

    pub fn add_track(&mut self, track: Arc<Track>) {
        self.tracks.push(track);
    }

    /// Poll until asked to quit.
    pub fn run(&mut self) -> io::Result<()> {
        let mut pollfds: Vec<libc::pollfd> = Vec::with_capacity(self.tracks.len() + 1);
        let mut owners: Vec<usize> = Vec::with_capacity(self.tracks.len());

        loop {
            if self.waker.quit.load(Ordering::Acquire) {
                return Ok(());
            }

            pollfds.clear();
            owners.clear();
            pollfds.push(libc::pollfd {
                fd: self.wake_rx.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
            for (i, track) in self.tracks.iter().enumerate() {
                if let Some(pe) = track.pollfd() {
                    pollfds.push(pe);
                    owners.push(i);
                }
            }

            // SAFETY: `pollfds` is a live, correctly sized array of pollfd.
            let r = unsafe {
                libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, -1)
            };
            if r == -1 {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }

            if pollfds[0].revents != 0 {
                self.clear_wakeups();
            }

            for (pe, &i) in pollfds[1..].iter().zip(&owners) {
                self.tracks[i].handle(pe.revents);
            }
        }
    }

    fn clear_wakeups(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            match self.wake_rx.read(&mut buf) {
                Ok(0) => return,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "failed to clear rig wakeups");
                    return;
                }
            }
        }
    }

    /// Run the loop on its own thread.
    pub fn spawn(mut self) -> io::Result<RigHandle> {
        let waker = self.waker.clone();
        let join = thread::Builder::new().name("rig".to_string()).spawn(move || {
            debug!(tracks = self.tracks.len(), "rig started");
            if let Err(e) = self.run() {
                error!(error = %e, "rig stopped");
            }
        })?;

        Ok(RigHandle {
            waker,
            join: Mutex::new(Some(join)),
        })
    }
}

pub struct RigHandle {
    waker: Arc<RigWaker>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl RigHandle {
    pub fn waker(&self) -> Arc<RigWaker> {
        self.waker.clone()
    }

    /// Stop the loop and wait for its thread.
    pub fn quit(&self) {
        if let Ok(mut j) = self.join.lock() {
            if let Some(h) = j.take() {
                self.waker.quit.store(true, Ordering::Release);
                self.waker.awaken();
                if h.join().is_err() {
                    error!("rig thread panicked");
                }
            }
        }
    }
}

impl Drop for RigHandle {
    fn drop(&mut self) {
        self.quit();
    }
}
