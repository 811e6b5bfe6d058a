//! A track: audio held in memory, filled by an importer process.
//!
//! Every piece of mutable state sits behind one mutex. The control thread
//! calls [`Track::import`]; the single I/O thread that owns the poll entry
//! calls [`Track::pollfd`] and [`Track::handle`]. Reads of committed audio
//! and meter traces may come from anywhere.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::TrackSettings;

use super::block::{BlockStore, Layout};
use super::importer::Importer;
use super::meter::{OverviewMeter, PpmMeter, level};
use super::types::{Awaken, Conclusion, Drain, ImportError, SAMPLE, TrackStatus};

pub struct Track {
    importer: PathBuf,
    rate: u32,
    abort_grace: Option<Duration>,
    waker: Arc<dyn Awaken>,
    state: Mutex<TrackState>,
    /// Signalled whenever an import stops, or fails to start.
    idle: Condvar,
}

pub(super) struct TrackState {
    pub(super) artist: Option<String>,
    pub(super) title: Option<String>,

    pub(super) import: Option<Importer>,
    pub(super) store: BlockStore,

    pub(super) bytes: usize,
    pub(super) length: usize,
    pub(super) rate: u32,

    pub(super) ppm: PpmMeter,
    pub(super) overview: OverviewMeter,

    pub(super) conclusion: Option<Conclusion>,
    pub(super) exit_ok: Option<bool>,
}

impl TrackState {
    fn new(layout: Layout, rate: u32) -> Self {
        Self {
            artist: None,
            title: None,
            import: None,
            store: BlockStore::new(layout),
            bytes: 0,
            length: 0,
            rate,
            ppm: PpmMeter::default(),
            overview: OverviewMeter::default(),
            conclusion: None,
            exit_ok: None,
        }
    }

    /// Launch the importer and reset ingestion to the start of the store.
    /// Blocks from a previous import are written over, not freed.
    pub(super) fn start_import(
        &mut self,
        importer: &Path,
        path: &Path,
        rate: u32,
    ) -> Result<(), ImportError> {
        debug_assert!(self.import.is_none());

        self.import = Some(Importer::spawn(importer, path)?);
        self.bytes = 0;
        self.length = 0;
        self.ppm = PpmMeter::default();
        self.overview = OverviewMeter::default();
        self.rate = rate;
        self.conclusion = None;
        self.exit_ok = None;
        Ok(())
    }

    /// Conclude an import, whether it finished or was aborted.
    pub(super) fn stop_import(&mut self, importer: Importer, conclusion: Conclusion) {
        self.conclude(importer, conclusion, None);
    }

    /// Prematurely end an import.
    pub(super) fn abort_import(&mut self, importer: Importer, grace: Option<Duration>) {
        if let Err(e) = importer.terminate() {
            error!(pid = importer.id(), error = %e, "failed to signal importer");
        }
        self.conclude(importer, Conclusion::Aborted, grace);
    }

    fn conclude(&mut self, importer: Importer, conclusion: Conclusion, grace: Option<Duration>) {
        let ok = importer.wait(grace);
        self.conclusion = Some(conclusion);
        self.exit_ok = Some(ok);

        if ok {
            info!(?conclusion, samples = self.length, "track import completed");
        } else {
            warn!(?conclusion, samples = self.length, "track import did not complete successfully");
        }
    }

    /// Account for `len` bytes placed in the store at the write offset.
    ///
    /// Only whole samples are committed and metered; a trailing partial
    /// sample waits for the bytes that complete it.
    pub(super) fn commit(&mut self, len: usize) {
        self.bytes += len;

        let complete = self.bytes / SAMPLE;
        debug_assert!(complete <= self.store.capacity_samples());
        let end = complete.min(self.store.capacity_samples());

        while self.length < end {
            self.meter_sample(self.length);
            self.length += 1;
        }
    }

    fn meter_sample(&mut self, n: usize) {
        let layout = *self.store.layout();
        let (index, fill) = layout.locate(n);
        let Some(block) = self.store.block_mut(index) else {
            return;
        };
        let Some([left, right]) = block.sample(fill) else {
            return;
        };

        let v = level(left, right);
        self.ppm.update(v);
        self.overview.update(v);

        if (fill + 1) % layout.ppm_res == 0 {
            if let Some(slot) = block.ppm.get_mut(fill / layout.ppm_res) {
                *slot = self.ppm.trace();
            }
        }
        if (fill + 1) % layout.overview_res == 0 {
            if let Some(slot) = block.overview.get_mut(fill / layout.overview_res) {
                *slot = self.overview.trace();
            }
        }
    }

    /// Read everything the importer has ready, committing as we go.
    pub(super) fn drain(&mut self) -> Drain {
        let Some(mut importer) = self.import.take() else {
            return Drain::Failed;
        };
        let drain = self.drain_from(&mut importer);
        self.import = Some(importer);
        drain
    }

    /// Read `input` into the store until it would block, ends or fails.
    pub(super) fn drain_from(&mut self, input: &mut impl Read) -> Drain {
        loop {
            let region = match self.store.acquire_write_region(self.bytes) {
                Ok(region) => region,
                Err(e) => {
                    warn!(error = %e, samples = self.length, "track truncated");
                    return Drain::OutOfSpace;
                }
            };

            match input.read(region) {
                Ok(0) => break,
                Ok(n) => self.commit(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Drain::Pending,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "failed to read from importer");
                    return Drain::Failed;
                }
            }
        }

        let (pcm, ppm, overview) = self.store.memory_kib();
        info!(pcm_kib = pcm, ppm_kib = ppm, overview_kib = overview, "track memory");
        Drain::Finished
    }

    /// Stop the import if `drain` ended it.
    pub(super) fn settle(&mut self, drain: Drain) {
        let Some(conclusion) = Conclusion::from_drain(drain) else {
            return;
        };
        if let Some(importer) = self.import.take() {
            self.stop_import(importer, conclusion);
        }
    }
}

impl Track {
    pub fn new(settings: &TrackSettings, waker: Arc<dyn Awaken>) -> Self {
        let abort_grace =
            (settings.abort_grace_ms > 0).then(|| Duration::from_millis(settings.abort_grace_ms));

        Self {
            importer: settings.importer.clone(),
            rate: settings.rate,
            abort_grace,
            waker,
            state: Mutex::new(TrackState::new(Layout::from(settings), settings.rate)),
            idle: Condvar::new(),
        }
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, TrackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn importer(&self) -> &Path {
        &self.importer
    }

    /// Begin importing `path`, whatever the track is doing.
    ///
    /// A running import is aborted and reaped first, so at most one
    /// importer ever exists for this track. On failure the track is left
    /// with none.
    pub fn import(&self, path: impl AsRef<Path>) -> Result<(), ImportError> {
        let path = path.as_ref();
        {
            let mut state = self.lock();

            if let Some(importer) = state.import.take() {
                state.abort_import(importer, self.abort_grace);
            }

            if let Err(e) = state.start_import(&self.importer, path, self.rate) {
                error!(error = %e, path = %path.display(), "track import failed to start");
                self.idle.notify_all();
                return Err(e);
            }
        }

        self.waker.awaken();
        Ok(())
    }

    /// Poll entry for the importer's output, if an import is running.
    pub fn pollfd(&self) -> Option<libc::pollfd> {
        let state = self.lock();
        state.import.as_ref().map(|importer| libc::pollfd {
            fd: importer.fd(),
            events: libc::POLLIN,
            revents: 0,
        })
    }

    /// React to readiness on the descriptor from [`Track::pollfd`].
    ///
    /// Only the thread that owns the poll entry may call this.
    pub fn handle(&self, revents: libc::c_short) {
        if revents == 0 {
            return;
        }

        let mut state = self.lock();
        if state.import.is_none() {
            return;
        }

        let drain = state.drain();
        state.settle(drain);
        if state.import.is_none() {
            self.idle.notify_all();
        }
    }

    /// Block until no import is running, or `timeout` passes. Returns
    /// whether the track is idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .idle
            .wait_timeout_while(state, timeout, |state| state.import.is_some())
            .unwrap_or_else(PoisonError::into_inner);
        state.import.is_none()
    }

    pub fn status(&self) -> TrackStatus {
        let state = self.lock();
        TrackStatus {
            importing: state.import.is_some(),
            importer_pid: state.import.as_ref().map(Importer::id),
            bytes: state.bytes,
            length: state.length,
            rate: state.rate,
            blocks: state.store.len(),
            conclusion: state.conclusion,
            exit_ok: state.exit_ok,
        }
    }

    pub fn is_importing(&self) -> bool {
        self.lock().import.is_some()
    }

    /// Committed sample at `index` as `[left, right]`.
    pub fn sample(&self, index: usize) -> Option<[i16; 2]> {
        let state = self.lock();
        if index >= state.length {
            return None;
        }
        state.store.sample(index)
    }

    /// Fast meter trace covering sample `index`, once its group is complete.
    pub fn ppm(&self, index: usize) -> Option<u8> {
        let state = self.lock();
        let res = state.store.layout().ppm_res;
        if index / res >= state.length / res {
            return None;
        }
        state.store.ppm(index)
    }

    /// Overview trace covering sample `index`, once its group is complete.
    pub fn overview(&self, index: usize) -> Option<u8> {
        let state = self.lock();
        let res = state.store.layout().overview_res;
        if index / res >= state.length / res {
            return None;
        }
        state.store.overview(index)
    }

    pub fn set_metadata(&self, artist: Option<String>, title: Option<String>) {
        let mut state = self.lock();
        state.artist = artist;
        state.title = title;
    }

    pub fn artist(&self) -> Option<String> {
        self.lock().artist.clone()
    }

    pub fn title(&self) -> Option<String> {
        self.lock().title.clone()
    }
}

impl Drop for Track {
    /// Force a cleanup from whichever state we are in.
    fn drop(&mut self) {
        let grace = self.abort_grace;
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);

        if let Some(importer) = state.import.take() {
            state.abort_import(importer, grace);
        }

        info!(blocks = state.store.len(), "releasing track");
    }
}
