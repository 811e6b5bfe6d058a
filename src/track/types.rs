//! Small types shared across the track subsystem.
//!
//! Errors, the outcome of draining the importer's pipe, the record of how
//! the last import concluded and the status snapshot handed to callers.

use std::collections::TryReserveError;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Bytes per stereo sample: two interleaved signed 16-bit channels.
pub const SAMPLE: usize = 2 * std::mem::size_of::<i16>();

/// Failure to get an importer running. The track is left idle.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("failed to launch importer {}: {source}", .importer.display())]
    Spawn {
        importer: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to make importer output non-blocking: {0}")]
    NonBlocking(#[source] io::Error),
}

/// No room for more audio in the block store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("maximum track length reached ({max_blocks} blocks)")]
    LimitReached { max_blocks: usize },

    #[error("failed to allocate track block: {0}")]
    Alloc(#[from] TryReserveError),
}

/// Result of reading everything currently available from the importer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Drain {
    /// Nothing more to read right now; wait for the next readiness event.
    Pending,
    /// The importer closed its output.
    Finished,
    /// The block store is full or could not grow.
    OutOfSpace,
    /// Reading the pipe failed for a reason other than "no data yet".
    Failed,
}

/// How the most recent import came to an end.
///
/// Every route leads to the same teardown; this is kept so the routes
/// can be told apart in logs and tests.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Conclusion {
    EndOfStream,
    OutOfSpace,
    ReadError,
    Aborted,
}

impl Conclusion {
    pub(crate) fn from_drain(drain: Drain) -> Option<Self> {
        match drain {
            Drain::Pending => None,
            Drain::Finished => Some(Self::EndOfStream),
            Drain::OutOfSpace => Some(Self::OutOfSpace),
            Drain::Failed => Some(Self::ReadError),
        }
    }
}

/// Point-in-time copy of a track's ingestion state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackStatus {
    /// An importer process is running.
    pub importing: bool,
    pub importer_pid: Option<u32>,
    /// Raw bytes received from the current or most recent import.
    pub bytes: usize,
    /// Whole stereo samples committed.
    pub length: usize,
    pub rate: u32,
    /// Blocks allocated over the lifetime of the track.
    pub blocks: usize,
    /// `None` until an import has concluded.
    pub conclusion: Option<Conclusion>,
    /// Whether the last importer exited successfully.
    pub exit_ok: Option<bool>,
}

/// External wake primitive, signalled once a new importer is running so
/// the event loop picks up its descriptor without waiting for an
/// unrelated wakeup.
pub trait Awaken: Send + Sync {
    fn awaken(&self);
}
