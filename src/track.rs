//! Track import and buffering.
//!
//! A [`Track`] runs an external importer that decodes a file to raw PCM,
//! streams its output into fixed-size blocks and meters the audio as it
//! arrives. The importer's pipe is serviced by whichever event loop owns
//! the track's poll entry (see [`crate::rig`]).

mod block;
mod buffer;
mod importer;
mod meter;
mod types;

pub use block::{BlockStore, Layout};
pub use buffer::Track;
pub use meter::{OverviewMeter, PpmMeter};
pub use types::{Awaken, Conclusion, Drain, ImportError, SAMPLE, StoreError, TrackStatus};

#[cfg(test)]
mod tests;
