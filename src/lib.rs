//! Deck audio core: tracks imported through an external decoder, metered
//! as they load, and a pitch estimator for timecoded vinyl.

pub mod config;
pub mod pitch;
pub mod rig;
pub mod track;

pub use config::Settings;
pub use pitch::Pitch;
pub use rig::{Rig, RigHandle, RigWaker};
pub use track::{Track, TrackStatus};
