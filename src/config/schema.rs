use std::path::PathBuf;

use serde::Deserialize;

/// Top-level settings loaded from `config.toml`.
///
/// File format: TOML
/// Default path (Linux/XDG): `$XDG_CONFIG_HOME/platter/config.toml` or `~/.config/platter/config.toml`
///
/// Precedence (highest wins):
/// 1) Environment variables (prefix `PLATTER__`, `__` as nested separator)
/// 2) Config file (if present)
/// 3) Struct defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub track: TrackSettings,
    pub pitch: PitchSettings,
    pub log: LogSettings,
}

/// Capacity and process settings shared by every track.
///
/// These are fixed for the lifetime of a track; changing them means
/// building a new one.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackSettings {
    /// Executable that decodes a file to raw 16-bit stereo PCM on stdout.
    pub importer: PathBuf,
    /// Nominal sample rate of the importer's output (Hz).
    pub rate: u32,
    /// Stereo samples held by one block.
    pub block_samples: usize,
    /// Upper bound on blocks per track; bounds the track length.
    pub max_blocks: usize,
    /// Samples per entry of the fast (PPM) meter trace.
    pub ppm_res: usize,
    /// Samples per entry of the slow (overview) meter trace.
    pub overview_res: usize,
    /// How long an aborted importer gets to exit after SIGTERM before it
    /// is killed outright (milliseconds). 0 waits indefinitely.
    pub abort_grace_ms: u64,
}

impl Default for TrackSettings {
    fn default() -> Self {
        Self {
            importer: PathBuf::from("platter-import"),
            rate: 44100,
            block_samples: 2048 * 1024,
            max_blocks: 64,
            ppm_res: 64,
            overview_res: 2048,
            abort_grace_ms: 2000,
        }
    }
}

/// Gains of the pitch estimator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PitchSettings {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for PitchSettings {
    fn default() -> Self {
        Self {
            alpha: crate::pitch::ALPHA,
            beta: crate::pitch::BETA,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}
