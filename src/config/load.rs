//! Where platter's settings come from.
//!
//! The importer command, block layout, pitch gains and log filter are
//! layered. A `PLATTER__<SECTION>__<KEY>` variable such as
//! `PLATTER__TRACK__MAX_BLOCKS` beats the config file, and the file beats
//! the built-in defaults. Nothing here checks the values; see
//! [`Settings::validate`].

use std::{env, path::PathBuf};

use super::schema::Settings;

impl Settings {
    /// Merge the config file (if any) and `PLATTER__*` variables over the
    /// defaults.
    pub fn load() -> Result<Self, ::config::ConfigError> {
        let config_path = resolve_config_path();

        let mut builder = ::config::Config::builder();

        if let Some(path) = &config_path {
            builder = builder.add_source(::config::File::from(path.as_path()).required(false));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("PLATTER")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build()?;
        let settings: Settings = cfg.try_deserialize()?;
        Ok(settings)
    }

    /// Check the settings describe a buffer layout the track can honour.
    pub fn validate(&self) -> Result<(), String> {
        let t = &self.track;
        if t.rate == 0 {
            return Err("track.rate must be >= 1".to_string());
        }
        if t.block_samples == 0 {
            return Err("track.block_samples must be >= 1".to_string());
        }
        if t.max_blocks == 0 {
            return Err("track.max_blocks must be >= 1".to_string());
        }
        if t.ppm_res == 0 || t.block_samples % t.ppm_res != 0 {
            return Err("track.ppm_res must divide track.block_samples".to_string());
        }
        if t.overview_res == 0 || t.block_samples % t.overview_res != 0 {
            return Err("track.overview_res must divide track.block_samples".to_string());
        }
        if !(self.pitch.alpha > 0.0 && self.pitch.beta > 0.0) {
            return Err("pitch.alpha and pitch.beta must be > 0".to_string());
        }
        Ok(())
    }
}

/// Config file to read: `PLATTER_CONFIG_PATH` when set, otherwise
/// [`default_config_path`].
pub fn resolve_config_path() -> Option<PathBuf> {
    env::var_os("PLATTER_CONFIG_PATH")
        .map(PathBuf::from)
        .or_else(default_config_path)
}

/// `platter/config.toml` in the per-user config directory, which is
/// `$XDG_CONFIG_HOME` or else `$HOME/.config`. `None` with neither set.
pub fn default_config_path() -> Option<PathBuf> {
    env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .map(|dir| dir.join("platter").join("config.toml"))
}
