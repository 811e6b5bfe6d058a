//! Pitch estimation from timecode displacement.
//!
//! An alpha-beta filter running on a fixed time step. Each observation is
//! the distance the record moved since the previous one; because the
//! timecode is decoded at discrete timestamps those distances arrive
//! quantised, and the filter smooths them into a velocity (the pitch) and
//! a small position offset relative to the latest observation.

use crate::config::PitchSettings;

/// Position gain, concluded experimentally.
pub const ALPHA: f64 = 1.0 / 512.0;

/// Velocity gain, concluded experimentally.
pub const BETA: f64 = ALPHA / 1024.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pitch {
    dt: f64,
    x: f64,
    v: f64,
    alpha: f64,
    beta: f64,
}

impl Pitch {
    /// Prepare the filter for observations every `dt` seconds.
    pub fn new(dt: f64) -> Self {
        Self::with_gains(dt, ALPHA, BETA)
    }

    /// Filter with the gains from `settings`.
    pub fn from_settings(dt: f64, settings: &PitchSettings) -> Self {
        Self::with_gains(dt, settings.alpha, settings.beta)
    }

    pub fn with_gains(dt: f64, alpha: f64, beta: f64) -> Self {
        Self {
            dt,
            x: 0.0,
            v: 0.0,
            alpha,
            beta,
        }
    }

    /// Input an observation: in the last `dt` seconds the position has
    /// moved by `dx`.
    pub fn observe(&mut self, dx: f64) {
        let predicted_x = self.x + self.v * self.dt;
        let predicted_v = self.v;

        let residual = dx - predicted_x;

        self.x = predicted_x + residual * self.alpha;
        self.v = predicted_v + residual * self.beta / self.dt;

        self.x -= dx; // relative to the latest observation
    }

    /// Estimated velocity in position units per second.
    pub fn velocity(&self) -> f64 {
        self.v
    }

    /// Estimated position relative to the latest raw observation.
    pub fn offset(&self) -> f64 {
        self.x
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }
}
