//! Fixed-point loudness meters fed one stereo sample at a time.
//!
//! Both meters follow the same asymmetric rule: on rising input the level
//! jumps a large fraction of the way towards it, on falling input it
//! creeps down by a much smaller fraction. The fast meter approximates a
//! PPM; the slow one keeps 16 extra fractional bits and far longer time
//! constants for the waveform overview.

/// Instantaneous level of a stereo sample.
pub fn level(left: i16, right: i16) -> u32 {
    left.unsigned_abs() as u32 + right.unsigned_abs() as u32
}

/// Move `current` towards `target`: by `>> attack` of the gap when rising,
/// `>> release` when falling, and always by at least one unit so the
/// target is reached.
fn approach(current: u64, target: u64, attack: u32, release: u32) -> u64 {
    if target > current {
        current + ((target - current) >> attack).max(1)
    } else if target < current {
        current - ((current - target) >> release).max(1)
    } else {
        current
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PpmMeter(u32);

impl PpmMeter {
    const ATTACK: u32 = 3;
    const RELEASE: u32 = 9;

    pub fn update(&mut self, v: u32) {
        self.0 = approach(self.0 as u64, v as u64, Self::ATTACK, Self::RELEASE) as u32;
    }

    pub fn level(&self) -> u32 {
        self.0
    }

    /// 8-bit value for the downsampled trace.
    pub fn trace(&self) -> u8 {
        (self.0 >> 8).min(u8::MAX as u32) as u8
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct OverviewMeter(u64);

impl OverviewMeter {
    const SCALE: u32 = 16;
    const ATTACK: u32 = 8;
    const RELEASE: u32 = 17;

    pub fn update(&mut self, v: u32) {
        let w = (v as u64) << Self::SCALE;
        self.0 = approach(self.0, w, Self::ATTACK, Self::RELEASE);
    }

    /// Level on the same scale as [`PpmMeter::level`].
    pub fn level(&self) -> u32 {
        (self.0 >> Self::SCALE) as u32
    }

    pub fn trace(&self) -> u8 {
        (self.0 >> 24).min(u8::MAX as u64) as u8
    }
}
