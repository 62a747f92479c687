//! Metric time: spokes, tempo and timing specifications
//!
//! All musical timing is measured against "the pulse" (for most purposes the
//! beat, as in BPM). The smallest unit of metric time is the spoke, 1/1680th
//! of a pulse, so MIDI clocks (24 per quarter note) and the common tuplet
//! subdivisions all land on whole spokes.
//!
//! | tempo  | one spoke |
//! |--------|-----------|
//! | 30bpm  | 1.19ms    |
//! | 120bpm | 0.30ms    |
//! | 300bpm | 0.12ms    |

use std::ops::{Add, AddAssign, Neg, Rem, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Spokes in one pulse (quarter note)
pub const SPOKES_PER_PULSE: i32 = 16 * 3 * 5 * 7;

/// Spokes in one whole note
pub const SPOKES_PER_WHOLE_NOTE: i32 = SPOKES_PER_PULSE * 4;

/// MIDI clock ticks per quarter note
pub const MIDI_CLOCKS_PER_PULSE: i32 = 24;

const MICROS_PER_MINUTE: f64 = 60_000_000.0;

// ============================================================================
// Metric durations
// ============================================================================

/// Interval between events in metric time, counted in spokes
///
/// The absolute maximum is about 1.2M pulses, several days even at 300bpm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct MetricDuration(i32);

impl MetricDuration {
    pub const ZERO: Self = Self(0);
    /// Sentinel for an unbounded or absent deadline
    pub const FOREVER: Self = Self(i32::MAX);

    pub const fn from_spokes(spokes: i32) -> Self {
        Self(spokes)
    }

    pub const fn from_pulses(pulses: i32) -> Self {
        Self(pulses * SPOKES_PER_PULSE)
    }

    pub const fn from_midi_clocks(clocks: i32) -> Self {
        Self(clocks * SPOKES_PER_PULSE / MIDI_CLOCKS_PER_PULSE)
    }

    pub const fn spokes(self) -> i32 {
        self.0
    }

    pub fn in_pulses(self) -> f32 {
        self.0 as f32 / SPOKES_PER_PULSE as f32
    }

    pub fn is_forever(self) -> bool {
        self == Self::FOREVER
    }

    /// Rescale by `rate`, rounding to the nearest spoke
    pub fn retime(self, rate: f64) -> Self {
        Self((self.0 as f64 * rate).round() as i32)
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }
}

impl Add for MetricDuration {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for MetricDuration {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Rem for MetricDuration {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        Self(self.0 % rhs.0)
    }
}

impl Neg for MetricDuration {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl AddAssign for MetricDuration {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for MetricDuration {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

/// Length of a sounding note in spokes
///
/// Always positive once stamped; zero marks a note still being held.
/// The maximum is about 39 pulses, low resolution is fine here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NoteDuration(u16);

pub const MIN_DURATION: NoteDuration = NoteDuration(1);
pub const MAX_DURATION: NoteDuration = NoteDuration(u16::MAX);

impl NoteDuration {
    pub const ZERO: Self = Self(0);

    pub const fn from_spokes(spokes: u16) -> Self {
        Self(spokes)
    }

    pub const fn spokes(self) -> u16 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Clamp an elapsed interval into `[MIN_DURATION, MAX_DURATION]`
    pub fn clamped(d: MetricDuration) -> Self {
        let spokes = d
            .spokes()
            .clamp(MIN_DURATION.0 as i32, MAX_DURATION.0 as i32);
        Self(spokes as u16)
    }

    pub fn as_interval(self) -> MetricDuration {
        MetricDuration(self.0 as i32)
    }
}

// ============================================================================
// Wall-clock time
// ============================================================================

/// Monotonic wall-clock instant in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct WallTime(u64);

impl WallTime {
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1000)
    }

    pub const fn micros(self) -> u64 {
        self.0
    }

    /// Interval since `earlier`, zero if `earlier` is actually later
    pub fn since(self, earlier: WallTime) -> TimeInterval {
        TimeInterval(self.0.saturating_sub(earlier.0) as i64)
    }

    pub fn offset(self, dt: TimeInterval) -> Self {
        Self(self.0.saturating_add_signed(dt.0))
    }
}

/// Wall-clock interval in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TimeInterval(i64);

impl TimeInterval {
    pub const ZERO: Self = Self(0);
    pub const FOREVER: Self = Self(i64::MAX);

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1000)
    }

    pub const fn micros(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn is_forever(self) -> bool {
        self == Self::FOREVER
    }

    /// As a std duration for blocking waits; `None` means wait indefinitely
    pub fn to_std(self) -> Option<std::time::Duration> {
        if self.is_forever() {
            None
        } else {
            Some(std::time::Duration::from_micros(self.0.max(0) as u64))
        }
    }
}

// ============================================================================
// Tempo
// ============================================================================

/// A tempo, stored as a rate in spokes per microsecond
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Tempo {
    rate: f64,
}

impl Tempo {
    pub fn from_bpm(bpm: f64) -> Self {
        Self {
            rate: bpm * SPOKES_PER_PULSE as f64 / MICROS_PER_MINUTE,
        }
    }

    pub fn in_bpm(&self) -> f64 {
        self.rate * MICROS_PER_MINUTE / SPOKES_PER_PULSE as f64
    }

    pub fn to_time_interval(&self, d: MetricDuration) -> TimeInterval {
        if d.is_forever() {
            return TimeInterval::FOREVER;
        }
        TimeInterval((d.spokes() as f64 / self.rate).round() as i64)
    }

    pub fn to_metric(&self, t: TimeInterval) -> MetricDuration {
        MetricDuration((t.micros() as f64 * self.rate).round() as i32)
    }

    /// Factor that rewrites durations recorded at `from` into `to`
    pub fn retime_rate(from: &Tempo, to: &Tempo) -> f64 {
        to.rate / from.rate
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::from_bpm(120.0)
    }
}

impl From<f64> for Tempo {
    fn from(bpm: f64) -> Self {
        Self::from_bpm(bpm)
    }
}

impl From<Tempo> for f64 {
    fn from(t: Tempo) -> f64 {
        t.in_bpm()
    }
}

// ============================================================================
// Meter and timing specification
// ============================================================================

/// Time signature; `beats == 0` means not yet known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    pub beats: u8,
    pub base: u8,
}

impl Meter {
    pub const fn new(beats: u8, base: u8) -> Self {
        Self { beats, base }
    }

    pub fn is_specified(&self) -> bool {
        self.beats != 0
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

/// Where the tempo comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempoMode {
    /// Estimated from the first recorded layer
    #[default]
    Inferred,
    /// Fixed by configuration
    Locked,
    /// Following an external clock
    Synced,
}

/// Tempo and meter settings for the loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSpec {
    /// Tempo currently playing
    pub tempo: Tempo,
    /// Low end of the tempo estimation range
    pub low_tempo: Tempo,
    /// High end of the tempo estimation range
    pub high_tempo: Tempo,
    pub tempo_mode: TempoMode,
    /// Meter currently playing
    pub meter: Meter,
    /// Layer timing is locked to the given meter
    pub locked_meter: bool,
}

impl Default for TimingSpec {
    fn default() -> Self {
        Self {
            tempo: Tempo::from_bpm(120.0),
            low_tempo: Tempo::from_bpm(75.0),
            high_tempo: Tempo::from_bpm(140.0),
            tempo_mode: TempoMode::Inferred,
            meter: Meter::default(),
            locked_meter: false,
        }
    }
}

impl TimingSpec {
    /// Length of one bar of the current meter
    pub fn base_length(&self) -> MetricDuration {
        if self.meter.base == 0 {
            return MetricDuration::ZERO;
        }
        MetricDuration::from_spokes(
            self.meter.beats as i32 * SPOKES_PER_WHOLE_NOTE / self.meter.base as i32,
        )
    }
}
