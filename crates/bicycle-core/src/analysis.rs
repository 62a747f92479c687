//! Length snapping and tempo/meter estimation for recorded layers

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BicycleError, Result};
use crate::metric_time::{Meter, MetricDuration, Tempo, TimingSpec, SPOKES_PER_WHOLE_NOTE};

// ============================================================================
// Length snapping
// ============================================================================

/// Largest numerator or denominator tried when relating two lengths
const RATIO_LIMIT: i32 = 7;

/// A small-integer relationship `n:m` between a layer and the base length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthSync {
    pub n: i32,
    pub m: i32,
    /// Amount to add to the layer length, never positive
    pub adjustment: MetricDuration,
}

/// Snap `len` onto an exact multiple or fraction of `base`
///
/// Tries ratios `n:m` with both terms below 7 and measures how far `len` is
/// from `n/m` of `base`. Only shortening by at most `max_shorten` (the slack
/// after the last recorded event) is acceptable. The window is checked on the
/// error rounded to whole spokes, so a fit less than half a spoke long still
/// counts as no lengthening.
pub fn sync_length(
    base: MetricDuration,
    len: MetricDuration,
    max_shorten: MetricDuration,
) -> Result<LengthSync> {
    if base <= MetricDuration::ZERO {
        return Err(BicycleError::NoReferenceLength);
    }

    let b = base.spokes() as f64;
    let l = len.spokes() as f64;
    let lowest = -(max_shorten.spokes().max(0) as i64);

    let mut best: Option<(i32, i32, f64)> = None;

    if l > 0.0 {
        for i in 1..RATIO_LIMIT {
            let (n, m) = if b < l {
                ((i as f64 * l / b).round() as i32, i)
            } else {
                (i, (i as f64 * b / l).round() as i32)
            };
            if n == 0 || m == 0 {
                continue;
            }
            if i > 1 && (n >= RATIO_LIMIT || m >= RATIO_LIMIT) {
                continue;
            }

            let err = (n as f64 * b - m as f64 * l) / m as f64;
            let adj = err.round() as i64;
            if adj < lowest || adj > 0 {
                continue;
            }
            if best.is_none_or(|(_, _, e)| err.abs() < e.abs()) {
                best = Some((n, m, err));
            }
        }
    }

    match best {
        Some((n, m, err)) => {
            let adjustment = MetricDuration::from_spokes(err.round() as i32);
            debug!(
                base = base.spokes(),
                len = len.spokes(),
                n,
                m,
                adjustment = adjustment.spokes(),
                "Layer sync"
            );
            Ok(LengthSync { n, m, adjustment })
        }
        None => Err(BicycleError::NoSyncRatio {
            base: base.spokes(),
            len: len.spokes(),
            max_shorten: max_shorten.spokes(),
        }),
    }
}

// ============================================================================
// Tempo and meter estimation
// ============================================================================

/// Tempo and meter inferred from a recording
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub tempo: Tempo,
    pub meter: Meter,
}

/// How far `x` sits from the grid, summed over eight binary subdivisions
///
/// Each round folds the phase into [0, 1), adds the distance to the nearest
/// integer and doubles it, so hits on halves, quarters, eighths... cost less
/// the coarser the grid line they land on.
pub fn beat_error(mut x: f64) -> f64 {
    let mut e = 0.0;
    for _ in 0..8 {
        x -= x.trunc();
        e += if x >= 0.5 { 1.0 - x } else { x };
        x += x;
    }
    e
}

/// Infer tempo and meter from a closed recording
///
/// `intervals` yields the time from each recorded event to the next,
/// starting with the first event of the loop; `recorded_length` is the
/// total loop length. All times are in spokes at `spec.tempo`.
///
/// Every candidate count `N` of base units (bars if the meter is locked,
/// beats otherwise) that keeps the tempo within `spec.low_tempo` to
/// `spec.high_tempo` is scored by how well the event onsets fit a grid of
/// `N` equal divisions; the best fit wins.
pub fn estimate_time_signature<I>(
    spec: &TimingSpec,
    recorded_length: MetricDuration,
    intervals: I,
) -> TimeSignature
where
    I: Iterator<Item = MetricDuration> + Clone,
{
    let mut meter = spec.meter;
    if meter.base == 0 {
        meter.base = 4;
    }
    if !spec.locked_meter || meter.beats == 0 {
        meter.beats = 1;
    }

    let base_unit = MetricDuration::from_spokes(
        SPOKES_PER_WHOLE_NOTE * meter.beats as i32 / meter.base as i32,
    );

    let max_base_sec = spec.low_tempo.to_time_interval(base_unit).as_secs_f64();
    let min_base_sec = spec.high_tempo.to_time_interval(base_unit).as_secs_f64();
    let phrase_sec = spec.tempo.to_time_interval(recorded_length).as_secs_f64();

    let min_n = ((phrase_sec / max_base_sec).ceil() as i32).max(1);
    let max_n = (phrase_sec / min_base_sec).floor() as i32;

    debug!(
        beats = meter.beats,
        base = meter.base,
        base_unit = base_unit.spokes(),
        min_base_sec,
        max_base_sec,
        phrase_sec,
        min_n,
        max_n,
        "Estimating time signature"
    );

    let mut best_n = 0;
    let mut best_err = f64::INFINITY;

    for n in min_n..=max_n {
        let unit_sec = phrase_sec / n as f64;

        let mut err = 0.0;
        let mut t = MetricDuration::ZERO;
        for dt in intervals.clone() {
            let onset_sec = spec.tempo.to_time_interval(t).as_secs_f64();
            err += beat_error(onset_sec / unit_sec);
            if err > best_err {
                break;
            }
            t += dt;
        }

        if err < best_err {
            best_n = n;
            best_err = err;
        }
    }

    if best_n == 0 {
        warn!(min_n, max_n, phrase_sec, "No unit count fits the tempo range, assuming one");
        best_n = 1;
    }

    let base_beats = base_unit.in_pulses() as f64;
    let phrase_per_minute = 60.0 / phrase_sec;
    let bpm = phrase_per_minute * best_n as f64 * base_beats;

    let meter = if spec.locked_meter && spec.meter.is_specified() {
        spec.meter
    } else {
        Meter::new(best_n.clamp(1, u8::MAX as i32) as u8, meter.base)
    };

    info!(
        units = best_n,
        beats = meter.beats,
        base = meter.base,
        bpm,
        error = best_err,
        "Estimated time signature"
    );

    TimeSignature {
        tempo: Tempo::from_bpm(bpm),
        meter,
    }
}
