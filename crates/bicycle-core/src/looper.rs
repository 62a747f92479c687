//! The loop: ten layers, the clock and the arm/record/overdub state machine
//!
//! Everything here runs on the real-time thread. After construction nothing
//! allocates: events live in the fixed [`CellArena`], layers in a fixed array.

use tracing::{debug, info};

use crate::analysis::estimate_time_signature;
use crate::arena::{CellArena, ARENA_CAPACITY};
use crate::clock::ClockLayer;
use crate::layer::{Layer, Playback};
use crate::metric_time::{MetricDuration, Tempo, TempoMode, TimeInterval, TimingSpec, WallTime};
use crate::midi::{EventSink, MidiEvent};
use crate::notes::NoteTracker;
use crate::status::{LayerStatus, Status, LAYER_COUNT};

/// Second press of the same layer control within this window clears it
const DOUBLE_PRESS: TimeInterval = TimeInterval::from_millis(1000);

/// Metric time is folded back to zero once it runs past this
const REBASE_AFTER: MetricDuration = MetricDuration::from_spokes(1 << 30);

/// Forwards to the output only while MIDI clock is enabled
struct ClockGate<'a, S: EventSink> {
    open: bool,
    sink: &'a mut S,
}

impl<S: EventSink> EventSink for ClockGate<'_, S> {
    fn send(&mut self, ev: MidiEvent) {
        if self.open {
            self.sink.send(ev);
        }
    }
}

pub struct Loop<S: EventSink> {
    sink: S,
    midi_clock: bool,

    arena: CellArena,
    notes: NoteTracker,
    clock: ClockLayer,
    layers: [Layer; LAYER_COUNT],

    // metric time is epoch_time + epoch_tempo * (wall - epoch_wall)
    epoch_wall: WallTime,
    epoch_time: MetricDuration,
    epoch_tempo: Tempo,

    now_wall: Option<WallTime>,
    now_time: MetricDuration,

    timing_spec: TimingSpec,

    armed: bool,
    active_layer: usize,
    layer_count: usize,
    layer_armed: bool,
    armed_time: Option<WallTime>,
}

impl<S: EventSink> Loop<S> {
    pub fn new(sink: S) -> Self {
        Self::with_capacity(ARENA_CAPACITY, sink)
    }

    /// A loop whose layers share `cells` event records in total
    pub fn with_capacity(cells: usize, sink: S) -> Self {
        let timing_spec = TimingSpec::default();
        Self {
            sink,
            midi_clock: true,
            arena: CellArena::new(cells),
            notes: NoteTracker::new(),
            clock: ClockLayer::new(),
            layers: std::array::from_fn(|_| Layer::new()),
            epoch_wall: WallTime::default(),
            epoch_time: MetricDuration::ZERO,
            epoch_tempo: timing_spec.tempo,
            now_wall: None,
            now_time: MetricDuration::ZERO,
            timing_spec,
            armed: true,
            active_layer: 0,
            layer_count: 0,
            layer_armed: false,
            armed_time: None,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn arena(&self) -> &CellArena {
        &self.arena
    }

    pub fn layer(&self, layer: usize) -> Option<&Layer> {
        self.layers.get(layer)
    }

    fn wall_now(&self) -> WallTime {
        self.now_wall.unwrap_or_default()
    }

    // ========================================================================
    // Time
    // ========================================================================

    /// Bring everything up to wall time `now`
    ///
    /// Returns how long the caller may wait before something else is due.
    /// The first call, and any call with a time earlier than the last, only
    /// re-anchors the epoch.
    pub fn advance(&mut self, now: WallTime) -> TimeInterval {
        let Some(last) = self.now_wall else {
            self.anchor(now);
            return TimeInterval::ZERO;
        };
        if now < last {
            debug!(now = now.micros(), last = last.micros(), "Wall time went backwards");
            self.anchor(now);
            return TimeInterval::ZERO;
        }

        self.rebase(last);

        let elapsed = now.since(self.epoch_wall);
        let new_time = self
            .epoch_time
            .checked_add(self.epoch_tempo.to_metric(elapsed))
            .unwrap_or(MetricDuration::FOREVER);
        let mut dt = new_time - self.now_time;

        // set once up front; the stepping below does not move them
        self.now_time = new_time;
        self.now_wall = Some(now);

        let mut next = self.next_deadline();
        while dt > MetricDuration::ZERO {
            let step = dt.min(next.max(MetricDuration::ZERO));
            next = self.step(step);
            dt -= step;
        }

        self.epoch_tempo.to_time_interval(next.max(MetricDuration::ZERO))
    }

    /// Restart metric time from zero at wall time `last` once it gets large
    ///
    /// Layers, notes and the clock only see differences, so the only
    /// absolute times to move are the epoch and the held-note starts.
    fn rebase(&mut self, last: WallTime) {
        if self.now_time < REBASE_AFTER {
            return;
        }
        debug!(spokes = self.now_time.spokes(), "Rebasing metric time");
        self.notes.rebase(self.now_time);
        self.epoch_wall = last;
        self.epoch_time = MetricDuration::ZERO;
        self.now_time = MetricDuration::ZERO;
    }

    fn anchor(&mut self, now: WallTime) {
        self.epoch_wall = now;
        self.epoch_time = self.now_time;
        self.now_wall = Some(now);
    }

    fn next_deadline(&self) -> MetricDuration {
        let mut next = self.notes.next(&self.arena).min(self.clock.next());
        for layer in &self.layers {
            next = next.min(layer.next(&self.arena));
        }
        next
    }

    /// Advance pending note-offs, the clock and every layer by `dt` in lockstep
    fn step(&mut self, dt: MetricDuration) -> MetricDuration {
        let mut next = self.notes.advance(dt, &mut self.arena, &mut self.sink);

        let mut gate = ClockGate {
            open: self.midi_clock,
            sink: &mut self.sink,
        };
        next = next.min(self.clock.advance(dt, &mut gate));

        let mut pb = Playback {
            arena: &mut self.arena,
            notes: &mut self.notes,
            sink: &mut self.sink,
        };
        for layer in &mut self.layers {
            next = next.min(layer.advance(dt, &mut pb));
        }
        next
    }

    // ========================================================================
    // Performance controls
    // ========================================================================

    /// Take in a performance event, recording it on the active layer
    pub fn add_event(&mut self, ev: MidiEvent) {
        if ev.is_note_off() {
            self.sink.send(ev);
            self.notes.finish(self.now_time, &ev, &mut self.arena);
            return;
        }

        if self.armed {
            self.reset_layers();

            self.epoch_wall = self.wall_now();
            self.epoch_time = MetricDuration::ZERO;
            self.now_time = MetricDuration::ZERO;

            self.armed = false;
            self.kick_clock();
            info!("Recording first layer");
        }

        let i = self.active_layer;
        if self.layer_armed {
            self.layers[i].clear(&mut self.arena, &mut self.notes);
            self.layer_armed = false;
        }

        let mut pb = Playback {
            arena: &mut self.arena,
            notes: &mut self.notes,
            sink: &mut self.sink,
        };
        self.layers[i].add_event(self.now_time, ev, &mut pb);
    }

    /// Close the active layer into a loop and move on to the next slot
    pub fn keep(&mut self) {
        let i = self.active_layer;
        if !self.layers[i].keep(&mut self.arena) {
            debug!(layer = i, "Nothing to keep");
            return;
        }

        if self.layer_count == 1 {
            self.keep_first_layer(i);
        } else {
            let base = self.timing_spec.base_length();
            let mut pb = Playback {
                arena: &mut self.arena,
                notes: &mut self.notes,
                sink: &mut self.sink,
            };
            self.layers[i].resize(base, &mut pb);
        }

        info!(
            layer = i,
            length = self.layers[i].length().spokes(),
            "Layer kept"
        );

        if self.active_layer < LAYER_COUNT - 1 {
            self.active_layer += 1;
        }
        self.layer_armed = true;
        self.layer_count = self.layer_count.max(self.active_layer + 1);
    }

    /// The first layer sets the tempo and meter the others snap to
    fn keep_first_layer(&mut self, i: usize) {
        match self.timing_spec.tempo_mode {
            TempoMode::Inferred => {
                let layer = &self.layers[i];
                let ts = estimate_time_signature(
                    &self.timing_spec,
                    layer.length(),
                    layer.intervals(&self.arena),
                );

                self.layers[i].retime(&self.epoch_tempo, &ts.tempo, &mut self.arena);
                self.set_tempo(ts.tempo);
                if !self.timing_spec.locked_meter {
                    self.timing_spec.meter = ts.meter;
                }

                let length = self.layers[i].length();
                self.clock.sync_start(
                    length,
                    &mut ClockGate {
                        open: self.midi_clock,
                        sink: &mut self.sink,
                    },
                );

                let mut pb = Playback {
                    arena: &mut self.arena,
                    notes: &mut self.notes,
                    sink: &mut self.sink,
                };
                self.layers[i].resize(MetricDuration::ZERO, &mut pb);
            }
            TempoMode::Locked | TempoMode::Synced => {
                // an unknown meter is counted from the layer like a free one
                if self.timing_spec.meter.base == 0 {
                    self.timing_spec.meter.base = 4;
                }
                let locked_meter =
                    self.timing_spec.locked_meter && self.timing_spec.meter.is_specified();
                if !locked_meter {
                    self.timing_spec.meter.beats = 1;
                }

                let base = self.timing_spec.base_length();
                let mut pb = Playback {
                    arena: &mut self.arena,
                    notes: &mut self.notes,
                    sink: &mut self.sink,
                };
                self.layers[i].resize(base, &mut pb);

                if !locked_meter && base > MetricDuration::ZERO {
                    let beats = self.layers[i].length().spokes() / base.spokes();
                    self.timing_spec.meter.beats = beats.clamp(1, u8::MAX as i32) as u8;
                }

                self.clock.resize(self.timing_spec.base_length());
            }
        }

        info!(
            bpm = self.timing_spec.tempo.in_bpm(),
            beats = self.timing_spec.meter.beats,
            base = self.timing_spec.meter.base,
            "First layer"
        );
    }

    /// Start over with the next event; the old layers keep playing until then
    pub fn arm(&mut self) {
        self.armed = true;
        self.kick_clock();
        debug!("Armed");
    }

    /// Silence and empty everything
    pub fn clear(&mut self) {
        self.clock.stop(&mut ClockGate {
            open: self.midi_clock,
            sink: &mut self.sink,
        });
        self.notes.flush(&mut self.arena, &mut self.sink);
        self.notes.forget_awaiting();

        self.reset_layers();
        info!("Loop cleared");
    }

    fn reset_layers(&mut self) {
        for layer in &mut self.layers {
            layer.clear(&mut self.arena, &mut self.notes);
        }

        self.armed = true;
        self.layer_count = 1;
        self.active_layer = 0;
        self.layer_armed = true;
    }

    /// A free-running clock starts as soon as there is a fixed tempo
    fn kick_clock(&mut self) {
        if self.timing_spec.tempo_mode != TempoMode::Inferred && !self.clock.is_running() {
            self.clock.sync_start(
                MetricDuration::FOREVER,
                &mut ClockGate {
                    open: self.midi_clock,
                    sink: &mut self.sink,
                },
            );
        }
    }

    /// Select `layer` to be overwritten by the next event
    ///
    /// Pressing the same layer again within a second clears it on the spot.
    /// A layer that never got kept is discarded straight away.
    pub fn layer_arm(&mut self, layer: usize) {
        if layer >= LAYER_COUNT {
            return;
        }

        let now = self.wall_now();
        let double_press = self.layer_armed
            && self.active_layer == layer
            && self
                .armed_time
                .is_some_and(|t| now < t.offset(DOUBLE_PRESS));
        if double_press {
            self.layers[layer].clear(&mut self.arena, &mut self.notes);
            info!(layer, "Layer cleared");
            return;
        }

        if !self.layers[layer].is_looping() {
            self.layers[layer].clear(&mut self.arena, &mut self.notes);
        }

        self.active_layer = layer;
        self.layer_armed = true;
        self.armed_time = Some(now);
        self.layer_count = self.layer_count.max(layer + 1);
    }

    pub fn layer_rearm(&mut self) {
        self.layer_arm(self.active_layer);
    }

    pub fn layer_mute(&mut self, layer: usize, muted: bool) {
        if let Some(l) = self.layers.get_mut(layer) {
            l.set_muted(muted);
        }
    }

    pub fn layer_volume(&mut self, layer: usize, volume: u8) {
        if let Some(l) = self.layers.get_mut(layer) {
            l.set_volume(volume);
        }
    }

    // ========================================================================
    // Timing configuration
    // ========================================================================

    pub fn tempo(&self) -> Tempo {
        self.epoch_tempo
    }

    pub fn set_tempo(&mut self, tempo: Tempo) {
        // re-anchor where metric time is now, by the old tempo; now_wall lags it
        let since_epoch = self.epoch_tempo.to_time_interval(self.now_time - self.epoch_time);
        self.epoch_wall = self.epoch_wall.offset(since_epoch);
        self.epoch_time = self.now_time;
        self.epoch_tempo = tempo;

        self.timing_spec.tempo = tempo;
    }

    pub fn timing_spec(&self) -> TimingSpec {
        self.timing_spec
    }

    /// Adopt new timing settings
    ///
    /// While inferring, the tempo playing now is kept; locked and synced
    /// modes switch to `spec.tempo`.
    pub fn set_timing_spec(&mut self, spec: TimingSpec) {
        self.timing_spec = spec;
        self.timing_spec.tempo = self.epoch_tempo;
        if spec.tempo_mode != TempoMode::Inferred {
            self.set_tempo(spec.tempo);
        }

        info!(
            mode = ?spec.tempo_mode,
            bpm = self.epoch_tempo.in_bpm(),
            low = spec.low_tempo.in_bpm(),
            high = spec.high_tempo.in_bpm(),
            beats = spec.meter.beats,
            base = spec.meter.base,
            locked_meter = spec.locked_meter,
            "Timing"
        );
    }

    pub fn enable_midi_clock(&mut self, enable: bool) {
        self.midi_clock = enable;
    }

    /// Send every outstanding note-off now
    pub fn all_off_now(&mut self) {
        self.notes.flush(&mut self.arena, &mut self.sink);
    }

    pub fn status(&self) -> Status {
        Status {
            tempo: self.epoch_tempo,
            meter: self.timing_spec.meter,
            tempo_mode: self.timing_spec.tempo_mode,
            layer_count: self.layer_count,
            active_layer: self.active_layer,
            armed: self.armed,
            layer_armed: self.layer_armed,
            layers: std::array::from_fn(|i| {
                let l = &self.layers[i];
                LayerStatus {
                    length: l.length(),
                    position: l.position(),
                    muted: l.is_muted(),
                    volume: l.volume(),
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric_time::Meter;
    use crate::midi::{MIDI_CLOCK, MIDI_START, MIDI_STOP};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    type Out = Rc<RefCell<Vec<MidiEvent>>>;

    fn looper() -> (Loop<impl FnMut(MidiEvent)>, Out) {
        let out: Out = Rc::new(RefCell::new(Vec::new()));
        let o = out.clone();
        (Loop::new(move |ev: MidiEvent| o.borrow_mut().push(ev)), out)
    }

    fn ms(n: u64) -> WallTime {
        WallTime::from_millis(n)
    }

    /// Play `note` at `at_ms` for `held_ms`
    fn hit<S: EventSink>(lp: &mut Loop<S>, note: u8, at_ms: u64, held_ms: u64) {
        lp.advance(ms(at_ms));
        lp.add_event(MidiEvent::note_on(0, note, 100));
        lp.advance(ms(at_ms + held_ms));
        lp.add_event(MidiEvent::note_off(0, note));
    }

    fn notes_on(out: &[MidiEvent]) -> usize {
        out.iter().filter(|ev| ev.is_note_on()).count()
    }

    fn notes_off(out: &[MidiEvent]) -> usize {
        out.iter().filter(|ev| ev.is_note_off()).count()
    }

    #[test]
    fn test_initial_state() {
        let (lp, _out) = looper();
        let st = lp.status();
        assert!(st.armed);
        assert_eq!(st.layer_count, 0);
        assert_eq!(st.active_layer, 0);
        assert!(st.layers.iter().all(|l| l.is_empty()));
        assert_eq!(lp.arena().free_count(), ARENA_CAPACITY);
    }

    #[test]
    fn test_first_layer_infers_tempo_and_meter() {
        let (mut lp, out) = looper();
        lp.advance(ms(0));
        for t in [0, 600, 1200, 1800] {
            hit(&mut lp, 36, t, 100);
        }
        lp.advance(ms(2400));
        lp.keep();

        let st = lp.status();
        assert_eq!(st.meter, Meter::new(4, 4));
        assert!((st.tempo.in_bpm() - 100.0).abs() < 2.0, "bpm {}", st.tempo.in_bpm());
        assert!(lp.layer(0).is_some_and(|l| l.is_looping()));
        assert_eq!(st.active_layer, 1);
        assert_eq!(st.layer_count, 2);
        assert!(st.layer_armed);

        // clock restarted and the downbeat replayed straight away
        let out = out.borrow();
        let start = out.iter().rposition(|ev| ev.status == MIDI_START).unwrap();
        assert!(out[start..].iter().any(|ev| ev.is_note_on()));
    }

    #[test]
    fn test_loop_replays_every_bar() {
        let (mut lp, out) = looper();
        lp.enable_midi_clock(false);
        lp.advance(ms(0));
        for t in [0, 600, 1200, 1800] {
            hit(&mut lp, 40 + (t / 600) as u8, t, 100);
        }
        lp.advance(ms(2400));
        lp.keep();
        out.borrow_mut().clear();

        // two more passes of the loop, stopping short of the third downbeat
        let mut t = 2400;
        while t < 2400 + 2 * 2400 - 10 {
            t += 10;
            lp.advance(ms(t));
        }
        let out = out.borrow();
        assert!(out.iter().all(|ev| !ev.is_system()));
        // first downbeat already played at keep
        assert_eq!(notes_on(&out), 7);
    }

    #[test]
    fn test_every_note_on_gets_its_note_off() {
        let (mut lp, out) = looper();
        lp.advance(ms(0));
        for t in [0, 300, 600, 900, 1200, 1500, 1800, 2100] {
            hit(&mut lp, 50 + (t / 300) as u8 % 3, t, 250);
        }
        lp.advance(ms(2400));
        lp.keep();

        // overdub a held note on the second layer
        hit(&mut lp, 70, 2600, 400);
        for t in (2600..9000).step_by(7) {
            lp.advance(ms(t));
        }
        lp.clear();

        let out = out.borrow();
        assert_eq!(notes_on(&out), notes_off(&out));
        assert_eq!(lp.arena().in_use(), 0);
        assert!(lp.status().armed);
    }

    #[test]
    fn test_double_press_clears_layer() {
        let (mut lp, _out) = looper();
        lp.advance(ms(0));
        for (i, start) in [0u64, 3000, 6000].into_iter().enumerate() {
            hit(&mut lp, 60 + i as u8, start, 200);
            lp.advance(ms(start + 2000));
            lp.keep();
        }
        assert_eq!(lp.status().active_layer, 3);
        assert!(!lp.status().layers[2].is_empty());

        lp.advance(ms(9000));
        lp.layer_arm(2);
        lp.advance(ms(9500));
        lp.layer_arm(2);

        let st = lp.status();
        assert!(st.layers[2].is_empty());
        assert!(!st.layers[1].is_empty());
    }

    #[test]
    fn test_slow_second_press_keeps_layer() {
        let (mut lp, _out) = looper();
        lp.advance(ms(0));
        for (i, start) in [0u64, 3000, 6000].into_iter().enumerate() {
            hit(&mut lp, 60 + i as u8, start, 200);
            lp.advance(ms(start + 2000));
            lp.keep();
        }

        lp.advance(ms(9000));
        lp.layer_arm(2);
        lp.advance(ms(11000));
        lp.layer_arm(2);

        let st = lp.status();
        assert!(!st.layers[2].is_empty());
        assert!(lp.layer(2).is_some_and(|l| l.is_looping()));
        assert_eq!(st.active_layer, 2);
        assert!(st.layer_armed);
    }

    #[test]
    fn test_layer_arm_discards_unkept_recording() {
        let (mut lp, _out) = looper();
        lp.advance(ms(0));
        hit(&mut lp, 60, 0, 100);
        lp.advance(ms(500));
        assert!(lp.layer(0).is_some_and(|l| l.is_recording()));

        lp.layer_arm(0);
        assert!(lp.layer(0).is_some_and(|l| l.is_empty()));
        assert_eq!(lp.arena().in_use(), 0);
    }

    #[test]
    fn test_out_of_range_layers_are_ignored() {
        let (mut lp, _out) = looper();
        let before = lp.status();
        lp.layer_arm(LAYER_COUNT);
        lp.layer_mute(LAYER_COUNT + 2, true);
        lp.layer_volume(99, 10);
        assert_eq!(lp.status(), before);

        lp.layer_volume(0, 200);
        assert_eq!(lp.status().layers[0].volume, 127);
    }

    #[test]
    fn test_locked_tempo_snaps_to_bars() {
        let (mut lp, out) = looper();
        lp.set_timing_spec(TimingSpec {
            tempo: Tempo::from_bpm(120.0),
            tempo_mode: TempoMode::Locked,
            meter: Meter::new(4, 4),
            locked_meter: true,
            ..TimingSpec::default()
        });
        lp.advance(ms(0));
        lp.arm();
        assert_eq!(out.borrow().first(), Some(&MidiEvent::realtime(MIDI_START)));

        // one bar at 120 is 2s; released 100ms late
        hit(&mut lp, 36, 0, 100);
        lp.advance(ms(2100));
        lp.keep();

        let st = lp.status();
        assert_eq!(st.layers[0].length, MetricDuration::from_pulses(4));
        assert!((st.tempo.in_bpm() - 120.0).abs() < 1e-9);
        assert_eq!(st.meter, Meter::new(4, 4));

        lp.advance(ms(3000));
        assert!(out.borrow().iter().any(|ev| ev.status == MIDI_CLOCK));

        lp.clear();
        assert_eq!(out.borrow().last(), Some(&MidiEvent::realtime(MIDI_STOP)));
    }

    #[test]
    fn test_locked_tempo_counts_beats_when_meter_free() {
        let (mut lp, _out) = looper();
        lp.set_timing_spec(TimingSpec {
            tempo: Tempo::from_bpm(120.0),
            tempo_mode: TempoMode::Locked,
            ..TimingSpec::default()
        });
        lp.advance(ms(0));
        // three beats at 120 plus a late press
        hit(&mut lp, 36, 0, 100);
        hit(&mut lp, 38, 1000, 100);
        lp.advance(ms(1560));
        lp.keep();

        let st = lp.status();
        assert_eq!(st.meter.beats, 3);
        assert_eq!(st.layers[0].length, MetricDuration::from_pulses(3));
    }

    #[test]
    fn test_locked_tempo_with_unknown_meter_counts_beats() {
        let (mut lp, out) = looper();
        lp.set_timing_spec(TimingSpec {
            tempo_mode: TempoMode::Locked,
            meter: Meter::new(0, 4),
            locked_meter: true,
            ..TimingSpec::default()
        });
        lp.advance(ms(0));
        hit(&mut lp, 60, 0, 500);
        lp.advance(ms(2000));
        lp.keep();
        lp.advance(ms(2100));
        lp.advance(ms(6000));

        assert_eq!(lp.status().meter, Meter::new(4, 4));
        assert!(lp.layer(0).is_some_and(|l| l.is_looping()));
        assert_eq!(lp.layer(0).map(|l| l.length()), Some(MetricDuration::from_pulses(4)));
        assert!(out.borrow().iter().any(|ev| ev.status == MIDI_CLOCK));
    }

    #[test]
    fn test_locked_tempo_with_zero_base_uses_quarters() {
        let (mut lp, _out) = looper();
        lp.set_timing_spec(TimingSpec {
            tempo_mode: TempoMode::Locked,
            meter: Meter::new(3, 0),
            locked_meter: true,
            ..TimingSpec::default()
        });
        lp.advance(ms(0));
        hit(&mut lp, 60, 0, 500);
        lp.advance(ms(2000));
        lp.keep();
        lp.advance(ms(5000));

        assert_eq!(lp.status().meter, Meter::new(3, 4));
        assert_eq!(lp.layer(0).map(|l| l.length()), Some(MetricDuration::from_pulses(4)));
    }

    #[test]
    fn test_plays_on_for_days() {
        let played = Rc::new(Cell::new(0usize));
        let p = played.clone();
        let mut lp = Loop::new(move |ev: MidiEvent| {
            if ev.is_note_on() {
                p.set(p.get() + 1);
            }
        });
        lp.enable_midi_clock(false);
        lp.advance(ms(0));
        for t in [0, 600, 1200, 1800] {
            hit(&mut lp, 36, t, 100);
        }
        lp.advance(ms(2400));
        lp.keep();
        lp.set_tempo(Tempo::from_bpm(300.0));

        // well past where an unfolded count of spokes would overflow
        const HOUR: u64 = 3_600_000;
        let mut last = played.get();
        for hour in 1..=80 {
            lp.advance(ms(2400 + hour * HOUR));
            assert!(played.get() > last, "silent in hour {hour}");
            last = played.get();
        }

        let layer = lp.status().layers[0];
        assert!(layer.position < layer.length);
    }

    #[test]
    fn test_backwards_time_reanchors() {
        let (mut lp, _out) = looper();
        assert_eq!(lp.advance(ms(1000)), TimeInterval::ZERO);
        hit(&mut lp, 60, 1000, 100);
        lp.advance(ms(1500));
        let length = lp.layer(0).map(|l| l.length());

        assert_eq!(lp.advance(ms(200)), TimeInterval::ZERO);
        assert_eq!(lp.layer(0).map(|l| l.length()), length);

        // time moves on from the new anchor
        lp.advance(ms(700));
        let longer = lp.layer(0).map(|l| l.length()).unwrap_or_default();
        assert_eq!(longer, length.unwrap_or_default() + Tempo::default().to_metric(TimeInterval::from_millis(500)));
    }

    #[test]
    fn test_set_tempo_keeps_metric_time() {
        let (mut lp, _out) = looper();
        lp.advance(ms(0));
        hit(&mut lp, 60, 0, 100);
        lp.advance(ms(1000));
        let before = lp.layer(0).map(|l| l.length()).unwrap_or_default();

        lp.set_tempo(Tempo::from_bpm(60.0));
        assert_eq!(lp.timing_spec().tempo, Tempo::from_bpm(60.0));
        lp.advance(ms(2000));
        let after = lp.layer(0).map(|l| l.length()).unwrap_or_default();
        assert_eq!(after - before, MetricDuration::from_pulses(1));
    }

    #[test]
    fn test_inferred_spec_keeps_playing_tempo() {
        let (mut lp, _out) = looper();
        lp.set_tempo(Tempo::from_bpm(90.0));
        lp.set_timing_spec(TimingSpec {
            tempo: Tempo::from_bpm(130.0),
            ..TimingSpec::default()
        });
        assert!((lp.tempo().in_bpm() - 90.0).abs() < 1e-9);
        assert!((lp.timing_spec().tempo.in_bpm() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_note_off_is_echoed_and_all_off_now_flushes() {
        let (mut lp, out) = looper();
        lp.enable_midi_clock(false);
        lp.advance(ms(0));
        hit(&mut lp, 60, 0, 1500);
        lp.advance(ms(2000));
        lp.keep();
        lp.advance(ms(2010));

        // the replayed note is still sounding
        assert_eq!(notes_on(&out.borrow()), 2);
        assert_eq!(notes_off(&out.borrow()), 1);
        lp.all_off_now();
        assert_eq!(notes_off(&out.borrow()), 2);
    }
}
