//! One recordable, loopable track of events
//!
//! A layer is a chain of arena cells. While recording the chain is open:
//! `first` marks its head and `recent` its tail. Keeping the layer links the
//! tail back to the head, after which `recent` is the playback cursor and
//! `first` is unused.

use tracing::{debug, warn};

use crate::analysis::sync_length;
use crate::arena::{CellArena, CellId};
use crate::error::BicycleError;
use crate::metric_time::{MetricDuration, NoteDuration, Tempo};
use crate::midi::{EventSink, MidiEvent};
use crate::notes::{scale_velocity, NoteTracker, UNITY_VOLUME};

/// The shared state a layer needs to record or play
pub(crate) struct Playback<'a, S: EventSink> {
    pub arena: &'a mut CellArena,
    pub notes: &'a mut NoteTracker,
    pub sink: &'a mut S,
}

/// A loop track
#[derive(Debug, Clone)]
pub struct Layer {
    first: Option<CellId>,
    recent: Option<CellId>,
    time_since_recent: MetricDuration,

    length: MetricDuration,
    position: MetricDuration,

    muted: bool,
    volume: u8,
}

impl Default for Layer {
    fn default() -> Self {
        Self {
            first: None,
            recent: None,
            time_since_recent: MetricDuration::ZERO,
            length: MetricDuration::ZERO,
            position: MetricDuration::ZERO,
            muted: false,
            volume: UNITY_VOLUME,
        }
    }
}

impl Layer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_none()
    }

    /// Chain is open and collecting events
    pub fn is_recording(&self) -> bool {
        self.first.is_some()
    }

    /// Chain is closed and playing
    pub fn is_looping(&self) -> bool {
        self.recent.is_some() && self.first.is_none()
    }

    pub fn length(&self) -> MetricDuration {
        self.length
    }

    pub fn position(&self) -> MetricDuration {
        self.position
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(127);
    }

    /// Time until the next event plays
    pub(crate) fn next(&self, arena: &CellArena) -> MetricDuration {
        match self.recent {
            Some(recent) if self.is_looping() => {
                arena.get(recent).next_time - self.time_since_recent
            }
            _ => MetricDuration::FOREVER,
        }
    }

    /// Move time forward by `dt`, playing every cell that comes due
    pub(crate) fn advance<S: EventSink>(
        &mut self,
        dt: MetricDuration,
        pb: &mut Playback<'_, S>,
    ) -> MetricDuration {
        let Some(mut cur) = self.recent else {
            return MetricDuration::FOREVER;
        };

        if self.is_recording() {
            match self.length.checked_add(dt) {
                Some(length) => {
                    self.length = length;
                    self.time_since_recent += dt;
                    self.position += dt;
                }
                None => {
                    warn!("Recording ran past the longest representable loop, discarding");
                    self.clear(pb.arena, pb.notes);
                }
            }
            return MetricDuration::FOREVER;
        }

        self.position = (self.position + dt) % self.length;

        let mut dt = dt;
        loop {
            let next_time = pb.arena.get(cur).next_time;
            if next_time > self.time_since_recent + dt {
                break;
            }
            let Some(next) = pb.arena.next(cur) else {
                break;
            };

            dt -= next_time - self.time_since_recent;
            self.time_since_recent = MetricDuration::ZERO;
            cur = next;

            let cell = *pb.arena.get(cur);
            pb.notes
                .play(cell.event, cell.duration, self.muted, self.volume, pb.arena, pb.sink);
        }

        self.recent = Some(cur);
        self.time_since_recent += dt;
        pb.arena.get(cur).next_time - self.time_since_recent
    }

    /// Record `ev` at metric time `now`
    ///
    /// The event is echoed to the output straight away. If the arena is out
    /// of cells the event is still echoed but not recorded.
    pub(crate) fn add_event<S: EventSink>(
        &mut self,
        now: MetricDuration,
        ev: MidiEvent,
        pb: &mut Playback<'_, S>,
    ) {
        self.muted = false;

        if ev.is_note_on() {
            let note = ev.with_velocity(scale_velocity(ev.data2, self.volume));
            if note.data2 != 0 {
                pb.sink.send(note);
            }
        } else {
            pb.sink.send(ev);
        }

        let Some(cell) = pb.arena.allocate() else {
            warn!(status = ev.status, data1 = ev.data1, "Cell arena exhausted, event not recorded");
            return;
        };
        pb.arena.get_mut(cell).event = ev;

        if ev.is_note_on() {
            pb.notes.start(now, cell, pb.arena);
        }

        self.splice(cell, pb.arena);
    }

    /// Link `cell` in just after the most recent one
    ///
    /// A successor that was already scheduled keeps its place in time: the
    /// new cell inherits whatever was left of the gap.
    fn splice(&mut self, cell: CellId, arena: &mut CellArena) {
        match self.recent {
            Some(recent) => {
                if let Some(next) = arena.next(recent) {
                    let remaining = arena.get(recent).next_time - self.time_since_recent;
                    arena.link(cell, Some(next));
                    arena.get_mut(cell).next_time = remaining;
                }
                arena.link(recent, Some(cell));
                arena.get_mut(recent).next_time = self.time_since_recent;
            }
            None => self.first = Some(cell),
        }

        self.recent = Some(cell);
        self.time_since_recent = MetricDuration::ZERO;
    }

    /// Close the recording into a loop
    ///
    /// Returns false, leaving the layer untouched, if nothing was recorded or
    /// no time has passed.
    pub(crate) fn keep(&mut self, arena: &mut CellArena) -> bool {
        let (Some(first), Some(recent)) = (self.first, self.recent) else {
            return false;
        };
        if self.length <= MetricDuration::ZERO {
            return false;
        }

        arena.link(recent, Some(first));
        arena.get_mut(recent).next_time = self.time_since_recent;
        self.first = None;
        true
    }

    /// Snap the loop length against `base_length`, then start playing
    ///
    /// Must directly follow `keep`, while the cursor still sits on the last
    /// recorded cell. Shortening moves the wrap point into the past; the
    /// overdue first cells play at once and the cursor ends up exactly as far
    /// into the loop as the amount trimmed.
    pub(crate) fn resize<S: EventSink>(
        &mut self,
        base_length: MetricDuration,
        pb: &mut Playback<'_, S>,
    ) {
        let Some(recent) = self.recent else { return };
        if !self.is_looping() {
            return;
        }

        let mut adj = match sync_length(base_length, self.length, self.time_since_recent) {
            Ok(sync) => sync.adjustment,
            Err(BicycleError::NoReferenceLength) => MetricDuration::ZERO,
            Err(e) => {
                warn!(error = %e, "Layer length left as recorded");
                MetricDuration::ZERO
            }
        };
        if self.length + adj <= MetricDuration::ZERO {
            adj = MetricDuration::ZERO;
        }

        debug!(
            base = base_length.spokes(),
            length = self.length.spokes(),
            adjustment = adj.spokes(),
            "Layer resize"
        );

        pb.arena.get_mut(recent).next_time += adj;
        self.length += adj;
        self.position = self.position % self.length;

        self.advance(MetricDuration::ZERO, pb);
    }

    /// Rewrite every interval recorded at `from` as if played at `to`
    ///
    /// Event times are rescaled cumulatively from the start of the chain so
    /// rounding never accumulates: the new length is the old one rescaled.
    pub(crate) fn retime(&mut self, from: &Tempo, to: &Tempo, arena: &mut CellArena) {
        let rate = Tempo::retime_rate(from, to);
        let (Some(start), Some(cursor)) = (self.head(arena), self.recent) else {
            return;
        };

        let mut old_start = MetricDuration::ZERO;
        let mut new_start = MetricDuration::ZERO;
        let mut cursor_old = MetricDuration::ZERO;
        let mut cursor_new = MetricDuration::ZERO;
        let mut p = start;
        loop {
            if p == cursor {
                cursor_old = old_start;
                cursor_new = new_start;
            }

            let cell = arena.get_mut(p);

            let old_end = old_start + cell.duration.as_interval();
            let new_end = old_end.retime(rate);
            let old_next = old_start + cell.next_time;
            let new_next = old_next.retime(rate);

            if !cell.duration.is_zero() {
                cell.duration = NoteDuration::clamped(new_end - new_start);
            }
            cell.next_time = new_next - new_start;

            old_start = old_next;
            new_start = new_next;

            match arena.next(p) {
                Some(n) if n != start => p = n,
                _ => break,
            }
        }

        // the playhead is rescaled like any other point in the chain
        let old_length = self.length;
        self.time_since_recent =
            (cursor_old + self.time_since_recent).retime(rate) - cursor_new;
        if self.is_looping() {
            self.length = new_start;
            self.position = self.position.retime(rate) % self.length;
        } else {
            self.length = cursor_new + self.time_since_recent;
            self.position = self.position.retime(rate);
        }

        debug!(
            rate,
            old_length = old_length.spokes(),
            new_length = self.length.spokes(),
            "Layer retimed"
        );
    }

    /// Free every cell and return to the empty state
    pub(crate) fn clear(&mut self, arena: &mut CellArena, notes: &mut NoteTracker) {
        if let Some(start) = self.first.or(self.recent) {
            let mut p = start;
            loop {
                let next = arena.next(p);
                let ev = arena.get(p).event;
                notes.cancel(p, &ev);
                arena.free(p);
                match next {
                    Some(n) if n != start => p = n,
                    _ => break,
                }
            }
        }

        *self = Self::default();
    }

    /// Intervals between recorded events, starting from the head of the loop
    ///
    /// For a looping layer the head is the cell after the playback cursor,
    /// which right after `keep` is the first cell recorded.
    pub(crate) fn intervals<'a>(&self, arena: &'a CellArena) -> Intervals<'a> {
        let start = self.head(arena);
        Intervals {
            arena,
            start,
            cur: start,
        }
    }

    fn head(&self, arena: &CellArena) -> Option<CellId> {
        match (self.first, self.recent) {
            (Some(first), _) => Some(first),
            (None, Some(recent)) => arena.next(recent),
            (None, None) => None,
        }
    }
}

/// Walks a layer's chain once, yielding each cell's time to the next
#[derive(Clone)]
pub(crate) struct Intervals<'a> {
    arena: &'a CellArena,
    start: Option<CellId>,
    cur: Option<CellId>,
}

impl Iterator for Intervals<'_> {
    type Item = MetricDuration;

    fn next(&mut self) -> Option<MetricDuration> {
        let id = self.cur?;
        let start = self.start;
        self.cur = self.arena.next(id).filter(|n| Some(*n) != start);
        Some(self.arena.get(id).next_time)
    }
}
