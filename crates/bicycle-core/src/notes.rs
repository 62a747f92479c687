//! Note-off bookkeeping
//!
//! Two jobs live here. While recording, each note-on cell waits in a table
//! keyed by note number until its note-off arrives, then gets its duration
//! stamped. During playback, every note-on sent out schedules a paired
//! note-off on the pending chain, which fires independently of any layer.
//! The pending chain keeps the remaining time in `next_time`, which has
//! finer resolution than a note duration.

use crate::arena::{CellArena, CellId};
use crate::metric_time::{MetricDuration, NoteDuration, MIN_DURATION};
use crate::midi::{EventSink, MidiEvent};

/// Layer volume at which velocities pass through unchanged
///
/// 89 sits on one of the Launchpad Pro's fader steps and feels about right.
pub const UNITY_VOLUME: u8 = 89;

pub fn scale_velocity(velocity: u8, volume: u8) -> u8 {
    (velocity as u32 * volume as u32 / UNITY_VOLUME as u32).min(127) as u8
}

#[derive(Debug, Clone, Copy, Default)]
struct AwaitOff {
    cell: Option<CellId>,
    start: MetricDuration,
}

pub(crate) struct NoteTracker {
    awaiting: [AwaitOff; 128],
    pending: Option<CellId>,
}

impl NoteTracker {
    pub fn new() -> Self {
        Self {
            awaiting: [AwaitOff::default(); 128],
            pending: None,
        }
    }

    // ---- recording side ----

    /// Stamp the duration of the note waiting on `ev`'s pitch, if any
    pub fn finish(&mut self, now: MetricDuration, ev: &MidiEvent, arena: &mut CellArena) {
        let ao = &mut self.awaiting[ev.note() as usize];
        if let Some(cell) = ao.cell.take() {
            arena.get_mut(cell).duration = NoteDuration::clamped(now - ao.start);
        }
    }

    /// Begin waiting for the note-off of a freshly recorded note-on
    pub fn start(&mut self, now: MetricDuration, cell: CellId, arena: &mut CellArena) {
        let ev = arena.get(cell).event;
        self.finish(now, &ev, arena);
        self.awaiting[ev.note() as usize] = AwaitOff {
            cell: Some(cell),
            start: now,
        };
    }

    /// Drop the wait on `cell` because it is being freed
    pub fn cancel(&mut self, cell: CellId, ev: &MidiEvent) {
        let ao = &mut self.awaiting[ev.note() as usize];
        if ao.cell == Some(cell) {
            ao.cell = None;
        }
    }

    /// Metric time is being moved back by `shift`
    pub fn rebase(&mut self, shift: MetricDuration) {
        for ao in self.awaiting.iter_mut().filter(|ao| ao.cell.is_some()) {
            ao.start -= shift;
        }
    }

    pub fn forget_awaiting(&mut self) {
        self.awaiting = [AwaitOff::default(); 128];
    }

    #[cfg(test)]
    pub fn is_awaiting(&self, note: u8) -> bool {
        self.awaiting[(note & 0x7F) as usize].cell.is_some()
    }

    // ---- playback side ----

    /// Send a recorded cell's event, pairing note-ons with a scheduled note-off
    pub fn play(
        &mut self,
        event: MidiEvent,
        duration: NoteDuration,
        muted: bool,
        volume: u8,
        arena: &mut CellArena,
        sink: &mut impl EventSink,
    ) {
        if muted {
            return;
        }

        if !event.is_note_on() {
            sink.send(event);
            return;
        }

        // still held when the layer was kept: no safe way to end it
        if duration < MIN_DURATION {
            return;
        }

        let note = event.with_velocity(scale_velocity(event.data2, volume));
        if note.data2 == 0 {
            return;
        }

        // don't play the note-on if there is no cell for its note-off
        let Some(off) = arena.allocate() else {
            return;
        };

        self.retire(&note, arena, sink);
        sink.send(note);

        let cell = arena.get_mut(off);
        cell.event = note.with_velocity(0);
        cell.next_time = duration.as_interval();
        arena.link(off, self.pending);
        self.pending = Some(off);
    }

    /// Emit early and drop any pending note-off for the same pitch
    fn retire(&mut self, note: &MidiEvent, arena: &mut CellArena, sink: &mut impl EventSink) {
        let mut prev: Option<CellId> = None;
        let mut p = self.pending;
        while let Some(id) = p {
            let next = arena.next(id);
            let ev = arena.get(id).event;
            if ev.status & 0x0F == note.status & 0x0F && ev.note() == note.note() {
                sink.send(ev);
                self.unlink(prev, next, arena);
                arena.free(id);
                return;
            }
            prev = p;
            p = next;
        }
    }

    fn unlink(&mut self, prev: Option<CellId>, next: Option<CellId>, arena: &mut CellArena) {
        match prev {
            Some(q) => arena.link(q, next),
            None => self.pending = next,
        }
    }

    pub fn next(&self, arena: &CellArena) -> MetricDuration {
        let mut next_t = MetricDuration::FOREVER;
        let mut p = self.pending;
        while let Some(id) = p {
            next_t = next_t.min(arena.get(id).next_time);
            p = arena.next(id);
        }
        next_t
    }

    /// Count down every pending note-off, sending those that come due
    pub fn advance(
        &mut self,
        dt: MetricDuration,
        arena: &mut CellArena,
        sink: &mut impl EventSink,
    ) -> MetricDuration {
        let mut next_t = MetricDuration::FOREVER;

        let mut prev: Option<CellId> = None;
        let mut p = self.pending;
        while let Some(id) = p {
            let next = arena.next(id);
            let cell = arena.get_mut(id);
            if dt < cell.next_time {
                cell.next_time -= dt;
                next_t = next_t.min(cell.next_time);
                prev = p;
            } else {
                sink.send(cell.event);
                self.unlink(prev, next, arena);
                arena.free(id);
            }
            p = next;
        }

        next_t
    }

    /// Send every pending note-off now
    pub fn flush(&mut self, arena: &mut CellArena, sink: &mut impl EventSink) {
        self.advance(MetricDuration::FOREVER, arena, sink);
    }

    #[cfg(test)]
    pub fn pending_count(&self, arena: &CellArena) -> usize {
        let mut n = 0;
        let mut p = self.pending;
        while let Some(id) = p {
            n += 1;
            p = arena.next(id);
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric_time::MAX_DURATION;

    fn spokes(n: i32) -> MetricDuration {
        MetricDuration::from_spokes(n)
    }

    #[test]
    fn test_scale_velocity() {
        assert_eq!(scale_velocity(100, UNITY_VOLUME), 100);
        assert_eq!(scale_velocity(100, 0), 0);
        assert_eq!(scale_velocity(127, 127), 127);
        assert_eq!(scale_velocity(89, 44), 44);
    }

    #[test]
    fn test_duration_stamped_on_note_off() {
        let mut arena = CellArena::new(4);
        let mut notes = NoteTracker::new();

        let on = MidiEvent::note_on(0, 60, 100);
        let cell = arena.allocate().unwrap();
        arena.get_mut(cell).event = on;

        notes.start(spokes(100), cell, &mut arena);
        assert!(notes.is_awaiting(60));

        notes.finish(spokes(940), &MidiEvent::note_off(0, 60), &mut arena);
        assert!(!notes.is_awaiting(60));
        assert_eq!(arena.get(cell).duration.spokes(), 840);
    }

    #[test]
    fn test_rebase_keeps_held_duration() {
        let mut arena = CellArena::new(4);
        let mut notes = NoteTracker::new();

        let cell = arena.allocate().unwrap();
        arena.get_mut(cell).event = MidiEvent::note_on(0, 62, 100);
        notes.start(spokes(1_000_000), cell, &mut arena);

        notes.rebase(spokes(999_000));
        notes.finish(spokes(1_500), &MidiEvent::note_off(0, 62), &mut arena);
        assert_eq!(arena.get(cell).duration.spokes(), 500);
    }

    #[test]
    fn test_retrigger_finishes_previous_note() {
        let mut arena = CellArena::new(4);
        let mut notes = NoteTracker::new();

        let first = arena.allocate().unwrap();
        let second = arena.allocate().unwrap();
        arena.get_mut(first).event = MidiEvent::note_on(0, 62, 90);
        arena.get_mut(second).event = MidiEvent::note_on(0, 62, 90);

        notes.start(spokes(0), first, &mut arena);
        // same instant: clamped up to the minimum
        notes.start(spokes(0), second, &mut arena);
        assert_eq!(arena.get(first).duration, MIN_DURATION);

        notes.finish(MetricDuration::from_pulses(1000), &MidiEvent::note_off(0, 62), &mut arena);
        assert_eq!(arena.get(second).duration, MAX_DURATION);
    }

    #[test]
    fn test_pending_off_fires_after_duration() {
        let mut arena = CellArena::new(4);
        let mut notes = NoteTracker::new();
        let mut out = Vec::new();
        let mut sink = |ev: MidiEvent| out.push(ev);

        let on = MidiEvent::note_on(1, 64, 89);
        notes.play(on, NoteDuration::from_spokes(300), false, UNITY_VOLUME, &mut arena, &mut sink);
        assert_eq!(notes.next(&arena), spokes(300));

        assert_eq!(notes.advance(spokes(200), &mut arena, &mut sink), spokes(100));
        assert_eq!(notes.pending_count(&arena), 1);
        assert_eq!(notes.advance(spokes(100), &mut arena, &mut sink), MetricDuration::FOREVER);
        assert_eq!(notes.pending_count(&arena), 0);
        assert_eq!(arena.in_use(), 0);

        drop(sink);
        assert_eq!(out, vec![on, on.with_velocity(0)]);
    }

    #[test]
    fn test_one_pending_off_per_pitch() {
        let mut arena = CellArena::new(4);
        let mut notes = NoteTracker::new();
        let mut out = Vec::new();
        let mut sink = |ev: MidiEvent| out.push(ev);

        let on = MidiEvent::note_on(0, 48, 89);
        notes.play(on, NoteDuration::from_spokes(500), false, UNITY_VOLUME, &mut arena, &mut sink);
        notes.advance(spokes(100), &mut arena, &mut sink);
        notes.play(on, NoteDuration::from_spokes(500), false, UNITY_VOLUME, &mut arena, &mut sink);
        assert_eq!(notes.pending_count(&arena), 1);

        notes.flush(&mut arena, &mut sink);
        drop(sink);
        let off = on.with_velocity(0);
        assert_eq!(out, vec![on, off, on, off]);
    }

    #[test]
    fn test_muted_and_unreleased_notes_are_silent() {
        let mut arena = CellArena::new(4);
        let mut notes = NoteTracker::new();
        let mut out = Vec::new();
        let mut sink = |ev: MidiEvent| out.push(ev);

        let on = MidiEvent::note_on(0, 50, 100);
        notes.play(on, NoteDuration::from_spokes(10), true, UNITY_VOLUME, &mut arena, &mut sink);
        notes.play(on, NoteDuration::ZERO, false, UNITY_VOLUME, &mut arena, &mut sink);
        notes.play(on, NoteDuration::from_spokes(10), false, 0, &mut arena, &mut sink);

        let cc = MidiEvent::cc(0, 1, 64);
        notes.play(cc, NoteDuration::ZERO, false, UNITY_VOLUME, &mut arena, &mut sink);

        drop(sink);
        assert_eq!(out, vec![cc]);
        assert_eq!(arena.in_use(), 0);
    }
}
