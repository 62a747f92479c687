//! Scripted performances on a virtual clock, for demos and tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bicycle_core::{MidiEvent, WallTime};

use crate::error::{HostError, Result};
use crate::host::{MidiInput, WallClock};

/// Shared wall clock that only moves when told to
#[derive(Debug, Clone, Default)]
pub struct VirtualClock(Arc<AtomicU64>);

impl VirtualClock {
    pub fn now(&self) -> WallTime {
        WallTime::from_micros(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, t: WallTime) {
        self.0.store(t.micros(), Ordering::Release);
    }

    pub fn advance(&self, d: Duration) {
        self.0.fetch_add(d.as_micros() as u64, Ordering::AcqRel);
    }
}

impl WallClock for VirtualClock {
    fn now(&self) -> WallTime {
        VirtualClock::now(self)
    }
}

/// Input that plays back a timed list of events
///
/// Waiting moves the virtual clock straight to the next event, or by the
/// full timeout if nothing is due before it. After the last event and the
/// tail the input reports itself disconnected.
#[derive(Debug)]
pub struct ScriptedInput {
    events: VecDeque<(WallTime, MidiEvent)>,
    clock: VirtualClock,
    end: WallTime,
}

impl ScriptedInput {
    pub fn new(clock: VirtualClock) -> Self {
        Self {
            events: VecDeque::new(),
            clock,
            end: WallTime::default(),
        }
    }

    /// Add `ev` at `at_ms`, after any events already at that time
    pub fn at(mut self, at_ms: u64, ev: MidiEvent) -> Self {
        let at = WallTime::from_millis(at_ms);
        let i = self.events.partition_point(|&(t, _)| t <= at);
        self.events.insert(i, (at, ev));
        self.end = self.end.max(at);
        self
    }

    pub fn note(self, at_ms: u64, channel: u8, note: u8, velocity: u8, held_ms: u64) -> Self {
        self.at(at_ms, MidiEvent::note_on(channel, note, velocity))
            .at(at_ms + held_ms, MidiEvent::note_off(channel, note))
    }

    pub fn cc(self, at_ms: u64, channel: u8, cc: u8, value: u8) -> Self {
        self.at(at_ms, MidiEvent::cc(channel, cc, value))
    }

    /// Keep the input open until `until_ms`
    pub fn tail(mut self, until_ms: u64) -> Self {
        self.end = self.end.max(WallTime::from_millis(until_ms));
        self
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }

    pub fn end(&self) -> WallTime {
        self.end
    }
}

impl MidiInput for ScriptedInput {
    fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<MidiEvent>> {
        let now = self.clock.now();
        let limit = timeout.map(|t| WallTime::from_micros(now.micros() + t.as_micros() as u64));

        if let Some(&(at, ev)) = self.events.front() {
            if limit.is_none_or(|limit| at <= limit) {
                self.events.pop_front();
                self.clock.set(at.max(now));
                return Ok(Some(ev));
            }
        } else if now >= self.end {
            return Err(HostError::Disconnected);
        }

        let wake = limit.map_or(self.end, |limit| limit.min(self.end)).max(now);
        self.clock.set(wake);
        Ok(None)
    }
}
