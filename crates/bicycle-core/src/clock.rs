//! MIDI clock output locked to the loop

use crate::metric_time::MetricDuration;
use crate::midi::{EventSink, MidiEvent, MIDI_CLOCK, MIDI_START, MIDI_STOP};

/// One MIDI clock tick in spokes
pub const CLOCK_INTERVAL: MetricDuration = MetricDuration::from_midi_clocks(1);

/// Emits clock ticks every 70 spokes, restarting the receiver at each loop
/// boundary
#[derive(Debug, Clone, Copy)]
pub struct ClockLayer {
    running: bool,
    length: MetricDuration,
    position: MetricDuration,
    next_clock: MetricDuration,
}

impl Default for ClockLayer {
    fn default() -> Self {
        Self {
            running: false,
            length: MetricDuration::FOREVER,
            position: MetricDuration::ZERO,
            next_clock: MetricDuration::ZERO,
        }
    }
}

impl ClockLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn length(&self) -> MetricDuration {
        self.length
    }

    /// Start from the top; `FOREVER` runs free without ever wrapping
    ///
    /// The first tick goes out on the next `advance`, even one of zero. A
    /// length that is not positive also runs free.
    pub fn sync_start(&mut self, length: MetricDuration, out: &mut impl EventSink) {
        self.running = true;
        self.length = if length > MetricDuration::ZERO {
            length
        } else {
            MetricDuration::FOREVER
        };
        self.position = MetricDuration::ZERO;
        self.next_clock = MetricDuration::ZERO;
        out.send(MidiEvent::realtime(MIDI_START));
    }

    /// Change the wrap length without interrupting the tick stream
    ///
    /// A length that is not positive is ignored.
    pub fn resize(&mut self, length: MetricDuration) {
        if length <= MetricDuration::ZERO {
            return;
        }
        self.length = length;
        if !length.is_forever() {
            self.position = self.position % length;
            self.next_clock = self.next_clock.min(length - self.position);
        }
    }

    pub fn stop(&mut self, out: &mut impl EventSink) {
        if self.running {
            out.send(MidiEvent::realtime(MIDI_STOP));
        }
        self.running = false;
    }

    pub fn next(&self) -> MetricDuration {
        if self.running {
            self.next_clock
        } else {
            MetricDuration::FOREVER
        }
    }

    pub fn advance(&mut self, dt: MetricDuration, out: &mut impl EventSink) -> MetricDuration {
        if !self.running {
            return MetricDuration::FOREVER;
        }

        let mut dt = dt;
        while self.next_clock <= dt {
            dt -= self.next_clock;
            self.step(self.next_clock);

            if self.position >= self.length {
                out.send(MidiEvent::realtime(MIDI_STOP));
                out.send(MidiEvent::realtime(MIDI_START));
                self.position = self.position % self.length;
            }
            out.send(MidiEvent::realtime(MIDI_CLOCK));

            self.next_clock = CLOCK_INTERVAL.min(self.length - self.position);
        }

        self.next_clock -= dt;
        self.step(dt);
        self.next_clock
    }

    /// Free-running clocks count from their start until the count would
    /// overflow, then from zero again
    fn step(&mut self, dt: MetricDuration) {
        self.position = self.position.checked_add(dt).unwrap_or(MetricDuration::ZERO);
    }
}
