//! The host loop: wait for input, route it, keep the looper's time current

use std::time::{Duration, Instant};

use bicycle_core::{EventSink, Loop, MidiEvent, WallTime};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, trace};

use crate::controls::{dispatch, Action, ControlMap, Route};
use crate::error::{HostError, Result};
use crate::mailbox::StatusPublisher;

/// Source of performance and control events
pub trait MidiInput {
    /// Wait up to `timeout` (forever if `None`) for the next event
    ///
    /// `Ok(None)` on timeout, `Err(HostError::Disconnected)` once the input
    /// has gone away for good.
    fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<MidiEvent>>;
}

/// Events fed in from another thread, e.g. a driver callback
impl MidiInput for Receiver<MidiEvent> {
    fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<MidiEvent>> {
        match timeout {
            Some(t) => match self.recv_timeout(t) {
                Ok(ev) => Ok(Some(ev)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(HostError::Disconnected),
            },
            None => self.recv().map(Some).map_err(|_| HostError::Disconnected),
        }
    }
}

pub trait WallClock {
    fn now(&self) -> WallTime;
}

/// Monotonic time since the clock was created
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock for SystemClock {
    fn now(&self) -> WallTime {
        WallTime::from_micros(self.start.elapsed().as_micros() as u64)
    }
}

pub struct Host<S: EventSink, I: MidiInput, C: WallClock> {
    looper: Loop<S>,
    input: I,
    clock: C,
    controls: ControlMap,
    status: Option<StatusPublisher>,
    /// Longest single wait, so status keeps flowing while nothing plays
    max_wait: Duration,
}

impl<S: EventSink, I: MidiInput, C: WallClock> Host<S, I, C> {
    pub fn new(looper: Loop<S>, input: I, clock: C, controls: ControlMap) -> Self {
        Self {
            looper,
            input,
            clock,
            controls,
            status: None,
            max_wait: Duration::from_millis(10),
        }
    }

    pub fn with_status(mut self, status: StatusPublisher) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait.max(Duration::from_millis(1));
        self
    }

    pub fn looper(&self) -> &Loop<S> {
        &self.looper
    }

    pub fn looper_mut(&mut self) -> &mut Loop<S> {
        &mut self.looper
    }

    /// Bring the looper up to date, then record or act on `ev`
    pub fn handle(&mut self, ev: MidiEvent) {
        let now = self.clock.now();
        self.looper.advance(now);

        match self.controls.route(ev) {
            Route::Record(ev) => self.looper.add_event(ev),
            Route::Control { command, value } => {
                if let Some(marker @ (Action::Good | Action::Bad)) =
                    dispatch(&mut self.looper, command, value)
                {
                    info!(?marker, at_us = now.micros(), "Marker");
                }
            }
            Route::Drop => trace!(status = ev.status, data1 = ev.data1, "Dropped input"),
        }
    }

    /// One turn: advance, wait for input until the next deadline, take
    /// everything that arrived, publish status
    pub fn run_once(&mut self) -> Result<()> {
        let wait = self.looper.advance(self.clock.now());
        let timeout = wait
            .to_std()
            .map_or(self.max_wait, |d| d.min(self.max_wait));

        let mut received = self.input.receive(Some(timeout))?;
        while let Some(ev) = received {
            self.handle(ev);
            received = self.input.receive(Some(Duration::ZERO))?;
        }

        self.publish();
        Ok(())
    }

    /// Run until the input disconnects, then silence every sounding note
    pub fn run(&mut self) -> Result<()> {
        info!(max_wait_ms = self.max_wait.as_millis() as u64, "Host running");
        let result = loop {
            match self.run_once() {
                Ok(()) => {}
                Err(HostError::Disconnected) => {
                    debug!("Input closed");
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        self.looper.advance(self.clock.now());
        self.looper.all_off_now();
        self.publish();
        info!("Host stopped");
        result
    }

    fn publish(&self) {
        if let Some(status) = &self.status {
            status.try_publish(self.looper.status());
        }
    }
}
