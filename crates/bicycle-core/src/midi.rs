//! MIDI events as stored and emitted by the looper

use serde::{Deserialize, Serialize};

/// MIDI clock tick, 24 per quarter note
pub const MIDI_CLOCK: u8 = 0xF8;
/// MIDI start, resets the receiver to the top of the pattern
pub const MIDI_START: u8 = 0xFA;
/// MIDI stop
pub const MIDI_STOP: u8 = 0xFC;

/// A 3-byte MIDI message, treated as an immutable value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MidiEvent {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl MidiEvent {
    pub const fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self { status, data1, data2 }
    }

    /// Single byte system real-time message
    pub const fn realtime(status: u8) -> Self {
        Self::new(status, 0, 0)
    }

    pub const fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F)
    }

    pub const fn note_off(channel: u8, note: u8) -> Self {
        Self::new(0x80 | (channel & 0x0F), note & 0x7F, 0)
    }

    pub const fn cc(channel: u8, controller: u8, value: u8) -> Self {
        Self::new(0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            &[status] => Some(Self::new(status, 0, 0)),
            &[status, data1] => Some(Self::new(status, data1, 0)),
            &[status, data1, data2, ..] => Some(Self::new(status, data1, data2)),
            &[] => None,
        }
    }

    pub fn bytes(&self) -> [u8; 3] {
        [self.status, self.data1, self.data2]
    }

    /// Status nibble (0x80, 0x90, ...)
    pub fn kind(&self) -> u8 {
        self.status & 0xF0
    }

    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    pub fn note(&self) -> u8 {
        self.data1 & 0x7F
    }

    pub fn is_note_on(&self) -> bool {
        self.kind() == 0x90 && self.data2 != 0
    }

    pub fn is_note_off(&self) -> bool {
        self.kind() == 0x80 || (self.kind() == 0x90 && self.data2 == 0)
    }

    pub fn is_cc(&self) -> bool {
        self.kind() == 0xB0
    }

    pub fn is_system(&self) -> bool {
        self.kind() == 0xF0
    }

    /// Copy with a different velocity; velocity zero turns a note-on into its note-off
    pub fn with_velocity(self, velocity: u8) -> Self {
        Self { data2: velocity, ..self }
    }
}

/// Receiver for every event the looper transmits
pub trait EventSink {
    fn send(&mut self, ev: MidiEvent);
}

impl<F: FnMut(MidiEvent)> EventSink for F {
    fn send(&mut self, ev: MidiEvent) {
        self(ev)
    }
}
