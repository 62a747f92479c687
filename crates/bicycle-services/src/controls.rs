//! Mapping of incoming notes and controllers to looper commands

use bicycle_core::{EventSink, Loop, MidiEvent};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Not a control: record it
    #[default]
    None,
    /// Swallow the event
    Ignore,

    Arm,
    Clear,
    Keep,
    Rearm,
    Good,
    Bad,

    LayerArm,
    LayerMute,
    LayerVolume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Command {
    pub action: Action,
    /// Target of the layer actions
    pub layer: u8,
}

impl Command {
    pub const NONE: Command = Command::new(Action::None);

    pub const fn new(action: Action) -> Self {
        Self { action, layer: 0 }
    }

    pub const fn on_layer(action: Action, layer: u8) -> Self {
        Self { action, layer }
    }
}

/// What the host should do with one input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Record(MidiEvent),
    Control { command: Command, value: u8 },
    Drop,
}

/// Per-channel tables from note and controller numbers to commands
#[derive(Debug, Clone)]
pub struct ControlMap {
    notes: Box<[Command]>,
    ccs: Box<[Command]>,
}

fn slot(channel: u8, number: u8) -> usize {
    (number as usize & 0x7F) * 16 + (channel as usize & 0x0F)
}

impl ControlMap {
    /// A map where nothing is a control
    pub fn empty() -> Self {
        Self {
            notes: vec![Command::NONE; 128 * 16].into_boxed_slice(),
            ccs: vec![Command::NONE; 128 * 16].into_boxed_slice(),
        }
    }

    pub fn set_note(&mut self, channel: u8, note: u8, command: Command) {
        self.notes[slot(channel, note)] = command;
    }

    pub fn set_cc(&mut self, channel: u8, cc: u8, command: Command) {
        self.ccs[slot(channel, cc)] = command;
    }

    pub fn set_cc_all_channels(&mut self, cc: u8, command: Command) {
        for channel in 0..16 {
            self.set_cc(channel, cc, command);
        }
    }

    /// The command bound to `ev`; only note-ons and CCs are ever bound
    pub fn command(&self, ev: &MidiEvent) -> Command {
        match ev.kind() {
            0x90 => self.notes[slot(ev.channel(), ev.data1)],
            0xB0 => self.ccs[slot(ev.channel(), ev.data1)],
            _ => Command::NONE,
        }
    }

    pub fn route(&self, ev: MidiEvent) -> Route {
        let command = self.command(&ev);
        match command.action {
            Action::None => match ev.kind() {
                // program changes and system messages are never looped
                0xC0 | 0xF0 => Route::Drop,
                _ => Route::Record(ev),
            },
            Action::Ignore => Route::Drop,
            _ => Route::Control {
                command,
                value: ev.data2,
            },
        }
    }
}

impl Default for ControlMap {
    /// nanoKONTROL on channel 16, Boppad, Launchpad Pro side buttons and
    /// the sustain pedal
    fn default() -> Self {
        let mut map = Self::empty();

        // control channel: ignore everything not bound below
        for n in 0..128 {
            map.set_note(15, n, Command::new(Action::Ignore));
            map.set_cc(15, n, Command::new(Action::Ignore));
        }

        // nanoKONTROL faders, mute buttons and arm buttons per layer
        const VOLUME_CCS: [u8; 9] = [2, 3, 4, 5, 6, 8, 9, 11, 12];
        for (layer, cc) in VOLUME_CCS.into_iter().enumerate() {
            map.set_cc(15, cc, Command::on_layer(Action::LayerVolume, layer as u8));
        }
        for layer in 0..9 {
            map.set_cc(15, 23 + layer, Command::on_layer(Action::LayerMute, layer));
            map.set_cc(15, 33 + layer, Command::on_layer(Action::LayerArm, layer));
        }

        // nanoKONTROL transport
        map.set_cc(15, 44, Command::new(Action::Arm)); // REC
        map.set_cc(15, 45, Command::new(Action::Keep)); // PLAY
        map.set_cc(15, 46, Command::new(Action::Clear)); // STOP
        map.set_cc(15, 47, Command::new(Action::Bad)); // REW
        map.set_cc(15, 48, Command::new(Action::Good)); // FF
        map.set_cc(15, 49, Command::new(Action::Rearm)); // LOOP

        // Boppad upper left pad
        map.set_note(9, 48, Command::new(Action::Keep));

        // Launchpad Pro side buttons, left column from the bottom
        map.set_cc(0, 10, Command::new(Action::Keep));
        map.set_cc(0, 20, Command::new(Action::Rearm));
        map.set_cc(0, 30, Command::new(Action::Bad));
        map.set_cc(0, 40, Command::new(Action::Good));
        map.set_cc(0, 50, Command::new(Action::Arm));
        map.set_cc(0, 60, Command::new(Action::Clear));

        // sustain pedal
        map.set_cc_all_channels(64, Command::new(Action::Keep));

        map
    }
}

/// Apply a control to the loop
///
/// Buttons act on press only (`value` non-zero). Markers are left to the
/// caller and reported back as the returned action.
pub fn dispatch<S: EventSink>(looper: &mut Loop<S>, command: Command, value: u8) -> Option<Action> {
    let pressed = value != 0;
    let layer = command.layer as usize;

    debug!(action = ?command.action, layer, value, "Control");

    match command.action {
        Action::None | Action::Ignore => return None,
        Action::LayerVolume => looper.layer_volume(layer, value),
        Action::LayerMute => looper.layer_mute(layer, pressed),
        _ if !pressed => return None,
        Action::Arm => looper.arm(),
        Action::Clear => looper.clear(),
        Action::Keep => looper.keep(),
        Action::Rearm => looper.layer_rearm(),
        Action::LayerArm => looper.layer_arm(layer),
        Action::Good | Action::Bad => {}
    }
    Some(command.action)
}
