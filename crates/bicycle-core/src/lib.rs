//! bicycle-core: Real-time engine of the bicycle MIDI looper

pub mod analysis;
mod arena;
mod clock;
mod error;
mod layer;
mod looper;
pub mod metric_time;
mod midi;
mod notes;
mod status;

pub use analysis::{beat_error, estimate_time_signature, sync_length, LengthSync, TimeSignature};
pub use arena::{CellArena, ARENA_CAPACITY};
pub use clock::{ClockLayer, CLOCK_INTERVAL};
pub use error::{BicycleError, Result};
pub use layer::Layer;
pub use looper::Loop;
pub use metric_time::{
    Meter, MetricDuration, NoteDuration, Tempo, TempoMode, TimeInterval, TimingSpec, WallTime,
};
pub use midi::{EventSink, MidiEvent, MIDI_CLOCK, MIDI_START, MIDI_STOP};
pub use notes::{scale_velocity, UNITY_VOLUME};
pub use status::{LayerStatus, Status, LAYER_COUNT};
