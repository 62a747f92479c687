//! Read-only snapshot of the loop for display

use serde::Serialize;

use crate::metric_time::{Meter, MetricDuration, Tempo, TempoMode};

/// Number of layer slots in a loop
pub const LAYER_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LayerStatus {
    pub length: MetricDuration,
    pub position: MetricDuration,
    pub muted: bool,
    pub volume: u8,
}

impl LayerStatus {
    pub fn is_empty(&self) -> bool {
        self.length == MetricDuration::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Status {
    pub tempo: Tempo,
    pub meter: Meter,
    pub tempo_mode: TempoMode,

    pub layer_count: usize,
    pub active_layer: usize,
    pub armed: bool,
    pub layer_armed: bool,

    pub layers: [LayerStatus; LAYER_COUNT],
}

impl Default for Status {
    fn default() -> Self {
        Self {
            tempo: Tempo::default(),
            meter: Meter::default(),
            tempo_mode: TempoMode::default(),
            layer_count: 0,
            active_layer: 0,
            armed: true,
            layer_armed: false,
            layers: [LayerStatus::default(); LAYER_COUNT],
        }
    }
}
