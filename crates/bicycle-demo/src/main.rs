//! bicycle-demo: Plays a scripted performance through the looper

use bicycle_core::{EventSink, Loop, MidiEvent, MIDI_CLOCK, MIDI_START, MIDI_STOP};
use bicycle_services::{
    load_config, status_mailbox, ControlMap, DisplayThread, Host, LogRenderer, ScriptedInput,
    VirtualClock,
};
use tracing::{debug, info, trace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output that counts what the looper sends instead of driving a synth
#[derive(Debug, Default)]
struct OutputLog {
    notes_on: usize,
    notes_off: usize,
    clocks: usize,
    transport: usize,
    other: usize,
}

impl EventSink for OutputLog {
    fn send(&mut self, ev: MidiEvent) {
        trace!(status = ev.status, data1 = ev.data1, data2 = ev.data2, "Out");
        match ev.status {
            MIDI_CLOCK => self.clocks += 1,
            MIDI_START | MIDI_STOP => self.transport += 1,
            _ if ev.is_note_on() => self.notes_on += 1,
            _ if ev.is_note_off() => self.notes_off += 1,
            _ => self.other += 1,
        }
    }
}

/// A bar of drums at 100 bpm kept with the sustain pedal, a two bar bass
/// line on top, some mixing on the nanoKONTROL, then a clear
fn performance(clock: &VirtualClock) -> ScriptedInput {
    const BEAT: u64 = 600;
    let mut input = ScriptedInput::new(clock.clone());

    // drums on channel 10
    for beat in 0..4 {
        let kick_or_snare = if beat % 2 == 0 { 36 } else { 38 };
        input = input
            .note(beat * BEAT, 9, kick_or_snare, 110, 80)
            .note(beat * BEAT + BEAT / 2, 9, 42, 70, 60);
    }
    input = input.cc(4 * BEAT, 0, 64, 127).cc(4 * BEAT + 200, 0, 64, 0);

    // bass over the next two bars lands on layer 1
    let bass_start = 5 * BEAT;
    for (i, note) in [40u8, 40, 43, 45, 47, 45, 43, 38].into_iter().enumerate() {
        input = input.note(bass_start + i as u64 * BEAT, 1, note, 95, BEAT - 50);
    }
    let bass_end = bass_start + 8 * BEAT;
    input = input.cc(bass_end, 0, 64, 127).cc(bass_end + 100, 0, 64, 0);

    // nanoKONTROL on channel 16: drums down, mute bass, mark the take good
    let mix = bass_end + 4 * BEAT;
    input = input
        .cc(mix, 15, 2, 60)
        .cc(mix + BEAT, 15, 24, 127)
        .cc(mix + 3 * BEAT, 15, 24, 0)
        .cc(mix + 4 * BEAT, 15, 48, 127)
        .cc(mix + 6 * BEAT, 15, 46, 127);

    input.tail(mix + 8 * BEAT)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("bicycle_core=info".parse()?)
                .add_directive("bicycle_services=info".parse()?)
                .add_directive("bicycle_demo=debug".parse()?),
        )
        .init();

    info!("Starting bicycle");

    let config = load_config();
    config.validate()?;

    let mut looper = Loop::with_capacity(config.arena_cells, OutputLog::default());
    looper.set_timing_spec(config.timing);
    looper.enable_midi_clock(config.midi_clock);

    let clock = VirtualClock::default();
    let input = performance(&clock);
    let end = input.end();

    let (status_tx, status_rx) = status_mailbox();
    let display = DisplayThread::start(LogRenderer::default(), status_rx, config.refresh());

    let mut host = Host::new(looper, input, clock, ControlMap::default())
        .with_status(status_tx)
        .with_max_wait(config.refresh());
    host.run()?;
    display.stop();

    let looper = host.looper();
    let out = looper.sink();
    info!(
        seconds = end.micros() as f64 / 1e6,
        notes_on = out.notes_on,
        notes_off = out.notes_off,
        clocks = out.clocks,
        transport = out.transport,
        other = out.other,
        "Performance finished"
    );
    debug!(status = %serde_json::to_string(&looper.status())?, "Final status");

    Ok(())
}
