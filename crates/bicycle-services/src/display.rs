//! Status display on its own thread

use std::fmt::Write;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bicycle_core::{MetricDuration, Status};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{info, trace, warn};

use crate::mailbox::StatusSubscriber;

/// Something that can show the loop's state
pub trait StatusRenderer: Send + 'static {
    fn render(&mut self, since_start: Duration, status: &Status);

    /// Called once when the display shuts down
    fn clear(&mut self) {}
}

/// One-line text summary of a status snapshot
///
/// `*` marks the active layer when it is armed, `>` otherwise; `m` marks a
/// muted layer. Lengths and positions are in beats.
pub fn format_status(status: &Status) -> String {
    let mut line = format!(
        "{:5.1}bpm {}/{}",
        status.tempo.in_bpm(),
        status.meter.beats,
        status.meter.base
    );
    if status.armed {
        line.push_str(" [armed]");
    }

    let shown = status.layer_count.max(status.active_layer + 1).min(status.layers.len());
    for (i, layer) in status.layers.iter().enumerate().take(shown) {
        let mark = match (i == status.active_layer, status.layer_armed) {
            (true, true) => '*',
            (true, false) => '>',
            _ => ' ',
        };
        if layer.is_empty() {
            let _ = write!(line, " {mark}{i}:--");
        } else {
            let _ = write!(
                line,
                " {mark}{i}:{:.1}/{:.1}{}",
                layer.position.in_pulses(),
                layer.length.in_pulses(),
                if layer.muted { "m" } else { "" }
            );
        }
    }
    line
}

/// Renders through `tracing`: a line at info whenever anything but the
/// play positions changes, every frame at trace
#[derive(Default)]
pub struct LogRenderer {
    shown: Option<Status>,
}

impl LogRenderer {
    fn without_positions(status: &Status) -> Status {
        let mut s = *status;
        for layer in &mut s.layers {
            layer.position = MetricDuration::ZERO;
        }
        s
    }
}

impl StatusRenderer for LogRenderer {
    fn render(&mut self, since_start: Duration, status: &Status) {
        let line = format_status(status);
        let shape = Self::without_positions(status);
        if self.shown != Some(shape) {
            info!(at_ms = since_start.as_millis() as u64, "{line}");
            self.shown = Some(shape);
        } else {
            trace!(at_ms = since_start.as_millis() as u64, "{line}");
        }
    }

    fn clear(&mut self) {
        self.shown = None;
    }
}

/// Runs a renderer on a background thread, fed from the status mailbox
pub struct DisplayThread {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DisplayThread {
    /// Render each fresh snapshot, at most once every `refresh`
    pub fn start<R: StatusRenderer>(
        mut renderer: R,
        mut statuses: StatusSubscriber,
        refresh: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = thread::spawn(move || {
            let start = Instant::now();
            loop {
                if let Some(status) = statuses.fresh() {
                    renderer.render(start.elapsed(), &status);
                }
                match shutdown_rx.recv_timeout(refresh) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            renderer.clear();
        });

        info!(refresh_ms = refresh.as_millis() as u64, "Display thread started");
        Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Stop and wait for the thread to finish
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Display thread panicked");
            } else {
                info!("Display thread stopped");
            }
        }
    }
}

impl Drop for DisplayThread {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::status_mailbox;
    use bicycle_core::{LayerStatus, Meter, Tempo};
    use std::sync::{Arc, Mutex};

    fn sample() -> Status {
        let mut s = Status {
            tempo: Tempo::from_bpm(100.0),
            meter: Meter::new(4, 4),
            armed: false,
            layer_count: 3,
            active_layer: 2,
            layer_armed: true,
            ..Status::default()
        };
        s.layers[0] = LayerStatus {
            length: MetricDuration::from_pulses(4),
            position: MetricDuration::from_pulses(1),
            muted: false,
            volume: 89,
        };
        s.layers[1] = LayerStatus {
            length: MetricDuration::from_pulses(8),
            position: MetricDuration::from_pulses(5),
            muted: true,
            volume: 89,
        };
        s
    }

    #[test]
    fn test_format_status() {
        assert_eq!(
            format_status(&sample()),
            "100.0bpm 4/4  0:1.0/4.0  1:5.0/8.0m *2:--"
        );

        let fresh = Status::default();
        assert_eq!(format_status(&fresh), "120.0bpm 4/4 [armed] >0:--");
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Status>>>);

    impl StatusRenderer for Recorder {
        fn render(&mut self, _since_start: Duration, status: &Status) {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(*status);
            }
        }
    }

    #[test]
    fn test_thread_renders_published_status() {
        let (tx, rx) = status_mailbox();
        let recorder = Recorder::default();
        let display = DisplayThread::start(recorder.clone(), rx, Duration::from_millis(1));

        let expected = sample();
        assert!(tx.try_publish(expected));
        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.0.lock().map(|v| v.is_empty()).unwrap_or(true) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        display.stop();

        let seen = recorder.0.lock().unwrap();
        assert_eq!(seen.first(), Some(&expected));
    }

    #[test]
    fn test_log_renderer_tracks_shape() {
        let mut renderer = LogRenderer::default();
        let mut s = sample();
        renderer.render(Duration::ZERO, &s);
        assert_eq!(renderer.shown, Some(LogRenderer::without_positions(&s)));

        s.layers[0].position = MetricDuration::from_pulses(2);
        renderer.render(Duration::from_millis(10), &s);
        assert_eq!(renderer.shown, Some(LogRenderer::without_positions(&s)));

        renderer.clear();
        assert_eq!(renderer.shown, None);
    }
}
