//! Standalone tick clock for running without an external MIDI clock.
//!
//! Each tick carries the interval until the next one, corrected for how far
//! the previous wakeups drifted from the ideal grid.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use stepline_core::{PlaybackError, Tick};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    bpm: u16,
    subdivisions: u8,
    /// Ideal time of the last scheduled tick, measured from the start.
    track_time: Duration,
}

impl Timing {
    pub fn new(bpm: u16, subdivisions: u8) -> Self {
        Self {
            bpm: bpm.max(1),
            subdivisions: subdivisions.max(1),
            track_time: Duration::ZERO,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(60) / (u32::from(self.bpm) * u32::from(self.subdivisions))
    }

    /// Wait until the next tick given `elapsed` since the clock started.
    /// Late wakeups shorten the wait; a wakeup more than a tick late fires
    /// immediately.
    pub fn next_interval(&mut self, elapsed: Duration) -> Duration {
        self.track_time += self.tick_interval();
        self.track_time.saturating_sub(elapsed)
    }
}

/// Spawn the clock. It ticks until `stop_rx` fires or disconnects, or the
/// tick receiver goes away.
pub fn spawn_clock(
    mut timing: Timing,
    tick_tx: Sender<Tick>,
    stop_rx: Receiver<()>,
) -> Result<JoinHandle<()>, PlaybackError> {
    thread::Builder::new()
        .name("stepline-clock".into())
        .spawn(move || {
            let started = Instant::now();
            let mut interval = timing.next_interval(Duration::ZERO);
            log::debug!(target: "clock", "tick every {:?}", timing.tick_interval());
            loop {
                crossbeam_channel::select! {
                    recv(stop_rx) -> _ => break,
                    default(interval) => {}
                }
                interval = timing.next_interval(started.elapsed());
                if tick_tx.send(Tick { interval }).is_err() {
                    break;
                }
            }
            log::debug!(target: "clock", "clock stopped");
        })
        .map_err(|e| PlaybackError::Init(e.to_string()))
}
