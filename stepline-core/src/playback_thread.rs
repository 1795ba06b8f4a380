//! The tick orchestrator: a single thread owning the play state.
//!
//! While idle it waits only for commands. While playing it also takes ticks
//! from the clock and errors from the transmit loop.

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use stepline_types::{Cursor, PlayState, Song};

use crate::commands::{PlaybackCmd, PlaybackFeedback, Tick};
use crate::dispatcher::BeatDispatcher;
use crate::error::PlaybackError;
use crate::note_registry::RegistryError;
use crate::playback::{advance_play_state, anticipates_stop, AdvanceOutcome};
use crate::telemetry::BeatTelemetry;

const TELEMETRY_INTERVAL: Duration = Duration::from_secs(2);

pub(crate) struct PlaybackThread {
    cmd_rx: Receiver<PlaybackCmd>,
    tick_rx: Receiver<Tick>,
    error_rx: Receiver<PlaybackError>,
    feedback_tx: Sender<PlaybackFeedback>,
    dispatcher: BeatDispatcher,
    song: Option<Arc<Song>>,
    play_state: PlayState,
    cursor: Cursor,
    telemetry: BeatTelemetry,
    last_telemetry_emit: Instant,
}

impl PlaybackThread {
    pub(crate) fn new(
        cmd_rx: Receiver<PlaybackCmd>,
        tick_rx: Receiver<Tick>,
        error_rx: Receiver<PlaybackError>,
        feedback_tx: Sender<PlaybackFeedback>,
        dispatcher: BeatDispatcher,
    ) -> Self {
        Self {
            cmd_rx,
            tick_rx,
            error_rx,
            feedback_tx,
            dispatcher,
            song: None,
            play_state: PlayState::default(),
            cursor: Cursor::default(),
            telemetry: BeatTelemetry::new(),
            last_telemetry_emit: Instant::now(),
        }
    }

    pub(crate) fn run(mut self) {
        loop {
            if !self.play_state.playing {
                match self.cmd_rx.recv() {
                    Ok(cmd) => {
                        if self.handle_cmd(cmd) {
                            break;
                        }
                    }
                    Err(_) => break,
                }
                continue;
            }

            let mut errors_closed = false;
            crossbeam_channel::select! {
                recv(self.cmd_rx) -> result => match result {
                    Ok(cmd) => {
                        if self.handle_cmd(cmd) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(self.tick_rx) -> result => match result {
                    Ok(tick) => self.beat(tick),
                    Err(_) => break,
                },
                recv(self.error_rx) -> result => match result {
                    Ok(e) => {
                        log::warn!(target: "midi", "transport error: {}", e);
                        self.send(PlaybackFeedback::TransportError(e.to_string()));
                    }
                    Err(_) => errors_closed = true,
                },
            }
            if errors_closed {
                // Transmit loop is gone; stop selecting on it.
                self.error_rx = crossbeam_channel::never();
            }
        }
        log::debug!(target: "playback", "playback thread exiting");
    }

    fn handle_cmd(&mut self, cmd: PlaybackCmd) -> bool {
        match cmd {
            PlaybackCmd::UpdateState {
                song,
                play_state,
                cursor,
            } => {
                log::debug!(
                    target: "playback",
                    "state loaded: {} parts, {} lines, playing={}",
                    song.parts.len(),
                    song.lines.len(),
                    play_state.playing
                );
                let resumed = play_state.playing && !self.play_state.playing;
                self.song = Some(song);
                self.play_state = play_state;
                self.cursor = cursor;
                if resumed {
                    self.drain_stale_ticks();
                }
            }
            PlaybackCmd::Start { loop_mode, focus } => {
                let Some(song) = self.song.clone() else {
                    log::warn!(target: "playback", "start ignored: no song loaded");
                    return false;
                };
                self.play_state.start(&song, &mut self.cursor, loop_mode);
                if let Some(key) = focus {
                    self.play_state.focus_overlay(&key);
                }
                self.drain_stale_ticks();
                log::info!(target: "playback", "started ({:?})", loop_mode);
                self.send(PlaybackFeedback::StateChanged {
                    play_state: self.play_state.clone(),
                    cursor: self.cursor.clone(),
                });
            }
            PlaybackCmd::Stop => {
                if self.play_state.playing {
                    self.play_state.stop();
                    self.dispatcher.silence_all();
                    log::info!(target: "playback", "stopped on request");
                    self.send(PlaybackFeedback::Stopped {
                        play_state: self.play_state.clone(),
                        cursor: self.cursor.clone(),
                    });
                }
            }
            PlaybackCmd::Shutdown => return true,
        }
        false
    }

    /// Ticks queued while idle belong to no run.
    fn drain_stale_ticks(&self) {
        let stale = self.tick_rx.try_iter().count();
        if stale > 0 {
            log::debug!(target: "playback", "dropped {} stale ticks", stale);
        }
    }

    fn beat(&mut self, tick: Tick) {
        let Some(song) = self.song.clone() else {
            return;
        };
        let started = Instant::now();

        if advance_play_state(&mut self.play_state, &song, &mut self.cursor) == AdvanceOutcome::Stopped
            || !self.play_state.playing
        {
            self.send(PlaybackFeedback::Stopped {
                play_state: self.play_state.clone(),
                cursor: self.cursor.clone(),
            });
            return;
        }

        let report = self
            .dispatcher
            .play_beat(tick.interval, &self.play_state, &song, &self.cursor);
        for duplicate in &report.duplicates {
            let RegistryError::Duplicate { key, .. } = duplicate;
            self.send(PlaybackFeedback::DuplicateNote {
                channel: key.channel,
                note: key.note,
            });
        }
        for e in &report.errors {
            log::warn!(target: "dispatch", "beat dispatch failed: {}", e);
        }
        self.play_state.allow_advance = true;

        self.send(PlaybackFeedback::StateChanged {
            play_state: self.play_state.clone(),
            cursor: self.cursor.clone(),
        });

        if anticipates_stop(&self.play_state, &song, &self.cursor) {
            log::info!(target: "playback", "end of song on next tick");
            self.send(PlaybackFeedback::AnticipatedStop);
        }

        self.telemetry.record(started.elapsed(), tick.interval);
        self.maybe_emit_telemetry();
    }

    fn maybe_emit_telemetry(&mut self) {
        if self.last_telemetry_emit.elapsed() < TELEMETRY_INTERVAL || self.telemetry.is_empty() {
            return;
        }
        self.last_telemetry_emit = Instant::now();
        let summary = self.telemetry.take_summary();
        log::debug!(
            target: "playback",
            "beats={} avg={}us max={}us p95={}us overruns={}",
            summary.beats,
            summary.avg_us,
            summary.max_us,
            summary.p95_us,
            summary.overruns
        );
        self.send(PlaybackFeedback::Telemetry(summary));
    }

    fn send(&self, feedback: PlaybackFeedback) {
        let _ = self.feedback_tx.send(feedback);
    }
}
