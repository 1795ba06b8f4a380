//! Messages between the main thread and the playback thread.
//!
//! The playback thread owns the authoritative play state; callers only ever
//! send it snapshots and receive copies back.

use std::sync::Arc;
use std::time::Duration;

use stepline_types::{Cursor, LoopMode, OverlayKey, PlayState, Song};

use crate::telemetry::TelemetrySummary;

/// Commands sent to the playback thread.
#[derive(Debug)]
pub enum PlaybackCmd {
    /// Replace song, play state, and cursor wholesale.
    UpdateState {
        song: Arc<Song>,
        play_state: PlayState,
        cursor: Cursor,
    },
    /// Start a run on the current song.
    Start {
        loop_mode: LoopMode,
        /// In loop-overlay mode, the overlay to hear first.
        focus: Option<OverlayKey>,
    },
    /// Stop and silence whatever is sounding.
    Stop,
    Shutdown,
}

/// A beat of the external clock, carrying the time until the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub interval: Duration,
}

/// Notifications sent back from the playback thread.
#[derive(Debug, Clone)]
pub enum PlaybackFeedback {
    /// A beat played; this is the state after it.
    StateChanged { play_state: PlayState, cursor: Cursor },
    /// Playback ended, either at the end of the song or on request.
    Stopped { play_state: PlayState, cursor: Cursor },
    /// The next tick will stop playback.
    AnticipatedStop,
    /// Overlapping retrigger of a note that was still sounding.
    DuplicateNote { channel: u8, note: u8 },
    TransportError(String),
    Telemetry(TelemetrySummary),
}
