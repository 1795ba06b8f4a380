//! # stepline-core
//!
//! Playback engine for the stepline step sequencer. Turns clock ticks into
//! MIDI: each tick advances every track's beat cursor, walks the arrangement
//! when a section is done, and schedules the notes and controller messages
//! under the new positions.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stepline_core::{Config, MidirTransport, PlaybackHandle};
//! use stepline_types::{Cursor, LoopMode, PlayState};
//!
//! let config = Config::load();
//! let transport = MidirTransport::connect(config.client_name(), config.port())?;
//! let handle = PlaybackHandle::new(Box::new(transport), config.dispatch_tables())?;
//!
//! handle.update_state(Arc::new(song), PlayState::new(lines), Cursor::first_section(&arr));
//! handle.start(LoopMode::OneShot);
//! // From a clock thread:
//! handle.tick(beat_interval)?;
//! ```
//!
//! ## Module Overview
//!
//! - [`advance`]: per-track beat advancement and step actions
//! - [`song_move`]: leaving a finished section, group repeats, looping
//! - [`playback`]: one beat of play state advancement and stop lookahead
//! - [`dispatcher`]: patterns to timed MIDI messages
//! - [`note_registry`]: sounding notes, duplicate and stale note-off guard
//! - [`scheduler`] / [`transmit`]: deferred delivery and the single send path
//! - [`handle`]: main-thread entry point owning the playback threads

pub mod advance;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod midi;
pub mod note_registry;
pub mod playback;
mod playback_thread;
pub mod scheduler;
pub mod song_move;
pub mod telemetry;
pub mod transmit;

pub use commands::{PlaybackCmd, PlaybackFeedback, Tick};
pub use config::Config;
pub use dispatcher::{BeatDispatcher, DispatchReport, DispatchTables};
pub use error::PlaybackError;
pub use handle::PlaybackHandle;
pub use midi::{MidiMessage, MidiPortInfo, MidiTransport, MidirTransport};
pub use note_registry::{NoteKey, NoteRegistry, RegistryError};
pub use playback::{advance_play_state, anticipates_stop, AdvanceOutcome};
pub use telemetry::TelemetrySummary;
