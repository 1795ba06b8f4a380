//! # stepline-types
//!
//! Shared data definitions for the stepline step sequencer: the song model
//! (parts, lines, accents), the arrangement tree and its cursor, grid cells,
//! overlay chains, and the transient play state the playback core mutates.
//!
//! Nothing in here performs I/O or spawns threads.

pub mod arrangement;
pub mod grid;
pub mod overlay;
pub mod play_state;
pub mod song;

pub use arrangement::{Arrangement, ArrangementNode, Cursor, IterationCounts, NodeId, SongSection};
pub use grid::{action_at, Action, GridKey, LineDefinition, MessageType, Note, Pattern, Ratchet};
pub use overlay::{Overlay, OverlayChain, OverlayKey, OverlayQuery};
pub use play_state::{
    init_line_states, BoundedLoop, GroupPlayState, LineState, LoopMode, PlayMode, PlayState,
};
pub use song::{AccentTarget, Accents, Part, Song};
