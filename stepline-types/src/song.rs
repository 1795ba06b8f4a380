use serde::{Deserialize, Serialize};

use crate::arrangement::{Arrangement, NodeId, SongSection};
use crate::grid::LineDefinition;
use crate::overlay::OverlayChain;

/// What an accent level changes on a note line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AccentTarget {
    /// Accent value is added to the line's note number.
    Note,
    #[default]
    Velocity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accents {
    pub target: AccentTarget,
    /// Index 0 is the silent level; higher indices are progressively softer.
    pub values: Vec<u8>,
}

impl Accents {
    pub const STANDARD: [u8; 9] = [0, 120, 105, 90, 75, 60, 45, 30, 15];

    pub fn value(&self, index: u8) -> u8 {
        self.values.get(usize::from(index)).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for Accents {
    fn default() -> Self {
        Self {
            target: AccentTarget::Velocity,
            values: Self::STANDARD.to_vec(),
        }
    }
}

/// A pattern definition with a fixed step count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub name: String,
    pub beats: u8,
    pub overlays: OverlayChain,
}

impl Part {
    pub const DEFAULT_BEATS: u8 = 32;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            beats: Self::DEFAULT_BEATS,
            overlays: OverlayChain::new(),
        }
    }

    pub fn with_beats(name: impl Into<String>, beats: u8) -> Self {
        Self {
            beats: beats.max(1),
            ..Self::new(name)
        }
    }
}

/// Everything the playback core reads from a loaded song.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub parts: Vec<Part>,
    pub lines: Vec<LineDefinition>,
    pub arrangement: Arrangement,
    pub accents: Accents,
    /// Track whose wrap to beat 0 counts a cycle of the current section.
    pub keyline: u8,
}

impl Song {
    pub fn new(parts: Vec<Part>, lines: Vec<LineDefinition>, arrangement: Arrangement) -> Self {
        Self {
            parts,
            lines,
            arrangement,
            accents: Accents::default(),
            keyline: 0,
        }
    }

    pub fn section(&self, node: NodeId) -> Option<&SongSection> {
        self.arrangement.section(node)
    }

    pub fn part_for(&self, node: NodeId) -> Option<&Part> {
        self.section(node).and_then(|s| self.parts.get(s.part))
    }
}
