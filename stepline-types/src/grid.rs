//! Grid cells: the per-step note attributes and the actions that bend a
//! track's trajectory.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-cell behaviour modifier applied when a track lands on the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Action {
    #[default]
    Nothing,
    LineReset,
    LineResetAll,
    LineReverse,
    LineSkipBeat,
    LineSkipBeatAll,
    LineBounce,
    LineBounceAll,
    LineDelay,
    /// CC/PC cells: the accent index is sent as the literal value.
    SpecificValue,
}

/// (track, step) coordinate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct GridKey {
    pub line: u8,
    pub beat: u8,
}

impl GridKey {
    pub fn new(line: u8, beat: u8) -> Self {
        Self { line, beat }
    }
}

impl std::fmt::Display for GridKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.line, self.beat)
    }
}

/// Subdivision of one step into rapid hits.
///
/// `hits` is a bitmask over hit indices `0..=length`; `span` stretches the
/// hits over `span + 1` beats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Ratchet {
    pub hits: u8,
    pub length: u8,
    pub span: u8,
}

impl Ratchet {
    pub const MAX_LENGTH: u8 = 7;

    /// A single armed hit and no subdivision.
    pub fn new() -> Self {
        Self {
            hits: 1,
            length: 0,
            span: 0,
        }
    }

    pub fn hit_at(&self, index: u8) -> bool {
        index < 8 && self.hits & (1 << index) != 0
    }

    pub fn set_hit(&mut self, index: u8, on: bool) {
        if index >= 8 {
            return;
        }
        if on {
            self.hits |= 1 << index;
        } else {
            self.hits &= !(1 << index);
        }
    }

    /// Resize the subdivision, arming the new last hit and clearing any hit
    /// past it.
    pub fn set_length(&mut self, length: u8) {
        let length = length.min(Self::MAX_LENGTH);
        self.length = length;
        self.set_hit(length, true);
        for i in (length + 1)..8 {
            self.set_hit(i, false);
        }
    }

    pub fn span(&self) -> u32 {
        u32::from(self.span) + 1
    }

    /// Spacing between consecutive hits.
    pub fn interval(&self, beat: Duration) -> Duration {
        beat * self.span() / (u32::from(self.length) + 1)
    }
}

/// A step's note attributes. The all-zero value is the "blank" cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Note {
    pub accent_index: u8,
    pub ratchet: Ratchet,
    pub action: Action,
    pub wait_index: u8,
    pub gate_index: u8,
}

impl Note {
    pub const ZERO: Note = Note {
        accent_index: 0,
        ratchet: Ratchet {
            hits: 0,
            length: 0,
            span: 0,
        },
        action: Action::Nothing,
        wait_index: 0,
        gate_index: 0,
    };

    /// A freshly placed note: middle accent, one ratchet hit.
    pub fn new() -> Self {
        Self {
            accent_index: 5,
            ratchet: Ratchet::new(),
            ..Self::ZERO
        }
    }

    /// An action-only cell.
    pub fn with_action(action: Action) -> Self {
        Self {
            ratchet: Ratchet::new(),
            action,
            ..Self::ZERO
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn has_ratchets(&self) -> bool {
        self.ratchet.length > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MessageType {
    #[default]
    Note,
    ControlChange,
    ProgramChange,
}

/// One track of the song: where its messages go and what they carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDefinition {
    /// MIDI channel, 1-based as shown to users.
    pub channel: u8,
    /// Note number, controller number, or program (1-based) depending on type.
    pub note: u8,
    pub message_type: MessageType,
    #[serde(default)]
    pub name: String,
}

impl LineDefinition {
    pub fn note(channel: u8, note: u8) -> Self {
        Self {
            channel,
            note,
            message_type: MessageType::Note,
            name: String::new(),
        }
    }

    pub fn control_change(channel: u8, controller: u8) -> Self {
        Self {
            channel,
            note: controller,
            message_type: MessageType::ControlChange,
            name: String::new(),
        }
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        Self {
            channel,
            note: program,
            message_type: MessageType::ProgramChange,
            name: String::new(),
        }
    }

    /// Zero-based wire channel.
    pub fn wire_channel(&self) -> u8 {
        self.channel.saturating_sub(1) & 0x0F
    }
}

/// Sparse (track, step) -> note mapping.
pub type Pattern = HashMap<GridKey, Note>;

/// Action stored at a cell; an absent cell carries no action.
pub fn action_at(pattern: &Pattern, key: GridKey) -> Action {
    pattern.get(&key).map(|n| n.action).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ratchet_has_only_first_hit() {
        let r = Ratchet::new();
        assert!(r.hit_at(0));
        assert!((1..8).all(|i| !r.hit_at(i)));
    }

    #[test]
    fn set_length_clears_hits_past_the_end() {
        let mut r = Ratchet::new();
        r.set_length(5);
        r.set_hit(3, true);
        r.set_length(2);
        assert!(r.hit_at(0));
        assert!(r.hit_at(2));
        assert!(!r.hit_at(3));
        assert!(!r.hit_at(5));
        assert_eq!(r.length, 2);
    }

    #[test]
    fn ratchet_interval_divides_span() {
        let mut r = Ratchet::new();
        r.set_length(3);
        assert_eq!(r.interval(Duration::from_millis(400)), Duration::from_millis(100));
        r.span = 1;
        assert_eq!(r.interval(Duration::from_millis(400)), Duration::from_millis(200));
    }

    #[test]
    fn zero_note_is_blank_but_action_note_is_not() {
        assert!(Note::default().is_zero());
        assert!(!Note::new().is_zero());
        assert!(!Note::with_action(Action::LineReset).is_zero());
    }

    #[test]
    fn wire_channel_is_zero_based() {
        assert_eq!(LineDefinition::note(1, 60).wire_channel(), 0);
        assert_eq!(LineDefinition::note(10, 36).wire_channel(), 9);
        assert_eq!(LineDefinition::note(0, 36).wire_channel(), 0);
    }

    #[test]
    fn missing_cell_has_no_action() {
        let mut pattern = Pattern::new();
        pattern.insert(GridKey::new(0, 2), Note::with_action(Action::LineBounce));
        assert_eq!(action_at(&pattern, GridKey::new(0, 2)), Action::LineBounce);
        assert_eq!(action_at(&pattern, GridKey::new(0, 3)), Action::Nothing);
    }
}
