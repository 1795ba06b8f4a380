//! Transient playback state owned by the tick orchestrator.

use serde::{Deserialize, Serialize};

use crate::arrangement::{Cursor, IterationCounts, NodeId, SongSection};
use crate::grid::{Action, GridKey};
use crate::overlay::OverlayKey;
use crate::song::Song;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LoopMode {
    #[default]
    OneShot,
    LoopWholeSequence,
    LoopPart,
    LoopOverlay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlayMode {
    #[default]
    Standard,
    /// Clocked from outside; reaching the end wraps instead of stopping.
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GroupPlayState {
    #[default]
    Play,
    Mute,
    Solo,
}

/// Sub-range of steps every track wraps within while looping an overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundedLoop {
    pub active: bool,
    pub left: u8,
    pub right: u8,
}

impl BoundedLoop {
    pub fn new(left: u8, right: u8) -> Self {
        Self {
            active: true,
            left: left.min(right),
            right: left.max(right),
        }
    }

    pub fn contract_right(&mut self) {
        if self.right > self.left {
            self.right -= 1;
        }
    }

    pub fn contract_left(&mut self) {
        if self.left < self.right {
            self.left += 1;
        }
    }

    pub fn expand_right(&mut self, beats: u8) {
        if self.right + 1 < beats {
            self.right += 1;
        }
    }

    pub fn expand_left(&mut self) {
        self.left = self.left.saturating_sub(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineState {
    pub index: u8,
    pub current_beat: u8,
    pub direction: i8,
    pub reset_direction: i8,
    /// One-shot jump target armed by a reverse; 0 means unarmed.
    pub reset_location: u8,
    pub reset_action_location: u8,
    pub reset_action: Action,
    pub group_play_state: GroupPlayState,
}

impl LineState {
    pub fn new(index: u8, start_beat: u8, group_play_state: GroupPlayState) -> Self {
        Self {
            index,
            current_beat: start_beat,
            direction: 1,
            reset_direction: 1,
            reset_location: 0,
            reset_action_location: 0,
            reset_action: Action::Nothing,
            group_play_state,
        }
    }

    pub fn grid_key(&self) -> GridKey {
        GridKey::new(self.index, self.current_beat)
    }

    pub fn is_muted(&self) -> bool {
        self.group_play_state == GroupPlayState::Mute
    }

    pub fn is_solo(&self) -> bool {
        self.group_play_state == GroupPlayState::Solo
    }

    /// Solo tracks always sound; others sound unless muted or out-soloed.
    pub fn is_audible(&self, has_solo: bool) -> bool {
        self.is_solo() || (!self.is_muted() && !has_solo)
    }
}

/// Fresh line states seeded at `start_beat`, carrying each track's
/// mute/solo state over from `previous`.
pub fn init_line_states(count: usize, previous: &[LineState], start_beat: u8) -> Vec<LineState> {
    (0..count)
        .map(|i| {
            let group = previous
                .get(i)
                .map(|ls| ls.group_play_state)
                .unwrap_or_default();
            LineState::new(i as u8, start_beat, group)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayState {
    pub playing: bool,
    /// Set once the first beat of a run has sounded.
    pub allow_advance: bool,
    pub has_solo: bool,
    pub play_mode: PlayMode,
    pub loop_mode: LoopMode,
    /// Node pinned for indefinite repetition.
    pub looped_node: Option<NodeId>,
    pub iterations: IterationCounts,
    pub line_states: Vec<LineState>,
    pub bounded_loop: BoundedLoop,
}

impl PlayState {
    pub fn new(line_count: usize) -> Self {
        Self {
            line_states: init_line_states(line_count, &[], 0),
            ..Self::default()
        }
    }

    /// Prepare a run of `song` and point `cursor` where it starts.
    ///
    /// One-shot and whole-sequence runs start at the first section. Part and
    /// overlay loops start (and stay) on the cursor's section.
    pub fn start(&mut self, song: &Song, cursor: &mut Cursor, loop_mode: LoopMode) {
        let arrangement = &song.arrangement;
        self.iterations = IterationCounts::seeded(arrangement);
        self.loop_mode = loop_mode;

        let on_section = cursor.current().is_some_and(|n| arrangement.section(n).is_some());
        match loop_mode {
            LoopMode::OneShot => {
                self.looped_node = None;
                *cursor = Cursor::first_section(arrangement);
            }
            LoopMode::LoopWholeSequence => {
                self.looped_node = Some(arrangement.root());
                *cursor = Cursor::first_section(arrangement);
            }
            LoopMode::LoopPart | LoopMode::LoopOverlay => {
                if !on_section {
                    *cursor = Cursor::first_section(arrangement);
                }
                self.looped_node = cursor.current();
            }
        }

        let start_beat = cursor
            .current()
            .and_then(|n| arrangement.section(n))
            .map(|s| s.start_beat)
            .unwrap_or(0);
        self.line_states = init_line_states(song.lines.len(), &self.line_states, start_beat);
        self.refresh_solo();
        self.allow_advance = false;
        self.playing = true;
    }

    /// Seed the pinned section's counter so `key`'s overlay is the one heard.
    pub fn focus_overlay(&mut self, key: &OverlayKey) {
        if let Some(node) = self.looped_node {
            self.iterations.set(node, key.minimum_key_cycle());
        }
    }

    pub fn stop(&mut self) {
        self.playing = false;
        self.allow_advance = false;
    }

    /// A section is done once its cycles are spent, unless it is pinned.
    pub fn is_done(&self, node: NodeId, section: &SongSection) -> bool {
        self.looped_node != Some(node) && section.is_exhausted(self.iterations.get(node))
    }

    pub fn refresh_solo(&mut self) {
        self.has_solo = self.line_states.iter().any(|ls| ls.is_solo());
    }

    pub fn set_group_play_state(&mut self, line: usize, state: GroupPlayState) {
        if let Some(ls) = self.line_states.get_mut(line) {
            ls.group_play_state = state;
        }
        self.refresh_solo();
    }
}
