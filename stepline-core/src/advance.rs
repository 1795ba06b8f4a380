//! Per-track beat advancement.
//!
//! Each tick every track steps once in its direction, wraps inside the
//! active [`BeatWindow`], then reacts to the action on the cell it lands on.
//! A cross-track action ends the pass for the remaining tracks.

use stepline_types::{action_at, Action, BoundedLoop, GridKey, LineState, LoopMode, Pattern};

/// Steps a track may wrap within: `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeatWindow {
    pub start: u8,
    pub end: u8,
}

impl BeatWindow {
    /// The whole part, or the bounded loop while looping an overlay.
    pub fn new(beats: u8, bounded: &BoundedLoop, loop_mode: LoopMode) -> Self {
        let beats = beats.max(1);
        if bounded.active && loop_mode == LoopMode::LoopOverlay {
            let end = bounded.right.saturating_add(1).min(beats);
            let start = bounded.left.min(end - 1);
            Self { start, end }
        } else {
            Self { start: 0, end: beats }
        }
    }

    pub fn len(&self) -> usize {
        usize::from(self.end - self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    fn contains(&self, beat: i16) -> bool {
        beat >= i16::from(self.start) && beat < i16::from(self.end)
    }

    /// `beat - steps`, floored at the window start.
    fn back(&self, beat: u8, steps: u8) -> u8 {
        beat.saturating_sub(steps).max(self.start)
    }
}

/// Advance every track once. Stops early when a cross-track action fires.
pub fn advance_lines(lines: &mut [LineState], actions: &Pattern, window: BeatWindow) {
    for index in 0..lines.len() {
        if !advance_line(lines, index, actions, window) {
            break;
        }
    }
}

/// Advance track `index`. Returns false if a cross-track action fired and
/// the remaining tracks must not be processed this tick.
pub fn advance_line(lines: &mut [LineState], index: usize, actions: &Pattern, window: BeatWindow) -> bool {
    advance(lines, index, actions, window, false)
}

fn advance(lines: &mut [LineState], index: usize, actions: &Pattern, window: BeatWindow, nested: bool) -> bool {
    // A run of skip cells can at most walk the window once.
    let mut skips_left = window.len();

    loop {
        let Some(ls) = lines.get_mut(index) else {
            return true;
        };
        let landed = settle(ls, actions, window);
        let mut action = action_at(actions, GridKey::new(ls.index, landed));

        // Inside a cross-track skip the fan-out does not repeat.
        if nested && action == Action::LineSkipBeatAll {
            action = Action::LineSkipBeat;
        }

        match action {
            Action::Nothing | Action::SpecificValue => return true,
            Action::LineReset => {
                ls.current_beat = window.start;
                return true;
            }
            Action::LineReverse => {
                ls.current_beat = window.back(landed, 2);
                ls.direction = -1;
                ls.reset_location = window.back(landed, 1);
                ls.reset_action_location = landed;
                ls.reset_action = Action::LineReverse;
                return true;
            }
            Action::LineBounce => {
                ls.current_beat = window.back(landed, 1);
                ls.direction = -1;
                return true;
            }
            Action::LineDelay => {
                ls.current_beat = window.back(landed, 1);
                return true;
            }
            Action::LineSkipBeat => {
                if skips_left == 0 {
                    log::debug!(target: "playback", "skip chain on line {} cut at beat {}", index, landed);
                    return true;
                }
                skips_left -= 1;
            }
            Action::LineResetAll => {
                for other in lines.iter_mut() {
                    other.current_beat = window.start;
                    other.direction = 1;
                    other.reset_location = window.start;
                    other.reset_direction = 1;
                }
                return false;
            }
            Action::LineBounceAll => {
                for (i, other) in lines.iter_mut().enumerate() {
                    if i <= index {
                        other.current_beat = window.back(other.current_beat, 1);
                    }
                    other.direction = -1;
                }
                return false;
            }
            Action::LineSkipBeatAll => {
                // The fan-out ignores nested results: a reset-all it lands on
                // rewinds every track, yet the tracks after it still step.
                for i in 0..lines.len() {
                    let times = if i <= index { 1 } else { 2 };
                    for _ in 0..times {
                        advance(lines, i, actions, window, true);
                    }
                }
                return false;
            }
        }
    }
}

/// Take one step, wrapping out-of-window positions. Returns the landed beat.
fn settle(ls: &mut LineState, actions: &Pattern, window: BeatWindow) -> u8 {
    let advanced = i16::from(ls.current_beat) + i16::from(ls.direction);
    if window.contains(advanced) {
        ls.current_beat = advanced as u8;
        return ls.current_beat;
    }

    // A reverse marker is spent on the first wrap, used or not.
    let armed = ls.reset_location != 0
        && action_at(actions, GridKey::new(ls.index, ls.reset_action_location)) == ls.reset_action;
    ls.current_beat = if armed {
        ls.reset_location.clamp(window.start, window.end - 1)
    } else {
        window.start
    };
    ls.direction = ls.reset_direction;
    ls.reset_location = 0;
    ls.current_beat
}
