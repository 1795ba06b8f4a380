//! Overlay chains: priority-ordered pattern variants, each active on the
//! iteration counts its periodicity key selects.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::grid::{Action, GridKey, Note, Pattern};

/// Periodicity of an overlay.
///
/// An overlay with `shift = 2, interval = 4` plays on cycles 2, 6, 10, ...
/// `width` widens each hit to that many consecutive cycles and nothing
/// matches before `start_cycle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverlayKey {
    pub shift: u8,
    pub interval: u8,
    pub width: u8,
    pub start_cycle: u8,
}

impl OverlayKey {
    /// The key that matches every cycle.
    pub const ROOT: OverlayKey = OverlayKey {
        shift: 1,
        interval: 1,
        width: 1,
        start_cycle: 0,
    };

    pub fn new(shift: u8, interval: u8) -> Self {
        Self {
            shift,
            interval,
            width: 1,
            start_cycle: 0,
        }
    }

    pub fn does_match(&self, cycle: u32) -> bool {
        let cycle = i64::from(cycle);
        if cycle < i64::from(self.start_cycle) {
            return false;
        }

        let (shift, overall) = self.normalized();
        // Truncating division: cycles before the shift land on level zero.
        let level = overall * ((cycle - shift) / overall);
        let width = i64::from(self.width);

        if shift == 0 && cycle < overall {
            false
        } else if shift == cycle || shift + overall == cycle {
            true
        } else {
            shift + level <= cycle && cycle <= shift + level + width - 1
        }
    }

    /// Shift and overall interval after folding a shift larger than the
    /// interval back into range.
    fn normalized(&self) -> (i64, i64) {
        let interval = i64::from(self.interval.max(1));
        let shift = i64::from(self.shift);
        if interval < shift {
            if shift % interval == 0 {
                (0, shift / interval)
            } else {
                (shift, interval * (shift / interval + 1))
            }
        } else {
            (shift, interval)
        }
    }

    /// First cycle in 1..100 this key matches (100 if none do).
    pub fn minimum_key_cycle(&self) -> u32 {
        (1..100).find(|&c| self.does_match(c)).unwrap_or(100)
    }

    /// Ordering from most specific to least specific: longer intervals win,
    /// then larger shifts, later start cycles, and narrower widths.
    pub fn priority_cmp(&self, other: &OverlayKey) -> Ordering {
        other
            .interval
            .cmp(&self.interval)
            .then(other.shift.cmp(&self.shift))
            .then(other.start_cycle.cmp(&self.start_cycle))
            .then(self.width.cmp(&other.width))
    }
}

impl std::fmt::Display for OverlayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.shift, self.interval)?;
        if self.width > 1 {
            write!(f, ":{}", self.width)?;
        }
        if self.start_cycle > 0 {
            write!(f, "S{}", self.start_cycle)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overlay {
    pub key: OverlayKey,
    /// Stack on top of lower matches instead of hiding them.
    pub press_up: bool,
    /// Let the overlay directly below play along unconditionally.
    pub press_down: bool,
    pub notes: Pattern,
}

impl Overlay {
    pub fn new(key: OverlayKey) -> Self {
        Self {
            key,
            press_up: key == OverlayKey::ROOT,
            press_down: false,
            notes: Pattern::new(),
        }
    }
}

/// Narrow query contract the playback core reads overlays through.
///
/// Overlays are addressed by an opaque index handed out by
/// [`OverlayQuery::highest_matching_overlay`].
pub trait OverlayQuery {
    fn highest_matching_overlay(&self, cycle: u32) -> Option<usize>;

    /// Notes at `keys`, each taken from the highest overlay providing it.
    fn current_beat_pattern(&self, overlay: usize, cycle: u32, keys: &[GridKey]) -> Pattern;

    /// Action cells visible at `cycle`. Blank cells in higher overlays mask
    /// actions below them.
    fn combined_action_pattern(&self, overlay: usize, cycle: u32) -> Pattern;
}

/// Overlays ordered highest priority first; the root overlay sits last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayChain {
    overlays: Vec<Overlay>,
}

impl OverlayChain {
    pub fn new() -> Self {
        Self {
            overlays: vec![Overlay::new(OverlayKey::ROOT)],
        }
    }

    pub fn overlays(&self) -> &[Overlay] {
        &self.overlays
    }

    pub fn get(&self, key: &OverlayKey) -> Option<&Overlay> {
        self.overlays.iter().find(|o| o.key == *key)
    }

    pub fn get_mut(&mut self, key: &OverlayKey) -> Option<&mut Overlay> {
        self.overlays.iter_mut().find(|o| o.key == *key)
    }

    /// Insert at the priority slot for its key. Returns false (and leaves the
    /// chain alone) when an overlay with the same key exists.
    pub fn insert(&mut self, overlay: Overlay) -> bool {
        if self.get(&overlay.key).is_some() {
            return false;
        }
        let at = self
            .overlays
            .iter()
            .position(|o| overlay.key.priority_cmp(&o.key) == Ordering::Less)
            .unwrap_or(self.overlays.len());
        self.overlays.insert(at, overlay);
        true
    }

    /// Set a note on the overlay for `key`, creating the overlay if needed.
    pub fn set_note(&mut self, key: OverlayKey, at: GridKey, note: Note) {
        if self.get(&key).is_none() {
            self.insert(Overlay::new(key));
        }
        if let Some(overlay) = self.get_mut(&key) {
            overlay.notes.insert(at, note);
        }
    }

    pub fn remove(&mut self, key: &OverlayKey) -> Option<Overlay> {
        let index = self.overlays.iter().position(|o| o.key == *key)?;
        Some(self.overlays.remove(index))
    }

    /// Walk down from `start`, handing each participating overlay's notes to
    /// `add` until it returns false.
    fn combine(&self, start: usize, cycle: u32, mut add: impl FnMut(&Pattern) -> bool) {
        let mut previous_press_down = false;
        let mut first_match = false;

        for overlay in self.overlays.iter().skip(start) {
            let matches = overlay.key.does_match(cycle);
            if previous_press_down || (!first_match && matches) || (overlay.press_up && matches) {
                first_match = true;
                if !add(&overlay.notes) {
                    break;
                }
                previous_press_down = overlay.press_down;
            }
        }
    }
}

impl Default for OverlayChain {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayQuery for OverlayChain {
    fn highest_matching_overlay(&self, cycle: u32) -> Option<usize> {
        self.overlays.iter().position(|o| o.key.does_match(cycle))
    }

    fn current_beat_pattern(&self, overlay: usize, cycle: u32, keys: &[GridKey]) -> Pattern {
        let mut pattern = Pattern::new();
        self.combine(overlay, cycle, |notes| {
            for key in keys {
                if !pattern.contains_key(key) {
                    if let Some(note) = notes.get(key) {
                        pattern.insert(*key, *note);
                    }
                }
            }
            pattern.len() < keys.len()
        });
        pattern
    }

    fn combined_action_pattern(&self, overlay: usize, cycle: u32) -> Pattern {
        let mut pattern = Pattern::new();
        self.combine(overlay, cycle, |notes| {
            for (key, note) in notes {
                if !pattern.contains_key(key) && (note.action != Action::Nothing || note.is_zero()) {
                    pattern.insert(*key, *note);
                }
            }
            true
        });
        pattern
    }
}
