//! One beat's worth of play state advancement: move the tracks, count the
//! key cycle, and leave the section once it is done.

use stepline_types::{init_line_states, Cursor, LoopMode, OverlayQuery, Pattern, PlayMode, PlayState, Song};

use crate::advance::{advance_lines, BeatWindow};
use crate::song_move::play_move;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Not playing; nothing changed.
    Idle,
    /// First beat of a run has not sounded yet.
    Held,
    /// Tracks moved within the current section.
    Advanced,
    /// The cursor moved to another section.
    Moved,
    /// The song ran out and playback stopped.
    Stopped,
}

pub fn advance_play_state(state: &mut PlayState, song: &Song, cursor: &mut Cursor) -> AdvanceOutcome {
    if !state.playing {
        return AdvanceOutcome::Idle;
    }
    if !state.allow_advance {
        return AdvanceOutcome::Held;
    }

    let current = cursor
        .current()
        .and_then(|node| song.section(node).map(|section| (node, *section)));
    let Some((node, section)) = current else {
        log::warn!(target: "playback", "cursor is not on a section; stopping");
        state.stop();
        return AdvanceOutcome::Stopped;
    };
    let Some(part) = song.parts.get(section.part) else {
        log::warn!(target: "playback", "section {} refers to missing part {}", node, section.part);
        state.stop();
        return AdvanceOutcome::Stopped;
    };

    let cycle = state.iterations.get(node);
    let actions = part
        .overlays
        .highest_matching_overlay(cycle)
        .map(|overlay| part.overlays.combined_action_pattern(overlay, cycle))
        .unwrap_or_else(Pattern::new);
    let window = BeatWindow::new(part.beats, &state.bounded_loop, state.loop_mode);
    advance_lines(&mut state.line_states, &actions, window);
    advance_key_cycle(state, song, node);

    if state.loop_mode == LoopMode::LoopOverlay || !state.is_done(node, &section) {
        return AdvanceOutcome::Advanced;
    }

    let moved = play_move(cursor, &song.arrangement, &mut state.iterations, state.looped_node);
    if !moved && state.play_mode != PlayMode::Receiver {
        log::info!(target: "playback", "end of song");
        state.stop();
        return AdvanceOutcome::Stopped;
    }

    enter_section(state, song, cursor);
    AdvanceOutcome::Moved
}

/// The keyline wrapping to its first step completes one cycle of the section.
fn advance_key_cycle(state: &mut PlayState, song: &Song, node: stepline_types::NodeId) {
    if state.loop_mode == LoopMode::LoopOverlay {
        return;
    }
    let at_start = state
        .line_states
        .get(usize::from(song.keyline))
        .is_some_and(|ls| ls.current_beat == 0);
    if at_start {
        state.iterations.increment(node);
    }
}

fn enter_section(state: &mut PlayState, song: &Song, cursor: &Cursor) {
    let Some((node, section)) = cursor
        .current()
        .and_then(|node| song.section(node).map(|section| (node, *section)))
    else {
        return;
    };
    if !section.keep_cycles {
        state.iterations.set(node, u32::from(section.start_cycles));
    }
    state.line_states = init_line_states(song.lines.len(), &state.line_states, section.start_beat);
    log::debug!(target: "playback", "entered section {} (part {})", node, section.part);
}

/// Whether the next advancement would stop playback. Runs on copies.
pub fn anticipates_stop(state: &PlayState, song: &Song, cursor: &Cursor) -> bool {
    let mut state = state.clone();
    let mut cursor = cursor.clone();
    advance_play_state(&mut state, song, &mut cursor) == AdvanceOutcome::Stopped
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepline_types::{
        Action, Arrangement, GridKey, LineDefinition, Note, OverlayKey, Part, SongSection,
    };

    fn song(beats: u8, sections: Vec<SongSection>) -> Song {
        Song::new(
            vec![Part::with_beats("A", beats), Part::with_beats("B", beats)],
            vec![LineDefinition::note(1, 60), LineDefinition::note(1, 62)],
            Arrangement::from_sections(sections),
        )
    }

    fn started(song: &Song, loop_mode: LoopMode) -> (PlayState, Cursor) {
        let mut state = PlayState::new(song.lines.len());
        let mut cursor = Cursor::at_root(&song.arrangement);
        state.start(song, &mut cursor, loop_mode);
        state.allow_advance = true;
        (state, cursor)
    }

    fn run_until_stop(state: &mut PlayState, song: &Song, cursor: &mut Cursor, limit: usize) -> Option<usize> {
        (1..=limit).find(|_| advance_play_state(state, song, cursor) == AdvanceOutcome::Stopped)
    }

    #[test]
    fn idle_and_held_states_do_not_move() {
        let song = song(4, vec![SongSection::new(0)]);
        let mut state = PlayState::new(2);
        let mut cursor = Cursor::first_section(&song.arrangement);
        assert_eq!(advance_play_state(&mut state, &song, &mut cursor), AdvanceOutcome::Idle);
        state.start(&song, &mut cursor, LoopMode::OneShot);
        assert_eq!(advance_play_state(&mut state, &song, &mut cursor), AdvanceOutcome::Held);
        assert_eq!(state.line_states[0].current_beat, 0);
    }

    #[test]
    fn single_section_stops_after_one_pass() {
        let song = song(4, vec![SongSection::new(0)]);
        let (mut state, mut cursor) = started(&song, LoopMode::OneShot);
        // Beats 1, 2, 3 advance; wrapping to 0 finishes the only cycle.
        assert_eq!(run_until_stop(&mut state, &song, &mut cursor, 20), Some(4));
        assert!(!state.playing);
    }

    #[test]
    fn cycles_repeat_a_section() {
        let section = SongSection {
            cycles: 3,
            ..SongSection::new(0)
        };
        let song = song(4, vec![section]);
        let (mut state, mut cursor) = started(&song, LoopMode::OneShot);
        assert_eq!(run_until_stop(&mut state, &song, &mut cursor, 40), Some(12));
    }

    #[test]
    fn moving_reseeds_tracks_and_counter() {
        let second = SongSection {
            start_beat: 2,
            start_cycles: 3,
            cycles: 1,
            ..SongSection::new(1)
        };
        let song = song(4, vec![SongSection::new(0), second]);
        let (mut state, mut cursor) = started(&song, LoopMode::OneShot);
        state.set_group_play_state(1, stepline_types::GroupPlayState::Mute);

        let outcomes: Vec<AdvanceOutcome> = (0..4)
            .map(|_| advance_play_state(&mut state, &song, &mut cursor))
            .collect();
        assert_eq!(outcomes.last(), Some(&AdvanceOutcome::Moved));
        let node = cursor.current().unwrap();
        assert_eq!(song.section(node).unwrap().part, 1);
        assert_eq!(state.iterations.get(node), 3);
        assert!(state.line_states.iter().all(|ls| ls.current_beat == 2));
        assert!(state.line_states[1].is_muted());
    }

    #[test]
    fn keep_cycles_preserves_counter_on_reentry() {
        let kept = SongSection {
            keep_cycles: true,
            ..SongSection::new(1)
        };
        let song = song(2, vec![SongSection::new(0), kept]);
        let (mut state, mut cursor) = started(&song, LoopMode::OneShot);
        let second = song.arrangement.children(song.arrangement.root())[1];
        state.iterations.set(second, 0);
        advance_play_state(&mut state, &song, &mut cursor);
        assert_eq!(advance_play_state(&mut state, &song, &mut cursor), AdvanceOutcome::Moved);
        assert_eq!(state.iterations.get(second), 0);
    }

    #[test]
    fn loop_part_never_stops() {
        let song = song(4, vec![SongSection::new(0)]);
        let (mut state, mut cursor) = started(&song, LoopMode::LoopPart);
        assert_eq!(run_until_stop(&mut state, &song, &mut cursor, 50), None);
        assert!(state.playing);
    }

    #[test]
    fn loop_overlay_freezes_counter() {
        let song = song(4, vec![SongSection::new(0)]);
        let (mut state, mut cursor) = started(&song, LoopMode::LoopOverlay);
        state.focus_overlay(&OverlayKey::new(2, 2));
        let node = cursor.current().unwrap();
        for _ in 0..20 {
            advance_play_state(&mut state, &song, &mut cursor);
        }
        assert_eq!(state.iterations.get(node), 2);
    }

    #[test]
    fn receiver_mode_wraps_instead_of_stopping() {
        let song = song(4, vec![SongSection::new(0)]);
        let (mut state, mut cursor) = started(&song, LoopMode::OneShot);
        state.play_mode = PlayMode::Receiver;
        assert_eq!(run_until_stop(&mut state, &song, &mut cursor, 40), None);
        let node = cursor.current().unwrap();
        assert_eq!(state.iterations.get(node), 1);
    }

    #[test]
    fn actions_come_from_the_matching_overlay() {
        let mut song = song(8, vec![SongSection::new(0)]);
        song.parts[0]
            .overlays
            .set_note(OverlayKey::ROOT, GridKey::new(0, 2), Note::with_action(Action::LineReset));
        let (mut state, mut cursor) = started(&song, LoopMode::LoopPart);
        advance_play_state(&mut state, &song, &mut cursor);
        advance_play_state(&mut state, &song, &mut cursor);
        assert_eq!(state.line_states[0].current_beat, 0);
        assert_eq!(state.line_states[1].current_beat, 2);
    }

    #[test]
    fn lookahead_sees_the_stop_without_touching_state() {
        let song = song(2, vec![SongSection::new(0)]);
        let (mut state, mut cursor) = started(&song, LoopMode::OneShot);
        assert!(!anticipates_stop(&state, &song, &cursor));
        advance_play_state(&mut state, &song, &mut cursor);
        assert!(anticipates_stop(&state, &song, &cursor));
        assert!(state.playing);
        assert_eq!(state.line_states[0].current_beat, 1);
    }
}
