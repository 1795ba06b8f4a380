//! Built-in song played when no song file is given.

use stepline_types::{
    Action, Arrangement, GridKey, LineDefinition, Note, OverlayKey, Part, Ratchet, Song, SongSection,
};

const DRUMS: u8 = 10;

const KICK: u8 = 0;
const SNARE: u8 = 1;
const HAT: u8 = 2;
const OPEN_HAT: u8 = 3;
const PAN: u8 = 4;

fn accent(accent_index: u8) -> Note {
    Note {
        accent_index,
        ..Note::new()
    }
}

fn groove() -> Part {
    let mut part = Part::with_beats("Groove", 16);
    let chain = &mut part.overlays;
    let root = OverlayKey::ROOT;

    for beat in [0, 4, 8, 12] {
        chain.set_note(root, GridKey::new(KICK, beat), accent(1));
    }
    for beat in [4, 12] {
        chain.set_note(root, GridKey::new(SNARE, beat), accent(2));
    }
    for beat in (0..14).step_by(2) {
        chain.set_note(root, GridKey::new(HAT, beat), accent(5));
    }
    let mut ratchet = Ratchet::new();
    ratchet.set_length(2);
    ratchet.set_hit(1, true);
    chain.set_note(
        root,
        GridKey::new(HAT, 14),
        Note {
            ratchet,
            ..accent(6)
        },
    );
    chain.set_note(
        root,
        GridKey::new(PAN, 0),
        Note {
            accent_index: 64,
            action: Action::SpecificValue,
            ..Note::new()
        },
    );

    // Every second cycle: pickup kick and an open hat.
    let second = OverlayKey::new(2, 2);
    chain.set_note(second, GridKey::new(KICK, 10), accent(3));
    chain.set_note(second, GridKey::new(OPEN_HAT, 15), accent(4));
    part
}

fn fill() -> Part {
    let mut part = Part::with_beats("Fill", 8);
    let chain = &mut part.overlays;
    let root = OverlayKey::ROOT;

    chain.set_note(root, GridKey::new(KICK, 0), accent(1));
    for beat in 0..8 {
        chain.set_note(root, GridKey::new(SNARE, beat), accent(8 - beat / 2));
        chain.set_note(root, GridKey::new(HAT, beat), accent(7));
    }
    // Hats turn around halfway through.
    chain.set_note(root, GridKey::new(HAT, 5), Note::with_action(Action::LineReverse));
    part
}

/// Two passes of groove and fill, then the groove once more.
pub fn demo_song() -> Song {
    let mut arrangement = Arrangement::new();
    let root = arrangement.root();
    if let Some(verse) = arrangement.add_group(root, 2) {
        arrangement.add_section(
            verse,
            SongSection {
                cycles: 2,
                ..SongSection::new(0)
            },
        );
        arrangement.add_section(verse, SongSection::new(1));
    }
    arrangement.add_section(root, SongSection::new(0));

    let mut lines = vec![
        LineDefinition::note(DRUMS, 36),
        LineDefinition::note(DRUMS, 38),
        LineDefinition::note(DRUMS, 42),
        LineDefinition::note(DRUMS, 46),
        LineDefinition::control_change(DRUMS, 10),
    ];
    for (line, name) in lines.iter_mut().zip(["Kick", "Snare", "Hat", "Open hat", "Pan"]) {
        line.name = name.to_string();
    }

    Song::new(vec![groove(), fill()], lines, arrangement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepline_core::{advance_play_state, AdvanceOutcome};
    use stepline_types::{Cursor, LoopMode, PlayState};

    #[test]
    fn demo_song_is_well_formed() {
        let song = demo_song();
        assert_eq!(song.arrangement.count_sections(), 3);
        assert!(song.parts.iter().all(|p| p.beats > 0));
        for part in &song.parts {
            for overlay in part.overlays.overlays() {
                assert!(overlay
                    .notes
                    .keys()
                    .all(|k| usize::from(k.line) < song.lines.len() && k.beat < part.beats));
            }
        }
    }

    #[test]
    fn demo_song_plays_to_the_end() {
        let song = demo_song();
        let mut state = PlayState::new(song.lines.len());
        let mut cursor = Cursor::first_section(&song.arrangement);
        state.start(&song, &mut cursor, LoopMode::OneShot);
        state.allow_advance = true;

        let mut visited_fill = false;
        let beats = (1..=500).find(|_| {
            let outcome = advance_play_state(&mut state, &song, &mut cursor);
            visited_fill |= cursor
                .current()
                .and_then(|n| song.section(n))
                .is_some_and(|s| s.part == 1);
            outcome == AdvanceOutcome::Stopped
        });
        assert!(visited_fill);
        // (2 x 16 + 8) twice, then 16 more.
        let beats = beats.expect("demo song never stopped");
        assert!((90..=100).contains(&beats), "stopped after {} beats", beats);
    }
}
