#![allow(dead_code)]
//! Test harness utilities for stepline-core integration tests.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use stepline_core::{MidiMessage, MidiTransport, PlaybackError, PlaybackFeedback, PlaybackHandle};
use stepline_types::{Arrangement, GridKey, LineDefinition, Note, OverlayKey, Part, Song, SongSection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recorded {
    pub at: Instant,
    pub message: MidiMessage,
}

/// Transport that keeps every message with the time it was sent.
pub struct RecordingTransport {
    log: Arc<Mutex<Vec<Recorded>>>,
}

/// Read side of a [`RecordingTransport`].
#[derive(Clone)]
pub struct Recording {
    log: Arc<Mutex<Vec<Recorded>>>,
}

impl RecordingTransport {
    pub fn new() -> (Self, Recording) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (Self { log: log.clone() }, Recording { log })
    }
}

impl MidiTransport for RecordingTransport {
    fn send(&mut self, message: &MidiMessage) -> Result<(), PlaybackError> {
        self.log.lock().unwrap().push(Recorded {
            at: Instant::now(),
            message: *message,
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

impl Recording {
    pub fn all(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<MidiMessage> {
        self.all().into_iter().map(|r| r.message).collect()
    }

    pub fn note_ons(&self) -> Vec<MidiMessage> {
        self.messages().into_iter().filter(|m| m.is_note_on()).collect()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Wait until at least `count` messages arrived, or panic on timeout.
    pub fn wait_for_count(&self, count: usize, timeout: Duration) -> Vec<Recorded> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            let all = self.all();
            if all.len() >= count {
                return all;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!(
            "Timed out waiting for {} messages (have {})",
            count,
            self.all().len()
        );
    }
}

/// Wait for feedback matching `pred`, returning everything seen up to it.
pub fn wait_for_feedback(
    handle: &PlaybackHandle,
    timeout: Duration,
    mut pred: impl FnMut(&PlaybackFeedback) -> bool,
) -> Vec<PlaybackFeedback> {
    let start = Instant::now();
    let mut seen = Vec::new();
    while start.elapsed() < timeout {
        if let Some(feedback) = handle.recv_feedback_timeout(Duration::from_millis(10)) {
            let done = pred(&feedback);
            seen.push(feedback);
            if done {
                return seen;
            }
        }
    }
    panic!("Timed out waiting for feedback; saw {:?}", seen);
}

/// One part of `beats` steps, `lines` note lines on channel 1 starting at
/// note 36, played by a single section.
pub fn make_song(beats: u8, lines: u8) -> Song {
    make_song_with_sections(beats, lines, vec![SongSection::new(0)])
}

pub fn make_song_with_sections(beats: u8, lines: u8, sections: Vec<SongSection>) -> Song {
    Song::new(
        vec![Part::with_beats("A", beats)],
        (0..lines).map(|i| LineDefinition::note(1, 36 + i)).collect(),
        Arrangement::from_sections(sections),
    )
}

/// Place `note` on the root overlay of part 0.
pub fn put(song: &mut Song, line: u8, beat: u8, note: Note) {
    song.parts[0]
        .overlays
        .set_note(OverlayKey::ROOT, GridKey::new(line, beat), note);
}
