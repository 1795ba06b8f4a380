//! Turns the notes under each track's cursor into timed MIDI messages.
//!
//! Dispatch happens in two steps. [`BeatDispatcher::plan`] resolves a
//! pattern into [`PlannedEvent`]s with their delays, a pure computation.
//! [`BeatDispatcher::dispatch`] then registers note-ons with the
//! [`NoteRegistry`] and hands everything to the scheduler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use stepline_types::{
    AccentTarget, Action, Cursor, GridKey, LineDefinition, MessageType, Note, OverlayQuery,
    Pattern, PlayState, Song,
};

use crate::error::PlaybackError;
use crate::midi::MidiMessage;
use crate::note_registry::{NoteKey, NoteRegistry, RegistryError};
use crate::scheduler::{Outbound, ScheduleSender};

pub const DEFAULT_WAIT_PERCENTAGES: [f64; 8] = [0.0, 8.0, 16.0, 24.0, 32.0, 40.0, 48.0, 54.0];
pub const DEFAULT_SHORT_GATES: [f64; 8] = [20.0, 0.125, 0.25, 0.375, 0.5, 0.625, 0.75, 0.875];
pub const DEFAULT_LONG_GATE_BEATS: u8 = 32;
pub const DEFAULT_RATCHET_GATE: Duration = Duration::from_millis(20);
pub const DEFAULT_NOTE_TARGET_VELOCITY: u8 = 96;

/// Timing and value tables the dispatcher reads.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchTables {
    /// Percent of a beat a note waits before sounding, by wait index.
    pub wait_percentages: Vec<f64>,
    /// Values above 1 are milliseconds, the rest are fractions of a beat.
    pub short_gates: Vec<f64>,
    /// Gate lengths in beats for indices past the short table.
    pub long_gates: Vec<f64>,
    pub ratchet_gate: Duration,
    /// Velocity used when accents drive pitch instead.
    pub note_target_velocity: u8,
    /// Controller value ceilings; unlisted controllers use 127.
    pub upper_limits: HashMap<u8, u8>,
}

impl DispatchTables {
    /// Long gates from one beat up to `max_beats`, in eighth-beat steps.
    pub fn long_gates(max_beats: u8) -> Vec<f64> {
        (1..max_beats)
            .flat_map(|beat| (0..8u8).map(move |eighth| f64::from(beat) + f64::from(eighth) * 0.125))
            .collect()
    }

    pub fn delay(&self, wait_index: u8, beat: Duration) -> Duration {
        if wait_index == 0 {
            return Duration::ZERO;
        }
        let percentage = self
            .wait_percentages
            .get(usize::from(wait_index))
            .copied()
            .unwrap_or(0.0);
        scale(beat, percentage / 100.0)
    }

    pub fn gate_length(&self, gate_index: u8, beat: Duration) -> Duration {
        let index = usize::from(gate_index);
        if let Some(&value) = self.short_gates.get(index) {
            if value > 1.0 {
                Duration::from_millis(value as u64)
            } else {
                scale(beat, value)
            }
        } else {
            let value = self
                .long_gates
                .get(index - self.short_gates.len())
                .or(self.long_gates.last())
                .copied()
                .unwrap_or(1.0);
            scale(beat, value)
        }
    }

    pub fn upper_limit(&self, controller: u8) -> u8 {
        self.upper_limits.get(&controller).copied().unwrap_or(127)
    }
}

/// `beat * fraction`, rounded to the nearest nanosecond. Negative fractions
/// clamp to zero.
fn scale(beat: Duration, fraction: f64) -> Duration {
    let nanos = (beat.as_nanos() as f64 * fraction.max(0.0)).round();
    Duration::from_nanos(nanos.min(u64::MAX as f64) as u64)
}

impl Default for DispatchTables {
    fn default() -> Self {
        Self {
            wait_percentages: DEFAULT_WAIT_PERCENTAGES.to_vec(),
            short_gates: DEFAULT_SHORT_GATES.to_vec(),
            long_gates: Self::long_gates(DEFAULT_LONG_GATE_BEATS),
            ratchet_gate: DEFAULT_RATCHET_GATE,
            note_target_velocity: DEFAULT_NOTE_TARGET_VELOCITY,
            upper_limits: HashMap::new(),
        }
    }
}

/// A resolved message with its offset from the start of the beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedEvent {
    Note {
        delay: Duration,
        gate: Duration,
        channel: u8,
        note: u8,
        velocity: u8,
    },
    Message {
        delay: Duration,
        message: MidiMessage,
    },
}

impl PlannedEvent {
    pub fn delay(&self) -> Duration {
        match *self {
            PlannedEvent::Note { delay, .. } | PlannedEvent::Message { delay, .. } => delay,
        }
    }
}

/// What one dispatch did. Duplicates are overlapping retriggers; the newer
/// note still played.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub scheduled: usize,
    pub duplicates: Vec<RegistryError>,
    pub errors: Vec<PlaybackError>,
}

impl DispatchReport {
    fn absorb(&mut self, other: DispatchReport) {
        self.scheduled += other.scheduled;
        self.duplicates.extend(other.duplicates);
        self.errors.extend(other.errors);
    }
}

#[derive(Debug, Clone, Copy)]
struct Hit {
    delay: Duration,
    gate: Duration,
    velocity: u8,
}

pub struct BeatDispatcher {
    scheduler: ScheduleSender,
    registry: Arc<NoteRegistry>,
    tables: DispatchTables,
}

impl BeatDispatcher {
    pub fn new(scheduler: ScheduleSender, registry: Arc<NoteRegistry>, tables: DispatchTables) -> Self {
        Self {
            scheduler,
            registry,
            tables,
        }
    }

    pub fn tables(&self) -> &DispatchTables {
        &self.tables
    }

    /// Play the current beat of the section under `cursor`.
    ///
    /// Control and program lines go first, then note lines; each group is
    /// resolved against the overlay chain on its own.
    pub fn play_beat(
        &self,
        interval: Duration,
        play_state: &PlayState,
        song: &Song,
        cursor: &Cursor,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let Some(node) = cursor.current() else {
            return report;
        };
        let Some(part) = song.part_for(node) else {
            return report;
        };
        let cycle = play_state.iterations.get(node);
        let Some(overlay) = part.overlays.highest_matching_overlay(cycle) else {
            return report;
        };

        for notes_pass in [false, true] {
            let keys: Vec<GridKey> = play_state
                .line_states
                .iter()
                .filter(|ls| ls.is_audible(play_state.has_solo))
                .filter(|ls| {
                    let is_note = song
                        .lines
                        .get(usize::from(ls.index))
                        .is_some_and(|l| l.message_type == MessageType::Note);
                    is_note == notes_pass
                })
                .map(|ls| ls.grid_key())
                .collect();
            if keys.is_empty() {
                continue;
            }
            let pattern = part.overlays.current_beat_pattern(overlay, cycle, &keys);
            report.absorb(self.play_pattern(interval, &pattern, song));
        }
        report
    }

    pub fn play_pattern(&self, interval: Duration, pattern: &Pattern, song: &Song) -> DispatchReport {
        let events = self.plan(interval, pattern, song);
        self.dispatch(Instant::now(), &events)
    }

    /// Resolve `pattern` into events, ordered by track then delay.
    pub fn plan(&self, interval: Duration, pattern: &Pattern, song: &Song) -> Vec<PlannedEvent> {
        let mut cells: Vec<(&GridKey, &Note)> = pattern.iter().collect();
        cells.sort_by_key(|(key, _)| **key);

        let mut events = Vec::new();
        for (key, note) in cells {
            let Some(line) = song.lines.get(usize::from(key.line)) else {
                continue;
            };
            if note.is_zero() {
                continue;
            }
            // Silent accent: only a specific value still sends on CC and PC lines.
            if note.accent_index == 0
                && line.message_type != MessageType::Note
                && note.action != Action::SpecificValue
            {
                continue;
            }
            match line.message_type {
                MessageType::Note => self.plan_note(interval, line, note, song, &mut events),
                MessageType::ControlChange => events.push(PlannedEvent::Message {
                    delay: self.tables.delay(note.wait_index, interval),
                    message: self.control_change(line, note, song),
                }),
                MessageType::ProgramChange => events.push(PlannedEvent::Message {
                    delay: self.tables.delay(note.wait_index, interval),
                    message: program_change(line, note),
                }),
            }
        }
        events
    }

    fn plan_note(
        &self,
        interval: Duration,
        line: &LineDefinition,
        note: &Note,
        song: &Song,
        events: &mut Vec<PlannedEvent>,
    ) {
        // The silent accent level carries actions but never sounds.
        if note.accent_index == 0 {
            return;
        }
        let (pitch, velocity) = self.note_values(line, song.accents.value(note.accent_index), song.accents.target);
        let channel = line.wire_channel();

        if note.has_ratchets() {
            let spacing = note.ratchet.interval(interval);
            for hit in 0..=note.ratchet.length {
                if note.ratchet.hit_at(hit) {
                    events.push(PlannedEvent::Note {
                        delay: spacing * u32::from(hit),
                        gate: self.tables.ratchet_gate,
                        channel,
                        note: pitch,
                        velocity,
                    });
                }
            }
        } else {
            events.push(PlannedEvent::Note {
                delay: self.tables.delay(note.wait_index, interval),
                gate: self.tables.gate_length(note.gate_index, interval),
                channel,
                note: pitch,
                velocity,
            });
        }
    }

    /// Pitch and velocity for a note line at an accent value.
    pub fn note_values(&self, line: &LineDefinition, accent: u8, target: AccentTarget) -> (u8, u8) {
        match target {
            AccentTarget::Note => (
                line.note.saturating_add(accent).min(127),
                self.tables.note_target_velocity,
            ),
            AccentTarget::Velocity => (line.note, accent.min(127)),
        }
    }

    pub fn control_change(&self, line: &LineDefinition, note: &Note, song: &Song) -> MidiMessage {
        let value = if note.action == Action::SpecificValue {
            note.accent_index
        } else {
            let upper = self.tables.upper_limit(line.note);
            let levels = song.accents.len();
            if upper == 1 {
                // Toggle controllers: loud accents switch on.
                u8::from(note.accent_index <= 4)
            } else if levels <= 1 {
                upper
            } else {
                let remaining = levels.saturating_sub(usize::from(note.accent_index)) as f32;
                (remaining / (levels - 1) as f32 * f32::from(upper)) as u8
            }
        };
        MidiMessage::ControlChange {
            channel: line.wire_channel(),
            controller: line.note,
            value: value.min(127),
        }
    }

    /// Register and schedule `events` relative to `base`.
    ///
    /// Note events sharing a key within one call (the hits of a ratchet) play
    /// under a single registration, released by whichever hit ends last.
    pub fn dispatch(&self, base: Instant, events: &[PlannedEvent]) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut notes: Vec<(NoteKey, Vec<Hit>)> = Vec::new();
        for event in events {
            match *event {
                PlannedEvent::Message { delay, message } => {
                    match self.scheduler.schedule(base, delay, Outbound::Message(message)) {
                        Ok(()) => report.scheduled += 1,
                        Err(e) => report.errors.push(e),
                    }
                }
                PlannedEvent::Note {
                    delay,
                    gate,
                    channel,
                    note,
                    velocity,
                } => {
                    let key = NoteKey::new(channel, note);
                    let hit = Hit { delay, gate, velocity };
                    match notes.iter_mut().find(|(k, _)| *k == key) {
                        Some((_, hits)) => hits.push(hit),
                        None => notes.push((key, vec![hit])),
                    }
                }
            }
        }

        for (key, hits) in notes {
            match self.schedule_note(base, key, &hits, &mut report) {
                Ok(()) => report.scheduled += hits.len(),
                Err(e) => report.errors.push(e),
            }
        }
        report
    }

    fn schedule_note(
        &self,
        base: Instant,
        key: NoteKey,
        hits: &[Hit],
        report: &mut DispatchReport,
    ) -> Result<(), PlaybackError> {
        let handle = self.registry.handle(key);
        if let Err(e) = self.registry.register(handle) {
            log::warn!(target: "registry", "{}", e);
            // Cut the sounding note now; its own off no longer matches.
            if let Some(previous) = self.registry.replace(handle) {
                self.scheduler
                    .send_now(Outbound::Message(previous.off_message()))?;
            }
            report.duplicates.push(e);
        }

        let release = hits
            .iter()
            .enumerate()
            .max_by_key(|(_, hit)| hit.delay + hit.gate)
            .map(|(i, _)| i);
        for (i, hit) in hits.iter().enumerate() {
            self.scheduler.schedule(
                base,
                hit.delay,
                Outbound::NoteOn {
                    handle,
                    velocity: hit.velocity,
                },
            )?;
            let off = if Some(i) == release {
                Outbound::NoteOff(handle)
            } else {
                Outbound::HitOff(handle)
            };
            self.scheduler.schedule(base, hit.delay + hit.gate, off)?;
        }
        Ok(())
    }

    /// Send a note-off for everything registered, right away.
    pub fn silence_all(&self) {
        for handle in self.registry.clear() {
            if let Err(e) = self
                .scheduler
                .send_now(Outbound::Message(handle.off_message()))
            {
                log::warn!(target: "dispatch", "could not silence {}: {}", handle.key, e);
            }
        }
    }
}

pub fn program_change(line: &LineDefinition, note: &Note) -> MidiMessage {
    let program = if note.action == Action::SpecificValue {
        note.accent_index
    } else {
        line.note.saturating_sub(1)
    };
    MidiMessage::ProgramChange {
        channel: line.wire_channel(),
        program: program.min(127),
    }
}
