use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::dispatcher::{
    DispatchTables, DEFAULT_LONG_GATE_BEATS, DEFAULT_NOTE_TARGET_VELOCITY, DEFAULT_SHORT_GATES,
    DEFAULT_WAIT_PERCENTAGES,
};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    midi: MidiConfig,
    #[serde(default)]
    timing: TimingConfig,
    #[serde(default)]
    notes: NotesConfig,
    #[serde(default)]
    defaults: DefaultsConfig,
    #[serde(default)]
    controllers: Vec<ControllerConfig>,
}

#[derive(Deserialize, Default)]
struct MidiConfig {
    client_name: Option<String>,
    port: Option<String>,
}

#[derive(Deserialize, Default)]
struct TimingConfig {
    wait_percentages: Option<Vec<f64>>,
    short_gates: Option<Vec<f64>>,
    long_gate_beats: Option<u8>,
    ratchet_gate_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct NotesConfig {
    note_target_velocity: Option<u8>,
}

#[derive(Deserialize, Default)]
struct DefaultsConfig {
    bpm: Option<u16>,
    subdivisions: Option<u8>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    pub number: u8,
    pub upper_limit: u8,
    #[serde(default)]
    pub name: String,
}

pub struct Config {
    midi: MidiConfig,
    timing: TimingConfig,
    notes: NotesConfig,
    defaults: DefaultsConfig,
    controllers: Vec<ControllerConfig>,
}

impl Config {
    /// Embedded defaults with the user's config file merged over them.
    pub fn load() -> Self {
        Self::load_from(user_config_path().as_deref())
    }

    pub fn load_from(user_path: Option<&Path>) -> Self {
        let mut base: ConfigFile = toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|e| {
            log::warn!(target: "config", "embedded config.toml did not parse: {}", e);
            ConfigFile::default()
        });

        if let Some(path) = user_path {
            if path.exists() {
                match std::fs::read_to_string(path) {
                    Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                        Ok(user) => {
                            log::debug!(target: "config", "merging {}", path.display());
                            merge_midi(&mut base.midi, user.midi);
                            merge_timing(&mut base.timing, user.timing);
                            merge_notes(&mut base.notes, user.notes);
                            merge_defaults(&mut base.defaults, user.defaults);
                            merge_controllers(&mut base.controllers, user.controllers);
                        }
                        Err(e) => {
                            log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                        }
                    },
                    Err(e) => {
                        log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                    }
                }
            }
        }

        Config {
            midi: base.midi,
            timing: base.timing,
            notes: base.notes,
            defaults: base.defaults,
            controllers: base.controllers,
        }
    }

    pub fn client_name(&self) -> &str {
        self.midi.client_name.as_deref().unwrap_or("stepline")
    }

    /// Output port filter; `None` opens the first port.
    pub fn port(&self) -> Option<&str> {
        self.midi.port.as_deref()
    }

    pub fn bpm(&self) -> u16 {
        self.defaults.bpm.unwrap_or(120).clamp(20, 300)
    }

    /// Ticks per beat for the standalone clock.
    pub fn subdivisions(&self) -> u8 {
        self.defaults.subdivisions.unwrap_or(2).max(1)
    }

    pub fn controllers(&self) -> &[ControllerConfig] {
        &self.controllers
    }

    pub fn dispatch_tables(&self) -> DispatchTables {
        let wait_percentages = self
            .timing
            .wait_percentages
            .clone()
            .filter(|w| !w.is_empty())
            .unwrap_or_else(|| DEFAULT_WAIT_PERCENTAGES.to_vec());
        let short_gates = self
            .timing
            .short_gates
            .clone()
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| DEFAULT_SHORT_GATES.to_vec());
        let long_gate_beats = self
            .timing
            .long_gate_beats
            .unwrap_or(DEFAULT_LONG_GATE_BEATS)
            .max(2);

        DispatchTables {
            wait_percentages,
            short_gates,
            long_gates: DispatchTables::long_gates(long_gate_beats),
            ratchet_gate: Duration::from_millis(self.timing.ratchet_gate_ms.unwrap_or(20)),
            note_target_velocity: self
                .notes
                .note_target_velocity
                .unwrap_or(DEFAULT_NOTE_TARGET_VELOCITY)
                .min(127),
            upper_limits: self
                .controllers
                .iter()
                .map(|c| (c.number, c.upper_limit.min(127)))
                .collect::<HashMap<u8, u8>>(),
        }
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("stepline").join("config.toml"))
}

fn merge_midi(base: &mut MidiConfig, user: MidiConfig) {
    if user.client_name.is_some() {
        base.client_name = user.client_name;
    }
    if user.port.is_some() {
        base.port = user.port;
    }
}

fn merge_timing(base: &mut TimingConfig, user: TimingConfig) {
    if user.wait_percentages.is_some() {
        base.wait_percentages = user.wait_percentages;
    }
    if user.short_gates.is_some() {
        base.short_gates = user.short_gates;
    }
    if user.long_gate_beats.is_some() {
        base.long_gate_beats = user.long_gate_beats;
    }
    if user.ratchet_gate_ms.is_some() {
        base.ratchet_gate_ms = user.ratchet_gate_ms;
    }
}

fn merge_notes(base: &mut NotesConfig, user: NotesConfig) {
    if user.note_target_velocity.is_some() {
        base.note_target_velocity = user.note_target_velocity;
    }
}

fn merge_defaults(base: &mut DefaultsConfig, user: DefaultsConfig) {
    if user.bpm.is_some() {
        base.bpm = user.bpm;
    }
    if user.subdivisions.is_some() {
        base.subdivisions = user.subdivisions;
    }
}

/// User controllers replace embedded entries with the same number.
fn merge_controllers(base: &mut Vec<ControllerConfig>, user: Vec<ControllerConfig>) {
    for controller in user {
        match base.iter_mut().find(|c| c.number == controller.number) {
            Some(existing) => *existing = controller,
            None => base.push(controller),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_embedded_config() {
        let config = Config::load_from(None);
        assert_eq!(config.client_name(), "stepline");
        assert_eq!(config.port(), None);
        assert_eq!(config.bpm(), 120);
        assert_eq!(config.subdivisions(), 2);
        assert_eq!(config.controllers().len(), 17);
    }

    #[test]
    fn test_embedded_tables_match_builtin_defaults() {
        let mut tables = Config::load_from(None).dispatch_tables();
        assert_eq!(tables.upper_limit(64), 1);
        assert_eq!(tables.upper_limit(7), 127);
        tables.upper_limits.clear();
        assert_eq!(tables, DispatchTables::default());
    }

    #[test]
    fn test_merge_controllers_overrides_by_number() {
        let mut base = vec![ControllerConfig {
            number: 7,
            upper_limit: 127,
            name: "Volume".into(),
        }];
        merge_controllers(
            &mut base,
            vec![
                ControllerConfig { number: 7, upper_limit: 100, name: String::new() },
                ControllerConfig { number: 74, upper_limit: 64, name: "Cutoff".into() },
            ],
        );
        assert_eq!(base.len(), 2);
        assert_eq!(base[0].upper_limit, 100);
        assert_eq!(base[1].number, 74);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let config = Config {
            midi: MidiConfig::default(),
            timing: TimingConfig {
                long_gate_beats: Some(0),
                ..TimingConfig::default()
            },
            notes: NotesConfig { note_target_velocity: Some(200) },
            defaults: DefaultsConfig { bpm: Some(1000), subdivisions: Some(0) },
            controllers: Vec::new(),
        };
        assert_eq!(config.bpm(), 300);
        assert_eq!(config.subdivisions(), 1);
        let tables = config.dispatch_tables();
        assert_eq!(tables.note_target_velocity, 127);
        assert_eq!(tables.long_gates.len(), 8);
    }
}
