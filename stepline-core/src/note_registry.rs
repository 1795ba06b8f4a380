use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

use crate::midi::MidiMessage;

/// (wire channel, note) pair a sounding note occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteKey {
    pub channel: u8,
    pub note: u8,
}

impl NoteKey {
    pub fn new(channel: u8, note: u8) -> Self {
        Self { channel, note }
    }
}

impl std::fmt::Display for NoteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch{}/{}", self.channel + 1, self.note)
    }
}

/// One scheduled note. The id tells a late note-off whether the note it was
/// paired with is still the one sounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NoteHandle {
    pub id: u64,
    pub key: NoteKey,
}

impl NoteHandle {
    pub fn on_message(&self, velocity: u8) -> MidiMessage {
        MidiMessage::NoteOn {
            channel: self.key.channel,
            note: self.key.note,
            velocity,
        }
    }

    pub fn off_message(&self) -> MidiMessage {
        MidiMessage::NoteOff {
            channel: self.key.channel,
            note: self.key.note,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// An overlapping retrigger: the key was still sounding.
    #[error("note {key} already sounding (handle {})", previous.id)]
    Duplicate { key: NoteKey, previous: NoteHandle },
}

/// Notes believed to be sounding, shared between the dispatcher (which
/// registers note-ons) and the transmit loop (which retires note-offs).
pub struct NoteRegistry {
    notes: Mutex<HashMap<NoteKey, NoteHandle>>,
    next_id: AtomicU64,
}

impl NoteRegistry {
    pub fn new() -> Self {
        Self {
            notes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn notes(&self) -> MutexGuard<'_, HashMap<NoteKey, NoteHandle>> {
        self.notes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A fresh handle for `key`; not registered yet.
    pub fn handle(&self, key: NoteKey) -> NoteHandle {
        NoteHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            key,
        }
    }

    /// Register `handle`, refusing when its key is already taken.
    pub fn register(&self, handle: NoteHandle) -> Result<(), RegistryError> {
        let mut notes = self.notes();
        if let Some(previous) = notes.get(&handle.key) {
            return Err(RegistryError::Duplicate {
                key: handle.key,
                previous: *previous,
            });
        }
        notes.insert(handle.key, handle);
        Ok(())
    }

    /// Register `handle` unconditionally, returning whatever it displaced.
    pub fn replace(&self, handle: NoteHandle) -> Option<NoteHandle> {
        self.notes().insert(handle.key, handle)
    }

    pub fn contains(&self, key: NoteKey) -> bool {
        self.notes().contains_key(&key)
    }

    pub fn get(&self, key: NoteKey) -> Option<NoteHandle> {
        self.notes().get(&key).copied()
    }

    pub fn is_current(&self, handle: &NoteHandle) -> bool {
        self.notes().get(&handle.key).is_some_and(|h| h.id == handle.id)
    }

    /// Retire `handle` only if it is still the registered note for its key.
    pub fn remove_if_current(&self, handle: &NoteHandle) -> bool {
        let mut notes = self.notes();
        match notes.get(&handle.key) {
            Some(current) if current.id == handle.id => {
                notes.remove(&handle.key);
                true
            }
            _ => false,
        }
    }

    /// Drop every entry, returning them so the caller can silence them.
    pub fn clear(&self) -> Vec<NoteHandle> {
        let mut handles: Vec<NoteHandle> = self.notes().drain().map(|(_, h)| h).collect();
        handles.sort_by_key(|h| h.key);
        handles
    }

    pub fn len(&self) -> usize {
        self.notes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes().is_empty()
    }
}

impl Default for NoteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_retire() {
        let reg = NoteRegistry::new();
        let key = NoteKey::new(0, 60);
        let handle = reg.handle(key);
        reg.register(handle).unwrap();
        assert!(reg.contains(key));
        assert!(reg.remove_if_current(&handle));
        assert!(reg.is_empty());
    }

    #[test]
    fn duplicate_registration_reports_previous() {
        let reg = NoteRegistry::new();
        let key = NoteKey::new(1, 42);
        let first = reg.handle(key);
        let second = reg.handle(key);
        reg.register(first).unwrap();
        let err = reg.register(second).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate { key, previous: first });
        assert_eq!(reg.get(key), Some(first));
    }

    #[test]
    fn stale_handle_does_not_retire_newer_note() {
        let reg = NoteRegistry::new();
        let key = NoteKey::new(0, 36);
        let old = reg.handle(key);
        let new = reg.handle(key);
        reg.register(old).unwrap();
        assert_eq!(reg.replace(new), Some(old));
        assert!(!reg.remove_if_current(&old));
        assert!(reg.contains(key));
        assert!(!reg.is_current(&old));
        assert!(reg.is_current(&new));
        assert!(reg.remove_if_current(&new));
    }

    #[test]
    fn handles_are_unique() {
        let reg = NoteRegistry::new();
        let key = NoteKey::new(0, 1);
        assert_ne!(reg.handle(key).id, reg.handle(key).id);
    }

    #[test]
    fn clear_returns_everything() {
        let reg = NoteRegistry::new();
        for note in [64, 60, 62] {
            reg.register(reg.handle(NoteKey::new(0, note))).unwrap();
        }
        let cleared = reg.clear();
        let notes: Vec<u8> = cleared.iter().map(|h| h.key.note).collect();
        assert_eq!(notes, vec![60, 62, 64]);
        assert!(reg.is_empty());
        assert_eq!(
            cleared[0].off_message(),
            MidiMessage::NoteOff { channel: 0, note: 60 }
        );
    }
}
