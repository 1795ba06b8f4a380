//! Dedicated transmit thread.
//!
//! The only place messages are handed to the transport during playback, so
//! the transport never sees concurrent sends from the timer or orchestrator
//! threads.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::error::PlaybackError;
use crate::midi::{send_locked, SharedTransport};
use crate::note_registry::NoteRegistry;
use crate::scheduler::Outbound;

pub fn spawn_transmit_loop(
    queue_rx: Receiver<Outbound>,
    transport: SharedTransport,
    registry: Arc<NoteRegistry>,
    error_tx: Sender<PlaybackError>,
) -> Result<JoinHandle<()>, PlaybackError> {
    thread::Builder::new()
        .name("stepline-transmit".into())
        .spawn(move || transmit_loop(queue_rx, transport, registry, error_tx))
        .map_err(|e| PlaybackError::Init(e.to_string()))
}

/// Runs until every queue sender is gone and the queue is drained.
fn transmit_loop(
    queue_rx: Receiver<Outbound>,
    transport: SharedTransport,
    registry: Arc<NoteRegistry>,
    error_tx: Sender<PlaybackError>,
) {
    while let Ok(item) = queue_rx.recv() {
        let message = match item {
            Outbound::Message(message) => message,
            // Silenced or retriggered before it was due.
            Outbound::NoteOn { handle, velocity } => {
                if !registry.is_current(&handle) {
                    continue;
                }
                handle.on_message(velocity)
            }
            Outbound::HitOff(handle) => {
                if !registry.is_current(&handle) {
                    continue;
                }
                handle.off_message()
            }
            Outbound::NoteOff(handle) => {
                // Already silenced, or retriggered since this off was scheduled.
                if !registry.remove_if_current(&handle) {
                    continue;
                }
                handle.off_message()
            }
        };

        if let Err(e) = send_locked(&transport, &message) {
            log::warn!(target: "midi", "dropped {:?}: {}", message, e);
            let _ = error_tx.send(e);
        }
    }
    log::debug!(target: "midi", "transmit loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::midi::{shared, MidiMessage, MidiTransport};
    use crate::note_registry::NoteKey;

    struct Collect(Arc<Mutex<Vec<MidiMessage>>>);

    impl MidiTransport for Collect {
        fn send(&mut self, message: &MidiMessage) -> Result<(), PlaybackError> {
            self.0.lock().unwrap().push(*message);
            Ok(())
        }
    }

    struct Failing;

    impl MidiTransport for Failing {
        fn send(&mut self, _message: &MidiMessage) -> Result<(), PlaybackError> {
            Err(PlaybackError::Send("port closed".into()))
        }
    }

    #[test]
    fn sends_messages_and_retires_current_note_offs() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(NoteRegistry::new());
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
        let (error_tx, _error_rx) = crossbeam_channel::unbounded();
        let handle = spawn_transmit_loop(
            queue_rx,
            shared(Box::new(Collect(sent.clone()))),
            registry.clone(),
            error_tx,
        )
        .unwrap();

        let key = NoteKey::new(0, 60);
        let current = registry.handle(key);
        let stale = registry.handle(key);
        registry.register(current).unwrap();

        queue_tx
            .send(Outbound::Message(MidiMessage::NoteOn { channel: 0, note: 60, velocity: 90 }))
            .unwrap();
        queue_tx.send(Outbound::NoteOff(stale)).unwrap();
        queue_tx.send(Outbound::NoteOff(current)).unwrap();
        queue_tx.send(Outbound::NoteOff(current)).unwrap();
        drop(queue_tx);
        handle.join().unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![
                MidiMessage::NoteOn { channel: 0, note: 60, velocity: 90 },
                MidiMessage::NoteOff { channel: 0, note: 60 },
            ]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn note_ons_and_hit_offs_need_a_current_handle() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(NoteRegistry::new());
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
        let (error_tx, _error_rx) = crossbeam_channel::unbounded();
        let join = spawn_transmit_loop(
            queue_rx,
            shared(Box::new(Collect(sent.clone()))),
            registry.clone(),
            error_tx,
        )
        .unwrap();

        let handle = registry.handle(NoteKey::new(3, 50));
        registry.register(handle).unwrap();
        queue_tx.send(Outbound::NoteOn { handle, velocity: 70 }).unwrap();
        queue_tx.send(Outbound::HitOff(handle)).unwrap();
        // A stop clears the registry before the next hit is due.
        queue_tx.send(Outbound::NoteOff(handle)).unwrap();
        queue_tx.send(Outbound::NoteOn { handle, velocity: 70 }).unwrap();
        queue_tx.send(Outbound::HitOff(handle)).unwrap();
        drop(queue_tx);
        join.join().unwrap();

        assert_eq!(
            *sent.lock().unwrap(),
            vec![
                MidiMessage::NoteOn { channel: 3, note: 50, velocity: 70 },
                MidiMessage::NoteOff { channel: 3, note: 50 },
                MidiMessage::NoteOff { channel: 3, note: 50 },
            ]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn send_failures_are_forwarded_and_loop_continues() {
        let registry = Arc::new(NoteRegistry::new());
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
        let (error_tx, error_rx) = crossbeam_channel::unbounded();
        let handle =
            spawn_transmit_loop(queue_rx, shared(Box::new(Failing)), registry, error_tx).unwrap();

        for value in 0..2 {
            queue_tx
                .send(Outbound::Message(MidiMessage::ControlChange {
                    channel: 0,
                    controller: 1,
                    value,
                }))
                .unwrap();
        }
        drop(queue_tx);
        handle.join().unwrap();

        let errors: Vec<_> = error_rx.try_iter().collect();
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| matches!(e, PlaybackError::Send(_))));
        assert!(error_rx.recv_timeout(Duration::from_millis(10)).is_err());
    }
}
