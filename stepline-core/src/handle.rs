use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use stepline_types::{Cursor, LoopMode, OverlayKey, PlayState, Song};

use crate::commands::{PlaybackCmd, PlaybackFeedback, Tick};
use crate::dispatcher::{BeatDispatcher, DispatchTables};
use crate::error::PlaybackError;
use crate::midi::{send_locked, shared, MidiTransport, SharedTransport};
use crate::note_registry::NoteRegistry;
use crate::playback_thread::PlaybackThread;
use crate::scheduler::EventScheduler;
use crate::transmit::spawn_transmit_loop;

/// Main-thread handle to the playback subsystem.
///
/// Owns three threads: the orchestrator, the timer thread, and the transmit
/// loop. Dropping the handle shuts all of them down and silences any note
/// still registered.
pub struct PlaybackHandle {
    cmd_tx: Sender<PlaybackCmd>,
    tick_tx: Sender<Tick>,
    feedback_rx: Receiver<PlaybackFeedback>,
    registry: Arc<NoteRegistry>,
    transport: SharedTransport,
    scheduler: Option<EventScheduler>,
    playback_join: Option<JoinHandle<()>>,
    transmit_join: Option<JoinHandle<()>>,
}

impl PlaybackHandle {
    pub fn new(transport: Box<dyn MidiTransport>, tables: DispatchTables) -> Result<Self, PlaybackError> {
        let transport = shared(transport);
        let registry = Arc::new(NoteRegistry::new());

        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
        let (error_tx, error_rx) = crossbeam_channel::unbounded();
        let transmit_join = spawn_transmit_loop(queue_rx, transport.clone(), registry.clone(), error_tx)?;
        let scheduler = EventScheduler::spawn(queue_tx)?;
        let dispatcher = BeatDispatcher::new(scheduler.sender(), registry.clone(), tables);

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (tick_tx, tick_rx) = crossbeam_channel::unbounded();
        let (feedback_tx, feedback_rx) = mpsc::channel();

        let playback_join = thread::Builder::new()
            .name("stepline-playback".into())
            .spawn(move || {
                PlaybackThread::new(cmd_rx, tick_rx, error_rx, feedback_tx, dispatcher).run();
            })
            .map_err(|e| PlaybackError::Init(e.to_string()))?;

        Ok(Self {
            cmd_tx,
            tick_tx,
            feedback_rx,
            registry,
            transport,
            scheduler: Some(scheduler),
            playback_join: Some(playback_join),
            transmit_join: Some(transmit_join),
        })
    }

    pub fn send_cmd(&self, cmd: PlaybackCmd) -> Result<(), PlaybackError> {
        self.cmd_tx.send(cmd).map_err(|_| PlaybackError::Disconnected)
    }

    /// Fire-and-forget: send a command and log if the thread is gone.
    fn send(&self, cmd: PlaybackCmd) {
        if let Err(e) = self.send_cmd(cmd) {
            log::warn!(target: "playback", "command dropped: {}", e);
        }
    }

    pub fn update_state(&self, song: Arc<Song>, play_state: PlayState, cursor: Cursor) {
        self.send(PlaybackCmd::UpdateState {
            song,
            play_state,
            cursor,
        });
    }

    pub fn start(&self, loop_mode: LoopMode) {
        self.send(PlaybackCmd::Start {
            loop_mode,
            focus: None,
        });
    }

    /// Loop the cursor's section starting on `key`'s overlay.
    pub fn start_overlay(&self, key: OverlayKey) {
        self.send(PlaybackCmd::Start {
            loop_mode: LoopMode::LoopOverlay,
            focus: Some(key),
        });
    }

    pub fn stop(&self) {
        self.send(PlaybackCmd::Stop);
    }

    pub fn tick(&self, interval: Duration) -> Result<(), PlaybackError> {
        self.tick_tx
            .send(Tick { interval })
            .map_err(|_| PlaybackError::Disconnected)
    }

    /// Sender a clock thread can push ticks through.
    pub fn tick_sender(&self) -> Sender<Tick> {
        self.tick_tx.clone()
    }

    pub fn drain_feedback(&self) -> Vec<PlaybackFeedback> {
        self.feedback_rx.try_iter().collect()
    }

    pub fn recv_feedback_timeout(&self, timeout: Duration) -> Option<PlaybackFeedback> {
        self.feedback_rx.recv_timeout(timeout).ok()
    }

    pub fn registry(&self) -> &Arc<NoteRegistry> {
        &self.registry
    }

    /// Stop every thread, then turn off whatever is still registered.
    pub fn shutdown(&mut self) {
        if self.playback_join.is_none() && self.transmit_join.is_none() {
            return;
        }
        let _ = self.cmd_tx.send(PlaybackCmd::Shutdown);
        if let Some(handle) = self.playback_join.take() {
            let _ = handle.join();
        }
        // Dropping the scheduler releases the last queue sender.
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown();
        }
        if let Some(handle) = self.transmit_join.take() {
            let _ = handle.join();
        }

        let sounding = self.registry.clear();
        if !sounding.is_empty() {
            log::debug!(target: "registry", "silencing {} notes at shutdown", sounding.len());
        }
        for handle in sounding {
            if let Err(e) = send_locked(&self.transport, &handle.off_message()) {
                log::warn!(target: "midi", "could not silence {}: {}", handle.key, e);
            }
        }
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::midi::MidiMessage;
    use crate::note_registry::NoteKey;

    struct Collect(Arc<Mutex<Vec<MidiMessage>>>);

    impl MidiTransport for Collect {
        fn send(&mut self, message: &MidiMessage) -> Result<(), PlaybackError> {
            self.0.lock().unwrap().push(*message);
            Ok(())
        }
    }

    #[test]
    fn shutdown_silences_registered_notes() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut handle =
            PlaybackHandle::new(Box::new(Collect(sent.clone())), DispatchTables::default()).unwrap();
        let registry = handle.registry().clone();
        registry.register(registry.handle(NoteKey::new(2, 40))).unwrap();

        handle.shutdown();
        assert!(registry.is_empty());
        assert_eq!(
            *sent.lock().unwrap(),
            vec![MidiMessage::NoteOff { channel: 2, note: 40 }]
        );
        // A second shutdown (from Drop) is a no-op.
        handle.shutdown();
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn ticks_without_a_song_are_ignored() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let handle =
            PlaybackHandle::new(Box::new(Collect(sent.clone())), DispatchTables::default()).unwrap();
        handle.start(LoopMode::OneShot);
        handle.tick(Duration::from_millis(10)).unwrap();
        assert!(handle.recv_feedback_timeout(Duration::from_millis(50)).is_none());
        assert!(sent.lock().unwrap().is_empty());
    }
}
