//! Deferred delivery onto the outbound queue.
//!
//! Every message leaves through one queue drained by the transmit loop.
//! Immediate messages are pushed straight onto it; delayed ones are held by a
//! single timer thread that pushes each at its due time. Timers that are
//! still pending at shutdown are dropped.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::PlaybackError;
use crate::midi::MidiMessage;
use crate::note_registry::NoteHandle;

/// A fully formed item for the transmit loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound {
    Message(MidiMessage),
    /// Sent only while `handle` is the registered note for its key.
    NoteOn { handle: NoteHandle, velocity: u8 },
    /// Ends one ratchet hit; the note stays registered.
    HitOff(NoteHandle),
    /// Sent only if the note is still registered under this handle, which
    /// it then retires.
    NoteOff(NoteHandle),
}

enum TimerCmd {
    Schedule { at: Instant, item: Outbound },
    Shutdown,
}

struct Pending {
    at: Instant,
    seq: u64,
    item: Outbound,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at.cmp(&other.at).then(self.seq.cmp(&other.seq))
    }
}

/// Cloneable sending side of the scheduler.
#[derive(Clone)]
pub struct ScheduleSender {
    timer_tx: Sender<TimerCmd>,
    queue_tx: Sender<Outbound>,
}

impl ScheduleSender {
    /// Queue `item` to go out `delay` after `base`. Zero delays skip the
    /// timer thread.
    pub fn schedule(&self, base: Instant, delay: Duration, item: Outbound) -> Result<(), PlaybackError> {
        if delay.is_zero() {
            return self.send_now(item);
        }
        self.timer_tx
            .send(TimerCmd::Schedule { at: base + delay, item })
            .map_err(|_| PlaybackError::Disconnected)
    }

    pub fn send_now(&self, item: Outbound) -> Result<(), PlaybackError> {
        self.queue_tx.send(item).map_err(|_| PlaybackError::Disconnected)
    }
}

/// Owner of the timer thread.
pub struct EventScheduler {
    sender: ScheduleSender,
    join_handle: Option<JoinHandle<()>>,
}

impl EventScheduler {
    pub fn spawn(queue_tx: Sender<Outbound>) -> Result<Self, PlaybackError> {
        let (timer_tx, timer_rx) = crossbeam_channel::unbounded();
        let thread_queue = queue_tx.clone();
        let join_handle = thread::Builder::new()
            .name("stepline-timers".into())
            .spawn(move || timer_loop(timer_rx, thread_queue))
            .map_err(|e| PlaybackError::Init(e.to_string()))?;

        Ok(Self {
            sender: ScheduleSender { timer_tx, queue_tx },
            join_handle: Some(join_handle),
        })
    }

    pub fn sender(&self) -> ScheduleSender {
        self.sender.clone()
    }

    /// Stop the timer thread, discarding anything still pending.
    pub fn shutdown(&mut self) {
        let _ = self.sender.timer_tx.send(TimerCmd::Shutdown);
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EventScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(timer_rx: Receiver<TimerCmd>, queue_tx: Sender<Outbound>) {
    let mut pending: BinaryHeap<Reverse<Pending>> = BinaryHeap::new();
    let mut seq = 0u64;

    loop {
        let now = Instant::now();
        while pending.peek().is_some_and(|Reverse(p)| p.at <= now) {
            if let Some(Reverse(due)) = pending.pop() {
                if queue_tx.send(due.item).is_err() {
                    return;
                }
            }
        }

        let cmd = match pending.peek() {
            Some(Reverse(next)) => {
                match timer_rx.recv_timeout(next.at.saturating_duration_since(now)) {
                    Ok(cmd) => cmd,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
            None => match timer_rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => return,
            },
        };

        match cmd {
            TimerCmd::Schedule { at, item } => {
                seq += 1;
                pending.push(Reverse(Pending { at, seq, item }));
            }
            TimerCmd::Shutdown => {
                if !pending.is_empty() {
                    log::debug!(target: "dispatch", "dropping {} pending timers at shutdown", pending.len());
                }
                return;
            }
        }
    }
}
