use thiserror::Error;

/// Failures surfaced by the playback core. None of them are fatal: a failed
/// send loses that one message and playback carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("no MIDI output ports available")]
    NoOutputPorts,
    #[error("no MIDI output port matching {0:?}")]
    PortNotFound(String),
    #[error("MIDI initialisation failed: {0}")]
    Init(String),
    #[error("could not connect to MIDI port: {0}")]
    Connect(String),
    #[error("MIDI send failed: {0}")]
    Send(String),
    #[error("playback thread disconnected")]
    Disconnected,
}
