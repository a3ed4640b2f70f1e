use crate::error::TimerError;
use std::fmt;

/// Opaque identity of a remote peer (platform address or handle)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A timer server discovered during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDevice {
    pub id: PeerId,
    pub name: String,
    pub rssi: i16,
}

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Transport-level status reported by the link
    Transport(u8),
    /// The peer does not expose the timer service
    ProfileMismatch,
    /// Local disconnect or replacement by a new connect
    UserInitiated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    DiscoveringServices,
    Ready,
    Disconnecting,
    Disconnected(DisconnectReason),
}

impl ConnectionState {
    /// True while a transport link is (or is becoming) established
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::DiscoveringServices | Self::Ready
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Connecting => f.write_str("Connecting"),
            Self::DiscoveringServices => f.write_str("Discovering services"),
            Self::Ready => f.write_str("Connected"),
            Self::Disconnecting => f.write_str("Disconnecting"),
            Self::Disconnected(DisconnectReason::Transport(status)) => {
                write!(f, "Disconnected (status {:#04x})", status)
            }
            Self::Disconnected(DisconnectReason::ProfileMismatch) => {
                f.write_str("Disconnected (no timer service)")
            }
            Self::Disconnected(DisconnectReason::UserInitiated) => f.write_str("Disconnected"),
        }
    }
}

/// Operations a caller can issue, used to label failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    StartScan,
    Scan,
    Connect,
    ReadElapsed,
    ReadOffset,
    WriteOffset,
    SubscribeElapsed,
}

/// Events delivered to the UI collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    ElapsedChanged(u32),
    OffsetChanged(u32),
    /// The peer accepted a new offset; not applied until read back
    OffsetWritten(u32),
    ConnectionStateChanged(ConnectionState),
    PeersChanged(Vec<PeerDevice>),
    OperationFailed {
        operation: Operation,
        error: TimerError,
    },
    LogMessage(StatusMessage),
}

impl AppEvent {
    /// Hand this event to a listener-style consumer
    pub fn dispatch(&self, listener: &mut dyn TimerListener) {
        match self {
            Self::ElapsedChanged(value) => listener.on_elapsed_changed(*value),
            Self::OffsetChanged(offset) => listener.on_offset_changed(*offset),
            Self::OffsetWritten(offset) => listener.on_offset_written(*offset),
            Self::ConnectionStateChanged(state) => listener.on_connection_state_changed(*state),
            Self::PeersChanged(peers) => listener.on_peers_changed(peers),
            Self::OperationFailed { operation, error } => {
                listener.on_operation_failed(*operation, error)
            }
            Self::LogMessage(message) => listener.on_log_message(message),
        }
    }
}

/// Listener interface for UI components
///
/// Only the three value callbacks are required.
pub trait TimerListener {
    fn on_elapsed_changed(&mut self, value: u32);
    fn on_offset_changed(&mut self, offset: u32);
    fn on_connection_state_changed(&mut self, state: ConnectionState);

    fn on_offset_written(&mut self, _offset: u32) {}
    fn on_peers_changed(&mut self, _peers: &[PeerDevice]) {}
    fn on_operation_failed(&mut self, _operation: Operation, _error: &TimerError) {}
    fn on_log_message(&mut self, _message: &StatusMessage) {}
}

/// Requests from the UI collaborator to the Bluetooth worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BluetoothCommand {
    StartScan,
    StopScan,
    Connect(PeerId),
    Disconnect,
    ReadElapsed,
    ReadOffset,
    WriteOffset(u32),
    SubscribeElapsed,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        elapsed: Vec<u32>,
        offsets: Vec<u32>,
        states: Vec<ConnectionState>,
    }

    impl TimerListener for Recorder {
        fn on_elapsed_changed(&mut self, value: u32) {
            self.elapsed.push(value);
        }
        fn on_offset_changed(&mut self, offset: u32) {
            self.offsets.push(offset);
        }
        fn on_connection_state_changed(&mut self, state: ConnectionState) {
            self.states.push(state);
        }
    }

    #[test]
    fn test_dispatch_to_listener() {
        let mut recorder = Recorder::default();
        AppEvent::ElapsedChanged(100).dispatch(&mut recorder);
        AppEvent::OffsetChanged(1_700_000_000).dispatch(&mut recorder);
        AppEvent::ConnectionStateChanged(ConnectionState::Ready).dispatch(&mut recorder);
        AppEvent::PeersChanged(Vec::new()).dispatch(&mut recorder);

        assert_eq!(recorder.elapsed, vec![100]);
        assert_eq!(recorder.offsets, vec![1_700_000_000]);
        assert_eq!(recorder.states, vec![ConnectionState::Ready]);
    }

    #[test]
    fn test_state_descriptions() {
        assert_eq!(ConnectionState::Ready.to_string(), "Connected");
        assert_eq!(
            ConnectionState::Disconnected(DisconnectReason::Transport(0x85)).to_string(),
            "Disconnected (status 0x85)"
        );
        assert!(!ConnectionState::Disconnecting.is_live());
    }
}
