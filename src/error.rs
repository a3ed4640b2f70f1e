use crate::domain::models::PeerId;
use thiserror::Error;

/// Failures surfaced by the Timer Profile core.
///
/// None of these are retried; the caller decides whether to issue the
/// operation again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("Bluetooth radio is disabled or not LE capable")]
    RadioUnavailable,
    #[error("a scan is already active")]
    ScanAlreadyActive,
    #[error("another GATT request is in flight")]
    RequestInFlight,
    #[error("not connected to a timer server")]
    NotConnected,
    #[error("transport failure (status {0:#04x})")]
    TransportFailure(u8),
    #[error("peer rejected the request (status {0:#04x})")]
    RemoteRejected(u8),
    #[error("malformed payload: expected 4 bytes, got {len}")]
    MalformedPayload { len: usize },
    #[error("peer does not expose the timer service")]
    ProfileMismatch,
    #[error("scan failed (code {0})")]
    ScanFailed(i32),
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
}

/// Synchronous refusal of a request by the transport provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("radio unavailable")]
    RadioUnavailable,
    #[error("request refused (status {0:#04x})")]
    Refused(u8),
}

impl From<TransportError> for TimerError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::RadioUnavailable => TimerError::RadioUnavailable,
            TransportError::Refused(status) => TimerError::TransportFailure(status),
        }
    }
}
