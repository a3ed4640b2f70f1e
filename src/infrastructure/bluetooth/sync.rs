//! Timer synchronisation over a ready connection
//!
//! Reads, writes and the elapsed subscription. The link carries one GATT
//! request at a time, so a second request while one is pending is refused
//! rather than queued.

use crate::domain::models::{AppEvent, Operation, PeerId};
use crate::error::TimerError;
use crate::infrastructure::bluetooth::connection::ConnectionStateMachine;
use crate::infrastructure::bluetooth::protocol::{
    decode_time_value, encode_time_value, status_description, GATT_SUCCESS,
};
use crate::infrastructure::bluetooth::transport::{CharacteristicHandle, Transport, TransportEvent};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    ReadElapsed,
    ReadOffset,
    WriteOffset(u32),
}

impl Request {
    fn operation(self) -> Operation {
        match self {
            Self::ReadElapsed => Operation::ReadElapsed,
            Self::ReadOffset => Operation::ReadOffset,
            Self::WriteOffset(_) => Operation::WriteOffset,
        }
    }
}

#[derive(Debug)]
struct InFlight {
    peer: PeerId,
    handle: CharacteristicHandle,
    request: Request,
}

#[derive(Debug, Default)]
pub struct TimerSyncSession {
    in_flight: Option<InFlight>,
    subscribed: bool,
}

impl TimerSyncSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// A request is waiting for its completion
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn read_elapsed(
        &mut self,
        connection: &ConnectionStateMachine,
        transport: &mut dyn Transport,
    ) -> Result<(), TimerError> {
        self.issue(connection, transport, Request::ReadElapsed)
    }

    pub fn read_offset(
        &mut self,
        connection: &ConnectionStateMachine,
        transport: &mut dyn Transport,
    ) -> Result<(), TimerError> {
        self.issue(connection, transport, Request::ReadOffset)
    }

    /// Write a new offset. The local view is only updated by a later read.
    pub fn write_offset(
        &mut self,
        connection: &ConnectionStateMachine,
        transport: &mut dyn Transport,
        timestamp: u32,
    ) -> Result<(), TimerError> {
        self.issue(connection, transport, Request::WriteOffset(timestamp))
    }

    /// Enable elapsed notifications; a no-op when already enabled
    pub fn subscribe_elapsed(
        &mut self,
        connection: &ConnectionStateMachine,
        transport: &mut dyn Transport,
    ) -> Result<(), TimerError> {
        let (peer, handles) = connection.require_ready()?;
        if self.subscribed {
            debug!("Elapsed notifications already enabled");
            return Ok(());
        }

        info!("Enabling elapsed notifications on {}", peer);
        transport.enable_notifications(peer, handles.elapsed)?;
        self.subscribed = true;
        Ok(())
    }

    /// Forget the pending request and subscription of a closed connection
    pub fn reset(&mut self) {
        if let Some(dropped) = self.in_flight.take() {
            debug!("Dropping in-flight {:?} to {}", dropped.request, dropped.peer);
        }
        self.subscribed = false;
    }

    /// Apply a completion or notification; returns the event to surface
    pub fn handle_event(
        &mut self,
        connection: &ConnectionStateMachine,
        event: &TransportEvent,
    ) -> Option<AppEvent> {
        match event {
            TransportEvent::ReadComplete {
                peer,
                handle,
                status,
                value,
            } => {
                let request = self.complete(peer, *handle)?;
                if *status != GATT_SUCCESS {
                    return Some(rejected(request, *status));
                }
                debug!("Read {:?} -> {:02X?}", request, value);
                let value = match decode_time_value(value) {
                    Ok(value) => value,
                    Err(error) => {
                        return Some(AppEvent::OperationFailed {
                            operation: request.operation(),
                            error,
                        })
                    }
                };
                match request {
                    Request::ReadElapsed => Some(AppEvent::ElapsedChanged(value)),
                    Request::ReadOffset => Some(AppEvent::OffsetChanged(value)),
                    Request::WriteOffset(_) => None,
                }
            }
            TransportEvent::WriteComplete {
                peer,
                handle,
                status,
            } => {
                let request = self.complete(peer, *handle)?;
                if *status != GATT_SUCCESS {
                    return Some(rejected(request, *status));
                }
                match request {
                    Request::WriteOffset(timestamp) => {
                        info!("Offset {} accepted by {}", timestamp, peer);
                        Some(AppEvent::OffsetWritten(timestamp))
                    }
                    _ => None,
                }
            }
            TransportEvent::Notification {
                peer,
                handle,
                value,
            } => {
                let (ready_peer, handles) = connection.require_ready().ok()?;
                if !self.subscribed || ready_peer != peer || handles.elapsed != *handle {
                    debug!("Ignoring unsolicited notification on {:?}", handle);
                    return None;
                }
                Some(match decode_time_value(value) {
                    Ok(value) => AppEvent::ElapsedChanged(value),
                    Err(error) => AppEvent::OperationFailed {
                        operation: Operation::SubscribeElapsed,
                        error,
                    },
                })
            }
            TransportEvent::NotificationsFailed {
                peer,
                handle,
                status,
            } => {
                let (ready_peer, handles) = connection.require_ready().ok()?;
                if !self.subscribed || ready_peer != peer || handles.elapsed != *handle {
                    return None;
                }
                warn!("Enabling elapsed notifications failed: {}", status_description(*status));
                self.subscribed = false;
                Some(AppEvent::OperationFailed {
                    operation: Operation::SubscribeElapsed,
                    error: TimerError::RemoteRejected(*status),
                })
            }
            _ => None,
        }
    }

    fn issue(
        &mut self,
        connection: &ConnectionStateMachine,
        transport: &mut dyn Transport,
        request: Request,
    ) -> Result<(), TimerError> {
        let (peer, handles) = connection.require_ready()?;
        if self.in_flight.is_some() {
            return Err(TimerError::RequestInFlight);
        }

        let handle = match request {
            Request::ReadElapsed => handles.elapsed,
            Request::ReadOffset | Request::WriteOffset(_) => handles.offset,
        };

        match request {
            Request::WriteOffset(timestamp) => {
                let value = encode_time_value(timestamp);
                debug!("Writing value of size {}", value.len());
                transport.write_characteristic(peer, handle, &value)?
            }
            _ => transport.read_characteristic(peer, handle)?,
        }

        self.in_flight = Some(InFlight {
            peer: peer.clone(),
            handle,
            request,
        });
        Ok(())
    }

    /// Take the pending request if the completion belongs to it
    fn complete(&mut self, peer: &PeerId, handle: CharacteristicHandle) -> Option<Request> {
        let matches = self
            .in_flight
            .as_ref()
            .is_some_and(|pending| pending.peer == *peer && pending.handle == handle);
        if !matches {
            debug!("Dropping completion on {:?} with no matching request", handle);
            return None;
        }
        self.in_flight.take().map(|pending| pending.request)
    }
}

fn rejected(request: Request, status: u8) -> AppEvent {
    warn!("{:?} rejected: {}", request, status_description(status));
    AppEvent::OperationFailed {
        operation: request.operation(),
        error: TimerError::RemoteRejected(status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ConnectionState;
    use crate::infrastructure::bluetooth::protocol::GATT_ERROR;
    use crate::infrastructure::bluetooth::transport::testing::{
        timer_services, Call, RecordingTransport, ELAPSED_HANDLE, OFFSET_HANDLE,
    };

    fn peer() -> PeerId {
        PeerId::new("P1")
    }

    fn ready(transport: &mut RecordingTransport) -> ConnectionStateMachine {
        let mut machine = ConnectionStateMachine::new();
        machine.connect(transport, peer()).unwrap();
        machine.handle_event(transport, &TransportEvent::Connected { peer: peer() });
        machine.handle_event(
            transport,
            &TransportEvent::ServicesDiscovered {
                peer: peer(),
                services: timer_services(),
            },
        );
        transport.calls.clear();
        machine
    }

    fn read_complete(handle: CharacteristicHandle, status: u8, value: &[u8]) -> TransportEvent {
        TransportEvent::ReadComplete {
            peer: peer(),
            handle,
            status,
            value: value.to_vec(),
        }
    }

    #[test]
    fn test_not_connected_touches_nothing() {
        let mut transport = RecordingTransport::default();
        let machine = ConnectionStateMachine::new();
        let mut sync = TimerSyncSession::new();

        assert_eq!(
            sync.read_elapsed(&machine, &mut transport),
            Err(TimerError::NotConnected)
        );
        assert_eq!(
            sync.write_offset(&machine, &mut transport, 60),
            Err(TimerError::NotConnected)
        );
        assert_eq!(
            sync.subscribe_elapsed(&machine, &mut transport),
            Err(TimerError::NotConnected)
        );
        assert!(transport.calls.is_empty());
    }

    #[test]
    fn test_read_elapsed() {
        let mut transport = RecordingTransport::default();
        let machine = ready(&mut transport);
        let mut sync = TimerSyncSession::new();

        sync.read_elapsed(&machine, &mut transport).unwrap();
        assert_eq!(transport.calls, vec![Call::Read(peer(), ELAPSED_HANDLE)]);

        let event = sync.handle_event(&machine, &read_complete(ELAPSED_HANDLE, GATT_SUCCESS, &[0x8D, 0x0E, 0, 0]));
        assert_eq!(event, Some(AppEvent::ElapsedChanged(3661)));
        assert!(!sync.is_busy());
    }

    #[test]
    fn test_single_flight() {
        let mut transport = RecordingTransport::default();
        let machine = ready(&mut transport);
        let mut sync = TimerSyncSession::new();

        sync.read_elapsed(&machine, &mut transport).unwrap();
        assert_eq!(
            sync.read_elapsed(&machine, &mut transport),
            Err(TimerError::RequestInFlight)
        );
        assert_eq!(
            sync.write_offset(&machine, &mut transport, 120),
            Err(TimerError::RequestInFlight)
        );
        assert_eq!(transport.calls.len(), 1);

        let event = sync.handle_event(&machine, &read_complete(ELAPSED_HANDLE, GATT_SUCCESS, &7u32.to_le_bytes()));
        assert_eq!(event, Some(AppEvent::ElapsedChanged(7)));

        sync.read_elapsed(&machine, &mut transport).unwrap();
        assert_eq!(transport.calls.len(), 2);
    }

    #[test]
    fn test_read_offset_rejected() {
        let mut transport = RecordingTransport::default();
        let machine = ready(&mut transport);
        let mut sync = TimerSyncSession::new();

        sync.read_offset(&machine, &mut transport).unwrap();
        let event = sync.handle_event(&machine, &read_complete(OFFSET_HANDLE, GATT_ERROR, &[]));
        assert_eq!(
            event,
            Some(AppEvent::OperationFailed {
                operation: Operation::ReadOffset,
                error: TimerError::RemoteRejected(GATT_ERROR),
            })
        );
        assert!(!sync.is_busy());
    }

    #[test]
    fn test_malformed_read() {
        let mut transport = RecordingTransport::default();
        let machine = ready(&mut transport);
        let mut sync = TimerSyncSession::new();

        sync.read_offset(&machine, &mut transport).unwrap();
        let event = sync.handle_event(&machine, &read_complete(OFFSET_HANDLE, GATT_SUCCESS, &[1, 2]));
        assert_eq!(
            event,
            Some(AppEvent::OperationFailed {
                operation: Operation::ReadOffset,
                error: TimerError::MalformedPayload { len: 2 },
            })
        );
    }

    #[test]
    fn test_write_offset_is_pull_only() {
        let mut transport = RecordingTransport::default();
        let machine = ready(&mut transport);
        let mut sync = TimerSyncSession::new();

        sync.write_offset(&machine, &mut transport, 1_700_000_040).unwrap();
        assert_eq!(
            transport.calls,
            vec![Call::Write(
                peer(),
                OFFSET_HANDLE,
                1_700_000_040u32.to_le_bytes().to_vec()
            )]
        );

        let event = sync.handle_event(
            &machine,
            &TransportEvent::WriteComplete {
                peer: peer(),
                handle: OFFSET_HANDLE,
                status: GATT_SUCCESS,
            },
        );
        assert_eq!(event, Some(AppEvent::OffsetWritten(1_700_000_040)));

        sync.write_offset(&machine, &mut transport, 5).unwrap();
        let event = sync.handle_event(
            &machine,
            &TransportEvent::WriteComplete {
                peer: peer(),
                handle: OFFSET_HANDLE,
                status: 0x03,
            },
        );
        assert_eq!(
            event,
            Some(AppEvent::OperationFailed {
                operation: Operation::WriteOffset,
                error: TimerError::RemoteRejected(0x03),
            })
        );
    }

    #[test]
    fn test_notifications_in_order() {
        let mut transport = RecordingTransport::default();
        let machine = ready(&mut transport);
        let mut sync = TimerSyncSession::new();

        sync.subscribe_elapsed(&machine, &mut transport).unwrap();
        sync.subscribe_elapsed(&machine, &mut transport).unwrap();
        assert_eq!(
            transport.calls,
            vec![Call::EnableNotifications(peer(), ELAPSED_HANDLE)]
        );

        let events: Vec<_> = [100u32, 105]
            .iter()
            .filter_map(|v| {
                sync.handle_event(
                    &machine,
                    &TransportEvent::Notification {
                        peer: peer(),
                        handle: ELAPSED_HANDLE,
                        value: v.to_le_bytes().to_vec(),
                    },
                )
            })
            .collect();
        assert_eq!(
            events,
            vec![AppEvent::ElapsedChanged(100), AppEvent::ElapsedChanged(105)]
        );
        assert!(!sync.is_busy());
    }

    #[test]
    fn test_refused_subscription_can_be_retried() {
        let mut transport = RecordingTransport::default();
        let machine = ready(&mut transport);
        let mut sync = TimerSyncSession::new();

        sync.subscribe_elapsed(&machine, &mut transport).unwrap();
        let event = sync.handle_event(
            &machine,
            &TransportEvent::NotificationsFailed {
                peer: peer(),
                handle: ELAPSED_HANDLE,
                status: GATT_ERROR,
            },
        );
        assert_eq!(
            event,
            Some(AppEvent::OperationFailed {
                operation: Operation::SubscribeElapsed,
                error: TimerError::RemoteRejected(GATT_ERROR),
            })
        );
        assert!(!sync.is_subscribed());

        sync.subscribe_elapsed(&machine, &mut transport).unwrap();
        assert_eq!(
            transport.calls,
            vec![
                Call::EnableNotifications(peer(), ELAPSED_HANDLE),
                Call::EnableNotifications(peer(), ELAPSED_HANDLE)
            ]
        );
    }

    #[test]
    fn test_notification_without_subscription_ignored() {
        let mut transport = RecordingTransport::default();
        let machine = ready(&mut transport);
        let mut sync = TimerSyncSession::new();

        let event = sync.handle_event(
            &machine,
            &TransportEvent::Notification {
                peer: peer(),
                handle: ELAPSED_HANDLE,
                value: vec![1, 0, 0, 0],
            },
        );
        assert_eq!(event, None);
    }

    #[test]
    fn test_disconnect_drops_pending_completion() {
        let mut transport = RecordingTransport::default();
        let mut machine = ready(&mut transport);
        let mut sync = TimerSyncSession::new();

        sync.read_elapsed(&machine, &mut transport).unwrap();
        sync.subscribe_elapsed(&machine, &mut transport).unwrap();
        machine.disconnect(&mut transport);
        assert_eq!(machine.state(), ConnectionState::Disconnecting);
        sync.reset();

        let event = sync.handle_event(&machine, &read_complete(ELAPSED_HANDLE, GATT_SUCCESS, &[1, 0, 0, 0]));
        assert_eq!(event, None);
        assert!(!sync.is_subscribed());
        assert_eq!(
            sync.read_elapsed(&machine, &mut transport),
            Err(TimerError::NotConnected)
        );
    }

    #[test]
    fn test_completion_for_other_handle_ignored() {
        let mut transport = RecordingTransport::default();
        let machine = ready(&mut transport);
        let mut sync = TimerSyncSession::new();

        sync.read_elapsed(&machine, &mut transport).unwrap();
        let event = sync.handle_event(&machine, &read_complete(OFFSET_HANDLE, GATT_SUCCESS, &[1, 0, 0, 0]));
        assert_eq!(event, None);
        assert!(sync.is_busy());
    }
}
