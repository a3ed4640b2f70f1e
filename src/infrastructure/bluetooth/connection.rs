//! BLE Connection Module
//!
//! Lifecycle of the single logical link to a timer server: connect,
//! service discovery, ready, and teardown. Failures are terminal for the
//! attempt; nothing here retries.

use crate::domain::models::{ConnectionState, DisconnectReason, PeerId};
use crate::error::{TimerError, TransportError};
use crate::infrastructure::bluetooth::protocol::{ProfileDescriptor, GATT_ERROR, TIMER_PROFILE};
use crate::infrastructure::bluetooth::transport::{
    CharacteristicHandle, DiscoveredService, Transport, TransportEvent,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Handles of the two timer characteristics on the connected peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandles {
    pub elapsed: CharacteristicHandle,
    pub offset: CharacteristicHandle,
}

impl TimerHandles {
    /// Locate the timer characteristics in a discovery result
    pub fn resolve(profile: &ProfileDescriptor, services: &[DiscoveredService]) -> Option<Self> {
        let service = services.iter().find(|s| s.uuid == profile.service)?;
        let handle_of = |uuid: Uuid| {
            service
                .characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .map(|c| c.handle)
        };

        Some(Self {
            elapsed: handle_of(profile.elapsed.uuid)?,
            offset: handle_of(profile.offset.uuid)?,
        })
    }
}

/// Snapshot of the active link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub peer: PeerId,
    pub state: ConnectionState,
    pub handles: Option<TimerHandles>,
}

/// Owner of the one and only connection
pub struct ConnectionStateMachine {
    state: ConnectionState,
    peer: Option<PeerId>,
    handles: Option<TimerHandles>,
    /// Peer to connect to once the current link has closed
    pending: Option<PeerId>,
    changes: Vec<ConnectionState>,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            peer: None,
            handles: None,
            pending: None,
            changes: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer(&self) -> Option<&PeerId> {
        self.peer.as_ref()
    }

    /// Characteristic handles, present only while ready
    pub fn handles(&self) -> Option<TimerHandles> {
        match self.state {
            ConnectionState::Ready => self.handles,
            _ => None,
        }
    }

    /// Peer and handles of a ready connection
    pub fn require_ready(&self) -> Result<(&PeerId, TimerHandles), TimerError> {
        match (self.peer.as_ref(), self.handles()) {
            (Some(peer), Some(handles)) => Ok((peer, handles)),
            _ => Err(TimerError::NotConnected),
        }
    }

    pub fn connection(&self) -> Option<Connection> {
        self.peer.as_ref().map(|peer| Connection {
            peer: peer.clone(),
            state: self.state,
            handles: self.handles(),
        })
    }

    /// State changes since the last call, oldest first
    pub fn take_changes(&mut self) -> Vec<ConnectionState> {
        std::mem::take(&mut self.changes)
    }

    /// Connect to `peer`, tearing down any existing connection first
    ///
    /// While a link is live or closing, the new attempt is queued and only
    /// issued once the old link reports its close.
    pub fn connect(&mut self, transport: &mut dyn Transport, peer: PeerId) -> Result<(), TimerError> {
        if !transport.radio_available() {
            return Err(TimerError::RadioUnavailable);
        }

        if self.state.is_live() {
            if let Some(previous) = &self.peer {
                info!("Tearing down connection to {} before connecting to {}", previous, peer);
                transport.disconnect(previous);
            }
            self.handles = None;
            self.set_state(ConnectionState::Disconnecting);
        }
        if self.state == ConnectionState::Disconnecting {
            debug!("Connect to {} queued until the current link closes", peer);
            self.pending = Some(peer);
            return Ok(());
        }

        self.start(transport, peer)
    }

    fn start(&mut self, transport: &mut dyn Transport, peer: PeerId) -> Result<(), TimerError> {
        info!("Connecting to {}", peer);
        match transport.connect(&peer) {
            Ok(()) => {
                self.peer = Some(peer);
                self.set_state(ConnectionState::Connecting);
                Ok(())
            }
            Err(TransportError::RadioUnavailable) => Err(TimerError::RadioUnavailable),
            Err(TransportError::Refused(status)) => {
                warn!("Connection to {} refused: {:#04x}", peer, status);
                self.peer = Some(peer);
                self.set_state(ConnectionState::Disconnected(DisconnectReason::Transport(status)));
                Err(TimerError::TransportFailure(status))
            }
        }
    }

    /// Close the current connection and drop any queued reconnect
    pub fn disconnect(&mut self, transport: &mut dyn Transport) {
        if let Some(queued) = self.pending.take() {
            debug!("Dropping queued connect to {}", queued);
        }
        if !self.state.is_live() {
            return;
        }
        if let Some(peer) = &self.peer {
            info!("Disconnecting from {}", peer);
            transport.disconnect(peer);
        }
        self.handles = None;
        self.set_state(ConnectionState::Disconnecting);
    }

    /// Apply a transport event addressed to the connection
    ///
    /// Returns the failure to surface when the event ends a connection attempt.
    pub fn handle_event(
        &mut self,
        transport: &mut dyn Transport,
        event: &TransportEvent,
    ) -> Option<TimerError> {
        if event.peer().is_none() || event.peer() != self.peer.as_ref() {
            debug!("Dropping stale transport event {:?}", event);
            return None;
        }

        match (self.state, event) {
            (ConnectionState::Connecting, TransportEvent::Connected { peer }) => {
                self.set_state(ConnectionState::DiscoveringServices);
                match transport.discover_services(peer) {
                    Ok(()) => None,
                    Err(err) => {
                        let status = match err {
                            TransportError::Refused(status) => status,
                            TransportError::RadioUnavailable => GATT_ERROR,
                        };
                        transport.disconnect(peer);
                        self.set_state(ConnectionState::Disconnected(DisconnectReason::Transport(
                            status,
                        )));
                        Some(TimerError::TransportFailure(status))
                    }
                }
            }
            (
                ConnectionState::Connecting | ConnectionState::DiscoveringServices,
                TransportEvent::Disconnected { peer, status },
            ) => {
                warn!("Connection attempt failed: {:#04x}", status);
                transport.disconnect(peer);
                self.set_state(ConnectionState::Disconnected(DisconnectReason::Transport(*status)));
                Some(TimerError::TransportFailure(*status))
            }
            (ConnectionState::DiscoveringServices, TransportEvent::ServicesDiscovered { peer, services }) => {
                match TimerHandles::resolve(&TIMER_PROFILE, services) {
                    Some(handles) => {
                        info!("Found timer service on {}", peer);
                        self.handles = Some(handles);
                        self.set_state(ConnectionState::Ready);
                        None
                    }
                    None => {
                        warn!("{} does not expose the timer service", peer);
                        transport.disconnect(peer);
                        self.set_state(ConnectionState::Disconnected(
                            DisconnectReason::ProfileMismatch,
                        ));
                        Some(TimerError::ProfileMismatch)
                    }
                }
            }
            (ConnectionState::Ready, TransportEvent::Disconnected { status, .. }) => {
                warn!("Remote disconnect: {:#04x}", status);
                self.handles = None;
                self.set_state(ConnectionState::Disconnected(DisconnectReason::Transport(*status)));
                None
            }
            (ConnectionState::Disconnecting, TransportEvent::Disconnected { .. }) => {
                self.set_state(ConnectionState::Disconnected(DisconnectReason::UserInitiated));
                let next = self.pending.take()?;
                self.start(transport, next).err()
            }
            _ => None,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection state {} -> {}", self.state, state);
            self.state = state;
            self.changes.push(state);
        }
    }
}
