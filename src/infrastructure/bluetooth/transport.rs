//! Transport provider seam
//!
//! The core only issues requests through [`Transport`]; every completion,
//! notification and scan result comes back as a [`TransportEvent`] on a
//! single ordered channel.

use crate::domain::models::PeerId;
use crate::error::TransportError;
use crate::infrastructure::bluetooth::protocol::CharProperties;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque attribute handle assigned by the transport during discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacteristicHandle(pub u16);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub handle: CharacteristicHandle,
    pub properties: CharProperties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

/// A single received advertisement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub peer: PeerId,
    pub name: Option<String>,
    pub rssi: i16,
    pub services: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ScanResult(Advertisement),
    BatchScanResults(Vec<Advertisement>),
    ScanFailed(i32),
    Connected {
        peer: PeerId,
    },
    /// Link closed or connection attempt failed
    Disconnected {
        peer: PeerId,
        status: u8,
    },
    ServicesDiscovered {
        peer: PeerId,
        services: Vec<DiscoveredService>,
    },
    ReadComplete {
        peer: PeerId,
        handle: CharacteristicHandle,
        status: u8,
        value: Vec<u8>,
    },
    WriteComplete {
        peer: PeerId,
        handle: CharacteristicHandle,
        status: u8,
    },
    Notification {
        peer: PeerId,
        handle: CharacteristicHandle,
        value: Vec<u8>,
    },
    /// The peer refused to enable notifications
    NotificationsFailed {
        peer: PeerId,
        handle: CharacteristicHandle,
        status: u8,
    },
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Capability set of the underlying BLE stack
///
/// Every method returns as soon as the request has been issued.
pub trait Transport: Send {
    /// Radio enabled and LE capable
    fn radio_available(&self) -> bool;

    fn start_scan(&mut self, service: Uuid) -> Result<(), TransportError>;
    fn stop_scan(&mut self);

    fn connect(&mut self, peer: &PeerId) -> Result<(), TransportError>;
    fn disconnect(&mut self, peer: &PeerId);
    fn discover_services(&mut self, peer: &PeerId) -> Result<(), TransportError>;

    fn read_characteristic(
        &mut self,
        peer: &PeerId,
        handle: CharacteristicHandle,
    ) -> Result<(), TransportError>;
    fn write_characteristic(
        &mut self,
        peer: &PeerId,
        handle: CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), TransportError>;
    fn enable_notifications(
        &mut self,
        peer: &PeerId,
        handle: CharacteristicHandle,
    ) -> Result<(), TransportError>;
}

impl TransportEvent {
    /// Peer the event belongs to, `None` for scan events
    pub fn peer(&self) -> Option<&PeerId> {
        match self {
            Self::ScanResult(_) | Self::BatchScanResults(_) | Self::ScanFailed(_) => None,
            Self::Connected { peer }
            | Self::Disconnected { peer, .. }
            | Self::ServicesDiscovered { peer, .. }
            | Self::ReadComplete { peer, .. }
            | Self::WriteComplete { peer, .. }
            | Self::Notification { peer, .. }
            | Self::NotificationsFailed { peer, .. } => Some(peer),
        }
    }
}
