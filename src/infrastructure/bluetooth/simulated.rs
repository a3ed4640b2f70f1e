//! In-memory radio hosting Timer Profile servers.
//!
//! Completions are posted to the event channel instead of being returned,
//! so the core sees the same asynchronous shape as with a real adapter.

use crate::domain::models::PeerId;
use crate::domain::timer::{Clock, TimerServer};
use crate::error::TransportError;
use crate::infrastructure::bluetooth::protocol::{
    decode_time_value, encode_time_value, CharProperties, GATT_ERROR, GATT_SUCCESS, TIMER_PROFILE,
};
use crate::infrastructure::bluetooth::transport::{
    Advertisement, CharacteristicHandle, DiscoveredCharacteristic, DiscoveredService, Transport,
    TransportEvent, TransportEventSender,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};
use uuid::Uuid;

pub const ELAPSED_HANDLE: CharacteristicHandle = CharacteristicHandle(0x002A);
pub const OFFSET_HANDLE: CharacteristicHandle = CharacteristicHandle(0x002D);

const GATT_READ_NOT_PERMITTED: u8 = 0x02;
const GATT_WRITE_NOT_PERMITTED: u8 = 0x03;
const GATT_REQUEST_NOT_SUPPORTED: u8 = 0x06;
const GATT_INVALID_ATTRIBUTE_LENGTH: u8 = 0x0D;
const HCI_LOCAL_HOST_TERMINATED: u8 = 0x16;

/// A peripheral within range of the simulated radio
pub struct SimulatedPeripheral {
    pub id: PeerId,
    pub name: String,
    pub rssi: i16,
    pub services: Vec<Uuid>,
    pub server: Option<TimerServer<Arc<dyn Clock>>>,
}

impl SimulatedPeripheral {
    pub fn timer_server(id: &str, name: &str, offset: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            id: PeerId::new(id),
            name: name.to_string(),
            rssi: -50,
            services: vec![TIMER_PROFILE.service],
            server: Some(TimerServer::new(offset, clock)),
        }
    }

    /// A device that advertises the timer service but does not host it
    pub fn impostor(id: &str) -> Self {
        Self {
            id: PeerId::new(id),
            name: "Impostor".to_string(),
            rssi: -70,
            services: vec![TIMER_PROFILE.service],
            server: None,
        }
    }
}

struct RadioState {
    events: TransportEventSender,
    peripherals: Vec<SimulatedPeripheral>,
    radio_on: bool,
    connected: Option<PeerId>,
    notifying: bool,
}

impl RadioState {
    fn post(&self, event: TransportEvent) {
        trace!("Simulated radio -> {:?}", event);
        if self.events.send(event).is_err() {
            debug!("Simulated radio has no listener");
        }
    }

    fn peripheral(&mut self, peer: &PeerId) -> Option<&mut SimulatedPeripheral> {
        self.peripherals.iter_mut().find(|p| p.id == *peer)
    }

    fn connected_server(&mut self, peer: &PeerId) -> Option<&mut TimerServer<Arc<dyn Clock>>> {
        if self.connected.as_ref() != Some(peer) {
            return None;
        }
        self.peripheral(peer)?.server.as_mut()
    }
}

/// Handle to poke the simulated radio from outside the service
#[derive(Clone)]
pub struct SimulatedRadio {
    state: Arc<Mutex<RadioState>>,
}

impl SimulatedRadio {
    fn lock(&self) -> MutexGuard<'_, RadioState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Push the current elapsed value if notifications are enabled
    pub fn tick(&self) {
        let mut state = self.lock();
        if !state.notifying {
            return;
        }
        let Some(peer) = state.connected.clone() else {
            return;
        };
        if let Some(server) = state.connected_server(&peer) {
            let value = encode_time_value(server.elapsed()).to_vec();
            state.post(TransportEvent::Notification {
                peer,
                handle: ELAPSED_HANDLE,
                value,
            });
        }
    }

    /// The peer drops the link
    pub fn drop_link(&self, status: u8) {
        let mut state = self.lock();
        if let Some(peer) = state.connected.take() {
            state.notifying = false;
            state.post(TransportEvent::Disconnected { peer, status });
        }
    }

    pub fn set_radio(&self, on: bool) {
        self.lock().radio_on = on;
    }

    pub fn fail_scan(&self, code: i32) {
        self.lock().post(TransportEvent::ScanFailed(code));
    }
}

pub struct SimulatedTransport {
    radio: SimulatedRadio,
}

impl SimulatedTransport {
    pub fn new(events: TransportEventSender, peripherals: Vec<SimulatedPeripheral>) -> Self {
        Self {
            radio: SimulatedRadio {
                state: Arc::new(Mutex::new(RadioState {
                    events,
                    peripherals,
                    radio_on: true,
                    connected: None,
                    notifying: false,
                })),
            },
        }
    }

    pub fn radio(&self) -> SimulatedRadio {
        self.radio.clone()
    }
}

fn timer_discovery() -> Vec<DiscoveredService> {
    let characteristic = |uuid, handle, properties: CharProperties| DiscoveredCharacteristic {
        uuid,
        handle,
        properties,
    };
    vec![DiscoveredService {
        uuid: TIMER_PROFILE.service,
        characteristics: vec![
            characteristic(
                TIMER_PROFILE.elapsed.uuid,
                ELAPSED_HANDLE,
                TIMER_PROFILE.elapsed.properties,
            ),
            characteristic(
                TIMER_PROFILE.offset.uuid,
                OFFSET_HANDLE,
                TIMER_PROFILE.offset.properties,
            ),
        ],
    }]
}

impl Transport for SimulatedTransport {
    fn radio_available(&self) -> bool {
        self.radio.lock().radio_on
    }

    fn start_scan(&mut self, service: Uuid) -> Result<(), TransportError> {
        let state = self.radio.lock();
        if !state.radio_on {
            return Err(TransportError::RadioUnavailable);
        }
        for peripheral in &state.peripherals {
            state.post(TransportEvent::ScanResult(Advertisement {
                peer: peripheral.id.clone(),
                name: Some(peripheral.name.clone()),
                rssi: peripheral.rssi,
                services: peripheral.services.clone(),
            }));
        }
        debug!("Simulated scan for {} started", service);
        Ok(())
    }

    fn stop_scan(&mut self) {
        debug!("Simulated scan stopped");
    }

    fn connect(&mut self, peer: &PeerId) -> Result<(), TransportError> {
        let mut state = self.radio.lock();
        if !state.radio_on {
            return Err(TransportError::RadioUnavailable);
        }
        if state.peripheral(peer).is_some() {
            state.connected = Some(peer.clone());
            state.notifying = false;
            state.post(TransportEvent::Connected { peer: peer.clone() });
        } else {
            state.post(TransportEvent::Disconnected {
                peer: peer.clone(),
                status: GATT_ERROR,
            });
        }
        Ok(())
    }

    fn disconnect(&mut self, peer: &PeerId) {
        let mut state = self.radio.lock();
        if state.connected.as_ref() == Some(peer) {
            state.connected = None;
            state.notifying = false;
            state.post(TransportEvent::Disconnected {
                peer: peer.clone(),
                status: HCI_LOCAL_HOST_TERMINATED,
            });
        }
    }

    fn discover_services(&mut self, peer: &PeerId) -> Result<(), TransportError> {
        let mut state = self.radio.lock();
        let services = match state.connected_server(peer) {
            Some(_) => timer_discovery(),
            None => Vec::new(),
        };
        state.post(TransportEvent::ServicesDiscovered {
            peer: peer.clone(),
            services,
        });
        Ok(())
    }

    fn read_characteristic(
        &mut self,
        peer: &PeerId,
        handle: CharacteristicHandle,
    ) -> Result<(), TransportError> {
        let mut state = self.radio.lock();
        let server = state
            .connected_server(peer)
            .ok_or(TransportError::Refused(GATT_ERROR))?;

        let (status, value) = match handle {
            ELAPSED_HANDLE => (GATT_SUCCESS, encode_time_value(server.elapsed()).to_vec()),
            OFFSET_HANDLE => (GATT_SUCCESS, encode_time_value(server.offset()).to_vec()),
            _ => (GATT_READ_NOT_PERMITTED, Vec::new()),
        };
        state.post(TransportEvent::ReadComplete {
            peer: peer.clone(),
            handle,
            status,
            value,
        });
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        peer: &PeerId,
        handle: CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.radio.lock();
        let server = state
            .connected_server(peer)
            .ok_or(TransportError::Refused(GATT_ERROR))?;

        let status = match handle {
            OFFSET_HANDLE => match decode_time_value(value) {
                Ok(offset) => {
                    server.set_offset(offset);
                    GATT_SUCCESS
                }
                Err(_) => GATT_INVALID_ATTRIBUTE_LENGTH,
            },
            _ => GATT_WRITE_NOT_PERMITTED,
        };
        state.post(TransportEvent::WriteComplete {
            peer: peer.clone(),
            handle,
            status,
        });
        Ok(())
    }

    fn enable_notifications(
        &mut self,
        peer: &PeerId,
        handle: CharacteristicHandle,
    ) -> Result<(), TransportError> {
        let mut state = self.radio.lock();
        if state.connected_server(peer).is_none() {
            return Err(TransportError::Refused(GATT_ERROR));
        }
        if handle != ELAPSED_HANDLE {
            return Err(TransportError::Refused(GATT_REQUEST_NOT_SUPPORTED));
        }
        state.notifying = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::timer::FixedClock;
    use crate::infrastructure::bluetooth::transport::TransportEventReceiver;
    use tokio::sync::mpsc;

    fn radio_with(peripherals: Vec<SimulatedPeripheral>) -> (SimulatedTransport, TransportEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SimulatedTransport::new(tx, peripherals), rx)
    }

    fn drain(rx: &mut TransportEventReceiver) -> Vec<TransportEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn test_server_values_follow_clock() {
        let clock = Arc::new(FixedClock::new(1_100));
        let peer = PeerId::new("SIM-1");
        let (mut transport, mut rx) = radio_with(vec![SimulatedPeripheral::timer_server(
            "SIM-1",
            "Timer",
            1_000,
            clock.clone(),
        )]);

        transport.connect(&peer).unwrap();
        transport.read_characteristic(&peer, ELAPSED_HANDLE).unwrap();
        clock.advance(20);
        transport
            .write_characteristic(&peer, OFFSET_HANDLE, &encode_time_value(1_050))
            .unwrap();
        transport.read_characteristic(&peer, ELAPSED_HANDLE).unwrap();

        let events = drain(&mut rx);
        assert_eq!(events[0], TransportEvent::Connected { peer: peer.clone() });
        assert_eq!(
            events[1],
            TransportEvent::ReadComplete {
                peer: peer.clone(),
                handle: ELAPSED_HANDLE,
                status: GATT_SUCCESS,
                value: vec![100, 0, 0, 0],
            }
        );
        assert_eq!(
            events[2],
            TransportEvent::WriteComplete {
                peer: peer.clone(),
                handle: OFFSET_HANDLE,
                status: GATT_SUCCESS,
            }
        );
        assert_eq!(
            events[3],
            TransportEvent::ReadComplete {
                peer,
                handle: ELAPSED_HANDLE,
                status: GATT_SUCCESS,
                value: vec![70, 0, 0, 0],
            }
        );
    }

    #[test]
    fn test_short_write_is_rejected() {
        let peer = PeerId::new("SIM-1");
        let (mut transport, mut rx) = radio_with(vec![SimulatedPeripheral::timer_server(
            "SIM-1",
            "Timer",
            1_000,
            Arc::new(FixedClock::new(1_000)),
        )]);
        transport.connect(&peer).unwrap();
        transport
            .write_characteristic(&peer, OFFSET_HANDLE, &[1, 2])
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            events.last(),
            Some(&TransportEvent::WriteComplete {
                peer,
                handle: OFFSET_HANDLE,
                status: GATT_INVALID_ATTRIBUTE_LENGTH,
            })
        );
    }

    #[test]
    fn test_impostor_exposes_no_services() {
        let peer = PeerId::new("FAKE");
        let (mut transport, mut rx) = radio_with(vec![SimulatedPeripheral::impostor("FAKE")]);
        transport.connect(&peer).unwrap();
        transport.discover_services(&peer).unwrap();
        assert!(transport.read_characteristic(&peer, OFFSET_HANDLE).is_err());

        let events = drain(&mut rx);
        assert_eq!(
            events.last(),
            Some(&TransportEvent::ServicesDiscovered {
                peer,
                services: Vec::new(),
            })
        );
    }

    #[test]
    fn test_notifications_stop_when_link_drops() {
        let peer = PeerId::new("SIM-1");
        let (mut transport, mut rx) = radio_with(vec![SimulatedPeripheral::timer_server(
            "SIM-1",
            "Timer",
            1_000,
            Arc::new(FixedClock::new(1_010)),
        )]);
        let radio = transport.radio();

        radio.tick();
        transport.connect(&peer).unwrap();
        transport.enable_notifications(&peer, ELAPSED_HANDLE).unwrap();
        radio.tick();
        radio.drop_link(0x08);
        radio.tick();

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                TransportEvent::Connected { peer: peer.clone() },
                TransportEvent::Notification {
                    peer: peer.clone(),
                    handle: ELAPSED_HANDLE,
                    value: vec![10, 0, 0, 0],
                },
                TransportEvent::Disconnected { peer, status: 0x08 },
            ]
        );
    }

    #[test]
    fn test_radio_off_refuses_scan() {
        let (mut transport, _rx) = radio_with(Vec::new());
        transport.radio().set_radio(false);
        assert!(!transport.radio_available());
        assert_eq!(
            transport.start_scan(TIMER_PROFILE.service),
            Err(TransportError::RadioUnavailable)
        );
    }
}
