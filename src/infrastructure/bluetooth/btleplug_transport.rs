//! Transport backed by the host Bluetooth stack through `btleplug`.
//!
//! Every request is spawned onto the runtime and reports back through the
//! transport event channel. btleplug does not expose GATT status codes or
//! attribute handles, so failures map to `GATT_ERROR` and handles are
//! assigned locally during discovery.

use crate::domain::models::PeerId;
use crate::error::TransportError;
use crate::infrastructure::bluetooth::protocol::{CharProperties, GATT_ERROR, GATT_SUCCESS};
use crate::infrastructure::bluetooth::transport::{
    Advertisement, CharacteristicHandle, DiscoveredCharacteristic, DiscoveredService, Transport,
    TransportEvent, TransportEventSender,
};
use anyhow::Result;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Status reported when the platform drops a link without a reason
const LINK_LOST: u8 = 0x08;

/// Scan failure code for an adapter that refused to scan
const SCAN_FAILED_INTERNAL_ERROR: i32 = 3;

#[derive(Default)]
struct Shared {
    peripherals: HashMap<PeerId, Peripheral>,
    characteristics: HashMap<CharacteristicHandle, Characteristic>,
    handles: HashMap<Uuid, CharacteristicHandle>,
    scanning: bool,
}

pub struct BtleplugTransport {
    adapter: Adapter,
    events: TransportEventSender,
    runtime: Handle,
    shared: Arc<Mutex<Shared>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn post(events: &TransportEventSender, event: TransportEvent) {
    if events.send(event).is_err() {
        debug!("Transport event dropped, service has stopped");
    }
}

impl BtleplugTransport {
    /// Open the first Bluetooth adapter and start listening to its events
    pub async fn new(events: TransportEventSender) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No Bluetooth adapter found"))?;
        info!("Using Bluetooth adapter {}", adapter.adapter_info().await?);

        let transport = Self {
            adapter,
            events,
            runtime: Handle::current(),
            shared: Arc::new(Mutex::new(Shared::default())),
        };
        transport.spawn_central_listener().await?;
        Ok(transport)
    }

    async fn spawn_central_listener(&self) -> Result<()> {
        let mut central_events = self.adapter.events().await?;
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let shared = self.shared.clone();

        self.runtime.spawn(async move {
            while let Some(event) = central_events.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ServicesAdvertisement { id, .. } => {
                        if let Some(advertisement) = advertisement_for(&adapter, &shared, &id).await
                        {
                            if lock(&shared).scanning {
                                post(&events, TransportEvent::ScanResult(advertisement));
                            }
                        }
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        post(
                            &events,
                            TransportEvent::Disconnected {
                                peer: PeerId::new(id.to_string()),
                                status: LINK_LOST,
                            },
                        );
                    }
                    _ => {}
                }
            }
            warn!("Bluetooth adapter event stream ended");
        });
        Ok(())
    }

    fn peripheral(&self, peer: &PeerId) -> Result<Peripheral, TransportError> {
        lock(&self.shared)
            .peripherals
            .get(peer)
            .cloned()
            .ok_or(TransportError::Refused(GATT_ERROR))
    }

    fn characteristic(&self, handle: CharacteristicHandle) -> Result<Characteristic, TransportError> {
        lock(&self.shared)
            .characteristics
            .get(&handle)
            .cloned()
            .ok_or(TransportError::Refused(GATT_ERROR))
    }
}

async fn advertisement_for(
    adapter: &Adapter,
    shared: &Mutex<Shared>,
    id: &PeripheralId,
) -> Option<Advertisement> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;
    let peer = PeerId::new(id.to_string());
    lock(shared).peripherals.insert(peer.clone(), peripheral);

    Some(Advertisement {
        peer,
        name: properties.local_name,
        rssi: properties.rssi.unwrap_or(i16::MIN),
        services: properties.services,
    })
}

impl Transport for BtleplugTransport {
    fn radio_available(&self) -> bool {
        // The adapter was opened at construction; btleplug 0.11 has no power state query
        true
    }

    fn start_scan(&mut self, service: Uuid) -> Result<(), TransportError> {
        lock(&self.shared).scanning = true;
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let shared = self.shared.clone();

        self.runtime.spawn(async move {
            let filter = ScanFilter {
                services: vec![service],
            };
            if let Err(e) = adapter.start_scan(filter).await {
                warn!("Failed to start scan: {}", e);
                lock(&shared).scanning = false;
                post(&events, TransportEvent::ScanFailed(SCAN_FAILED_INTERNAL_ERROR));
            }
        });
        Ok(())
    }

    fn stop_scan(&mut self) {
        lock(&self.shared).scanning = false;
        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                debug!("Failed to stop scan cleanly: {}", e);
            }
        });
    }

    fn connect(&mut self, peer: &PeerId) -> Result<(), TransportError> {
        let peripheral = self.peripheral(peer)?;
        let events = self.events.clone();
        let shared = self.shared.clone();
        let peer = peer.clone();

        self.runtime.spawn(async move {
            if let Err(e) = peripheral.connect().await {
                warn!("Failed to connect to {}: {}", peer, e);
                post(&events, TransportEvent::Disconnected { peer, status: GATT_ERROR });
                return;
            }
            post(&events, TransportEvent::Connected { peer: peer.clone() });

            let mut notifications = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Could not get notification stream from {}: {}", peer, e);
                    return;
                }
            };
            while let Some(notification) = notifications.next().await {
                let handle = lock(&shared).handles.get(&notification.uuid).copied();
                if let Some(handle) = handle {
                    post(
                        &events,
                        TransportEvent::Notification {
                            peer: peer.clone(),
                            handle,
                            value: notification.value,
                        },
                    );
                }
            }
            debug!("Notification stream from {} closed", peer);
        });
        Ok(())
    }

    fn disconnect(&mut self, peer: &PeerId) {
        let Ok(peripheral) = self.peripheral(peer) else {
            return;
        };
        let peer = peer.clone();
        self.runtime.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                debug!("Failed to disconnect {} cleanly: {}", peer, e);
            }
        });
    }

    fn discover_services(&mut self, peer: &PeerId) -> Result<(), TransportError> {
        let peripheral = self.peripheral(peer)?;
        let events = self.events.clone();
        let shared = self.shared.clone();
        let peer = peer.clone();

        self.runtime.spawn(async move {
            if let Err(e) = peripheral.discover_services().await {
                warn!("Service discovery on {} failed: {}", peer, e);
                if let Err(e) = peripheral.disconnect().await {
                    debug!("Failed to disconnect {} cleanly: {}", peer, e);
                }
                post(&events, TransportEvent::Disconnected { peer, status: GATT_ERROR });
                return;
            }

            let mut services = Vec::new();
            {
                let mut shared = lock(&shared);
                shared.characteristics.clear();
                shared.handles.clear();
                let mut next_handle: u16 = 1;

                for service in peripheral.services() {
                    let mut characteristics = Vec::new();
                    for characteristic in &service.characteristics {
                        let handle = CharacteristicHandle(next_handle);
                        next_handle = next_handle.wrapping_add(1);
                        shared.handles.insert(characteristic.uuid, handle);
                        shared.characteristics.insert(handle, characteristic.clone());
                        characteristics.push(DiscoveredCharacteristic {
                            uuid: characteristic.uuid,
                            handle,
                            properties: CharProperties::from_bits(characteristic.properties.bits()),
                        });
                    }
                    services.push(DiscoveredService {
                        uuid: service.uuid,
                        characteristics,
                    });
                }
            }
            post(&events, TransportEvent::ServicesDiscovered { peer, services });
        });
        Ok(())
    }

    fn read_characteristic(
        &mut self,
        peer: &PeerId,
        handle: CharacteristicHandle,
    ) -> Result<(), TransportError> {
        let peripheral = self.peripheral(peer)?;
        let characteristic = self.characteristic(handle)?;
        let events = self.events.clone();
        let peer = peer.clone();

        self.runtime.spawn(async move {
            let (status, value) = match peripheral.read(&characteristic).await {
                Ok(value) => (GATT_SUCCESS, value),
                Err(e) => {
                    warn!("Read of {} failed: {}", characteristic.uuid, e);
                    (GATT_ERROR, Vec::new())
                }
            };
            post(
                &events,
                TransportEvent::ReadComplete {
                    peer,
                    handle,
                    status,
                    value,
                },
            );
        });
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        peer: &PeerId,
        handle: CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let peripheral = self.peripheral(peer)?;
        let characteristic = self.characteristic(handle)?;
        let events = self.events.clone();
        let peer = peer.clone();
        let value = value.to_vec();

        self.runtime.spawn(async move {
            let status = match peripheral
                .write(&characteristic, &value, WriteType::WithResponse)
                .await
            {
                Ok(()) => GATT_SUCCESS,
                Err(e) => {
                    warn!("Write of {} failed: {}", characteristic.uuid, e);
                    GATT_ERROR
                }
            };
            post(
                &events,
                TransportEvent::WriteComplete {
                    peer,
                    handle,
                    status,
                },
            );
        });
        Ok(())
    }

    fn enable_notifications(
        &mut self,
        peer: &PeerId,
        handle: CharacteristicHandle,
    ) -> Result<(), TransportError> {
        let peripheral = self.peripheral(peer)?;
        let characteristic = self.characteristic(handle)?;
        let events = self.events.clone();
        let peer = peer.clone();

        self.runtime.spawn(async move {
            if let Err(e) = peripheral.subscribe(&characteristic).await {
                warn!("Could not enable notifications on {}: {}", characteristic.uuid, e);
                post(
                    &events,
                    TransportEvent::NotificationsFailed {
                        peer,
                        handle,
                        status: GATT_ERROR,
                    },
                );
            }
        });
        Ok(())
    }
}
