//! BLE Scanner Module
//!
//! Handles discovery of timer servers. A scan stops itself on the first
//! peer advertising the timer service.

use crate::domain::models::{PeerDevice, PeerId};
use crate::error::TimerError;
use crate::infrastructure::bluetooth::transport::{Advertisement, Transport};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What an advertisement did to the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub peers_changed: bool,
    pub stopped: bool,
}

/// Single discovery window over the radio
#[derive(Default)]
pub struct ScanSession {
    filter: Option<Uuid>,
    peers: HashMap<PeerId, PeerDevice>,
    order: Vec<PeerId>,
}

impl ScanSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start scanning for peers advertising `service`
    ///
    /// Discovered peers from a previous scan are dropped.
    pub fn start(&mut self, transport: &mut dyn Transport, service: Uuid) -> Result<(), TimerError> {
        if self.is_scanning() {
            return Err(TimerError::ScanAlreadyActive);
        }
        if !transport.radio_available() {
            return Err(TimerError::RadioUnavailable);
        }

        info!("Starting BLE scan for service UUID: {}", service);
        transport.start_scan(service)?;

        self.peers.clear();
        self.order.clear();
        self.filter = Some(service);
        Ok(())
    }

    /// Stop scanning; safe to call when no scan is active
    pub fn stop(&mut self, transport: &mut dyn Transport) {
        if self.filter.take().is_some() {
            info!("Stopping BLE scan...");
            transport.stop_scan();
        }
    }

    /// Feed one advertisement received by the platform
    pub fn on_advertisement(
        &mut self,
        transport: &mut dyn Transport,
        advertisement: Advertisement,
    ) -> ScanOutcome {
        let Some(filter) = self.filter else {
            debug!("Ignoring advertisement from {} (no active scan)", advertisement.peer);
            return ScanOutcome::default();
        };

        if !advertisement.services.contains(&filter) {
            return ScanOutcome::default();
        }

        let name = advertisement
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());
        info!("New LE Device: {} @ {}", name, advertisement.rssi);

        match self.peers.get_mut(&advertisement.peer) {
            Some(existing) => {
                existing.rssi = advertisement.rssi;
                if name != "Unknown" {
                    existing.name = name;
                }
            }
            None => {
                self.order.push(advertisement.peer.clone());
                self.peers.insert(
                    advertisement.peer.clone(),
                    PeerDevice {
                        id: advertisement.peer,
                        name,
                        rssi: advertisement.rssi,
                    },
                );
            }
        }

        self.stop(transport);
        ScanOutcome {
            peers_changed: true,
            stopped: true,
        }
    }

    /// Feed a batch of advertisements in delivery order
    pub fn on_batch(
        &mut self,
        transport: &mut dyn Transport,
        advertisements: Vec<Advertisement>,
    ) -> ScanOutcome {
        debug!("Batch of {} scan results", advertisements.len());
        let mut outcome = ScanOutcome::default();
        for advertisement in advertisements {
            let step = self.on_advertisement(transport, advertisement);
            outcome.peers_changed |= step.peers_changed;
            outcome.stopped |= step.stopped;
        }
        outcome
    }

    /// The platform aborted the scan; no restart is attempted
    pub fn on_scan_failed(&mut self, code: i32) -> TimerError {
        warn!("LE Scan Failed: {}", code);
        self.filter = None;
        TimerError::ScanFailed(code)
    }

    pub fn is_scanning(&self) -> bool {
        self.filter.is_some()
    }

    /// Discovered peers in discovery order
    pub fn peers(&self) -> Vec<PeerDevice> {
        self.order
            .iter()
            .filter_map(|id| self.peers.get(id).cloned())
            .collect()
    }

    pub fn peer(&self, id: &PeerId) -> Option<&PeerDevice> {
        self.peers.get(id)
    }
}
