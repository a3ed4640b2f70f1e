//! Bluetooth Service Module
//!
//! Main service that coordinates scanning, the connection lifecycle and
//! timer synchronisation, and fans the resulting events out to the UI.

use crate::domain::models::{
    AppEvent, BluetoothCommand, ConnectionState, DisconnectReason, MessageSeverity, Operation,
    PeerId, StatusMessage,
};
use crate::domain::settings::Settings;
use crate::error::TimerError;
use crate::infrastructure::bluetooth::{
    connection::{Connection, ConnectionStateMachine},
    protocol::{status_description, TIMER_PROFILE},
    scanner::ScanSession,
    sync::TimerSyncSession,
    transport::{Transport, TransportEvent, TransportEventReceiver},
};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Behaviour of the service around connection setup
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Connect to the first peer a scan discovers
    pub auto_connect: bool,
    /// Enable elapsed notifications as soon as the connection is ready
    pub subscribe_on_ready: bool,
    /// Read the offset as soon as the connection is ready
    pub read_offset_on_ready: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            auto_connect: false,
            subscribe_on_ready: true,
            read_offset_on_ready: true,
        }
    }
}

impl From<&Settings> for ServiceConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            auto_connect: settings.auto_connect,
            subscribe_on_ready: settings.subscribe_on_ready,
            read_offset_on_ready: settings.read_offset_on_ready,
        }
    }
}

/// Main Bluetooth service coordinating all BLE operations
pub struct BluetoothService<T: Transport> {
    transport: T,
    scanner: ScanSession,
    connection: ConnectionStateMachine,
    sync: TimerSyncSession,
    subscribers: Vec<mpsc::UnboundedSender<AppEvent>>,
    config: ServiceConfig,
}

impl<T: Transport> BluetoothService<T> {
    /// Create a new Bluetooth service
    pub fn new(transport: T, config: ServiceConfig) -> Self {
        Self {
            transport,
            scanner: ScanSession::new(),
            connection: ConnectionStateMachine::new(),
            sync: TimerSyncSession::new(),
            subscribers: Vec::new(),
            config,
        }
    }

    /// Register a new receiver of UI events
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<AppEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> Option<Connection> {
        self.connection.connection()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Start scanning for timer servers
    pub fn start_scan(&mut self) -> Result<(), TimerError> {
        self.scanner.start(&mut self.transport, TIMER_PROFILE.service)?;
        self.send_log("Scanning for timer servers...", MessageSeverity::Info);
        self.emit(AppEvent::PeersChanged(Vec::new()));
        Ok(())
    }

    /// Stop scanning
    pub fn stop_scan(&mut self) {
        if self.scanner.is_scanning() {
            self.scanner.stop(&mut self.transport);
            self.send_log("Scan stopped.", MessageSeverity::Info);
        }
    }

    /// Connect to a peer, replacing any existing connection
    pub fn connect(&mut self, peer: PeerId) -> Result<(), TimerError> {
        self.scanner.stop(&mut self.transport);
        let result = self.connection.connect(&mut self.transport, peer);
        self.flush_connection_changes();
        result
    }

    /// Disconnect from the current peer
    pub fn disconnect(&mut self) {
        self.connection.disconnect(&mut self.transport);
        self.flush_connection_changes();
    }

    pub fn read_elapsed(&mut self) -> Result<(), TimerError> {
        self.sync.read_elapsed(&self.connection, &mut self.transport)
    }

    pub fn read_offset(&mut self) -> Result<(), TimerError> {
        self.sync.read_offset(&self.connection, &mut self.transport)
    }

    pub fn write_offset(&mut self, timestamp: u32) -> Result<(), TimerError> {
        self.sync
            .write_offset(&self.connection, &mut self.transport, timestamp)
    }

    pub fn subscribe_elapsed(&mut self) -> Result<(), TimerError> {
        self.sync
            .subscribe_elapsed(&self.connection, &mut self.transport)
    }

    /// Execute a UI command; failures are reported as events
    pub fn handle_command(&mut self, command: BluetoothCommand) {
        debug!("Handling command {:?}", command);
        let result = match command {
            BluetoothCommand::StartScan => {
                self.start_scan().map_err(|e| (Operation::StartScan, e))
            }
            BluetoothCommand::StopScan => {
                self.stop_scan();
                Ok(())
            }
            BluetoothCommand::Connect(peer) => {
                if self.scanner.peer(&peer).is_none() {
                    Err((Operation::Connect, TimerError::UnknownPeer(peer)))
                } else {
                    self.connect(peer).map_err(|e| (Operation::Connect, e))
                }
            }
            BluetoothCommand::Disconnect => {
                self.disconnect();
                Ok(())
            }
            BluetoothCommand::ReadElapsed => {
                self.read_elapsed().map_err(|e| (Operation::ReadElapsed, e))
            }
            BluetoothCommand::ReadOffset => {
                self.read_offset().map_err(|e| (Operation::ReadOffset, e))
            }
            BluetoothCommand::WriteOffset(timestamp) => self
                .write_offset(timestamp)
                .map_err(|e| (Operation::WriteOffset, e)),
            BluetoothCommand::SubscribeElapsed => self
                .subscribe_elapsed()
                .map_err(|e| (Operation::SubscribeElapsed, e)),
            BluetoothCommand::Shutdown => {
                self.shutdown();
                Ok(())
            }
        };

        if let Err((operation, error)) = result {
            self.fail(operation, error);
        }
    }

    /// Route one transport event, in arrival order
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ScanResult(advertisement) => {
                let outcome = self.scanner.on_advertisement(&mut self.transport, advertisement);
                self.after_scan(outcome.peers_changed, outcome.stopped);
            }
            TransportEvent::BatchScanResults(advertisements) => {
                let outcome = self.scanner.on_batch(&mut self.transport, advertisements);
                self.after_scan(outcome.peers_changed, outcome.stopped);
            }
            TransportEvent::ScanFailed(code) => {
                let error = self.scanner.on_scan_failed(code);
                self.fail(Operation::Scan, error);
            }
            TransportEvent::Connected { .. }
            | TransportEvent::Disconnected { .. }
            | TransportEvent::ServicesDiscovered { .. } => {
                let failure = self.connection.handle_event(&mut self.transport, &event);
                self.flush_connection_changes();
                if let Some(error) = failure {
                    self.fail(Operation::Connect, error);
                }
            }
            TransportEvent::ReadComplete { .. }
            | TransportEvent::WriteComplete { .. }
            | TransportEvent::Notification { .. }
            | TransportEvent::NotificationsFailed { .. } => {
                if let Some(app_event) = self.sync.handle_event(&self.connection, &event) {
                    self.emit(app_event);
                }
            }
        }
    }

    /// Stop scanning and drop the connection
    pub fn shutdown(&mut self) {
        info!("Shutting down Bluetooth service");
        self.scanner.stop(&mut self.transport);
        self.disconnect();
    }

    /// Drive the service until `Shutdown` or the command channel closes
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<BluetoothCommand>,
        mut events: TransportEventReceiver,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.handle_transport_event(event),
                command = commands.recv() => match command {
                    Some(BluetoothCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }
        }
        self.shutdown();
    }

    fn after_scan(&mut self, peers_changed: bool, stopped: bool) {
        if peers_changed {
            self.emit(AppEvent::PeersChanged(self.scanner.peers()));
        }
        if !stopped {
            return;
        }
        self.send_log("Timer server found, scan stopped.", MessageSeverity::Info);

        if self.config.auto_connect && !self.connection.state().is_live() {
            if let Some(first) = self.scanner.peers().into_iter().next() {
                info!("Auto-connecting to {} ({})", first.name, first.id);
                if let Err(error) = self.connect(first.id) {
                    self.fail(Operation::Connect, error);
                }
            }
        }
    }

    fn flush_connection_changes(&mut self) {
        for state in self.connection.take_changes() {
            if state != ConnectionState::Ready {
                self.sync.reset();
            }
            self.emit(AppEvent::ConnectionStateChanged(state));
            if let ConnectionState::Disconnected(DisconnectReason::Transport(status)) = state {
                self.send_log(
                    &format!("Connection lost: {}", status_description(status)),
                    MessageSeverity::Warning,
                );
            }
            if state == ConnectionState::Ready {
                self.send_log("Connection established!", MessageSeverity::Success);
                self.on_ready();
            }
        }
    }

    fn on_ready(&mut self) {
        if self.config.subscribe_on_ready {
            if let Err(error) = self.subscribe_elapsed() {
                self.fail(Operation::SubscribeElapsed, error);
            }
        }
        if self.config.read_offset_on_ready {
            if let Err(error) = self.read_offset() {
                self.fail(Operation::ReadOffset, error);
            }
        }
    }

    fn fail(&mut self, operation: Operation, error: TimerError) {
        error!("{:?} failed: {}", operation, error);
        self.send_log(&format!("{:?} failed: {}", operation, error), MessageSeverity::Error);
        self.emit(AppEvent::OperationFailed { operation, error });
    }

    fn send_log(&mut self, message: &str, severity: MessageSeverity) {
        self.emit(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }

    fn emit(&mut self, event: AppEvent) {
        debug!("Emitting {:?}", event);
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
