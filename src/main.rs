use std::time::Duration;

use timer_profile::domain::models::{
    BluetoothCommand, ConnectionState, MessageSeverity, Operation, PeerDevice,
    StatusMessage, TimerListener,
};
use timer_profile::domain::settings::{Settings, SettingsService};
use timer_profile::domain::timer::{truncate_to_minute, Clock, SystemClock};
use timer_profile::error::TimerError;
use timer_profile::infrastructure::bluetooth::simulated::SimulatedRadio;
use timer_profile::infrastructure::bluetooth::{BluetoothService, ServiceConfig};
use timer_profile::infrastructure::logging::init_logger;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// How long the headless session may run before it gives up
const SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Offset written during the session, relative to now
const WRITTEN_OFFSET_MINUTES_AGO: u64 = 30;

/// Drives one scripted session: connect, write the offset, read it back, stop
struct HeadlessClient {
    commands: mpsc::UnboundedSender<BluetoothCommand>,
    auto_connect: bool,
    read_offset_on_ready: bool,
    connect_requested: bool,
    written: Option<u32>,
    verified: bool,
}

impl HeadlessClient {
    fn new(commands: mpsc::UnboundedSender<BluetoothCommand>, settings: &Settings) -> Self {
        Self {
            commands,
            auto_connect: settings.auto_connect,
            read_offset_on_ready: settings.read_offset_on_ready,
            connect_requested: false,
            written: None,
            verified: false,
        }
    }

    fn send(&self, command: BluetoothCommand) {
        if self.commands.send(command).is_err() {
            warn!("Bluetooth service is no longer running");
        }
    }
}

fn format_elapsed(secs: u32) -> String {
    format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

impl TimerListener for HeadlessClient {
    fn on_elapsed_changed(&mut self, value: u32) {
        info!("Elapsed: {} ({}s)", format_elapsed(value), value);
        if self.verified {
            self.send(BluetoothCommand::Shutdown);
        }
    }

    fn on_offset_changed(&mut self, offset: u32) {
        info!("Offset: {}", offset);
        match self.written {
            None => {
                let now = SystemClock.now_secs();
                let target =
                    truncate_to_minute(now.saturating_sub(WRITTEN_OFFSET_MINUTES_AGO * 60));
                info!("Writing offset {}", target);
                self.written = Some(target);
                self.send(BluetoothCommand::WriteOffset(target));
            }
            Some(target) if target == offset && !self.verified => {
                info!("Offset read back matches the written value");
                self.verified = true;
                self.send(BluetoothCommand::ReadElapsed);
            }
            Some(_) => {}
        }
    }

    fn on_connection_state_changed(&mut self, state: ConnectionState) {
        info!("Connection state: {}", state);
        match state {
            ConnectionState::Ready if !self.read_offset_on_ready => {
                self.send(BluetoothCommand::ReadOffset);
            }
            ConnectionState::Disconnected(reason) if self.connect_requested => {
                warn!("Link closed ({:?}), ending session", reason);
                self.send(BluetoothCommand::Shutdown);
            }
            ConnectionState::Connecting => self.connect_requested = true,
            _ => {}
        }
    }

    fn on_offset_written(&mut self, offset: u32) {
        info!("Offset {} written, reading it back", offset);
        self.send(BluetoothCommand::ReadOffset);
    }

    fn on_peers_changed(&mut self, peers: &[PeerDevice]) {
        for peer in peers {
            info!("Found {} ({}) rssi {}", peer.name, peer.id, peer.rssi);
        }
        if !self.auto_connect && !self.connect_requested {
            if let Some(first) = peers.first() {
                self.connect_requested = true;
                self.send(BluetoothCommand::Connect(first.id.clone()));
            }
        }
    }

    fn on_operation_failed(&mut self, operation: Operation, error: &TimerError) {
        error!("{:?} failed: {}", operation, error);
        self.send(BluetoothCommand::Shutdown);
    }

    fn on_log_message(&mut self, message: &StatusMessage) {
        match message.severity {
            MessageSeverity::Warning | MessageSeverity::Error => warn!("{}", message.message),
            MessageSeverity::Info | MessageSeverity::Success => info!("{}", message.message),
        }
    }
}

#[cfg(not(feature = "btleplug"))]
fn simulated_transport(
    events: timer_profile::infrastructure::bluetooth::transport::TransportEventSender,
    settings: &Settings,
) -> timer_profile::infrastructure::bluetooth::simulated::SimulatedTransport {
    use std::sync::Arc;
    use timer_profile::infrastructure::bluetooth::simulated::{
        SimulatedPeripheral, SimulatedTransport,
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let started = clock
        .now_secs()
        .saturating_sub(u64::from(settings.simulated_offset_minutes_ago) * 60);
    let server = SimulatedPeripheral::timer_server(
        "00:11:22:33:44:55",
        "Timer Server",
        truncate_to_minute(started),
        clock,
    );
    SimulatedTransport::new(events, vec![server])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();
    let _log_guard = init_logger(&settings.log_settings)?;

    info!("Starting Timer Profile client");
    info!("Settings: {}", settings_service.path().display());

    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let config = ServiceConfig::from(&settings);

    #[cfg(feature = "btleplug")]
    let (mut service, radio) = {
        use timer_profile::infrastructure::bluetooth::btleplug_transport::BtleplugTransport;
        let transport = BtleplugTransport::new(transport_tx).await?;
        (BluetoothService::new(transport, config), None::<SimulatedRadio>)
    };
    #[cfg(not(feature = "btleplug"))]
    let (mut service, radio) = {
        let transport = simulated_transport(transport_tx, &settings);
        let radio: Option<SimulatedRadio> = Some(transport.radio());
        (BluetoothService::new(transport, config), radio)
    };

    let mut app_events = service.subscribe();
    let worker = tokio::spawn(service.run(command_rx, transport_rx));

    if let Some(radio) = radio {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                radio.tick();
            }
        });
    }

    let mut client = HeadlessClient::new(command_tx.clone(), &settings);
    command_tx.send(BluetoothCommand::StartScan)?;

    let session = async {
        while let Some(event) = app_events.recv().await {
            event.dispatch(&mut client);
        }
    };
    if tokio::time::timeout(SESSION_TIMEOUT, session).await.is_err() {
        warn!("Session timed out after {:?}", SESSION_TIMEOUT);
        command_tx.send(BluetoothCommand::Shutdown)?;
    }

    worker.await?;
    info!("Timer Profile client stopped");
    Ok(())
}
