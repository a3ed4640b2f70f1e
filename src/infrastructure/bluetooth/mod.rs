//! Bluetooth Module
//!
//! Provides the BLE GATT client for the Timer Profile.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │  (Main coordinator - public API for the application)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┬─────────────┐
//!         │             │             │             │
//!         ▼             ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │   Sync   │  │ Protocol │
//! │           │  │            │  │          │  │          │
//! │ - filter  │  │ - link     │  │ - reads  │  │ - UUIDs  │
//! │ - dedupe  │  │ - discovery│  │ - writes │  │ - codec  │
//! └───────────┘  └────────────┘  └──────────┘  └──────────┘
//!                       │
//!                       ▼
//!               ┌───────────────┐
//!               │   Transport   │  simulated radio or btleplug
//!               └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Timer Profile UUIDs, characteristic layout and value codec
//! - [`transport`] - Radio abstraction and the events it reports
//! - [`scanner`] - Filtered device discovery
//! - [`connection`] - Connection lifecycle and service discovery
//! - [`sync`] - Single-flight reads and writes, elapsed notifications
//! - [`service`] - Main service coordinator
//! - [`simulated`] - In-memory radio hosting timer servers

#[cfg(feature = "btleplug")]
pub mod btleplug_transport;
pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod simulated;
pub mod sync;
pub mod transport;

// Re-export main service for convenience
pub use service::{BluetoothService, ServiceConfig};
