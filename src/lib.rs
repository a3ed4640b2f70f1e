//! Client for the Timer Profile, a BLE GATT service exposing an elapsed
//! time counter and its writable reference offset.

pub mod domain;
pub mod error;
pub mod infrastructure;
