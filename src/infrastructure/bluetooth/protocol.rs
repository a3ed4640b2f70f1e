//! Timer Profile Protocol
//!
//! This module contains the GATT layout of the Timer Profile and the
//! codec for the values exchanged on the wire.

use crate::error::TimerError;
use uuid::Uuid;

/// Timer Service UUID
/// Generated for this profile with `uuidgen`, does not conform to any SIG profile.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x1706bbc0_88ab_4b8d_877e_2237916ee929);

/// Elapsed Characteristic UUID - seconds since the offset (read/notify)
pub const ELAPSED_CHAR_UUID: Uuid = Uuid::from_u128(0x275348fb_c14d_4fd5_b434_7c3f351dea5f);

/// Offset Characteristic UUID - current offset timestamp (read/write)
pub const OFFSET_CHAR_UUID: Uuid = Uuid::from_u128(0xbd28e457_4026_4270_a99f_f9bc20182e15);

/// Size of every value on the wire
pub const TIME_VALUE_LEN: usize = 4;

/// Status reported by a peer for a successful GATT operation
pub const GATT_SUCCESS: u8 = 0x00;

/// Generic GATT failure status
pub const GATT_ERROR: u8 = 0x85;

/// Characteristic property bits, as carried in the GATT characteristic declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharProperties(u8);

impl CharProperties {
    pub const READ: Self = Self(0x02);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// Attribute permission bits for the server side of the profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharPermissions(u8);

impl CharPermissions {
    pub const READ: Self = Self(0x01);
    pub const WRITE: Self = Self(0x10);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// One characteristic of the profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub uuid: Uuid,
    pub properties: CharProperties,
    pub permissions: CharPermissions,
}

/// Static layout of the Timer Profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileDescriptor {
    pub service: Uuid,
    pub elapsed: CharacteristicDescriptor,
    pub offset: CharacteristicDescriptor,
}

/// The Timer Profile
///
/// | Element | Properties  | Payload                         |
/// |---------|-------------|---------------------------------|
/// | Elapsed | read/notify | u32 little-endian seconds       |
/// | Offset  | read/write  | u32 little-endian UNIX seconds  |
pub const TIMER_PROFILE: ProfileDescriptor = ProfileDescriptor {
    service: SERVICE_UUID,
    elapsed: CharacteristicDescriptor {
        uuid: ELAPSED_CHAR_UUID,
        properties: CharProperties::READ.union(CharProperties::NOTIFY),
        permissions: CharPermissions::READ,
    },
    offset: CharacteristicDescriptor {
        uuid: OFFSET_CHAR_UUID,
        properties: CharProperties::READ.union(CharProperties::WRITE),
        permissions: CharPermissions::READ.union(CharPermissions::WRITE),
    },
};

/// Encode a time value for the wire (GATT APIs expect LE order)
pub fn encode_time_value(value: u32) -> [u8; TIME_VALUE_LEN] {
    value.to_le_bytes()
}

/// Decode a time value received from the wire
///
/// Anything past the first four bytes is ignored.
pub fn decode_time_value(bytes: &[u8]) -> Result<u32, TimerError> {
    match bytes.get(..TIME_VALUE_LEN) {
        Some(&[b0, b1, b2, b3]) => Ok(u32::from_le_bytes([b0, b1, b2, b3])),
        _ => Err(TimerError::MalformedPayload { len: bytes.len() }),
    }
}

/// Human readable description of a GATT status code
pub fn status_description(status: u8) -> String {
    match status {
        GATT_SUCCESS => "SUCCESS".to_string(),
        other => format!("Unknown Status {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_scenario() {
        assert_eq!(encode_time_value(3661), [0x8D, 0x0E, 0x00, 0x00]);
    }

    #[test]
    fn test_round_trip_edges() {
        for value in [0, 1, 3661, 0x0102_0304, u32::MAX - 1, u32::MAX] {
            assert_eq!(decode_time_value(&encode_time_value(value)).unwrap(), value);
        }
    }

    #[test]
    fn test_decode_short_payload() {
        for len in 0..TIME_VALUE_LEN {
            let bytes = vec![0xFF; len];
            assert!(matches!(
                decode_time_value(&bytes),
                Err(TimerError::MalformedPayload { len: l }) if l == len
            ));
        }
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let bytes = [0x8D, 0x0E, 0x00, 0x00, 0xAA, 0xBB];
        assert_eq!(decode_time_value(&bytes).unwrap(), 3661);
        assert_eq!(decode_time_value(&bytes).unwrap(), decode_time_value(&bytes[..4]).unwrap());
    }

    #[test]
    fn test_profile_masks() {
        let elapsed = TIMER_PROFILE.elapsed;
        assert!(elapsed.properties.contains(CharProperties::READ));
        assert!(elapsed.properties.contains(CharProperties::NOTIFY));
        assert!(!elapsed.properties.contains(CharProperties::WRITE));
        assert_eq!(elapsed.permissions, CharPermissions::READ);

        let offset = TIMER_PROFILE.offset;
        assert_eq!(offset.properties.bits(), 0x0A);
        assert_eq!(offset.permissions.bits(), 0x11);
        assert!(!offset.properties.contains(CharProperties::NOTIFY));
    }

    #[test]
    fn test_service_uuid() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "1706bbc0-88ab-4b8d-877e-2237916ee929"
        );
    }

    #[test]
    fn test_status_description() {
        assert_eq!(status_description(GATT_SUCCESS), "SUCCESS");
        assert_eq!(status_description(GATT_ERROR), "Unknown Status 133");
    }
}
