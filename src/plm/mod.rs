//! Powerline modem protocol: framing, command sequencing and device addresses.
//!
//! Every frame starts with [`STX`] followed by a command number. Commands the
//! host sends (`0x6x`, `0x7x`) are echoed back with a trailing [`ACK`] or
//! [`NAK`]; unsolicited reports such as [`STANDARD_MESSAGE`] have no trailer.

pub mod address;
pub mod connection;
pub mod endpoint;

pub use address::{AddressError, DeviceAddress};
pub use connection::{CommandListener, ListenerId, PlmConnection, PlmError, PlmResponse};
pub use endpoint::{EndpointConfig, PlmEndpoint, Response};

/// Start of every frame.
pub const STX: u8 = 0x02;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;

/// Standard message received from a device.
pub const STANDARD_MESSAGE: u8 = 0x50;
/// Modem identification query.
pub const GET_IM_INFO: u8 = 0x60;
/// Send a standard message to a device.
pub const SEND_STANDARD: u8 = 0x62;

/// Message flags for a direct standard message with max hops.
pub const DIRECT_MAX_HOPS: u8 = 0x0F;
pub const LIGHT_ON: u8 = 0x12;
pub const LIGHT_OFF: u8 = 0x13;

/// Frame length after the command number, trailer included.
///
/// `last_sent_len` is the length of the last command the host transmitted,
/// which the modem echoes for [`SEND_STANDARD`]. Unknown numbers return
/// `None` and force the reader to resynchronize.
pub fn frame_len(command: u8, last_sent_len: Option<usize>) -> Option<usize> {
    match command {
        GET_IM_INFO => Some(7),
        SEND_STANDARD => last_sent_len,
        STANDARD_MESSAGE => Some(9),
        _ => None,
    }
}

/// Host commands are echoed with an ACK/NAK trailer.
pub fn has_trailer(command: u8) -> bool {
    matches!(command & 0xF0, 0x60 | 0x70)
}

/// Commands whose frames are passed to listeners.
pub fn is_notification(command: u8) -> bool {
    command & 0x50 == 0x50
}

/// Standard message switching a device fully on.
pub fn light_on_command(address: DeviceAddress) -> Vec<u8> {
    let [a, b, c] = address.bytes();
    vec![SEND_STANDARD, a, b, c, DIRECT_MAX_HOPS, LIGHT_ON, 0xFF]
}

/// Standard message switching a device off.
pub fn light_off_command(address: DeviceAddress) -> Vec<u8> {
    let [a, b, c] = address.bytes();
    vec![SEND_STANDARD, a, b, c, DIRECT_MAX_HOPS, LIGHT_OFF, 0x00]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_lengths() {
        assert_eq!(frame_len(GET_IM_INFO, None), Some(7));
        assert_eq!(frame_len(STANDARD_MESSAGE, Some(3)), Some(9));
        assert_eq!(frame_len(SEND_STANDARD, Some(7)), Some(7));
        assert_eq!(frame_len(SEND_STANDARD, None), None);
        assert_eq!(frame_len(0x51, Some(7)), None);
    }

    #[test]
    fn test_trailer_and_notification_classes() {
        assert!(has_trailer(SEND_STANDARD));
        assert!(has_trailer(0x73));
        assert!(!has_trailer(STANDARD_MESSAGE));

        assert!(is_notification(STANDARD_MESSAGE));
        assert!(is_notification(0x51));
        assert!(!is_notification(SEND_STANDARD));
        assert!(!is_notification(GET_IM_INFO));
    }

    #[test]
    fn test_light_commands() {
        let addr = DeviceAddress::new([0x01, 0x02, 0x03]);
        assert_eq!(
            light_on_command(addr),
            vec![0x62, 0x01, 0x02, 0x03, 0x0F, 0x12, 0xFF]
        );
        assert_eq!(
            light_off_command(addr),
            vec![0x62, 0x01, 0x02, 0x03, 0x0F, 0x13, 0x00]
        );
    }
}
