use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Three-byte device address as printed on the device label, e.g. `22.6A.8F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress([u8; 3]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("device address '{0}' must have exactly six hex digits")]
    Length(String),
    #[error("device address '{0}' contains a non-hex character")]
    NotHex(String),
}

impl DeviceAddress {
    pub const fn new(bytes: [u8; 3]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 3] {
        self.0
    }

    pub fn matches(&self, bytes: &[u8]) -> bool {
        bytes == self.0.as_slice()
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressError;

    /// Accepts `226A8F`, `22.6A.8F` and `22:6a:8f`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.trim().chars().filter(|c| !matches!(c, '.' | ':')).collect();
        if digits.len() != 6 {
            return Err(AddressError::Length(s.to_string()));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError::NotHex(s.to_string()));
        }

        let mut bytes = [0u8; 3];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = digits
                .get(i * 2..i * 2 + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| AddressError::NotHex(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a:02X}.{b:02X}.{c:02X}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_hex() {
        let addr: DeviceAddress = "226A8F".parse().unwrap();
        assert_eq!(addr.bytes(), [0x22, 0x6A, 0x8F]);
        assert_eq!(addr.to_string(), "22.6A.8F");
    }

    #[test]
    fn test_parse_separated_lowercase() {
        let dotted: DeviceAddress = "22.6a.8f".parse().unwrap();
        let coloned: DeviceAddress = " 22:6A:8F ".parse().unwrap();
        assert_eq!(dotted, coloned);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!("22.6A".parse::<DeviceAddress>(), Err(AddressError::Length(_))));
        assert!(matches!("22.6A.8FF".parse::<DeviceAddress>(), Err(AddressError::Length(_))));
        assert!(matches!("ZZ6A8F".parse::<DeviceAddress>(), Err(AddressError::NotHex(_))));
        assert!(matches!("+26A8F".parse::<DeviceAddress>(), Err(AddressError::NotHex(_))));
    }

    #[test]
    fn test_matches_raw_bytes() {
        let addr = DeviceAddress::new([1, 2, 3]);
        assert!(addr.matches(&[1, 2, 3]));
        assert!(!addr.matches(&[1, 2, 4]));
        assert!(!addr.matches(&[1, 2]));
    }
}
