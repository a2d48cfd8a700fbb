//! Application-wide defaults, limits and exit codes.

// Modem link
pub const DEFAULT_SERIAL_DEVICE: &str = "/dev/ttyUSB0";
pub const DEFAULT_MODEM_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_DEVICE_ACK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_SEND_ATTEMPTS: u32 = 5;

pub const MINIMUM_TIMEOUT_MS: u64 = 100;
pub const MAXIMUM_TIMEOUT_MS: u64 = 60_000;
pub const MINIMUM_SEND_ATTEMPTS: u32 = 1;
pub const MAXIMUM_SEND_ATTEMPTS: u32 = 20;

// Light scheduling
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;
pub const MINIMUM_CHECK_INTERVAL_SECS: u64 = 10;
pub const MAXIMUM_CHECK_INTERVAL_SECS: u64 = 3_600;

// Configuration file
pub const CONFIG_DIR_NAME: &str = "shd";
pub const CONFIG_FILE_NAME: &str = "shd.toml";

// Exit codes
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
