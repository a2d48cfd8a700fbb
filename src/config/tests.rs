use super::validation::validate_config;
use super::*;
use crate::constants::test_constants::*;
use serial_test::serial;
use std::fs;
use tempfile::tempdir;

fn create_test_config(lights: &[&str]) -> Config {
    Config {
        serial_device: Some(TEST_SERIAL_DEVICE.to_string()),
        latitude: TEST_LATITUDE,
        longitude: TEST_LONGITUDE,
        outside_lights: lights.iter().map(|s| s.to_string()).collect(),
        device_ack_timeout_ms: None,
        modem_timeout_ms: None,
        max_send_attempts: None,
        check_interval_secs: None,
    }
}

fn write_config(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("shd.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_config_validation_basic() {
    let config = create_test_config(&[TEST_LIGHT]);
    assert!(validate_config(&config).is_ok());
}

#[test]
fn test_config_validation_coordinates() {
    let mut config = create_test_config(&[]);
    config.latitude = 90.5;
    assert!(validate_config(&config).is_err());

    config.latitude = -90.0;
    config.longitude = 180.1;
    assert!(validate_config(&config).is_err());

    config.longitude = -180.0;
    assert!(validate_config(&config).is_ok());
}

#[test]
fn test_config_validation_addresses() {
    assert!(validate_config(&create_test_config(&["22.6A.8F", "1a2b3c"])).is_ok());

    let err = validate_config(&create_test_config(&["226A8"])).unwrap_err();
    assert!(format!("{err:#}").contains("outside_lights"));
    assert!(validate_config(&create_test_config(&["XX6A8F"])).is_err());
}

#[test]
fn test_config_validation_empty_serial_device() {
    let mut config = create_test_config(&[]);
    config.serial_device = Some("  ".to_string());
    assert!(validate_config(&config).is_err());

    config.serial_device = None;
    assert!(validate_config(&config).is_ok());
    assert_eq!(config.serial_device(), crate::constants::DEFAULT_SERIAL_DEVICE);
}

#[test]
fn test_config_validation_limits() {
    let mut config = create_test_config(&[]);
    config.modem_timeout_ms = Some(99);
    assert!(validate_config(&config).is_err());

    config.modem_timeout_ms = Some(60_000);
    config.device_ack_timeout_ms = Some(60_001);
    assert!(validate_config(&config).is_err());

    config.device_ack_timeout_ms = Some(100);
    config.max_send_attempts = Some(0);
    assert!(validate_config(&config).is_err());

    config.max_send_attempts = Some(20);
    config.check_interval_secs = Some(5);
    assert!(validate_config(&config).is_err());

    config.check_interval_secs = Some(3600);
    assert!(validate_config(&config).is_ok());
}

#[test]
fn test_derived_settings_use_defaults() {
    let config = create_test_config(&[TEST_LIGHT]);
    assert_eq!(config.endpoint_config(), EndpointConfig::default());
    assert_eq!(config.light_schedule().check_interval, Duration::from_secs(60));
    assert_eq!(
        config.light_addresses().unwrap(),
        vec![DeviceAddress::new([0x22, 0x6A, 0x8F])]
    );
}

#[test]
fn test_derived_settings_overrides() {
    let mut config = create_test_config(&[]);
    config.modem_timeout_ms = Some(250);
    config.device_ack_timeout_ms = Some(1500);
    config.max_send_attempts = Some(3);
    config.check_interval_secs = Some(30);

    let endpoint = config.endpoint_config();
    assert_eq!(endpoint.modem_timeout, Duration::from_millis(250));
    assert_eq!(endpoint.device_ack_timeout, Duration::from_millis(1500));
    assert_eq!(endpoint.max_send_attempts, 3);
    assert_eq!(config.light_schedule().check_interval, Duration::from_secs(30));
}

#[test]
fn test_load_from_path() {
    let temp_dir = tempdir().unwrap();
    let path = write_config(
        temp_dir.path(),
        r#"
serial_device = "/dev/ttyUSB1"
latitude = 52.37
longitude = 4.89
outside_lights = ["226A8F", "01.02.03"]
max_send_attempts = 3
"#,
    );

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.serial_device(), "/dev/ttyUSB1");
    assert_eq!(config.outside_lights.len(), 2);
    assert_eq!(config.max_send_attempts, Some(3));
    assert_eq!(config.modem_timeout_ms, None);
}

#[test]
fn test_load_from_path_missing_file() {
    let temp_dir = tempdir().unwrap();
    let err = load_from_path(&temp_dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[test]
fn test_load_from_path_missing_location() {
    let temp_dir = tempdir().unwrap();
    let path = write_config(temp_dir.path(), "outside_lights = [\"226A8F\"]\n");
    let err = load_from_path(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse"));
}

#[test]
fn test_load_from_path_rejects_invalid_values() {
    let temp_dir = tempdir().unwrap();
    let path = write_config(temp_dir.path(), "latitude = 120.0\nlongitude = 4.0\n");
    let err = load_from_path(&path).unwrap_err();
    assert!(format!("{err:#}").contains("latitude"));
}

#[test]
#[serial]
fn test_config_load_default_location() {
    let temp_dir = tempdir().unwrap();
    let config_dir = temp_dir.path().join("shd");
    fs::create_dir_all(&config_dir).unwrap();
    write_config(&config_dir, "latitude = 10.0\nlongitude = 20.0\n");

    // Save and restore XDG_CONFIG_HOME
    let original = std::env::var("XDG_CONFIG_HOME").ok();
    unsafe {
        std::env::set_var("XDG_CONFIG_HOME", temp_dir.path());
    }

    let path = get_config_path();
    let result = Config::load();

    unsafe {
        match original {
            Some(val) => std::env::set_var("XDG_CONFIG_HOME", val),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
    }

    assert_eq!(path.unwrap(), config_dir.join("shd.toml"));
    let config = result.unwrap();
    assert_eq!(config.latitude, 10.0);
    assert!(config.outside_lights.is_empty());
}
