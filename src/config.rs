//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{KobukiError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct Config {
    pub serial: SerialConfig,
    pub robot: RobotConfig,
    pub telemetry: TelemetryConfig,
    pub teleop: TeleopConfig,
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Upper bound on a single blocking read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Silence longer than this raises a serial timeout notification
    #[serde(default = "default_serial_timeout_ms")]
    pub serial_timeout_ms: u64,
}

/// Robot calibration and physical limits
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RobotConfig {
    /// Wheel travel per encoder tick in millimeters
    #[serde(default = "default_tick_to_mm")]
    pub tick_to_mm: f64,

    /// Wheel rotation per encoder tick in radians
    #[serde(default = "default_tick_to_rad")]
    pub tick_to_rad: f64,

    /// Distance between the drive wheels in meters
    #[serde(default = "default_wheelbase_m")]
    pub wheelbase_m: f64,

    /// Wheel speeds above this are treated as corrupted encoder samples
    #[serde(default = "default_max_wheel_speed_mps")]
    pub max_wheel_speed_mps: f64,
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Keyboard teleoperation steps and limits
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TeleopConfig {
    #[serde(default = "default_linear_vel_step")]
    pub linear_vel_step: f64,

    #[serde(default = "default_linear_vel_max")]
    pub linear_vel_max: f64,

    #[serde(default = "default_angular_vel_step")]
    pub angular_vel_step: f64,

    #[serde(default = "default_angular_vel_max")]
    pub angular_vel_max: f64,
}

/// Diagnostic logging configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files; console only when empty
    #[serde(default)]
    pub directory: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/kobuki".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_read_timeout_ms() -> u64 { 100 }
fn default_serial_timeout_ms() -> u64 { 1000 }

fn default_tick_to_mm() -> f64 { 0.0845813406577 }
fn default_tick_to_rad() -> f64 { 0.00201384144460884 }
fn default_wheelbase_m() -> f64 { 0.23 }
fn default_max_wheel_speed_mps() -> f64 { 3.0 }

fn default_telemetry_enabled() -> bool { false }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_interval_ms() -> u64 { 100 }
fn default_log_format() -> String { "jsonl".to_string() }

fn default_linear_vel_step() -> f64 { 0.1 }
fn default_linear_vel_max() -> f64 { 3.4 }
fn default_angular_vel_step() -> f64 { 0.02 }
fn default_angular_vel_max() -> f64 { 1.2 }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            serial_timeout_ms: default_serial_timeout_ms(),
        }
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            tick_to_mm: default_tick_to_mm(),
            tick_to_rad: default_tick_to_rad(),
            wheelbase_m: default_wheelbase_m(),
            max_wheel_speed_mps: default_max_wheel_speed_mps(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
            log_interval_ms: default_log_interval_ms(),
            format: default_log_format(),
        }
    }
}

impl Default for TeleopConfig {
    fn default() -> Self {
        Self {
            linear_vel_step: default_linear_vel_step(),
            linear_vel_max: default_linear_vel_max(),
            angular_vel_step: default_angular_vel_step(),
            angular_vel_max: default_angular_vel_max(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> KobukiError {
    KobukiError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use kobuki_driver::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if ![57600, 115200, 230400, 460800, 921600].contains(&self.serial.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 57600, 115200, 230400, 460800, 921600",
            ));
        }

        if self.serial.read_timeout_ms == 0 || self.serial.read_timeout_ms > 10000 {
            return Err(invalid("read_timeout_ms must be between 1 and 10000"));
        }

        if self.serial.serial_timeout_ms < self.serial.read_timeout_ms {
            return Err(invalid("serial_timeout_ms must not be shorter than read_timeout_ms"));
        }

        // Calibration constants
        for (name, value) in [
            ("tick_to_mm", self.robot.tick_to_mm),
            ("tick_to_rad", self.robot.tick_to_rad),
            ("wheelbase_m", self.robot.wheelbase_m),
            ("max_wheel_speed_mps", self.robot.max_wheel_speed_mps),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(format!("{} must be a positive number", name)));
            }
        }

        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self.telemetry.log_interval_ms == 0 || self.telemetry.log_interval_ms > 60000 {
            return Err(invalid("log_interval_ms must be between 1 and 60000"));
        }

        if self.telemetry.format != "jsonl" {
            return Err(invalid("log format must be 'jsonl' (only supported format)"));
        }

        for (name, step, max) in [
            ("linear_vel", self.teleop.linear_vel_step, self.teleop.linear_vel_max),
            ("angular_vel", self.teleop.angular_vel_step, self.teleop.angular_vel_max),
        ] {
            if !(step > 0.0) {
                return Err(invalid(format!("{}_step must be greater than 0", name)));
            }
            if !(max >= step) {
                return Err(invalid(format!("{}_max must be at least {}_step", name, name)));
            }
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("logging level must be one of: trace, debug, info, warn, error"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_default_config() {
        assert!(create_valid_config().validate().is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[serial]
port = "/dev/ttyUSB0"

[robot]
wheelbase_m = 0.25

[telemetry]

[teleop]

[logging]
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.robot.wheelbase_m, 0.25);
        assert_eq!(config.robot.tick_to_mm, default_tick_to_mm());
    }

    #[test]
    fn test_load_missing_section_fails() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[serial]\n").unwrap();
        temp_file.flush().unwrap();

        assert!(matches!(Config::load(temp_file.path()), Err(KobukiError::Config(_))));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = Config::load("/nonexistent/kobuki.toml");
        assert!(matches!(result, Err(KobukiError::Io(_))));
    }

    #[test]
    fn test_empty_serial_port() {
        let mut config = create_valid_config();
        config.serial.port = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = create_valid_config();
        config.serial.baud_rate = 9600;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_baud_rates() {
        for &baud in &[57600, 115200, 230400, 460800, 921600] {
            let mut config = create_valid_config();
            config.serial.baud_rate = baud;
            assert!(config.validate().is_ok(), "Baud rate {} should be valid", baud);
        }
    }

    #[test]
    fn test_read_timeout_zero() {
        let mut config = create_valid_config();
        config.serial.read_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_read_timeout_too_high() {
        let mut config = create_valid_config();
        config.serial.read_timeout_ms = 10001;
        config.serial.serial_timeout_ms = 20000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serial_timeout_shorter_than_read_timeout() {
        let mut config = create_valid_config();
        config.serial.read_timeout_ms = 500;
        config.serial.serial_timeout_ms = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_calibration() {
        let mut config = create_valid_config();
        config.robot.tick_to_mm = 0.0;
        assert!(config.validate().is_err());

        let mut config = create_valid_config();
        config.robot.wheelbase_m = -0.2;
        assert!(config.validate().is_err());

        let mut config = create_valid_config();
        config.robot.tick_to_rad = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_wheel_speed_zero() {
        let mut config = create_valid_config();
        config.robot.max_wheel_speed_mps = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_log_dir_when_enabled() {
        let mut config = create_valid_config();
        config.telemetry.enabled = true;
        config.telemetry.log_dir = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_log_dir_when_disabled() {
        let mut config = create_valid_config();
        config.telemetry.enabled = false;
        config.telemetry.log_dir = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_records_per_file_zero() {
        let mut config = create_valid_config();
        config.telemetry.max_records_per_file = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_files_to_keep_zero() {
        let mut config = create_valid_config();
        config.telemetry.max_files_to_keep = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_interval_out_of_range() {
        let mut config = create_valid_config();
        config.telemetry.log_interval_ms = 0;
        assert!(config.validate().is_err());

        config.telemetry.log_interval_ms = 60001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = create_valid_config();
        config.telemetry.format = "csv".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_teleop_step_zero() {
        let mut config = create_valid_config();
        config.teleop.linear_vel_step = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_teleop_max_below_step() {
        let mut config = create_valid_config();
        config.teleop.angular_vel_max = 0.01;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = create_valid_config();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_serial_port(), "/dev/kobuki");
        assert_eq!(default_baud_rate(), 115200);
        assert_eq!(default_read_timeout_ms(), 100);
        assert_eq!(default_serial_timeout_ms(), 1000);
        assert_eq!(default_tick_to_mm(), 0.0845813406577);
        assert_eq!(default_tick_to_rad(), 0.00201384144460884);
        assert_eq!(default_wheelbase_m(), 0.23);
        assert_eq!(default_max_wheel_speed_mps(), 3.0);
        assert_eq!(default_telemetry_enabled(), false);
        assert_eq!(default_log_dir(), "./logs");
        assert_eq!(default_max_records_per_file(), 10000);
        assert_eq!(default_max_files_to_keep(), 10);
        assert_eq!(default_log_interval_ms(), 100);
        assert_eq!(default_log_format(), "jsonl");
        assert_eq!(default_linear_vel_step(), 0.1);
        assert_eq!(default_linear_vel_max(), 3.4);
        assert_eq!(default_angular_vel_step(), 0.02);
        assert_eq!(default_angular_vel_max(), 1.2);
        assert_eq!(default_log_level(), "info");
    }

    #[test]
    fn test_shipped_default_toml_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config, Config::default());
    }
}
