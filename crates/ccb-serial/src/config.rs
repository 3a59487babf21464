// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Serial port configuration.
//!
//! Enumerated options accept the spellings found in instrument manuals and
//! older configuration files (`"E"`, `"even"`, `"EVEN"`; `1`, `1.5`, `"2"`;
//! `8`, `"8"`) and are stored as enums afterwards. Every coercion from a
//! non-canonical spelling is logged at debug level.
//!
//! ```rust
//! use ccb_serial::{Parity, SerialConfig, StopBits};
//!
//! let config = SerialConfig::builder()
//!     .port("/dev/ttyUSB0")
//!     .parity(Parity::Even)
//!     .stopbits(StopBits::Two)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.baudrate, 9600);
//! assert_eq!(config.terminator, "\r\n");
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use ccb_core::ConfigurationError;
use serde::{Deserialize, Serialize};
use tracing::debug;

// =============================================================================
// Defaults
// =============================================================================

fn default_baudrate() -> u32 {
    9600
}

fn default_terminator() -> String {
    "\r\n".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_wait_read_text_nonempty() -> Duration {
    Duration::from_millis(500)
}

fn default_n_attempts_read_text_nonempty() -> u32 {
    10
}

// =============================================================================
// Raw Option Values
// =============================================================================

/// An enumerated option as it appears in a configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawSetting {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for RawSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

fn log_coercion(option: &'static str, given: &str, coerced: &impl fmt::Display) {
    let canonical = coerced.to_string();
    if given != canonical {
        debug!(option, given, coerced = %canonical, "Coerced serial option");
    }
}

// =============================================================================
// Parity
// =============================================================================

/// Parity bit setting.
///
/// `Mark` and `Space` are accepted here for loopback and custom openers, but
/// the hardware opener behind [`SerialCommunication::new`] cannot drive them
/// and fails on `open()`. See [`Parity::is_hardware_supported`].
///
/// [`SerialCommunication::new`]: crate::SerialCommunication::new
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "RawSetting", into = "String")]
pub enum Parity {
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
    /// No parity bit (default).
    #[default]
    None,
    /// Parity bit always set.
    Mark,
    /// Parity bit always cleared.
    Space,
}

impl Parity {
    /// Whether a hardware port can be opened with this parity.
    pub const fn is_hardware_supported(&self) -> bool {
        !matches!(self, Self::Mark | Self::Space)
    }

    /// Single-letter form used in `8N1`-style notation.
    pub const fn char(&self) -> char {
        match self {
            Self::Even => 'E',
            Self::Odd => 'O',
            Self::None => 'N',
            Self::Mark => 'M',
            Self::Space => 'S',
        }
    }

    /// Canonical upper-case name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Even => "EVEN",
            Self::Odd => "ODD",
            Self::None => "NONE",
            Self::Mark => "MARK",
            Self::Space => "SPACE",
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Parity {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "E" | "EVEN" => Ok(Self::Even),
            "O" | "ODD" => Ok(Self::Odd),
            "N" | "NONE" => Ok(Self::None),
            "M" | "MARK" => Ok(Self::Mark),
            "S" | "SPACE" => Ok(Self::Space),
            other => Err(ConfigurationError::invalid(
                "parity",
                format!("unknown parity '{other}', expected one of EVEN, ODD, NONE, MARK, SPACE"),
            )),
        }
    }
}

impl TryFrom<RawSetting> for Parity {
    type Error = ConfigurationError;

    fn try_from(raw: RawSetting) -> Result<Self, Self::Error> {
        let given = raw.to_string();
        let value = given.parse::<Self>()?;
        log_coercion("parity", &given, &value);
        Ok(value)
    }
}

impl From<Parity> for String {
    fn from(value: Parity) -> Self {
        value.as_str().to_string()
    }
}

// =============================================================================
// StopBits
// =============================================================================

/// Number of stop bits.
///
/// `OnePointFive` is accepted here, but the hardware opener behind
/// [`SerialCommunication::new`] fails on `open()` with it.
///
/// [`SerialCommunication::new`]: crate::SerialCommunication::new
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "RawSetting", into = "f64")]
pub enum StopBits {
    /// One stop bit (default).
    #[default]
    One,
    /// One and a half stop bits.
    OnePointFive,
    /// Two stop bits.
    Two,
}

impl StopBits {
    /// Whether a hardware port can be opened with this many stop bits.
    pub const fn is_hardware_supported(&self) -> bool {
        !matches!(self, Self::OnePointFive)
    }

    /// Number of stop bits as a float.
    pub const fn value(&self) -> f64 {
        match self {
            Self::One => 1.0,
            Self::OnePointFive => 1.5,
            Self::Two => 2.0,
        }
    }

    fn from_value(value: f64) -> Result<Self, ConfigurationError> {
        if value == 1.0 {
            Ok(Self::One)
        } else if value == 1.5 {
            Ok(Self::OnePointFive)
        } else if value == 2.0 {
            Ok(Self::Two)
        } else {
            Err(ConfigurationError::invalid(
                "stopbits",
                format!("unsupported stop bits {value}, expected 1, 1.5 or 2"),
            ))
        }
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One => f.write_str("1"),
            Self::OnePointFive => f.write_str("1.5"),
            Self::Two => f.write_str("2"),
        }
    }
}

impl FromStr for StopBits {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ONE" => Ok(Self::One),
            "ONE_POINT_FIVE" => Ok(Self::OnePointFive),
            "TWO" => Ok(Self::Two),
            other => other.parse::<f64>().map_err(|_| {
                ConfigurationError::invalid(
                    "stopbits",
                    format!("unknown stop bits '{other}', expected 1, 1.5 or 2"),
                )
            })
            .and_then(Self::from_value),
        }
    }
}

impl TryFrom<RawSetting> for StopBits {
    type Error = ConfigurationError;

    fn try_from(raw: RawSetting) -> Result<Self, Self::Error> {
        let value = match &raw {
            RawSetting::Int(v) => Self::from_value(*v as f64)?,
            RawSetting::Float(v) => Self::from_value(*v)?,
            RawSetting::Text(v) => v.parse::<Self>()?,
        };
        log_coercion("stopbits", &raw.to_string(), &value);
        Ok(value)
    }
}

impl From<StopBits> for f64 {
    fn from(value: StopBits) -> Self {
        value.value()
    }
}

// =============================================================================
// ByteSize
// =============================================================================

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "RawSetting", into = "u8")]
pub enum ByteSize {
    /// Five data bits.
    Five,
    /// Six data bits.
    Six,
    /// Seven data bits.
    Seven,
    /// Eight data bits (default).
    #[default]
    Eight,
}

impl ByteSize {
    /// Number of data bits.
    pub const fn bits(&self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }

    fn from_bits(bits: i64) -> Result<Self, ConfigurationError> {
        match bits {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            other => Err(ConfigurationError::invalid(
                "bytesize",
                format!("unsupported byte size {other}, expected 5 to 8"),
            )),
        }
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

impl FromStr for ByteSize {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIVE" | "FIVEBITS" => Ok(Self::Five),
            "SIX" | "SIXBITS" => Ok(Self::Six),
            "SEVEN" | "SEVENBITS" => Ok(Self::Seven),
            "EIGHT" | "EIGHTBITS" => Ok(Self::Eight),
            other => other
                .parse::<i64>()
                .map_err(|_| {
                    ConfigurationError::invalid(
                        "bytesize",
                        format!("unknown byte size '{other}', expected 5 to 8"),
                    )
                })
                .and_then(Self::from_bits),
        }
    }
}

impl TryFrom<RawSetting> for ByteSize {
    type Error = ConfigurationError;

    fn try_from(raw: RawSetting) -> Result<Self, Self::Error> {
        let value = match &raw {
            RawSetting::Int(v) => Self::from_bits(*v)?,
            RawSetting::Float(v) if v.fract() == 0.0 => Self::from_bits(*v as i64)?,
            RawSetting::Float(v) => {
                return Err(ConfigurationError::invalid(
                    "bytesize",
                    format!("byte size must be an integer, got {v}"),
                ))
            }
            RawSetting::Text(v) => v.parse::<Self>()?,
        };
        log_coercion("bytesize", &raw.to_string(), &value);
        Ok(value)
    }
}

impl From<ByteSize> for u8 {
    fn from(value: ByteSize) -> Self {
        value.bits()
    }
}

// =============================================================================
// SerialConfig
// =============================================================================

/// Serial communication settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3").
    pub port: String,

    /// Baud rate (default: 9600).
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,

    /// Parity (default: NONE).
    #[serde(default)]
    pub parity: Parity,

    /// Stop bits (default: 1).
    #[serde(default)]
    pub stopbits: StopBits,

    /// Data bits (default: 8).
    #[serde(default)]
    pub bytesize: ByteSize,

    /// Line terminator appended on write and searched on read (default: "\r\n").
    #[serde(default = "default_terminator")]
    pub terminator: String,

    /// Timeout of a single read (default: 2s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Pause between attempts of `read_text_nonempty` (default: 500ms).
    #[serde(
        default = "default_wait_read_text_nonempty",
        with = "humantime_serde"
    )]
    pub wait_sec_read_text_nonempty: Duration,

    /// Attempts made by `read_text_nonempty` (default: 10).
    #[serde(default = "default_n_attempts_read_text_nonempty")]
    pub default_n_attempts_read_text_nonempty: u32,

    /// Replace invalid UTF-8 instead of failing the read.
    #[serde(default)]
    pub lossy_decoding: bool,
}

impl SerialConfig {
    /// Creates a configuration with default settings for `port`.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baudrate: default_baudrate(),
            parity: Parity::default(),
            stopbits: StopBits::default(),
            bytesize: ByteSize::default(),
            terminator: default_terminator(),
            timeout: default_timeout(),
            wait_sec_read_text_nonempty: default_wait_read_text_nonempty(),
            default_n_attempts_read_text_nonempty: default_n_attempts_read_text_nonempty(),
            lossy_decoding: false,
        }
    }

    /// Creates a builder.
    pub fn builder() -> SerialConfigBuilder {
        SerialConfigBuilder::default()
    }

    /// Terminator as bytes.
    pub fn terminator_bytes(&self) -> &[u8] {
        self.terminator.as_bytes()
    }

    /// Short `8N1`-style description of the framing.
    pub fn framing(&self) -> String {
        format!("{}{}{}", self.bytesize, self.parity.char(), self.stopbits)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.port.trim().is_empty() {
            return Err(ConfigurationError::invalid("port", "port cannot be empty"));
        }
        if self.baudrate == 0 {
            return Err(ConfigurationError::invalid(
                "baudrate",
                "baud rate must be positive",
            ));
        }
        if self.terminator.is_empty() {
            return Err(ConfigurationError::invalid(
                "terminator",
                "terminator cannot be empty",
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigurationError::invalid(
                "timeout",
                "timeout must be greater than zero",
            ));
        }
        if self.default_n_attempts_read_text_nonempty == 0 {
            return Err(ConfigurationError::invalid(
                "default_n_attempts_read_text_nonempty",
                "at least one attempt is required",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// SerialConfigBuilder
// =============================================================================

/// Builder for [`SerialConfig`].
#[derive(Debug, Default)]
pub struct SerialConfigBuilder {
    port: Option<String>,
    baudrate: Option<u32>,
    parity: Option<Parity>,
    stopbits: Option<StopBits>,
    bytesize: Option<ByteSize>,
    terminator: Option<String>,
    timeout: Option<Duration>,
    wait_sec_read_text_nonempty: Option<Duration>,
    default_n_attempts_read_text_nonempty: Option<u32>,
    lossy_decoding: bool,
}

impl SerialConfigBuilder {
    /// Sets the port name.
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Sets the baud rate.
    pub fn baudrate(mut self, baudrate: u32) -> Self {
        self.baudrate = Some(baudrate);
        self
    }

    /// Sets the parity.
    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = Some(parity);
        self
    }

    /// Sets the stop bits.
    pub fn stopbits(mut self, stopbits: StopBits) -> Self {
        self.stopbits = Some(stopbits);
        self
    }

    /// Sets the data bits.
    pub fn bytesize(mut self, bytesize: ByteSize) -> Self {
        self.bytesize = Some(bytesize);
        self
    }

    /// Sets the line terminator.
    pub fn terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = Some(terminator.into());
        self
    }

    /// Sets the read timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the pause between non-empty read attempts.
    pub fn wait_sec_read_text_nonempty(mut self, wait: Duration) -> Self {
        self.wait_sec_read_text_nonempty = Some(wait);
        self
    }

    /// Sets the number of non-empty read attempts.
    pub fn default_n_attempts_read_text_nonempty(mut self, attempts: u32) -> Self {
        self.default_n_attempts_read_text_nonempty = Some(attempts);
        self
    }

    /// Enables lossy UTF-8 decoding.
    pub fn lossy_decoding(mut self, lossy: bool) -> Self {
        self.lossy_decoding = lossy;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<SerialConfig, ConfigurationError> {
        let port = self.port.ok_or_else(|| ConfigurationError::missing("port"))?;

        let config = SerialConfig {
            port,
            baudrate: self.baudrate.unwrap_or_else(default_baudrate),
            parity: self.parity.unwrap_or_default(),
            stopbits: self.stopbits.unwrap_or_default(),
            bytesize: self.bytesize.unwrap_or_default(),
            terminator: self.terminator.unwrap_or_else(default_terminator),
            timeout: self.timeout.unwrap_or_else(default_timeout),
            wait_sec_read_text_nonempty: self
                .wait_sec_read_text_nonempty
                .unwrap_or_else(default_wait_read_text_nonempty),
            default_n_attempts_read_text_nonempty: self
                .default_n_attempts_read_text_nonempty
                .unwrap_or_else(default_n_attempts_read_text_nonempty),
            lossy_decoding: self.lossy_decoding,
        };

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_supported_framing() {
        assert!(Parity::Even.is_hardware_supported());
        assert!(Parity::None.is_hardware_supported());
        assert!(!Parity::Mark.is_hardware_supported());
        assert!(!Parity::Space.is_hardware_supported());
        assert!(StopBits::Two.is_hardware_supported());
        assert!(!StopBits::OnePointFive.is_hardware_supported());
    }

    #[test]
    fn test_defaults() {
        let config = SerialConfig::builder().port("COM3").build().unwrap();
        assert_eq!(config.baudrate, 9600);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stopbits, StopBits::One);
        assert_eq!(config.bytesize, ByteSize::Eight);
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.wait_sec_read_text_nonempty, Duration::from_millis(500));
        assert_eq!(config.default_n_attempts_read_text_nonempty, 10);
        assert_eq!(config.framing(), "8N1");
        assert_eq!(config, SerialConfig::new("COM3"));
    }

    #[test]
    fn test_builder_requires_port() {
        let err = SerialConfig::builder().build().unwrap_err();
        assert_eq!(err.field(), Some("port"));
    }

    #[test]
    fn test_validation() {
        assert!(SerialConfig::builder().port("").build().is_err());
        assert!(SerialConfig::builder().port("COM1").baudrate(0).build().is_err());
        assert!(SerialConfig::builder().port("COM1").terminator("").build().is_err());
        assert!(SerialConfig::builder()
            .port("COM1")
            .default_n_attempts_read_text_nonempty(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_parity_spellings() {
        for spelling in ["E", "e", "even", "EVEN", " Even "] {
            assert_eq!(spelling.parse::<Parity>().unwrap(), Parity::Even);
        }
        assert_eq!("M".parse::<Parity>().unwrap(), Parity::Mark);
        assert!("X".parse::<Parity>().is_err());
    }

    #[test]
    fn test_stopbits_spellings() {
        assert_eq!("1".parse::<StopBits>().unwrap(), StopBits::One);
        assert_eq!("1.5".parse::<StopBits>().unwrap(), StopBits::OnePointFive);
        assert_eq!("two".parse::<StopBits>().unwrap(), StopBits::Two);
        assert!("3".parse::<StopBits>().is_err());
    }

    #[test]
    fn test_bytesize_spellings() {
        assert_eq!("7".parse::<ByteSize>().unwrap(), ByteSize::Seven);
        assert_eq!("FIVEBITS".parse::<ByteSize>().unwrap(), ByteSize::Five);
        assert!("9".parse::<ByteSize>().is_err());
    }

    #[test]
    fn test_deserialize_coerces_options() {
        let yaml = r#"
port: /dev/ttyS0
baudrate: 19200
parity: e
stopbits: 1.5
bytesize: "7"
terminator: "\r"
timeout: 250ms
"#;
        let config: SerialConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.stopbits, StopBits::OnePointFive);
        assert_eq!(config.bytesize, ByteSize::Seven);
        assert_eq!(config.terminator, "\r");
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.default_n_attempts_read_text_nonempty, 10);
    }

    #[test]
    fn test_deserialize_rejects_bad_option() {
        let yaml = "port: COM1\nbytesize: 9\n";
        assert!(serde_yaml::from_str::<SerialConfig>(yaml).is_err());
    }

    #[test]
    fn test_serialize_reports_given_values() {
        let config = SerialConfig::builder()
            .port("COM2")
            .baudrate(115_200)
            .parity(Parity::Odd)
            .stopbits(StopBits::Two)
            .bytesize(ByteSize::Seven)
            .build()
            .unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: SerialConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, config);
    }
}
