//! Device configuration protocols.
//!
//! Two mutually incompatible wire protocols read and write the same logical
//! settings:
//!
//! - [`v1`] - one fixed-size blob on a single characteristic, fields
//!   addressed by byte offset (older firmware)
//! - [`v2`] - one characteristic per field with typed payloads
//!
//! [`ConfigService`] hides the split: it starts on V1, watches the reported
//! firmware version, and migrates to V2 exactly once when a new enough
//! firmware is observed. Collaborators only ever see a protocol-agnostic
//! [`ConfigSnapshot`] plus typed setters.

pub mod resolver;
pub mod v1;
pub mod v2;

pub use resolver::{ConfigService, ProtocolState, MIGRATION_THRESHOLD};

use crate::transport::TransportError;
use crate::version::{self, FirmwareVersion};
use std::fmt;

/// Display hardware variants the firmware reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayType {
    /// No display detected.
    #[default]
    None,
    /// MAX7219-driven 32x16 LED matrix.
    Max7219_32x16,
    /// WS2812-driven 32x16 LED matrix.
    Ws2812_32x16,
}

impl DisplayType {
    /// Decode the wire byte; unknown values fall back to `None`.
    pub fn from_wire(byte: u8) -> Self {
        match byte {
            1 => Self::Max7219_32x16,
            2 => Self::Ws2812_32x16,
            _ => Self::None,
        }
    }

    /// The wire byte for this variant.
    pub fn wire(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Max7219_32x16 => 1,
            Self::Ws2812_32x16 => 2,
        }
    }
}

/// How the display lays out its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShowMode {
    /// Everything on one scrolling line.
    #[default]
    SingleLine,
    /// Split across multiple lines.
    MultiLine,
}

impl ShowMode {
    /// Decode the wire byte; unknown values fall back to `SingleLine`.
    pub fn from_wire(byte: u8) -> Self {
        match byte {
            1 => Self::MultiLine,
            _ => Self::SingleLine,
        }
    }

    /// The wire byte for this variant.
    pub fn wire(self) -> u8 {
        match self {
            Self::SingleLine => 0,
            Self::MultiLine => 1,
        }
    }
}

/// Behavior settings writable on both protocols.
///
/// V1 maps each to a blob offset, V2 to its own characteristic; the
/// resolver dispatches through this enum so neither codec leaks into the
/// public setters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    ShowMode,
    MinBrightness,
    MaxBrightness,
    ShowTime,
    ShowDate,
    ShowDayOfWeek,
    ShowAmbientTemp,
    ShowOutdoorTemp,
    AllowUnstableFirmware,
    ShowWeatherIcon,
}

impl Setting {
    /// Every writable setting, in blob-offset order.
    pub const ALL: [Setting; 10] = [
        Setting::ShowMode,
        Setting::MinBrightness,
        Setting::MaxBrightness,
        Setting::ShowTime,
        Setting::ShowDate,
        Setting::ShowDayOfWeek,
        Setting::ShowAmbientTemp,
        Setting::ShowOutdoorTemp,
        Setting::AllowUnstableFirmware,
        Setting::ShowWeatherIcon,
    ];
}

/// RTC pin assignments (V1 firmware only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcPins {
    /// Clock line GPIO.
    pub clock: u8,
    /// Data line GPIO.
    pub data: u8,
}

/// Weather location (V2 firmware only).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Location {
    pub name: String,
    pub latitude: f32,
    pub longitude: f32,
}

/// A protocol-agnostic view of the device configuration.
///
/// Populated by the first successful poll; fields derived from a single
/// blob read are mutually consistent, per-characteristic fields may lag
/// each other by one refresh. Fields the active protocol cannot provide
/// are `None` here and fail distinctly through the dedicated accessors on
/// [`ConfigService`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub firmware_version: FirmwareVersion,
    pub display_type: DisplayType,
    pub show_mode: ShowMode,
    pub min_brightness: u8,
    pub max_brightness: u8,
    /// Seconds the time page stays on screen.
    pub show_time_secs: u8,
    pub show_date_secs: u8,
    pub show_day_of_week_secs: u8,
    pub show_ambient_temp_secs: u8,
    pub show_outdoor_temp_secs: u8,
    pub show_weather_icon_secs: u8,
    pub allow_unstable_firmware: bool,
    /// Present only while the offset-addressed protocol serves settings.
    pub rtc_pins: Option<RtcPins>,
    /// Present only once the per-field protocol serves settings.
    pub location: Option<Location>,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        // Defaults mirror what the firmware ships with before the first poll
        // lands.
        Self {
            firmware_version: FirmwareVersion::UNKNOWN,
            display_type: DisplayType::None,
            show_mode: ShowMode::SingleLine,
            min_brightness: 0,
            max_brightness: 15,
            show_time_secs: 30,
            show_date_secs: 5,
            show_day_of_week_secs: 5,
            show_ambient_temp_secs: 5,
            show_outdoor_temp_secs: 5,
            show_weather_icon_secs: 5,
            allow_unstable_firmware: false,
            rtc_pins: None,
            location: None,
        }
    }
}

/// Errors surfaced by the configuration layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The transport rejected or failed the operation.
    Transport(TransportError),
    /// The field is not implemented by the active protocol version.
    Unsupported { field: &'static str },
    /// The device sent a firmware version string that does not parse.
    Version(version::ParseError),
    /// A characteristic payload did not match its expected shape.
    InvalidPayload { characteristic: u16, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {}", e),
            Self::Unsupported { field } => {
                write!(f, "{} is not supported by the active protocol version", field)
            }
            Self::Version(e) => write!(f, "firmware version: {}", e),
            Self::InvalidPayload {
                characteristic,
                reason,
            } => write!(
                f,
                "invalid payload on characteristic 0x{:04x}: {}",
                characteristic, reason
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Version(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for ConfigError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<version::ParseError> for ConfigError {
    fn from(e: version::ParseError) -> Self {
        Self::Version(e)
    }
}
