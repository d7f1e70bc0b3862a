//! Offset-addressed configuration protocol (V1).
//!
//! Older firmware exposes every setting through a single characteristic
//! carrying one fixed-size blob. A poll reads the whole blob and slices
//! each field at its fixed byte offset, so all values observed in one tick
//! are mutually consistent. A write targets one field with a 2-byte
//! payload: `[offset, new value]`.
//!
//! # Blob layout
//!
//! ```text
//! 0..=3    firmware version major/minor/patch/alpha
//! 30       display type
//! 70..=71  RTC clock pin / data pin
//! 128..137 behavior settings, one byte each (show mode, brightness
//!          min/max, page durations, allow-unstable flag)
//! ```
//!
//! The client permanently stops polling when the device reports the
//! characteristic as missing - that device speaks V2 only, and the
//! resolver uses the stop as its "not V1" signal.

use crate::config::{ConfigError, ConfigSnapshot, DisplayType, RtcPins, Setting, ShowMode};
use crate::transport::{ConnectionState, Transport, TransportError};
use crate::version::FirmwareVersion;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Characteristic carrying the whole V1 config blob.
pub const CHARACTERISTIC: u16 = 0xff02;

/// Poll cadence for the full blob read.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum blob size covering every addressed field.
pub const BLOB_LEN: usize = 138;

/// Field offsets within the blob.
mod offset {
    pub const VERSION_MAJOR: usize = 0;
    pub const VERSION_MINOR: usize = 1;
    pub const VERSION_PATCH: usize = 2;
    pub const VERSION_ALPHA: usize = 3;
    pub const DISPLAY_TYPE: usize = 30;
    pub const RTC_CLOCK_PIN: usize = 70;
    pub const RTC_DATA_PIN: usize = 71;
    pub const SHOW_MODE: usize = 128;
    pub const MIN_BRIGHTNESS: usize = 129;
    pub const MAX_BRIGHTNESS: usize = 130;
    pub const SHOW_TIME: usize = 131;
    pub const SHOW_DATE: usize = 132;
    pub const SHOW_DAY_OF_WEEK: usize = 133;
    pub const SHOW_AMBIENT_TEMP: usize = 134;
    pub const SHOW_OUTDOOR_TEMP: usize = 135;
    pub const ALLOW_UNSTABLE_FIRMWARE: usize = 136;
    pub const SHOW_WEATHER_ICON: usize = 137;
}

/// Blob offset a setting is written at.
pub fn setting_offset(setting: Setting) -> u8 {
    let offset = match setting {
        Setting::ShowMode => offset::SHOW_MODE,
        Setting::MinBrightness => offset::MIN_BRIGHTNESS,
        Setting::MaxBrightness => offset::MAX_BRIGHTNESS,
        Setting::ShowTime => offset::SHOW_TIME,
        Setting::ShowDate => offset::SHOW_DATE,
        Setting::ShowDayOfWeek => offset::SHOW_DAY_OF_WEEK,
        Setting::ShowAmbientTemp => offset::SHOW_AMBIENT_TEMP,
        Setting::ShowOutdoorTemp => offset::SHOW_OUTDOOR_TEMP,
        Setting::AllowUnstableFirmware => offset::ALLOW_UNSTABLE_FIRMWARE,
        Setting::ShowWeatherIcon => offset::SHOW_WEATHER_ICON,
    };
    offset as u8
}

/// Settings decoded from one blob read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V1Settings {
    pub firmware_version: FirmwareVersion,
    pub display_type: DisplayType,
    pub show_mode: ShowMode,
    pub min_brightness: u8,
    pub max_brightness: u8,
    pub show_time_secs: u8,
    pub show_date_secs: u8,
    pub show_day_of_week_secs: u8,
    pub show_ambient_temp_secs: u8,
    pub show_outdoor_temp_secs: u8,
    pub show_weather_icon_secs: u8,
    pub allow_unstable_firmware: bool,
    pub rtc_pins: RtcPins,
}

impl Default for V1Settings {
    fn default() -> Self {
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
            rtc_pins: RtcPins { clock: 0, data: 0 },
        }
    }
}

impl V1Settings {
    /// Slice every field out of one blob.
    pub fn decode(blob: &[u8]) -> Result<Self, ConfigError> {
        if blob.len() < BLOB_LEN {
            return Err(ConfigError::InvalidPayload {
                characteristic: CHARACTERISTIC,
                reason: format!("blob too short: {} bytes, need {}", blob.len(), BLOB_LEN),
            });
        }

        Ok(Self {
            firmware_version: FirmwareVersion::new(
                blob[offset::VERSION_MAJOR],
                blob[offset::VERSION_MINOR],
                blob[offset::VERSION_PATCH],
                blob[offset::VERSION_ALPHA],
            ),
            display_type: DisplayType::from_wire(blob[offset::DISPLAY_TYPE]),
            show_mode: ShowMode::from_wire(blob[offset::SHOW_MODE]),
            min_brightness: blob[offset::MIN_BRIGHTNESS],
            max_brightness: blob[offset::MAX_BRIGHTNESS],
            show_time_secs: blob[offset::SHOW_TIME],
            show_date_secs: blob[offset::SHOW_DATE],
            show_day_of_week_secs: blob[offset::SHOW_DAY_OF_WEEK],
            show_ambient_temp_secs: blob[offset::SHOW_AMBIENT_TEMP],
            show_outdoor_temp_secs: blob[offset::SHOW_OUTDOOR_TEMP],
            show_weather_icon_secs: blob[offset::SHOW_WEATHER_ICON],
            allow_unstable_firmware: blob[offset::ALLOW_UNSTABLE_FIRMWARE] != 0,
            rtc_pins: RtcPins {
                clock: blob[offset::RTC_CLOCK_PIN],
                data: blob[offset::RTC_DATA_PIN],
            },
        })
    }
}

impl From<V1Settings> for ConfigSnapshot {
    fn from(settings: V1Settings) -> Self {
        Self {
            firmware_version: settings.firmware_version,
            display_type: settings.display_type,
            show_mode: settings.show_mode,
            min_brightness: settings.min_brightness,
            max_brightness: settings.max_brightness,
            show_time_secs: settings.show_time_secs,
            show_date_secs: settings.show_date_secs,
            show_day_of_week_secs: settings.show_day_of_week_secs,
            show_ambient_temp_secs: settings.show_ambient_temp_secs,
            show_outdoor_temp_secs: settings.show_outdoor_temp_secs,
            show_weather_icon_secs: settings.show_weather_icon_secs,
            allow_unstable_firmware: settings.allow_unstable_firmware,
            rtc_pins: Some(settings.rtc_pins),
            location: None,
        }
    }
}

#[derive(Default)]
struct Shared {
    settings: V1Settings,
    fetch_count: u64,
    stopped: bool,
}

/// Polling client for the offset-addressed protocol.
///
/// Reads the full blob every [`POLL_INTERVAL`] while the transport is
/// connected. The fetch counter advances on every attempt, successful or
/// not, so the resolver can tell "V1 never answered" apart from "V1 not
/// probed yet".
pub struct ConfigV1Client {
    transport: Arc<Transport>,
    shared: Arc<Mutex<Shared>>,
    cancel: CancellationToken,
}

impl ConfigV1Client {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self {
            transport,
            shared: Arc::new(Mutex::new(Shared::default())),
            cancel: CancellationToken::new(),
        }
    }

    /// Start the poll task.
    pub fn start(&self) {
        let transport = self.transport.clone();
        let shared = self.shared.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        Self::fetch_tick(&transport, &shared, &cancel).await;
                    }
                }
            }
            debug!("config v1 poller shut down");
        });
    }

    /// Stop polling permanently. Idempotent.
    pub fn stop(&self) {
        Self::halt(&self.shared, &self.cancel);
    }

    /// Whether polling has been stopped (explicitly or because the device
    /// lacks the V1 characteristic).
    pub fn is_stopped(&self) -> bool {
        self.shared.lock().unwrap().stopped
    }

    /// Number of fetch attempts so far, including failed ones.
    pub fn fetch_count(&self) -> u64 {
        self.shared.lock().unwrap().fetch_count
    }

    /// Latest decoded settings (defaults before the first successful poll).
    pub fn settings(&self) -> V1Settings {
        self.shared.lock().unwrap().settings.clone()
    }

    /// Firmware version from the latest poll.
    pub fn firmware_version(&self) -> FirmwareVersion {
        self.shared.lock().unwrap().settings.firmware_version
    }

    /// Write one setting as a `[offset, value]` pair.
    ///
    /// The cached snapshot is updated once the write is accepted; failed
    /// writes are reported and never retried here.
    pub async fn set(&self, setting: Setting, value: u8) -> Result<(), ConfigError> {
        self.transport
            .write(CHARACTERISTIC, &[setting_offset(setting), value])
            .await?;

        let mut shared = self.shared.lock().unwrap();
        apply(&mut shared.settings, setting, value);
        Ok(())
    }

    async fn fetch_tick(
        transport: &Arc<Transport>,
        shared: &Arc<Mutex<Shared>>,
        cancel: &CancellationToken,
    ) {
        if transport.state() != ConnectionState::Connected {
            return;
        }

        let result = transport.read(CHARACTERISTIC).await;
        shared.lock().unwrap().fetch_count += 1;

        match result {
            Ok(blob) => match V1Settings::decode(&blob) {
                Ok(settings) => {
                    shared.lock().unwrap().settings = settings;
                }
                Err(e) => warn!("config v1: {}", e),
            },
            Err(TransportError::CharacteristicMissing(id)) => {
                warn!(
                    "config v1: characteristic 0x{:04x} missing, assuming v2-only device",
                    id
                );
                Self::halt(shared, cancel);
            }
            Err(e) => debug!("config v1 fetch failed: {}", e),
        }
    }

    fn halt(shared: &Arc<Mutex<Shared>>, cancel: &CancellationToken) {
        {
            let mut shared = shared.lock().unwrap();
            if shared.stopped {
                return;
            }
            shared.stopped = true;
        }
        cancel.cancel();
        info!("v1 client has been stopped");
    }
}

impl Drop for ConfigV1Client {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn apply(settings: &mut V1Settings, setting: Setting, value: u8) {
    match setting {
        Setting::ShowMode => settings.show_mode = ShowMode::from_wire(value),
        Setting::MinBrightness => settings.min_brightness = value,
        Setting::MaxBrightness => settings.max_brightness = value,
        Setting::ShowTime => settings.show_time_secs = value,
        Setting::ShowDate => settings.show_date_secs = value,
        Setting::ShowDayOfWeek => settings.show_day_of_week_secs = value,
        Setting::ShowAmbientTemp => settings.show_ambient_temp_secs = value,
        Setting::ShowOutdoorTemp => settings.show_outdoor_temp_secs = value,
        Setting::AllowUnstableFirmware => settings.allow_unstable_firmware = value != 0,
        Setting::ShowWeatherIcon => settings.show_weather_icon_secs = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockPeripheral;

    fn blob_with(fields: &[(usize, u8)]) -> Vec<u8> {
        let mut blob = vec![0u8; BLOB_LEN];
        for &(offset, value) in fields {
            blob[offset] = value;
        }
        blob
    }

    // ==================== Codec Tests ====================

    #[test]
    fn test_decode_version_bytes() {
        let blob = blob_with(&[(0, 0), (1, 1), (2, 3), (3, 0)]);
        let settings = V1Settings::decode(&blob).unwrap();
        assert_eq!(settings.firmware_version, FirmwareVersion::new(0, 1, 3, 0));
    }

    #[test]
    fn test_decode_behavior_fields() {
        let blob = blob_with(&[
            (offset::DISPLAY_TYPE, 2),
            (offset::SHOW_MODE, 1),
            (offset::MIN_BRIGHTNESS, 3),
            (offset::MAX_BRIGHTNESS, 12),
            (offset::SHOW_TIME, 25),
            (offset::SHOW_DATE, 6),
            (offset::SHOW_DAY_OF_WEEK, 7),
            (offset::SHOW_AMBIENT_TEMP, 8),
            (offset::SHOW_OUTDOOR_TEMP, 9),
            (offset::ALLOW_UNSTABLE_FIRMWARE, 1),
            (offset::SHOW_WEATHER_ICON, 4),
            (offset::RTC_CLOCK_PIN, 22),
            (offset::RTC_DATA_PIN, 21),
        ]);
        let settings = V1Settings::decode(&blob).unwrap();

        assert_eq!(settings.display_type, DisplayType::Ws2812_32x16);
        assert_eq!(settings.show_mode, ShowMode::MultiLine);
        assert_eq!(settings.min_brightness, 3);
        assert_eq!(settings.max_brightness, 12);
        assert_eq!(settings.show_time_secs, 25);
        assert_eq!(settings.show_date_secs, 6);
        assert_eq!(settings.show_day_of_week_secs, 7);
        assert_eq!(settings.show_ambient_temp_secs, 8);
        assert_eq!(settings.show_outdoor_temp_secs, 9);
        assert!(settings.allow_unstable_firmware);
        assert_eq!(settings.show_weather_icon_secs, 4);
        assert_eq!(settings.rtc_pins, RtcPins { clock: 22, data: 21 });
    }

    #[test]
    fn test_decode_short_blob_fails() {
        let result = V1Settings::decode(&[0u8; 64]);
        assert!(matches!(result, Err(ConfigError::InvalidPayload { .. })));
    }

    #[test]
    fn test_setting_offsets_match_layout() {
        assert_eq!(setting_offset(Setting::ShowMode), 128);
        assert_eq!(setting_offset(Setting::MinBrightness), 129);
        assert_eq!(setting_offset(Setting::MaxBrightness), 130);
        assert_eq!(setting_offset(Setting::ShowTime), 131);
        assert_eq!(setting_offset(Setting::ShowDate), 132);
        assert_eq!(setting_offset(Setting::ShowDayOfWeek), 133);
        assert_eq!(setting_offset(Setting::ShowAmbientTemp), 134);
        assert_eq!(setting_offset(Setting::ShowOutdoorTemp), 135);
        assert_eq!(setting_offset(Setting::AllowUnstableFirmware), 136);
        assert_eq!(setting_offset(Setting::ShowWeatherIcon), 137);
    }

    // ==================== Client Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_poll_populates_settings() {
        let link = MockPeripheral::new();
        link.set_characteristic(
            CHARACTERISTIC,
            blob_with(&[(1, 2), (offset::MIN_BRIGHTNESS, 5)]),
        );
        let transport = crate::transport::Transport::spawn(Box::new(link.clone()));
        transport.connect().await.unwrap();

        let client = ConfigV1Client::new(transport);
        client.start();

        tokio::time::sleep(POLL_INTERVAL + Duration::from_millis(100)).await;

        assert!(client.fetch_count() >= 1);
        let settings = client.settings();
        assert_eq!(settings.firmware_version, FirmwareVersion::new(0, 2, 0, 0));
        assert_eq!(settings.min_brightness, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_skipped_while_disconnected() {
        let link = MockPeripheral::new();
        link.set_characteristic(CHARACTERISTIC, blob_with(&[]));
        let transport = crate::transport::Transport::spawn(Box::new(link.clone()));

        let client = ConfigV1Client::new(transport);
        client.start();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(client.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_characteristic_stops_polling() {
        let link = MockPeripheral::new();
        let transport = crate::transport::Transport::spawn(Box::new(link.clone()));
        transport.connect().await.unwrap();

        let client = ConfigV1Client::new(transport);
        client.start();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(client.is_stopped());
        let count = client.fetch_count();
        assert!(count >= 1);

        // Installing the characteristic later must not revive the poller.
        link.set_characteristic(CHARACTERISTIC, blob_with(&[]));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(client.fetch_count(), count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let link = MockPeripheral::new();
        let transport = crate::transport::Transport::spawn(Box::new(link.clone()));
        let client = ConfigV1Client::new(transport);
        client.start();

        client.stop();
        client.stop();
        assert!(client.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_then_poll_round_trip() {
        let link = MockPeripheral::new();
        link.set_characteristic(
            CHARACTERISTIC,
            blob_with(&[(offset::MAX_BRIGHTNESS, 15), (offset::SHOW_DATE, 5)]),
        );
        let transport = crate::transport::Transport::spawn(Box::new(link.clone()));
        transport.connect().await.unwrap();

        let client = ConfigV1Client::new(transport);
        client.start();
        tokio::time::sleep(POLL_INTERVAL + Duration::from_millis(100)).await;

        client.set(Setting::MinBrightness, 7).await.unwrap();
        assert_eq!(link.last_write(), Some((CHARACTERISTIC, vec![129, 7])));

        // Device applies the 2-byte write into its blob; the next poll must
        // read the new value back and leave unrelated fields untouched.
        let (_, payload) = link.last_write().unwrap();
        let mut blob = link.characteristic(CHARACTERISTIC).unwrap();
        blob[payload[0] as usize] = payload[1];
        link.set_characteristic(CHARACTERISTIC, blob);

        tokio::time::sleep(POLL_INTERVAL + Duration::from_millis(100)).await;
        let settings = client.settings();
        assert_eq!(settings.min_brightness, 7);
        assert_eq!(settings.max_brightness, 15);
        assert_eq!(settings.show_date_secs, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_is_surfaced() {
        let link = MockPeripheral::new();
        let transport = crate::transport::Transport::spawn(Box::new(link.clone()));

        let client = ConfigV1Client::new(transport);
        let result = client.set(Setting::ShowMode, 1).await;
        assert_eq!(
            result,
            Err(ConfigError::Transport(TransportError::NotConnected))
        );
    }
}
