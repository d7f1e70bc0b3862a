//! Protocol version resolver.
//!
//! The device's config protocol depends on its firmware, and the firmware
//! can only be learned by talking to the device. The resolver starts the V1
//! poller, watches the version it reports, and migrates to V2 exactly once
//! when the device either identifies itself as new enough or cannot be
//! identified over V1 at all (a V2-only device has no V1 characteristic and
//! keeps reporting the `0.0.0` sentinel, which is treated as "assume
//! newest").
//!
//! # State machine
//!
//! ```text
//! DetectingV1 --first fetch, version <= threshold--> UsingV1
//! DetectingV1 | UsingV1 --sentinel or version > threshold--> MigratingToV2
//! MigratingToV2 --V2 full refresh done--> UsingV2
//! ```
//!
//! The migration is one-way: the V1 poller and the detector are cancelled
//! at the `MigratingToV2` transition and never restarted.

use crate::config::v1::ConfigV1Client;
use crate::config::v2::ConfigV2Client;
use crate::config::{ConfigError, ConfigSnapshot, Location, RtcPins, Setting, ShowMode};
use crate::transport::{ConnectionState, Transport};
use crate::version::FirmwareVersion;
use log::{debug, info};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Firmware versions strictly above this speak V2.
pub const MIGRATION_THRESHOLD: FirmwareVersion = FirmwareVersion::new(0, 0, 1, 0);

/// How often the detector re-checks the reported firmware version.
pub const DETECTOR_INTERVAL: Duration = Duration::from_millis(500);

/// Which protocol currently serves configuration data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    /// V1 is polling but has not produced a usable version yet.
    DetectingV1,
    /// The device identified itself as V1-era firmware.
    UsingV1,
    /// Migration triggered; the V2 full read is in flight.
    MigratingToV2,
    /// All traffic goes through V2. Terminal.
    UsingV2,
}

impl ProtocolState {
    /// Whether snapshot fields are served from the V2 cache.
    fn serves_v2(self) -> bool {
        matches!(self, Self::MigratingToV2 | Self::UsingV2)
    }
}

/// Protocol-agnostic configuration facade.
///
/// Collaborators read [`ConfigSnapshot`]s and call typed setters; the
/// resolver dispatches to whichever codec the current [`ProtocolState`]
/// designates. Fields one protocol cannot serve fail with
/// [`ConfigError::Unsupported`] instead of defaulting.
pub struct ConfigService {
    transport: Arc<Transport>,
    v1: Arc<ConfigV1Client>,
    v2: Arc<ConfigV2Client>,
    state: Arc<Mutex<ProtocolState>>,
    detector_cancel: CancellationToken,
}

impl ConfigService {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self {
            v1: Arc::new(ConfigV1Client::new(transport.clone())),
            v2: Arc::new(ConfigV2Client::new(transport.clone())),
            transport,
            state: Arc::new(Mutex::new(ProtocolState::DetectingV1)),
            detector_cancel: CancellationToken::new(),
        }
    }

    /// Start the V1 poller and the migration detector.
    pub fn start(&self) {
        self.v1.start();

        let transport = self.transport.clone();
        let v1 = self.v1.clone();
        let v2 = self.v2.clone();
        let state = self.state.clone();
        let cancel = self.detector_cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DETECTOR_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if Self::detect_tick(&transport, &v1, &v2, &state).await {
                            cancel.cancel();
                            break;
                        }
                    }
                }
            }
            debug!("protocol detector shut down");
        });
    }

    /// One detector pass; returns true once migration has completed.
    async fn detect_tick(
        transport: &Arc<Transport>,
        v1: &Arc<ConfigV1Client>,
        v2: &Arc<ConfigV2Client>,
        state: &Arc<Mutex<ProtocolState>>,
    ) -> bool {
        // V1 must have attempted at least one fetch before the reported
        // version means anything.
        if transport.state() != ConnectionState::Connected || v1.fetch_count() == 0 {
            return false;
        }

        let version = v1.firmware_version();
        if !version.is_unknown() && version <= MIGRATION_THRESHOLD {
            let mut state = state.lock().unwrap();
            if *state == ProtocolState::DetectingV1 {
                info!("config: staying on v1 (firmware {})", version);
                *state = ProtocolState::UsingV1;
            }
            return false;
        }

        info!("config: switching to v2 (firmware {})", version);
        *state.lock().unwrap() = ProtocolState::MigratingToV2;
        v1.stop();
        v2.refresh().await;
        *state.lock().unwrap() = ProtocolState::UsingV2;
        true
    }

    /// Current protocol state.
    pub fn protocol(&self) -> ProtocolState {
        *self.state.lock().unwrap()
    }

    /// Current transport connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Subscribe to transport connection transitions.
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.transport.subscribe()
    }

    /// Snapshot of the current configuration from the active codec.
    pub fn snapshot(&self) -> ConfigSnapshot {
        if self.protocol().serves_v2() {
            self.v2.snapshot()
        } else {
            self.v1.settings().into()
        }
    }

    /// Firmware version reported by the active codec.
    pub fn firmware_version(&self) -> FirmwareVersion {
        if self.protocol().serves_v2() {
            self.v2.firmware_version()
        } else {
            self.v1.firmware_version()
        }
    }

    /// Re-fetch invalidated V2 fields. A no-op while V1 serves data (its
    /// poller refreshes everything each tick anyway).
    pub async fn refresh(&self) {
        if self.protocol().serves_v2() {
            self.v2.refresh().await;
        }
    }

    /// Mark one setting stale so the next [`refresh`](Self::refresh)
    /// re-reads it. A no-op while V1 serves data.
    pub fn invalidate(&self, setting: Setting) {
        if self.protocol().serves_v2() {
            self.v2.invalidate(setting);
        }
    }

    // ==================== Setters ====================

    pub async fn set_show_mode(&self, mode: ShowMode) -> Result<(), ConfigError> {
        self.set(Setting::ShowMode, mode.wire()).await
    }

    pub async fn set_min_brightness(&self, value: u8) -> Result<(), ConfigError> {
        self.set(Setting::MinBrightness, value).await
    }

    pub async fn set_max_brightness(&self, value: u8) -> Result<(), ConfigError> {
        self.set(Setting::MaxBrightness, value).await
    }

    pub async fn set_show_time_secs(&self, value: u8) -> Result<(), ConfigError> {
        self.set(Setting::ShowTime, value).await
    }

    pub async fn set_show_date_secs(&self, value: u8) -> Result<(), ConfigError> {
        self.set(Setting::ShowDate, value).await
    }

    pub async fn set_show_day_of_week_secs(&self, value: u8) -> Result<(), ConfigError> {
        self.set(Setting::ShowDayOfWeek, value).await
    }

    pub async fn set_show_ambient_temp_secs(&self, value: u8) -> Result<(), ConfigError> {
        self.set(Setting::ShowAmbientTemp, value).await
    }

    pub async fn set_show_outdoor_temp_secs(&self, value: u8) -> Result<(), ConfigError> {
        self.set(Setting::ShowOutdoorTemp, value).await
    }

    pub async fn set_show_weather_icon_secs(&self, value: u8) -> Result<(), ConfigError> {
        self.set(Setting::ShowWeatherIcon, value).await
    }

    pub async fn set_allow_unstable_firmware(&self, allow: bool) -> Result<(), ConfigError> {
        self.set(Setting::AllowUnstableFirmware, allow as u8).await
    }

    async fn set(&self, setting: Setting, value: u8) -> Result<(), ConfigError> {
        if self.protocol().serves_v2() {
            self.v2.set(setting, value).await
        } else {
            self.v1.set(setting, value).await
        }
    }

    // ==================== Protocol-gated fields ====================

    /// RTC pin assignments; only the offset-addressed protocol carries them.
    pub fn rtc_pins(&self) -> Result<RtcPins, ConfigError> {
        if self.protocol().serves_v2() {
            return Err(ConfigError::Unsupported { field: "RTC pins" });
        }
        Ok(self.v1.settings().rtc_pins)
    }

    /// Weather location; V2-era firmware only.
    pub fn location(&self) -> Result<Location, ConfigError> {
        if !self.protocol().serves_v2() {
            return Err(ConfigError::Unsupported { field: "location" });
        }
        self.v2
            .location()
            .ok_or(ConfigError::Unsupported { field: "location" })
    }

    pub async fn set_location_name(&self, name: &str) -> Result<(), ConfigError> {
        self.location_capable()?;
        self.v2.set_location_name(name).await
    }

    pub async fn set_location_lat(&self, lat: f32) -> Result<(), ConfigError> {
        self.location_capable()?;
        self.v2.set_location_lat(lat).await
    }

    pub async fn set_location_lng(&self, lng: f32) -> Result<(), ConfigError> {
        self.location_capable()?;
        self.v2.set_location_lng(lng).await
    }

    fn location_capable(&self) -> Result<(), ConfigError> {
        if self.protocol().serves_v2() {
            Ok(())
        } else {
            Err(ConfigError::Unsupported { field: "location" })
        }
    }

    /// Tear down the detector and the V1 poller. Idempotent.
    pub fn stop(&self) {
        self.detector_cancel.cancel();
        self.v1.stop();
    }
}

impl Drop for ConfigService {
    fn drop(&mut self) {
        self.detector_cancel.cancel();
    }
}
