//! Companion-side configuration link for the Cronus clock.
//!
//! The clock is configured over a single short-range wireless connection.
//! This crate owns that connection and everything spoken over it: the
//! serialized GATT transport, the two config protocol generations (an
//! offset-addressed blob for old firmware, per-field characteristics for
//! new firmware), the resolver that migrates between them at runtime, and
//! the Wi-Fi provisioning client. UI layers consume three things only: the
//! observable connection state, configuration snapshots with typed
//! setters, and the Wi-Fi status with its commands.
//!
//! # Example
//!
//! ```ignore
//! use cronus_link::{ConfigService, Transport, WifiClient};
//!
//! let transport = Transport::spawn(Box::new(platform_link));
//! transport.connect().await?;
//!
//! let config = ConfigService::new(transport.clone());
//! config.start(); // polls V1, migrates to V2 when the firmware allows
//!
//! let wifi = WifiClient::new(transport.clone());
//! wifi.start();
//!
//! let snapshot = config.snapshot();
//! config.set_max_brightness(12).await?;
//! ```

pub mod config;
pub mod transport;
pub mod version;
pub mod wifi;

// Re-export commonly used items
pub use config::{
    ConfigError, ConfigService, ConfigSnapshot, DisplayType, Location, ProtocolState, RtcPins,
    Setting, ShowMode, MIGRATION_THRESHOLD,
};
pub use transport::{ConnectionState, PeripheralLink, Transport, TransportError};
pub use version::FirmwareVersion;
pub use wifi::{Credentials, WifiClient, WifiError, WifiState, WifiStatus};

// Re-export the in-memory peripheral (only with the mock feature)
#[cfg(any(test, feature = "mock"))]
pub use transport::MockPeripheral;
