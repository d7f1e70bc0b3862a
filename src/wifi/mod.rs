//! Wi-Fi provisioning over the config link.
//!
//! The clock joins the owner's Wi-Fi to fetch time and weather; this
//! module provisions it over the wireless config link. One characteristic
//! carries everything: the device publishes a packed status blob
//! (connection state, error reason, connected SSID, scan results) and
//! accepts scan/connect/disconnect command payloads.
//!
//! # Components
//!
//! - [`status`] - status blob codec, command encoding, [`Credentials`]
//! - [`client`] - [`WifiClient`], the poll loop with automatic scanning

pub mod client;
pub mod status;

pub use client::{WifiClient, POLL_INTERVAL, SCAN_HOLDOFF};
pub use status::{
    decode_status, encode_connect, encode_disconnect, encode_scan, Credentials, WifiError,
    WifiState, WifiStatus, MAX_PASSWORD_LEN, MAX_SSID_LEN,
};
