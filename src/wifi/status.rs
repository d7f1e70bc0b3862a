//! Wi-Fi status payload codec and provisioning commands.
//!
//! One characteristic carries both directions: the device publishes a
//! status blob that is read-polled, and the app writes short command
//! payloads to it.
//!
//! # Status blob
//!
//! ```text
//! byte 0        connection state (low nibble) | error reason (high nibble)
//! bytes 1..33   connected SSID (when connected) or error description
//! bytes 33..193 five 32-byte SSID slots from the last scan, NUL padded
//! ```
//!
//! # Commands
//!
//! ```text
//! scan        [0x01]
//! connect     [0x02][ssid 32 bytes][password 64 bytes]   (97 bytes total)
//! disconnect  [0x03]
//! ```

use crate::transport::TransportError;
use log::warn;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Characteristic carrying Wi-Fi status and commands.
pub const CHARACTERISTIC: u16 = 0xff01;

/// Maximum SSID length per IEEE 802.11.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum password length for WPA2.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Width of one SSID slot in the status blob.
pub const SLOT_LEN: usize = 32;

/// Number of scan-result slots in the status blob.
pub const SLOT_COUNT: usize = 5;

/// Minimum status blob size covering every slot.
pub const STATUS_LEN: usize = 1 + SLOT_LEN + SLOT_COUNT * SLOT_LEN;

/// Size of the connect command payload.
pub const CONNECT_LEN: usize = 1 + MAX_SSID_LEN + MAX_PASSWORD_LEN;

/// Command opcodes.
mod opcode {
    pub const SCAN: u8 = 1;
    pub const CONNECT: u8 = 2;
    pub const DISCONNECT: u8 = 3;
}

/// Wi-Fi connection state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WifiState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl WifiState {
    /// Decode the low nibble of the status byte.
    ///
    /// Firmware revisions report a few extra transient states; anything
    /// this client does not model decodes as `Disconnected` (the error
    /// nibble and text still carry the details).
    pub fn from_nibble(nibble: u8) -> Self {
        match nibble {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::Connected,
            other => {
                warn!("wifi: unmodeled state nibble {}", other);
                Self::Disconnected
            }
        }
    }
}

/// One decoded status blob. Replaced wholesale on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WifiStatus {
    pub state: WifiState,
    /// Error reason code from the high nibble; 0 means no error.
    pub error_reason: u8,
    /// SSID of the joined network; empty unless `state` is `Connected`.
    pub connected_ssid: String,
    /// Error description from the device; empty when connected.
    pub error_text: String,
    /// Scanned networks, order preserved, duplicates and empty slots
    /// dropped.
    pub scanned_ssids: Vec<String>,
}

/// Decode one status blob.
pub fn decode_status(payload: &[u8]) -> Result<WifiStatus, WifiError> {
    if payload.len() < STATUS_LEN {
        return Err(WifiError::TruncatedStatus { len: payload.len() });
    }

    let state = WifiState::from_nibble(payload[0] & 0x0f);
    let error_reason = payload[0] >> 4;
    let text = trim_nul(&payload[1..1 + SLOT_LEN]);

    let mut scanned_ssids = Vec::new();
    for i in 0..SLOT_COUNT {
        let start = 1 + SLOT_LEN + i * SLOT_LEN;
        let ssid = trim_nul(&payload[start..start + SLOT_LEN]);
        if !ssid.is_empty() && !scanned_ssids.contains(&ssid) {
            scanned_ssids.push(ssid);
        }
    }

    let (connected_ssid, error_text) = if state == WifiState::Connected {
        (text, String::new())
    } else {
        (String::new(), text)
    };

    Ok(WifiStatus {
        state,
        error_reason,
        connected_ssid,
        error_text,
        scanned_ssids,
    })
}

/// Cut a NUL-padded slot down to its string, dropping anything after the
/// first NUL byte.
fn trim_nul(slot: &[u8]) -> String {
    let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..end]).into_owned()
}

/// Credentials for one connect request.
///
/// The password is zeroed when the value is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

impl Credentials {
    /// Create credentials, enforcing the wire-format slot sizes.
    ///
    /// An empty password means an open network.
    pub fn new(
        ssid: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, WifiError> {
        let ssid = ssid.into();
        let password = password.into();

        if ssid.len() > MAX_SSID_LEN {
            return Err(WifiError::SsidTooLong {
                len: ssid.len(),
                max: MAX_SSID_LEN,
            });
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(WifiError::PasswordTooLong {
                len: password.len(),
                max: MAX_PASSWORD_LEN,
            });
        }

        Ok(Self { ssid, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never log the password.
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Encode a scan command.
pub fn encode_scan() -> [u8; 1] {
    [opcode::SCAN]
}

/// Encode a disconnect command.
pub fn encode_disconnect() -> [u8; 1] {
    [opcode::DISCONNECT]
}

/// Encode a connect command: opcode, then NUL-padded SSID and password
/// slots. Slot sizes are guaranteed by [`Credentials::new`].
pub fn encode_connect(credentials: &Credentials) -> [u8; CONNECT_LEN] {
    let mut payload = [0u8; CONNECT_LEN];
    payload[0] = opcode::CONNECT;

    let ssid = credentials.ssid.as_bytes();
    payload[1..1 + ssid.len()].copy_from_slice(ssid);

    let password = credentials.password.as_bytes();
    payload[1 + MAX_SSID_LEN..1 + MAX_SSID_LEN + password.len()].copy_from_slice(password);

    payload
}

/// Errors surfaced by the Wi-Fi client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiError {
    /// SSID exceeds its 32-byte wire slot.
    SsidTooLong { len: usize, max: usize },
    /// Password exceeds its 64-byte wire slot.
    PasswordTooLong { len: usize, max: usize },
    /// Status blob shorter than the fixed layout.
    TruncatedStatus { len: usize },
    /// The transport rejected or failed the operation.
    Transport(TransportError),
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PasswordTooLong { len, max } => {
                write!(f, "password too long: {} bytes (max {})", len, max)
            }
            Self::TruncatedStatus { len } => {
                write!(f, "status blob too short: {} bytes (need {})", len, STATUS_LEN)
            }
            Self::Transport(e) => write!(f, "transport: {}", e),
        }
    }
}

impl std::error::Error for WifiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for WifiError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// Build a status blob for tests.
#[cfg(test)]
pub(crate) fn status_payload(status_byte: u8, text: &str, slots: &[&str]) -> Vec<u8> {
    let mut payload = vec![0u8; STATUS_LEN];
    payload[0] = status_byte;
    payload[1..1 + text.len()].copy_from_slice(text.as_bytes());
    for (i, slot) in slots.iter().enumerate() {
        let start = 1 + SLOT_LEN + i * SLOT_LEN;
        payload[start..start + slot.len()].copy_from_slice(slot.as_bytes());
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Status Decoding Tests ====================

    #[test]
    fn test_decode_connected_with_error_nibble() {
        // 0x12: state 2 (connected), error reason 1.
        let payload = status_payload(0x12, "HomeNet", &[]);
        let status = decode_status(&payload).unwrap();

        assert_eq!(status.state, WifiState::Connected);
        assert_eq!(status.error_reason, 1);
        assert_eq!(status.connected_ssid, "HomeNet");
        assert_eq!(status.error_text, "");
    }

    #[test]
    fn test_decode_disconnected_keeps_error_text() {
        let payload = status_payload(0x40, "wrong password", &[]);
        let status = decode_status(&payload).unwrap();

        assert_eq!(status.state, WifiState::Disconnected);
        assert_eq!(status.error_reason, 4);
        assert_eq!(status.connected_ssid, "");
        assert_eq!(status.error_text, "wrong password");
    }

    #[test]
    fn test_decode_unmodeled_state_nibble() {
        let payload = status_payload(0x04, "", &[]);
        let status = decode_status(&payload).unwrap();
        assert_eq!(status.state, WifiState::Disconnected);
    }

    #[test]
    fn test_ssid_slot_trimming() {
        let payload = status_payload(0x00, "", &["MyNet"]);
        let status = decode_status(&payload).unwrap();
        assert_eq!(status.scanned_ssids, vec!["MyNet"]);
    }

    #[test]
    fn test_empty_slots_are_skipped() {
        let payload = status_payload(0x00, "", &["NetA", "", "NetB"]);
        let status = decode_status(&payload).unwrap();
        assert_eq!(status.scanned_ssids, vec!["NetA", "NetB"]);
    }

    #[test]
    fn test_duplicate_slots_are_dropped() {
        let payload = status_payload(0x00, "", &["NetA", "NetA", "NetB"]);
        let status = decode_status(&payload).unwrap();
        assert_eq!(status.scanned_ssids, vec!["NetA", "NetB"]);
    }

    #[test]
    fn test_slot_content_after_nul_is_ignored() {
        let mut payload = status_payload(0x00, "", &["MyNet"]);
        // Garbage past the terminator within the same slot.
        let start = 1 + SLOT_LEN;
        payload[start + 6] = b'X';
        let status = decode_status(&payload).unwrap();
        assert_eq!(status.scanned_ssids, vec!["MyNet"]);
    }

    #[test]
    fn test_truncated_status_fails() {
        assert_eq!(
            decode_status(&[0u8; 10]),
            Err(WifiError::TruncatedStatus { len: 10 })
        );
    }

    // ==================== Command Encoding Tests ====================

    #[test]
    fn test_scan_and_disconnect_are_single_byte() {
        assert_eq!(encode_scan(), [1]);
        assert_eq!(encode_disconnect(), [3]);
    }

    #[test]
    fn test_connect_payload_layout() {
        let credentials = Credentials::new("Net1", "secret").unwrap();
        let payload = encode_connect(&credentials);

        assert_eq!(payload.len(), 97);
        assert_eq!(payload[0], 2);
        assert_eq!(&payload[1..5], b"Net1");
        assert!(payload[5..33].iter().all(|&b| b == 0));
        assert_eq!(&payload[33..39], b"secret");
        assert!(payload[39..97].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_connect_payload_full_slots() {
        let ssid = "s".repeat(MAX_SSID_LEN);
        let password = "p".repeat(MAX_PASSWORD_LEN);
        let credentials = Credentials::new(ssid, password).unwrap();
        let payload = encode_connect(&credentials);

        assert!(payload[1..33].iter().all(|&b| b == b's'));
        assert!(payload[33..97].iter().all(|&b| b == b'p'));
    }

    // ==================== Credentials Tests ====================

    #[test]
    fn test_credentials_limits() {
        assert!(Credentials::new("a".repeat(32), "").is_ok());
        assert!(matches!(
            Credentials::new("a".repeat(33), ""),
            Err(WifiError::SsidTooLong { .. })
        ));
        assert!(matches!(
            Credentials::new("Net", "p".repeat(65)),
            Err(WifiError::PasswordTooLong { .. })
        ));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials::new("Net", "hunter2").unwrap();
        let debug = format!("{:?}", credentials);
        assert!(!debug.contains("hunter2"));
    }
}
