//! Wi-Fi provisioning client.
//!
//! Polls the status characteristic, keeps the latest decoded
//! [`WifiStatus`], and sends provisioning commands. Runs independently of
//! the config protocol version: polling is useful as soon as the transport
//! connects.
//!
//! While the device reports itself disconnected, the poller asks it to
//! scan - but at most once every [`SCAN_HOLDOFF`], so a device that takes
//! a few polls to produce results is not spammed with scan commands.

use super::status::{
    decode_status, encode_connect, encode_disconnect, encode_scan, Credentials, WifiState,
    WifiStatus, CHARACTERISTIC,
};
use crate::transport::{ConnectionState, Transport};
use crate::wifi::WifiError;
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Poll cadence for the status blob.
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Minimum spacing between automatic scan commands.
pub const SCAN_HOLDOFF: Duration = Duration::from_secs(7);

#[derive(Default)]
struct Shared {
    status: WifiStatus,
    /// Earliest moment the poller may issue another automatic scan.
    next_scan: Option<Instant>,
}

/// Polling client for the Wi-Fi characteristic.
pub struct WifiClient {
    transport: Arc<Transport>,
    shared: Arc<Mutex<Shared>>,
    cancel: CancellationToken,
}

impl WifiClient {
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
                        Self::poll_tick(&transport, &shared).await;
                    }
                }
            }
            debug!("wifi poller shut down");
        });
    }

    /// Stop polling. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Latest decoded status (defaults before the first successful poll).
    pub fn status(&self) -> WifiStatus {
        self.shared.lock().unwrap().status.clone()
    }

    /// Ask the device to scan for networks now.
    pub async fn request_scan(&self) -> Result<(), WifiError> {
        self.transport
            .write(CHARACTERISTIC, &encode_scan())
            .await?;
        Ok(())
    }

    /// Ask the device to join a network.
    ///
    /// The local state shows `Connecting` until the next poll reports the
    /// device's own view.
    pub async fn request_connect(&self, credentials: &Credentials) -> Result<(), WifiError> {
        self.transport
            .write(CHARACTERISTIC, &encode_connect(credentials))
            .await?;
        self.shared.lock().unwrap().status.state = WifiState::Connecting;
        Ok(())
    }

    /// Ask the device to leave its network.
    pub async fn request_disconnect(&self) -> Result<(), WifiError> {
        self.transport
            .write(CHARACTERISTIC, &encode_disconnect())
            .await?;
        self.shared.lock().unwrap().status.connected_ssid.clear();
        Ok(())
    }

    async fn poll_tick(transport: &Arc<Transport>, shared: &Arc<Mutex<Shared>>) {
        if transport.state() != ConnectionState::Connected {
            return;
        }

        let payload = match transport.read(CHARACTERISTIC).await {
            Ok(payload) => payload,
            Err(e) => {
                debug!("wifi status fetch failed: {}", e);
                return;
            }
        };

        let status = match decode_status(&payload) {
            Ok(status) => status,
            Err(e) => {
                warn!("wifi: {}", e);
                return;
            }
        };

        let scan_due = {
            let mut shared = shared.lock().unwrap();
            let due = status.state == WifiState::Disconnected
                && shared.next_scan.map(|at| Instant::now() >= at).unwrap_or(true);
            shared.status = status;
            if due {
                shared.next_scan = Some(Instant::now() + SCAN_HOLDOFF);
            }
            due
        };

        if scan_due {
            if let Err(e) = transport.write(CHARACTERISTIC, &encode_scan()).await {
                warn!("wifi scan request failed: {}", e);
            }
        }
    }
}

impl Drop for WifiClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
