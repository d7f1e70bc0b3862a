//! GATT transport over a single persistent wireless link.
//!
//! The device exposes one primary service (id [`SERVICE_ID`]) containing
//! 16-bit addressed characteristics that support read and
//! write-without-response. A platform wireless stack satisfies the
//! [`PeripheralLink`] contract; [`Transport`] owns that link, serializes
//! every operation through one lock, and derives an observable
//! [`ConnectionState`] with a periodic liveness check.
//!
//! # Example
//!
//! ```ignore
//! let transport = Transport::spawn(Box::new(platform_link));
//! transport.connect().await?;
//!
//! let blob = transport.read(0xff02).await?;
//! transport.write(0xff02, &[128, 1]).await?;
//!
//! let mut state = transport.subscribe();
//! state.changed().await.ok(); // woken on connect/disconnect transitions
//! ```

use async_trait::async_trait;
use log::{debug, info};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

#[cfg(any(test, feature = "mock"))]
mod mock;

#[cfg(any(test, feature = "mock"))]
pub use mock::MockPeripheral;

/// 16-bit id of the device's primary configuration service.
pub const SERVICE_ID: u16 = 0xffff;

/// How often the liveness check samples the underlying link.
pub const LIVENESS_INTERVAL: Duration = Duration::from_millis(500);

/// Observable state of the transport connection.
///
/// Mutated only by [`Transport`]; consumers watch it via
/// [`Transport::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No usable link to the device.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The link is up and operations are allowed.
    Connected,
}

/// Contract satisfied by a platform's short-range wireless stack.
///
/// Implementations resolve the primary service on `open` and address
/// characteristics by their 16-bit id. Writes are write-without-response:
/// no application-level ack is expected.
#[async_trait]
pub trait PeripheralLink: Send + Sync {
    /// Establish the physical link and resolve the primary service.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Whether the underlying link currently reports itself as up.
    fn is_up(&self) -> bool;

    /// Read the value of a characteristic.
    async fn read(&mut self, characteristic: u16) -> Result<Vec<u8>, TransportError>;

    /// Write a characteristic value without response.
    async fn write(&mut self, characteristic: u16, data: &[u8]) -> Result<(), TransportError>;
}

/// The single shared connection to the device.
///
/// All reads and writes funnel through one async mutex, so exactly one
/// transport operation is in flight at a time even though several pollers
/// run concurrently. A background task samples link liveness every
/// [`LIVENESS_INTERVAL`] and forces [`ConnectionState::Disconnected`] when
/// the link has silently dropped. State transitions are deduplicated:
/// watchers are notified exactly once per change.
pub struct Transport {
    /// The platform link; the mutex is the serialization point.
    link: Mutex<Box<dyn PeripheralLink>>,
    /// Connection state, observable through [`Transport::subscribe`].
    state_tx: watch::Sender<ConnectionState>,
    /// Cancellation for the liveness task.
    cancel: CancellationToken,
}

impl Transport {
    /// Create the transport and start its liveness task.
    ///
    /// The task holds only a weak reference, so dropping the last `Arc`
    /// shuts it down.
    pub fn spawn(link: Box<dyn PeripheralLink>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let transport = Arc::new(Self {
            link: Mutex::new(link),
            state_tx,
            cancel: cancel.clone(),
        });

        let weak = Arc::downgrade(&transport);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LIVENESS_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(transport) = weak.upgrade() else { break };
                        transport.liveness_tick().await;
                    }
                }
            }
            debug!("transport liveness task shut down");
        });

        transport
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    ///
    /// Each transition is delivered once; setting the same state twice does
    /// not wake watchers.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Connect to the device.
    ///
    /// Fails with [`TransportError::AlreadyConnected`] when a connection is
    /// already established. On failure the state rolls back to
    /// `Disconnected`.
    pub async fn connect(&self) -> Result<(), TransportError> {
        if self.state() == ConnectionState::Connected {
            return Err(TransportError::AlreadyConnected);
        }

        self.set_state(ConnectionState::Connecting);

        let result = {
            let mut link = self.link.lock().await;
            link.open().await
        };

        match result {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Read a characteristic value.
    ///
    /// Fails with [`TransportError::NotConnected`] outside the `Connected`
    /// state; a link found dead under the lock also forces the state to
    /// `Disconnected`.
    pub async fn read(&self, characteristic: u16) -> Result<Vec<u8>, TransportError> {
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }

        let mut link = self.link.lock().await;
        if !link.is_up() {
            self.set_state(ConnectionState::Disconnected);
            return Err(TransportError::NotConnected);
        }
        link.read(characteristic).await
    }

    /// Write a characteristic value without response.
    ///
    /// Same connection-state rules as [`Transport::read`].
    pub async fn write(&self, characteristic: u16, data: &[u8]) -> Result<(), TransportError> {
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }

        let mut link = self.link.lock().await;
        if !link.is_up() {
            self.set_state(ConnectionState::Disconnected);
            return Err(TransportError::NotConnected);
        }
        link.write(characteristic, data).await
    }

    /// Liveness sample: a dropped link forces `Disconnected` unless a
    /// connection attempt is in flight.
    async fn liveness_tick(&self) {
        let up = self.link.lock().await.is_up();
        if !up && self.state() != ConnectionState::Connecting {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!("transport: {:?} -> {:?}", *current, next);
            *current = next;
            true
        });
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Errors surfaced by the transport and its link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Operation attempted while the transport is not connected.
    NotConnected,
    /// `connect` called while already connected.
    AlreadyConnected,
    /// The link could not be established.
    ConnectFailed(String),
    /// The device does not expose the requested characteristic.
    CharacteristicMissing(u16),
    /// A read was rejected by the underlying link.
    ReadFailed(String),
    /// A write was rejected by the underlying link.
    WriteFailed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::AlreadyConnected => write!(f, "already connected"),
            Self::ConnectFailed(reason) => write!(f, "connect failed: {}", reason),
            Self::CharacteristicMissing(id) => {
                write!(f, "no characteristic matching id 0x{:04x}", id)
            }
            Self::ReadFailed(reason) => write!(f, "read failed: {}", reason),
            Self::WriteFailed(reason) => write!(f, "write failed: {}", reason),
        }
    }
}

impl std::error::Error for TransportError {}
