//! In-memory peripheral for tests.
//!
//! `MockPeripheral` is a [`PeripheralLink`] backed by a characteristic map
//! and a write journal. Handles are cheap clones of shared state, so a test
//! keeps one handle to play the device side while the boxed clone lives
//! inside the transport.

use super::{PeripheralLink, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    up: bool,
    connectable: bool,
    characteristics: HashMap<u16, Vec<u8>>,
    reads: Vec<u16>,
    writes: Vec<(u16, Vec<u8>)>,
}

/// Scriptable in-memory device.
#[derive(Clone)]
pub struct MockPeripheral {
    inner: Arc<Mutex<Inner>>,
}

impl MockPeripheral {
    /// Create a connectable peripheral with no characteristics.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                connectable: true,
                ..Inner::default()
            })),
        }
    }

    /// Install or replace a characteristic value.
    pub fn set_characteristic(&self, id: u16, value: impl Into<Vec<u8>>) {
        self.inner
            .lock()
            .unwrap()
            .characteristics
            .insert(id, value.into());
    }

    /// Remove a characteristic, making reads/writes report it missing.
    pub fn remove_characteristic(&self, id: u16) {
        self.inner.lock().unwrap().characteristics.remove(&id);
    }

    /// Current value of a characteristic, if present.
    pub fn characteristic(&self, id: u16) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().characteristics.get(&id).cloned()
    }

    /// Raise or drop the link out from under the transport.
    pub fn set_link_up(&self, up: bool) {
        self.inner.lock().unwrap().up = up;
    }

    /// Whether future `open` calls succeed.
    pub fn set_connectable(&self, connectable: bool) {
        self.inner.lock().unwrap().connectable = connectable;
    }

    /// Characteristic ids read so far, oldest first.
    pub fn reads(&self) -> Vec<u16> {
        self.inner.lock().unwrap().reads.clone()
    }

    /// All writes observed so far, oldest first.
    pub fn writes(&self) -> Vec<(u16, Vec<u8>)> {
        self.inner.lock().unwrap().writes.clone()
    }

    /// The most recent write, if any.
    pub fn last_write(&self) -> Option<(u16, Vec<u8>)> {
        self.inner.lock().unwrap().writes.last().cloned()
    }

    /// Drain the write journal.
    pub fn take_writes(&self) -> Vec<(u16, Vec<u8>)> {
        std::mem::take(&mut self.inner.lock().unwrap().writes)
    }
}

impl Default for MockPeripheral {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeripheralLink for MockPeripheral {
    async fn open(&mut self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connectable {
            return Err(TransportError::ConnectFailed("link unavailable".into()));
        }
        inner.up = true;
        Ok(())
    }

    fn is_up(&self) -> bool {
        self.inner.lock().unwrap().up
    }

    async fn read(&mut self, characteristic: u16) -> Result<Vec<u8>, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.up {
            return Err(TransportError::ReadFailed("link down".into()));
        }
        inner.reads.push(characteristic);
        inner
            .characteristics
            .get(&characteristic)
            .cloned()
            .ok_or(TransportError::CharacteristicMissing(characteristic))
    }

    async fn write(&mut self, characteristic: u16, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.up {
            return Err(TransportError::WriteFailed("link down".into()));
        }
        if !inner.characteristics.contains_key(&characteristic) {
            return Err(TransportError::CharacteristicMissing(characteristic));
        }
        inner.writes.push((characteristic, data.to_vec()));
        Ok(())
    }
}
