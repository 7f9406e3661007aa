// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The seam between the OBEX protocol state machines and the underlying RFCOMM or L2CAP
//! connection. The crate never performs I/O itself - outbound packets are handed to an
//! [`ObexTransport`] implementation and inbound bytes are delivered to the client/server
//! `on_data_available` entry points by the embedder's dispatcher.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use tracing::warn;

use crate::error::Error;

/// An established connection to a remote OBEX device.
///
/// Implementations wrap a connected RFCOMM channel or L2CAP ERTM channel. `send` must deliver the
/// full packet in order; partial writes are a transport Error.
pub trait ObexTransport: Send {
    /// Sends the encoded OBEX packet to the remote.
    fn send(&mut self, packet: &[u8]) -> Result<(), Error>;

    /// Closes the underlying connection. Further `send` calls will fail.
    fn disconnect(&mut self);
}

/// A gate that a body reader/writer thread can block on while the transport is busy.
///
/// The dispatcher toggles the busy flag from transport flow-control events; a transfer thread
/// calls `wait_not_busy` before producing the next body chunk.
#[derive(Debug, Default)]
pub struct BusyGate {
    busy: Mutex<bool>,
    cond: Condvar,
}

impl BusyGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_busy(&self, busy: bool) {
        let mut guard = self.busy.lock();
        *guard = busy;
        if !busy {
            self.cond.notify_all();
        }
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.lock()
    }

    /// Blocks the calling thread until the transport is not busy.
    pub fn wait_not_busy(&self) {
        let mut guard = self.busy.lock();
        while *guard {
            self.cond.wait(&mut guard);
        }
    }
}

/// Tracks which L2CAP PSMs are registered by OBEX services in this process.
/// Registration is reference counted - a PSM is released when every registrant deregisters.
#[derive(Debug, Default)]
pub struct PsmRegistry {
    registered: Mutex<HashMap<u16, usize>>,
}

impl PsmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, psm: u16) {
        let mut registered = self.registered.lock();
        *registered.entry(psm).or_insert(0) += 1;
    }

    pub fn deregister(&self, psm: u16) {
        let mut registered = self.registered.lock();
        match registered.get_mut(&psm) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                let _ = registered.remove(&psm);
            }
            None => warn!(%psm, "deregister of unknown PSM"),
        }
    }

    pub fn is_registered(&self, psm: u16) -> bool {
        self.registered.lock().contains_key(&psm)
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    use std::sync::Arc;

    /// A test transport that records every packet sent through it.
    #[derive(Clone, Debug, Default)]
    pub struct FakeTransport {
        pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
        pub connected: Arc<Mutex<bool>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self { sent: Arc::new(Mutex::new(Vec::new())), connected: Arc::new(Mutex::new(true)) }
        }

        pub fn sent_packets(&self) -> Vec<Vec<u8>> {
            self.sent.lock().clone()
        }

        pub fn take_sent_packets(&self) -> Vec<Vec<u8>> {
            std::mem::take(&mut *self.sent.lock())
        }

        pub fn is_connected(&self) -> bool {
            *self.connected.lock()
        }
    }

    impl ObexTransport for FakeTransport {
        fn send(&mut self, packet: &[u8]) -> Result<(), Error> {
            if !*self.connected.lock() {
                return Err(Error::IOError(std::io::Error::from(
                    std::io::ErrorKind::NotConnected,
                )));
            }
            self.sent.lock().push(packet.to_vec());
            Ok(())
        }

        fn disconnect(&mut self) {
            *self.connected.lock() = false;
        }
    }
}
