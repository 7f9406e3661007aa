// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Streaming access to the user data payload of a PUT or GET operation.

use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Error;

/// The source or sink of the user data payload transferred in a PUT or GET operation.
///
/// A transfer pulls outgoing chunks via `read` and pushes incoming chunks via `write`. `close` is
/// invoked exactly once when the transfer ends, successfully or not. Implementations are typically
/// backed by a file or an in-memory buffer.
pub trait ObexBodyObject: Send + Debug {
    /// Reads up to `buf.len()` bytes of the object into `buf`, returning the number of bytes
    /// read. A return value smaller than `buf.len()` signals the end of the object.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Appends `buf` to the object, returning the number of bytes written.
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error>;

    /// Called when the transfer using this object completes.
    fn close(&mut self);
}

/// A body object shared between the protocol driver and the application.
pub type SharedBodyObject = Arc<Mutex<dyn ObexBodyObject>>;

/// An in-memory body object backed by a Vec.
#[derive(Debug, Default)]
pub struct VecBodyObject {
    data: Vec<u8>,
    /// Read cursor into `data`.
    position: usize,
    closed: bool,
}

impl VecBodyObject {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, position: 0, closed: false }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl ObexBodyObject for VecBodyObject {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let remaining = self.data.len().saturating_sub(self.position);
        let n = std::cmp::min(buf.len(), remaining);
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
