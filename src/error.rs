// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use thiserror::Error;

use crate::operation::{OpCode, ResponseCode};

/// Errors that occur during the use of the OBEX library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Error parsing packet: {:?}", .0)]
    Packet(#[from] PacketError),
    #[error("Error during {operation:?} operation: {msg}")]
    OperationError { operation: OpCode, msg: String },
    #[error("Peer rejected {operation:?} request with: {response:?}")]
    PeerRejected { operation: OpCode, response: ResponseCode },
    #[error("Invalid reliable session transition: {msg}")]
    SessionError { msg: String },
    #[error("Client is not in a valid state for the request: {msg}")]
    InvalidState { msg: String },
    #[error("Another operation is already in progress")]
    OperationInProgress,
    #[error("Duplicate header: {:?}", .0)]
    Duplicate(crate::header::HeaderIdentifier),
    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),
    /// An error from another source
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn operation(operation: OpCode, msg: impl Into<String>) -> Self {
        Self::OperationError { operation, msg: msg.into() }
    }

    pub fn peer_rejected(operation: OpCode, response: ResponseCode) -> Self {
        Self::PeerRejected { operation, response }
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::SessionError { msg: msg.into() }
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::InvalidState { msg: msg.into() }
    }
}

/// Errors that occur during the encoding & decoding of OBEX packets.
#[derive(Error, Debug)]
pub enum PacketError {
    #[error("Buffer is too small")]
    BufferTooSmall,
    #[error("Invalid data length")]
    DataLength,
    #[error("Invalid data: {}", .0)]
    Data(String),
    #[error("Invalid header identifier: {:?}", .0)]
    Identifier(u8),
    #[error("Invalid header encoding")]
    HeaderEncoding,
    #[error("Invalid opcode: {:?}", .0)]
    OpCode(u8),
    #[error("Invalid response code: {:?}", .0)]
    ResponseCode(u8),
    #[error("Field is RFA.")]
    Reserved,
    /// An error from another source
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PacketError {
    pub fn external(e: impl Into<anyhow::Error>) -> Self {
        Self::Other(e.into())
    }

    pub fn data(e: impl Into<String>) -> Self {
        Self::Data(e.into())
    }
}
