// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! An implementation of the OBEX (Object Exchange) session protocol as used by
//! Bluetooth profiles such as OPP (file transfer) and PBAP (phonebook access).
//!
//! OBEX is a binary request/response protocol layered over a reliable, in-order
//! transport (RFCOMM or L2CAP). This crate implements the transport-agnostic
//! core: packet framing & header parsing, the TLV parameter blocks used for
//! authentication and reliable sessions, multi-packet body transfer with
//! Single Response Mode flow control, and the client & server protocol state
//! machines.
//!
//! The crate is sans-io: the transport is modeled by the [`transport::ObexTransport`]
//! trait and inbound bytes are delivered to [`client::ObexClient::on_data_available`]
//! or [`server::ObexServerSession::on_data_available`] by the caller's dispatcher.
//! All protocol outcomes are reported through observer/handler traits.

pub mod body;
pub mod client;
pub mod encoding;
pub mod error;
pub mod header;
pub mod operation;
pub mod server;
pub mod session;
pub mod transport;

pub use crate::error::{Error, PacketError};
pub use crate::header::{Header, HeaderIdentifier, HeaderSet, SingleResponseMode};
pub use crate::operation::{OpCode, RequestPacket, ResponseCode, ResponsePacket};
