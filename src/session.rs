// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-connection OBEX session state - the negotiated transfer parameters and the optional
//! reliable session that survives transport drops.

use std::fmt;
use std::time::Instant;

use crate::error::Error;
use crate::header::tlv::SESSION_TIMEOUT_INFINITE;
use crate::operation::{MAX_PACKET_SIZE, MIN_MAX_PACKET_SIZE};

/// A 48-bit Bluetooth device address, as carried in the Session Parameters Device Address TLV.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceAddress(pub [u8; 6]);

impl DeviceAddress {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", b[0], b[1], b[2], b[3], b[4], b[5])
    }
}

/// The lifecycle of a reliable session.
/// Defined in OBEX 1.5 Section 3.4.7.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReliableSessionState {
    /// Created locally, CREATE response not yet received.
    Init,
    Active,
    Suspended,
    /// RESUME accepted by the peer but the sequence exchange has not completed.
    Resumed,
    /// Terminal. A closed session can never be resumed.
    Closed,
}

/// A reliable OBEX session - survives transport loss and allows the operation stream to be
/// suspended & resumed with sequence-numbered packets.
#[derive(Debug)]
pub struct ReliableSession {
    /// The 16-byte session id derived from the device addresses & nonces of both sides.
    id: [u8; 16],
    /// Timeout in seconds. `SESSION_TIMEOUT_INFINITE` means the session never expires.
    timeout: u32,
    /// The rolling sequence number included in each packet. Wraps 255 -> 0.
    sequence_number: u8,
    state: ReliableSessionState,
    last_access: Instant,
}

impl ReliableSession {
    pub fn new(id: [u8; 16], timeout: u32) -> Self {
        Self {
            id,
            timeout,
            sequence_number: 0,
            state: ReliableSessionState::Init,
            last_access: Instant::now(),
        }
    }

    pub fn id(&self) -> &[u8; 16] {
        &self.id
    }

    pub fn state(&self) -> ReliableSessionState {
        self.state
    }

    pub fn timeout(&self) -> u32 {
        self.timeout
    }

    pub fn is_infinite_timeout(&self) -> bool {
        self.timeout == SESSION_TIMEOUT_INFINITE
    }

    pub fn sequence_number(&self) -> u8 {
        self.sequence_number
    }

    fn touch(&mut self) {
        self.last_access = Instant::now();
    }

    /// Returns true if the session timeout has elapsed since the last access.
    pub fn is_expired(&self) -> bool {
        !self.is_infinite_timeout()
            && self.last_access.elapsed().as_secs() >= u64::from(self.timeout)
    }

    /// Marks the session Active - called when the peer accepts the CREATE or after the sequence
    /// exchange of a resume completes.
    pub fn activate(&mut self) -> Result<(), Error> {
        match self.state {
            ReliableSessionState::Init | ReliableSessionState::Resumed => {
                self.state = ReliableSessionState::Active;
                self.touch();
                Ok(())
            }
            s => Err(Error::session(format!("cannot activate from {s:?}"))),
        }
    }

    /// Suspends the session, freezing the current sequence number.
    pub fn suspend(&mut self) -> Result<(), Error> {
        if self.state != ReliableSessionState::Active {
            return Err(Error::session(format!("cannot suspend from {:?}", self.state)));
        }
        self.state = ReliableSessionState::Suspended;
        self.touch();
        Ok(())
    }

    /// Resumes a suspended session. The peer must present the same session `id` and a
    /// `next_sequence_number` no further than one ahead of the frozen value.
    pub fn resume(&mut self, id: &[u8; 16], next_sequence_number: u8) -> Result<(), Error> {
        if self.state != ReliableSessionState::Suspended {
            return Err(Error::session(format!("cannot resume from {:?}", self.state)));
        }
        if self.is_expired() {
            return Err(Error::session("session timeout elapsed"));
        }
        if *id != self.id {
            return Err(Error::session("session id mismatch"));
        }
        let expected_max = self.sequence_number.wrapping_add(1);
        if next_sequence_number != self.sequence_number && next_sequence_number != expected_max {
            return Err(Error::session(format!(
                "sequence number {next_sequence_number} out of range (frozen at {})",
                self.sequence_number
            )));
        }
        self.sequence_number = next_sequence_number;
        self.state = ReliableSessionState::Resumed;
        self.touch();
        Ok(())
    }

    /// Closes the session. Irreversible.
    pub fn close(&mut self) {
        self.state = ReliableSessionState::Closed;
        self.touch();
    }

    pub fn set_timeout(&mut self, timeout: u32) {
        self.timeout = timeout;
        self.touch();
    }

    /// Advances the rolling sequence number when a sequenced packet is sent.
    pub fn advance_sequence(&mut self) {
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.touch();
    }
}

/// The state shared by every operation over a single OBEX connection.
#[derive(Debug)]
pub struct ObexSession {
    /// The maximum OBEX packet size negotiated during CONNECT. At least 255 bytes.
    max_packet_size: u16,
    /// Assigned by the server in the CONNECT response when a Target was provided.
    connection_id: Option<u32>,
    /// The 16-byte service UUID this connection is directed at, if any.
    target: Option<Vec<u8>>,
    /// Set while the transport signals flow-control backpressure. No body chunks are produced
    /// while busy.
    busy: bool,
    reliable: Option<ReliableSession>,
}

impl ObexSession {
    pub fn new(max_packet_size: u16) -> Self {
        let max_packet_size = max_packet_size
            .clamp(MIN_MAX_PACKET_SIZE as u16, MAX_PACKET_SIZE as u16);
        Self { max_packet_size, connection_id: None, target: None, busy: false, reliable: None }
    }

    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }

    /// Updates the negotiated maximum packet size from the peer's CONNECT response. The
    /// effective size is the smaller of the two, but never below the OBEX minimum.
    pub fn negotiate_max_packet_size(&mut self, peer_max: u16) {
        self.max_packet_size = std::cmp::min(self.max_packet_size, peer_max)
            .max(MIN_MAX_PACKET_SIZE as u16);
    }

    pub fn connection_id(&self) -> Option<u32> {
        self.connection_id
    }

    pub fn set_connection_id(&mut self, id: u32) {
        self.connection_id = Some(id);
    }

    pub fn target(&self) -> Option<&[u8]> {
        self.target.as_deref()
    }

    pub fn set_target(&mut self, target: Vec<u8>) {
        self.target = Some(target);
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    pub fn reliable(&self) -> Option<&ReliableSession> {
        self.reliable.as_ref()
    }

    pub fn reliable_mut(&mut self) -> Option<&mut ReliableSession> {
        self.reliable.as_mut()
    }

    pub fn set_reliable(&mut self, session: ReliableSession) {
        self.reliable = Some(session);
    }

    pub fn take_reliable(&mut self) -> Option<ReliableSession> {
        self.reliable.take()
    }
}
