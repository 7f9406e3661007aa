// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use tracing::trace;

use crate::body::SharedBodyObject;
use crate::encoding::Encodable;
use crate::error::Error;
use crate::header::{Header, HeaderIdentifier, HeaderSet, SingleResponseMode, SrmParameters};
use crate::operation::{OpCode, RequestPacket};

/// The Body/EndOfBody Header prefix - 1 byte for the HI and 2 bytes for the length.
const BODY_HEADER_PREFIX_LENGTH_BYTES: usize = 3;

/// An in-progress outbound object transfer (PUT).
///
/// Produces one PUT request per body chunk. Each chunk fills the remaining packet budget; a
/// short read from the body object signals the end of the stream and produces the terminal
/// PUTFINAL request carrying the EndOfBody Header.
#[derive(Debug)]
pub struct ClientSendObject {
    /// The source of the object payload.
    body: SharedBodyObject,
    /// Informational headers included in the first request only.
    initial_headers: Option<HeaderSet>,
    /// The SRM mode requested for this transfer. Downgraded to Disable if the peer rejects it.
    srm: SingleResponseMode,
    /// Set if the peer requested a SRMP wait - each request must then be acknowledged before
    /// the next chunk is produced, even with SRM active.
    srm_wait: bool,
    started: bool,
    complete: bool,
    /// Set once the first response has been processed - SRM negotiation is only valid there.
    negotiated: bool,
}

impl ClientSendObject {
    pub fn new(headers: HeaderSet, body: SharedBodyObject, request_srm: bool) -> Self {
        Self {
            body,
            initial_headers: Some(headers),
            srm: request_srm.into(),
            srm_wait: false,
            started: false,
            complete: false,
            negotiated: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Ends the transfer early. The body object is closed unless the transfer already ran to
    /// completion and closed it.
    pub fn terminate(&mut self) {
        if !self.complete {
            self.complete = true;
            self.body.lock().close();
        }
    }

    /// Returns true if chunks can be produced without waiting for per-packet responses.
    /// SRM is only active once the peer has accepted it in the first response.
    pub fn srm_active(&self) -> bool {
        self.negotiated && self.srm == SingleResponseMode::Enable && !self.srm_wait
    }

    /// Records the SRM negotiation outcome from the first response of the operation. Later
    /// responses simply omit the header - they must not downgrade the mode.
    pub fn handle_response_headers(&mut self, headers: &HeaderSet) {
        if !self.negotiated && self.srm == SingleResponseMode::Enable {
            match headers.get(&HeaderIdentifier::SingleResponseMode) {
                Some(Header::SingleResponseMode(SingleResponseMode::Enable)) => {}
                _ => {
                    trace!("peer did not accept SRM - falling back to per-packet responses");
                    self.srm = SingleResponseMode::Disable;
                }
            }
        }
        self.negotiated = true;
        if let Some(Header::SingleResponseModeParameters(params)) =
            headers.get(&HeaderIdentifier::SingleResponseModeParameters)
        {
            self.srm_wait = params.requests_wait();
        }
    }

    /// Produces the next PUT request, reading up to the remaining `max_packet_size` budget from
    /// the body object.
    pub fn next_request(&mut self, max_packet_size: u16) -> Result<RequestPacket, Error> {
        if self.complete {
            return Err(Error::operation(OpCode::Put, "transfer already complete"));
        }

        let mut headers = self.initial_headers.take().unwrap_or_default();
        if !self.started && self.srm == SingleResponseMode::Enable {
            headers.add(Header::SingleResponseMode(SingleResponseMode::Enable))?;
        }

        let overhead = RequestPacket::MIN_PACKET_SIZE
            + BODY_HEADER_PREFIX_LENGTH_BYTES
            + headers.encoded_len();
        let budget = (max_packet_size as usize)
            .checked_sub(overhead)
            .ok_or_else(|| Error::operation(OpCode::Put, "headers exceed packet size"))?;

        let mut chunk = vec![0; budget];
        let read = self.body.lock().read(&mut chunk)?;
        chunk.truncate(read);
        self.started = true;

        // A partial read is the end of the object - finish with EndOfBody.
        if read < budget {
            headers.add(Header::EndOfBody(chunk))?;
            self.complete = true;
            self.body.lock().close();
            Ok(RequestPacket::new_put_final(headers))
        } else {
            headers.add(Header::Body(chunk))?;
            Ok(RequestPacket::new_put(headers))
        }
    }
}
