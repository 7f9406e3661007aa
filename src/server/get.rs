// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::VecDeque;
use tracing::warn;

use crate::encoding::Encodable;
use crate::error::Error;
use crate::header::{Header, HeaderSet, SingleResponseMode};
use crate::operation::{OpCode, RequestPacket, ResponseCode, ResponsePacket};
use crate::server::check_headers_for_srm;

/// All Body & EndOfBody headers have 3 bytes (1 byte HI, 2 bytes Length) preceding the payload.
const BODY_HEADER_PREFIX_LENGTH_BYTES: usize = 3;

/// The object payload staged for the response phase of a GET operation, divided into
/// per-packet chunks.
#[derive(Debug, PartialEq)]
struct StagedData {
    /// The first chunk of user data. Some when the first chunk has not yet been taken with
    /// `first_response`. The first packet also carries the informational headers, so in some
    /// cases no user data fits and this is Some(None).
    first: Option<Option<Vec<u8>>>,
    /// The remaining chunks. The staged data is exhausted when this is empty.
    rest: VecDeque<Vec<u8>>,
}

impl StagedData {
    fn new(first: Option<Vec<u8>>, rest: VecDeque<Vec<u8>>) -> Self {
        Self { first: Some(first), rest }
    }

    /// Divides `data` into Body/EndOfBody chunks that fit in `max_headers_size` bytes per
    /// packet. `headers_size` is the encoded size of the informational headers that share the
    /// first packet.
    fn from_data(
        mut data: Vec<u8>,
        max_headers_size: u16,
        headers_size: usize,
    ) -> Result<Self, Error> {
        let max_headers_size = max_headers_size as usize;
        if headers_size > max_headers_size {
            warn!("informational headers exceed the packet budget");
            return Err(Error::operation(OpCode::Get, "too many headers"));
        }

        // Each data packet must at least fit the Body header prefix and one byte of payload.
        if max_headers_size <= BODY_HEADER_PREFIX_LENGTH_BYTES {
            return Err(Error::operation(OpCode::Get, "max_headers_size too small"));
        }

        // The first packet is special - it shares its budget with the informational headers.
        let max_first_data_packet_size = max_headers_size - headers_size;

        let data_encoded_len = data.len() + BODY_HEADER_PREFIX_LENGTH_BYTES;
        if data_encoded_len <= max_first_data_packet_size {
            return Ok(Self::new(Some(data), VecDeque::new()));
        }

        let first_chunk_size =
            max_first_data_packet_size.checked_sub(BODY_HEADER_PREFIX_LENGTH_BYTES);
        let (first, remaining) = if let Some(max) = first_chunk_size {
            let remaining = data.split_off(max);
            (Some(data), remaining)
        } else {
            // No space in the first packet for any user data.
            (None, data)
        };

        let max_data_packet_size = max_headers_size - BODY_HEADER_PREFIX_LENGTH_BYTES;
        let mut chunks = VecDeque::new();
        for chunk in remaining.chunks(max_data_packet_size) {
            chunks.push_back(chunk.to_vec());
        }
        Ok(Self::new(first, chunks))
    }

    fn is_first_response(&self) -> bool {
        self.first.is_some()
    }

    fn is_complete(&self) -> bool {
        self.first.is_none() && self.rest.is_empty()
    }

    /// Takes the first staged chunk. Returns the response code and the Body/EndOfBody header
    /// for the first response packet.
    fn first_response(&mut self) -> Result<(ResponseCode, Option<Header>), Error> {
        if self.is_complete() {
            return Err(Error::operation(OpCode::Get, "staged data exhausted"));
        }
        let first_packet = self
            .first
            .take()
            .ok_or_else(|| Error::operation(OpCode::Get, "first response already taken"))?;
        if self.rest.is_empty() {
            Ok((ResponseCode::Ok, first_packet.map(Header::EndOfBody)))
        } else {
            Ok((ResponseCode::Continue, first_packet.map(Header::Body)))
        }
    }

    /// Takes the next staged chunk. Errors if the first chunk has not been taken or the data is
    /// exhausted.
    fn next_response(&mut self) -> Result<(ResponseCode, Header), Error> {
        if self.is_complete() || self.is_first_response() {
            return Err(Error::operation(OpCode::Get, "next_response called from invalid state"));
        }
        let next_chunk = self.rest.pop_front();
        if self.rest.is_empty() {
            Ok((ResponseCode::Ok, Header::EndOfBody(next_chunk.unwrap_or_default())))
        } else {
            Ok((ResponseCode::Continue, Header::Body(next_chunk.expect("more than one chunk"))))
        }
    }
}

/// The current state of the GET operation.
#[derive(Debug)]
enum State {
    /// The remote OBEX client is sending informational headers describing the object, possibly
    /// over multiple packets.
    Request { headers: HeaderSet },
    /// The final request packet has been received - waiting on the handler verdict.
    RequestPhaseComplete,
    /// The handler accepted the request - the payload is being relayed in chunks.
    Response { staged_data: StagedData },
    /// All response packets have been produced.
    Complete,
}

/// The next step the server session must take after a GET request packet.
#[derive(Debug)]
pub enum GetAction {
    /// Send a response packet to the remote OBEX client.
    SendResponse(ResponsePacket),
    /// Ask the handler for the object described by the headers.
    GetData(HeaderSet),
}

/// An in-progress GET operation - collects the request headers, asks the handler for the
/// payload, and relays it in packet-sized chunks.
pub struct GetOperation {
    /// The byte budget for headers in each response packet - informational and data headers.
    max_headers_size: u16,
    /// Whether SRM is locally supported.
    srm_supported: bool,
    /// The negotiated SRM status for this operation. None until negotiated.
    srm: Option<SingleResponseMode>,
    /// Set when the negotiated SRM header still needs to be conveyed in the next response.
    announce_srm: bool,
    state: State,
}

impl GetOperation {
    /// `max_packet_size` is the maximum number of bytes in a single response packet.
    pub fn new(max_packet_size: u16, srm_supported: bool) -> Self {
        let max_headers_size = max_packet_size - ResponsePacket::MIN_PACKET_SIZE as u16;
        Self {
            max_headers_size,
            srm_supported,
            srm: None,
            announce_srm: false,
            state: State::Request { headers: HeaderSet::new() },
        }
    }

    #[cfg(test)]
    fn new_at_state(max_packet_size: u16, state: State) -> Self {
        let max_headers_size = max_packet_size - ResponsePacket::MIN_PACKET_SIZE as u16;
        Self { max_headers_size, srm_supported: false, srm: None, announce_srm: false, state }
    }

    pub fn srm_status(&self) -> SingleResponseMode {
        self.srm.unwrap_or(SingleResponseMode::Disable)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, State::Complete)
    }

    fn check_complete_and_update_state(&mut self) {
        let State::Response { ref staged_data } = self.state else { return };
        if staged_data.is_complete() {
            self.state = State::Complete;
        }
    }

    /// The headers conveying a freshly negotiated SRM status, if any.
    fn take_srm_headers(&mut self) -> HeaderSet {
        if !self.announce_srm {
            return HeaderSet::new();
        }
        self.announce_srm = false;
        self.srm
            .map(|srm| HeaderSet::from_header(srm.into()).expect("single header"))
            .unwrap_or_default()
    }

    /// Processes a GET request packet from the remote OBEX client.
    pub fn handle_request(&mut self, request: RequestPacket) -> Result<GetAction, Error> {
        let code = *request.code();
        match &mut self.state {
            State::Request { ref mut headers } if code == OpCode::Get => {
                headers.try_append(HeaderSet::from(request))?;
                if self.srm.is_none() {
                    self.srm = check_headers_for_srm(self.srm_supported, headers);
                    self.announce_srm = self.srm.is_some();
                }
                let response_headers = if self.announce_srm {
                    self.announce_srm = false;
                    HeaderSet::from_header(self.srm.expect("just negotiated").into())?
                } else {
                    HeaderSet::new()
                };
                let response =
                    ResponsePacket::new_no_data(ResponseCode::Continue, response_headers);
                Ok(GetAction::SendResponse(response))
            }
            State::Request { ref mut headers } if code == OpCode::GetFinal => {
                headers.try_append(HeaderSet::from(request))?;
                if self.srm.is_none() {
                    self.srm = check_headers_for_srm(self.srm_supported, headers);
                    self.announce_srm = self.srm.is_some();
                }
                let request_headers = std::mem::take(headers);
                self.state = State::RequestPhaseComplete;
                Ok(GetAction::GetData(request_headers))
            }
            State::Response { ref mut staged_data } if code == OpCode::GetFinal => {
                let (code, body_header) = staged_data.next_response()?;
                let response =
                    ResponsePacket::new_no_data(code, HeaderSet::from_header(body_header)?);
                self.check_complete_and_update_state();
                Ok(GetAction::SendResponse(response))
            }
            _ => Err(Error::operation(OpCode::Get, "received invalid request")),
        }
    }

    /// Starts the response phase with the handler-provided `data` and informational
    /// `response_headers`. Returns the first response packet; the rest are produced by
    /// subsequent `handle_request` calls (or `next_response` when SRM is active).
    pub fn start_response_phase(
        &mut self,
        data: Vec<u8>,
        mut response_headers: HeaderSet,
    ) -> Result<ResponsePacket, Error> {
        if !matches!(self.state, State::RequestPhaseComplete) {
            return Err(Error::operation(OpCode::Get, "invalid state"));
        }

        response_headers.try_append(self.take_srm_headers())?;
        let mut staged_data =
            StagedData::from_data(data, self.max_headers_size, response_headers.encoded_len())?;
        let (code, body_header) = staged_data.first_response()?;
        self.state = State::Response { staged_data };
        self.check_complete_and_update_state();

        if let Some(header) = body_header {
            response_headers.add(header)?;
        }
        Ok(ResponsePacket::new_no_data(code, response_headers))
    }

    /// Produces the next response packet of the response phase without a peer request - used
    /// when SRM is active and the payload is streamed.
    pub fn next_response(&mut self) -> Result<ResponsePacket, Error> {
        let State::Response { ref mut staged_data } = self.state else {
            return Err(Error::operation(OpCode::Get, "invalid state"));
        };
        let (code, body_header) = staged_data.next_response()?;
        let response = ResponsePacket::new_no_data(code, HeaderSet::from_header(body_header)?);
        self.check_complete_and_update_state();
        Ok(response)
    }
}
