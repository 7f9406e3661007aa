// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use tracing::trace;

use crate::error::Error;
use crate::header::{Header, HeaderSet, SingleResponseMode};
use crate::operation::{OpCode, RequestPacket, ResponseCode, ResponsePacket};
use crate::server::{check_headers_for_srm, ObexResult};

/// The current state of the PUT operation.
#[derive(Debug)]
enum State {
    /// Receiving informational headers and data packets.
    Request { headers: HeaderSet, staged_data: Option<Vec<u8>> },
    /// The final request packet has been received - waiting on the handler verdict.
    RequestPhaseComplete,
    /// The operation is complete.
    Complete,
}

/// The next step the server session must take after a PUT request packet.
#[derive(Debug)]
pub enum PutAction {
    /// Acknowledge the request packet with the provided response.
    SendResponse(ResponsePacket),
    /// SRM is active - the request needs no acknowledgement.
    None,
    /// The final packet was received - hand the reassembled object to the handler.
    PutData(Vec<u8>, HeaderSet),
    /// The final packet carried no body - this is a delete request for the named object.
    /// See OBEX 1.5 Section 3.4.3.6.
    Delete(HeaderSet),
}

/// An in-progress PUT operation - reassembles the object from Body chunks across request
/// packets and defers the accept/reject verdict to the handler once the final packet arrives.
pub struct PutOperation {
    /// Whether SRM is locally supported.
    srm_supported: bool,
    /// The negotiated SRM status for this operation. None until negotiated; defaults to
    /// disabled if the peer never requests it.
    srm: Option<SingleResponseMode>,
    state: State,
}

impl PutOperation {
    pub fn new(srm_supported: bool) -> Self {
        Self {
            srm_supported,
            srm: None,
            state: State::Request { headers: HeaderSet::new(), staged_data: None },
        }
    }

    #[cfg(test)]
    fn new_at_state(state: State) -> Self {
        Self { srm_supported: false, srm: None, state }
    }

    pub fn srm_status(&self) -> SingleResponseMode {
        self.srm.unwrap_or(SingleResponseMode::Disable)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, State::Complete)
    }

    /// Processes a PUT request packet from the remote OBEX client.
    pub fn handle_request(&mut self, request: RequestPacket) -> Result<PutAction, Error> {
        let code = *request.code();
        let mut request_headers = HeaderSet::from(request);
        match &mut self.state {
            State::Request { ref mut headers, ref mut staged_data } if code == OpCode::Put => {
                if let Ok(mut data) = request_headers.remove_body(/* final= */ false) {
                    staged_data.get_or_insert(Vec::new()).append(&mut data);
                }
                headers.try_append(request_headers)?;

                // With SRM enabled no acknowledgement is sent. With SRM disabled each packet is
                // acknowledged. If SRM hasn't been negotiated, check whether the peer requests
                // it and reply with the negotiated header.
                let response_headers = match self.srm {
                    Some(SingleResponseMode::Enable) => return Ok(PutAction::None),
                    // Supported is only valid as a request value - treat it as disabled.
                    Some(_) => HeaderSet::new(),
                    None => {
                        self.srm = check_headers_for_srm(self.srm_supported, headers);
                        match self.srm {
                            Some(srm) => HeaderSet::from_header(srm.into())?,
                            None => HeaderSet::new(),
                        }
                    }
                };
                let response =
                    ResponsePacket::new_no_data(ResponseCode::Continue, response_headers);
                Ok(PutAction::SendResponse(response))
            }
            State::Request { ref mut headers, ref mut staged_data } if code == OpCode::PutFinal => {
                if let Ok(mut data) = request_headers.remove_body(/* final= */ true) {
                    staged_data.get_or_insert(Vec::new()).append(&mut data);
                }
                headers.try_append(request_headers)?;
                let request_headers = std::mem::take(headers);
                let request_data = std::mem::take(staged_data);
                self.state = State::RequestPhaseComplete;
                // A final PUT with no body deletes the object identified by the headers.
                match request_data {
                    Some(data) => Ok(PutAction::PutData(data, request_headers)),
                    None => Ok(PutAction::Delete(request_headers)),
                }
            }
            _ => Err(Error::operation(OpCode::Put, "received invalid request")),
        }
    }

    /// Builds the terminal response packet from the handler's verdict.
    pub fn handle_handler_result(&mut self, result: ObexResult) -> Result<ResponsePacket, Error> {
        if !matches!(self.state, State::RequestPhaseComplete) {
            return Err(Error::operation(OpCode::Put, "invalid state"));
        }
        let response = match result {
            Ok(response_headers) => {
                ResponsePacket::new_no_data(ResponseCode::Ok, response_headers)
            }
            Err((code, response_headers)) => {
                trace!("handler rejected PUT request: {code:?}");
                ResponsePacket::new_no_data(code, response_headers)
            }
        };
        self.state = State::Complete;
        Ok(response)
    }
}
