// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use tracing::trace;

use crate::body::SharedBodyObject;
use crate::error::Error;
use crate::header::{Header, HeaderIdentifier, HeaderSet, SingleResponseMode, SrmParameters};
use crate::operation::{OpCode, RequestPacket, ResponseCode, ResponsePacket};

/// An in-progress inbound object transfer (GET).
///
/// Issues GETFINAL requests and appends each received Body chunk to the body object. A response
/// with the Ok code carries the EndOfBody Header and completes the transfer. With SRM active the
/// peer streams response packets without per-packet continuation requests.
#[derive(Debug)]
pub struct ClientReceivedObject {
    /// The sink for the object payload.
    body: SharedBodyObject,
    /// Informational headers included in the first request only.
    initial_headers: Option<HeaderSet>,
    srm: SingleResponseMode,
    /// Set if the peer requested a SRMP wait - continuation requests are still required.
    srm_wait: bool,
    started: bool,
    complete: bool,
    /// Set once the first response has been processed - SRM negotiation is only valid there.
    negotiated: bool,
    /// Informational headers collected from the peer's responses (Name, Length, Type, ..).
    info_headers: HeaderSet,
}

impl ClientReceivedObject {
    pub fn new(headers: HeaderSet, body: SharedBodyObject, request_srm: bool) -> Self {
        Self {
            body,
            initial_headers: Some(headers),
            srm: request_srm.into(),
            srm_wait: false,
            started: false,
            complete: false,
            negotiated: false,
            info_headers: HeaderSet::new(),
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

    /// The non-body headers the peer attached to its responses.
    pub fn info_headers(&self) -> &HeaderSet {
        &self.info_headers
    }

    pub fn take_info_headers(&mut self) -> HeaderSet {
        std::mem::take(&mut self.info_headers)
    }

    fn srm_active(&self) -> bool {
        self.srm == SingleResponseMode::Enable && !self.srm_wait
    }

    /// Builds the initial GETFINAL request of the operation.
    pub fn first_request(&mut self) -> Result<RequestPacket, Error> {
        if self.started {
            return Err(Error::operation(OpCode::GetFinal, "transfer already started"));
        }
        let mut headers = self.initial_headers.take().unwrap_or_default();
        if self.srm == SingleResponseMode::Enable {
            headers.add(Header::SingleResponseMode(SingleResponseMode::Enable))?;
        }
        self.started = true;
        Ok(RequestPacket::new_get_final(headers))
    }

    /// Returns true if another GETFINAL continuation request must be sent to receive the next
    /// response packet.
    pub fn needs_continuation(&self) -> bool {
        self.started && !self.complete && !self.srm_active()
    }

    pub fn continuation_request(&self) -> RequestPacket {
        RequestPacket::new_get_final(HeaderSet::new())
    }

    /// Processes a response packet of the operation. Returns true when the transfer is complete.
    pub fn handle_response(&mut self, response: ResponsePacket) -> Result<bool, Error> {
        let code = *response.code();
        let mut headers = HeaderSet::from(response);

        // The SRM negotiation outcome is carried in the first response of the operation. Later
        // packets simply omit the header - they must not downgrade the mode.
        let srm_header = headers.remove(&HeaderIdentifier::SingleResponseMode);
        if !self.negotiated && self.srm == SingleResponseMode::Enable {
            match srm_header {
                Some(Header::SingleResponseMode(SingleResponseMode::Enable)) => {}
                _ => {
                    trace!("peer did not accept SRM - falling back to per-packet requests");
                    self.srm = SingleResponseMode::Disable;
                }
            }
        }
        self.negotiated = true;
        if let Some(Header::SingleResponseModeParameters(params)) =
            headers.remove(&HeaderIdentifier::SingleResponseModeParameters)
        {
            self.srm_wait = params.requests_wait();
        }

        match code {
            ResponseCode::Ok => {
                // The terminal packet - the remaining payload is in EndOfBody.
                if let Ok(data) = headers.remove_body(true) {
                    let _ = self.body.lock().write(&data)?;
                }
                self.collect_info_headers(headers)?;
                self.body.lock().close();
                self.complete = true;
                trace!("received terminal GET response");
                Ok(true)
            }
            ResponseCode::Continue => {
                if let Ok(data) = headers.remove_body(false) {
                    let _ = self.body.lock().write(&data)?;
                }
                self.collect_info_headers(headers)?;
                Ok(false)
            }
            code => {
                // A rejection ends the transfer - the partially written body is closed.
                self.terminate();
                Err(Error::peer_rejected(OpCode::GetFinal, code))
            }
        }
    }

    fn collect_info_headers(&mut self, headers: HeaderSet) -> Result<(), Error> {
        for header in headers.iter() {
            // Repeated informational headers across packets are fine - keep the first.
            if !self.info_headers.contains_header(&header.identifier()) {
                self.info_headers.add(header.clone())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use std::sync::Arc;

    use crate::body::VecBodyObject;

    fn new_object(request_srm: bool) -> (ClientReceivedObject, Arc<Mutex<VecBodyObject>>) {
        let body = Arc::new(Mutex::new(VecBodyObject::default()));
        let headers = HeaderSet::from_header(Header::name("photo.jpg")).unwrap();
        (ClientReceivedObject::new(headers, body.clone(), request_srm), body)
    }

    fn body_response(code: ResponseCode, header: Header) -> ResponsePacket {
        ResponsePacket::new_no_data(code, HeaderSet::from_header(header).unwrap())
    }

    #[test]
    fn multi_packet_transfer_accumulates_body() {
        let (mut object, body) = new_object(false);
        let request = object.first_request().expect("can build first request");
        assert_eq!(*request.code(), OpCode::GetFinal);
        assert!(request.headers().contains_header(&HeaderIdentifier::Name));

        let done = object
            .handle_response(body_response(ResponseCode::Continue, Header::Body(vec![1, 2, 3])))
            .expect("valid response");
        assert!(!done);
        assert!(object.needs_continuation());

        let done = object
            .handle_response(body_response(ResponseCode::Ok, Header::EndOfBody(vec![4, 5])))
            .expect("valid response");
        assert!(done);
        assert!(object.is_complete());
        assert!(!object.needs_continuation());

        let guard = body.lock();
        assert_eq!(guard.data(), &[1, 2, 3, 4, 5]);
        assert!(guard.is_closed());
    }

    #[test]
    fn first_request_twice_is_error() {
        let (mut object, _body) = new_object(false);
        let _ = object.first_request().expect("first call succeeds");
        assert_matches!(object.first_request(), Err(Error::OperationError { .. }));
    }

    #[test]
    fn srm_accepted_suppresses_continuations() {
        let (mut object, _body) = new_object(true);
        let request = object.first_request().expect("can build first request");
        assert!(request.headers().contains_header(&HeaderIdentifier::SingleResponseMode));

        let response = ResponsePacket::new_no_data(
            ResponseCode::Continue,
            HeaderSet::from_headers(vec![
                SingleResponseMode::Enable.into(),
                Header::Body(vec![1]),
            ])
            .unwrap(),
        );
        assert!(!object.handle_response(response).expect("valid response"));
        // Peer streams the rest - no continuation requests needed.
        assert!(!object.needs_continuation());
    }

    #[test]
    fn srm_rejected_requires_continuations() {
        let (mut object, _body) = new_object(true);
        let _ = object.first_request().expect("can build first request");
        // First response has no SRM header - negotiation failed.
        let done = object
            .handle_response(body_response(ResponseCode::Continue, Header::Body(vec![1])))
            .expect("valid response");
        assert!(!done);
        assert!(object.needs_continuation());
    }

    #[test]
    fn srmp_wait_requires_continuations() {
        let (mut object, _body) = new_object(true);
        let _ = object.first_request().expect("can build first request");
        let response = ResponsePacket::new_no_data(
            ResponseCode::Continue,
            HeaderSet::from_headers(vec![
                SingleResponseMode::Enable.into(),
                Header::SingleResponseModeParameters(SrmParameters::Wait),
                Header::Body(vec![1]),
            ])
            .unwrap(),
        );
        assert!(!object.handle_response(response).expect("valid response"));
        assert!(object.needs_continuation());
    }

    #[test]
    fn error_response_is_peer_rejected() {
        let (mut object, _body) = new_object(false);
        let _ = object.first_request().expect("can build first request");
        let response = ResponsePacket::new_no_data(ResponseCode::NotFound, HeaderSet::new());
        assert_matches!(
            object.handle_response(response),
            Err(Error::PeerRejected { response: ResponseCode::NotFound, .. })
        );
    }

    #[test]
    fn info_headers_are_collected() {
        let (mut object, _body) = new_object(false);
        let _ = object.first_request().expect("can build first request");
        let response = ResponsePacket::new_no_data(
            ResponseCode::Continue,
            HeaderSet::from_headers(vec![Header::Length(42), Header::Body(vec![1])]).unwrap(),
        );
        let _ = object.handle_response(response).expect("valid response");
        let _ = object
            .handle_response(body_response(ResponseCode::Ok, Header::EndOfBody(vec![])))
            .expect("valid response");
        assert_eq!(
            object.info_headers().get(&HeaderIdentifier::Length),
            Some(&Header::Length(42))
        );
        // Body payloads are not kept as info headers.
        assert!(!object.info_headers().contains_header(&HeaderIdentifier::Body));
    }
}
