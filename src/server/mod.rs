// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The OBEX server role - parses inbound request packets, drives the per-operation state
//! machines and defers accept/reject decisions to an [`ObexServerHandler`].

use tracing::{info, trace, warn};

mod get;
mod put;

pub use get::GetOperation;
pub use put::PutOperation;

use crate::encoding::{Decodable, Encodable};
use crate::error::Error;
use crate::header::{Header, HeaderIdentifier, HeaderSet, SingleResponseMode};
use crate::operation::{OpCode, RequestPacket, ResponseCode, ResponsePacket, SetPathFlags};
use crate::server::get::GetAction;
use crate::server::put::PutAction;
use crate::session::ObexSession;
use crate::transport::ObexTransport;

/// A rejection verdict - the response code and any headers to include in the error response.
pub type ObexOperationError = (ResponseCode, HeaderSet);

pub type ObexResult = Result<HeaderSet, ObexOperationError>;

/// The application-facing interface of the OBEX server role. Operations roughly correspond to
/// those defined in OBEX 1.5.
///
/// Every method has a rejecting default so implementations only override the operations their
/// profile supports.
pub trait ObexServerHandler: Send {
    /// A request to initiate the CONNECT operation with the peer-provided `headers`.
    /// Returns `Ok` with any response headers if accepted, `Err` with a rejection code and
    /// headers otherwise.
    fn connect(&mut self, _headers: HeaderSet) -> ObexResult {
        Err((ResponseCode::NotImplemented, HeaderSet::new()))
    }

    /// The peer initiated the DISCONNECT operation. Returns headers for the response packet.
    fn disconnect(&mut self, _headers: HeaderSet) -> HeaderSet {
        HeaderSet::new()
    }

    /// A request to change the current folder. `backup` requests moving up one level before
    /// applying the (optional) Name header; `create` allows creating a missing folder.
    fn set_path(&mut self, _headers: HeaderSet, _backup: bool, _create: bool) -> ObexResult {
        Err((ResponseCode::NotImplemented, HeaderSet::new()))
    }

    /// A request to store the object payload `data` described by `headers`.
    fn put(&mut self, _data: Vec<u8>, _headers: HeaderSet) -> ObexResult {
        Err((ResponseCode::NotImplemented, HeaderSet::new()))
    }

    /// A request to delete the object described by `headers`.
    fn delete(&mut self, _headers: HeaderSet) -> ObexResult {
        Err((ResponseCode::NotImplemented, HeaderSet::new()))
    }

    /// A request to retrieve the object described by `headers`. Returns the payload and any
    /// informational response headers if accepted.
    fn get(&mut self, _headers: HeaderSet) -> Result<(Vec<u8>, HeaderSet), ObexOperationError> {
        Err((ResponseCode::NotImplemented, HeaderSet::new()))
    }
}

/// Determines the SRM reply for an operation from the accumulated request `headers`.
/// Returns None if the peer made no SRM request - SRM stays un-negotiated.
pub(crate) fn check_headers_for_srm(
    srm_supported: bool,
    headers: &HeaderSet,
) -> Option<SingleResponseMode> {
    let Some(Header::SingleResponseMode(srm)) = headers.get(&HeaderIdentifier::SingleResponseMode)
    else {
        return None;
    };
    match (srm, srm_supported) {
        (SingleResponseMode::Enable, true) => Some(SingleResponseMode::Enable),
        _ => Some(SingleResponseMode::Disable),
    }
}

/// An OBEX server connection to a remote OBEX client.
///
/// Sans-io like the client role: inbound packets are delivered to `on_data_available` by the
/// embedder's dispatcher and responses are handed to the [`ObexTransport`].
pub struct ObexServerSession<T: ObexTransport, H: ObexServerHandler> {
    transport: T,
    handler: H,
    session: ObexSession,
    /// Whether the transport supports Single Response Mode (L2CAP ERTM).
    srm_supported: bool,
    /// Set once the OBEX CONNECT handshake has completed.
    connected: bool,
    active_put: Option<PutOperation>,
    active_get: Option<GetOperation>,
    /// The ConnectionId assigned to the next directed (Target) connection.
    next_connection_id: u32,
}

impl<T: ObexTransport, H: ObexServerHandler> ObexServerSession<T, H> {
    pub fn new(transport: T, handler: H, max_packet_size: u16, srm_supported: bool) -> Self {
        Self {
            transport,
            handler,
            session: ObexSession::new(max_packet_size),
            srm_supported,
            connected: false,
            active_put: None,
            active_get: None,
            next_connection_id: 1,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn session(&self) -> &ObexSession {
        &self.session
    }

    /// Parses an inbound packet as an OBEX request and routes it to the per-operation handler.
    pub fn on_data_available(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let request = RequestPacket::decode(bytes)?;
        let code = *request.code();
        trace!(?code, "received OBEX request");
        match code {
            OpCode::Connect => self.handle_connect(request),
            OpCode::Disconnect => self.handle_disconnect(request),
            OpCode::Put | OpCode::PutFinal => self.handle_put(request),
            OpCode::Get | OpCode::GetFinal => self.handle_get(request),
            OpCode::SetPath => self.handle_set_path(request),
            OpCode::Abort => self.handle_abort(request),
            code => {
                warn!(?code, "unsupported request");
                self.send_response(ResponsePacket::new_no_data(
                    ResponseCode::NotImplemented,
                    HeaderSet::new(),
                ))
            }
        }
    }

    /// The transport dropped - all operation state is discarded.
    pub fn on_transport_disconnected(&mut self) {
        self.connected = false;
        self.active_put = None;
        self.active_get = None;
    }

    fn handle_connect(&mut self, request: RequestPacket) -> Result<(), Error> {
        // The 4 data bytes are version (1), flags (1) and the peer's maximum packet size (2).
        // `RequestPacket::decode` validates the data length per opcode.
        let peer_max =
            u16::from_be_bytes(request.data()[2..4].try_into().expect("checked length"));
        self.session.negotiate_max_packet_size(peer_max);

        let headers = HeaderSet::from(request);
        let target = match headers.get(&HeaderIdentifier::Target) {
            Some(Header::Target(target)) => Some(target.clone()),
            _ => None,
        };

        // The CONNECT response always carries the same 4 data bytes with our packet size.
        let mut response_data = vec![0x10, 0]; // Version 1.0, flags reserved.
        response_data.extend_from_slice(&self.session.max_packet_size().to_be_bytes());

        match self.handler.connect(headers) {
            Ok(mut response_headers) => {
                // A directed connection is assigned a ConnectionId and echoes the service in
                // the Who header. See OBEX 1.5 Section 3.4.1.8.
                if let Some(target) = target {
                    let id = self.next_connection_id;
                    self.next_connection_id = self.next_connection_id.wrapping_add(1);
                    self.session.set_connection_id(id);
                    self.session.set_target(target.clone());
                    response_headers.add(Header::ConnectionId(id))?;
                    response_headers.add(Header::Who(target))?;
                }
                self.connected = true;
                info!(max_packet_size = self.session.max_packet_size(), "peer connected");
                self.send_response(ResponsePacket::new(
                    ResponseCode::Ok,
                    response_data,
                    response_headers,
                ))
            }
            Err((code, response_headers)) => {
                info!(?code, "rejecting CONNECT");
                self.send_response(ResponsePacket::new(code, response_data, response_headers))
            }
        }
    }

    fn handle_disconnect(&mut self, request: RequestPacket) -> Result<(), Error> {
        let response_headers = self.handler.disconnect(HeaderSet::from(request));
        self.connected = false;
        self.active_put = None;
        self.active_get = None;
        self.send_response(ResponsePacket::new_no_data(ResponseCode::Ok, response_headers))
    }

    fn handle_put(&mut self, request: RequestPacket) -> Result<(), Error> {
        if !self.connected {
            return self.reject(ResponseCode::BadRequest);
        }
        let mut operation =
            self.active_put.take().unwrap_or_else(|| PutOperation::new(self.srm_supported));
        match operation.handle_request(request) {
            Ok(PutAction::SendResponse(response)) => {
                self.active_put = Some(operation);
                self.send_response(response)
            }
            Ok(PutAction::None) => {
                self.active_put = Some(operation);
                Ok(())
            }
            Ok(PutAction::PutData(data, headers)) => {
                let result = self.handler.put(data, headers);
                let response = operation.handle_handler_result(result)?;
                self.send_response(response)
            }
            Ok(PutAction::Delete(headers)) => {
                let result = self.handler.delete(headers);
                let response = operation.handle_handler_result(result)?;
                self.send_response(response)
            }
            Err(e) => {
                warn!(%e, "invalid PUT request");
                self.reject(ResponseCode::BadRequest)
            }
        }
    }

    fn handle_get(&mut self, request: RequestPacket) -> Result<(), Error> {
        if !self.connected {
            return self.reject(ResponseCode::BadRequest);
        }
        let mut operation = self.active_get.take().unwrap_or_else(|| {
            GetOperation::new(self.session.max_packet_size(), self.srm_supported)
        });
        match operation.handle_request(request) {
            Ok(GetAction::SendResponse(response)) => {
                if !operation.is_complete() {
                    self.active_get = Some(operation);
                }
                self.send_response(response)
            }
            Ok(GetAction::GetData(headers)) => match self.handler.get(headers) {
                Ok((data, response_headers)) => {
                    let first = operation.start_response_phase(data, response_headers)?;
                    self.send_response(first)?;
                    // With SRM active the remaining chunks are streamed without further
                    // requests from the peer.
                    if operation.srm_status() == SingleResponseMode::Enable {
                        while !operation.is_complete() {
                            let response = operation.next_response()?;
                            self.send_response(response)?;
                        }
                    }
                    if !operation.is_complete() {
                        self.active_get = Some(operation);
                    }
                    Ok(())
                }
                Err((code, response_headers)) => {
                    trace!("handler rejected GET request: {code:?}");
                    self.send_response(ResponsePacket::new_no_data(code, response_headers))
                }
            },
            Err(e) => {
                warn!(%e, "invalid GET request");
                self.reject(ResponseCode::BadRequest)
            }
        }
    }

    fn handle_set_path(&mut self, request: RequestPacket) -> Result<(), Error> {
        if !self.connected {
            return self.reject(ResponseCode::BadRequest);
        }
        // The 2 data bytes are the flags byte and the reserved constants byte.
        let flags = SetPathFlags::from_bits_truncate(request.data()[0]);
        let headers = HeaderSet::from(request);
        let backup = flags.contains(SetPathFlags::BACKUP);
        let create = !flags.contains(SetPathFlags::DONT_CREATE);
        match self.handler.set_path(headers, backup, create) {
            Ok(response_headers) => {
                self.send_response(ResponsePacket::new_no_data(ResponseCode::Ok, response_headers))
            }
            Err((code, response_headers)) => {
                self.send_response(ResponsePacket::new_no_data(code, response_headers))
            }
        }
    }

    fn handle_abort(&mut self, _request: RequestPacket) -> Result<(), Error> {
        trace!("peer aborted operation");
        self.active_put = None;
        self.active_get = None;
        self.send_response(ResponsePacket::new_no_data(ResponseCode::Ok, HeaderSet::new()))
    }

    fn reject(&mut self, code: ResponseCode) -> Result<(), Error> {
        self.send_response(ResponsePacket::new_no_data(code, HeaderSet::new()))
    }

    /// Encodes and sends `response`, enforcing the negotiated maximum packet size.
    fn send_response(&mut self, response: ResponsePacket) -> Result<(), Error> {
        if response.encoded_len() > usize::from(self.session.max_packet_size()) {
            return Err(Error::operation(
                OpCode::Reserved,
                "response exceeds negotiated packet size",
            ));
        }
        let mut buf = vec![0; response.encoded_len()];
        response.encode(&mut buf[..])?;
        self.transport.send(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use std::sync::Arc;

    use crate::transport::test_utils::FakeTransport;

    /// Records handler calls and replies with configurable verdicts.
    #[derive(Clone, Default)]
    struct TestHandler {
        accept_connect: Arc<Mutex<bool>>,
        puts: Arc<Mutex<Vec<(Vec<u8>, HeaderSet)>>>,
        deletes: Arc<Mutex<Vec<HeaderSet>>>,
        set_paths: Arc<Mutex<Vec<(bool, bool)>>>,
        get_response: Arc<Mutex<Option<(Vec<u8>, HeaderSet)>>>,
    }

    impl TestHandler {
        fn accepting() -> Self {
            let handler = Self::default();
            *handler.accept_connect.lock() = true;
            handler
        }
    }

    impl ObexServerHandler for TestHandler {
        fn connect(&mut self, _headers: HeaderSet) -> ObexResult {
            if *self.accept_connect.lock() {
                Ok(HeaderSet::new())
            } else {
                Err((ResponseCode::Forbidden, HeaderSet::new()))
            }
        }

        fn set_path(&mut self, _headers: HeaderSet, backup: bool, create: bool) -> ObexResult {
            self.set_paths.lock().push((backup, create));
            Ok(HeaderSet::new())
        }

        fn put(&mut self, data: Vec<u8>, headers: HeaderSet) -> ObexResult {
            self.puts.lock().push((data, headers));
            Ok(HeaderSet::new())
        }

        fn delete(&mut self, headers: HeaderSet) -> ObexResult {
            self.deletes.lock().push(headers);
            Ok(HeaderSet::new())
        }

        fn get(&mut self, _headers: HeaderSet) -> Result<(Vec<u8>, HeaderSet), ObexOperationError> {
            self.get_response
                .lock()
                .take()
                .ok_or((ResponseCode::NotFound, HeaderSet::new()))
        }
    }

    fn new_session(
        max_packet_size: u16,
        srm_supported: bool,
    ) -> (ObexServerSession<FakeTransport, TestHandler>, FakeTransport, TestHandler) {
        let transport = FakeTransport::new();
        let handler = TestHandler::accepting();
        let session = ObexServerSession::new(
            transport.clone(),
            handler.clone(),
            max_packet_size,
            srm_supported,
        );
        (session, transport, handler)
    }

    fn encode_request(request: &RequestPacket) -> Vec<u8> {
        let mut buf = vec![0; request.encoded_len()];
        request.encode(&mut buf[..]).expect("can encode");
        buf
    }

    fn connect(session: &mut ObexServerSession<FakeTransport, TestHandler>, transport: &FakeTransport) {
        let request = RequestPacket::new_connect(0xffff, HeaderSet::new());
        session.on_data_available(&encode_request(&request)).expect("valid request");
        let _ = transport.take_sent_packets();
    }

    #[track_caller]
    fn expect_response(transport: &FakeTransport, request: OpCode) -> ResponsePacket {
        let sent = transport.take_sent_packets();
        assert_eq!(sent.len(), 1, "expected exactly one response");
        ResponsePacket::decode(&sent[0][..], request).expect("valid response")
    }

    #[test]
    fn connect_handshake_success() {
        let (mut session, transport, _handler) = new_session(0x1000, false);
        assert!(!session.is_connected());

        let request = RequestPacket::new_connect(255, HeaderSet::new());
        session.on_data_available(&encode_request(&request)).expect("valid request");
        assert!(session.is_connected());
        // The negotiated packet size is the smaller of the two.
        assert_eq!(session.session().max_packet_size(), 255);

        let response = expect_response(&transport, OpCode::Connect);
        assert_eq!(*response.code(), ResponseCode::Ok);
        assert_eq!(response.data()[2..4], 255u16.to_be_bytes());
    }

    #[test]
    fn directed_connect_assigns_connection_id() {
        let (mut session, transport, _handler) = new_session(255, false);
        let target = vec![0xab; 16];
        let headers = HeaderSet::from_header(Header::Target(target.clone())).unwrap();
        let request = RequestPacket::new_connect(255, headers);
        session.on_data_available(&encode_request(&request)).expect("valid request");

        let response = expect_response(&transport, OpCode::Connect);
        assert_eq!(
            response.headers().get(&HeaderIdentifier::ConnectionId),
            Some(&Header::ConnectionId(1))
        );
        assert_eq!(response.headers().get(&HeaderIdentifier::Who), Some(&Header::Who(target)));
    }

    #[test]
    fn connect_rejected_by_handler() {
        let (mut session, transport, handler) = new_session(255, false);
        *handler.accept_connect.lock() = false;

        let request = RequestPacket::new_connect(255, HeaderSet::new());
        session.on_data_available(&encode_request(&request)).expect("valid request");
        assert!(!session.is_connected());
        let response = expect_response(&transport, OpCode::Connect);
        assert_eq!(*response.code(), ResponseCode::Forbidden);
    }

    #[test]
    fn request_before_connect_is_rejected() {
        let (mut session, transport, handler) = new_session(255, false);
        let request = RequestPacket::new_put_final(
            HeaderSet::from_header(Header::EndOfBody(vec![1])).unwrap(),
        );
        session.on_data_available(&encode_request(&request)).expect("valid request");
        let response = expect_response(&transport, OpCode::PutFinal);
        assert_eq!(*response.code(), ResponseCode::BadRequest);
        assert!(handler.puts.lock().is_empty());
    }

    #[test]
    fn multi_packet_put_reassembles_object() {
        let (mut session, transport, handler) = new_session(255, false);
        connect(&mut session, &transport);

        let headers1 = HeaderSet::from_header(Header::name("notes.txt")).unwrap();
        let request1 = RequestPacket::new_put(headers1);
        session.on_data_available(&encode_request(&request1)).expect("valid request");
        let response1 = expect_response(&transport, OpCode::Put);
        assert_eq!(*response1.code(), ResponseCode::Continue);

        let request2 = RequestPacket::new_put(
            HeaderSet::from_header(Header::Body((0..50).collect())).unwrap(),
        );
        session.on_data_available(&encode_request(&request2)).expect("valid request");
        let _ = expect_response(&transport, OpCode::Put);

        let request3 = RequestPacket::new_put_final(
            HeaderSet::from_header(Header::EndOfBody((50..100).collect())).unwrap(),
        );
        session.on_data_available(&encode_request(&request3)).expect("valid request");
        let response3 = expect_response(&transport, OpCode::PutFinal);
        assert_eq!(*response3.code(), ResponseCode::Ok);

        let puts = handler.puts.lock();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].0, (0..100).collect::<Vec<u8>>());
        assert!(puts[0].1.contains_header(&HeaderIdentifier::Name));
    }

    #[test]
    fn srm_put_skips_intermediate_acks() {
        let (mut session, transport, handler) = new_session(255, true);
        connect(&mut session, &transport);

        // First packet requests SRM - the ack enables it.
        let headers1 = HeaderSet::from_headers(vec![
            Header::name("big.bin"),
            SingleResponseMode::Enable.into(),
        ])
        .unwrap();
        session
            .on_data_available(&encode_request(&RequestPacket::new_put(headers1)))
            .expect("valid request");
        let response1 = expect_response(&transport, OpCode::Put);
        assert_eq!(
            response1.headers().get(&HeaderIdentifier::SingleResponseMode),
            Some(&Header::SingleResponseMode(SingleResponseMode::Enable))
        );

        // Intermediate data packets receive no acknowledgement.
        let request2 = RequestPacket::new_put(
            HeaderSet::from_header(Header::Body(vec![0xaa; 100])).unwrap(),
        );
        session.on_data_available(&encode_request(&request2)).expect("valid request");
        assert!(transport.sent_packets().is_empty());

        // The final packet is always acknowledged.
        let request3 = RequestPacket::new_put_final(
            HeaderSet::from_header(Header::EndOfBody(vec![0xbb; 50])).unwrap(),
        );
        session.on_data_available(&encode_request(&request3)).expect("valid request");
        let response3 = expect_response(&transport, OpCode::PutFinal);
        assert_eq!(*response3.code(), ResponseCode::Ok);
        assert_eq!(handler.puts.lock()[0].0.len(), 150);
    }

    #[test]
    fn put_without_body_is_delete() {
        let (mut session, transport, handler) = new_session(255, false);
        connect(&mut session, &transport);

        let headers = HeaderSet::from_header(Header::name("stale.txt")).unwrap();
        let request = RequestPacket::new_put_final(headers);
        session.on_data_available(&encode_request(&request)).expect("valid request");
        let response = expect_response(&transport, OpCode::PutFinal);
        assert_eq!(*response.code(), ResponseCode::Ok);

        assert!(handler.puts.lock().is_empty());
        let deletes = handler.deletes.lock();
        assert_eq!(deletes.len(), 1);
        assert!(deletes[0].contains_header(&HeaderIdentifier::Name));
    }

    #[test]
    fn multi_packet_get_without_srm() {
        let (mut session, transport, handler) = new_session(255, false);
        connect(&mut session, &transport);
        let payload: Vec<u8> = (0..600).map(|i| i as u8).collect();
        *handler.get_response.lock() = Some((payload.clone(), HeaderSet::new()));

        let headers = HeaderSet::from_header(Header::name("a")).unwrap();
        let request = RequestPacket::new_get_final(headers);
        session.on_data_available(&encode_request(&request)).expect("valid request");
        // Without SRM, only the first chunk goes out per request.
        let response1 = expect_response(&transport, OpCode::GetFinal);
        assert_eq!(*response1.code(), ResponseCode::Continue);

        let mut received: Vec<u8> = HeaderSet::from(response1).remove_body(false).unwrap();
        loop {
            let request = RequestPacket::new_get_final(HeaderSet::new());
            session.on_data_available(&encode_request(&request)).expect("valid request");
            let response = expect_response(&transport, OpCode::GetFinal);
            let code = *response.code();
            let mut headers = HeaderSet::from(response);
            if code == ResponseCode::Ok {
                received.extend(headers.remove_body(true).unwrap());
                break;
            }
            received.extend(headers.remove_body(false).unwrap());
        }
        assert_eq!(received, payload);
    }

    #[test]
    fn srm_get_streams_all_chunks() {
        let (mut session, transport, handler) = new_session(255, true);
        connect(&mut session, &transport);
        let payload: Vec<u8> = (0..600).map(|i| i as u8).collect();
        *handler.get_response.lock() = Some((payload.clone(), HeaderSet::new()));

        let headers = HeaderSet::from_headers(vec![
            Header::name("a"),
            SingleResponseMode::Enable.into(),
        ])
        .unwrap();
        let request = RequestPacket::new_get_final(headers);
        session.on_data_available(&encode_request(&request)).expect("valid request");

        // The entire payload streams out without further requests.
        let sent = transport.take_sent_packets();
        assert!(sent.len() > 1);
        let mut received = Vec::new();
        for (i, packet) in sent.iter().enumerate() {
            let response =
                ResponsePacket::decode(&packet[..], OpCode::GetFinal).expect("valid response");
            let code = *response.code();
            let mut headers = HeaderSet::from(response);
            if i == sent.len() - 1 {
                assert_eq!(code, ResponseCode::Ok);
                received.extend(headers.remove_body(true).unwrap());
            } else {
                assert_eq!(code, ResponseCode::Continue);
                received.extend(headers.remove_body(false).unwrap());
            }
        }
        assert_eq!(received, payload);
    }

    #[test]
    fn get_rejected_by_handler() {
        let (mut session, transport, _handler) = new_session(255, false);
        connect(&mut session, &transport);
        // No staged get_response - the handler rejects with NotFound.
        let request = RequestPacket::new_get_final(HeaderSet::new());
        session.on_data_available(&encode_request(&request)).expect("valid request");
        let response = expect_response(&transport, OpCode::GetFinal);
        assert_eq!(*response.code(), ResponseCode::NotFound);
    }

    #[test]
    fn set_path_flags_are_relayed() {
        let (mut session, transport, handler) = new_session(255, false);
        connect(&mut session, &transport);

        let headers = HeaderSet::from_header(Header::name("photos")).unwrap();
        let request = RequestPacket::new_set_path(SetPathFlags::DONT_CREATE, headers);
        session.on_data_available(&encode_request(&request)).expect("valid request");
        let response = expect_response(&transport, OpCode::SetPath);
        assert_eq!(*response.code(), ResponseCode::Ok);
        // DONT_CREATE set, BACKUP unset.
        assert_eq!(handler.set_paths.lock()[0], (false, false));

        let request = RequestPacket::new_set_path(SetPathFlags::BACKUP, HeaderSet::new());
        session.on_data_available(&encode_request(&request)).expect("valid request");
        let _ = expect_response(&transport, OpCode::SetPath);
        assert_eq!(handler.set_paths.lock()[1], (true, true));
    }

    #[test]
    fn abort_discards_operation_state() {
        let (mut session, transport, handler) = new_session(255, false);
        connect(&mut session, &transport);

        // Start a multi-packet PUT.
        let request = RequestPacket::new_put(
            HeaderSet::from_header(Header::Body(vec![1, 2, 3])).unwrap(),
        );
        session.on_data_available(&encode_request(&request)).expect("valid request");
        let _ = transport.take_sent_packets();

        let abort = RequestPacket::new_abort(HeaderSet::new());
        session.on_data_available(&encode_request(&abort)).expect("valid request");
        let response = expect_response(&transport, OpCode::Abort);
        assert_eq!(*response.code(), ResponseCode::Ok);

        // A fresh PUT starts from a clean slate - the previously staged bytes are gone.
        let request = RequestPacket::new_put_final(
            HeaderSet::from_header(Header::EndOfBody(vec![9])).unwrap(),
        );
        session.on_data_available(&encode_request(&request)).expect("valid request");
        assert_eq!(handler.puts.lock()[0].0, vec![9]);
    }

    #[test]
    fn oversized_response_is_error() {
        let (mut session, transport, handler) = new_session(255, false);
        connect(&mut session, &transport);
        // The handler's informational headers alone exceed the negotiated packet size.
        let big_headers =
            HeaderSet::from_header(Header::Description("x".repeat(200).into())).unwrap();
        *handler.get_response.lock() = Some((vec![1, 2, 3], big_headers));

        let request = RequestPacket::new_get_final(HeaderSet::new());
        let result = session.on_data_available(&encode_request(&request));
        assert_matches!(result, Err(Error::OperationError { .. }));
        assert!(transport.sent_packets().is_empty());
    }

    #[test]
    fn unsupported_request_is_not_implemented() {
        let (mut session, transport, _handler) = new_session(255, false);
        connect(&mut session, &transport);
        let request = RequestPacket::new_session(HeaderSet::new());
        session.on_data_available(&encode_request(&request)).expect("valid request");
        let response = expect_response(&transport, OpCode::Session);
        assert_eq!(*response.code(), ResponseCode::NotImplemented);
    }
}
