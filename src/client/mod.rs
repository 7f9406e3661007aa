// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The OBEX client role - drives requests toward a remote OBEX server and parses its responses.
//!
//! The driver is sans-io and event based. Public operations validate the current state, encode a
//! request and hand it to the [`ObexTransport`]; inbound packets are delivered to
//! [`ObexClient::on_data_available`] by the embedder's dispatcher and routed by the opcode of the
//! most recently sent request. Every logical request terminates in exactly one
//! [`ObexClientObserver`] callback.

use std::collections::VecDeque;
use tracing::{info, trace, warn};

mod receive;
mod send;

pub use receive::ClientReceivedObject;
pub use send::ClientSendObject;

use crate::body::SharedBodyObject;
use crate::encoding::Encodable;
use crate::error::Error;
use crate::header::tlv::{self, SessionOpcode, SessionParameterSet};
use crate::header::{Header, HeaderIdentifier, HeaderSet};
use crate::operation::{
    ActionIdentifier, OpCode, RequestPacket, ResponseCode, ResponsePacket, SetPathFlags,
};
use crate::session::{DeviceAddress, ObexSession, ReliableSession, ReliableSessionState};
use crate::transport::ObexTransport;

/// The lifecycle of the client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObexClientState {
    /// No transport is available yet.
    Init,
    /// The RFCOMM/L2CAP transport is up but no OBEX CONNECT has completed.
    TransportConnected,
    /// A reliable session was established before the OBEX CONNECT.
    ReliableSessionCreated,
    /// The OBEX CONNECT handshake completed - operations may be issued.
    Connected,
    /// The reliable session is suspended - only RESUME/CLOSE are valid.
    ReliableSessionSuspended,
    /// An OBEX DISCONNECT completed. The transport may still be up.
    Disconnected,
    /// The transport dropped.
    TransportDisconnected,
}

/// Callbacks reporting the outcome of client operations and transport events.
///
/// Exactly one terminal callback is invoked per logical request.
pub trait ObexClientObserver: Send {
    fn on_transport_failed(&mut self, _error: Error) {}
    fn on_connected(&mut self, _headers: HeaderSet) {}
    fn on_connect_failed(&mut self, _response: ResponseCode) {}
    fn on_disconnected(&mut self) {}
    /// Terminal result of a PUT, GET, SETPATH, ACTION, SESSION or ABORT request. `operation` is
    /// the logical opcode of the request that completed.
    fn on_action_completed(&mut self, _operation: OpCode, _result: Result<HeaderSet, Error>) {}
    fn on_busy(&mut self, _busy: bool) {}
}

/// An OBEX client connection to a remote OBEX server.
pub struct ObexClient<T: ObexTransport, O: ObexClientObserver> {
    transport: T,
    observer: O,
    state: ObexClientState,
    session: ObexSession,
    /// Local device address - used to derive the reliable session id.
    local_address: DeviceAddress,
    /// Whether the transport supports Single Response Mode (L2CAP ERTM).
    srm_supported: bool,
    /// The opcode of the most recently sent request - inbound packets are decoded against it.
    last_request: Option<OpCode>,
    send_object: Option<ClientSendObject>,
    receive_object: Option<ClientReceivedObject>,
    /// Remaining SETPATH requests of a multi-segment path change.
    set_path_queue: VecDeque<RequestPacket>,
    /// Set when an abort was requested while a response is outstanding - the stale response is
    /// swallowed and the ABORT is sent in its place.
    waiting_abort: bool,
    /// The SESSION sub-operation awaiting a response.
    pending_session_op: Option<SessionOpcode>,
    /// The nonce sent in the pending session CREATE - needed to derive the session id.
    pending_nonce: Option<Vec<u8>>,
}

impl<T: ObexTransport, O: ObexClientObserver> ObexClient<T, O> {
    pub fn new(
        transport: T,
        observer: O,
        local_address: DeviceAddress,
        max_packet_size: u16,
        srm_supported: bool,
    ) -> Self {
        Self {
            transport,
            observer,
            state: ObexClientState::Init,
            session: ObexSession::new(max_packet_size),
            local_address,
            srm_supported,
            last_request: None,
            send_object: None,
            receive_object: None,
            set_path_queue: VecDeque::new(),
            waiting_abort: false,
            pending_session_op: None,
            pending_nonce: None,
        }
    }

    pub fn state(&self) -> ObexClientState {
        self.state
    }

    pub fn session(&self) -> &ObexSession {
        &self.session
    }

    /// Returns true if a request or transfer is currently outstanding.
    pub fn is_processing(&self) -> bool {
        self.last_request.is_some()
            || self.send_object.is_some()
            || self.receive_object.is_some()
            || !self.set_path_queue.is_empty()
    }

    /// Validates that a new operation may be issued on a connected session.
    fn check_before_request(&self, operation: OpCode) -> Result<(), Error> {
        if self.state != ObexClientState::Connected {
            return Err(Error::state(format!("{operation:?} requires a connected session")));
        }
        if self.is_processing() {
            return Err(Error::OperationInProgress);
        }
        Ok(())
    }

    /// Encodes and sends `request`, recording its opcode for response dispatch.
    /// If a reliable session is active, the rolling sequence number is attached first.
    fn send_request(&mut self, mut request: RequestPacket) -> Result<(), Error> {
        if *request.code() != OpCode::Session {
            if let Some(reliable) = self.session.reliable_mut() {
                if reliable.state() == ReliableSessionState::Active {
                    let seq = reliable.sequence_number();
                    if !request
                        .headers()
                        .contains_header(&HeaderIdentifier::SessionSequenceNumber)
                    {
                        request.headers_mut().add(Header::SessionSequenceNumber(seq))?;
                    }
                    reliable.advance_sequence();
                }
            }
        }

        let mut buf = vec![0; request.encoded_len()];
        request.encode(&mut buf[..])?;
        trace!(code = ?request.code(), len = buf.len(), "sending OBEX request");
        self.transport.send(&buf)?;
        self.last_request = Some(*request.code());
        Ok(())
    }

    // Transport event entry points.

    pub fn on_transport_connected(&mut self) {
        if self.state == ObexClientState::Init {
            self.state = ObexClientState::TransportConnected;
        }
    }

    pub fn on_transport_disconnected(&mut self) {
        self.state = ObexClientState::TransportDisconnected;
        self.cleanup_transfers();
        self.observer.on_disconnected();
    }

    pub fn on_transport_error(&mut self, error: Error) {
        warn!(%error, "transport error");
        self.state = ObexClientState::TransportDisconnected;
        self.cleanup_transfers();
        self.observer.on_transport_failed(error);
    }

    /// Toggles transport flow-control backpressure. While busy, no body chunks are produced.
    pub fn on_data_busy(&mut self, busy: bool) {
        self.session.set_busy(busy);
        self.observer.on_busy(busy);
        if !busy {
            if let Err(e) = self.pump_send_chunks() {
                self.fail_transfer(OpCode::Put, e);
            }
        }
    }

    /// Parses an inbound packet as the response to the most recently sent request and routes it
    /// to the per-operation handler.
    pub fn on_data_available(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let Some(request) = self.last_request else {
            warn!("received data with no outstanding request");
            return Err(Error::state("no outstanding request"));
        };
        let response = ResponsePacket::decode(bytes, request)?;
        self.last_request = None;

        // An abort issued mid-transfer swallows the stale in-flight response.
        if self.waiting_abort && matches!(request, OpCode::Put | OpCode::PutFinal | OpCode::Get | OpCode::GetFinal)
        {
            trace!(?request, "swallowing stale response for aborted operation");
            return self.send_abort_packet();
        }

        match request {
            OpCode::Connect => self.handle_connect_response(response),
            OpCode::Disconnect => self.handle_disconnect_response(response),
            OpCode::Put | OpCode::PutFinal => self.handle_put_response(response),
            OpCode::Get | OpCode::GetFinal => self.handle_get_response(response),
            OpCode::SetPath => self.handle_set_path_response(response),
            OpCode::Action | OpCode::ActionFinal => self.handle_action_response(response),
            OpCode::Session => self.handle_session_response(response),
            OpCode::Abort => self.handle_abort_response(response),
            code => {
                warn!(?code, "response for unsupported operation");
                Err(Error::operation(code, "unexpected response"))
            }
        }
    }

    // Operations.

    /// Initiates the OBEX CONNECT handshake. `headers` may carry a Target, authentication
    /// headers or application parameters.
    pub fn connect(&mut self, headers: HeaderSet) -> Result<(), Error> {
        match self.state {
            ObexClientState::TransportConnected | ObexClientState::ReliableSessionCreated => {}
            s => return Err(Error::state(format!("cannot CONNECT from {s:?}"))),
        }
        if self.last_request.is_some() {
            return Err(Error::OperationInProgress);
        }
        if let Some(Header::Target(target)) = headers.get(&HeaderIdentifier::Target) {
            self.session.set_target(target.clone());
        }
        let request = RequestPacket::new_connect(self.session.max_packet_size(), headers);
        self.send_request(request)
    }

    /// Tears down the connection. When `with_obex_request` is set a DISCONNECT packet is
    /// exchanged first; otherwise the transport is dropped immediately.
    pub fn disconnect(&mut self, with_obex_request: bool) -> Result<(), Error> {
        if with_obex_request && self.state == ObexClientState::Connected {
            if self.is_processing() {
                return Err(Error::OperationInProgress);
            }
            let mut headers = HeaderSet::new();
            if let Some(id) = self.session.connection_id() {
                headers.add(Header::ConnectionId(id))?;
            }
            return self.send_request(RequestPacket::new_disconnect(headers));
        }
        self.transport.disconnect();
        self.state = ObexClientState::TransportDisconnected;
        self.cleanup_transfers();
        self.observer.on_disconnected();
        Ok(())
    }

    /// Informational headers must not carry object payload - the transfer owns Body/EndOfBody.
    fn validate_transfer_headers(operation: OpCode, headers: &HeaderSet) -> Result<(), Error> {
        if headers.contains_header(&HeaderIdentifier::Body)
            || headers.contains_header(&HeaderIdentifier::EndOfBody)
        {
            return Err(Error::operation(operation, "body headers are managed by the transfer"));
        }
        Ok(())
    }

    /// Sends the object read from `body` to the remote server.
    pub fn put(&mut self, headers: HeaderSet, body: SharedBodyObject) -> Result<(), Error> {
        self.check_before_request(OpCode::Put)?;
        Self::validate_transfer_headers(OpCode::Put, &headers)?;
        let mut headers = headers;
        if let Some(id) = self.session.connection_id() {
            headers.add(Header::ConnectionId(id))?;
        }
        let mut object = ClientSendObject::new(headers, body, self.srm_supported);
        let request = object.next_request(self.session.max_packet_size())?;
        self.send_object = Some(object);
        self.send_request(request)
    }

    /// Retrieves the object identified by `headers` from the remote server into `body`.
    pub fn get(&mut self, headers: HeaderSet, body: SharedBodyObject) -> Result<(), Error> {
        self.check_before_request(OpCode::Get)?;
        Self::validate_transfer_headers(OpCode::Get, &headers)?;
        let mut headers = headers;
        if let Some(id) = self.session.connection_id() {
            headers.add(Header::ConnectionId(id))?;
        }
        let mut object = ClientReceivedObject::new(headers, body, self.srm_supported);
        let request = object.first_request()?;
        self.receive_object = Some(object);
        self.send_request(request)
    }

    /// Changes the current folder on the remote server. An empty `segments` list with
    /// `SetPathFlags::BACKUP` backs up one level; multiple segments are applied one SETPATH
    /// request at a time with a single terminal callback for the whole sequence.
    pub fn set_path(&mut self, flags: SetPathFlags, segments: Vec<String>) -> Result<(), Error> {
        self.check_before_request(OpCode::SetPath)?;
        if segments.is_empty() && flags.is_empty() {
            return Err(Error::operation(OpCode::SetPath, "empty path change"));
        }

        let mut requests = VecDeque::new();
        if segments.is_empty() {
            requests.push_back(RequestPacket::new_set_path(flags, HeaderSet::new()));
        } else {
            for (i, segment) in segments.into_iter().enumerate() {
                let segment_flags = if i == 0 { flags } else { SetPathFlags::empty() };
                let headers = HeaderSet::from_header(Header::name(segment))?;
                requests.push_back(RequestPacket::new_set_path(segment_flags, headers));
            }
        }
        let first = requests.pop_front().expect("at least one request");
        self.set_path_queue = requests;
        self.send_request(first)
    }

    /// Copies the object `name` to `dest_name` on the remote server.
    pub fn copy_object(
        &mut self,
        name: impl Into<String>,
        dest_name: impl Into<String>,
    ) -> Result<(), Error> {
        self.action_request(ActionIdentifier::Copy, name, Some(dest_name.into()), None)
    }

    /// Moves (or renames) the object `name` to `dest_name` on the remote server.
    pub fn move_or_rename(
        &mut self,
        name: impl Into<String>,
        dest_name: impl Into<String>,
    ) -> Result<(), Error> {
        self.action_request(ActionIdentifier::MoveOrRename, name, Some(dest_name.into()), None)
    }

    /// Updates the permission bit mask of the object `name` on the remote server.
    pub fn set_permissions(
        &mut self,
        name: impl Into<String>,
        permissions: u32,
    ) -> Result<(), Error> {
        self.action_request(ActionIdentifier::SetPermissions, name, None, Some(permissions))
    }

    fn action_request(
        &mut self,
        action: ActionIdentifier,
        name: impl Into<String>,
        dest_name: Option<String>,
        permissions: Option<u32>,
    ) -> Result<(), Error> {
        self.check_before_request(OpCode::ActionFinal)?;
        let mut headers = HeaderSet::from_headers(vec![
            Header::ActionId(action.into()),
            Header::name(name.into()),
        ])?;
        if let Some(dest) = dest_name {
            headers.add(Header::DestName(dest.into()))?;
        }
        if let Some(permissions) = permissions {
            headers.add(Header::Permissions(permissions))?;
        }
        self.send_request(RequestPacket::new_action(headers))
    }

    /// Aborts the in-progress PUT or GET transfer. If a response is currently outstanding, the
    /// ABORT is deferred until that (stale) response arrives and is swallowed.
    pub fn abort(&mut self) -> Result<(), Error> {
        if self.send_object.is_none() && self.receive_object.is_none() {
            return Err(Error::state("no transfer to abort"));
        }
        if self.waiting_abort {
            return Err(Error::OperationInProgress);
        }
        if self.last_request.is_some() {
            info!("abort requested mid-exchange - deferring until the pending response arrives");
            self.waiting_abort = true;
            return Ok(());
        }
        self.send_abort_packet()
    }

    fn send_abort_packet(&mut self) -> Result<(), Error> {
        self.waiting_abort = false;
        let aborted = self.cleanup_transfers();
        if let Some(operation) = aborted {
            self.observer
                .on_action_completed(operation, Err(Error::operation(operation, "aborted")));
        }
        self.send_request(RequestPacket::new_abort(HeaderSet::new()))
    }

    // Reliable session operations.

    /// Creates a reliable session before the OBEX CONNECT handshake. `nonce` is this device's
    /// contribution to the session id digest.
    pub fn create_session(&mut self, nonce: Vec<u8>, timeout: u32) -> Result<(), Error> {
        if self.state != ObexClientState::TransportConnected {
            return Err(Error::state("session CREATE requires a bare transport connection"));
        }
        if self.last_request.is_some() {
            return Err(Error::OperationInProgress);
        }
        if self.session.reliable().is_some() {
            return Err(Error::session("reliable session already exists"));
        }
        let params = SessionParameterSet {
            device_address: Some(self.local_address.as_bytes().to_vec()),
            nonce: Some(nonce.clone()),
            timeout: Some(timeout),
            session_opcode: Some(SessionOpcode::Create),
            ..Default::default()
        };
        self.pending_nonce = Some(nonce);
        self.send_session_request(params, SessionOpcode::Create)
    }

    /// Suspends the active reliable session.
    pub fn suspend_session(&mut self) -> Result<(), Error> {
        self.check_session_op(SessionOpcode::Suspend, ReliableSessionState::Active)?;
        let params = SessionParameterSet {
            session_opcode: Some(SessionOpcode::Suspend),
            ..Default::default()
        };
        self.send_session_request(params, SessionOpcode::Suspend)
    }

    /// Resumes a suspended reliable session.
    pub fn resume_session(&mut self) -> Result<(), Error> {
        self.check_session_op(SessionOpcode::Resume, ReliableSessionState::Suspended)?;
        let reliable = self.session.reliable().expect("checked above");
        let params = SessionParameterSet {
            device_address: Some(self.local_address.as_bytes().to_vec()),
            session_id: Some(*reliable.id()),
            next_sequence_number: Some(reliable.sequence_number()),
            session_opcode: Some(SessionOpcode::Resume),
            ..Default::default()
        };
        self.send_session_request(params, SessionOpcode::Resume)
    }

    /// Closes the reliable session. The session can never be resumed afterwards.
    pub fn close_session(&mut self) -> Result<(), Error> {
        let Some(reliable) = self.session.reliable() else {
            return Err(Error::session("no reliable session"));
        };
        if reliable.state() == ReliableSessionState::Closed {
            return Err(Error::session("session already closed"));
        }
        if self.last_request.is_some() {
            return Err(Error::OperationInProgress);
        }
        let params = SessionParameterSet {
            session_id: Some(*reliable.id()),
            session_opcode: Some(SessionOpcode::Close),
            ..Default::default()
        };
        self.send_session_request(params, SessionOpcode::Close)
    }

    /// Renegotiates the reliable session timeout.
    pub fn set_session_timeout(&mut self, timeout: u32) -> Result<(), Error> {
        self.check_session_op(SessionOpcode::SetTimeout, ReliableSessionState::Active)?;
        let params = SessionParameterSet {
            timeout: Some(timeout),
            session_opcode: Some(SessionOpcode::SetTimeout),
            ..Default::default()
        };
        self.send_session_request(params, SessionOpcode::SetTimeout)
    }

    /// Statically rejects a session sub-operation that is invalid in the current session state.
    /// No packet is sent on rejection.
    fn check_session_op(
        &self,
        op: SessionOpcode,
        required: ReliableSessionState,
    ) -> Result<(), Error> {
        let Some(reliable) = self.session.reliable() else {
            return Err(Error::session(format!("{op:?} requires a reliable session")));
        };
        if reliable.state() != required {
            return Err(Error::session(format!(
                "{op:?} invalid in session state {:?}",
                reliable.state()
            )));
        }
        if self.last_request.is_some() {
            return Err(Error::OperationInProgress);
        }
        Ok(())
    }

    fn send_session_request(
        &mut self,
        params: SessionParameterSet,
        op: SessionOpcode,
    ) -> Result<(), Error> {
        let headers = HeaderSet::from_header(params.to_header()?)?;
        self.send_request(RequestPacket::new_session(headers))?;
        self.pending_session_op = Some(op);
        Ok(())
    }

    // Response handlers.

    fn handle_connect_response(&mut self, response: ResponsePacket) -> Result<(), Error> {
        let code = *response.code();
        if !code.is_success() {
            info!(?code, "peer rejected CONNECT");
            self.observer.on_connect_failed(code);
            return Ok(());
        }

        // The 4 data bytes are version (1), flags (1) and the peer's maximum packet size (2).
        // `ResponsePacket::decode` validates the data length per opcode.
        let peer_max =
            u16::from_be_bytes(response.data()[2..4].try_into().expect("checked length"));
        self.session.negotiate_max_packet_size(peer_max);

        let headers = HeaderSet::from(response);
        if let Some(Header::ConnectionId(id)) = headers.get(&HeaderIdentifier::ConnectionId) {
            self.session.set_connection_id(*id);
        }
        self.state = ObexClientState::Connected;
        info!(max_packet_size = self.session.max_packet_size(), "OBEX session connected");
        self.observer.on_connected(headers);
        Ok(())
    }

    fn handle_disconnect_response(&mut self, response: ResponsePacket) -> Result<(), Error> {
        // Any response completes the disconnect - the connection is gone either way.
        trace!(code = ?response.code(), "DISCONNECT response");
        self.state = ObexClientState::Disconnected;
        self.cleanup_transfers();
        self.observer.on_disconnected();
        Ok(())
    }

    fn handle_put_response(&mut self, response: ResponsePacket) -> Result<(), Error> {
        let Some(mut object) = self.send_object.take() else {
            return Err(Error::state("PUT response without a transfer"));
        };
        let code = *response.code();

        if object.is_complete() {
            let headers = HeaderSet::from(response);
            let result = if code.is_success() {
                Ok(headers)
            } else {
                Err(Error::peer_rejected(OpCode::PutFinal, code))
            };
            self.observer.on_action_completed(OpCode::Put, result);
            return Ok(());
        }

        if code != ResponseCode::Continue {
            object.terminate();
            self.observer
                .on_action_completed(OpCode::Put, Err(Error::peer_rejected(OpCode::Put, code)));
            return Ok(());
        }

        object.handle_response_headers(response.headers());
        self.send_object = Some(object);
        let result = if self.send_object.as_ref().expect("just set").srm_active() {
            // The peer streams no further responses until the final packet - push the remaining
            // chunks, subject to transport backpressure.
            self.pump_send_chunks()
        } else {
            let request = {
                let object = self.send_object.as_mut().expect("just set");
                object.next_request(self.session.max_packet_size())
            };
            request.and_then(|request| self.send_request(request))
        };
        // A body read or transport failure ends the transfer with a terminal error callback
        // rather than leaving the client wedged mid-operation.
        if let Err(e) = result {
            self.fail_transfer(OpCode::Put, e);
        }
        Ok(())
    }

    /// Sends queued PUT chunks while SRM is active and the transport is not busy.
    fn pump_send_chunks(&mut self) -> Result<(), Error> {
        loop {
            let Some(object) = self.send_object.as_mut() else { return Ok(()) };
            if !object.srm_active() || object.is_complete() || self.session.is_busy() {
                return Ok(());
            }
            let request = object.next_request(self.session.max_packet_size())?;
            self.send_request(request)?;
        }
    }

    fn handle_get_response(&mut self, response: ResponsePacket) -> Result<(), Error> {
        let Some(mut object) = self.receive_object.take() else {
            return Err(Error::state("GET response without a transfer"));
        };
        match object.handle_response(response) {
            Ok(true) => {
                let info = object.take_info_headers();
                self.observer.on_action_completed(OpCode::Get, Ok(info));
                Ok(())
            }
            Ok(false) => {
                if object.needs_continuation() {
                    let request = object.continuation_request();
                    self.receive_object = Some(object);
                    if let Err(e) = self.send_request(request) {
                        self.fail_transfer(OpCode::Get, e);
                    }
                    Ok(())
                } else {
                    // SRM - the peer streams the next packet without a new request.
                    self.receive_object = Some(object);
                    self.last_request = Some(OpCode::GetFinal);
                    Ok(())
                }
            }
            Err(e) => {
                object.terminate();
                self.observer.on_action_completed(OpCode::Get, Err(e));
                Ok(())
            }
        }
    }

    fn handle_set_path_response(&mut self, response: ResponsePacket) -> Result<(), Error> {
        let code = *response.code();
        if !code.is_success() {
            self.set_path_queue.clear();
            self.observer.on_action_completed(
                OpCode::SetPath,
                Err(Error::peer_rejected(OpCode::SetPath, code)),
            );
            return Ok(());
        }
        if let Some(next) = self.set_path_queue.pop_front() {
            return self.send_request(next);
        }
        self.observer.on_action_completed(OpCode::SetPath, Ok(HeaderSet::from(response)));
        Ok(())
    }

    fn handle_action_response(&mut self, response: ResponsePacket) -> Result<(), Error> {
        let code = *response.code();
        let result = if code.is_success() {
            Ok(HeaderSet::from(response))
        } else {
            Err(Error::peer_rejected(OpCode::ActionFinal, code))
        };
        self.observer.on_action_completed(OpCode::ActionFinal, result);
        Ok(())
    }

    fn handle_abort_response(&mut self, response: ResponsePacket) -> Result<(), Error> {
        // Any response code completes the abort.
        trace!(code = ?response.code(), "ABORT response");
        self.observer.on_action_completed(OpCode::Abort, Ok(HeaderSet::from(response)));
        Ok(())
    }

    fn handle_session_response(&mut self, response: ResponsePacket) -> Result<(), Error> {
        let Some(op) = self.pending_session_op.take() else {
            return Err(Error::state("SESSION response without a pending sub-operation"));
        };
        let code = *response.code();
        if !code.is_success() {
            self.pending_nonce = None;
            self.observer.on_action_completed(
                OpCode::Session,
                Err(Error::peer_rejected(OpCode::Session, code)),
            );
            return Ok(());
        }

        let headers = HeaderSet::from(response);
        let params = match headers.get(&HeaderIdentifier::SessionParameters) {
            Some(header) => SessionParameterSet::try_from(header)?,
            None => SessionParameterSet::default(),
        };

        match op {
            SessionOpcode::Create => {
                // The peer either echoes a session id or supplies its address & nonce so both
                // sides can derive the same digest.
                let nonce = self.pending_nonce.take().unwrap_or_default();
                let id = match (params.session_id, &params.device_address, &params.nonce) {
                    (Some(id), _, _) => id,
                    (None, Some(peer_address), Some(peer_nonce)) => tlv::session_id(
                        self.local_address.as_bytes(),
                        &nonce,
                        peer_address,
                        peer_nonce,
                    ),
                    _ => {
                        return Err(Error::session("CREATE response missing session parameters"))
                    }
                };
                let timeout = params.timeout.unwrap_or(tlv::SESSION_TIMEOUT_INFINITE);
                let mut reliable = ReliableSession::new(id, timeout);
                reliable.activate()?;
                self.session.set_reliable(reliable);
                self.state = ObexClientState::ReliableSessionCreated;
                info!("reliable session created");
            }
            SessionOpcode::Suspend => {
                self.session.reliable_mut().expect("session op validated").suspend()?;
                self.state = ObexClientState::ReliableSessionSuspended;
            }
            SessionOpcode::Resume => {
                let reliable = self.session.reliable_mut().expect("session op validated");
                // The peer echoes the session id it is resuming - a mismatch rejects the resume.
                let id = params.session_id.unwrap_or(*reliable.id());
                let seq = params.next_sequence_number.unwrap_or(reliable.sequence_number());
                reliable.resume(&id, seq)?;
                reliable.activate()?;
                self.state = ObexClientState::Connected;
            }
            SessionOpcode::Close => {
                if let Some(mut reliable) = self.session.take_reliable() {
                    reliable.close();
                }
                if self.state == ObexClientState::ReliableSessionCreated {
                    self.state = ObexClientState::TransportConnected;
                }
            }
            SessionOpcode::SetTimeout => {
                let timeout = params.timeout.unwrap_or(tlv::SESSION_TIMEOUT_INFINITE);
                self.session.reliable_mut().expect("session op validated").set_timeout(timeout);
            }
        }
        self.observer.on_action_completed(OpCode::Session, Ok(headers));
        Ok(())
    }

    /// Terminates the in-flight transfer after an internal failure, reporting `error` as its
    /// terminal result.
    fn fail_transfer(&mut self, operation: OpCode, error: Error) {
        let _ = self.cleanup_transfers();
        self.observer.on_action_completed(operation, Err(error));
    }

    /// Drops any in-flight transfer objects, closing their body objects. Returns the logical
    /// opcode of the transfer that was dropped, if any.
    fn cleanup_transfers(&mut self) -> Option<OpCode> {
        let mut aborted = None;
        if let Some(mut object) = self.send_object.take() {
            object.terminate();
            aborted = Some(OpCode::Put);
        }
        if let Some(mut object) = self.receive_object.take() {
            object.terminate();
            aborted = Some(OpCode::Get);
        }
        self.set_path_queue.clear();
        aborted
    }
}
