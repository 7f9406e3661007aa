// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use tracing::trace;
use uuid::Uuid;

use crate::encoding::{decodable_enum, Decodable, Encodable};
use crate::error::{Error, PacketError};

mod obex_string;
pub mod tlv;

pub use obex_string::ObexString;

decodable_enum! {
    /// The Header Encoding is the upper 2 bits of the Header Identifier (HI) and describes the type
    /// of payload included in the Header.
    /// Defined in OBEX 1.5 Section 2.1.
    enum HeaderEncoding<u8, PacketError, HeaderEncoding> {
        /// A Header with null terminated Unicode text. The text is encoded in UTF-16 format. The
        /// text length is encoded as a two byte unsigned integer.
        Text = 0x00,
        /// A Header with a byte sequence. The sequence length is encoded as a two byte unsigned
        /// integer.
        Bytes = 0x40,
        /// A Header with a 1-byte payload.
        OneByte = 0x80,
        /// A Header with a 4-byte payload.
        FourBytes = 0xC0,
    }
}

/// The OBEX Header Identifier (HI) identifies the type of OBEX packet.
///
/// The HI is a one-byte unsigned value and is split into the upper 2 bits and lower 6 bits. The
/// upper 2 bits indicate the header encoding and the lower 6 bits indicate the type of the
/// header.
/// Defined in OBEX 1.5 Section 2.1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HeaderIdentifier {
    /// Number of objects.
    Count = 0xC0,
    /// Name of the object (typically a file name).
    Name = 0x01,
    /// Type of object (e.g. text, html, ...)
    Type = 0x42,
    /// The length of the object in bytes.
    Length = 0xC3,
    /// Date/time stamp - ISO 8601. This representation is preferred.
    TimeIso8601 = 0x44,
    /// Date/time stamp - 4 byte representation.
    Time4Byte = 0xC4,
    /// Text description of the object.
    Description = 0x05,
    /// Name of the service that the operation is targeting.
    Target = 0x46,
    /// An HTTP 1.x header.
    Http = 0x47,
    /// A chunk of the object body.
    Body = 0x48,
    /// The final chunk of the object body.
    EndOfBody = 0x49,
    /// Identifies the OBEX application session.
    Who = 0x4A,
    /// An identifier associated with the OBEX connection - used for connection multiplexing.
    ConnectionId = 0xCB,
    /// Extended information about the OBEX connection.
    ApplicationParameters = 0x4C,
    /// Authentication digest challenge.
    AuthenticationChallenge = 0x4D,
    /// Authentication digest response.
    AuthenticationResponse = 0x4E,
    /// Indicates the creator of the object.
    CreatorId = 0xCF,
    /// Uniquely identifies the network client.
    WanUuid = 0x50,
    /// Class of an OBEX object,
    ObjectClass = 0x51,
    /// Parameters associated with the OBEX session.
    SessionParameters = 0x52,
    /// Sequence number included in each OBEX packet - used for reliability.
    SessionSequenceNumber = 0x93,
    /// Specifies the type of ACTION Operation.
    ActionId = 0x94,
    /// The destination for an object - used in certain ACTION Operations.
    DestName = 0x15,
    /// Bit mask for setting permissions.
    Permissions = 0xD6,
    /// Indicates that Single Response Mode (SRM) should be used.
    SingleResponseMode = 0x97,
    /// Specifies the parameters used during SRM.
    SingleResponseModeParameters = 0x98,
    // 0x30 to 0x3F, 0x70 to 0x7F, 0xB0 to 0xBF, 0xF0 to 0xFF, is user defined.
    User(u8),
    // 0x19 to 0x2F, 0x59 to 0x6F, 0x99 to 0xAF, 0xD9 to 0xEF, is RFA.
}

impl HeaderIdentifier {
    fn is_user(id: u8) -> bool {
        // The user-defined space is between 0x30 and 0x3f and includes all combinations of the
        // upper 2 bits of the `id`.
        let lower_6_bits = id & 0x3f;
        lower_6_bits >= 0x30 && lower_6_bits <= 0x3f
    }

    fn is_reserved(id: u8) -> bool {
        // The reserved space is between 0x19 and 0x2f and includes all combinations of the
        // upper 2 bits of the `id`.
        let lower_6_bits = id & 0x3f;
        lower_6_bits >= 0x19 && lower_6_bits <= 0x2f
    }

    fn encoding(&self) -> HeaderEncoding {
        let id_raw: u8 = self.into();
        // The encoding is the upper 2 bits of the HeaderIdentifier.
        HeaderEncoding::try_from(id_raw & 0xc0).expect("valid Header encoding")
    }
}

impl TryFrom<u8> for HeaderIdentifier {
    type Error = PacketError;

    fn try_from(src: u8) -> Result<Self, Self::Error> {
        match src {
            0xC0 => Ok(Self::Count),
            0x01 => Ok(Self::Name),
            0x42 => Ok(Self::Type),
            0xC3 => Ok(Self::Length),
            0x44 => Ok(Self::TimeIso8601),
            0xC4 => Ok(Self::Time4Byte),
            0x05 => Ok(Self::Description),
            0x46 => Ok(Self::Target),
            0x47 => Ok(Self::Http),
            0x48 => Ok(Self::Body),
            0x49 => Ok(Self::EndOfBody),
            0x4A => Ok(Self::Who),
            0xCB => Ok(Self::ConnectionId),
            0x4C => Ok(Self::ApplicationParameters),
            0x4D => Ok(Self::AuthenticationChallenge),
            0x4E => Ok(Self::AuthenticationResponse),
            0xCF => Ok(Self::CreatorId),
            0x50 => Ok(Self::WanUuid),
            0x51 => Ok(Self::ObjectClass),
            0x52 => Ok(Self::SessionParameters),
            0x93 => Ok(Self::SessionSequenceNumber),
            0x94 => Ok(Self::ActionId),
            0x15 => Ok(Self::DestName),
            0xD6 => Ok(Self::Permissions),
            0x97 => Ok(Self::SingleResponseMode),
            0x98 => Ok(Self::SingleResponseModeParameters),
            id if HeaderIdentifier::is_user(id) => Ok(Self::User(id)),
            id if HeaderIdentifier::is_reserved(id) => Err(Self::Error::Reserved),
            id => Err(Self::Error::Identifier(id)),
        }
    }
}

impl From<&HeaderIdentifier> for u8 {
    fn from(src: &HeaderIdentifier) -> u8 {
        match src {
            HeaderIdentifier::Count => 0xC0,
            HeaderIdentifier::Name => 0x01,
            HeaderIdentifier::Type => 0x42,
            HeaderIdentifier::Length => 0xC3,
            HeaderIdentifier::TimeIso8601 => 0x44,
            HeaderIdentifier::Time4Byte => 0xC4,
            HeaderIdentifier::Description => 0x05,
            HeaderIdentifier::Target => 0x46,
            HeaderIdentifier::Http => 0x47,
            HeaderIdentifier::Body => 0x48,
            HeaderIdentifier::EndOfBody => 0x49,
            HeaderIdentifier::Who => 0x4A,
            HeaderIdentifier::ConnectionId => 0xCB,
            HeaderIdentifier::ApplicationParameters => 0x4C,
            HeaderIdentifier::AuthenticationChallenge => 0x4D,
            HeaderIdentifier::AuthenticationResponse => 0x4E,
            HeaderIdentifier::CreatorId => 0xCF,
            HeaderIdentifier::WanUuid => 0x50,
            HeaderIdentifier::ObjectClass => 0x51,
            HeaderIdentifier::SessionParameters => 0x52,
            HeaderIdentifier::SessionSequenceNumber => 0x93,
            HeaderIdentifier::ActionId => 0x94,
            HeaderIdentifier::DestName => 0x15,
            HeaderIdentifier::Permissions => 0xD6,
            HeaderIdentifier::SingleResponseMode => 0x97,
            HeaderIdentifier::SingleResponseModeParameters => 0x98,
            HeaderIdentifier::User(id) => *id,
        }
    }
}

/// The Single Response Mode (SRM) negotiation values carried in the SRM Header.
/// Defined in OBEX 1.5 Section 2.2.23.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SingleResponseMode {
    Disable,
    Enable,
    /// Indicates support for SRM without enabling it.
    Supported,
}

impl From<&SingleResponseMode> for u8 {
    fn from(src: &SingleResponseMode) -> u8 {
        match src {
            SingleResponseMode::Disable => 0x00,
            SingleResponseMode::Enable => 0x01,
            SingleResponseMode::Supported => 0x02,
        }
    }
}

impl From<SingleResponseMode> for u8 {
    fn from(src: SingleResponseMode) -> u8 {
        (&src).into()
    }
}

impl TryFrom<u8> for SingleResponseMode {
    type Error = PacketError;

    fn try_from(src: u8) -> Result<Self, Self::Error> {
        match src {
            0x00 => Ok(Self::Disable),
            0x01 => Ok(Self::Enable),
            0x02 => Ok(Self::Supported),
            v => Err(PacketError::data(format!("invalid SRM value: {v}"))),
        }
    }
}

impl From<bool> for SingleResponseMode {
    fn from(src: bool) -> Self {
        if src {
            SingleResponseMode::Enable
        } else {
            SingleResponseMode::Disable
        }
    }
}

impl From<SingleResponseMode> for Header {
    fn from(src: SingleResponseMode) -> Header {
        Header::SingleResponseMode(src)
    }
}

/// The SRM Parameters (SRMP) Header modifies SRM behavior for the current request.
/// Defined in OBEX 1.5 Section 2.2.24.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SrmParameters {
    /// Issue an additional request before the response phase begins.
    AdditionalRequest,
    /// Wait - the next request/response must not be issued until released.
    Wait,
    AdditionalRequestAndWait,
}

impl SrmParameters {
    /// Returns true if the parameter asks the remote to hold off on the next packet.
    pub fn requests_wait(&self) -> bool {
        matches!(self, Self::Wait | Self::AdditionalRequestAndWait)
    }
}

impl From<&SrmParameters> for u8 {
    fn from(src: &SrmParameters) -> u8 {
        match src {
            SrmParameters::AdditionalRequest => 0x00,
            SrmParameters::Wait => 0x01,
            SrmParameters::AdditionalRequestAndWait => 0x02,
        }
    }
}

impl TryFrom<u8> for SrmParameters {
    type Error = PacketError;

    fn try_from(src: u8) -> Result<Self, Self::Error> {
        match src {
            0x00 => Ok(Self::AdditionalRequest),
            0x01 => Ok(Self::Wait),
            0x02 => Ok(Self::AdditionalRequestAndWait),
            v => Err(PacketError::data(format!("invalid SRMP value: {v}"))),
        }
    }
}

/// Represents a user-defined Header type.
#[derive(Clone, Debug, PartialEq)]
pub struct UserDefinedHeader {
    /// The Header Identifier (HI) can be any value between 0x30 and 0x3f. See
    /// `HeaderIdentifier::User` for more details.
    pub identifier: u8,
    /// The user data.
    pub value: Vec<u8>,
}

/// The building block of an OBEX object. A single OBEX object consists of one or more Headers.
#[derive(Clone, Debug, PartialEq)]
pub enum Header {
    Count(u32),
    Name(ObexString),
    /// Type is encoded as null terminated ASCII text.
    Type(String),
    /// Number of bytes.
    Length(u32),
    /// Time represented as a String "YYYYMMDDTHHMMSSZ", encoded as ASCII bytes.
    TimeIso8601(String),
    Time4Byte(u32),
    Description(ObexString),
    Target(Vec<u8>),
    Http(Vec<u8>),
    Body(Vec<u8>),
    EndOfBody(Vec<u8>),
    Who(Vec<u8>),
    ConnectionId(u32),
    ApplicationParameters(Vec<u8>),
    AuthenticationChallenge(Vec<u8>),
    AuthenticationResponse(Vec<u8>),
    CreatorId(u32),
    WanUuid(Uuid),
    ObjectClass(Vec<u8>),
    SessionParameters(Vec<u8>),
    SessionSequenceNumber(u8),
    ActionId(u8),
    DestName(ObexString),
    /// 4-byte bit mask.
    Permissions(u32),
    SingleResponseMode(SingleResponseMode),
    SingleResponseModeParameters(SrmParameters),
    /// User defined Header type.
    User(UserDefinedHeader),
}

impl Header {
    /// The minimal Header contains at least a 1-byte identifier.
    const MIN_HEADER_LENGTH_BYTES: usize = 1;

    /// A Unicode or Byte Sequence Header must be at least 3 bytes - 1 byte for the HI and 2 bytes
    /// for the encoded data length.
    const MIN_UNICODE_OR_BYTE_SEQ_LENGTH_BYTES: usize = 3;

    /// A Target Header payload is always a 16-byte service UUID.
    pub const TARGET_LENGTH_BYTES: usize = 16;

    pub fn name(s: impl Into<ObexString>) -> Self {
        Self::Name(s.into())
    }

    pub fn identifier(&self) -> HeaderIdentifier {
        match &self {
            Self::Count(_) => HeaderIdentifier::Count,
            Self::Name(_) => HeaderIdentifier::Name,
            Self::Type(_) => HeaderIdentifier::Type,
            Self::Length(_) => HeaderIdentifier::Length,
            Self::TimeIso8601(_) => HeaderIdentifier::TimeIso8601,
            Self::Time4Byte(_) => HeaderIdentifier::Time4Byte,
            Self::Description(_) => HeaderIdentifier::Description,
            Self::Target(_) => HeaderIdentifier::Target,
            Self::Http(_) => HeaderIdentifier::Http,
            Self::Body(_) => HeaderIdentifier::Body,
            Self::EndOfBody(_) => HeaderIdentifier::EndOfBody,
            Self::Who(_) => HeaderIdentifier::Who,
            Self::ConnectionId(_) => HeaderIdentifier::ConnectionId,
            Self::ApplicationParameters(_) => HeaderIdentifier::ApplicationParameters,
            Self::AuthenticationChallenge(_) => HeaderIdentifier::AuthenticationChallenge,
            Self::AuthenticationResponse(_) => HeaderIdentifier::AuthenticationResponse,
            Self::CreatorId(_) => HeaderIdentifier::CreatorId,
            Self::WanUuid(_) => HeaderIdentifier::WanUuid,
            Self::ObjectClass(_) => HeaderIdentifier::ObjectClass,
            Self::SessionParameters(_) => HeaderIdentifier::SessionParameters,
            Self::SessionSequenceNumber(_) => HeaderIdentifier::SessionSequenceNumber,
            Self::ActionId(_) => HeaderIdentifier::ActionId,
            Self::DestName(_) => HeaderIdentifier::DestName,
            Self::Permissions(_) => HeaderIdentifier::Permissions,
            Self::SingleResponseMode(_) => HeaderIdentifier::SingleResponseMode,
            Self::SingleResponseModeParameters(_) => HeaderIdentifier::SingleResponseModeParameters,
            Self::User(UserDefinedHeader { identifier, .. }) => HeaderIdentifier::User(*identifier),
        }
    }

    /// The length of the payload, excluding the HI byte and any length prefix.
    fn data_length(&self) -> usize {
        use Header::*;
        match &self {
            Count(_) | Length(_) | Time4Byte(_) | ConnectionId(_) | CreatorId(_)
            | Permissions(_) => 4,
            SessionSequenceNumber(_) | ActionId(_) | SingleResponseMode(_)
            | SingleResponseModeParameters(_) => 1,
            Name(s) | Description(s) | DestName(s) => s.len(),
            Type(s) => s.len() + 1, // Null terminator.
            TimeIso8601(s) => s.len(),
            WanUuid(_) => Self::TARGET_LENGTH_BYTES,
            Target(b) | Http(b) | Body(b) | EndOfBody(b) | Who(b) | ApplicationParameters(b)
            | AuthenticationChallenge(b) | AuthenticationResponse(b) | ObjectClass(b)
            | SessionParameters(b) => b.len(),
            User(UserDefinedHeader { value, .. }) => value.len(),
        }
    }

    fn payload_bytes(&self) -> Vec<u8> {
        use Header::*;
        match &self {
            Count(v) | Length(v) | Time4Byte(v) | ConnectionId(v) | CreatorId(v)
            | Permissions(v) => v.to_be_bytes().to_vec(),
            SessionSequenceNumber(v) | ActionId(v) => vec![*v],
            SingleResponseMode(v) => vec![v.into()],
            SingleResponseModeParameters(v) => vec![v.into()],
            Name(s) | Description(s) | DestName(s) => s.to_be_bytes(),
            Type(s) => {
                let mut bytes = s.clone().into_bytes();
                bytes.push(0);
                bytes
            }
            TimeIso8601(s) => s.clone().into_bytes(),
            WanUuid(uuid) => uuid.as_bytes().to_vec(),
            Target(b) | Http(b) | Body(b) | EndOfBody(b) | Who(b) | ApplicationParameters(b)
            | AuthenticationChallenge(b) | AuthenticationResponse(b) | ObjectClass(b)
            | SessionParameters(b) => b.clone(),
            User(UserDefinedHeader { value, .. }) => value.clone(),
        }
    }
}

impl Encodable for Header {
    type Error = PacketError;

    fn encoded_len(&self) -> usize {
        let prefix = match self.identifier().encoding() {
            HeaderEncoding::Text | HeaderEncoding::Bytes => {
                Self::MIN_UNICODE_OR_BYTE_SEQ_LENGTH_BYTES
            }
            HeaderEncoding::OneByte | HeaderEncoding::FourBytes => Self::MIN_HEADER_LENGTH_BYTES,
        };
        prefix + self.data_length()
    }

    fn encode(&self, buf: &mut [u8]) -> Result<(), Self::Error> {
        if buf.len() < self.encoded_len() {
            return Err(PacketError::BufferTooSmall);
        }

        let id = self.identifier();
        buf[0] = (&id).into();
        let payload_idx = match id.encoding() {
            HeaderEncoding::Text | HeaderEncoding::Bytes => {
                // The encoded length prefix includes the HI byte and the 2-byte length itself.
                let total_length = u16::try_from(self.encoded_len())
                    .map_err(|_| PacketError::DataLength)?
                    .to_be_bytes();
                buf[Self::MIN_HEADER_LENGTH_BYTES..Self::MIN_UNICODE_OR_BYTE_SEQ_LENGTH_BYTES]
                    .copy_from_slice(&total_length);
                Self::MIN_UNICODE_OR_BYTE_SEQ_LENGTH_BYTES
            }
            HeaderEncoding::OneByte | HeaderEncoding::FourBytes => Self::MIN_HEADER_LENGTH_BYTES,
        };
        let payload = self.payload_bytes();
        buf[payload_idx..payload_idx + payload.len()].copy_from_slice(&payload);
        Ok(())
    }
}

impl Decodable for Header {
    type Error = PacketError;

    fn decode(buf: &[u8]) -> Result<Self, Self::Error> {
        // The buffer should contain at least the Header Identifier.
        if buf.len() < Self::MIN_HEADER_LENGTH_BYTES {
            return Err(PacketError::BufferTooSmall);
        }

        let id = HeaderIdentifier::try_from(buf[0])?;
        let mut start_idx = 1;
        let data_length = match id.encoding() {
            HeaderEncoding::Text | HeaderEncoding::Bytes => {
                if buf.len() < Self::MIN_UNICODE_OR_BYTE_SEQ_LENGTH_BYTES {
                    return Err(PacketError::BufferTooSmall);
                }
                // For Unicode Text and Byte Sequences, the payload length is encoded in the next
                // two bytes - this value includes 1 byte for the HI and 2 bytes for the length.
                let total_length = u16::from_be_bytes(
                    buf[Self::MIN_HEADER_LENGTH_BYTES..Self::MIN_UNICODE_OR_BYTE_SEQ_LENGTH_BYTES]
                        .try_into()
                        .expect("checked length"),
                ) as usize;
                let data_length = total_length
                    .checked_sub(Self::MIN_UNICODE_OR_BYTE_SEQ_LENGTH_BYTES)
                    .ok_or(PacketError::DataLength)?;
                start_idx = Self::MIN_UNICODE_OR_BYTE_SEQ_LENGTH_BYTES;
                data_length
            }
            HeaderEncoding::OneByte => 1,
            HeaderEncoding::FourBytes => 4,
        };
        trace!(?id, %data_length, "parsed OBEX header");

        if buf.len() < start_idx + data_length {
            return Err(PacketError::BufferTooSmall);
        }

        let data = &buf[start_idx..start_idx + data_length];
        match id {
            HeaderIdentifier::Count => {
                Ok(Header::Count(u32::from_be_bytes(data.try_into().expect("checked length"))))
            }
            HeaderIdentifier::Name => Ok(Header::Name(ObexString::try_from(data)?)),
            HeaderIdentifier::Type => Ok(Header::Type(ascii_to_string(data)?)),
            HeaderIdentifier::Length => {
                Ok(Header::Length(u32::from_be_bytes(data.try_into().expect("checked length"))))
            }
            HeaderIdentifier::TimeIso8601 => Ok(Header::TimeIso8601(
                String::from_utf8(data.to_vec()).map_err(PacketError::external)?,
            )),
            HeaderIdentifier::Time4Byte => {
                Ok(Header::Time4Byte(u32::from_be_bytes(data.try_into().expect("checked length"))))
            }
            HeaderIdentifier::Description => Ok(Header::Description(ObexString::try_from(data)?)),
            HeaderIdentifier::Target => Ok(Header::Target(data.to_vec())),
            HeaderIdentifier::Http => Ok(Header::Http(data.to_vec())),
            HeaderIdentifier::Body => Ok(Header::Body(data.to_vec())),
            HeaderIdentifier::EndOfBody => Ok(Header::EndOfBody(data.to_vec())),
            HeaderIdentifier::Who => Ok(Header::Who(data.to_vec())),
            HeaderIdentifier::ConnectionId => Ok(Header::ConnectionId(u32::from_be_bytes(
                data.try_into().expect("checked length"),
            ))),
            HeaderIdentifier::ApplicationParameters => {
                Ok(Header::ApplicationParameters(data.to_vec()))
            }
            HeaderIdentifier::AuthenticationChallenge => {
                Ok(Header::AuthenticationChallenge(data.to_vec()))
            }
            HeaderIdentifier::AuthenticationResponse => {
                Ok(Header::AuthenticationResponse(data.to_vec()))
            }
            HeaderIdentifier::CreatorId => Ok(Header::CreatorId(u32::from_be_bytes(
                data.try_into().expect("checked length"),
            ))),
            HeaderIdentifier::WanUuid => {
                let bytes: [u8; Self::TARGET_LENGTH_BYTES] =
                    data.try_into().map_err(|_| PacketError::BufferTooSmall)?;
                Ok(Header::WanUuid(Uuid::from_bytes(bytes)))
            }
            HeaderIdentifier::ObjectClass => Ok(Header::ObjectClass(data.to_vec())),
            HeaderIdentifier::SessionParameters => Ok(Header::SessionParameters(data.to_vec())),
            HeaderIdentifier::SessionSequenceNumber => Ok(Header::SessionSequenceNumber(data[0])),
            HeaderIdentifier::ActionId => Ok(Header::ActionId(data[0])),
            HeaderIdentifier::DestName => Ok(Header::DestName(ObexString::try_from(data)?)),
            HeaderIdentifier::Permissions => Ok(Header::Permissions(u32::from_be_bytes(
                data.try_into().expect("checked length"),
            ))),
            HeaderIdentifier::SingleResponseMode => {
                Ok(Header::SingleResponseMode(SingleResponseMode::try_from(data[0])?))
            }
            HeaderIdentifier::SingleResponseModeParameters => {
                Ok(Header::SingleResponseModeParameters(SrmParameters::try_from(data[0])?))
            }
            HeaderIdentifier::User(identifier) => {
                Ok(Header::User(UserDefinedHeader { identifier, value: data.to_vec() }))
            }
        }
    }
}

/// Attempts to convert the `buf` to an ASCII String, stripping the trailing null terminator
/// if present.
fn ascii_to_string(buf: &[u8]) -> Result<String, PacketError> {
    let mut text = String::from_utf8(buf.to_vec()).map_err(PacketError::external)?;
    if text.ends_with('\0') {
        let _ = text.pop();
    }
    Ok(text)
}

/// An ordered collection of Headers sent & received in a single OBEX packet.
///
/// Headers are encoded in insertion order except for Connection Id which, per OBEX 1.5
/// Section 2.2.11, is always the first Header of the packet. At most one instance of each
/// Header Identifier may be present in the set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeaderSet {
    headers: Vec<Header>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self { headers: Vec::new() }
    }

    pub fn from_header(header: Header) -> Result<Self, Error> {
        Self::from_headers(vec![header])
    }

    pub fn from_headers(headers: Vec<Header>) -> Result<Self, Error> {
        let mut set = Self::new();
        for header in headers {
            set.add(header)?;
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn contains_header(&self, id: &HeaderIdentifier) -> bool {
        self.headers.iter().any(|h| h.identifier() == *id)
    }

    pub fn contains_headers(&self, ids: &[HeaderIdentifier]) -> bool {
        ids.iter().all(|id| self.contains_header(id))
    }

    pub fn get(&self, id: &HeaderIdentifier) -> Option<&Header> {
        self.headers.iter().find(|h| h.identifier() == *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.headers.iter()
    }

    /// Adds the `header` to the set.
    /// A duplicate Connection Id replaces the existing one; any other duplicate identifier is
    /// rejected. A Target Header whose payload is not 16 bytes is rejected.
    pub fn add(&mut self, header: Header) -> Result<(), Error> {
        let id = header.identifier();
        if let Header::Target(target) = &header {
            if target.len() != Header::TARGET_LENGTH_BYTES {
                return Err(PacketError::data("Target must be a 16-byte service UUID").into());
            }
        }

        if id == HeaderIdentifier::ConnectionId {
            // Only one Connection Id is kept and it is always encoded first.
            self.headers.retain(|h| h.identifier() != HeaderIdentifier::ConnectionId);
            self.headers.insert(0, header);
            return Ok(());
        }

        if self.contains_header(&id) {
            return Err(Error::Duplicate(id));
        }
        self.headers.push(header);
        Ok(())
    }

    /// Moves all Headers from `other` into this set. Duplicate identifiers are an Error.
    pub fn try_append(&mut self, other: HeaderSet) -> Result<(), Error> {
        for header in other.headers {
            self.add(header)?;
        }
        Ok(())
    }

    /// Removes and returns the Header with the provided `id`, if present.
    pub fn remove(&mut self, id: &HeaderIdentifier) -> Option<Header> {
        let idx = self.headers.iter().position(|h| h.identifier() == *id)?;
        Some(self.headers.remove(idx))
    }

    /// Removes and returns the user data payload from the set.
    /// If `final_` is set then the EndOfBody Header is targeted, otherwise Body.
    /// Returns Error if the expected Header is not present.
    pub fn remove_body(&mut self, final_: bool) -> Result<Vec<u8>, Error> {
        let id = if final_ { HeaderIdentifier::EndOfBody } else { HeaderIdentifier::Body };
        match self.remove(&id) {
            Some(Header::Body(data)) | Some(Header::EndOfBody(data)) => Ok(data),
            _ => Err(PacketError::data(format!("missing {id:?} header")).into()),
        }
    }
}

impl Encodable for HeaderSet {
    type Error = PacketError;

    fn encoded_len(&self) -> usize {
        self.headers.iter().map(Encodable::encoded_len).sum()
    }

    fn encode(&self, buf: &mut [u8]) -> Result<(), Self::Error> {
        if buf.len() < self.encoded_len() {
            return Err(PacketError::BufferTooSmall);
        }
        let mut idx = 0;
        for header in &self.headers {
            header.encode(&mut buf[idx..])?;
            idx += header.encoded_len();
        }
        Ok(())
    }
}

impl Decodable for HeaderSet {
    type Error = PacketError;

    fn decode(buf: &[u8]) -> Result<Self, Self::Error> {
        let mut headers = Vec::new();
        let mut idx = 0;
        while idx < buf.len() {
            let header = Header::decode(&buf[idx..])?;
            idx += header.encoded_len();
            headers.push(header);
        }
        HeaderSet::from_headers(headers).map_err(|e| PacketError::data(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn is_user_id() {
        let ids = [0x00, 0x10, 0x29, 0x40, 0x80, 0xc0];
        for id in ids {
            assert!(!HeaderIdentifier::is_user(id));
        }

        let ids = [0x30, 0x3f, 0x71, 0x7f, 0xb5, 0xbf, 0xf0, 0xff];
        for id in ids {
            assert!(HeaderIdentifier::is_user(id));
        }
    }

    #[test]
    fn is_reserved_id() {
        let ids = [0x00, 0x10, 0x30, 0x70, 0xb0, 0xf0];
        for id in ids {
            assert!(!HeaderIdentifier::is_reserved(id));
        }

        let ids = [0x19, 0x2f, 0x60, 0x6f, 0x99, 0xae, 0xd9, 0xef];
        for id in ids {
            assert!(HeaderIdentifier::is_reserved(id));
        }
    }

    #[test]
    fn valid_header_id_parsed_ok() {
        let valid = 0x15;
        let result = HeaderIdentifier::try_from(valid);
        assert_matches!(result, Ok(HeaderIdentifier::DestName));
    }

    #[test]
    fn user_header_id_is_ok() {
        let user_header_id_raw = 0x33;
        let result = HeaderIdentifier::try_from(user_header_id_raw);
        assert_matches!(result, Ok(HeaderIdentifier::User(_)));
    }

    #[test]
    fn rfa_header_id_is_reserved_error() {
        let rfa_header_id_raw = 0x20;
        let result = HeaderIdentifier::try_from(rfa_header_id_raw);
        assert_matches!(result, Err(PacketError::Reserved));
    }

    #[test]
    fn unknown_header_id_is_error() {
        // The lower 6 bits of this represent the Length Header. However, the upper 2 bits are
        // incorrect - therefore the Header ID is considered invalid.
        let unknown_header_id_raw = 0x03;
        let result = HeaderIdentifier::try_from(unknown_header_id_raw);
        assert_matches!(result, Err(PacketError::Identifier(_)));
    }

    #[test]
    fn header_encoding_from_identifier() {
        assert_eq!(HeaderIdentifier::SessionSequenceNumber.encoding(), HeaderEncoding::OneByte);
        assert_eq!(HeaderIdentifier::Count.encoding(), HeaderEncoding::FourBytes);
        assert_eq!(HeaderIdentifier::Name.encoding(), HeaderEncoding::Text);
        assert_eq!(HeaderIdentifier::Target.encoding(), HeaderEncoding::Bytes);
    }

    #[test]
    fn decode_empty_header_is_error() {
        assert_matches!(Header::decode(&[]), Err(PacketError::BufferTooSmall));
    }

    #[test]
    fn decode_header_no_payload_is_error() {
        // Valid Count Header but no contents.
        assert_matches!(Header::decode(&[0xc0]), Err(PacketError::BufferTooSmall));
    }

    #[test]
    fn decode_byte_seq_invalid_length_is_error() {
        // Valid `Name` Header (Text) but the provided length is only 1 byte.
        let buf = [0x01, 0x07];
        assert_matches!(Header::decode(&buf), Err(PacketError::BufferTooSmall));

        // Valid `Target` Header (Byte Seq) but the provided length is only 1 byte.
        let buf = [0x46, 0x05];
        assert_matches!(Header::decode(&buf), Err(PacketError::BufferTooSmall));

        // Valid `Body` Header (Byte Seq) but the provided length is too small - it must be >= 3.
        let buf = [0x48, 0x00, 0x02];
        assert_matches!(Header::decode(&buf), Err(PacketError::DataLength));
    }

    #[test]
    fn decode_header_invalid_payload_is_error() {
        // The provided payload doesn't match the expected data length.
        let buf = [
            0xc3, // `Length` Header (4 bytes)
            0x00, 0x00, 0x00, // Payload = 3 bytes (should be 4).
        ];
        assert_matches!(Header::decode(&buf), Err(PacketError::BufferTooSmall));

        // A one-byte Header with no payload.
        let buf = [
            0x94, // `ActionId` Header (Expect 1 byte payload)
        ];
        assert_matches!(Header::decode(&buf), Err(PacketError::BufferTooSmall));

        // The provided payload doesn't match the expected data length.
        let buf = [
            0x49, // `EndOfBody` Header (Byte seq)
            0x00, 0x06, // Total length = 6 implies a data length of 3.
            0x12, 0x34, // Payload = 2 bytes (should be 3),
        ];
        assert_matches!(Header::decode(&buf), Err(PacketError::BufferTooSmall));
    }

    #[test]
    fn decode_valid_header_success() {
        // Text Header
        let name_buf = [
            0x01, // HI = Name
            0x00, 0x17, // Total length = 23 bytes
            0x00, 0x54, 0x00, 0x48, 0x00, 0x49,
            0x00, // 20 byte payload = "THING.DOC" (utf-16)
            0x4e, 0x00, 0x47, 0x00, 0x2e, 0x00, 0x44, 0x00, 0x4f, 0x00, 0x43, 0x00, 0x00,
        ];
        let result = Header::decode(&name_buf).expect("can decode name header");
        assert_eq!(result, Header::name("THING.DOC"));

        // Byte Sequence Header
        let object_class_buf = [
            0x51, // HI = Object Class
            0x00, 0x0a, // Total length = 10 bytes
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, // 7 byte payload
        ];
        let result = Header::decode(&object_class_buf).expect("can decode object class header");
        assert_eq!(result, Header::ObjectClass(vec![0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]));

        // One-byte Header
        let session_seq_num_buf = [
            0x93, // HI = Session Sequence Number
            0x05, // 1 byte payload
        ];
        let result = Header::decode(&session_seq_num_buf).expect("can decode valid header");
        assert_eq!(result, Header::SessionSequenceNumber(5));

        // Four-byte Header
        let connection_id_buf = [
            0xcb, // HI = Connection Id
            0x00, 0x00, 0x12, 0x34, // 4 byte payload
        ];
        let result = Header::decode(&connection_id_buf).expect("can decode connection id header");
        assert_eq!(result, Header::ConnectionId(0x1234));
    }

    #[test]
    fn decode_user_data_header_success() {
        let user_buf = [
            0xb3, // HI = Random User defined
            0x05, // Upper 2 bits of HI indicate 1 byte payload
        ];
        let result = Header::decode(&user_buf).expect("can decode user header");
        assert_eq!(result, Header::User(UserDefinedHeader { identifier: 0xb3, value: vec![0x05] }));
    }

    #[test]
    fn encode_headers_success() {
        // Unicode text Header.
        let name = Header::name("funky");
        assert_eq!(name.encoded_len(), 15);
        let mut buf = vec![0; name.encoded_len()];
        name.encode(&mut buf[..]).expect("can encode");
        let expected = [
            0x01, 0x00, 0x0f, 0x00, 0x66, 0x00, 0x75, 0x00, 0x6e, 0x00, 0x6b, 0x00, 0x79, 0x00,
            0x00,
        ];
        assert_eq!(buf, expected);

        // Byte sequence Header.
        let body = Header::Body(vec![1, 2, 3]);
        assert_eq!(body.encoded_len(), 6);
        let mut buf = vec![0; body.encoded_len()];
        body.encode(&mut buf[..]).expect("can encode");
        assert_eq!(buf, [0x48, 0x00, 0x06, 0x01, 0x02, 0x03]);

        // One-byte Header.
        let action = Header::ActionId(0x02);
        assert_eq!(action.encoded_len(), 2);
        let mut buf = vec![0; action.encoded_len()];
        action.encode(&mut buf[..]).expect("can encode");
        assert_eq!(buf, [0x94, 0x02]);

        // Four-byte Header.
        let permissions = Header::Permissions(0x12345678);
        assert_eq!(permissions.encoded_len(), 5);
        let mut buf = vec![0; permissions.encoded_len()];
        permissions.encode(&mut buf[..]).expect("can encode");
        assert_eq!(buf, [0xd6, 0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn encode_small_buffer_is_error() {
        let header = Header::Length(10);
        let mut buf = vec![0; 3];
        assert_matches!(header.encode(&mut buf[..]), Err(PacketError::BufferTooSmall));
    }

    #[test]
    fn header_encode_decode_roundtrip() {
        let headers = vec![
            Header::name("example.txt"),
            Header::Type("text/plain".to_string()),
            Header::Length(420),
            Header::TimeIso8601("20230822T100000Z".to_string()),
            Header::Target(vec![7; 16]),
            Header::Body(vec![1, 2, 3, 4, 5]),
            Header::ConnectionId(0xff00ff),
            Header::SessionSequenceNumber(0xfe),
            Header::SingleResponseMode(SingleResponseMode::Enable),
            Header::SingleResponseModeParameters(SrmParameters::Wait),
        ];
        for header in headers {
            let mut buf = vec![0; header.encoded_len()];
            header.encode(&mut buf[..]).expect("can encode");
            let decoded = Header::decode(&buf[..]).expect("can decode");
            assert_eq!(decoded, header);
        }
    }

    #[test]
    fn header_set_add_and_get() {
        let mut headers = HeaderSet::new();
        assert!(headers.is_empty());
        headers.add(Header::name("foo")).expect("can add");
        assert!(headers.contains_header(&HeaderIdentifier::Name));
        assert_matches!(headers.get(&HeaderIdentifier::Name), Some(Header::Name(_)));
        assert!(!headers.contains_header(&HeaderIdentifier::Type));
    }

    #[test]
    fn header_set_duplicate_is_error() {
        let mut headers = HeaderSet::from_header(Header::name("foo")).unwrap();
        assert_matches!(
            headers.add(Header::name("bar")),
            Err(Error::Duplicate(HeaderIdentifier::Name))
        );
    }

    #[test]
    fn header_set_duplicate_connection_id_replaces() {
        let mut headers =
            HeaderSet::from_headers(vec![Header::name("foo"), Header::ConnectionId(1)]).unwrap();
        headers.add(Header::ConnectionId(2)).expect("replaces existing connection id");
        assert_eq!(headers.get(&HeaderIdentifier::ConnectionId), Some(&Header::ConnectionId(2)));
        // Only one instance is kept.
        assert_eq!(headers.iter().count(), 2);
    }

    #[test]
    fn header_set_connection_id_is_encoded_first() {
        let mut headers = HeaderSet::from_header(Header::name("a")).unwrap();
        headers.add(Header::ConnectionId(5)).expect("can add");
        let mut buf = vec![0; headers.encoded_len()];
        headers.encode(&mut buf[..]).expect("can encode");
        // Connection Id (0xcb) precedes Name (0x01) even though it was added later.
        assert_eq!(buf[0], 0xcb);
    }

    #[test]
    fn header_set_invalid_target_is_error() {
        let mut headers = HeaderSet::new();
        assert_matches!(
            headers.add(Header::Target(vec![1, 2, 3])),
            Err(Error::Packet(PacketError::Data(_)))
        );
        // A 16-byte Target is OK.
        headers.add(Header::Target(vec![0xab; 16])).expect("valid target");
    }

    #[test]
    fn header_set_remove_body() {
        let mut headers =
            HeaderSet::from_headers(vec![Header::name("foo"), Header::Body(vec![1, 2, 3])])
                .unwrap();
        let body = headers.remove_body(false).expect("contains body");
        assert_eq!(body, vec![1, 2, 3]);
        assert!(!headers.contains_header(&HeaderIdentifier::Body));
        // No EndOfBody header present.
        assert_matches!(headers.remove_body(true), Err(Error::Packet(PacketError::Data(_))));
    }

    #[test]
    fn header_set_try_append() {
        let mut headers = HeaderSet::from_header(Header::name("foo")).unwrap();
        let other = HeaderSet::from_header(Header::Type("text".to_string())).unwrap();
        headers.try_append(other).expect("no duplicates");
        assert!(headers.contains_headers(&[HeaderIdentifier::Name, HeaderIdentifier::Type]));

        let duplicate = HeaderSet::from_header(Header::name("bar")).unwrap();
        assert_matches!(headers.try_append(duplicate), Err(Error::Duplicate(_)));
    }

    #[test]
    fn header_set_encode_decode_roundtrip() {
        let headers = HeaderSet::from_headers(vec![
            Header::ConnectionId(0x1234),
            Header::name("roundtrip"),
            Header::Length(99),
            Header::EndOfBody(vec![9, 8, 7]),
        ])
        .unwrap();
        let mut buf = vec![0; headers.encoded_len()];
        headers.encode(&mut buf[..]).expect("can encode");
        let decoded = HeaderSet::decode(&buf[..]).expect("can decode");
        assert_eq!(decoded, headers);
        assert_eq!(decoded.encoded_len(), headers.encoded_len());
    }

    #[test]
    fn header_set_decode_invalid_target_preserves_error() {
        // Target Header with a 3-byte payload - not a valid 16-byte service UUID.
        let buf = [0x46, 0x00, 0x06, 0xaa, 0xbb, 0xcc];
        let error = HeaderSet::decode(&buf[..]).expect_err("invalid target");
        assert_matches!(error, PacketError::Data(msg) if msg.contains("16-byte"));
    }
}
