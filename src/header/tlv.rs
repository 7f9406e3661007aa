// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Tag-Length-Value parameter blocks carried in the Authentication Challenge,
//! Authentication Response & Session Parameters Headers.
//! Defined in OBEX 1.5 Sections 2.2.19 - 2.2.21.

use md5::{Digest, Md5};

use crate::encoding::{decodable_enum, Decodable, Encodable};
use crate::error::PacketError;
use crate::header::Header;

/// A single Tag-Length-Value triplet: a 1-byte tag, a 1-byte value length, and the value bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct TlvTriplet {
    pub tag: u8,
    pub value: Vec<u8>,
}

impl TlvTriplet {
    /// The tag and length bytes that prefix every triplet.
    const PREFIX_LENGTH_BYTES: usize = 2;

    pub fn new(tag: u8, value: impl Into<Vec<u8>>) -> Result<Self, PacketError> {
        let value = value.into();
        if value.len() > u8::MAX as usize {
            return Err(PacketError::DataLength);
        }
        Ok(Self { tag, value })
    }

    pub fn new_u8(tag: u8, value: u8) -> Self {
        Self { tag, value: vec![value] }
    }

    pub fn new_u16(tag: u8, value: u16) -> Self {
        Self { tag, value: value.to_be_bytes().to_vec() }
    }

    pub fn new_u32(tag: u8, value: u32) -> Self {
        Self { tag, value: value.to_be_bytes().to_vec() }
    }

    pub fn new_u64(tag: u8, value: u64) -> Self {
        Self { tag, value: value.to_be_bytes().to_vec() }
    }

    pub fn value_as_u8(&self) -> Result<u8, PacketError> {
        let bytes: [u8; 1] = self.value[..].try_into().map_err(|_| PacketError::DataLength)?;
        Ok(bytes[0])
    }

    pub fn value_as_u32(&self) -> Result<u32, PacketError> {
        let bytes: [u8; 4] = self.value[..].try_into().map_err(|_| PacketError::DataLength)?;
        Ok(u32::from_be_bytes(bytes))
    }
}

impl Encodable for TlvTriplet {
    type Error = PacketError;

    fn encoded_len(&self) -> usize {
        Self::PREFIX_LENGTH_BYTES + self.value.len()
    }

    fn encode(&self, buf: &mut [u8]) -> Result<(), Self::Error> {
        if buf.len() < self.encoded_len() {
            return Err(PacketError::BufferTooSmall);
        }
        buf[0] = self.tag;
        buf[1] = self.value.len() as u8;
        buf[Self::PREFIX_LENGTH_BYTES..Self::PREFIX_LENGTH_BYTES + self.value.len()]
            .copy_from_slice(&self.value);
        Ok(())
    }
}

impl Decodable for TlvTriplet {
    type Error = PacketError;

    fn decode(buf: &[u8]) -> Result<Self, Self::Error> {
        if buf.len() < Self::PREFIX_LENGTH_BYTES {
            return Err(PacketError::BufferTooSmall);
        }
        let tag = buf[0];
        let length = buf[1] as usize;
        if buf.len() < Self::PREFIX_LENGTH_BYTES + length {
            return Err(PacketError::BufferTooSmall);
        }
        Ok(Self {
            tag,
            value: buf[Self::PREFIX_LENGTH_BYTES..Self::PREFIX_LENGTH_BYTES + length].to_vec(),
        })
    }
}

/// An ordered collection of TLV triplets.
/// A tag may legally repeat; lookups return the first match, preserving the order the peer sent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TlvParameterSet {
    triplets: Vec<TlvTriplet>,
}

impl TlvParameterSet {
    pub fn new() -> Self {
        Self { triplets: Vec::new() }
    }

    pub fn from_triplets(triplets: Vec<TlvTriplet>) -> Self {
        Self { triplets }
    }

    pub fn is_empty(&self) -> bool {
        self.triplets.is_empty()
    }

    pub fn push(&mut self, triplet: TlvTriplet) {
        self.triplets.push(triplet);
    }

    pub fn get(&self, tag: u8) -> Option<&TlvTriplet> {
        self.triplets.iter().find(|t| t.tag == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TlvTriplet> {
        self.triplets.iter()
    }
}

impl Encodable for TlvParameterSet {
    type Error = PacketError;

    fn encoded_len(&self) -> usize {
        self.triplets.iter().map(Encodable::encoded_len).sum()
    }

    fn encode(&self, buf: &mut [u8]) -> Result<(), Self::Error> {
        if buf.len() < self.encoded_len() {
            return Err(PacketError::BufferTooSmall);
        }
        let mut idx = 0;
        for triplet in &self.triplets {
            triplet.encode(&mut buf[idx..])?;
            idx += triplet.encoded_len();
        }
        Ok(())
    }
}

impl Decodable for TlvParameterSet {
    type Error = PacketError;

    fn decode(buf: &[u8]) -> Result<Self, Self::Error> {
        let mut triplets = Vec::new();
        let mut idx = 0;
        while idx < buf.len() {
            let triplet = TlvTriplet::decode(&buf[idx..])?;
            idx += triplet.encoded_len();
            triplets.push(triplet);
        }
        Ok(Self { triplets })
    }
}

fn encode_to_vec(set: &TlvParameterSet) -> Vec<u8> {
    let mut buf = vec![0; set.encoded_len()];
    set.encode(&mut buf[..]).expect("sized buffer");
    buf
}

/// The OBEX authentication Digest Challenge carried in the Authentication Challenge Header.
/// Defined in OBEX 1.5 Section 3.5.1.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DigestChallenge {
    pub nonce: Option<Vec<u8>>,
    pub options: Option<u8>,
    pub realm: Option<Vec<u8>>,
}

impl DigestChallenge {
    pub const NONCE_TAG: u8 = 0x00;
    pub const OPTIONS_TAG: u8 = 0x01;
    pub const REALM_TAG: u8 = 0x02;

    pub fn new(nonce: impl Into<Vec<u8>>) -> Self {
        Self { nonce: Some(nonce.into()), options: None, realm: None }
    }

    pub fn to_header(&self) -> Result<Header, PacketError> {
        let mut set = TlvParameterSet::new();
        if let Some(nonce) = &self.nonce {
            set.push(TlvTriplet::new(Self::NONCE_TAG, nonce.clone())?);
        }
        if let Some(options) = self.options {
            set.push(TlvTriplet::new_u8(Self::OPTIONS_TAG, options));
        }
        if let Some(realm) = &self.realm {
            set.push(TlvTriplet::new(Self::REALM_TAG, realm.clone())?);
        }
        Ok(Header::AuthenticationChallenge(encode_to_vec(&set)))
    }
}

impl TryFrom<&Header> for DigestChallenge {
    type Error = PacketError;

    fn try_from(src: &Header) -> Result<Self, Self::Error> {
        let Header::AuthenticationChallenge(bytes) = src else {
            return Err(PacketError::data("not an Authentication Challenge header"));
        };
        let set = TlvParameterSet::decode(&bytes[..])?;
        Ok(Self {
            nonce: set.get(Self::NONCE_TAG).map(|t| t.value.clone()),
            options: set.get(Self::OPTIONS_TAG).and_then(|t| t.value_as_u8().ok()),
            realm: set.get(Self::REALM_TAG).map(|t| t.value.clone()),
        })
    }
}

/// The OBEX authentication Digest Response carried in the Authentication Response Header.
/// Defined in OBEX 1.5 Section 3.5.2.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DigestResponse {
    pub request_digest: Option<Vec<u8>>,
    pub user_id: Option<Vec<u8>>,
    pub nonce: Option<Vec<u8>>,
}

impl DigestResponse {
    pub const REQUEST_DIGEST_TAG: u8 = 0x00;
    pub const USER_ID_TAG: u8 = 0x01;
    pub const NONCE_TAG: u8 = 0x02;

    /// The User Id value is limited to 20 bytes. See OBEX 1.5 Section 3.5.2.2.
    pub const MAX_USER_ID_LENGTH_BYTES: usize = 20;

    pub fn to_header(&self) -> Result<Header, PacketError> {
        let mut set = TlvParameterSet::new();
        if let Some(digest) = &self.request_digest {
            set.push(TlvTriplet::new(Self::REQUEST_DIGEST_TAG, digest.clone())?);
        }
        if let Some(user_id) = &self.user_id {
            if user_id.len() > Self::MAX_USER_ID_LENGTH_BYTES {
                return Err(PacketError::DataLength);
            }
            set.push(TlvTriplet::new(Self::USER_ID_TAG, user_id.clone())?);
        }
        if let Some(nonce) = &self.nonce {
            set.push(TlvTriplet::new(Self::NONCE_TAG, nonce.clone())?);
        }
        Ok(Header::AuthenticationResponse(encode_to_vec(&set)))
    }
}

impl TryFrom<&Header> for DigestResponse {
    type Error = PacketError;

    fn try_from(src: &Header) -> Result<Self, Self::Error> {
        let Header::AuthenticationResponse(bytes) = src else {
            return Err(PacketError::data("not an Authentication Response header"));
        };
        let set = TlvParameterSet::decode(&bytes[..])?;
        let user_id = set.get(Self::USER_ID_TAG).map(|t| t.value.clone());
        if user_id.as_ref().map_or(false, |id| id.len() > Self::MAX_USER_ID_LENGTH_BYTES) {
            return Err(PacketError::DataLength);
        }
        Ok(Self {
            request_digest: set.get(Self::REQUEST_DIGEST_TAG).map(|t| t.value.clone()),
            user_id,
            nonce: set.get(Self::NONCE_TAG).map(|t| t.value.clone()),
        })
    }
}

decodable_enum! {
    /// The requested SESSION sub-operation carried in the Session Opcode parameter.
    /// Defined in OBEX 1.5 Section 3.4.7.
    pub enum SessionOpcode<u8, PacketError, Reserved> {
        Create = 0x00,
        Close = 0x01,
        Suspend = 0x02,
        Resume = 0x03,
        SetTimeout = 0x04,
    }
}

/// The reliable session timeout value indicating no timeout.
pub const SESSION_TIMEOUT_INFINITE: u32 = 0xffffffff;

/// The parameters carried in the Session Parameters Header of a SESSION request or response.
/// Defined in OBEX 1.5 Section 2.2.22.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionParameterSet {
    pub device_address: Option<Vec<u8>>,
    pub nonce: Option<Vec<u8>>,
    pub session_id: Option<[u8; 16]>,
    pub next_sequence_number: Option<u8>,
    pub timeout: Option<u32>,
    pub session_opcode: Option<SessionOpcode>,
}

impl SessionParameterSet {
    pub const DEVICE_ADDRESS_TAG: u8 = 0x00;
    pub const NONCE_TAG: u8 = 0x01;
    pub const SESSION_ID_TAG: u8 = 0x02;
    pub const NEXT_SEQUENCE_NUMBER_TAG: u8 = 0x03;
    pub const TIMEOUT_TAG: u8 = 0x04;
    pub const SESSION_OPCODE_TAG: u8 = 0x05;

    pub fn to_header(&self) -> Result<Header, PacketError> {
        let mut set = TlvParameterSet::new();
        if let Some(address) = &self.device_address {
            set.push(TlvTriplet::new(Self::DEVICE_ADDRESS_TAG, address.clone())?);
        }
        if let Some(nonce) = &self.nonce {
            set.push(TlvTriplet::new(Self::NONCE_TAG, nonce.clone())?);
        }
        if let Some(id) = &self.session_id {
            set.push(TlvTriplet::new(Self::SESSION_ID_TAG, id.to_vec())?);
        }
        if let Some(seq) = self.next_sequence_number {
            set.push(TlvTriplet::new_u8(Self::NEXT_SEQUENCE_NUMBER_TAG, seq));
        }
        if let Some(timeout) = self.timeout {
            set.push(TlvTriplet::new_u32(Self::TIMEOUT_TAG, timeout));
        }
        if let Some(opcode) = self.session_opcode {
            set.push(TlvTriplet::new_u8(Self::SESSION_OPCODE_TAG, opcode.into()));
        }
        Ok(Header::SessionParameters(encode_to_vec(&set)))
    }
}

impl TryFrom<&Header> for SessionParameterSet {
    type Error = PacketError;

    fn try_from(src: &Header) -> Result<Self, Self::Error> {
        let Header::SessionParameters(bytes) = src else {
            return Err(PacketError::data("not a Session Parameters header"));
        };
        let set = TlvParameterSet::decode(&bytes[..])?;
        let session_id = match set.get(Self::SESSION_ID_TAG) {
            Some(t) => {
                Some(t.value[..].try_into().map_err(|_| PacketError::DataLength)?)
            }
            None => None,
        };
        let session_opcode = match set.get(Self::SESSION_OPCODE_TAG) {
            Some(t) => Some(SessionOpcode::try_from(t.value_as_u8()?)?),
            None => None,
        };
        Ok(Self {
            device_address: set.get(Self::DEVICE_ADDRESS_TAG).map(|t| t.value.clone()),
            nonce: set.get(Self::NONCE_TAG).map(|t| t.value.clone()),
            session_id,
            next_sequence_number: set
                .get(Self::NEXT_SEQUENCE_NUMBER_TAG)
                .and_then(|t| t.value_as_u8().ok()),
            timeout: set.get(Self::TIMEOUT_TAG).and_then(|t| t.value_as_u32().ok()),
            session_opcode,
        })
    }
}

/// Computes the reliable session id - the MD5 digest of the concatenation of the client device
/// address, client nonce, server device address, and server nonce.
/// Defined in OBEX 1.5 Section 3.4.7.1.
pub fn session_id(
    client_address: &[u8],
    client_nonce: &[u8],
    server_address: &[u8],
    server_nonce: &[u8],
) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(client_address);
    hasher.update(client_nonce);
    hasher.update(server_address);
    hasher.update(server_nonce);
    hasher.finalize().into()
}
