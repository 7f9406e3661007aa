// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Traits for encoding and decoding OBEX packets and headers to/from raw byte
//! buffers, plus a helper macro for enums with a fixed wire representation.

/// A type that can be encoded into a big-endian byte buffer.
pub trait Encodable {
    type Error;

    /// Returns the number of bytes `self` occupies when encoded.
    fn encoded_len(&self) -> usize;

    /// Encodes `self` into the beginning of `buf`. `buf` must be at least
    /// `self.encoded_len()` bytes long.
    fn encode(&self, buf: &mut [u8]) -> Result<(), Self::Error>;
}

/// A type that can be decoded from a big-endian byte buffer.
pub trait Decodable: Sized {
    type Error;

    /// Attempts to decode `Self` from the beginning of `buf`.
    fn decode(buf: &[u8]) -> Result<Self, Self::Error>;
}

/// Defines a fieldless enum with a fixed raw representation together with the
/// fallible and infallible conversions to and from that representation.
///
/// `decodable_enum!(enum Name<RawType, ErrorType, ErrorVariant> { ... })`
/// generates `From<&Name> for RawType`, `From<Name> for RawType` and
/// `TryFrom<RawType> for Name`; an unrecognized raw value converts to
/// `ErrorType::ErrorVariant`.
macro_rules! decodable_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident<$raw:ty, $etype:ty, $evariant:ident> {
        $($(#[$vmeta:meta])* $variant:ident = $val:expr),* $(,)?
    }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $val,)*
        }

        impl From<&$name> for $raw {
            fn from(v: &$name) -> $raw {
                match v {
                    $($name::$variant => $val,)*
                }
            }
        }

        impl From<$name> for $raw {
            fn from(v: $name) -> $raw {
                (&v).into()
            }
        }

        impl TryFrom<$raw> for $name {
            type Error = $etype;

            fn try_from(value: $raw) -> Result<Self, Self::Error> {
                match value {
                    $($val => Ok($name::$variant),)*
                    _ => Err(<$etype>::$evariant),
                }
            }
        }
    };
}

pub(crate) use decodable_enum;
