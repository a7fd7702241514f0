//! Fixed-width message header codec.

use thiserror::Error;

/// Encoded size of a [`MessageHeader`] on the wire.
pub const HEADER_LEN: usize = 16;

/// Errors produced while decoding a [`MessageHeader`].
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum ProtocolError {
    /// Fewer than [`HEADER_LEN`] bytes were available.
    #[error("truncated header: expected {HEADER_LEN} bytes, got {actual}")]
    TruncatedHeader {
        /// Number of bytes actually available.
        actual: usize,
    },
    /// The discriminant does not name a known [`MessageType`].
    #[error("unknown message type discriminant {0}")]
    UnknownType(u32),
}

/// Kind of a framed message.
///
/// Discriminant values are wire-canonical and must not be reordered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum MessageType {
    /// Request the contents of a file; the payload is the path.
    Read = 0,
    /// Announce the path an upcoming sequence of `Write` chunks targets.
    WritePath = 1,
    /// Carry exactly one [`CHUNK_SIZE`](crate::CHUNK_SIZE) chunk of data.
    Write = 2,
    /// Liveness probe; the daemon echoes the header verbatim.
    Heartbeat = 3,
}

impl MessageType {
    const ALL: [Self; 4] = [Self::Read, Self::WritePath, Self::Write, Self::Heartbeat];

    fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| *kind as u32 == value)
    }
}

/// A decoded 16-byte header record, whether or not the kind is known.
///
/// Unknown discriminants keep their advertised payload length, so a
/// receiver can skip the payload and stay frame-aligned instead of
/// misreading it as the next header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RawHeader {
    /// The discriminant names a [`MessageType`].
    Known(MessageHeader),
    /// The discriminant is not one this build speaks.
    Unknown {
        /// The raw discriminant value.
        discriminant: u32,
        /// The advertised payload length.
        length: u64,
    },
}

/// A decoded message header: the message kind plus a 64-bit byte count.
///
/// The meaning of `length` depends on context: it is the payload size for
/// requests, the size of the node's stored segment on a `Read` response
/// (zero signalling open failure), and an opaque cookie on `Heartbeat`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageHeader {
    kind: MessageType,
    length: u64,
}

impl MessageHeader {
    /// Creates a header for `kind` carrying `length`.
    #[must_use]
    pub const fn new(kind: MessageType, length: u64) -> Self {
        Self { kind, length }
    }

    /// Returns the message kind.
    #[must_use]
    pub const fn kind(self) -> MessageType {
        self.kind
    }

    /// Returns the length field.
    #[must_use]
    pub const fn length(self) -> u64 {
        self.length
    }

    /// Returns the length field as a native pointer-sized value.
    #[must_use]
    pub const fn length_usize(self) -> usize {
        self.length as usize
    }

    /// Encodes this header into its 16-byte wire representation.
    #[must_use]
    pub fn encode(self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..4].copy_from_slice(&(self.kind as u32).to_le_bytes());
        bytes[8..].copy_from_slice(&self.length.to_le_bytes());
        bytes
    }

    /// Parses a header from the beginning of `bytes`, keeping the length
    /// field even when the discriminant is unrecognised.
    pub fn decode_raw(bytes: &[u8]) -> Result<RawHeader, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::TruncatedHeader {
                actual: bytes.len(),
            });
        }

        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[..4]);
        let discriminant = u32::from_le_bytes(raw);

        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[8..HEADER_LEN]);
        let length = u64::from_le_bytes(raw);

        Ok(match MessageType::from_u32(discriminant) {
            Some(kind) => RawHeader::Known(Self { kind, length }),
            None => RawHeader::Unknown {
                discriminant,
                length,
            },
        })
    }

    /// Parses a header from the beginning of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        match Self::decode_raw(bytes)? {
            RawHeader::Known(header) => Ok(header),
            RawHeader::Unknown { discriminant, .. } => {
                Err(ProtocolError::UnknownType(discriminant))
            }
        }
    }
}

impl TryFrom<[u8; HEADER_LEN]> for MessageHeader {
    type Error = ProtocolError;

    fn try_from(bytes: [u8; HEADER_LEN]) -> Result<Self, Self::Error> {
        Self::decode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let original = MessageHeader::new(MessageType::Write, crate::CHUNK_SIZE as u64);
        let decoded = MessageHeader::decode(&original.encode()).expect("valid header");
        assert_eq!(decoded, original);
    }

    #[test]
    fn encoding_is_sixteen_bytes_with_zero_padding() {
        let bytes = MessageHeader::new(MessageType::Read, 7).encode();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[..4], &[0, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(&bytes[8..], &7u64.to_le_bytes());
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let result = MessageHeader::decode(&[0u8; 5]);
        assert!(matches!(
            result,
            Err(ProtocolError::TruncatedHeader { actual: 5 })
        ));
    }

    #[test]
    fn decode_rejects_unknown_discriminant() {
        let mut bytes = MessageHeader::new(MessageType::Heartbeat, 0).encode();
        bytes[..4].copy_from_slice(&9u32.to_le_bytes());
        assert_eq!(
            MessageHeader::decode(&bytes),
            Err(ProtocolError::UnknownType(9))
        );
    }

    #[test]
    fn decode_raw_preserves_unknown_lengths() {
        let mut bytes = MessageHeader::new(MessageType::Read, 7777).encode();
        bytes[..4].copy_from_slice(&9u32.to_le_bytes());
        assert_eq!(
            MessageHeader::decode_raw(&bytes),
            Ok(RawHeader::Unknown {
                discriminant: 9,
                length: 7777
            })
        );
    }

    #[test]
    fn decode_raw_wraps_known_headers() {
        let header = MessageHeader::new(MessageType::Write, 42);
        assert_eq!(
            MessageHeader::decode_raw(&header.encode()),
            Ok(RawHeader::Known(header))
        );
    }

    #[test]
    fn all_message_types_survive_the_codec() {
        for kind in MessageType::ALL {
            let decoded = MessageHeader::decode(&MessageHeader::new(kind, 42).encode())
                .expect("valid header");
            assert_eq!(decoded.kind(), kind);
            assert_eq!(decoded.length(), 42);
        }
    }

    #[test]
    fn heartbeat_cookie_survives_full_u64_range() {
        let header = MessageHeader::new(MessageType::Heartbeat, u64::MAX);
        let decoded = MessageHeader::decode(&header.encode()).expect("valid header");
        assert_eq!(decoded.length(), u64::MAX);
    }
}
