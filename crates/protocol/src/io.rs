//! Blocking framing helpers shared by the client engine and the daemon.

use std::io::{self, Read, Write};

use crate::header::{HEADER_LEN, MessageHeader, MessageType, ProtocolError, RawHeader};

/// Sends a bare header to `writer`.
pub fn send_header<W: Write>(writer: &mut W, header: MessageHeader) -> io::Result<()> {
    writer.write_all(&header.encode())
}

/// Sends a header for `kind` followed by `payload`.
///
/// The header's length field is set to the payload size. Callers streaming a
/// payload of a different advertised length (a `Read` response) send the
/// header and body separately via [`send_header`].
pub fn send_message<W: Write>(
    writer: &mut W,
    kind: MessageType,
    payload: &[u8],
) -> io::Result<()> {
    send_header(writer, MessageHeader::new(kind, payload.len() as u64))?;
    if !payload.is_empty() {
        writer.write_all(payload)?;
    }
    Ok(())
}

/// Receives the next header from `reader`, blocking until all
/// [`HEADER_LEN`] bytes arrive, tolerating unknown message kinds.
///
/// Returns `Ok(None)` when the peer closed the connection before a full
/// header was read, so session loops can distinguish an orderly shutdown
/// from a malformed stream. Unrecognised discriminants come back as
/// [`RawHeader::Unknown`] with their advertised payload length, letting
/// the receiver drain the payload and stay frame-aligned.
pub fn recv_raw_header<R: Read>(reader: &mut R) -> io::Result<Option<RawHeader>> {
    let mut bytes = [0u8; HEADER_LEN];
    match reader.read_exact(&mut bytes) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => return Err(error),
    }

    MessageHeader::decode_raw(&bytes)
        .map(Some)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
}

/// Receives the next header from `reader`, requiring a known message kind.
///
/// The client engine uses this strict form: a node that speaks an unknown
/// message is broken, and the [`io::ErrorKind::InvalidData`] error marks
/// it down.
pub fn recv_header<R: Read>(reader: &mut R) -> io::Result<Option<MessageHeader>> {
    match recv_raw_header(reader)? {
        None => Ok(None),
        Some(RawHeader::Known(header)) => Ok(Some(header)),
        Some(RawHeader::Unknown { discriminant, .. }) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            ProtocolError::UnknownType(discriminant),
        )),
    }
}

/// Receives exactly `len` payload bytes into the front of `buf`.
///
/// The buffer must already be large enough; the daemon reuses one
/// chunk-sized buffer per session rather than allocating per message.
pub fn recv_payload_into<R: Read>(reader: &mut R, buf: &mut [u8], len: usize) -> io::Result<()> {
    debug_assert!(len <= buf.len());
    reader.read_exact(&mut buf[..len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn send_message_frames_header_and_payload() {
        let mut wire = Vec::new();
        send_message(&mut wire, MessageType::WritePath, b"logs/trace.bin")
            .expect("in-memory write succeeds");

        let header = MessageHeader::decode(&wire[..HEADER_LEN]).expect("valid header");
        assert_eq!(header.kind(), MessageType::WritePath);
        assert_eq!(header.length(), 14);
        assert_eq!(&wire[HEADER_LEN..], b"logs/trace.bin");
    }

    #[test]
    fn send_message_with_empty_payload_emits_header_only() {
        let mut wire = Vec::new();
        send_message(&mut wire, MessageType::Heartbeat, b"").expect("in-memory write succeeds");
        assert_eq!(wire.len(), HEADER_LEN);
    }

    #[test]
    fn recv_header_roundtrips() {
        let sent = MessageHeader::new(MessageType::Read, 99);
        let mut cursor = Cursor::new(sent.encode().to_vec());
        let received = recv_header(&mut cursor)
            .expect("read succeeds")
            .expect("header present");
        assert_eq!(received, sent);
    }

    #[test]
    fn recv_header_reports_closed_peer_as_none() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(recv_header(&mut cursor).expect("clean close").is_none());

        // A partial header also means the peer went away mid-frame.
        let mut cursor = Cursor::new(vec![0u8; HEADER_LEN - 1]);
        assert!(recv_header(&mut cursor).expect("clean close").is_none());
    }

    #[test]
    fn recv_header_maps_decode_failures_to_invalid_data() {
        let mut bytes = MessageHeader::new(MessageType::Read, 0).encode();
        bytes[..4].copy_from_slice(&77u32.to_le_bytes());
        let mut cursor = Cursor::new(bytes.to_vec());

        let error = recv_header(&mut cursor).expect_err("decode fails");
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn recv_raw_header_returns_unknown_with_length() {
        let mut bytes = MessageHeader::new(MessageType::Read, 512).encode();
        bytes[..4].copy_from_slice(&77u32.to_le_bytes());
        let mut cursor = Cursor::new(bytes.to_vec());

        let raw = recv_raw_header(&mut cursor)
            .expect("read succeeds")
            .expect("header present");
        assert_eq!(
            raw,
            RawHeader::Unknown {
                discriminant: 77,
                length: 512
            }
        );
    }

    #[test]
    fn recv_payload_into_fills_prefix_only() {
        let mut cursor = Cursor::new(b"abcdef".to_vec());
        let mut buf = [0u8; 8];
        recv_payload_into(&mut cursor, &mut buf, 4).expect("read succeeds");
        assert_eq!(&buf[..4], b"abcd");
        assert_eq!(&buf[4..], &[0, 0, 0, 0]);
    }
}
