//! Per-connection request handling.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use stripefs_protocol::{
    CHUNK_SIZE, MAX_PATH_LEN, MessageHeader, MessageType, RawHeader, recv_payload_into,
    recv_raw_header, send_header,
};
use tracing::{debug, warn};

use crate::paths;

/// The file a connection is currently appending to.
struct WriteTarget {
    file: File,
    cursor: u64,
}

/// A single connection's state machine.
///
/// Owns the stream, a private chunk-sized receive buffer, and the open
/// write target. Generic over the stream type so tests can drive it with
/// scripted byte sequences instead of sockets.
pub struct Session<S> {
    stream: S,
    root: PathBuf,
    buf: Vec<u8>,
    target: Option<WriteTarget>,
}

impl<S: Read + Write> Session<S> {
    /// Creates a session serving files under `root` over `stream`.
    pub fn new(stream: S, root: PathBuf) -> Self {
        Self {
            stream,
            root,
            buf: vec![0u8; CHUNK_SIZE],
            target: None,
        }
    }

    /// Runs the request loop until the peer disconnects.
    ///
    /// Protocol violations are logged and the offending message skipped;
    /// only socket errors abort the session.
    pub fn run(mut self) -> io::Result<()> {
        loop {
            let header = match recv_raw_header(&mut self.stream)? {
                Some(RawHeader::Known(header)) => header,
                Some(RawHeader::Unknown {
                    discriminant,
                    length,
                }) => {
                    warn!(discriminant, length, "ignoring unknown message");
                    self.drain(length as usize)?;
                    continue;
                }
                None => return Ok(()),
            };

            match header.kind() {
                MessageType::Read => self.handle_read(header)?,
                MessageType::WritePath => self.handle_write_path(header)?,
                MessageType::Write => self.handle_write(header)?,
                MessageType::Heartbeat => {
                    debug!(cookie = header.length(), "heartbeat");
                    send_header(&mut self.stream, header)?;
                }
            }
        }
    }

    fn handle_read(&mut self, header: MessageHeader) -> io::Result<()> {
        let Some(path) = self.receive_path(header)? else {
            return self.refuse_read();
        };
        let Some(full) = paths::resolve(&self.root, &path) else {
            warn!(%path, "rejecting path escaping the storage root");
            return self.refuse_read();
        };

        let mut file = match File::open(&full) {
            Ok(file) => file,
            Err(error) => {
                debug!(path = %full.display(), %error, "read open failed");
                return self.refuse_read();
            }
        };

        let size = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;
        send_header(&mut self.stream, MessageHeader::new(MessageType::Read, size))?;
        debug!(path = %full.display(), size, "streaming file");

        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE as u64) as usize;
            let got = file.read(&mut self.buf[..want])?;
            if got == 0 {
                break;
            }
            self.stream.write_all(&self.buf[..got])?;
            remaining -= got as u64;
        }
        Ok(())
    }

    fn handle_write_path(&mut self, header: MessageHeader) -> io::Result<()> {
        // Close any previous target before opening the next file.
        self.target = None;

        let Some(path) = self.receive_path(header)? else {
            return Ok(());
        };
        let Some(full) = paths::resolve(&self.root, &path) else {
            warn!(%path, "rejecting path escaping the storage root");
            return Ok(());
        };

        match OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&full)
        {
            Ok(file) => {
                debug!(path = %full.display(), "opened write target");
                self.target = Some(WriteTarget { file, cursor: 0 });
            }
            Err(error) => warn!(path = %full.display(), %error, "write open failed"),
        }
        Ok(())
    }

    fn handle_write(&mut self, header: MessageHeader) -> io::Result<()> {
        let len = header.length_usize();
        if len > CHUNK_SIZE {
            warn!(len, "write payload exceeds chunk size; discarding");
            return self.drain(len);
        }
        recv_payload_into(&mut self.stream, &mut self.buf, len)?;

        let Some(target) = self.target.as_mut() else {
            debug!("write without an open target; payload discarded");
            return Ok(());
        };

        target.file.seek(SeekFrom::Start(target.cursor))?;
        target.file.write_all(&self.buf[..len])?;
        target.cursor += len as u64;
        Ok(())
    }

    /// Receives a path payload, refusing lengths the chunk buffer cannot
    /// hold and bytes that are not UTF-8.
    fn receive_path(&mut self, header: MessageHeader) -> io::Result<Option<String>> {
        let len = header.length_usize();
        if len > MAX_PATH_LEN {
            warn!(len, "path length exceeds limit; discarding");
            self.drain(len)?;
            return Ok(None);
        }

        recv_payload_into(&mut self.stream, &mut self.buf, len)?;
        match std::str::from_utf8(&self.buf[..len]) {
            Ok(path) => Ok(Some(path.to_owned())),
            Err(_) => {
                warn!("path payload is not valid UTF-8");
                Ok(None)
            }
        }
    }

    /// Consumes `len` payload bytes so the stream stays frame-aligned after
    /// a rejected message.
    fn drain(&mut self, len: usize) -> io::Result<()> {
        let mut remaining = len;
        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE);
            recv_payload_into(&mut self.stream, &mut self.buf, want)?;
            remaining -= want;
        }
        Ok(())
    }

    fn refuse_read(&mut self) -> io::Result<()> {
        send_header(&mut self.stream, MessageHeader::new(MessageType::Read, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stripefs_protocol::HEADER_LEN;
    use tempfile::TempDir;

    /// Scripted request bytes in, response bytes out.
    struct Wire {
        input: io::Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Wire {
        fn new(input: Vec<u8>) -> Self {
            Self {
                input: io::Cursor::new(input),
                output: Vec::new(),
            }
        }
    }

    impl Read for Wire {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Wire {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn framed(kind: MessageType, payload: &[u8]) -> Vec<u8> {
        let mut bytes = MessageHeader::new(kind, payload.len() as u64).encode().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    fn run_script(root: &TempDir, script: Vec<u8>) -> Vec<u8> {
        let mut wire = Wire::new(script);
        Session::new(&mut wire, root.path().to_path_buf())
            .run()
            .expect("session runs to EOF");
        wire.output
    }

    #[test]
    fn heartbeat_is_echoed_verbatim() {
        let root = TempDir::new().expect("temp root");
        let script = MessageHeader::new(MessageType::Heartbeat, 0xDEAD_BEEF)
            .encode()
            .to_vec();

        let output = run_script(&root, script);
        let echoed = MessageHeader::decode(&output).expect("valid header");
        assert_eq!(echoed.kind(), MessageType::Heartbeat);
        assert_eq!(echoed.length(), 0xDEAD_BEEF);
    }

    #[test]
    fn read_streams_size_header_then_contents() {
        let root = TempDir::new().expect("temp root");
        let contents = b"chunk store payload".to_vec();
        std::fs::write(root.path().join("data.bin"), &contents).expect("seed file");

        let output = run_script(&root, framed(MessageType::Read, b"/data.bin"));

        let header = MessageHeader::decode(&output[..HEADER_LEN]).expect("valid header");
        assert_eq!(header.kind(), MessageType::Read);
        assert_eq!(header.length(), contents.len() as u64);
        assert_eq!(&output[HEADER_LEN..], &contents[..]);
    }

    #[test]
    fn read_of_missing_file_reports_zero_length() {
        let root = TempDir::new().expect("temp root");
        let output = run_script(&root, framed(MessageType::Read, b"/absent.bin"));

        let header = MessageHeader::decode(&output).expect("valid header");
        assert_eq!(header.length(), 0);
        assert_eq!(output.len(), HEADER_LEN);
    }

    #[test]
    fn read_rejects_traversal_outside_root() {
        let root = TempDir::new().expect("temp root");
        let output = run_script(&root, framed(MessageType::Read, b"../../etc/passwd"));

        let header = MessageHeader::decode(&output).expect("valid header");
        assert_eq!(header.length(), 0);
    }

    #[test]
    fn write_cursor_appends_chunks_in_order() {
        let root = TempDir::new().expect("temp root");
        let first = vec![0xAA; CHUNK_SIZE];
        let second = vec![0xBB; CHUNK_SIZE];

        let mut script = framed(MessageType::WritePath, b"/out.bin");
        script.extend(framed(MessageType::Write, &first));
        script.extend(framed(MessageType::Write, &second));
        run_script(&root, script);

        let stored = std::fs::read(root.path().join("out.bin")).expect("stored file");
        assert_eq!(stored.len(), 2 * CHUNK_SIZE);
        assert!(stored[..CHUNK_SIZE].iter().all(|byte| *byte == 0xAA));
        assert!(stored[CHUNK_SIZE..].iter().all(|byte| *byte == 0xBB));
    }

    #[test]
    fn reopening_a_path_truncates_and_resets_the_cursor() {
        let root = TempDir::new().expect("temp root");
        let chunk = vec![0x11; CHUNK_SIZE];

        let mut script = framed(MessageType::WritePath, b"/out.bin");
        script.extend(framed(MessageType::Write, &chunk));
        script.extend(framed(MessageType::Write, &chunk));
        script.extend(framed(MessageType::WritePath, b"/out.bin"));
        script.extend(framed(MessageType::Write, &chunk));
        run_script(&root, script);

        let stored = std::fs::metadata(root.path().join("out.bin")).expect("stored file");
        assert_eq!(stored.len(), CHUNK_SIZE as u64);
    }

    #[test]
    fn write_without_open_target_is_discarded() {
        let root = TempDir::new().expect("temp root");
        let mut script = framed(MessageType::Write, &vec![0x42; CHUNK_SIZE]);
        // A heartbeat afterwards proves the stream stayed frame-aligned.
        script.extend(MessageHeader::new(MessageType::Heartbeat, 7).encode());

        let output = run_script(&root, script);
        let echoed = MessageHeader::decode(&output).expect("valid header");
        assert_eq!(echoed.kind(), MessageType::Heartbeat);
        assert!(std::fs::read_dir(root.path()).expect("root listing").next().is_none());
    }

    #[test]
    fn oversized_path_is_drained_and_session_continues() {
        let root = TempDir::new().expect("temp root");
        let huge = vec![b'x'; CHUNK_SIZE];

        let mut script = framed(MessageType::WritePath, &huge);
        script.extend(MessageHeader::new(MessageType::Heartbeat, 3).encode());

        let output = run_script(&root, script);
        let echoed = MessageHeader::decode(&output).expect("valid header");
        assert_eq!(echoed.kind(), MessageType::Heartbeat);
        assert_eq!(echoed.length(), 3);
    }

    /// A header with an unrecognised discriminant carrying `payload`.
    fn unknown_frame(discriminant: u32, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[..4].copy_from_slice(&discriminant.to_le_bytes());
        bytes[8..HEADER_LEN].copy_from_slice(&(payload.len() as u64).to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn unknown_message_types_are_skipped() {
        let root = TempDir::new().expect("temp root");
        let mut script = unknown_frame(9, &[]);
        script.extend(MessageHeader::new(MessageType::Heartbeat, 1).encode());

        let output = run_script(&root, script);
        let echoed = MessageHeader::decode(&output).expect("valid header");
        assert_eq!(echoed.kind(), MessageType::Heartbeat);
    }

    #[test]
    fn unknown_message_payloads_are_drained() {
        // The payload bytes must not be misread as the next header.
        let root = TempDir::new().expect("temp root");
        let payload = vec![0xEE; 512];
        let mut script = unknown_frame(9, &payload);
        script.extend(framed(MessageType::WritePath, b"/after.bin"));
        script.extend(framed(MessageType::Write, &vec![0x33; CHUNK_SIZE]));
        script.extend(MessageHeader::new(MessageType::Heartbeat, 11).encode());

        let output = run_script(&root, script);
        let echoed = MessageHeader::decode(&output).expect("valid header");
        assert_eq!(echoed.kind(), MessageType::Heartbeat);
        assert_eq!(echoed.length(), 11);

        let stored = std::fs::read(root.path().join("after.bin")).expect("stored file");
        assert_eq!(stored.len(), CHUNK_SIZE);
        assert!(stored.iter().all(|byte| *byte == 0x33));
    }
}
