//! Per-node connection state and the chunk streaming worker.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use stripefs_protocol::{
    CHUNK_SIZE, MessageHeader, MessageType, recv_header, send_header, send_message,
};
use tracing::{debug, warn};

/// Pause between non-blocking receive attempts that made no progress.
const POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Scheduling state: which chunk the node was last asked for and whether a
/// streaming worker is currently attached.
pub(crate) struct SlotSched {
    /// A worker is streaming a chunk into the slot buffer.
    pub active: bool,
    /// File-space byte at which the last requested chunk begins. Starts one
    /// stride behind zero so the first assignment lands on offset 0.
    pub offset: i64,
    /// Bytes consumed from this node's stream since the file was opened.
    pub stream_pos: u64,
    /// Size of the node's stored segment as reported at open (0 when the
    /// node is not participating in the current read).
    pub segment_len: u64,
}

/// Completion state: the slot's partition of the client ring buffer and the
/// progress counter streaming workers publish.
pub(crate) struct SlotChunk {
    /// Bytes of the assigned chunk received so far.
    pub written: usize,
    /// The worker gave up; the chunk will never complete.
    pub failed: bool,
    /// One chunk's worth of staging space.
    pub data: Box<[u8]>,
}

/// Gate handed to data-node workers while the parity stream is in use: a
/// worker must not consume bytes until the parity node has been asked for
/// the current stripe.
pub(crate) struct ParityGate {
    pub parity: Arc<NodeSlot>,
    pub stride: u64,
    pub stripe: u64,
}

/// Client-side record for one storage node.
pub(crate) struct NodeSlot {
    pub index: usize,
    conn: Mutex<Option<TcpStream>>,
    pub sched: Mutex<SlotSched>,
    pub sched_cv: Condvar,
    pub chunk: Mutex<SlotChunk>,
    pub chunk_cv: Condvar,
}

impl NodeSlot {
    pub fn new(index: usize, stream: TcpStream) -> Self {
        Self {
            index,
            conn: Mutex::new(Some(stream)),
            sched: Mutex::new(SlotSched {
                active: false,
                offset: 0,
                stream_pos: 0,
                segment_len: 0,
            }),
            sched_cv: Condvar::new(),
            chunk: Mutex::new(SlotChunk {
                written: 0,
                failed: false,
                data: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
            }),
            chunk_cv: Condvar::new(),
        }
    }

    pub fn lock_conn(&self) -> MutexGuard<'_, Option<TcpStream>> {
        self.conn.lock().expect("node connection mutex poisoned")
    }

    pub fn lock_sched(&self) -> MutexGuard<'_, SlotSched> {
        self.sched.lock().expect("node sched mutex poisoned")
    }

    pub fn lock_chunk(&self) -> MutexGuard<'_, SlotChunk> {
        self.chunk.lock().expect("node chunk mutex poisoned")
    }

    pub fn is_down(&self) -> bool {
        self.lock_conn().is_none()
    }

    pub fn mark_down(&self) {
        *self.lock_conn() = None;
    }

    /// Announces the write target to this node. A send failure marks the
    /// node down; subsequent sends become no-ops.
    pub fn send_write_path(&self, path: &str) {
        let mut conn = self.lock_conn();
        let Some(stream) = conn.as_mut() else { return };
        if let Err(error) = send_message(stream, MessageType::WritePath, path.as_bytes()) {
            warn!(node = self.index, %error, "write-path send failed; marking node down");
            *conn = None;
        }
    }

    /// Sends one chunk of data (or parity) to this node.
    pub fn send_chunk(&self, payload: &[u8]) {
        debug_assert_eq!(payload.len(), CHUNK_SIZE);
        let mut conn = self.lock_conn();
        let Some(stream) = conn.as_mut() else { return };

        let header = MessageHeader::new(MessageType::Write, CHUNK_SIZE as u64);
        let result = send_header(stream, header).and_then(|()| stream.write_all(payload));
        if let Err(error) = result {
            warn!(node = self.index, %error, "chunk send failed; marking node down");
            *conn = None;
        }
    }

    /// Requests a file from this node and returns the response header's
    /// segment length. `None` means the node failed at the socket level and
    /// has been marked down.
    pub fn request_read(&self, path: &str) -> Option<u64> {
        let mut conn = self.lock_conn();
        let stream = conn.as_mut()?;

        let response = send_message(stream, MessageType::Read, path.as_bytes())
            .and_then(|()| recv_header(stream));
        match response {
            Ok(Some(header)) if header.kind() == MessageType::Read => Some(header.length()),
            Ok(_) => {
                warn!(node = self.index, "unexpected read response; marking node down");
                *conn = None;
                None
            }
            Err(error) => {
                warn!(node = self.index, %error, "read request failed; marking node down");
                *conn = None;
                None
            }
        }
    }

    /// Sends a heartbeat and checks that the node echoes the cookie back.
    pub fn probe(&self, cookie: u64) -> bool {
        let mut conn = self.lock_conn();
        let Some(stream) = conn.as_mut() else {
            return false;
        };

        let request = MessageHeader::new(MessageType::Heartbeat, cookie);
        let response = send_header(stream, request).and_then(|()| recv_header(stream));
        match response {
            Ok(Some(header)) if header == request => true,
            Ok(_) => {
                warn!(node = self.index, "bad heartbeat echo; marking node down");
                *conn = None;
                false
            }
            Err(error) => {
                warn!(node = self.index, %error, "heartbeat failed; marking node down");
                *conn = None;
                false
            }
        }
    }

    /// Reads and discards `leftover` bytes so the next request's response
    /// starts on a frame boundary.
    pub fn discard_inbound(&self, leftover: u64) {
        let mut conn = self.lock_conn();
        let Some(stream) = conn.as_mut() else { return };
        if stream.set_nonblocking(false).is_err() {
            *conn = None;
            return;
        }

        let mut scratch = vec![0u8; 64 * 1024];
        let mut remaining = leftover;
        while remaining > 0 {
            let want = scratch.len().min(remaining as usize);
            match stream.read(&mut scratch[..want]) {
                Ok(0) => {
                    *conn = None;
                    return;
                }
                Ok(got) => remaining -= got as u64,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    warn!(node = self.index, %error, "stream drain failed; marking node down");
                    *conn = None;
                    return;
                }
            }
        }
    }

    /// Detached worker body: streams one chunk from the node into the slot
    /// buffer, starting at stream position `target`.
    ///
    /// Completion is observed through the `written` counter and the chunk
    /// condvar; there is no join point.
    pub fn stream_chunk(slot: Arc<Self>, target: u64, gate: Option<ParityGate>) {
        if let Some(gate) = &gate {
            Self::await_parity(gate);
        }

        match slot.fill_from_stream(target) {
            Ok(()) => {
                let mut sched = slot.lock_sched();
                sched.stream_pos = target + CHUNK_SIZE as u64;
                sched.active = false;
            }
            Err(error) => {
                warn!(node = slot.index, %error, "chunk stream failed; marking node down");
                slot.mark_down();
                {
                    let mut chunk = slot.lock_chunk();
                    chunk.failed = true;
                }
                slot.chunk_cv.notify_all();
                let mut sched = slot.lock_sched();
                sched.active = false;
            }
        }
        slot.sched_cv.notify_all();
    }

    /// Blocks until the parity node has been asked for at least the gated
    /// worker's stripe. A dead parity node lifts the gate; the reader
    /// surfaces the failure when it waits on the parity chunk.
    fn await_parity(gate: &ParityGate) {
        let mut sched = gate.parity.lock_sched();
        while !gate.parity.is_down()
            && sched.offset.div_euclid(gate.stride as i64) < gate.stripe as i64
        {
            sched = gate
                .parity
                .sched_cv
                .wait(sched)
                .expect("node sched mutex poisoned");
        }
    }

    fn fill_from_stream(&self, target: u64) -> io::Result<()> {
        let mut stream = self
            .lock_conn()
            .as_ref()
            .map(TcpStream::try_clone)
            .transpose()?
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "node is down"))?;

        stream.set_nonblocking(true)?;
        let result = self.pump(&mut stream, target);
        let _ = stream.set_nonblocking(false);
        result
    }

    /// Drains any skipped whole chunks, then fills the slot buffer with
    /// non-blocking receives, publishing progress after every advance.
    fn pump(&self, stream: &mut TcpStream, target: u64) -> io::Result<()> {
        let gap = {
            let sched = self.lock_sched();
            target.saturating_sub(sched.stream_pos)
        };

        if gap > 0 {
            debug!(node = self.index, gap, "draining skipped stream bytes");
            let mut scratch = vec![0u8; 64 * 1024];
            let mut remaining = gap;
            while remaining > 0 {
                let want = scratch.len().min(remaining as usize);
                match stream.read(&mut scratch[..want]) {
                    Ok(0) => {
                        return Err(io::ErrorKind::UnexpectedEof.into());
                    }
                    Ok(got) => remaining -= got as u64,
                    Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(POLL_INTERVAL);
                    }
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                    Err(error) => return Err(error),
                }
            }
        }

        loop {
            let mut chunk = self.lock_chunk();
            if chunk.written >= CHUNK_SIZE {
                return Ok(());
            }

            let written = chunk.written;
            match stream.read(&mut chunk.data[written..CHUNK_SIZE]) {
                Ok(0) => {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                Ok(got) => {
                    chunk.written += got;
                    drop(chunk);
                    self.chunk_cv.notify_all();
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    drop(chunk);
                    thread::sleep(POLL_INTERVAL);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
    }
}
