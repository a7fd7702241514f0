//! The connection pool and the write/read pipelines built on it.

use std::io;
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use stripefs_protocol::CHUNK_SIZE;
use stripefs_stripe::{data_nodes, locate, parity_of, reconstruct_into, stride_bytes, stripe_span};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::slot::{NodeSlot, ParityGate};

/// State of the currently open read file.
struct ReadState {
    path: String,
    /// Per-node segment length from the first successful response; all
    /// participating nodes store equally sized, chunk-padded segments.
    segment_len: u64,
    /// Data node being substituted by the parity stream, if any.
    failed_data: Option<usize>,
    /// The parity node's stream was opened as a stand-in.
    parity_active: bool,
}

impl ReadState {
    /// Total file bytes recoverable from the nodes, including tail padding.
    fn padded_len(&self, n: usize) -> u64 {
        (self.segment_len / CHUNK_SIZE as u64) * stride_bytes(n)
    }
}

/// The client-side set of storage-node connections.
///
/// One `Cluster` exists per mounted filesystem. Node slots are per-process:
/// a single file is open for reading at a time, and distinct stripe
/// residencies are serialised.
pub struct Cluster {
    nodes: Vec<Arc<NodeSlot>>,
    read_state: Mutex<Option<ReadState>>,
}

impl Cluster {
    /// Connects to every configured `host:port` address, in order.
    ///
    /// Any connection failure is fatal: the cluster starts with all nodes
    /// live or not at all.
    pub fn connect(addrs: &[String]) -> EngineResult<Self> {
        if addrs.is_empty() {
            return Err(EngineError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no storage nodes configured",
            )));
        }

        let mut nodes = Vec::with_capacity(addrs.len());
        for (index, addr) in addrs.iter().enumerate() {
            let stream = TcpStream::connect(addr.as_str()).map_err(|source| {
                EngineError::Connect {
                    addr: addr.clone(),
                    source,
                }
            })?;
            nodes.push(Arc::new(NodeSlot::new(index, stream)));
        }

        info!(nodes = nodes.len(), "connected to storage cluster");
        Ok(Self {
            nodes,
            read_state: Mutex::new(None),
        })
    }

    /// Number of configured nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn lock_read_state(&self) -> MutexGuard<'_, Option<ReadState>> {
        self.read_state.lock().expect("read state mutex poisoned")
    }

    /// Fails once too few nodes remain for any further I/O.
    fn check_quorum(&self) -> EngineResult<()> {
        let down = self.nodes.iter().filter(|slot| slot.is_down()).count();
        if down >= 2 || down == self.nodes.len() {
            return Err(EngineError::DataLoss);
        }
        Ok(())
    }

    /// Waits for all streaming workers to finish, then discards whatever the
    /// previous read left unconsumed so every stream sits on a frame
    /// boundary again.
    fn quiesce_and_drain(&self) {
        for slot in &self.nodes {
            let leftover = {
                let mut sched = slot.lock_sched();
                while sched.active {
                    sched = slot
                        .sched_cv
                        .wait(sched)
                        .expect("node sched mutex poisoned");
                }
                let leftover = sched.segment_len.saturating_sub(sched.stream_pos);
                sched.segment_len = 0;
                sched.stream_pos = 0;
                sched.offset = 0;
                leftover
            };
            if leftover > 0 {
                slot.discard_inbound(leftover);
            }
        }
    }

    /// Writes `data` as a whole file: stripes it across the nodes, one
    /// stripe at a time, with the tail stripe zero-padded.
    ///
    /// Returns the number of input bytes accepted. Surviving nodes receive
    /// an identical monotonic sequence of chunks; a node that fails a send
    /// is marked down and skipped for the rest of the file.
    pub fn write_file(&self, path: &str, data: &[u8]) -> EngineResult<usize> {
        let mut state = self.lock_read_state();
        self.quiesce_and_drain();
        *state = None;

        let n = self.nodes.len();
        let stride = stride_bytes(n) as usize;
        self.check_quorum()?;

        for slot in &self.nodes {
            slot.send_write_path(path);
        }
        self.check_quorum()?;

        let stripes = stripe_span(data.len() as u64, n);
        let mut scratch = vec![0u8; stride];
        for stripe in 0..stripes {
            let start = stripe as usize * stride;
            let take = (data.len() - start).min(stride);
            scratch[..take].copy_from_slice(&data[start..start + take]);
            scratch[take..].fill(0);

            let parity = if n >= 2 {
                parity_of(&scratch, n)
            } else {
                Vec::new()
            };

            thread::scope(|scope| {
                for (i, slot) in self.nodes.iter().enumerate() {
                    if slot.is_down() {
                        continue;
                    }
                    let payload: &[u8] = if n == 1 {
                        &scratch
                    } else if i < n - 1 {
                        &scratch[i * CHUNK_SIZE..(i + 1) * CHUNK_SIZE]
                    } else {
                        &parity
                    };
                    scope.spawn(move || slot.send_chunk(payload));
                }
            });

            self.check_quorum()?;
        }

        debug!(path, bytes = data.len(), stripes, "write complete");
        Ok(data.len())
    }

    /// Opens `path` for reading: fans a read request out to the data nodes,
    /// falling back to the parity node when exactly one of them fails.
    ///
    /// Returns the padded file length recoverable from the cluster; reads
    /// clamp to it. The logical length is the caller's concern (stripefs
    /// keeps metadata on the client side).
    pub fn open_for_read(&self, path: &str) -> EngineResult<u64> {
        let mut state = self.lock_read_state();
        self.quiesce_and_drain();
        *state = None;

        let n = self.nodes.len();
        let data_count = data_nodes(n);

        let mut responses: Vec<Option<u64>> = vec![None; n];
        thread::scope(|scope| {
            let handles: Vec<_> = (0..data_count)
                .map(|i| {
                    let slot = &self.nodes[i];
                    scope.spawn(move || slot.request_read(path))
                })
                .collect();
            for (i, handle) in handles.into_iter().enumerate() {
                responses[i] = handle.join().expect("read fan-out worker panicked");
            }
        });

        let mut failed = None;
        for (i, response) in responses.iter().enumerate().take(data_count) {
            match response {
                Some(len) if *len > 0 => {}
                _ => {
                    if failed.is_some() {
                        return Err(EngineError::DataLoss);
                    }
                    failed = Some(i);
                }
            }
        }

        let mut parity_active = false;
        if failed.is_some() {
            if n == 1 {
                return Err(EngineError::DataLoss);
            }
            match self.nodes[n - 1].request_read(path) {
                Some(len) if len > 0 => {
                    responses[n - 1] = Some(len);
                    parity_active = true;
                }
                _ => return Err(EngineError::DataLoss),
            }
        }

        let segment_len = responses
            .iter()
            .flatten()
            .copied()
            .find(|len| *len > 0)
            .unwrap_or(0);

        let stride = stride_bytes(n);
        for (i, slot) in self.nodes.iter().enumerate() {
            let mut sched = slot.lock_sched();
            sched.active = false;
            sched.offset = -(stride as i64);
            sched.stream_pos = 0;
            sched.segment_len = responses[i].unwrap_or(0);
            drop(sched);

            let mut chunk = slot.lock_chunk();
            chunk.written = 0;
            chunk.failed = false;
        }

        let new_state = ReadState {
            path: path.to_owned(),
            segment_len,
            failed_data: failed,
            parity_active,
        };
        let padded = new_state.padded_len(n);
        debug!(path, segment_len, padded, degraded = failed.is_some(), "read open");
        *state = Some(new_state);
        Ok(padded)
    }

    /// Reads from the open file at `offset` into `buf`.
    ///
    /// Returns the number of bytes copied, short only when the request runs
    /// past the padded end of the file.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> EngineResult<usize> {
        let mut guard = self.lock_read_state();
        let Some(state) = guard.as_mut() else {
            return Err(EngineError::NotOpen);
        };

        let n = self.nodes.len();
        let stride = stride_bytes(n);
        let padded = state.padded_len(n);
        if offset >= padded || buf.is_empty() {
            return Ok(0);
        }

        let len = buf.len().min((padded - offset) as usize);
        let end = offset + len as u64;
        debug!(path = %state.path, offset, len, "read");

        let mut copied = 0;
        for stripe in locate(offset, n).stripe..=locate(end - 1, n).stripe {
            // A node that dies mid-stripe is only marked down by its
            // worker; retrying once lets the substitution check pick the
            // failure up and re-serve the stripe from parity.
            if let Err(error) = self.fill_stripe(state, stripe, offset, end) {
                match error {
                    EngineError::NodeStream { .. } => {
                        self.fill_stripe(state, stripe, offset, end)?
                    }
                    other => return Err(other),
                }
            }

            let stripe_start = stripe * stride;
            for i in 0..data_nodes(n) {
                let chunk_start = stripe_start + (i * CHUNK_SIZE) as u64;
                let chunk_end = chunk_start + CHUNK_SIZE as u64;
                let from = offset.max(chunk_start);
                let to = end.min(chunk_end);
                if from >= to {
                    continue;
                }

                let chunk = self.nodes[i].lock_chunk();
                let lo = (from - chunk_start) as usize;
                let hi = (to - chunk_start) as usize;
                buf[copied..copied + (hi - lo)].copy_from_slice(&chunk.data[lo..hi]);
                copied += hi - lo;
            }
        }

        Ok(copied)
    }

    /// Makes one stripe resident in the slot buffers: schedules every
    /// required chunk, waits for completion, and reconstructs the missing
    /// chunk from parity in degraded mode.
    fn fill_stripe(
        &self,
        state: &mut ReadState,
        stripe: u64,
        offset: u64,
        end: u64,
    ) -> EngineResult<()> {
        let n = self.nodes.len();
        let stride = stride_bytes(n);
        let stripe_start = stripe * stride;

        // Substitution is decided per call, not at open: a data node that
        // died since then is served from parity starting with this stripe.
        for i in 0..data_nodes(n) {
            if Some(i) == state.failed_data {
                continue;
            }
            if self.nodes[i].is_down() {
                if state.failed_data.is_some() {
                    return Err(EngineError::DataLoss);
                }
                state.failed_data = Some(i);
            }
        }
        if state.failed_data.is_some() && !state.parity_active {
            self.activate_parity(state)?;
        }

        // Schedule first, wait second: the parity assignment must land
        // before any gated data worker can be waited on.
        let mut pending = Vec::new();
        for i in 0..data_nodes(n) {
            if Some(i) == state.failed_data {
                continue;
            }
            let chunk_start = stripe_start + (i * CHUNK_SIZE) as u64;
            let needed = chunk_start < end && chunk_start + CHUNK_SIZE as u64 > offset;
            // Reconstruction needs every surviving chunk of the stripe.
            if needed || state.failed_data.is_some() {
                let gate = state.parity_active.then(|| ParityGate {
                    parity: Arc::clone(&self.nodes[n - 1]),
                    stride,
                    stripe,
                });
                self.schedule_chunk(i, chunk_start, stripe, gate)?;
                pending.push(i);
            }
        }
        if let Some(f) = state.failed_data {
            let chunk_start = stripe_start + (f * CHUNK_SIZE) as u64;
            self.schedule_chunk(n - 1, chunk_start, stripe, None)?;
            pending.push(n - 1);
        }

        for idx in pending {
            self.wait_chunk(idx)?;
        }

        if let Some(f) = state.failed_data {
            let parity = self.nodes[n - 1].lock_chunk();
            let survivors: Vec<_> = (0..data_nodes(n))
                .filter(|i| *i != f)
                .map(|i| self.nodes[i].lock_chunk())
                .collect();

            let mut out = self.nodes[f].lock_chunk();
            reconstruct_into(
                &mut out.data,
                &parity.data,
                survivors.iter().map(|guard| &guard.data[..]),
            );
            out.written = CHUNK_SIZE;
            out.failed = false;
        }

        Ok(())
    }

    /// Opens the parity stream mid-read, for a data node that died after
    /// a clean open.
    fn activate_parity(&self, state: &mut ReadState) -> EngineResult<()> {
        let n = self.nodes.len();
        if n == 1 {
            return Err(EngineError::DataLoss);
        }

        let parity = &self.nodes[n - 1];
        match parity.request_read(&state.path) {
            Some(len) if len > 0 => {
                let mut sched = parity.lock_sched();
                sched.offset = -(stride_bytes(n) as i64);
                sched.stream_pos = 0;
                sched.segment_len = len;
                drop(sched);

                let mut chunk = parity.lock_chunk();
                chunk.written = 0;
                chunk.failed = false;
                drop(chunk);

                debug!(path = %state.path, "parity stream activated");
                state.parity_active = true;
                Ok(())
            }
            _ => Err(EngineError::DataLoss),
        }
    }

    /// Assigns a chunk to a slot and spawns its streaming worker, unless
    /// the chunk is already resident.
    fn schedule_chunk(
        &self,
        slot_idx: usize,
        chunk_start: u64,
        stripe: u64,
        gate: Option<ParityGate>,
    ) -> EngineResult<()> {
        let slot = &self.nodes[slot_idx];
        let mut sched = slot.lock_sched();
        while sched.active {
            sched = slot
                .sched_cv
                .wait(sched)
                .expect("node sched mutex poisoned");
        }

        let target = stripe * CHUNK_SIZE as u64;
        if sched.offset == chunk_start as i64 && sched.stream_pos == target + CHUNK_SIZE as u64 {
            return Ok(());
        }
        if sched.stream_pos > target {
            return Err(EngineError::NonSequentialRead {
                offset: chunk_start,
            });
        }

        sched.offset = chunk_start as i64;
        {
            let mut chunk = slot.lock_chunk();
            chunk.written = 0;
            chunk.failed = false;
        }
        sched.active = true;
        drop(sched);
        slot.sched_cv.notify_all();

        let worker = Arc::clone(slot);
        let spawned = thread::Builder::new()
            .name(format!("stream-{slot_idx}"))
            .spawn(move || NodeSlot::stream_chunk(worker, target, gate));
        if let Err(error) = spawned {
            let mut sched = slot.lock_sched();
            sched.active = false;
            drop(sched);
            slot.sched_cv.notify_all();
            return Err(EngineError::Io(error));
        }
        Ok(())
    }

    /// Blocks until the slot's assigned chunk is complete.
    fn wait_chunk(&self, slot_idx: usize) -> EngineResult<()> {
        let slot = &self.nodes[slot_idx];
        let mut chunk = slot.lock_chunk();
        while chunk.written < CHUNK_SIZE && !chunk.failed {
            chunk = slot
                .chunk_cv
                .wait(chunk)
                .expect("node chunk mutex poisoned");
        }

        if chunk.failed {
            return Err(EngineError::NodeStream { node: slot_idx });
        }
        Ok(())
    }

    /// Probes every node with a heartbeat cookie and reports which answered.
    ///
    /// Quiesces any open read first (the probe shares the streams), so the
    /// current read file is closed as a side effect.
    pub fn heartbeat(&self, cookie: u64) -> Vec<bool> {
        let mut state = self.lock_read_state();
        self.quiesce_and_drain();
        *state = None;

        self.nodes.iter().map(|slot| slot.probe(cookie)).collect()
    }
}
