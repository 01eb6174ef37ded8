//! Message-passing seam and the in-memory process group.
//!
//! The harness only ever talks to [`Communicator`]: tagged, blocking,
//! source-addressed sends and receives plus a barrier over an explicit
//! participant list. [`LocalGroup`] is the shipped backend, running every
//! rank on its own OS thread with one FIFO byte channel per ordered rank
//! pair. A rank that unwinds drops its endpoints, which surfaces as
//! [`CommError::Disconnected`] on every peer blocked on it — the in-memory
//! analogue of a group abort: nobody is left wedged.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use bytemuck::{Pod, Zeroable};

pub type Tag = u32;

/// Barrier token traffic; reserved across the crate.
pub const TAG_BARRIER: Tag = 0x00b0;

/// Declared thread support of the messaging layer, ordered from none to
/// full. With more than one active rank and a level below `Funneled`, local
/// transform threading must be disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreadLevel {
    Single,
    Funneled,
    Serialized,
    Multiple,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommError {
    /// The peer's endpoints are gone; it exited or panicked.
    Disconnected { peer: usize },
    /// A receive matched a message carrying an unexpected tag; the protocol
    /// on the two sides has diverged.
    TagMismatch { expected: Tag, got: Tag },
    /// Payload length disagrees with the receiver's geometry.
    PayloadSize { expected: usize, got: usize },
}

impl fmt::Display for CommError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommError::Disconnected { peer } => write!(f, "rank {peer} disconnected"),
            CommError::TagMismatch { expected, got } => {
                write!(f, "expected tag {expected:#x}, received {got:#x}")
            }
            CommError::PayloadSize { expected, got } => {
                write!(f, "expected {expected}-byte payload, received {got}")
            }
        }
    }
}

impl std::error::Error for CommError {}

pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn thread_level(&self) -> ThreadLevel;
    /// Blocking tagged send of a raw payload.
    fn send_bytes(&self, dest: usize, tag: Tag, data: &[u8]) -> Result<(), CommError>;
    /// Blocks until the next message from `source` arrives; its tag must
    /// match `tag`.
    fn recv_bytes(&self, source: usize, tag: Tag) -> Result<Vec<u8>, CommError>;

    fn send_slice<T: Pod>(&self, dest: usize, tag: Tag, data: &[T]) -> Result<(), CommError>
    where
        Self: Sized,
    {
        self.send_bytes(dest, tag, bytemuck::cast_slice(data))
    }

    fn recv_slice<T: Pod>(&self, source: usize, tag: Tag) -> Result<Vec<T>, CommError>
    where
        Self: Sized,
    {
        let bytes = self.recv_bytes(source, tag)?;
        let elem = core::mem::size_of::<T>();
        if elem == 0 || bytes.len() % elem != 0 {
            return Err(CommError::PayloadSize {
                expected: elem,
                got: bytes.len(),
            });
        }
        // The channel buffer has no alignment guarantee; copy through a
        // properly aligned vector instead of reinterpreting in place.
        let mut out = vec![T::zeroed(); bytes.len() / elem];
        bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&bytes);
        Ok(out)
    }

    /// Receives exactly `out.len()` elements from `source` into `out`.
    fn recv_slice_into<T: Pod>(
        &self,
        source: usize,
        tag: Tag,
        out: &mut [T],
    ) -> Result<(), CommError>
    where
        Self: Sized,
    {
        let bytes = self.recv_bytes(source, tag)?;
        let expected = core::mem::size_of_val(out);
        if bytes.len() != expected {
            return Err(CommError::PayloadSize {
                expected,
                got: bytes.len(),
            });
        }
        bytemuck::cast_slice_mut::<T, u8>(out).copy_from_slice(&bytes);
        Ok(())
    }

    /// Sends `data` as `parts` roughly equal messages (the block-divisor
    /// tuning knob; both sides must agree on `parts`).
    fn send_slice_parts<T: Pod>(
        &self,
        dest: usize,
        tag: Tag,
        data: &[T],
        parts: usize,
    ) -> Result<(), CommError>
    where
        Self: Sized,
    {
        if data.is_empty() {
            return self.send_bytes(dest, tag, &[]);
        }
        let parts = parts.clamp(1, data.len());
        let chunk = data.len().div_ceil(parts);
        for piece in data.chunks(chunk) {
            self.send_slice(dest, tag, piece)?;
        }
        Ok(())
    }

    /// Counterpart of [`Communicator::send_slice_parts`].
    fn recv_slice_parts_into<T: Pod>(
        &self,
        source: usize,
        tag: Tag,
        out: &mut [T],
        parts: usize,
    ) -> Result<(), CommError>
    where
        Self: Sized,
    {
        if out.is_empty() {
            let bytes = self.recv_bytes(source, tag)?;
            if !bytes.is_empty() {
                return Err(CommError::PayloadSize {
                    expected: 0,
                    got: bytes.len(),
                });
            }
            return Ok(());
        }
        let parts = parts.clamp(1, out.len());
        let chunk = out.len().div_ceil(parts);
        for piece in out.chunks_mut(chunk) {
            self.recv_slice_into(source, tag, piece)?;
        }
        Ok(())
    }

    /// Blocks until every rank in `participants` has arrived. A no-op for
    /// ranks not on the list, so subsets (e.g. only the active grid) can
    /// synchronize while the rest proceed to teardown.
    fn barrier(&self, participants: &[usize]) -> Result<(), CommError>
    where
        Self: Sized,
    {
        let me = self.rank();
        if participants.len() < 2 || !participants.contains(&me) {
            return Ok(());
        }
        let root = participants[0];
        if me == root {
            for &r in &participants[1..] {
                self.recv_bytes(r, TAG_BARRIER)?;
            }
            for &r in &participants[1..] {
                self.send_bytes(r, TAG_BARRIER, &[])?;
            }
        } else {
            self.send_bytes(root, TAG_BARRIER, &[])?;
            self.recv_bytes(root, TAG_BARRIER)?;
        }
        Ok(())
    }
}

struct Packet {
    tag: Tag,
    bytes: Vec<u8>,
}

/// One rank's endpoints inside a [`LocalGroup`].
pub struct LocalComm {
    rank: usize,
    size: usize,
    level: ThreadLevel,
    /// Senders indexed by destination rank.
    peers: Vec<Sender<Packet>>,
    /// Receivers indexed by source rank.
    inbox: Vec<Receiver<Packet>>,
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn thread_level(&self) -> ThreadLevel {
        self.level
    }

    fn send_bytes(&self, dest: usize, tag: Tag, data: &[u8]) -> Result<(), CommError> {
        self.peers[dest]
            .send(Packet {
                tag,
                bytes: data.to_vec(),
            })
            .map_err(|_| CommError::Disconnected { peer: dest })
    }

    fn recv_bytes(&self, source: usize, tag: Tag) -> Result<Vec<u8>, CommError> {
        let packet = self.inbox[source]
            .recv()
            .map_err(|_| CommError::Disconnected { peer: source })?;
        if packet.tag != tag {
            return Err(CommError::TagMismatch {
                expected: tag,
                got: packet.tag,
            });
        }
        Ok(packet.bytes)
    }
}

/// In-memory process group: one thread per rank.
pub struct LocalGroup;

impl LocalGroup {
    /// Runs `f` once per rank, each on its own thread, and returns rank 0's
    /// result. A panicked rank forces a non-zero result; its peers observe
    /// [`CommError::Disconnected`] rather than hanging.
    pub fn run<F>(size: usize, level: ThreadLevel, f: F) -> i32
    where
        F: Fn(LocalComm) -> i32 + Send + Sync,
    {
        if size == 0 {
            return 0;
        }
        let mut senders: Vec<Vec<Sender<Packet>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut inboxes: Vec<Vec<Option<Receiver<Packet>>>> =
            (0..size).map(|_| (0..size).map(|_| None).collect()).collect();
        for src in 0..size {
            for dst in 0..size {
                let (tx, rx) = mpsc::channel();
                senders[src].push(tx);
                inboxes[dst][src] = Some(rx);
            }
        }
        let comms: Vec<LocalComm> = senders
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(rank, (peers, inbox))| LocalComm {
                rank,
                size,
                level,
                peers,
                inbox: inbox.into_iter().flatten().collect(),
            })
            .collect();
        thread::scope(|scope| {
            let f = &f;
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect();
            let mut result = 0;
            for (rank, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(code) => {
                        if rank == 0 {
                            result = code;
                        }
                    }
                    Err(_) => {
                        log::error!("rank {rank} panicked");
                        if result == 0 {
                            result = 1;
                        }
                    }
                }
            }
            result
        })
    }
}
