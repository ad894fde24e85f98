//! Point-to-point asynchronous messaging between compositing processes.
//!
//! The compositing algorithms are written against the [`Comm`] trait and use
//! only tagged point-to-point operations: immediate sends and receives plus
//! the waits that complete them. An MPI-style transport maps onto the trait
//! directly; [`LocalComm`] provides an in-process mesh for tests and
//! single-machine use.
//!
//! Delivery must be reliable and in order per (source, destination, tag)
//! triple. Receive completion order across different sources is arbitrary;
//! the algorithms tolerate any interleaving.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender, channel};

use rustc_hash::FxHashMap;

/// A message tag.
pub type Tag = u32;

/// First tag of the per-round radix-k image exchange; round `r` uses
/// `RADIXK_SWAP_IMAGE_TAG_START + r` so that rounds never alias.
pub const RADIXK_SWAP_IMAGE_TAG_START: Tag = 2200;

/// Tag of collected image sizes and color plane slices.
pub const SWAP_IMAGE_DATA: Tag = 21;

/// Tag of collected depth plane slices.
pub const SWAP_DEPTH_DATA: Tag = 22;

/// Tag of the render-transfer pre-phase of the reduce strategy.
pub const RENDER_TRANSFER_DATA: Tag = 23;

/// Handle of an asynchronous send in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendRequest(
    /// Transport-defined request id.
    pub u64,
);

/// Handle of a posted receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvRequest(
    /// Transport-defined request id.
    pub u64,
);

/// An error from the messaging collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommError {
    /// A peer process is gone. The collective cannot continue.
    Disconnected {
        /// Rank of the unreachable peer.
        rank: usize,
    },
    /// A rank outside the world was addressed.
    InvalidRank {
        /// The offending rank.
        rank: usize,
    },
    /// A request handle was not issued by this communicator, or was already
    /// completed.
    UnknownRequest,
}

impl core::fmt::Display for CommError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Disconnected { rank } => write!(f, "peer process {rank} is unreachable"),
            Self::InvalidRank { rank } => write!(f, "rank {rank} is outside the world"),
            Self::UnknownRequest => write!(f, "unknown or completed request handle"),
        }
    }
}

impl core::error::Error for CommError {}

/// Point-to-point messaging between the processes of a compositing world.
///
/// Within a process the compositing core is single threaded; implementations
/// are driven from one thread at a time and may keep interior queues without
/// locking.
pub trait Comm {
    /// The world rank of this process.
    fn rank(&self) -> usize;

    /// Number of processes in the world.
    fn num_ranks(&self) -> usize;

    /// Posts an asynchronous send. The payload is buffered or copied by the
    /// transport; the buffer may be reused once [`Comm::wait_all_sends`]
    /// returns.
    fn isend(&mut self, dest: usize, tag: Tag, payload: &[u8]) -> Result<SendRequest, CommError>;

    /// Posts an asynchronous receive for the next message from `src` with
    /// `tag`.
    fn irecv(&mut self, src: usize, tag: Tag) -> Result<RecvRequest, CommError>;

    /// Blocking send.
    fn send(&mut self, dest: usize, tag: Tag, payload: &[u8]) -> Result<(), CommError>;

    /// Blocking receive of the next message from `src` with `tag`.
    fn recv(&mut self, src: usize, tag: Tag) -> Result<Vec<u8>, CommError>;

    /// Blocks until one of the posted receives in `pending` completes,
    /// clears its slot, and returns its index and payload. At least one slot
    /// must be occupied.
    fn wait_any(
        &mut self,
        pending: &mut [Option<RecvRequest>],
    ) -> Result<(usize, Vec<u8>), CommError>;

    /// Blocks until the given receive completes.
    fn wait(&mut self, request: RecvRequest) -> Result<Vec<u8>, CommError>;

    /// Blocks until every send in `requests` has been handed to the
    /// transport, then drains the list.
    fn wait_all_sends(&mut self, requests: &mut Vec<SendRequest>) -> Result<(), CommError>;
}

struct Packet {
    src: usize,
    tag: Tag,
    payload: Vec<u8>,
}

/// An in-process communicator: every rank of the world is a thread connected
/// by channels.
///
/// Build one mesh per world with [`LocalComm::mesh`] and move one
/// communicator into each participating thread. Sends are eagerly buffered,
/// so send requests complete immediately; delivery stays in order per
/// (source, tag) because each pair of ranks shares a single channel.
pub struct LocalComm {
    rank: usize,
    peers: Vec<Sender<Packet>>,
    inbox: Receiver<Packet>,
    stash: VecDeque<Packet>,
    posted: FxHashMap<u64, (usize, Tag)>,
    next_request: u64,
    sent: u64,
    received: u64,
}

impl LocalComm {
    /// Creates the communicators of a `size`-process world.
    pub fn mesh(size: usize) -> Vec<Self> {
        let (senders, inboxes): (Vec<_>, Vec<_>) = (0..size).map(|_| channel()).unzip();
        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Self {
                rank,
                peers: senders.clone(),
                inbox,
                stash: VecDeque::new(),
                posted: FxHashMap::default(),
                next_request: 0,
                sent: 0,
                received: 0,
            })
            .collect()
    }

    /// Messages this rank has sent so far.
    pub fn messages_sent(&self) -> u64 {
        self.sent
    }

    /// Messages this rank has received so far.
    pub fn messages_received(&self) -> u64 {
        self.received
    }

    fn deliver(&mut self, dest: usize, tag: Tag, payload: Vec<u8>) -> Result<(), CommError> {
        let sender = self
            .peers
            .get(dest)
            .ok_or(CommError::InvalidRank { rank: dest })?;
        sender
            .send(Packet {
                src: self.rank,
                tag,
                payload,
            })
            .map_err(|_| CommError::Disconnected { rank: dest })?;
        self.sent += 1;
        Ok(())
    }

    /// Pulls the first stashed or incoming packet matching (src, tag).
    fn take_matching(&mut self, src: usize, tag: Tag) -> Result<Vec<u8>, CommError> {
        if let Some(at) = self
            .stash
            .iter()
            .position(|p| p.src == src && p.tag == tag)
        {
            let packet = self.stash.remove(at).unwrap();
            self.received += 1;
            return Ok(packet.payload);
        }

        loop {
            let packet = self
                .inbox
                .recv()
                .map_err(|_| CommError::Disconnected { rank: src })?;
            if packet.src == src && packet.tag == tag {
                self.received += 1;
                return Ok(packet.payload);
            }
            self.stash.push_back(packet);
        }
    }
}

impl Comm for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.peers.len()
    }

    fn isend(&mut self, dest: usize, tag: Tag, payload: &[u8]) -> Result<SendRequest, CommError> {
        self.deliver(dest, tag, payload.to_vec())?;
        // Eagerly buffered; the request is complete the moment it exists.
        let request = SendRequest(self.next_request);
        self.next_request += 1;
        Ok(request)
    }

    fn irecv(&mut self, src: usize, tag: Tag) -> Result<RecvRequest, CommError> {
        if src >= self.peers.len() {
            return Err(CommError::InvalidRank { rank: src });
        }
        let request = RecvRequest(self.next_request);
        self.next_request += 1;
        self.posted.insert(request.0, (src, tag));
        Ok(request)
    }

    fn send(&mut self, dest: usize, tag: Tag, payload: &[u8]) -> Result<(), CommError> {
        self.deliver(dest, tag, payload.to_vec())
    }

    fn recv(&mut self, src: usize, tag: Tag) -> Result<Vec<u8>, CommError> {
        if src >= self.peers.len() {
            return Err(CommError::InvalidRank { rank: src });
        }
        self.take_matching(src, tag)
    }

    fn wait_any(
        &mut self,
        pending: &mut [Option<RecvRequest>],
    ) -> Result<(usize, Vec<u8>), CommError> {
        debug_assert!(pending.iter().any(Option::is_some));

        // A stashed packet may already satisfy one of the posted receives.
        for (i, slot) in pending.iter_mut().enumerate() {
            let Some(request) = slot else { continue };
            let &(src, tag) = self
                .posted
                .get(&request.0)
                .ok_or(CommError::UnknownRequest)?;
            if let Some(at) = self
                .stash
                .iter()
                .position(|p| p.src == src && p.tag == tag)
            {
                let packet = self.stash.remove(at).unwrap();
                self.posted.remove(&request.0);
                *slot = None;
                self.received += 1;
                return Ok((i, packet.payload));
            }
        }

        loop {
            let packet = self.inbox.recv().map_err(|_| CommError::Disconnected {
                rank: self.rank,
            })?;
            let matched = pending.iter().position(|slot| {
                slot.is_some_and(|request| {
                    self.posted.get(&request.0) == Some(&(packet.src, packet.tag))
                })
            });
            match matched {
                Some(i) => {
                    let request = pending[i].take().unwrap();
                    self.posted.remove(&request.0);
                    self.received += 1;
                    return Ok((i, packet.payload));
                }
                None => self.stash.push_back(packet),
            }
        }
    }

    fn wait(&mut self, request: RecvRequest) -> Result<Vec<u8>, CommError> {
        let (src, tag) = self
            .posted
            .remove(&request.0)
            .ok_or(CommError::UnknownRequest)?;
        self.take_matching(src, tag)
    }

    fn wait_all_sends(&mut self, requests: &mut Vec<SendRequest>) -> Result<(), CommError> {
        // Sends were buffered at post time.
        requests.clear();
        Ok(())
    }
}
