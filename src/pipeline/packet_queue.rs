//! Bounded packet queues between the input thread and the decoders
//!
//! The video and audio queues share one lock and one condition variable so
//! that a full queue can tell the other stream's consumer to stop waiting.
//! Without that, a demuxer blocked on a full video queue would starve an
//! audio decoder blocked on an empty audio queue, and neither would move.

use std::collections::VecDeque;

use log::trace;
use parking_lot::{Condvar, Mutex};

use crate::media::{EncodedPacket, StreamKind};

/// Bookkeeping bytes charged per queued packet on top of its payload
pub const PACKET_OVERHEAD: usize = 64;

/// Bytes a packet of `size` payload bytes costs against the queue cap
pub fn packet_cost(size: usize) -> usize {
    size + PACKET_OVERHEAD
}

/// Outcome of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    /// The packet (or end-of-stream marker) was accepted
    Queued,

    /// End-of-stream was already marked, or the consumer has gone; the
    /// packet was dropped
    Closed,

    /// The queue was aborted; the packet was dropped
    Aborted,
}

/// Outcome of a pop
#[derive(Debug, PartialEq, Eq)]
pub enum Pop<P> {
    Packet(P),

    /// Queue drained after end-of-stream; reported once
    EndOfStream,

    /// The queue was aborted
    Aborted,

    /// End-of-stream was already reported, or the queue was closed
    Finished,

    /// Empty while the other queue is full; the caller should make progress
    /// elsewhere and retry
    WouldBlock,
}

#[derive(Debug)]
struct QueueState<P> {
    packets: VecDeque<P>,

    /// Charged bytes, see `packet_cost`
    size: usize,

    eof: bool,
    abort: bool,
    eos_reported: bool,

    /// The consumer has exited; pushes are dropped without waiting
    closed: bool,
}

impl<P> QueueState<P> {
    fn new() -> Self {
        Self {
            packets: VecDeque::new(),
            size: 0,
            eof: false,
            abort: false,
            eos_reported: false,
            closed: false,
        }
    }
}

#[derive(Debug)]
struct Shared<P> {
    queues: [QueueState<P>; 2],

    /// Set while a producer waits on a full queue
    stall: bool,
}

/// The video and audio packet queues
#[derive(Debug)]
pub struct PacketQueues<P> {
    shared: Mutex<Shared<P>>,
    cond: Condvar,
    max_bytes: usize,
}

/// Handle to one of the two queues
#[derive(Debug, Clone, Copy)]
pub struct PacketQueue<'a, P> {
    owner: &'a PacketQueues<P>,
    kind: StreamKind,
}

impl<P: EncodedPacket> PacketQueues<P> {
    /// Create both queues, each capped at `max_bytes` charged bytes
    pub fn new(max_bytes: usize) -> Self {
        Self {
            shared: Mutex::new(Shared {
                queues: [QueueState::new(), QueueState::new()],
                stall: false,
            }),
            cond: Condvar::new(),
            max_bytes,
        }
    }

    pub fn get(&self, kind: StreamKind) -> PacketQueue<'_, P> {
        PacketQueue { owner: self, kind }
    }

    pub fn video(&self) -> PacketQueue<'_, P> {
        self.get(StreamKind::Video)
    }

    pub fn audio(&self) -> PacketQueue<'_, P> {
        self.get(StreamKind::Audio)
    }

    /// Whether a producer is currently waiting on a full queue
    pub fn is_stalled(&self) -> bool {
        self.shared.lock().stall
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl<'a, P: EncodedPacket> PacketQueue<'a, P> {
    /// Append a packet, or mark end-of-stream with `None`
    ///
    /// Blocks while the queue is non-empty and the packet would push it past
    /// the cap. A packet larger than the cap is still admitted once the queue
    /// has drained completely.
    pub fn push(&self, packet: Option<P>) -> Push {
        let owner = self.owner;
        let i = self.kind.index();
        let mut shared = owner.shared.lock();

        let Some(packet) = packet else {
            shared.queues[i].eof = true;
            owner.cond.notify_all();
            return if shared.queues[i].abort { Push::Aborted } else { Push::Queued };
        };

        if shared.queues[i].abort {
            return Push::Aborted;
        }

        if shared.queues[i].eof || shared.queues[i].closed {
            return Push::Closed;
        }

        let cost = packet_cost(packet.size());

        while !shared.queues[i].abort
            && !shared.queues[i].closed
            && !shared.queues[i].packets.is_empty()
            && shared.queues[i].size + cost > owner.max_bytes
        {
            if !shared.stall {
                trace!("{} packet queue full, input stalled", self.kind.name());
            }
            shared.stall = true;
            owner.cond.notify_all();
            owner.cond.wait(&mut shared);
        }

        shared.stall = false;

        if shared.queues[i].abort {
            owner.cond.notify_all();
            return Push::Aborted;
        }

        if shared.queues[i].closed {
            owner.cond.notify_all();
            return Push::Closed;
        }

        let queue = &mut shared.queues[i];
        queue.packets.push_back(packet);
        queue.size += cost;
        owner.cond.notify_all();

        Push::Queued
    }

    /// Take the oldest packet, blocking while the queue is empty
    pub fn pop(&self) -> Pop<P> {
        let owner = self.owner;
        let i = self.kind.index();
        let mut shared = owner.shared.lock();

        loop {
            let stall = shared.stall;
            let queue = &mut shared.queues[i];

            if queue.abort {
                return Pop::Aborted;
            }

            if queue.closed {
                return Pop::Finished;
            }

            if let Some(packet) = queue.packets.pop_front() {
                queue.size -= packet_cost(packet.size());
                owner.cond.notify_all();
                return Pop::Packet(packet);
            }

            if queue.eof {
                if queue.eos_reported {
                    return Pop::Finished;
                }
                queue.eos_reported = true;
                return Pop::EndOfStream;
            }

            if stall {
                return Pop::WouldBlock;
            }

            owner.cond.wait(&mut shared);
        }
    }

    /// Drop every queued packet; the eof and abort flags are untouched
    pub fn flush(&self) {
        let mut shared = self.owner.shared.lock();
        let queue = &mut shared.queues[self.kind.index()];
        queue.packets.clear();
        queue.size = 0;
        self.owner.cond.notify_all();
    }

    /// Drop every queued packet and refuse further ones
    ///
    /// Called when the consumer exits on its own. Later pushes return
    /// `Closed` straight away instead of blocking, so the producer and the
    /// other stream keep moving.
    pub fn close(&self) {
        let mut shared = self.owner.shared.lock();
        let queue = &mut shared.queues[self.kind.index()];
        queue.closed = true;
        queue.packets.clear();
        queue.size = 0;
        self.owner.cond.notify_all();
    }

    /// Wake every waiter; later pushes and pops report `Aborted`
    pub fn abort(&self) {
        let mut shared = self.owner.shared.lock();
        shared.queues[self.kind.index()].abort = true;
        self.owner.cond.notify_all();
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Queued packet count
    pub fn len(&self) -> usize {
        self.owner.shared.lock().queues[self.kind.index()].packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Charged bytes currently queued
    pub fn size(&self) -> usize {
        self.owner.shared.lock().queues[self.kind.index()].size
    }

    pub fn is_eof(&self) -> bool {
        self.owner.shared.lock().queues[self.kind.index()].eof
    }

    pub fn is_aborted(&self) -> bool {
        self.owner.shared.lock().queues[self.kind.index()].abort
    }

    pub fn is_closed(&self) -> bool {
        self.owner.shared.lock().queues[self.kind.index()].closed
    }
}
