//! Double-buffered single-producer single-consumer frame hand-off
//!
//! One buffer is the front (owned by the consumer), the other the back
//! (filled by the producer). Publishing marks the back ready; consuming
//! swaps the two unless the producer asked for the previous front to be
//! shown again. Both sides block on a shared condition variable and every
//! wait re-checks the abort flag.
//!
//! A producer that runs out of frames calls `finish` rather than `abort`:
//! the consumer still receives the last publish before seeing the end.

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Exclusive access to one of the slot's buffers
pub type SlotGuard<'a, T> = MutexGuard<'a, T>;

#[derive(Debug, Default)]
struct SlotState {
    /// A published buffer is waiting to be consumed
    ready: bool,

    /// The pending publish repeats the current front
    repeat: bool,

    abort: bool,

    /// Producer is done; nothing will be published after the pending frame
    finished: bool,

    /// Index of the consumer-owned buffer
    front: usize,
}

/// Two buffers and the state that arbitrates them
#[derive(Debug)]
pub struct FrameSlot<T> {
    state: Mutex<SlotState>,
    cond: Condvar,
    buffers: [Mutex<T>; 2],
}

impl<T> FrameSlot<T> {
    /// Create a slot whose initial front is `front`
    pub fn new(front: T, back: T) -> Self {
        Self {
            state: Mutex::new(SlotState::default()),
            cond: Condvar::new(),
            buffers: [Mutex::new(front), Mutex::new(back)],
        }
    }

    /// Lock the back buffer for writing
    ///
    /// Blocks until the previous publish has been consumed. Returns `None`
    /// once the slot is aborted. The guard must be dropped before
    /// `publish`.
    pub fn acquire_back(&self) -> Option<SlotGuard<'_, T>> {
        let mut state = self.state.lock();
        while state.ready && !state.abort {
            self.cond.wait(&mut state);
        }

        if state.abort {
            return None;
        }

        let back = 1 - state.front;
        drop(state);

        Some(self.buffers[back].lock())
    }

    /// Mark the back buffer ready, or with `repeat` re-present the front
    ///
    /// Returns false if the slot was aborted.
    pub fn publish(&self, repeat: bool) -> bool {
        let mut state = self.state.lock();
        while state.ready && !state.abort {
            self.cond.wait(&mut state);
        }

        if state.abort {
            return false;
        }

        state.ready = true;
        state.repeat = repeat;
        self.cond.notify_all();

        true
    }

    /// Take the next published frame
    ///
    /// Blocks until something is published. Returns `None` once the slot is
    /// aborted, or finished with nothing left pending, which the consumer
    /// treats as end-of-stream.
    pub fn consume(&self) -> Option<SlotGuard<'_, T>> {
        let mut state = self.state.lock();
        while !state.ready && !state.abort && !state.finished {
            self.cond.wait(&mut state);
        }

        if state.abort || !state.ready {
            return None;
        }

        if !state.repeat {
            state.front = 1 - state.front;
        }

        state.ready = false;
        state.repeat = false;
        let front = state.front;
        self.cond.notify_all();
        drop(state);

        Some(self.buffers[front].lock())
    }

    /// Lock the current front without consuming anything
    pub fn front(&self) -> SlotGuard<'_, T> {
        let front = self.state.lock().front;
        self.buffers[front].lock()
    }

    /// Wake both sides; every later call reports the slot as done
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.abort = true;
        self.cond.notify_all();
    }

    /// Producer side end-of-stream; a pending publish is still delivered
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        self.cond.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().abort
    }

    /// A publish is waiting to be consumed
    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }
}

/// Type-erased abort handle for slots of any frame type
pub(crate) trait SlotControl: Send + Sync {
    fn abort(&self);
}

impl<T: Send> SlotControl for FrameSlot<T> {
    fn abort(&self) {
        FrameSlot::abort(self);
    }
}
