//! Threaded pipeline core
//!
//! demux -> packet queues -> decode -> input slot -> transform -> output slot
//!
//! Each stream gets a decode thread and a transform thread; one input thread
//! feeds both streams. `Pipeline` owns the thread handles and implements the
//! shutdown sequence shared by `MediaFeed::close`, drop and failed opens.

pub mod audio;
pub mod clock;
pub mod decode;
pub mod frame_slot;
pub mod input;
pub mod packet_queue;
pub mod samples;
pub mod video;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error};

use crate::media::{EncodedPacket, StreamKind};
use crate::utils::error::{AvFeedError, Result};

use frame_slot::SlotControl;
use packet_queue::PacketQueues;

pub use audio::{AudioStream, RESYNC_TOLERANCE};
pub use clock::{rescale, Rational, SeekHandle, StreamClock};
pub use frame_slot::{FrameSlot, SlotGuard};
pub use input::DEMUX_RETRY_DELAY;
pub use packet_queue::{PacketQueue, Pop, Push};
pub use samples::{SampleLayout, SampleView};
pub use video::{output_pixel_aspect, VideoStream};

/// State shared by every worker of one pipeline
pub(crate) struct PipelineContext<P> {
    abort: AtomicBool,
    pub queues: PacketQueues<P>,
}

impl<P: EncodedPacket> PipelineContext<P> {
    pub fn new(max_queue_bytes: usize) -> Self {
        Self {
            abort: AtomicBool::new(false),
            queues: PacketQueues::new(max_queue_bytes),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }
}

/// Packet-type-independent view of the context for the lifecycle controller
pub(crate) trait QueueControl: Send + Sync {
    /// Raise the global abort flag and abort both queues
    fn begin_abort(&self);

    fn flush(&self, kind: StreamKind);
}

impl<P: EncodedPacket> QueueControl for PipelineContext<P> {
    fn begin_abort(&self) {
        self.abort.store(true, Ordering::Release);
        self.queues.video().abort();
        self.queues.audio().abort();
    }

    fn flush(&self, kind: StreamKind) {
        self.queues.get(kind).flush();
    }
}

/// Threads and slots of one active stream
struct StreamWorkers {
    kind: StreamKind,
    input: Arc<dyn SlotControl>,
    output: Arc<dyn SlotControl>,
    decode: Option<JoinHandle<()>>,
    transform: Option<JoinHandle<()>>,
}

/// Lifecycle controller for the worker threads
pub(crate) struct Pipeline {
    control: Arc<dyn QueueControl>,
    input: Option<JoinHandle<()>>,
    streams: Vec<StreamWorkers>,
    closed: bool,
}

fn spawn_worker<F>(name: String, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(body)
        .map_err(|e| AvFeedError::Thread(format!("Failed to spawn {}: {}", name, e)))
}

fn join_worker(handle: JoinHandle<()>) {
    let name = handle.thread().name().unwrap_or("worker").to_string();
    if handle.join().is_err() {
        error!("{} thread panicked", name);
    }
}

impl Pipeline {
    pub fn new(control: Arc<dyn QueueControl>) -> Self {
        Self {
            control,
            input: None,
            streams: Vec::new(),
            closed: false,
        }
    }

    /// Spawn a stream's decode thread, then its transform thread
    ///
    /// The stream is registered before anything is spawned so a failure
    /// part-way is still torn down by `shutdown`.
    pub fn start_stream<D, T>(
        &mut self,
        kind: StreamKind,
        input: Arc<dyn SlotControl>,
        output: Arc<dyn SlotControl>,
        decode: D,
        transform: T,
    ) -> Result<()>
    where
        D: FnOnce() + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        self.streams.push(StreamWorkers {
            kind,
            input,
            output,
            decode: None,
            transform: None,
        });
        let index = self.streams.len() - 1;

        let handle = spawn_worker(format!("avfeed-{}-decode", kind.name()), decode)?;
        self.streams[index].decode = Some(handle);

        let handle = spawn_worker(format!("avfeed-{}-transform", kind.name()), transform)?;
        self.streams[index].transform = Some(handle);

        Ok(())
    }

    pub fn start_input<F>(&mut self, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.input = Some(spawn_worker("avfeed-input".to_string(), body)?);
        Ok(())
    }

    /// Stop and join every worker; later calls do nothing
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        debug!("Shutting down pipeline");
        self.control.begin_abort();

        if let Some(handle) = self.input.take() {
            join_worker(handle);
        }

        for stream in self.streams.iter_mut() {
            stream.input.abort();
            stream.output.abort();

            if let Some(handle) = stream.decode.take() {
                join_worker(handle);
            }

            if let Some(handle) = stream.transform.take() {
                join_worker(handle);
            }

            self.control.flush(stream.kind);
            debug!("{} stream stopped", stream.kind.name());
        }

        self.streams.clear();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Packet;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_shutdown_releases_blocked_workers() {
        let ctx = Arc::new(PipelineContext::<Packet>::new(1024));
        let mut pipeline = Pipeline::new(ctx.clone());

        let input: Arc<FrameSlot<Option<u32>>> = Arc::new(FrameSlot::new(None, None));
        let output: Arc<FrameSlot<u32>> = Arc::new(FrameSlot::new(0, 0));
        let exited = Arc::new(AtomicUsize::new(0));

        let decode = {
            let ctx = Arc::clone(&ctx);
            let exited = Arc::clone(&exited);
            move || {
                assert_eq!(ctx.queues.video().pop(), Pop::Aborted);
                exited.fetch_add(1, Ordering::SeqCst);
            }
        };
        let transform = {
            let input = Arc::clone(&input);
            let exited = Arc::clone(&exited);
            move || {
                assert!(input.consume().is_none());
                exited.fetch_add(1, Ordering::SeqCst);
            }
        };

        pipeline
            .start_stream(StreamKind::Video, input, output, decode, transform)
            .unwrap();

        let exited_input = Arc::clone(&exited);
        pipeline
            .start_input(move || {
                exited_input.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        pipeline.shutdown();
        assert_eq!(exited.load(Ordering::SeqCst), 3);
        assert!(ctx.is_aborted());

        // Second call is a no-op
        pipeline.shutdown();
    }
}
