//! Decode stage shared by the video and audio streams
//!
//! Pops packets from the stream's queue, drives the decoder and filter
//! collaborators and publishes every filtered frame into the stream's input
//! slot. Any decoder failure ends this stream only: the queue is closed on
//! the way out so the input thread stops feeding it and the other stream
//! carries on.

use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::media::{Decoder, EncodedPacket, Feed, FrameFilter, Received, StreamKind};
use crate::pipeline::frame_slot::FrameSlot;
use crate::pipeline::packet_queue::Pop;
use crate::pipeline::PipelineContext;

/// Pause after a `WouldBlock` pop when the decoder had nothing buffered
pub const WOULD_BLOCK_BACKOFF: Duration = Duration::from_millis(1);

/// Decoder and filter for one stream
pub(crate) struct DecodeStage<P, F> {
    kind: StreamKind,
    decoder: Box<dyn Decoder<P, Frame = F>>,
    filter: Box<dyn FrameFilter<F>>,
}

impl<P: EncodedPacket, F: Send + 'static> DecodeStage<P, F> {
    pub fn new(
        kind: StreamKind,
        decoder: Box<dyn Decoder<P, Frame = F>>,
        filter: Box<dyn FrameFilter<F>>,
    ) -> Self {
        Self {
            kind,
            decoder,
            filter,
        }
    }

    /// Thread body; finishes `output` on the way out so the transform ends too
    pub fn run(mut self, ctx: &PipelineContext<P>, output: &FrameSlot<Option<F>>) {
        debug!("{} decoder thread started", self.kind.name());

        let frames = self.decode_loop(ctx, output);
        output.finish();

        if !ctx.is_aborted() {
            ctx.queues.get(self.kind).close();
        }

        debug!("{} decoder thread exiting after {} frames", self.kind.name(), frames);
    }

    fn decode_loop(&mut self, ctx: &PipelineContext<P>, output: &FrameSlot<Option<F>>) -> u64 {
        let name = self.kind.name();
        let queue = ctx.queues.get(self.kind);
        let mut pending: Option<P> = None;
        let mut draining = false;
        let mut frames = 0u64;

        while !ctx.is_aborted() {
            let mut idle = false;

            if pending.is_none() && !draining {
                match queue.pop() {
                    Pop::Packet(packet) => pending = Some(packet),
                    Pop::EndOfStream => {
                        debug!("{} queue finished, flushing decoder", name);
                        if let Err(e) = self.decoder.send(None) {
                            warn!("Failed to flush {} decoder: {}", name, e);
                            break;
                        }
                        draining = true;
                    }
                    Pop::Aborted | Pop::Finished => break,
                    Pop::WouldBlock => idle = true,
                }
            }

            if let Some(packet) = pending.as_ref() {
                match self.decoder.send(Some(packet)) {
                    Ok(Feed::Accepted) => pending = None,
                    Ok(Feed::Again) => trace!("{} decoder full, holding packet", name),
                    Err(e) => {
                        warn!("{} decoder error: {}", name, e);
                        break;
                    }
                }
            }

            let frame = match self.decoder.receive() {
                Ok(Received::Frame(frame)) => frame,
                Ok(Received::Again) if draining => break,
                Ok(Received::Again) => {
                    if idle {
                        thread::sleep(WOULD_BLOCK_BACKOFF);
                    }
                    continue;
                }
                Ok(Received::End) => {
                    debug!("{} decoder drained", name);
                    break;
                }
                Err(e) => {
                    warn!("{} decoder error: {}", name, e);
                    break;
                }
            };

            let frame = match self.filter.apply(frame) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("{} filter failed, dropping frame: {}", name, e);
                    continue;
                }
            };

            match output.acquire_back() {
                Some(mut back) => *back = Some(frame),
                None => break,
            }

            if !output.publish(false) {
                break;
            }

            frames += 1;
        }

        frames
    }
}
