//! Input stage: demux and fan out
//!
//! Reads packets from the demux collaborator and routes them by stream
//! index into the video and audio queues. Subtitle packets are decoded on
//! this thread straight into the shared subtitle track. When the source
//! ends both queues get their end-of-stream marker.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::media::{DemuxSource, DemuxStatus, EncodedPacket, SubtitleDecoder};
use crate::pipeline::packet_queue::Push;
use crate::pipeline::PipelineContext;
use crate::subtitle::SubtitleTrack;

/// Sleep between demux reads that reported `Retry`
pub const DEMUX_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Subtitle stream feeding a shared track
pub(crate) struct SubtitleInput<P> {
    pub stream_index: usize,
    pub decoder: Box<dyn SubtitleDecoder<P>>,
    pub track: Arc<Mutex<SubtitleTrack>>,
}

pub(crate) struct InputStage<P> {
    source: Box<dyn DemuxSource<P>>,
    video: Option<usize>,
    audio: Option<usize>,
    subtitles: Option<SubtitleInput<P>>,
}

impl<P: EncodedPacket> InputStage<P> {
    pub fn new(
        source: Box<dyn DemuxSource<P>>,
        video: Option<usize>,
        audio: Option<usize>,
        subtitles: Option<SubtitleInput<P>>,
    ) -> Self {
        Self {
            source,
            video,
            audio,
            subtitles,
        }
    }

    pub fn run(mut self, ctx: &PipelineContext<P>) {
        debug!("input thread started");
        let mut packets = 0u64;

        while !ctx.is_aborted() {
            let packet = match self.source.read() {
                Ok(DemuxStatus::Packet(packet)) => packet,
                Ok(DemuxStatus::Retry) => {
                    thread::sleep(DEMUX_RETRY_DELAY);
                    continue;
                }
                Ok(DemuxStatus::End) => {
                    info!("End of input after {} packets", packets);
                    break;
                }
                Err(e) => {
                    warn!("Demux error, ending input: {}", e);
                    break;
                }
            };

            packets += 1;
            if !self.route(ctx, packet) {
                break;
            }
        }

        ctx.queues.video().push(None);
        ctx.queues.audio().push(None);

        debug!("input thread exiting after {} packets", packets);
    }

    /// Returns false once the target queue has been aborted
    ///
    /// A `Closed` queue belongs to a stream whose decoder has stopped; its
    /// packets are dropped and the other streams keep being fed.
    fn route(&mut self, ctx: &PipelineContext<P>, packet: P) -> bool {
        let index = Some(packet.stream_index());

        let queue = if index == self.video {
            ctx.queues.video()
        } else if index == self.audio {
            ctx.queues.audio()
        } else {
            self.decode_subtitle(&packet);
            return true;
        };

        queue.push(Some(packet)) != Push::Aborted
    }

    fn decode_subtitle(&mut self, packet: &P) {
        let Some(subtitles) = self.subtitles.as_mut() else {
            return;
        };

        if packet.stream_index() != subtitles.stream_index {
            return;
        }

        match subtitles.decoder.decode(packet) {
            Ok(Some(cue)) => subtitles.track.lock().insert(cue),
            Ok(None) => {}
            Err(e) => warn!("Subtitle decode failed: {}", e),
        }
    }
}
