//! Audio transform stage
//!
//! Keeps the audio stream on the output sample clock. Samples that start
//! too early are trimmed, gaps are filled with silence, and everything else
//! passes straight into the resampler, whose output is chopped into fixed
//! size blocks for the sink.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::media::{
    AudioBlock, AudioSourceFrame, Decoder, EncodedPacket, FrameFilter, PassThrough, Resampler,
    StreamKind,
};
use crate::pipeline::clock::{SeekHandle, StreamClock};
use crate::pipeline::decode::DecodeStage;
use crate::pipeline::frame_slot::FrameSlot;
use crate::pipeline::{Pipeline, PipelineContext};
use crate::utils::error::Result;

/// Drift tolerated before the audio stream is trimmed or padded
pub const RESYNC_TOLERANCE: Duration = Duration::from_millis(20);

/// Everything needed to run one audio stream
pub struct AudioStream<P, F> {
    stream_index: usize,
    clock: StreamClock,
    block_size: usize,
    channels: u16,
    decoder: Box<dyn Decoder<P, Frame = F>>,
    filter: Box<dyn FrameFilter<F>>,
    resampler: Box<dyn Resampler>,
}

impl<P: EncodedPacket, F: AudioSourceFrame> AudioStream<P, F> {
    /// `block_size` is the output block capacity in sample frames
    pub fn new(
        stream_index: usize,
        clock: StreamClock,
        block_size: usize,
        channels: u16,
        decoder: Box<dyn Decoder<P, Frame = F>>,
        resampler: Box<dyn Resampler>,
    ) -> Self {
        Self {
            stream_index,
            clock,
            block_size,
            channels,
            decoder,
            filter: Box::new(PassThrough),
            resampler,
        }
    }

    pub fn with_filter(mut self, filter: Box<dyn FrameFilter<F>>) -> Self {
        self.filter = filter;
        self
    }
}

/// How a frame's samples line up with the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Correction {
    /// Entirely behind the clock
    Discard,

    /// Drop this many leading samples
    Trim(usize),

    /// Insert this many samples of silence first
    Pad(usize),

    InSync,
}

/// Classify a frame starting `start` ticks from the clock cursor
pub(crate) fn correction(start: i64, count: usize, tolerance: i64) -> Correction {
    if start + count as i64 <= 0 {
        Correction::Discard
    } else if start < -tolerance {
        Correction::Trim(start.unsigned_abs() as usize)
    } else if start > tolerance {
        Correction::Pad(start as usize)
    } else {
        Correction::InSync
    }
}

pub(crate) struct AudioTransform {
    clock: StreamClock,
    resampler: Box<dyn Resampler>,

    /// `RESYNC_TOLERANCE` in clock ticks
    tolerance: i64,

    frames: u64,
    blocks: u64,
    trimmed: u64,
    padded: u64,
}

impl AudioTransform {
    pub fn new(clock: StreamClock, resampler: Box<dyn Resampler>) -> Self {
        let tolerance = clock.duration_to_ticks(RESYNC_TOLERANCE);
        Self {
            clock,
            resampler,
            tolerance,
            frames: 0,
            blocks: 0,
            trimmed: 0,
            padded: 0,
        }
    }

    pub fn clock(&self) -> &StreamClock {
        &self.clock
    }

    pub fn run<F: AudioSourceFrame>(mut self, input: &FrameSlot<Option<F>>, output: &FrameSlot<AudioBlock>) {
        debug!("audio transform thread started");

        while let Some(mut slot) = input.consume() {
            let Some(frame) = slot.take() else {
                continue;
            };
            drop(slot);

            match self.process(&frame, output) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!("Resampling failed, ending audio stream: {}", e);
                    break;
                }
            }
        }

        output.finish();
        debug!(
            "audio transform thread exiting: {} frames in, {} blocks out, {} samples trimmed, {} padded",
            self.frames, self.blocks, self.trimmed, self.padded
        );
    }

    /// Re-time one frame and publish whatever the resampler produces
    ///
    /// Returns `Ok(false)` once the output slot has been aborted.
    pub fn process<F: AudioSourceFrame>(&mut self, frame: &F, output: &FrameSlot<AudioBlock>) -> Result<bool> {
        let mut samples = frame.samples();

        if let Some(ts) = frame.timestamp() {
            let start = self.clock.delta(ts);

            match correction(start, samples.len(), self.tolerance) {
                Correction::Discard => {
                    trace!("dropping audio frame {} samples behind", -start);
                    return Ok(true);
                }
                Correction::Trim(count) => {
                    samples = samples.skip(count);
                    self.trimmed += count as u64;
                }
                Correction::Pad(count) => {
                    self.resampler.inject_silence(count)?;
                    self.clock.advance(count as i64);
                    self.padded += count as u64;
                }
                Correction::InSync => {}
            }
        }

        self.clock.advance(samples.len() as i64);
        self.frames += 1;

        let mut input = Some(samples);
        loop {
            let written = {
                let Some(mut block) = output.acquire_back() else {
                    return Ok(false);
                };

                let written = self.resampler.convert(input.take().as_ref(), &mut block)?;
                block.set_len(written);
                written
            };

            if written == 0 {
                break;
            }

            if !output.publish(false) {
                return Ok(false);
            }

            self.blocks += 1;
        }

        Ok(true)
    }
}

/// Starts a type-erased audio stream's threads
pub(crate) trait LaunchAudio<P>: Send {
    fn stream_index(&self) -> usize;
    fn seek_handle(&self) -> SeekHandle;

    fn launch(self: Box<Self>, ctx: &Arc<PipelineContext<P>>, pipeline: &mut Pipeline)
        -> Result<Arc<FrameSlot<AudioBlock>>>;
}

impl<P: EncodedPacket, F: AudioSourceFrame> LaunchAudio<P> for AudioStream<P, F> {
    fn stream_index(&self) -> usize {
        self.stream_index
    }

    fn seek_handle(&self) -> SeekHandle {
        self.clock.seek_handle()
    }

    fn launch(
        self: Box<Self>,
        ctx: &Arc<PipelineContext<P>>,
        pipeline: &mut Pipeline,
    ) -> Result<Arc<FrameSlot<AudioBlock>>> {
        let stream = *self;

        let output = Arc::new(FrameSlot::new(
            AudioBlock::allocate(stream.block_size, stream.channels)?,
            AudioBlock::allocate(stream.block_size, stream.channels)?,
        ));
        let input: Arc<FrameSlot<Option<F>>> = Arc::new(FrameSlot::new(None, None));

        let decode = DecodeStage::new(StreamKind::Audio, stream.decoder, stream.filter);
        let transform = AudioTransform::new(stream.clock, stream.resampler);

        let decode_ctx = Arc::clone(ctx);
        let decode_output = Arc::clone(&input);
        let transform_input = Arc::clone(&input);
        let transform_output = Arc::clone(&output);

        pipeline.start_stream(
            StreamKind::Audio,
            input,
            output.clone(),
            move || decode.run(&decode_ctx, &decode_output),
            move || transform.run(&transform_input, &transform_output),
        )?;

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::TimedFrame;
    use crate::pipeline::clock::Rational;
    use crate::pipeline::samples::SampleView;
    use parking_lot::Mutex;
    use std::thread;

    struct TestFrame {
        ts: Option<i64>,
        samples: Vec<i16>,
    }

    impl TimedFrame for TestFrame {
        fn timestamp(&self) -> Option<i64> {
            self.ts
        }
    }

    impl AudioSourceFrame for TestFrame {
        fn samples(&self) -> SampleView<'_> {
            SampleView::from_i16(&self.samples, 1)
        }
    }

    #[derive(Default)]
    struct Log {
        silence: usize,
        received: Vec<i16>,
    }

    /// Mono passthrough resampler that records what it was given
    struct RecordingResampler {
        log: Arc<Mutex<Log>>,
        pending: Vec<i16>,
    }

    impl Resampler for RecordingResampler {
        fn convert(&mut self, input: Option<&SampleView<'_>>, output: &mut AudioBlock) -> Result<usize> {
            if let Some(view) = input {
                let bytes = &view.planes()[0][..view.len() * 2];
                let samples: Vec<i16> = bytes.chunks_exact(2).map(|b| i16::from_ne_bytes([b[0], b[1]])).collect();
                self.log.lock().received.extend_from_slice(&samples);
                self.pending.extend(samples);
            }

            let count = self.pending.len().min(output.capacity());
            output.buffer_mut()[..count].copy_from_slice(&self.pending[..count]);
            self.pending.drain(..count);
            Ok(count)
        }

        fn inject_silence(&mut self, samples: usize) -> Result<()> {
            self.log.lock().silence += samples;
            self.pending.extend(std::iter::repeat(0).take(samples));
            Ok(())
        }
    }

    fn transform() -> (AudioTransform, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let resampler = RecordingResampler {
            log: Arc::clone(&log),
            pending: Vec::new(),
        };
        // 1 kHz mono: 20 ticks of tolerance
        let clock = StreamClock::new(Rational::new(1, 1000), Rational::new(1, 1000), 0);
        (AudioTransform::new(clock, Box::new(resampler)), log)
    }

    fn output_slot(capacity: usize) -> FrameSlot<AudioBlock> {
        FrameSlot::new(
            AudioBlock::allocate(capacity, 1).unwrap(),
            AudioBlock::allocate(capacity, 1).unwrap(),
        )
    }

    /// Process one frame on a worker thread while collecting `blocks` blocks
    fn process_and_collect(
        mut transform: AudioTransform,
        frame: TestFrame,
        blocks: usize,
    ) -> (AudioTransform, Vec<Vec<i16>>) {
        let output = Arc::new(output_slot(1000));
        let producer = {
            let output = Arc::clone(&output);
            thread::spawn(move || {
                transform.process(&frame, &output).unwrap();
                transform
            })
        };

        let collected = (0..blocks)
            .map(|_| output.consume().unwrap().samples().to_vec())
            .collect();
        let transform = producer.join().unwrap();
        assert!(!output.is_ready());

        (transform, collected)
    }

    #[test]
    fn test_correction_classification() {
        assert_eq!(correction(-10, 10, 20), Correction::Discard);
        assert_eq!(correction(-30, 100, 20), Correction::Trim(30));
        assert_eq!(correction(-20, 100, 20), Correction::InSync);
        assert_eq!(correction(20, 100, 20), Correction::InSync);
        assert_eq!(correction(21, 100, 20), Correction::Pad(21));
    }

    #[test]
    fn test_early_samples_are_trimmed() {
        let (mut transform, log) = transform();
        transform.clock.advance(100);

        // Starts 30 samples before the cursor
        let frame = TestFrame {
            ts: Some(70),
            samples: (0..50).collect(),
        };
        let (transform, blocks) = process_and_collect(transform, frame, 1);

        assert_eq!(log.lock().received, (30..50).collect::<Vec<i16>>());
        assert_eq!(transform.clock().cursor(), 120);
        assert_eq!(blocks, vec![(30..50).collect::<Vec<i16>>()]);
    }

    #[test]
    fn test_gap_is_padded_with_silence() {
        let (transform, log) = transform();

        let frame = TestFrame {
            ts: Some(25),
            samples: vec![7; 10],
        };
        let (transform, blocks) = process_and_collect(transform, frame, 1);

        assert_eq!(log.lock().silence, 25);
        assert_eq!(transform.clock().cursor(), 35);

        assert_eq!(blocks[0].len(), 35);
        assert!(blocks[0][..25].iter().all(|&s| s == 0));
        assert!(blocks[0][25..].iter().all(|&s| s == 7));
    }

    #[test]
    fn test_small_drift_passes_through() {
        let (transform, log) = transform();

        let frame = TestFrame {
            ts: Some(15),
            samples: vec![1; 10],
        };
        let (transform, blocks) = process_and_collect(transform, frame, 1);

        assert_eq!(log.lock().silence, 0);
        assert_eq!(log.lock().received.len(), 10);
        assert_eq!(transform.clock().cursor(), 10);
        assert_eq!(blocks[0], vec![1; 10]);
    }

    #[test]
    fn test_stale_frame_is_discarded() {
        let (mut transform, log) = transform();
        transform.clock.advance(100);

        let frame = TestFrame {
            ts: Some(10),
            samples: vec![1; 50],
        };
        let (transform, blocks) = process_and_collect(transform, frame, 0);

        assert!(blocks.is_empty());
        assert!(log.lock().received.is_empty());
        assert_eq!(transform.clock().cursor(), 100);
    }

    #[test]
    fn test_output_is_split_into_blocks() {
        let (mut transform, _log) = transform();
        let output = Arc::new(output_slot(4));

        let consumer = {
            let output = Arc::clone(&output);
            thread::spawn(move || {
                let mut lens = Vec::new();
                while lens.iter().sum::<usize>() < 10 {
                    lens.push(output.consume().unwrap().len());
                }
                lens
            })
        };

        let frame = TestFrame {
            ts: None,
            samples: (0..10).collect(),
        };
        assert!(transform.process(&frame, &output).unwrap());
        assert_eq!(consumer.join().unwrap(), vec![4, 4, 2]);
    }
}
