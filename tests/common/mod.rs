//! Scripted collaborators for driving a feed without a real media backend
//!
//! Packets carry their payload value in the first byte; decoders turn each
//! packet into one frame holding that value and the packet timestamp.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use avfeed::media::{
    AudioBlock, AudioSourceFrame, Decoder, DemuxSource, DemuxStatus, Feed, MediaIcon, Overlay,
    Packet, Received, Resampler, Scaler, SubtitleDecoder, TimedFrame, VideoBuffer, VideoSourceFrame,
};
use avfeed::pipeline::{AudioStream, Rational, SampleView, StreamClock, VideoStream};
use avfeed::subtitle::SubtitleCue;
use avfeed::{AvFeedError, Config, Result};

pub const VIDEO_INDEX: usize = 0;
pub const AUDIO_INDEX: usize = 1;
pub const SUBTITLE_INDEX: usize = 2;

/// Small output geometry so frames are cheap to copy around
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.output.width = 8;
    config.output.height = 6;
    config.output.channels = 1;
    config
}

/// Counts collaborators dropped by exiting worker threads
#[derive(Debug, Clone, Default)]
pub struct DropCounter(Arc<AtomicUsize>);

impl DropCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Demux source replaying a fixed packet list
///
/// Reports `Retry` once before the first packet.
pub struct ScriptedDemuxer {
    packets: VecDeque<Packet>,
    started: bool,
    drops: DropCounter,
}

impl ScriptedDemuxer {
    pub fn new(packets: Vec<Packet>, drops: DropCounter) -> Self {
        Self {
            packets: packets.into(),
            started: false,
            drops,
        }
    }
}

impl DemuxSource<Packet> for ScriptedDemuxer {
    fn read(&mut self) -> Result<DemuxStatus<Packet>> {
        if !self.started {
            self.started = true;
            return Ok(DemuxStatus::Retry);
        }

        Ok(match self.packets.pop_front() {
            Some(packet) => DemuxStatus::Packet(packet),
            None => DemuxStatus::End,
        })
    }
}

impl Drop for ScriptedDemuxer {
    fn drop(&mut self) {
        self.drops.bump();
    }
}

/// One packet per stream per tick, interleaved video then audio
pub fn interleave(video: &[i64], audio: &[i64]) -> Vec<Packet> {
    let mut packets = Vec::new();
    for i in 0..video.len().max(audio.len()) {
        if let Some(&ts) = video.get(i) {
            packets.push(Packet::new(VIDEO_INDEX, Some(ts), vec![ts as u8; 16]));
        }
        if let Some(&ts) = audio.get(i) {
            packets.push(Packet::new(AUDIO_INDEX, Some(ts), vec![(ts / 40) as u8 + 1; 16]));
        }
    }
    packets
}

pub struct TestVideoFrame {
    pub ts: Option<i64>,
    pub value: u32,
}

impl TimedFrame for TestVideoFrame {
    fn timestamp(&self) -> Option<i64> {
        self.ts
    }
}

impl VideoSourceFrame for TestVideoFrame {
    fn width(&self) -> u32 {
        8
    }

    fn height(&self) -> u32 {
        6
    }

    fn sample_aspect(&self) -> Rational {
        Rational::new(1, 1)
    }
}

pub struct TestAudioFrame {
    pub ts: Option<i64>,
    pub samples: Vec<i16>,
}

impl TimedFrame for TestAudioFrame {
    fn timestamp(&self) -> Option<i64> {
        self.ts
    }
}

impl AudioSourceFrame for TestAudioFrame {
    fn samples(&self) -> SampleView<'_> {
        SampleView::from_i16(&self.samples, 1)
    }
}

/// Decoder that yields one frame per packet
///
/// Holds at most two undelivered frames and reports `Again` beyond that.
pub struct ScriptedDecoder<F> {
    make: fn(&Packet) -> F,
    ready: VecDeque<F>,
    draining: bool,
    drops: DropCounter,
}

impl<F> ScriptedDecoder<F> {
    pub fn new(make: fn(&Packet) -> F, drops: DropCounter) -> Self {
        Self {
            make,
            ready: VecDeque::new(),
            draining: false,
            drops,
        }
    }
}

impl<F: Send + 'static> Decoder<Packet> for ScriptedDecoder<F> {
    type Frame = F;

    fn send(&mut self, packet: Option<&Packet>) -> Result<Feed> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(Feed::Accepted);
        };

        if self.ready.len() >= 2 {
            return Ok(Feed::Again);
        }

        self.ready.push_back((self.make)(packet));
        Ok(Feed::Accepted)
    }

    fn receive(&mut self) -> Result<Received<F>> {
        Ok(match self.ready.pop_front() {
            Some(frame) => Received::Frame(frame),
            None if self.draining => Received::End,
            None => Received::Again,
        })
    }
}

impl<F> Drop for ScriptedDecoder<F> {
    fn drop(&mut self) {
        self.drops.bump();
    }
}

/// Decoder that errors on its `fail_at`th packet, behaving like
/// `ScriptedDecoder` until then
pub struct FailingDecoder<F> {
    inner: ScriptedDecoder<F>,
    sent: usize,
    fail_at: usize,
}

impl<F> FailingDecoder<F> {
    pub fn new(make: fn(&Packet) -> F, fail_at: usize, drops: DropCounter) -> Self {
        Self {
            inner: ScriptedDecoder::new(make, drops),
            sent: 0,
            fail_at,
        }
    }
}

impl<F: Send + 'static> Decoder<Packet> for FailingDecoder<F> {
    type Frame = F;

    fn send(&mut self, packet: Option<&Packet>) -> Result<Feed> {
        if packet.is_some() {
            self.sent += 1;
            if self.sent >= self.fail_at {
                return Err(AvFeedError::Decoder("corrupt packet".to_string()));
            }
        }
        self.inner.send(packet)
    }

    fn receive(&mut self) -> Result<Received<F>> {
        self.inner.receive()
    }
}

pub fn video_frame(packet: &Packet) -> TestVideoFrame {
    TestVideoFrame {
        ts: packet.timestamp,
        value: packet.data[0] as u32,
    }
}

/// 40 samples (40 ms at 1 kHz) of the payload value
pub fn audio_frame(packet: &Packet) -> TestAudioFrame {
    TestAudioFrame {
        ts: packet.timestamp,
        samples: vec![packet.data[0] as i16; 40],
    }
}

/// Fills the output with the frame's value
pub struct FillScaler;

impl Scaler<TestVideoFrame> for FillScaler {
    fn scale(&mut self, source: &TestVideoFrame, target: &mut VideoBuffer) -> Result<()> {
        target.pixels_mut().fill(source.value);
        Ok(())
    }
}

/// Mono passthrough, emitting whatever fits in one block per call
#[derive(Default)]
pub struct PassthroughResampler {
    pending: VecDeque<i16>,
}

impl Resampler for PassthroughResampler {
    fn convert(&mut self, input: Option<&SampleView<'_>>, output: &mut AudioBlock) -> Result<usize> {
        if let Some(view) = input {
            let bytes = &view.planes()[0][..view.len() * 2];
            self.pending
                .extend(bytes.chunks_exact(2).map(|b| i16::from_ne_bytes([b[0], b[1]])));
        }

        let count = self.pending.len().min(output.capacity());
        for (slot, sample) in output.buffer_mut().iter_mut().zip(self.pending.drain(..count)) {
            *slot = sample;
        }
        Ok(count)
    }

    fn inject_silence(&mut self, samples: usize) -> Result<()> {
        self.pending.extend(std::iter::repeat(0).take(samples));
        Ok(())
    }
}

/// Subtitle decoder turning every packet into a cue
pub struct ScriptedSubtitles {
    pub text: &'static str,
    pub duration_ms: i64,
}

impl SubtitleDecoder<Packet> for ScriptedSubtitles {
    fn decode(&mut self, packet: &Packet) -> Result<Option<SubtitleCue>> {
        let start = packet.timestamp.unwrap_or(0);
        Ok(Some(SubtitleCue::text(start, start + self.duration_ms, self.text)))
    }
}

/// Overlay that records icons and teletext updates
#[derive(Default)]
pub struct RecordingOverlay {
    pub icons: Mutex<Vec<MediaIcon>>,
    pub teletext: Mutex<Vec<String>>,
}

impl Overlay for RecordingOverlay {
    fn teletext(&self, text: &str) -> Result<()> {
        self.teletext.lock().push(text.to_string());
        Ok(())
    }

    fn icon(&self, _frame: &mut VideoBuffer, icon: MediaIcon) -> Result<()> {
        self.icons.lock().push(icon);
        Ok(())
    }
}

/// Video at 25 fps with timestamps in frames
pub fn video_stream(drops: &DropCounter) -> VideoStream<Packet, TestVideoFrame> {
    let clock = StreamClock::new(Rational::new(1, 25), Rational::new(1, 25), 0);
    VideoStream::new(
        VIDEO_INDEX,
        clock,
        Box::new(ScriptedDecoder::new(video_frame, drops.clone())),
        Box::new(FillScaler),
    )
    .with_source_size(8, 6)
}

/// Video at 25 fps with timestamps in milliseconds
pub fn millisecond_video_stream(drops: &DropCounter) -> VideoStream<Packet, TestVideoFrame> {
    let clock = StreamClock::new(Rational::new(1, 1000), Rational::new(1, 25), 0);
    VideoStream::new(
        VIDEO_INDEX,
        clock,
        Box::new(ScriptedDecoder::new(video_frame, drops.clone())),
        Box::new(FillScaler),
    )
}

/// 1 kHz mono audio in 40 sample blocks, timestamps in milliseconds
pub fn audio_stream(drops: &DropCounter) -> AudioStream<Packet, TestAudioFrame> {
    let clock = StreamClock::new(Rational::new(1, 1000), Rational::new(1, 1000), 0);
    AudioStream::new(
        AUDIO_INDEX,
        clock,
        40,
        1,
        Box::new(ScriptedDecoder::new(audio_frame, drops.clone())),
        Box::new(PassthroughResampler::default()),
    )
}
