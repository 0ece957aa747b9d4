//! Media collaborator interfaces for avfeed
//!
//! The pipeline core never demuxes, decodes, scales, resamples or renders
//! anything itself. This module defines the seams where those collaborators
//! plug in, plus the fixed-size output buffers the core hands to the sink.

use crate::pipeline::clock::Rational;
use crate::pipeline::samples::SampleView;
use crate::subtitle::{SubtitleBitmap, SubtitleCue};
use crate::utils::error::{AvFeedError, Result};

/// The two timed streams the pipeline carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Video stream
    Video,

    /// Audio stream
    Audio,
}

impl StreamKind {
    /// Lower-case name used in thread names and log lines
    pub fn name(self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            StreamKind::Video => 0,
            StreamKind::Audio => 1,
        }
    }
}

/// An encoded packet as seen by the packet queues
pub trait EncodedPacket: Send + 'static {
    /// Index of the source stream this packet belongs to
    fn stream_index(&self) -> usize;

    /// Payload size in bytes
    fn size(&self) -> usize;

    /// Timestamp in the stream's native time base
    fn timestamp(&self) -> Option<i64>;
}

/// Plain in-memory packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Source stream index
    pub stream_index: usize,

    /// Native-timebase timestamp
    pub timestamp: Option<i64>,

    /// Encoded payload
    pub data: Vec<u8>,
}

impl Packet {
    /// Create a new packet
    pub fn new(stream_index: usize, timestamp: Option<i64>, data: Vec<u8>) -> Self {
        Self {
            stream_index,
            timestamp,
            data,
        }
    }
}

impl EncodedPacket for Packet {
    fn stream_index(&self) -> usize {
        self.stream_index
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }
}

/// Result of one demux read
#[derive(Debug)]
pub enum DemuxStatus<P> {
    /// A packet was read
    Packet(P),

    /// Nothing available right now, try again shortly
    Retry,

    /// The source is exhausted
    End,
}

/// Lazy, finite sequence of packets from a container or device
pub trait DemuxSource<P>: Send {
    /// Read the next packet
    ///
    /// Errors are terminal for the input stage.
    fn read(&mut self) -> Result<DemuxStatus<P>>;
}

/// Outcome of handing a packet to a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// The decoder took the packet
    Accepted,

    /// The decoder is full; drain output and offer the same packet again
    Again,
}

/// Outcome of polling a decoder for output
#[derive(Debug)]
pub enum Received<F> {
    /// A decoded frame
    Frame(F),

    /// No frame yet, more input needed
    Again,

    /// The decoder has been fully drained
    End,
}

/// Per-stream decoder
pub trait Decoder<P>: Send {
    /// Decoded frame type
    type Frame: Send + 'static;

    /// Offer a packet, or `None` to start draining
    fn send(&mut self, packet: Option<&P>) -> Result<Feed>;

    /// Poll for the next decoded frame
    fn receive(&mut self) -> Result<Received<Self::Frame>>;
}

/// Filter graph applied to every decoded frame (padding, downmix, gain, ...)
pub trait FrameFilter<F>: Send {
    /// Transform one frame into one frame of the same kind
    fn apply(&mut self, frame: F) -> Result<F>;
}

/// Filter that hands frames through untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl<F: Send> FrameFilter<F> for PassThrough {
    fn apply(&mut self, frame: F) -> Result<F> {
        Ok(frame)
    }
}

/// Frames that carry a best-effort source timestamp
pub trait TimedFrame {
    /// Timestamp in the stream's native time base, if known
    fn timestamp(&self) -> Option<i64>;
}

/// Decoded video frame metadata the video transform needs
pub trait VideoSourceFrame: TimedFrame + Send + 'static {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Source sample (pixel) aspect ratio; 0/x or x/0 means unknown
    fn sample_aspect(&self) -> Rational;
}

/// Decoded audio frame access for the audio transform
pub trait AudioSourceFrame: TimedFrame + Send + 'static {
    /// Layout-aware view of every sample in the frame
    fn samples(&self) -> SampleView<'_>;
}

/// Resizes and converts a source frame into the fixed output geometry
pub trait Scaler<F>: Send {
    fn scale(&mut self, source: &F, target: &mut VideoBuffer) -> Result<()>;
}

/// Stateful resampler producing interleaved s16 output
pub trait Resampler: Send {
    /// Convert `input` (or drain buffered samples when `None`) into `output`
    ///
    /// Returns the number of sample frames written; 0 means nothing more
    /// is buffered.
    fn convert(&mut self, input: Option<&SampleView<'_>>, output: &mut AudioBlock) -> Result<usize>;

    /// Queue `samples` input-rate samples of silence
    fn inject_silence(&mut self, samples: usize) -> Result<()>;
}

/// Decodes subtitle packets on the input thread
pub trait SubtitleDecoder<P>: Send {
    fn decode(&mut self, packet: &P) -> Result<Option<SubtitleCue>>;
}

/// Transient icons drawn by the pull API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaIcon {
    Play,
    Pause,
}

/// Side-effecting compositor for logos, text, subtitles and icons
///
/// Every method defaults to doing nothing so implementations only provide
/// what they can render.
pub trait Overlay: Send + Sync {
    fn logo(&self, _frame: &mut VideoBuffer) -> Result<()> {
        Ok(())
    }

    fn timestamp(&self, _frame: &mut VideoBuffer, _text: &str) -> Result<()> {
        Ok(())
    }

    fn text_subtitle(&self, _frame: &mut VideoBuffer, _text: &str) -> Result<()> {
        Ok(())
    }

    fn bitmap_subtitle(&self, _frame: &mut VideoBuffer, _bitmap: &SubtitleBitmap) -> Result<()> {
        Ok(())
    }

    /// Text subtitle changed; forward it to a teletext service
    fn teletext(&self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn icon(&self, _frame: &mut VideoBuffer, _icon: MediaIcon) -> Result<()> {
        Ok(())
    }
}

/// Overlay that draws nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOverlay;

impl Overlay for NoOverlay {}

/// Fixed-geometry 32-bit output frame
#[derive(Debug, Clone, PartialEq)]
pub struct VideoBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
    pixel_aspect: Rational,
    source_timestamp: Option<i64>,
}

impl VideoBuffer {
    /// Allocate a black frame, reporting allocation failure instead of aborting
    pub fn allocate(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(AvFeedError::InvalidInput(format!(
                "Video buffer dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }

        let len = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| AvFeedError::Allocation(format!("{}x{} frame is too large", width, height)))?;

        let mut pixels = Vec::new();
        pixels.try_reserve_exact(len)?;
        pixels.resize(len, 0);

        Ok(Self {
            width,
            height,
            pixels,
            pixel_aspect: Rational::new(1, 1),
            source_timestamp: None,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major pixels, `width * height` long
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    /// Output pixel aspect ratio of the frame currently held
    pub fn pixel_aspect(&self) -> Rational {
        self.pixel_aspect
    }

    pub fn set_pixel_aspect(&mut self, aspect: Rational) {
        self.pixel_aspect = aspect;
    }

    /// Source timestamp of the frame currently held
    pub fn source_timestamp(&self) -> Option<i64> {
        self.source_timestamp
    }

    pub fn set_source_timestamp(&mut self, timestamp: Option<i64>) {
        self.source_timestamp = timestamp;
    }
}

/// Fixed-capacity interleaved s16 output block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlock {
    channels: u16,
    capacity: usize,
    samples: Vec<i16>,
    len: usize,
}

impl AudioBlock {
    /// Allocate room for `capacity` sample frames of `channels` channels
    pub fn allocate(capacity: usize, channels: u16) -> Result<Self> {
        if capacity == 0 || channels == 0 {
            return Err(AvFeedError::InvalidInput(
                "Audio block capacity and channel count must be non-zero".to_string(),
            ));
        }

        let len = capacity
            .checked_mul(channels as usize)
            .ok_or_else(|| AvFeedError::Allocation(format!("{} sample block is too large", capacity)))?;

        let mut samples = Vec::new();
        samples.try_reserve_exact(len)?;
        samples.resize(len, 0);

        Ok(Self {
            channels,
            capacity,
            samples,
            len: 0,
        })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Capacity in sample frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Valid sample frames
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the number of valid sample frames, clamped to the capacity
    pub fn set_len(&mut self, frames: usize) {
        self.len = frames.min(self.capacity);
    }

    /// Valid interleaved samples
    pub fn samples(&self) -> &[i16] {
        &self.samples[..self.len * self.channels as usize]
    }

    /// The whole interleaved buffer, for resamplers to write into
    pub fn buffer_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_buffer_allocation() {
        let frame = VideoBuffer::allocate(4, 3).unwrap();
        assert_eq!(frame.pixels().len(), 12);
        assert!(frame.pixels().iter().all(|&p| p == 0));
        assert_eq!(frame.pixel_aspect(), Rational::new(1, 1));

        assert!(matches!(VideoBuffer::allocate(0, 3), Err(AvFeedError::InvalidInput(_))));
    }

    #[test]
    fn test_audio_block_len_is_clamped() {
        let mut block = AudioBlock::allocate(4, 2).unwrap();
        assert!(block.is_empty());
        assert_eq!(block.buffer_mut().len(), 8);

        block.buffer_mut().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        block.set_len(2);
        assert_eq!(block.samples(), &[1, 2, 3, 4]);

        block.set_len(10);
        assert_eq!(block.len(), 4);
    }

    #[test]
    fn test_plain_packet_reports_payload_size() {
        let packet = Packet::new(1, Some(90), vec![0; 188]);
        assert_eq!(packet.stream_index(), 1);
        assert_eq!(packet.size(), 188);
        assert_eq!(EncodedPacket::timestamp(&packet), Some(90));
    }
}
