//! avfeed - real-time audio/video feed for fixed-cadence signal generators
//!
//! A source is demuxed on one thread, each stream is decoded and re-timed
//! on two more, and the consumer pulls exactly one output frame or audio
//! block per call through [`MediaFeed`]:
//!
//! ```text
//! input -> packet queues -> decode -> frame slot -> transform -> frame slot -> MediaFeed
//! ```
//!
//! The pipeline core is backend-agnostic; demuxing, decoding, filtering,
//! scaling, resampling and overlay rendering are collaborators behind the
//! traits in [`media`]. FFmpeg-backed collaborators live in [`decoder`]
//! behind the `ffmpeg` feature.

pub mod decoder;
pub mod media;
pub mod pipeline;
pub mod player;
pub mod subtitle;
pub mod utils;

pub use media::{
    AudioBlock, DemuxSource, DemuxStatus, EncodedPacket, MediaIcon, NoOverlay, Overlay, Packet,
    StreamKind, VideoBuffer,
};
pub use pipeline::{AudioStream, Rational, StreamClock, VideoStream};
pub use player::{FeedBuilder, MediaFeed, TransportCommand, TransportEvents};
pub use utils::{AvFeedError, Config, Result};
