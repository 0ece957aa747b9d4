//! Sink-facing side of avfeed
//!
//! The real-time consumer pulls frames and audio blocks through
//! `MediaFeed`; pause and seek arrive either through direct calls or a
//! `TransportEvents` source polled on every read.

mod feed;
mod state;

pub use feed::{AudioBlockRef, FeedBuilder, MediaFeed, VideoFrameRef, DEFAULT_DISPLAY_RATIO};
pub use state::{PlaybackState, TransportCommand, TransportEvents, PLAY_ICON_DURATION};
