//! Source-side setup for avfeed
//!
//! `stream_info` holds the stream selection and setup arithmetic shared by
//! every backend. With the `ffmpeg` feature enabled, `ffmpeg_decoder`
//! provides FFmpeg-backed collaborators and `open`, which turns a URL into
//! a running `MediaFeed`.

#[cfg(feature = "ffmpeg")]
mod ffmpeg_decoder;
pub mod stream_info;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg_decoder::{
    init, open, FfmpegAudioDecoder, FfmpegAudioFrame, FfmpegDemuxer, FfmpegFilter, FfmpegPacket,
    FfmpegResampler, FfmpegScaler, FfmpegSubtitleDecoder, FfmpegVideoDecoder, FfmpegVideoFrame,
};
pub use stream_info::{
    audio_filter_description, output_block_size, select_streams, start_timestamp,
    video_filter_description, video_time_base, MediaType, StreamDescriptor, StreamSelection,
};
