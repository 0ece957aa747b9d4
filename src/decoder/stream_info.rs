//! Stream selection and per-source setup values
//!
//! Everything here is pure: it takes plain descriptions of the source's
//! streams plus the configuration and works out which streams to use, the
//! output time bases, start offsets, audio block size and filter graph
//! descriptions. The FFmpeg glue feeds it and applies the results.

use crate::pipeline::clock::{rescale, Rational};
use crate::utils::config::{FilterConfig, OutputConfig, OverlayConfig};
use crate::utils::error::{AvFeedError, Result};

/// Broad stream category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
    Other,
}

/// What the selector needs to know about one source stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Container stream index
    pub index: usize,

    pub medium: MediaType,

    /// Audio channel count; 0 for non-audio streams
    pub channels: u16,
}

impl StreamDescriptor {
    pub fn new(index: usize, medium: MediaType, channels: u16) -> Self {
        Self {
            index,
            medium,
            channels,
        }
    }
}

/// Streams chosen for playback
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSelection {
    pub video: Option<usize>,
    pub audio: Option<usize>,
    pub subtitle: Option<usize>,
}

/// Pick the first video stream, the first audio stream with channels and,
/// when subtitles are wanted, one subtitle stream
///
/// Subtitle precedence: the on-screen subtitle index, then the teletext
/// index, then the first subtitle stream. An index that does not name a
/// subtitle stream is ignored.
pub fn select_streams(
    streams: &[StreamDescriptor],
    audio_enabled: bool,
    overlay: &OverlayConfig,
) -> Result<StreamSelection> {
    let first = |medium: MediaType| streams.iter().find(|s| s.medium == medium).map(|s| s.index);

    let video = first(MediaType::Video);
    let audio = if audio_enabled {
        streams
            .iter()
            .find(|s| s.medium == MediaType::Audio && s.channels > 0)
            .map(|s| s.index)
    } else {
        None
    };

    if video.is_none() && audio.is_none() {
        return Err(AvFeedError::NoStreams);
    }

    let is_subtitle = |index: usize| {
        streams
            .iter()
            .any(|s| s.index == index && s.medium == MediaType::Subtitle)
    };

    let subtitle = if overlay.subtitles.is_some() || overlay.teletext_subtitles.is_some() {
        overlay
            .subtitles
            .filter(|&i| is_subtitle(i))
            .or_else(|| overlay.teletext_subtitles.filter(|&i| is_subtitle(i)))
            .or_else(|| first(MediaType::Subtitle))
    } else {
        None
    };

    Ok(StreamSelection {
        video,
        audio,
        subtitle,
    })
}

/// Output video tick: one frame, or one field when interlaced
pub fn video_time_base(output: &OutputConfig) -> Rational {
    let fields = if output.interlace { 2 } else { 1 };
    Rational::new(output.frame_rate_den as i64, output.frame_rate_num as i64 * fields)
}

/// Audio clock tick: one source sample
pub fn audio_time_base(source_sample_rate: u32) -> Rational {
    Rational::new(1, source_sample_rate.max(1) as i64)
}

/// Reference timestamp to start from, in the reference stream's time base
///
/// `position_minutes` of zero starts at the stream start time.
pub fn start_timestamp(reference: Rational, start_time: Option<i64>, position_minutes: f64) -> i64 {
    let start_time = start_time.unwrap_or(0);
    if position_minutes <= 0.0 || !reference.is_valid() {
        return start_time;
    }

    (60.0 * position_minutes / reference.as_f64()) as i64 + start_time
}

/// Output block capacity in sample frames
///
/// The decoder's frame size rescaled to the output rate, rounded up. Codecs
/// without a fixed frame size get one second of samples.
pub fn output_block_size(decoder_frame_size: usize, source_rate: u32, output_rate: u32) -> usize {
    if decoder_frame_size == 0 || source_rate == 0 {
        return output_rate as usize;
    }

    let scaled = (decoder_frame_size as u64 * output_rate as u64).div_ceil(source_rate as u64);
    if scaled == 0 {
        output_rate as usize
    } else {
        scaled as usize
    }
}

/// Sources at least this wide count as widescreen
pub const WIDESCREEN_THRESHOLD: f64 = 14.0 / 9.0;

/// Filter chain fitting the source picture to the output raster
pub fn video_filter_description(source_width: u32, source_height: u32, active_lines: u32, filter: &FilterConfig) -> String {
    if source_height == 0 {
        return "[in]null[out]".to_string();
    }

    let source_ratio = source_width as f64 / source_height as f64;
    if source_ratio < WIDESCREEN_THRESHOLD {
        return "[in]null[out]".to_string();
    }

    let width_4_3 = (active_lines as f64 * 4.0 / 3.0) as u32;
    let width_16_9 = (active_lines as f64 * 16.0 / 9.0) as u32;
    let scale = format!("scale = {}:{}", source_width, source_height);

    let chain = if filter.letterbox {
        format!("pad = 'iw:iw / ({} / {}) : 0 : (oh - ih) / 2', {}", width_4_3, active_lines, scale)
    } else if filter.pillarbox {
        format!("crop = out_w = in_h * (4.0 / 3.0) : out_h = in_h, {}", scale)
    } else if width_16_9 as f64 / active_lines as f64 <= source_ratio {
        format!("pad = 'iw:iw / ({}/{}) : 0 : (oh-ih) / 2', {}", width_16_9, active_lines, scale)
    } else {
        format!("pad = 'ih * ({} / {}) : ih : (ow-iw) / 2 : 0', {}", width_16_9, active_lines, scale)
    };

    format!("[in]{}[out]", chain)
}

/// Downmix and gain chain for the audio filter graph
///
/// `sample_format` is the decoder's sample format name ("fltp", "s16", ...);
/// it decides the precision the volume filter runs at.
pub fn audio_filter_description(filter: &FilterConfig, sample_format: &str) -> String {
    let downmix = if filter.downmix {
        "pan=stereo|FL < FC + 0.30*FL + 0.30*BL|FR < FC + 0.30*FR + 0.30*BR"
    } else {
        "anull"
    };

    let precision = match sample_format.chars().next() {
        Some('f') => "float",
        Some('d') => "double",
        _ => "fixed",
    };

    format!(
        "[in]{}[downmix],[downmix]volume={:.6}:precision={}[out]",
        downmix, filter.volume, precision
    )
}

/// Clock start offset in output ticks for a reference timestamp
pub fn start_offset(reference_ts: i64, reference: Rational, output: Rational) -> i64 {
    rescale(reference_ts, reference, output)
}

/// Map "-" to FFmpeg's stdin protocol
pub fn resolve_input_url(url: &str) -> &str {
    if url == "-" {
        "pipe:"
    } else {
        url
    }
}

/// Split demuxer options given as "key=value:key=value"
///
/// Entries without a '=' or with an empty key are skipped.
pub fn parse_demuxer_options(options: &str) -> Vec<(String, String)> {
    options
        .split(':')
        .filter_map(|entry| entry.split_once('='))
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}
