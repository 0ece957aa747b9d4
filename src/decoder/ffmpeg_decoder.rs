//! FFmpeg-backed media collaborators
//!
//! Implements the demux, decode, filter, scale, resample and subtitle seams
//! on top of ffmpeg-next, dropping to the raw libav* API where ffmpeg-next
//! has no wrapper (channel layouts, swresample, seeking, forced formats).
//! `open` wires all of it into a running `MediaFeed`.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg_sys_next as ffi;
use log::{debug, info, warn};
use once_cell::sync::OnceCell;

use crate::decoder::stream_info::{
    audio_filter_description, audio_time_base, output_block_size, parse_demuxer_options,
    resolve_input_url, select_streams, start_timestamp, video_filter_description, video_time_base,
    MediaType, StreamDescriptor,
};
use crate::media::{
    AudioBlock, AudioSourceFrame, DemuxSource, DemuxStatus, EncodedPacket, Feed, FrameFilter,
    Overlay, Received, Resampler, Scaler, SubtitleDecoder, TimedFrame, VideoBuffer,
    VideoSourceFrame,
};
use crate::pipeline::{rescale, AudioStream, Rational, SampleView, StreamClock, VideoStream};
use crate::player::{MediaFeed, TransportEvents};
use crate::subtitle::{ass_dialogue_text, compose_bitmap, PaletteRect, SubtitleCue};
use crate::utils::config::{Config, SourceConfig};
use crate::utils::error::{AvFeedError, IntoFeedError, Result};

static FFMPEG_INIT: OnceCell<()> = OnceCell::new();

const MILLISECONDS: Rational = Rational::new(1, 1000);

/// Native-endian 0xAARRGGBB
#[cfg(target_endian = "little")]
const OUTPUT_PIXEL: ffmpeg::format::Pixel = ffmpeg::format::Pixel::BGRA;
#[cfg(target_endian = "big")]
const OUTPUT_PIXEL: ffmpeg::format::Pixel = ffmpeg::format::Pixel::ARGB;

/// Register codecs and formats once per process
pub fn init() -> Result<()> {
    FFMPEG_INIT.get_or_try_init(|| {
        ffmpeg::init().decoder_err("FFmpeg initialisation failed")?;
        ffmpeg::log::set_level(ffmpeg::log::Level::Warning);
        Ok::<(), AvFeedError>(())
    })?;

    Ok(())
}

fn is_again(err: &ffmpeg::Error) -> bool {
    matches!(err, ffmpeg::Error::Other { errno } if *errno == ffmpeg::error::EAGAIN)
}

fn rational(value: ffmpeg::Rational) -> Rational {
    Rational::new(value.numerator() as i64, value.denominator() as i64)
}

/// Encoded packet read from an FFmpeg demuxer
pub struct FfmpegPacket(ffmpeg::Packet);

// SAFETY: the packet owns its buffer reference and moves between threads
// whole; it is never shared.
unsafe impl Send for FfmpegPacket {}

impl EncodedPacket for FfmpegPacket {
    fn stream_index(&self) -> usize {
        self.0.stream()
    }

    fn size(&self) -> usize {
        self.0.size()
    }

    fn timestamp(&self) -> Option<i64> {
        self.0.pts()
    }
}

/// Demuxer over an opened input context
pub struct FfmpegDemuxer {
    input: ffmpeg::format::context::Input,
}

// SAFETY: the input context is owned by the input thread after open and
// never touched from anywhere else.
unsafe impl Send for FfmpegDemuxer {}

impl DemuxSource<FfmpegPacket> for FfmpegDemuxer {
    fn read(&mut self) -> Result<DemuxStatus<FfmpegPacket>> {
        let mut packet = ffmpeg::Packet::empty();

        match packet.read(&mut self.input) {
            Ok(()) => Ok(DemuxStatus::Packet(FfmpegPacket(packet))),
            Err(ffmpeg::Error::Eof) => Ok(DemuxStatus::End),
            Err(e) if is_again(&e) => Ok(DemuxStatus::Retry),
            Err(e) => Err(AvFeedError::Decoder(format!("Failed to read packet: {}", e))),
        }
    }
}

fn send_packet(decoder: &mut ffmpeg::decoder::Decoder, packet: Option<&FfmpegPacket>) -> Result<Feed> {
    let result = match packet {
        Some(packet) => decoder.send_packet(&packet.0),
        None => decoder.send_eof(),
    };

    match result {
        Ok(()) => Ok(Feed::Accepted),
        Err(e) if is_again(&e) => Ok(Feed::Again),
        // Already draining
        Err(ffmpeg::Error::Eof) => Ok(Feed::Accepted),
        Err(e) => Err(AvFeedError::Decoder(format!("Failed to send packet: {}", e))),
    }
}

/// Pull one frame, stamping its best-effort timestamp as the pts
fn receive_frame(decoder: &mut ffmpeg::decoder::Decoder, frame: &mut ffmpeg::frame::Frame) -> Result<Received<()>> {
    match decoder.receive_frame(frame) {
        Ok(()) => {
            let timestamp = frame.timestamp();
            frame.set_pts(timestamp);
            Ok(Received::Frame(()))
        }
        Err(e) if is_again(&e) => Ok(Received::Again),
        Err(ffmpeg::Error::Eof) => Ok(Received::End),
        Err(e) => Err(AvFeedError::Decoder(format!("Failed to receive frame: {}", e))),
    }
}

/// Decoded video frame
pub struct FfmpegVideoFrame(ffmpeg::frame::Video);

impl TimedFrame for FfmpegVideoFrame {
    fn timestamp(&self) -> Option<i64> {
        self.0.pts()
    }
}

impl VideoSourceFrame for FfmpegVideoFrame {
    fn width(&self) -> u32 {
        self.0.width()
    }

    fn height(&self) -> u32 {
        self.0.height()
    }

    fn sample_aspect(&self) -> Rational {
        rational(self.0.aspect_ratio())
    }
}

/// Decoded audio frame
pub struct FfmpegAudioFrame(ffmpeg::frame::Audio);

impl TimedFrame for FfmpegAudioFrame {
    fn timestamp(&self) -> Option<i64> {
        self.0.pts()
    }
}

impl AudioSourceFrame for FfmpegAudioFrame {
    fn samples(&self) -> SampleView<'_> {
        let frame = &self.0;
        let format = frame.format();
        let bytes = format.bytes();
        let count = frame.samples();

        // SAFETY: reading a plain field of a decoded frame
        let channels = unsafe { (*frame.as_ptr()).ch_layout.nb_channels }.max(1) as usize;

        if format.is_planar() {
            let planes = (0..channels).map(|i| plane(frame, i, count * bytes)).collect();
            SampleView::planar(planes, bytes, count)
        } else {
            SampleView::interleaved(plane(frame, 0, count * channels * bytes), channels, bytes, count)
        }
    }
}

fn plane(frame: &ffmpeg::frame::Audio, index: usize, len: usize) -> &[u8] {
    // SAFETY: extended_data holds one pointer per plane of a decoded frame,
    // each covering at least `len` bytes, and lives as long as the frame.
    unsafe {
        let data = *(*frame.as_ptr()).extended_data.add(index);
        if data.is_null() {
            &[]
        } else {
            std::slice::from_raw_parts(data, len)
        }
    }
}

/// Video stream decoder
pub struct FfmpegVideoDecoder {
    decoder: ffmpeg::decoder::Video,
}

// SAFETY: the codec context moves to the video decode thread once and is
// only used there.
unsafe impl Send for FfmpegVideoDecoder {}

impl crate::media::Decoder<FfmpegPacket> for FfmpegVideoDecoder {
    type Frame = FfmpegVideoFrame;

    fn send(&mut self, packet: Option<&FfmpegPacket>) -> Result<Feed> {
        send_packet(&mut self.decoder, packet)
    }

    fn receive(&mut self) -> Result<Received<FfmpegVideoFrame>> {
        let mut frame = ffmpeg::frame::Video::empty();

        Ok(match receive_frame(&mut self.decoder, &mut frame)? {
            Received::Frame(()) => Received::Frame(FfmpegVideoFrame(frame)),
            Received::Again => Received::Again,
            Received::End => Received::End,
        })
    }
}

/// Audio stream decoder
pub struct FfmpegAudioDecoder {
    decoder: ffmpeg::decoder::Audio,
}

// SAFETY: as for the video decoder, owned by the audio decode thread.
unsafe impl Send for FfmpegAudioDecoder {}

impl crate::media::Decoder<FfmpegPacket> for FfmpegAudioDecoder {
    type Frame = FfmpegAudioFrame;

    fn send(&mut self, packet: Option<&FfmpegPacket>) -> Result<Feed> {
        send_packet(&mut self.decoder, packet)
    }

    fn receive(&mut self) -> Result<Received<FfmpegAudioFrame>> {
        let mut frame = ffmpeg::frame::Audio::empty();

        Ok(match receive_frame(&mut self.decoder, &mut frame)? {
            Received::Frame(()) => Received::Frame(FfmpegAudioFrame(frame)),
            Received::Again => Received::Again,
            Received::End => Received::End,
        })
    }
}

/// One-in, one-out filter graph with an "in" source and an "out" sink
pub struct FfmpegFilter {
    graph: ffmpeg::filter::Graph,
}

// SAFETY: each graph belongs to a single decode thread.
unsafe impl Send for FfmpegFilter {}

impl FfmpegFilter {
    /// Build `[in]description[out]` between `source` and `sink` filters
    pub fn new(source: &str, sink: &str, args: &str, description: &str) -> Result<Self> {
        let mut graph = ffmpeg::filter::Graph::new();

        let source_filter = ffmpeg::filter::find(source)
            .ok_or_else(|| AvFeedError::Filter(format!("{} filter is not available", source)))?;
        let sink_filter = ffmpeg::filter::find(sink)
            .ok_or_else(|| AvFeedError::Filter(format!("{} filter is not available", sink)))?;

        graph
            .add(&source_filter, "in", args)
            .filter_err("Failed to create filter source")?;
        graph
            .add(&sink_filter, "out", "")
            .filter_err("Failed to create filter sink")?;

        graph
            .output("in", 0)
            .and_then(|parser| parser.input("out", 0))
            .and_then(|parser| parser.parse(description))
            .filter_err(&format!("Failed to parse filter graph '{}'", description))?;
        graph.validate().filter_err("Invalid filter graph")?;

        debug!("Filter graph ready: {}", description);
        Ok(Self { graph })
    }

    fn run(&mut self, input: &ffmpeg::frame::Frame, output: &mut ffmpeg::frame::Frame) -> Result<()> {
        self.graph
            .get("in")
            .ok_or_else(|| AvFeedError::Filter("Filter source missing".to_string()))?
            .source()
            .add(input)
            .filter_err("Failed to feed filter graph")?;

        self.graph
            .get("out")
            .ok_or_else(|| AvFeedError::Filter("Filter sink missing".to_string()))?
            .sink()
            .frame(output)
            .filter_err("Filter graph produced no frame")
    }
}

impl FrameFilter<FfmpegVideoFrame> for FfmpegFilter {
    fn apply(&mut self, frame: FfmpegVideoFrame) -> Result<FfmpegVideoFrame> {
        let mut filtered = ffmpeg::frame::Video::empty();
        self.run(&frame.0, &mut filtered)?;
        Ok(FfmpegVideoFrame(filtered))
    }
}

impl FrameFilter<FfmpegAudioFrame> for FfmpegFilter {
    fn apply(&mut self, frame: FfmpegAudioFrame) -> Result<FfmpegAudioFrame> {
        let mut filtered = ffmpeg::frame::Audio::empty();
        self.run(&frame.0, &mut filtered)?;
        Ok(FfmpegAudioFrame(filtered))
    }
}

/// Bicubic scaler into the 32-bit output frame
pub struct FfmpegScaler {
    context: Option<ffmpeg::software::scaling::Context>,
    scaled: ffmpeg::frame::Video,
}

// SAFETY: the sws context belongs to the video transform thread alone.
unsafe impl Send for FfmpegScaler {}

impl FfmpegScaler {
    pub fn new() -> Self {
        Self {
            context: None,
            scaled: ffmpeg::frame::Video::empty(),
        }
    }
}

impl Default for FfmpegScaler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scaler<FfmpegVideoFrame> for FfmpegScaler {
    fn scale(&mut self, source: &FfmpegVideoFrame, target: &mut VideoBuffer) -> Result<()> {
        let frame = &source.0;
        let (width, height) = (target.width(), target.height());

        // Rebuild when the source format or size changes mid-stream
        let context = match self.context.take() {
            Some(context)
                if context.input().format == frame.format()
                    && context.input().width == frame.width()
                    && context.input().height == frame.height() =>
            {
                self.context.insert(context)
            }
            _ => {
                let context = ffmpeg::software::scaling::Context::get(
                    frame.format(),
                    frame.width(),
                    frame.height(),
                    OUTPUT_PIXEL,
                    width,
                    height,
                    ffmpeg::software::scaling::Flags::BICUBIC,
                )
                .map_err(|e| AvFeedError::Scaler(format!("Failed to create scaler: {}", e)))?;
                self.scaled = ffmpeg::frame::Video::empty();
                self.context.insert(context)
            }
        };

        context
            .run(frame, &mut self.scaled)
            .map_err(|e| AvFeedError::Scaler(format!("Scaling failed: {}", e)))?;

        let stride = self.scaled.stride(0);
        let data = self.scaled.data(0);
        let row_bytes = width as usize * 4;

        for (y, row) in target.pixels_mut().chunks_exact_mut(width as usize).enumerate() {
            let Some(line) = data.get(y * stride..y * stride + row_bytes) else {
                break;
            };

            for (pixel, bytes) in row.iter_mut().zip(line.chunks_exact(4)) {
                *pixel = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
        }

        Ok(())
    }
}

/// libswresample context producing interleaved s16
pub struct FfmpegResampler {
    context: *mut ffi::SwrContext,
}

// SAFETY: the swr context belongs to the audio transform thread alone.
unsafe impl Send for FfmpegResampler {}

impl FfmpegResampler {
    pub fn new(
        source_layout: &ffi::AVChannelLayout,
        source_format: ffi::AVSampleFormat,
        source_rate: u32,
        channels: u16,
        rate: u32,
    ) -> Result<Self> {
        let mut context = ptr::null_mut();

        // SAFETY: both layouts are valid for the call; the output layout is
        // released before returning and the context is freed on failure.
        unsafe {
            let mut layout: ffi::AVChannelLayout = std::mem::zeroed();
            ffi::av_channel_layout_default(&mut layout, channels as c_int);

            let ret = ffi::swr_alloc_set_opts2(
                &mut context,
                &layout,
                ffi::AVSampleFormat::AV_SAMPLE_FMT_S16,
                rate as c_int,
                source_layout,
                source_format,
                source_rate as c_int,
                0,
                ptr::null_mut(),
            );
            ffi::av_channel_layout_uninit(&mut layout);

            if ret < 0 || context.is_null() {
                return Err(AvFeedError::Resampler(format!(
                    "Failed to allocate resampler: {}",
                    ffmpeg::Error::from(ret)
                )));
            }

            let ret = ffi::swr_init(context);
            if ret < 0 {
                ffi::swr_free(&mut context);
                return Err(AvFeedError::Resampler(format!(
                    "Failed to initialise resampler: {}",
                    ffmpeg::Error::from(ret)
                )));
            }
        }

        Ok(Self { context })
    }
}

impl Resampler for FfmpegResampler {
    fn convert(&mut self, input: Option<&SampleView<'_>>, output: &mut AudioBlock) -> Result<usize> {
        let capacity = output.capacity() as c_int;
        let mut out_planes = [output.buffer_mut().as_mut_ptr() as *mut u8];

        let mut in_planes: Vec<*const u8> = input
            .map(|view| view.planes().iter().map(|p| p.as_ptr()).collect())
            .unwrap_or_default();
        let in_count = input.map_or(0, |view| view.len()) as c_int;
        let in_ptr = if in_planes.is_empty() {
            ptr::null_mut()
        } else {
            in_planes.as_mut_ptr()
        };

        // SAFETY: the output buffer holds `capacity` interleaved frames and
        // every input plane holds `in_count` samples.
        let written = unsafe {
            ffi::swr_convert(self.context, out_planes.as_mut_ptr(), capacity, in_ptr, in_count)
        };

        if written < 0 {
            return Err(AvFeedError::Resampler(format!(
                "Resampling failed: {}",
                ffmpeg::Error::from(written)
            )));
        }

        Ok(written as usize)
    }

    fn inject_silence(&mut self, samples: usize) -> Result<()> {
        // SAFETY: the context is initialised for the lifetime of self
        let ret = unsafe { ffi::swr_inject_silence(self.context, samples as c_int) };
        if ret < 0 {
            return Err(AvFeedError::Resampler(format!(
                "Failed to inject silence: {}",
                ffmpeg::Error::from(ret)
            )));
        }

        Ok(())
    }
}

impl Drop for FfmpegResampler {
    fn drop(&mut self) {
        // SAFETY: swr_free accepts and nulls an owned context
        unsafe { ffi::swr_free(&mut self.context) };
    }
}

/// Text and bitmap subtitle decoder run on the input thread
pub struct FfmpegSubtitleDecoder {
    decoder: ffmpeg::decoder::Subtitle,
    time_base: Rational,
    active_width: u32,
}

// SAFETY: owned by the input thread after open.
unsafe impl Send for FfmpegSubtitleDecoder {}

impl SubtitleDecoder<FfmpegPacket> for FfmpegSubtitleDecoder {
    fn decode(&mut self, packet: &FfmpegPacket) -> Result<Option<SubtitleCue>> {
        let mut subtitle = ffmpeg::codec::subtitle::Subtitle::new();

        let decoded = match self.decoder.decode(&packet.0, &mut subtitle) {
            Ok(decoded) => decoded,
            Err(e) if is_again(&e) => false,
            Err(e) => return Err(AvFeedError::Subtitle(e.to_string())),
        };
        if !decoded {
            return Ok(None);
        }

        let base = packet.0.pts().map_or(0, |pts| rescale(pts, self.time_base, MILLISECONDS));
        let start_ms = base + subtitle.start() as i64;
        let end_ms = base + subtitle.end() as i64;

        let mut text: Option<String> = None;
        let mut rects = Vec::new();

        for rect in subtitle.rects() {
            // SAFETY: rects of a decoded subtitle stay valid until it is freed below
            unsafe {
                let raw = &*rect.as_ptr();
                match raw.type_ {
                    ffi::AVSubtitleType::SUBTITLE_ASS if !raw.ass.is_null() && text.is_none() => {
                        text = Some(ass_dialogue_text(&CStr::from_ptr(raw.ass).to_string_lossy()));
                    }
                    ffi::AVSubtitleType::SUBTITLE_TEXT if !raw.text.is_null() && text.is_none() => {
                        text = Some(CStr::from_ptr(raw.text).to_string_lossy().into_owned());
                    }
                    ffi::AVSubtitleType::SUBTITLE_BITMAP => rects.push(palette_rect(raw)),
                    _ => {}
                }
            }
        }

        // SAFETY: frees the rects read above; the struct is left zeroed
        unsafe { ffi::avsubtitle_free(subtitle.as_mut_ptr()) };

        let cue = if !rects.is_empty() {
            Some(SubtitleCue::bitmap(start_ms, end_ms, compose_bitmap(&rects, self.active_width)))
        } else {
            text.map(|text| SubtitleCue::text(start_ms, end_ms, text))
        };

        Ok(cue)
    }
}

/// Copy a palettised subtitle rectangle out of FFmpeg's buffers
///
/// # Safety
///
/// `rect` must be a bitmap rect of a live decoded subtitle.
unsafe fn palette_rect(rect: &ffi::AVSubtitleRect) -> PaletteRect {
    let width = rect.w.max(0) as usize;
    let height = rect.h.max(0) as usize;
    let stride = rect.linesize[0].max(0) as usize;

    let mut indices = Vec::with_capacity(width * height);
    if !rect.data[0].is_null() && stride >= width && width > 0 {
        let data = std::slice::from_raw_parts(rect.data[0], stride * height);
        for row in data.chunks_exact(stride) {
            indices.extend_from_slice(&row[..width]);
        }
    }

    let palette = if rect.data[1].is_null() || rect.nb_colors <= 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(rect.data[1] as *const u32, rect.nb_colors as usize).to_vec()
    };

    PaletteRect {
        width: width as u32,
        height: height as u32,
        indices,
        palette,
    }
}

fn open_input(url: &str, source: &SourceConfig) -> Result<ffmpeg::format::context::Input> {
    let url = resolve_input_url(url);

    let mut options = ffmpeg::Dictionary::new();
    for (key, value) in parse_demuxer_options(source.options.as_deref().unwrap_or("")) {
        options.set(&key, &value);
    }

    let Some(name) = source.format.as_deref() else {
        return ffmpeg::format::input_with_dictionary(&url, options)
            .open_err(&format!("Failed to open '{}'", url));
    };

    let c_name = CString::new(name)?;
    // SAFETY: returns a pointer to a static demuxer descriptor, or null
    let format = unsafe { ffi::av_find_input_format(c_name.as_ptr()) };
    if format.is_null() {
        return Err(AvFeedError::Open(format!("Unknown input format '{}'", name)));
    }

    // SAFETY: checked non-null above
    let format = unsafe { ffmpeg::format::Input::wrap(format as *mut _) };
    match ffmpeg::format::open_with(&url, &ffmpeg::format::Format::Input(format), options)
        .open_err(&format!("Failed to open '{}' as {}", url, name))?
    {
        ffmpeg::format::context::Context::Input(input) => Ok(input),
        _ => Err(AvFeedError::Open(format!("'{}' did not open as an input", url))),
    }
}

fn describe_streams(input: &ffmpeg::format::context::Input) -> Vec<StreamDescriptor> {
    input
        .streams()
        .map(|stream| {
            let params = stream.parameters();
            let medium = match params.medium() {
                ffmpeg::media::Type::Video => MediaType::Video,
                ffmpeg::media::Type::Audio => MediaType::Audio,
                ffmpeg::media::Type::Subtitle => MediaType::Subtitle,
                _ => MediaType::Other,
            };

            let channels = if medium == MediaType::Audio {
                // SAFETY: reading a plain field of the stream's parameters
                unsafe { (*params.as_ptr()).ch_layout.nb_channels.max(0) as u16 }
            } else {
                0
            };

            StreamDescriptor::new(stream.index(), medium, channels)
        })
        .collect()
}

fn codec_context(input: &ffmpeg::format::context::Input, index: usize) -> Result<(ffmpeg::codec::context::Context, Rational)> {
    let stream = input
        .stream(index)
        .ok_or_else(|| AvFeedError::Open(format!("Stream {} disappeared", index)))?;

    let mut context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .decoder_err(&format!("Failed to create decoder for stream {}", index))?;

    // SAFETY: plain field write on an unopened codec context
    unsafe { (*context.as_mut_ptr()).pkt_timebase = stream.time_base().into() };

    Ok((context, rational(stream.time_base())))
}

fn describe_layout(layout: &ffi::AVChannelLayout) -> String {
    let mut buf = [0 as c_char; 64];

    // SAFETY: the buffer is writable for its full length and NUL terminated on success
    let ret = unsafe { ffi::av_channel_layout_describe(layout, buf.as_mut_ptr(), buf.len()) };
    if ret < 0 {
        return format!("{}c", layout.nb_channels);
    }

    // SAFETY: see above
    unsafe { CStr::from_ptr(buf.as_ptr()) }.to_string_lossy().into_owned()
}

fn open_video(
    input: &ffmpeg::format::context::Input,
    index: usize,
    config: &Config,
    reference: Rational,
    start: i64,
) -> Result<VideoStream<FfmpegPacket, FfmpegVideoFrame>> {
    let (mut context, time_base) = codec_context(input, index)?;
    context.set_threading(ffmpeg::codec::threading::Config {
        kind: ffmpeg::codec::threading::Type::Frame,
        ..Default::default()
    });

    let decoder = context
        .decoder()
        .video()
        .decoder_err("Failed to open video decoder")?;

    let (width, height) = (decoder.width(), decoder.height());
    let aspect = decoder.aspect_ratio();
    let args = format!(
        "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect={}/{}",
        width,
        height,
        ffi::AVPixelFormat::from(decoder.format()) as i32,
        time_base.num,
        time_base.den,
        aspect.numerator(),
        aspect.denominator().max(1),
    );
    let description = video_filter_description(width, height, config.output.height, &config.filter);
    let filter = FfmpegFilter::new("buffer", "buffersink", &args, &description)?;

    let clock = StreamClock::anchored(time_base, video_time_base(&config.output), reference, start);
    info!(
        "Video stream {}: {}x{} {:?}, time base {}/{}",
        index, width, height, decoder.format(), time_base.num, time_base.den
    );

    Ok(VideoStream::new(
        index,
        clock,
        Box::new(FfmpegVideoDecoder { decoder }),
        Box::new(FfmpegScaler::new()),
    )
    .with_filter(Box::new(filter))
    .with_source_size(width, height))
}

fn open_audio(
    input: &ffmpeg::format::context::Input,
    index: usize,
    config: &Config,
    reference: Rational,
    start: i64,
) -> Result<AudioStream<FfmpegPacket, FfmpegAudioFrame>> {
    let (context, time_base) = codec_context(input, index)?;
    let decoder = context
        .decoder()
        .audio()
        .decoder_err("Failed to open audio decoder")?;

    let rate = decoder.rate();
    let format = decoder.format();
    let sample_format = ffi::AVSampleFormat::from(format);

    // SAFETY: the layout belongs to the opened codec context, which outlives
    // both uses below.
    let source_layout = unsafe { &(*decoder.as_ptr()).ch_layout };

    let args = format!(
        "time_base={}/{}:sample_rate={}:sample_fmt={}:channel_layout={}",
        time_base.num,
        time_base.den,
        rate,
        format.name(),
        describe_layout(source_layout),
    );
    let description = audio_filter_description(&config.filter, format.name());
    let filter = FfmpegFilter::new("abuffer", "abuffersink", &args, &description)?;

    let resampler = if config.filter.downmix {
        // Downmixed frames leave the filter graph as stereo
        // SAFETY: zeroed is the unset layout; it is released after use
        unsafe {
            let mut stereo: ffi::AVChannelLayout = std::mem::zeroed();
            ffi::av_channel_layout_default(&mut stereo, 2);
            let resampler = FfmpegResampler::new(&stereo, sample_format, rate, config.output.channels, config.output.sample_rate);
            ffi::av_channel_layout_uninit(&mut stereo);
            resampler?
        }
    } else {
        FfmpegResampler::new(source_layout, sample_format, rate, config.output.channels, config.output.sample_rate)?
    };

    let block_size = output_block_size(decoder.frame_size() as usize, rate, config.output.sample_rate);
    let clock = StreamClock::anchored(time_base, audio_time_base(rate), reference, start);
    info!(
        "Audio stream {}: {} Hz {}, {} sample blocks",
        index, rate, format.name(), block_size
    );

    Ok(AudioStream::new(
        index,
        clock,
        block_size,
        config.output.channels,
        Box::new(FfmpegAudioDecoder { decoder }),
        Box::new(resampler),
    )
    .with_filter(Box::new(filter)))
}

fn open_subtitles(
    input: &ffmpeg::format::context::Input,
    index: usize,
    active_width: u32,
) -> Result<FfmpegSubtitleDecoder> {
    let (context, time_base) = codec_context(input, index)?;
    let decoder = context
        .decoder()
        .subtitle()
        .decoder_err("Failed to open subtitle decoder")?;

    Ok(FfmpegSubtitleDecoder {
        decoder,
        time_base,
        active_width,
    })
}

/// Open `url` ("-" for stdin) and start a feed over its streams
pub fn open(
    url: &str,
    config: &Config,
    overlay: Arc<dyn Overlay>,
    transport: Option<Box<dyn TransportEvents>>,
) -> Result<MediaFeed> {
    init()?;

    let mut input = open_input(url, &config.source)?;
    let streams = describe_streams(&input);
    let selection = select_streams(&streams, config.output.audio, &config.overlay)?;

    let reference_index = selection.video.or(selection.audio).ok_or(AvFeedError::NoStreams)?;
    let (reference, start_time) = {
        let stream = input
            .stream(reference_index)
            .ok_or_else(|| AvFeedError::Open(format!("Stream {} disappeared", reference_index)))?;
        let start_time = Some(stream.start_time()).filter(|&t| t != ffi::AV_NOPTS_VALUE);
        (rational(stream.time_base()), start_time)
    };

    let start = start_timestamp(reference, start_time, config.source.position);
    if config.source.position > 0.0 {
        // SAFETY: the context is open and exclusively borrowed
        let ret = unsafe {
            ffi::avformat_seek_file(input.as_mut_ptr(), reference_index as c_int, i64::MIN, start, i64::MAX, 0)
        };
        if ret < 0 {
            warn!("Failed to seek to {:.1} minutes: {}", config.source.position, ffmpeg::Error::from(ret));
        }
    }

    let video = selection
        .video
        .map(|index| open_video(&input, index, config, reference, start))
        .transpose()?;
    let audio = selection
        .audio
        .map(|index| open_audio(&input, index, config, reference, start))
        .transpose()?;
    let subtitles = selection.subtitle.and_then(|index| {
        match open_subtitles(&input, index, config.output.width) {
            Ok(decoder) => Some((index, decoder)),
            Err(e) => {
                warn!("Subtitles disabled: {}", e);
                None
            }
        }
    });

    info!(
        "Opened {}: video {:?}, audio {:?}, subtitles {:?}",
        url, selection.video, selection.audio, selection.subtitle
    );

    let mut builder = MediaFeed::builder(Box::new(FfmpegDemuxer { input }), config).overlay(overlay);
    if let Some(stream) = video {
        builder = builder.video(stream);
    }
    if let Some(stream) = audio {
        builder = builder.audio(stream);
    }
    if let Some((index, decoder)) = subtitles {
        builder = builder.subtitles(index, Box::new(decoder));
    }
    if let Some(events) = transport {
        builder = builder.transport(events);
    }

    builder.open()
}
