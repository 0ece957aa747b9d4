//! Pull API for the real-time sink
//!
//! `MediaFeed` is what the signal generator talks to. It hands out exactly
//! one output frame or audio block per call, applies pause and seek, and
//! owns the worker threads through the lifecycle controller.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};
use parking_lot::Mutex;

use crate::media::{AudioBlock, DemuxSource, EncodedPacket, MediaIcon, NoOverlay, Overlay, SubtitleDecoder, VideoBuffer};
use crate::media::{AudioSourceFrame, VideoSourceFrame};
use crate::pipeline::audio::LaunchAudio;
use crate::pipeline::input::{InputStage, SubtitleInput};
use crate::pipeline::video::{LaunchVideo, VideoOverlays, VideoSetup};
use crate::pipeline::{AudioStream, FrameSlot, Pipeline, PipelineContext, SeekHandle, SlotGuard, VideoStream};
use crate::player::state::{PlaybackState, TransportEvents};
use crate::subtitle::SubtitleTrack;
use crate::utils::config::{Config, FilterConfig, OutputConfig, OverlayConfig, PipelineConfig};
use crate::utils::error::{AvFeedError, Result};

/// Display ratio reported when the source ratio is unknown or forced
pub const DEFAULT_DISPLAY_RATIO: f32 = 4.0 / 3.0;

/// Borrowed output video frame plus its display aspect ratio
pub struct VideoFrameRef<'a> {
    frame: SlotGuard<'a, VideoBuffer>,
    ratio: f32,
}

impl VideoFrameRef<'_> {
    /// Width / height the frame should be shown at
    pub fn display_ratio(&self) -> f32 {
        self.ratio
    }
}

impl Deref for VideoFrameRef<'_> {
    type Target = VideoBuffer;

    fn deref(&self) -> &VideoBuffer {
        &self.frame
    }
}

/// Borrowed output audio block
pub struct AudioBlockRef<'a> {
    block: SlotGuard<'a, AudioBlock>,
}

impl Deref for AudioBlockRef<'_> {
    type Target = AudioBlock;

    fn deref(&self) -> &AudioBlock {
        &self.block
    }
}

struct VideoOutput {
    slot: Arc<FrameSlot<VideoBuffer>>,
    seek: SeekHandle,
    source_size: (u32, u32),
    eof: bool,
}

struct AudioOutput {
    slot: Arc<FrameSlot<AudioBlock>>,
    seek: SeekHandle,
    eof: bool,
}

/// Collects the source, streams and collaborators before starting threads
pub struct FeedBuilder<P> {
    source: Box<dyn DemuxSource<P>>,
    video: Option<Box<dyn LaunchVideo<P>>>,
    audio: Option<Box<dyn LaunchAudio<P>>>,
    subtitles: Option<(usize, Box<dyn SubtitleDecoder<P>>)>,
    overlay: Arc<dyn Overlay>,
    transport: Option<Box<dyn TransportEvents>>,
    output: OutputConfig,
    pipeline: PipelineConfig,
    overlays: OverlayConfig,
    filter: FilterConfig,
}

impl<P: EncodedPacket> FeedBuilder<P> {
    pub fn new(source: Box<dyn DemuxSource<P>>, config: &Config) -> Self {
        Self {
            source,
            video: None,
            audio: None,
            subtitles: None,
            overlay: Arc::new(NoOverlay),
            transport: None,
            output: config.output.clone(),
            pipeline: config.pipeline.clone(),
            overlays: config.overlay.clone(),
            filter: config.filter.clone(),
        }
    }

    pub fn video<F: VideoSourceFrame>(mut self, stream: VideoStream<P, F>) -> Self {
        self.video = Some(Box::new(stream));
        self
    }

    pub fn audio<F: AudioSourceFrame>(mut self, stream: AudioStream<P, F>) -> Self {
        self.audio = Some(Box::new(stream));
        self
    }

    /// Decode subtitle packets from `stream_index` on the input thread
    pub fn subtitles(mut self, stream_index: usize, decoder: Box<dyn SubtitleDecoder<P>>) -> Self {
        self.subtitles = Some((stream_index, decoder));
        self
    }

    pub fn overlay(mut self, overlay: Arc<dyn Overlay>) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn transport(mut self, events: Box<dyn TransportEvents>) -> Self {
        self.transport = Some(events);
        self
    }

    /// Allocate the output buffers and start every worker thread
    ///
    /// Threads start in the order video decode, video transform, audio
    /// decode, audio transform, input. If anything fails the threads already
    /// running are shut down before the error is returned.
    pub fn open(self) -> Result<MediaFeed> {
        if self.video.is_none() && self.audio.is_none() {
            return Err(AvFeedError::NoStreams);
        }

        let ctx = Arc::new(PipelineContext::new(self.pipeline.max_queue_bytes));
        let mut pipeline = Pipeline::new(ctx.clone());

        let track = self
            .subtitles
            .as_ref()
            .map(|_| Arc::new(Mutex::new(SubtitleTrack::new())));

        let mut video_index = None;
        let video = match self.video {
            Some(stream) => {
                video_index = Some(stream.stream_index());
                let seek = stream.seek_handle();
                let source_size = stream.source_size();
                let setup = VideoSetup {
                    width: self.output.width,
                    height: self.output.height,
                    overlay: Arc::clone(&self.overlay),
                    overlays: VideoOverlays::from(&self.overlays),
                    subtitles: track.clone(),
                };

                let slot = stream.launch(&ctx, setup, &mut pipeline)?;
                Some(VideoOutput {
                    slot,
                    seek,
                    source_size,
                    eof: false,
                })
            }
            None => None,
        };

        let mut audio_index = None;
        let audio = match self.audio {
            Some(stream) => {
                audio_index = Some(stream.stream_index());
                let seek = stream.seek_handle();
                let slot = stream.launch(&ctx, &mut pipeline)?;
                Some(AudioOutput {
                    slot,
                    seek,
                    eof: false,
                })
            }
            None => None,
        };

        let subtitles = match (self.subtitles, track) {
            (Some((stream_index, decoder)), Some(track)) => Some(SubtitleInput {
                stream_index,
                decoder,
                track,
            }),
            _ => None,
        };

        let input = InputStage::new(self.source, video_index, audio_index, subtitles);
        let input_ctx = Arc::clone(&ctx);
        pipeline.start_input(move || input.run(&input_ctx))?;

        info!(
            "Media feed opened: video {:?}, audio {:?}, {}x{} output",
            video_index, audio_index, self.output.width, self.output.height
        );

        Ok(MediaFeed {
            pipeline,
            video,
            audio,
            playback: PlaybackState::new(),
            overlay: self.overlay,
            transport: self.transport,
            seek_step: self.pipeline.seek_step_secs,
            fixed_aspect: self.filter.letterbox || self.filter.pillarbox,
        })
    }
}

/// Running pipeline seen from the sink
pub struct MediaFeed {
    pipeline: Pipeline,
    video: Option<VideoOutput>,
    audio: Option<AudioOutput>,
    playback: PlaybackState,
    overlay: Arc<dyn Overlay>,
    transport: Option<Box<dyn TransportEvents>>,

    /// Seconds per seek command
    seek_step: f64,

    /// Letterbox or pillarbox forces a 4:3 display ratio
    fixed_aspect: bool,
}

impl MediaFeed {
    pub fn builder<P: EncodedPacket>(source: Box<dyn DemuxSource<P>>, config: &Config) -> FeedBuilder<P> {
        FeedBuilder::new(source, config)
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.playback.is_paused()
    }

    /// Next output video frame
    ///
    /// Pending transport commands are applied first. While paused the
    /// current frame is served again with the pause icon. Returns `None`
    /// once the video stream has ended, or if there is none.
    pub fn read_video(&mut self) -> Option<VideoFrameRef<'_>> {
        self.video.as_ref()?;
        self.apply_transport();

        let now = Instant::now();
        let Self {
            video,
            playback,
            overlay,
            fixed_aspect,
            ..
        } = self;
        let video = video.as_mut()?;

        if video.eof {
            return None;
        }

        let frame = if playback.is_paused() {
            // The icon is drawn into the front buffer itself and stays on it
            // if the transform repeats that buffer after resume
            let mut frame = video.slot.front();
            report_icon(overlay.icon(&mut frame, MediaIcon::Pause));
            playback.mark_paused(now);
            frame
        } else {
            match video.slot.consume() {
                Some(mut frame) => {
                    if playback.play_icon_visible(now) {
                        report_icon(overlay.icon(&mut frame, MediaIcon::Play));
                    }
                    frame
                }
                None => {
                    video.eof = true;
                    info!("Video stream finished");
                    return None;
                }
            }
        };

        let ratio = display_ratio(&frame, video.source_size, *fixed_aspect);
        Some(VideoFrameRef { frame, ratio })
    }

    /// Next output audio block
    ///
    /// Returns `None` without touching the pipeline while paused or once
    /// the audio stream has ended.
    pub fn read_audio(&mut self) -> Option<AudioBlockRef<'_>> {
        if self.video.is_none() {
            self.apply_transport();
        }

        if self.playback.is_paused() {
            return None;
        }

        let audio = self.audio.as_mut()?;
        if audio.eof {
            return None;
        }

        match audio.slot.consume() {
            Some(block) => Some(AudioBlockRef { block }),
            None => {
                audio.eof = true;
                info!("Audio stream finished");
                None
            }
        }
    }

    /// True once every stream that exists has reached its end
    pub fn eof(&self) -> bool {
        self.video.as_ref().map_or(true, |v| v.eof) && self.audio.as_ref().map_or(true, |a| a.eof)
    }

    /// Toggle pause; returns the new paused state
    pub fn toggle_pause(&mut self) -> bool {
        let paused = self.playback.toggle_pause();
        info!("Playback {}", if paused { "paused" } else { "resumed" });
        paused
    }

    /// Queue a relative seek, applied on the next read
    pub fn seek(&mut self, seconds: f64) {
        self.playback.request_seek(seconds);
    }

    /// Stop every worker thread and release the pipeline
    pub fn close(mut self) {
        self.pipeline.shutdown();
        info!("Media feed closed");
    }

    fn apply_transport(&mut self) {
        if let Some(events) = self.transport.as_mut() {
            while let Some(command) = events.poll() {
                info!("Transport command: {:?}", command);
                self.playback.apply(command, self.seek_step);
            }
        }

        if let Some(seconds) = self.playback.take_seek() {
            if let Some(video) = &self.video {
                video.seek.shift_seconds(seconds);
            }
            if let Some(audio) = &self.audio {
                audio.seek.shift_seconds(seconds);
            }
            info!("Seeking {:+.1}s", seconds);
        }
    }
}

fn display_ratio(frame: &VideoBuffer, source_size: (u32, u32), fixed_aspect: bool) -> f32 {
    let (width, height) = source_size;
    if fixed_aspect || height == 0 || width == 0 || !frame.pixel_aspect().is_valid() {
        return DEFAULT_DISPLAY_RATIO;
    }

    width as f32 / height as f32
}

fn report_icon(result: Result<()>) {
    if let Err(e) = result {
        warn!("Failed to draw media icon: {}", e);
    }
}
