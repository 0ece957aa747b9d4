//! Video transform stage
//!
//! Re-times decoded frames onto the output frame cadence, scales them into
//! the fixed output geometry and composites overlays. Frames behind the
//! clock are dropped; gaps ahead of it are filled by re-presenting the
//! previous output frame.

use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::media::{
    Decoder, EncodedPacket, FrameFilter, Overlay, PassThrough, Scaler, StreamKind, VideoBuffer,
    VideoSourceFrame,
};
use crate::pipeline::clock::{Rational, SeekHandle, StreamClock};
use crate::pipeline::decode::DecodeStage;
use crate::pipeline::frame_slot::FrameSlot;
use crate::pipeline::{Pipeline, PipelineContext};
use crate::subtitle::{SubtitleContent, SubtitleTrack};
use crate::utils::config::OverlayConfig;
use crate::utils::error::Result;
use crate::utils::format_timestamp;

/// Everything needed to run one video stream
pub struct VideoStream<P, F> {
    stream_index: usize,
    clock: StreamClock,
    source_size: (u32, u32),
    decoder: Box<dyn Decoder<P, Frame = F>>,
    filter: Box<dyn FrameFilter<F>>,
    scaler: Box<dyn Scaler<F>>,
}

impl<P: EncodedPacket, F: VideoSourceFrame> VideoStream<P, F> {
    pub fn new(
        stream_index: usize,
        clock: StreamClock,
        decoder: Box<dyn Decoder<P, Frame = F>>,
        scaler: Box<dyn Scaler<F>>,
    ) -> Self {
        Self {
            stream_index,
            clock,
            source_size: (0, 0),
            decoder,
            filter: Box::new(PassThrough),
            scaler,
        }
    }

    /// Filter applied to every decoded frame before scaling
    pub fn with_filter(mut self, filter: Box<dyn FrameFilter<F>>) -> Self {
        self.filter = filter;
        self
    }

    /// Coded source dimensions, used for the reported display ratio
    pub fn with_source_size(mut self, width: u32, height: u32) -> Self {
        self.source_size = (width, height);
        self
    }
}

/// Which overlays the transform composites
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct VideoOverlays {
    pub logo: bool,
    pub timestamp: bool,
    pub subtitles: bool,
    pub teletext: bool,
}

impl From<&OverlayConfig> for VideoOverlays {
    fn from(config: &OverlayConfig) -> Self {
        Self {
            logo: config.logo.is_some(),
            timestamp: config.timestamp,
            subtitles: config.subtitles.is_some(),
            teletext: config.teletext_subtitles.is_some(),
        }
    }
}

/// Per-open settings handed to a launching video stream
pub(crate) struct VideoSetup {
    pub width: u32,
    pub height: u32,
    pub overlay: Arc<dyn Overlay>,
    pub overlays: VideoOverlays,
    pub subtitles: Option<Arc<Mutex<SubtitleTrack>>>,
}

/// Output pixel aspect ratio for a scaled frame
///
/// An unknown or non-positive source ratio counts as square pixels.
pub fn output_pixel_aspect(
    source_width: u32,
    source_height: u32,
    sample_aspect: Rational,
    width: u32,
    height: u32,
) -> Rational {
    if source_height == 0 || width == 0 {
        return Rational::new(1, 1);
    }

    let sar = if sample_aspect.num > 0 && sample_aspect.den > 0 {
        sample_aspect
    } else {
        Rational::new(1, 1)
    };

    Rational::reduced(
        source_width as i64 * sar.num * height as i64,
        source_height as i64 * sar.den * width as i64,
    )
}

pub(crate) struct VideoTransform<F> {
    clock: StreamClock,
    scaler: Box<dyn Scaler<F>>,
    overlay: Arc<dyn Overlay>,
    overlays: VideoOverlays,
    subtitles: Option<Arc<Mutex<SubtitleTrack>>>,

    /// Last text sent to the teletext sink
    teletext_text: String,

    frames: u64,
    repeats: u64,
    dropped: u64,
}

impl<F: VideoSourceFrame> VideoTransform<F> {
    pub fn new(
        clock: StreamClock,
        scaler: Box<dyn Scaler<F>>,
        overlay: Arc<dyn Overlay>,
        overlays: VideoOverlays,
        subtitles: Option<Arc<Mutex<SubtitleTrack>>>,
    ) -> Self {
        Self {
            clock,
            scaler,
            overlay,
            overlays,
            subtitles,
            teletext_text: String::new(),
            frames: 0,
            repeats: 0,
            dropped: 0,
        }
    }

    pub fn clock(&self) -> &StreamClock {
        &self.clock
    }

    pub fn run(mut self, input: &FrameSlot<Option<F>>, output: &FrameSlot<VideoBuffer>) {
        debug!("video transform thread started");

        while let Some(mut slot) = input.consume() {
            let Some(frame) = slot.take() else {
                continue;
            };
            drop(slot);

            match self.process(&frame, output) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!("Video scaling failed, ending video stream: {}", e);
                    break;
                }
            }
        }

        output.finish();
        debug!(
            "video transform thread exiting: {} frames, {} repeats, {} dropped",
            self.frames, self.repeats, self.dropped
        );
    }

    /// Re-time, scale and publish one frame
    ///
    /// Returns `Ok(false)` once the output slot has been aborted.
    pub fn process(&mut self, frame: &F, output: &FrameSlot<VideoBuffer>) -> Result<bool> {
        let timestamp = frame.timestamp();

        if let Some(ts) = timestamp {
            let delta = self.clock.delta(ts);

            if delta < 0 {
                trace!("dropping video frame {} ticks behind", -delta);
                self.dropped += 1;
                return Ok(true);
            }

            for _ in 0..delta {
                if !output.publish(true) {
                    return Ok(false);
                }
            }

            self.clock.advance(delta);
            self.repeats += delta as u64;
        }

        {
            let Some(mut back) = output.acquire_back() else {
                return Ok(false);
            };

            self.scaler.scale(frame, &mut back)?;

            let aspect = output_pixel_aspect(
                frame.width(),
                frame.height(),
                frame.sample_aspect(),
                back.width(),
                back.height(),
            );
            back.set_pixel_aspect(aspect);
            back.set_source_timestamp(timestamp);

            self.composite(&mut back, timestamp);
        }

        if !output.publish(false) {
            return Ok(false);
        }

        self.clock.advance(1);
        self.frames += 1;

        Ok(true)
    }

    /// Logo, then timestamp, then subtitles
    fn composite(&mut self, frame: &mut VideoBuffer, timestamp: Option<i64>) {
        if self.overlays.logo {
            report(self.overlay.logo(frame), "logo");
        }

        let Some(ts) = timestamp else {
            return;
        };

        if self.overlays.timestamp {
            let text = format_timestamp(self.clock.source_seconds(ts));
            report(self.overlay.timestamp(frame, &text), "timestamp");
        }

        let Some(track) = self.subtitles.as_ref() else {
            return;
        };

        let ms = self.clock.source_millis(ts);
        let cue = {
            let mut track = track.lock();
            // Frames arrive in presentation order
            track.prune_before(ms);
            track.cue_at(ms).map(|cue| cue.content.clone())
        };

        match cue {
            Some(SubtitleContent::Bitmap(bitmap)) => {
                if self.overlays.subtitles {
                    report(self.overlay.bitmap_subtitle(frame, &bitmap), "bitmap subtitle");
                }
            }
            Some(SubtitleContent::Text(text)) => self.show_text(frame, text),
            None => self.show_text(frame, String::new()),
        }
    }

    fn show_text(&mut self, frame: &mut VideoBuffer, text: String) {
        if self.overlays.subtitles && !text.is_empty() {
            report(self.overlay.text_subtitle(frame, &text), "subtitle");
        }

        if self.overlays.teletext && text != self.teletext_text {
            report(self.overlay.teletext(&text), "teletext");
            self.teletext_text = text;
        }
    }
}

fn report(result: Result<()>, what: &str) {
    if let Err(e) = result {
        warn!("Failed to draw {} overlay: {}", what, e);
    }
}

/// Starts a type-erased video stream's threads
pub(crate) trait LaunchVideo<P>: Send {
    fn stream_index(&self) -> usize;
    fn seek_handle(&self) -> SeekHandle;
    fn source_size(&self) -> (u32, u32);

    fn launch(
        self: Box<Self>,
        ctx: &Arc<PipelineContext<P>>,
        setup: VideoSetup,
        pipeline: &mut Pipeline,
    ) -> Result<Arc<FrameSlot<VideoBuffer>>>;
}

impl<P: EncodedPacket, F: VideoSourceFrame> LaunchVideo<P> for VideoStream<P, F> {
    fn stream_index(&self) -> usize {
        self.stream_index
    }

    fn seek_handle(&self) -> SeekHandle {
        self.clock.seek_handle()
    }

    fn source_size(&self) -> (u32, u32) {
        self.source_size
    }

    fn launch(
        self: Box<Self>,
        ctx: &Arc<PipelineContext<P>>,
        setup: VideoSetup,
        pipeline: &mut Pipeline,
    ) -> Result<Arc<FrameSlot<VideoBuffer>>> {
        let stream = *self;

        let output = Arc::new(FrameSlot::new(
            VideoBuffer::allocate(setup.width, setup.height)?,
            VideoBuffer::allocate(setup.width, setup.height)?,
        ));
        let input: Arc<FrameSlot<Option<F>>> = Arc::new(FrameSlot::new(None, None));

        let decode = DecodeStage::new(StreamKind::Video, stream.decoder, stream.filter);
        let transform = VideoTransform::new(
            stream.clock,
            stream.scaler,
            setup.overlay,
            setup.overlays,
            setup.subtitles,
        );

        let decode_ctx = Arc::clone(ctx);
        let decode_output = Arc::clone(&input);
        let transform_input = Arc::clone(&input);
        let transform_output = Arc::clone(&output);

        pipeline.start_stream(
            StreamKind::Video,
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
    use crate::media::{NoOverlay, TimedFrame};
    use crate::subtitle::SubtitleCue;
    use std::thread;

    struct TestFrame(Option<i64>);

    impl TimedFrame for TestFrame {
        fn timestamp(&self) -> Option<i64> {
            self.0
        }
    }

    impl VideoSourceFrame for TestFrame {
        fn width(&self) -> u32 {
            1920
        }

        fn height(&self) -> u32 {
            1080
        }

        fn sample_aspect(&self) -> Rational {
            Rational::new(1, 1)
        }
    }

    /// Paints every pixel with the source timestamp
    struct FillScaler;

    impl Scaler<TestFrame> for FillScaler {
        fn scale(&mut self, source: &TestFrame, target: &mut VideoBuffer) -> Result<()> {
            target.pixels_mut().fill(source.0.unwrap_or(999) as u32);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingOverlay {
        calls: parking_lot::Mutex<Vec<String>>,
    }

    impl Overlay for RecordingOverlay {
        fn logo(&self, _frame: &mut VideoBuffer) -> Result<()> {
            self.calls.lock().push("logo".to_string());
            Ok(())
        }

        fn timestamp(&self, _frame: &mut VideoBuffer, text: &str) -> Result<()> {
            self.calls.lock().push(format!("time {}", text));
            Ok(())
        }

        fn text_subtitle(&self, _frame: &mut VideoBuffer, text: &str) -> Result<()> {
            self.calls.lock().push(format!("sub {}", text));
            Ok(())
        }

        fn teletext(&self, text: &str) -> Result<()> {
            self.calls.lock().push(format!("ttx {}", text));
            Ok(())
        }
    }

    fn output_slot() -> Arc<FrameSlot<VideoBuffer>> {
        Arc::new(FrameSlot::new(
            VideoBuffer::allocate(4, 3).unwrap(),
            VideoBuffer::allocate(4, 3).unwrap(),
        ))
    }

    fn frame_clock() -> StreamClock {
        StreamClock::new(Rational::new(1, 25), Rational::new(1, 25), 0)
    }

    #[test]
    fn test_gap_is_filled_with_repeats_and_stale_frames_dropped() {
        let output = output_slot();
        let mut transform = VideoTransform::new(
            frame_clock(),
            Box::new(FillScaler),
            Arc::new(NoOverlay),
            VideoOverlays::default(),
            None,
        );

        let producer = {
            let output = Arc::clone(&output);
            thread::spawn(move || {
                for ts in [0, 3, 1] {
                    assert!(transform.process(&TestFrame(Some(ts)), &output).unwrap());
                }
                (transform.clock().cursor(), transform.repeats, transform.dropped)
            })
        };

        let seen: Vec<u32> = (0..4).map(|_| output.consume().unwrap().pixels()[0]).collect();
        assert_eq!(seen, vec![0, 0, 0, 3]);

        let (cursor, repeats, dropped) = producer.join().unwrap();
        assert_eq!(cursor, 4);
        assert_eq!(repeats, 2);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_untimed_frame_is_not_corrected() {
        let output = output_slot();
        let mut transform = VideoTransform::new(
            frame_clock(),
            Box::new(FillScaler),
            Arc::new(NoOverlay),
            VideoOverlays::default(),
            None,
        );

        assert!(transform.process(&TestFrame(None), &output).unwrap());
        assert_eq!(transform.clock().cursor(), 1);

        let frame = output.consume().unwrap();
        assert_eq!(frame.pixels()[0], 999);
        assert_eq!(frame.source_timestamp(), None);
    }

    #[test]
    fn test_scaled_frame_carries_pixel_aspect() {
        let output = output_slot();
        let mut transform = VideoTransform::new(
            frame_clock(),
            Box::new(FillScaler),
            Arc::new(NoOverlay),
            VideoOverlays::default(),
            None,
        );

        assert!(transform.process(&TestFrame(Some(0)), &output).unwrap());
        let frame = output.consume().unwrap();

        // 16:9 source squeezed into a 4:3 buffer
        assert_eq!(frame.pixel_aspect(), Rational::new(4, 3));
        assert_eq!(frame.source_timestamp(), Some(0));
    }

    #[test]
    fn test_overlays_in_order_and_teletext_only_on_change() {
        let overlay = Arc::new(RecordingOverlay::default());
        let track = Arc::new(Mutex::new(SubtitleTrack::new()));
        track.lock().insert(SubtitleCue::text(0, 80, "hello"));

        let output = output_slot();
        let overlays = VideoOverlays {
            logo: true,
            timestamp: true,
            subtitles: true,
            teletext: true,
        };
        let clock = StreamClock::new(Rational::new(1, 1000), Rational::new(1, 25), 0);
        let mut transform =
            VideoTransform::new(clock, Box::new(FillScaler), overlay.clone(), overlays, Some(track));

        // 0 ms and 40 ms show "hello", 80 ms shows nothing
        for ts in [0, 40, 80] {
            assert!(transform.process(&TestFrame(Some(ts)), &output).unwrap());
            assert!(output.consume().is_some());
        }

        let calls = overlay.calls.lock().clone();
        assert_eq!(
            &calls[..4],
            &["logo", "time 00:00:00", "sub hello", "ttx hello"]
        );
        assert_eq!(calls.iter().filter(|c| c.starts_with("ttx")).count(), 2);
        assert_eq!(calls.last().map(String::as_str), Some("ttx "));
    }

    #[test]
    fn test_expired_cues_are_pruned() {
        let overlay = Arc::new(RecordingOverlay::default());
        let track = Arc::new(Mutex::new(SubtitleTrack::new()));
        let overlays = VideoOverlays {
            teletext: true,
            ..VideoOverlays::default()
        };

        let output = output_slot();
        let clock = StreamClock::new(Rational::new(1, 1000), Rational::new(1, 25), 0);
        let mut transform = VideoTransform::new(
            clock,
            Box::new(FillScaler),
            overlay.clone(),
            overlays,
            Some(Arc::clone(&track)),
        );

        // The input thread stays one cue ahead of the frames
        track.lock().insert(SubtitleCue::text(0, 40, "cue 0"));
        for i in 0..500i64 {
            track
                .lock()
                .insert(SubtitleCue::text((i + 1) * 40, (i + 2) * 40, format!("cue {}", i + 1)));

            assert!(transform.process(&TestFrame(Some(i * 40)), &output).unwrap());
            assert!(output.consume().is_some());
            assert!(track.lock().len() <= 2);
        }

        assert_eq!(overlay.calls.lock().last().map(String::as_str), Some("ttx cue 499"));
    }

    #[test]
    fn test_output_pixel_aspect() {
        assert_eq!(output_pixel_aspect(720, 576, Rational::new(16, 15), 720, 576), Rational::new(16, 15));
        assert_eq!(output_pixel_aspect(720, 576, Rational::new(0, 1), 720, 576), Rational::new(1, 1));
        assert_eq!(output_pixel_aspect(1920, 1080, Rational::new(1, 1), 720, 576), Rational::new(64, 45));
        assert_eq!(output_pixel_aspect(0, 0, Rational::new(1, 1), 720, 576), Rational::new(1, 1));
    }
}
