//! Playback state and transport controls
//!
//! Only the thread driving the pull API touches `PlaybackState`; transport
//! commands reach it through a non-blocking `TransportEvents` poll so the
//! pipeline never waits on a terminal or UI.

use std::time::{Duration, Instant};

/// How long the play icon stays up after resuming
pub const PLAY_ICON_DURATION: Duration = Duration::from_secs(5);

/// Transport command issued by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    TogglePause,
    SeekForward,
    SeekBackward,
}

/// Non-blocking source of transport commands
pub trait TransportEvents: Send {
    /// Next pending command, if any
    fn poll(&mut self) -> Option<TransportCommand>;
}

impl TransportEvents for crossbeam_channel::Receiver<TransportCommand> {
    fn poll(&mut self) -> Option<TransportCommand> {
        self.try_recv().ok()
    }
}

/// Pause and seek state of a feed
#[derive(Debug, Default, Clone)]
pub struct PlaybackState {
    paused: bool,

    /// Last time a paused frame was served
    last_paused: Option<Instant>,

    /// Seconds to move both clocks by on the next read
    pending_seek: f64,
}

impl PlaybackState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    /// Queue a relative seek; repeated requests accumulate
    pub fn request_seek(&mut self, seconds: f64) {
        self.pending_seek += seconds;
    }

    /// Take the accumulated seek, if any
    pub fn take_seek(&mut self) -> Option<f64> {
        let seek = std::mem::take(&mut self.pending_seek);
        (seek != 0.0).then_some(seek)
    }

    /// Record that a paused frame was served at `now`
    pub fn mark_paused(&mut self, now: Instant) {
        self.last_paused = Some(now);
    }

    /// Whether the play icon should still be drawn at `now`
    pub fn play_icon_visible(&self, now: Instant) -> bool {
        self.last_paused
            .map_or(false, |at| now.saturating_duration_since(at) < PLAY_ICON_DURATION)
    }

    /// Apply one transport command
    pub fn apply(&mut self, command: TransportCommand, seek_step: f64) {
        match command {
            TransportCommand::TogglePause => {
                self.toggle_pause();
            }
            TransportCommand::SeekForward => self.request_seek(seek_step),
            TransportCommand::SeekBackward => self.request_seek(-seek_step),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_requests_accumulate() {
        let mut state = PlaybackState::new();
        assert_eq!(state.take_seek(), None);

        state.apply(TransportCommand::SeekForward, 10.0);
        state.apply(TransportCommand::SeekForward, 10.0);
        state.apply(TransportCommand::SeekBackward, 10.0);
        assert_eq!(state.take_seek(), Some(10.0));
        assert_eq!(state.take_seek(), None);
    }

    #[test]
    fn test_play_icon_window() {
        let mut state = PlaybackState::new();
        let start = Instant::now();
        assert!(!state.play_icon_visible(start));

        state.mark_paused(start);
        assert!(state.play_icon_visible(start + Duration::from_secs(4)));
        assert!(!state.play_icon_visible(start + PLAY_ICON_DURATION));
    }

    #[test]
    fn test_channel_transport() {
        let (tx, mut rx) = crossbeam_channel::unbounded();
        assert_eq!(rx.poll(), None);

        tx.send(TransportCommand::TogglePause).unwrap();
        assert_eq!(rx.poll(), Some(TransportCommand::TogglePause));

        let mut state = PlaybackState::new();
        state.apply(TransportCommand::TogglePause, 10.0);
        assert!(state.is_paused());
    }
}
