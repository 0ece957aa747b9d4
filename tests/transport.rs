//! Pause, seek and close behaviour of the pull API

mod common;

use std::sync::Arc;

use anyhow::Result;
use avfeed::{MediaFeed, MediaIcon, TransportCommand};

use common::*;

fn frame_value(feed: &mut MediaFeed) -> Option<u32> {
    feed.read_video().map(|frame| frame.pixels()[0])
}

#[test]
fn test_pause_reserves_front_frame() -> Result<()> {
    let drops = DropCounter::default();
    let video: Vec<i64> = (0..10).collect();
    let source = ScriptedDemuxer::new(interleave(&video, &[0, 40, 80]), drops.clone());

    let (commands, events) = crossbeam_channel::unbounded();
    let overlay = Arc::new(RecordingOverlay::default());

    let mut feed = MediaFeed::builder(Box::new(source), &test_config())
        .video(video_stream(&drops))
        .audio(audio_stream(&drops))
        .overlay(overlay.clone())
        .transport(Box::new(events))
        .open()?;

    assert_eq!(frame_value(&mut feed), Some(0));
    assert!(overlay.icons.lock().is_empty());

    let before = feed.read_audio().map(|block| block.samples().to_vec());
    assert_eq!(before, Some(vec![1; 40]));

    commands.send(TransportCommand::TogglePause)?;
    assert_eq!(frame_value(&mut feed), Some(0));
    assert!(feed.is_paused());
    assert_eq!(frame_value(&mut feed), Some(0));
    assert_eq!(*overlay.icons.lock(), vec![MediaIcon::Pause, MediaIcon::Pause]);

    // Paused audio reads leave the stream alone
    assert!(feed.read_audio().is_none());
    assert!(!feed.eof());

    assert!(!feed.toggle_pause());
    assert_eq!(frame_value(&mut feed), Some(1));
    assert_eq!(overlay.icons.lock().last(), Some(&MediaIcon::Play));

    // Audio resumes exactly where it stopped
    let mut after = Vec::new();
    while let Some(block) = feed.read_audio() {
        after.push(block.samples().to_vec());
    }
    assert_eq!(after, vec![vec![2; 40], vec![3; 40]]);

    feed.close();
    assert_eq!(drops.count(), 3);
    Ok(())
}

#[test]
fn test_audio_only_feed_polls_transport() -> Result<()> {
    let drops = DropCounter::default();
    let source = ScriptedDemuxer::new(interleave(&[], &[0, 40, 80]), drops.clone());

    let (commands, events) = crossbeam_channel::unbounded();
    let mut feed = MediaFeed::builder(Box::new(source), &test_config())
        .audio(audio_stream(&drops))
        .transport(Box::new(events))
        .open()?;

    assert!(feed.read_video().is_none());

    commands.send(TransportCommand::TogglePause)?;
    assert!(feed.read_audio().is_none());
    assert!(feed.is_paused());

    commands.send(TransportCommand::TogglePause)?;
    let mut blocks = 0;
    while feed.read_audio().is_some() {
        blocks += 1;
    }

    assert_eq!(blocks, 3);
    assert!(feed.eof());
    feed.close();
    Ok(())
}

#[test]
fn test_seek_forward_skips_frames() -> Result<()> {
    let drops = DropCounter::default();
    let video: Vec<i64> = (0..20).collect();
    let source = ScriptedDemuxer::new(interleave(&video, &[]), drops.clone());

    let mut feed = MediaFeed::builder(Box::new(source), &test_config())
        .video(video_stream(&drops))
        .open()?;

    let mut seen = vec![frame_value(&mut feed).unwrap_or_default()];

    // Five frames at 25 fps
    feed.seek(0.2);
    while let Some(value) = frame_value(&mut feed) {
        seen.push(value);
    }

    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(seen.len() < 20);
    assert_eq!(seen.last(), Some(&19));

    feed.close();
    Ok(())
}

#[test]
fn test_close_joins_blocked_workers() -> Result<()> {
    let drops = DropCounter::default();
    let video: Vec<i64> = (0..200).collect();
    let audio: Vec<i64> = (0..200).map(|i| i * 40).collect();
    let source = ScriptedDemuxer::new(interleave(&video, &audio), drops.clone());

    let mut feed = MediaFeed::builder(Box::new(source), &test_config())
        .video(video_stream(&drops))
        .audio(audio_stream(&drops))
        .open()?;

    assert_eq!(frame_value(&mut feed), Some(0));

    // Every worker is now parked on a full slot or queue
    feed.close();
    assert_eq!(drops.count(), 3);
    Ok(())
}

#[test]
fn test_dropping_feed_shuts_down() -> Result<()> {
    let drops = DropCounter::default();
    let video: Vec<i64> = (0..50).collect();
    let source = ScriptedDemuxer::new(interleave(&video, &[]), drops.clone());

    let feed = MediaFeed::builder(Box::new(source), &test_config())
        .video(video_stream(&drops))
        .open()?;

    drop(feed);
    assert_eq!(drops.count(), 2);
    Ok(())
}
