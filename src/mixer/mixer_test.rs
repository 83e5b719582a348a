use std::sync::atomic::Ordering;
use std::time::Duration;

use super::*;
use crate::writer::Pcm16FrameWriter;

const TICK: Duration = Duration::from_millis(10);
const RATE: u32 = 8000;
const FRAME: usize = 80; // RATE * TICK

fn non_zero_frames(frames: &[Vec<i16>]) -> Vec<Vec<i16>> {
    frames
        .iter()
        .filter(|f| f.iter().any(|&v| v != 0))
        .cloned()
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mixer_passthrough_and_starvation() {
    let sink = Pcm16FrameWriter::new(RATE);
    let m = Mixer::new(Box::new(sink.clone()), TICK, 1, MixerOptions::default()).unwrap();

    let mut input = m.new_input().unwrap();
    // Fill the input to capacity: 5 frames of a constant value.
    for _ in 0..DEFAULT_INPUT_BUFFER_FRAMES {
        input.write_sample(&[100i16; FRAME]).unwrap();
    }

    tokio::time::sleep(TICK * 12).await;
    m.stop();

    let frames = sink.frames();
    assert!(frames.len() >= DEFAULT_INPUT_BUFFER_FRAMES, "too few ticks");
    assert!(frames.iter().all(|f| f.len() == FRAME));

    // The buffered input plays back verbatim, then the mixer emits
    // silence once the input starves.
    let played = non_zero_frames(&frames);
    assert_eq!(played.len(), DEFAULT_INPUT_BUFFER_FRAMES);
    assert!(played.iter().all(|f| f == &vec![100i16; FRAME]));

    let stats = m.stats();
    assert_eq!(
        stats.output_samples.load(Ordering::SeqCst),
        stats.output_frames.load(Ordering::SeqCst) * FRAME as u64,
    );
    assert_eq!(
        stats.mixed_samples.load(Ordering::SeqCst),
        (DEFAULT_INPUT_BUFFER_FRAMES * FRAME) as u64,
    );
    // Consuming past the buffered data puts the input back in buffering.
    assert!(stats.restarts.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mixer_sums_and_clamps() {
    let sink = Pcm16FrameWriter::new(RATE);
    let m = Mixer::new(Box::new(sink.clone()), TICK, 1, MixerOptions::default()).unwrap();

    let mut a = m.new_input().unwrap();
    let mut b = m.new_input().unwrap();
    for _ in 0..DEFAULT_INPUT_BUFFER_FRAMES {
        a.write_sample(&[20000i16; FRAME]).unwrap();
        b.write_sample(&[20000i16; FRAME]).unwrap();
    }

    tokio::time::sleep(TICK * 10).await;
    m.stop();

    // 20000 + 20000 overflows i16 and must clamp.
    let played = non_zero_frames(&sink.frames());
    assert_eq!(played.len(), DEFAULT_INPUT_BUFFER_FRAMES);
    assert!(played.iter().all(|f| f == &vec![0x7FFFi16; FRAME]));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mixer_sums_without_clamp() {
    let sink = Pcm16FrameWriter::new(RATE);
    let m = Mixer::new(Box::new(sink.clone()), TICK, 1, MixerOptions::default()).unwrap();

    let mut a = m.new_input().unwrap();
    let mut b = m.new_input().unwrap();
    for _ in 0..DEFAULT_INPUT_BUFFER_FRAMES {
        a.write_sample(&[1000i16; FRAME]).unwrap();
        b.write_sample(&[234i16; FRAME]).unwrap();
    }

    tokio::time::sleep(TICK * 10).await;
    m.stop();

    let played = non_zero_frames(&sink.frames());
    assert_eq!(played.len(), DEFAULT_INPUT_BUFFER_FRAMES);
    assert!(played.iter().all(|f| f == &vec![1234i16; FRAME]));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_input_overflow_drops_oldest() {
    let sink = Pcm16FrameWriter::new(RATE);
    let m = Mixer::new(Box::new(sink.clone()), TICK, 1, MixerOptions::default()).unwrap();

    let mut input = m.new_input().unwrap();
    // Twice the ring capacity: half of the frames must be dropped, and
    // the producer must never block or fail.
    for _ in 0..DEFAULT_INPUT_BUFFER_FRAMES * 2 {
        input.write_sample(&[1i16; FRAME]).unwrap();
    }

    let stats = m.stats();
    assert_eq!(
        stats.input_frames.load(Ordering::SeqCst),
        (DEFAULT_INPUT_BUFFER_FRAMES * 2) as u64,
    );
    assert_eq!(
        stats.input_frames_dropped.load(Ordering::SeqCst),
        DEFAULT_INPUT_BUFFER_FRAMES as u64,
    );
    assert_eq!(
        stats.input_samples_dropped.load(Ordering::SeqCst),
        (DEFAULT_INPUT_BUFFER_FRAMES * FRAME) as u64,
    );
    m.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_buffering_input_stays_silent() {
    let sink = Pcm16FrameWriter::new(RATE);
    let m = Mixer::new(Box::new(sink.clone()), TICK, 1, MixerOptions::default()).unwrap();

    let mut input = m.new_input().unwrap();
    // One frame is below the buffering threshold; it must not play yet.
    input.write_sample(&[55i16; FRAME]).unwrap();

    tokio::time::sleep(TICK * 6).await;
    m.stop();

    assert!(non_zero_frames(&sink.frames()).is_empty());
    assert_eq!(m.stats().mixed_frames.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_output_channel_mode() {
    let sink = Pcm16FrameWriter::new(RATE);
    let m = Mixer::new(
        Box::new(sink.clone()),
        TICK,
        1,
        MixerOptions {
            output_channel_size: Some(1),
            ..Default::default()
        },
    )
    .unwrap();

    let mut input = m.new_input().unwrap();
    for _ in 0..DEFAULT_INPUT_BUFFER_FRAMES {
        input.write_sample(&[7i16; FRAME]).unwrap();
    }

    tokio::time::sleep(TICK * 12).await;
    m.stop();

    let played = non_zero_frames(&sink.frames());
    assert_eq!(played.len(), DEFAULT_INPUT_BUFFER_FRAMES);
    assert!(played.iter().all(|f| f == &vec![7i16; FRAME]));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mixer_rejects_stereo() {
    let sink = Pcm16FrameWriter::new(RATE);
    let res = Mixer::new(Box::new(sink), TICK, 2, MixerOptions::default());
    assert!(res.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_inputs_after_stop() {
    let sink = Pcm16FrameWriter::new(RATE);
    let m = Mixer::new(Box::new(sink), TICK, 1, MixerOptions::default()).unwrap();

    let input = m.new_input().unwrap();
    assert_eq!(m.stats().tracks.load(Ordering::SeqCst), 1);

    let mut handle = input.clone();
    handle.close().unwrap();
    assert_eq!(m.stats().tracks.load(Ordering::SeqCst), 0);

    m.stop();
    assert!(m.new_input().is_none());
}
