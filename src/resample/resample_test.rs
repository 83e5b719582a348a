use super::*;
use crate::writer::Pcm16FrameWriter;
use crate::writer::{WriteCloser, Writer};

#[test]
fn test_same_rate_passthrough() {
    let sink = Pcm16FrameWriter::new(8000);
    let mut w = resample_writer(Box::new(sink.clone()), 8000);
    w.write_sample(&[1, 2, 3]).unwrap();
    assert_eq!(sink.frames(), vec![vec![1, 2, 3]]);
}

#[test]
fn test_upsample_doubles_output() {
    let sink = Pcm16FrameWriter::new(16000);
    let mut w = resample_writer(Box::new(sink.clone()), 8000);
    assert_eq!(w.sample_rate(), 8000);

    w.write_sample(&[0, 100]).unwrap();
    w.write_sample(&[200, 300]).unwrap();
    w.write_sample(&[400, 500]).unwrap();
    w.close().unwrap();

    let total: usize = sink.frames().iter().map(|f| f.len()).sum();
    // 6 input samples at a 1:2 ratio, within one sample of startup skew.
    assert!((11..=13).contains(&total), "got {total} samples");

    // Interpolated output must stay within the input range and be
    // monotonic for a monotonic ramp.
    let flat: Vec<i16> = sink.frames().concat();
    for pair in flat.windows(2) {
        assert!(pair[1] >= pair[0], "non-monotonic output: {flat:?}");
    }
    assert!(*flat.last().unwrap() <= 500);
}

#[test]
fn test_downsample_halves_output() {
    let sink = Pcm16FrameWriter::new(8000);
    let mut w = resample_writer(Box::new(sink.clone()), 16000);

    for _ in 0..4 {
        w.write_sample(&[10; 16]).unwrap();
    }
    let total: usize = sink.frames().iter().map(|f| f.len()).sum();
    assert!((31..=33).contains(&total), "got {total} samples");
    assert!(sink.frames().concat().iter().all(|&v| v == 10));
}
