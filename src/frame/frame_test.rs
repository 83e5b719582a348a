use bytes::Bytes;

use super::*;

#[test]
fn test_pcm16_copy_to() {
    let samples: &[i16] = &[1, -1, 0x1234];
    assert_eq!(samples.size(), 6);

    let mut dst = [0u8; 6];
    let n = samples.copy_to(&mut dst).unwrap();
    assert_eq!(n, 6);
    assert_eq!(dst, [0x01, 0x00, 0xff, 0xff, 0x34, 0x12]);
}

#[test]
fn test_pcm16_short_buffer() {
    let samples: &[i16] = &[1, 2, 3];
    let mut dst = [0xaau8; 5];
    assert_eq!(samples.copy_to(&mut dst), Err(Error::ErrShortBuffer));
    // No partial copy.
    assert_eq!(dst, [0xaa; 5]);
}

#[test]
fn test_bytes_copy_to() {
    let frame = Bytes::from_static(&[9, 8, 7]);
    assert_eq!(frame.size(), 3);

    let mut dst = [0u8; 4];
    let n = frame.copy_to(&mut dst).unwrap();
    assert_eq!(n, 3);
    assert_eq!(&dst[..3], &[9, 8, 7]);

    let mut short = [0u8; 2];
    assert_eq!(frame.copy_to(&mut short), Err(Error::ErrShortBuffer));
}
