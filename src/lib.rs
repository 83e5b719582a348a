#![warn(rust_2018_idioms)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod jitter;
pub mod mixer;
pub mod opus;
pub mod resample;
pub mod ring;
pub mod rtp;
pub mod switch;
pub mod writer;

use std::time::Duration;

pub use error::{Error, Result};
pub use frame::Frame;
pub use switch::SwitchWriter;
pub use writer::{FrameWriter, Pcm16Writer, WriteCloser, Writer};

/// Default duration of an audio frame.
pub const DEF_FRAME_DUR: Duration = Duration::from_millis(20);
/// Default number of audio frames per second.
pub const DEF_FRAMES_PER_SEC: u32 = 50;
