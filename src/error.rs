use std::io;
use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("short buffer")]
    ErrShortBuffer,
    #[error("header size insufficient")]
    ErrHeaderSizeInsufficient,
    #[error("buffer too small for payload")]
    ErrBufferTooSmall,
    #[error("RTP header version must be 2")]
    ErrBadVersion,
    #[error("only mono audio is supported")]
    ErrUnsupportedChannels,
    #[error("writer is closed")]
    ErrClosed,
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("{0}")]
    Io(#[source] IoError),

    #[error("{0}")]
    Other(String),
}

// io::Error is neither Clone nor PartialEq; wrap it so close results can be
// replayed and tests can compare errors.
#[derive(Debug, Error, Clone)]
#[error("io error: {0}")]
pub struct IoError(pub Arc<io::Error>);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(Arc::new(e)))
    }
}
