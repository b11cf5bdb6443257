use std::io;

use jobj_stream::StreamError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobjError {
    /// Generic I/O error while reading the input
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// Error reported by the stream decoder
    #[error(transparent)]
    StreamError(#[from] StreamError),
}
