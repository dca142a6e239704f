// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::result;

/// `Error` provides an enumeration of all possible errors reported by Remux.
#[derive(Debug)]
pub enum Error {
    /// An IO error occurred while reading from a source or writing to a target.
    IoError(Box<dyn error::Error + Send + Sync>),
    /// The stream contained malformed data and could not be demuxed.
    InvalidFormat(&'static str),
    /// A known, but unimplemented, codec identifier was encountered.
    UnsupportedCodec(&'static str),
    /// A muxer-side precondition was breached while writing a container.
    Encoding(&'static str),
    /// An operation was attempted on a demuxer whose source has been closed.
    Disposed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::IoError(ref err) => {
                write!(f, "io error: {}", err)
            }
            Error::InvalidFormat(msg) => {
                write!(f, "malformed stream: {}", msg)
            }
            Error::UnsupportedCodec(codec) => {
                write!(f, "unsupported codec: {}", codec)
            }
            Error::Encoding(msg) => {
                write!(f, "encoding error: {}", msg)
            }
            Error::Disposed => {
                write!(f, "the source has been disposed")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IoError(ref err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(Box::new(err))
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create an invalid format error.
pub fn invalid_format_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::InvalidFormat(desc))
}

/// Convenience function to create an unsupported codec error.
pub fn unsupported_codec_error<T>(codec: &'static str) -> Result<T> {
    Err(Error::UnsupportedCodec(codec))
}

/// Convenience function to create an encoding error.
pub fn encoding_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::Encoding(desc))
}

/// Convenience function to create a disposed error.
pub fn disposed_error<T>() -> Result<T> {
    Err(Error::Disposed)
}
