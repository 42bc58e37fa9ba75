// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::fmt;
use std::io;

/// PublisherError is the result of one attempt to deliver a batch
#[derive(Debug)]
pub enum PublisherError {
    /// Invalid publisher settings, reported at construction
    Config(String),

    /// Name resolution produced no usable address
    Resolve(String),

    /// TLS setup or handshake failure
    Tls(String),

    /// An operation did not finish before the per-attempt deadline
    Timeout(&'static str),

    Io(io::Error),
}

impl fmt::Display for PublisherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublisherError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            PublisherError::Resolve(msg) => write!(f, "Failed to resolve: {}", msg),
            PublisherError::Tls(msg) => write!(f, "TLS error: {}", msg),
            PublisherError::Timeout(op) => write!(f, "Timed out during {}", op),
            PublisherError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for PublisherError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PublisherError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PublisherError {
    fn from(e: io::Error) -> Self {
        PublisherError::Io(e)
    }
}
