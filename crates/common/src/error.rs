//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Device error: {0}")]
    Device(String),

    #[error("{request} failed: {source}")]
    Ioctl {
        request: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Buffer error: {0}")]
    Buffer(String),

    #[error("Insufficient buffers: {requested} requested, at least {minimum} required")]
    InsufficientBuffers { requested: u32, minimum: u32 },

    #[error("Format catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an OS error returned by a device ioctl
    pub fn ioctl(request: &'static str, source: impl Into<std::io::Error>) -> Self {
        Self::Ioctl {
            request,
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ioctl_error_display() {
        let err = Error::ioctl(
            "VIDIOC_REQBUFS",
            std::io::Error::from_raw_os_error(22),
        );
        let msg = format!("{}", err);
        assert!(msg.starts_with("VIDIOC_REQBUFS failed"));
    }

    #[test]
    fn test_insufficient_buffers_display() {
        let err = Error::InsufficientBuffers {
            requested: 1,
            minimum: 2,
        };
        assert_eq!(
            format!("{}", err),
            "Insufficient buffers: 1 requested, at least 2 required"
        );
    }
}
