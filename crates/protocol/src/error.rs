//! Protocol error types

use thiserror::Error;

/// Errors raised while decoding UVC wire structures
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Buffer too small for operation
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Event type outside the UVC private event range
    #[error("Unknown UVC event type: {0:#010x}")]
    UnknownEvent(u32),

    /// Request data length outside the 60-byte payload area
    #[error("Invalid request data length: {0}")]
    InvalidLength(i32),

    /// I/O error while reading or writing a structure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::BufferTooSmall {
            needed: 34,
            available: 2,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Buffer too small"));
        assert!(msg.contains("34"));
    }

    #[test]
    fn test_unknown_event_display() {
        let err = ProtocolError::UnknownEvent(0x0800_0010);
        assert_eq!(format!("{}", err), "Unknown UVC event type: 0x08000010");
    }
}
