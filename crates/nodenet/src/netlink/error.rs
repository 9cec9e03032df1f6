//! Netlink framing and socket errors.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// `NLMSG_ERROR` with a nonzero code; `errno` is positive.
    #[error("kernel error: {message} (errno {errno})")]
    Kernel { errno: i32, message: String },

    /// A header or fixed-size payload runs past the end of the buffer.
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("interface not found: {name}")]
    InterfaceNotFound { name: String },
}

impl Error {
    /// From the negative code carried by `NLMSG_ERROR`.
    pub fn from_errno(code: i32) -> Self {
        let errno = code.saturating_neg();
        Self::Kernel {
            errno,
            message: io::Error::from_raw_os_error(errno).to_string(),
        }
    }

    /// `ENOENT`, `ENODEV` or an unknown interface name.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Kernel { errno, .. } => *errno == libc::ENOENT || *errno == libc::ENODEV,
            Self::InterfaceNotFound { .. } => true,
            _ => false,
        }
    }

    /// Truncation or a malformed length, as opposed to a socket or kernel
    /// failure.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. } | Self::InvalidMessage(_) | Self::InvalidAttribute(_)
        )
    }

    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_errno() {
        let err = Error::from_errno(-19); // ENODEV
        assert!(err.is_not_found());
        assert_eq!(err.errno(), Some(19));
    }

    #[test]
    fn test_is_framing() {
        assert!(
            Error::Truncated {
                expected: 4,
                actual: 2
            }
            .is_framing()
        );
        assert!(!Error::from_errno(-1).is_framing());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::InterfaceNotFound {
            name: "eth0".into(),
        };
        assert_eq!(err.to_string(), "interface not found: eth0");

        let err = Error::Truncated {
            expected: 8,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "message truncated: expected 8 bytes, got 3"
        );
    }
}
