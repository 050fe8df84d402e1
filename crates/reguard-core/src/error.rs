use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to change protection of {len:#x} bytes at {address:#x}: {message}")]
    ProtectionChangeFailed {
        address: u64,
        len: usize,
        message: String,
    },

    #[error("Failed to decode instruction at {0:#x}")]
    DecodeFailure(u64),

    #[error("Tamper detected at {address:#x}: {mismatched} of {compared} bytes differ")]
    TamperDetected {
        address: u64,
        mismatched: usize,
        compared: usize,
    },

    #[error("Failed to read process memory at address {address:#x}: {message}")]
    MemoryReadFailed { address: u64, message: String },

    #[error("Failed to write process memory at address {address:#x}: {message}")]
    MemoryWriteFailed { address: u64, message: String },

    #[error("Failed to allocate {0:#x} bytes")]
    AllocationFailed(usize),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Failed to install hook at {address:#x}: {message}")]
    HookFailed { address: u64, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error means "the thing we looked for is not there"
    /// rather than a real failure. Covers missing files too.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        assert!(Error::Io(io_err).is_not_found());
        assert!(Error::not_found("pattern").is_not_found());

        let other_io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(!Error::Io(other_io_err).is_not_found());
        assert!(!Error::DecodeFailure(0x1000).is_not_found());
    }

    #[test]
    fn test_error_messages_include_addresses() {
        let err = Error::ProtectionChangeFailed {
            address: 0x140001000,
            len: 6,
            message: "denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to change protection of 0x6 bytes at 0x140001000: denied"
        );
    }
}
