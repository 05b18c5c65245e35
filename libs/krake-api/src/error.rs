use std::fmt;

/// Error kind for storage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Read/write against the backing resource failed.
    Io,
    /// The backing resource could not be created or reached.
    Unavailable,
    /// Position/length outside the segment capacity.
    OutOfBounds,
    /// The segment was closed and rejects writes.
    Closed,
    /// Invalid storage configuration.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Unavailable => f.write_str("unavailable"),
            ErrorKind::OutOfBounds => f.write_str("out of bounds"),
            ErrorKind::Closed => f.write_str("closed"),
            ErrorKind::Config => f.write_str("config"),
        }
    }
}

/// Storage error, returned by all `SegmentStorage` and `StorageFactory` methods.
#[derive(Debug, Clone)]
pub struct StorageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Unavailable, message: msg.into() }
    }

    pub fn out_of_bounds(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::OutOfBounds, message: msg.into() }
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Closed, message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_context_keeps_kind() {
        let err = StorageError::unavailable("disk gone").with_context("open segment");
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(err.message, "open segment: disk gone");
        assert_eq!(err.to_string(), "[unavailable] open segment: disk gone");
    }

    #[test]
    fn io_error_maps_to_io_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: StorageError = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
