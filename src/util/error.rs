//! Error types for the prism device.

use thiserror::Error;

use super::DataType;

/// Main error type for device operations.
///
/// Only conditions the caller must react to are errors. Recoverable
/// problems (missing parameters, protocol misuse) are reported through the
/// status callback and leave the object alive but invalid.
#[derive(Error, Debug)]
pub enum Error {
    /// Stored value has a different type than requested
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: DataType, actual: DataType },

    /// Parameter was set internally and cannot be read through the typed accessor
    #[error("Parameter '{0}' is not locally readable")]
    NotLocallyReadable(String),

    /// Parameter not found by name
    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),

    /// Type tag outside the registry
    #[error("Unknown data type: {0}")]
    UnknownType(String),

    /// Array strides that do not describe densely packed memory
    #[error("Unsupported array layout: stride {stride} for {element} (size {element_size})")]
    UnsupportedLayout {
        element: DataType,
        element_size: usize,
        stride: u64,
    },

    /// Handle does not name a live object
    #[error("Invalid object handle: {0}")]
    InvalidHandle(u64),

    /// Handle names an object of another kind
    #[error("Wrong object kind: expected {expected}, got {actual}")]
    WrongObjectKind { expected: DataType, actual: DataType },

    /// Subtype string not implemented for this object kind
    #[error("Unknown {kind} subtype '{subtype}'")]
    UnknownSubtype { kind: DataType, subtype: String },

    /// Memory for an array or frame buffer could not be reserved
    #[error("Allocation of {0} bytes failed")]
    AllocationFailed(usize),

    /// Argument outside the accepted domain
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid argument error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn mismatch(expected: DataType, actual: DataType) -> Self {
        Self::TypeMismatch { expected, actual }
    }
}

/// Result type alias for device operations.
pub type Result<T> = std::result::Result<T, Error>;
