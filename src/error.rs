use crate::context::ContextId;
use crate::types::DType;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CudexError>;

/// Unified error type for buffer construction and the transfer protocol.
///
/// Transfer operations fail whole: an error from `serialize` or `rebuild`
/// means no buffer was produced and nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum CudexError {
    /// An append or extend asked for more room than the buffer has left.
    #[error("capacity exceeded: need room for {needed} more elements, {available} available")]
    Capacity { needed: usize, available: usize },

    /// A construction-time guard on incoming bytes failed.
    #[error("buffer sentry rejected input: {0}")]
    Sentry(String),

    /// Indexing past either end of the logical contents.
    #[error("index {index} out of bounds for buffer of {len} elements")]
    IndexOutOfBounds { index: isize, len: usize },

    /// The element type cannot take part in the requested operation.
    #[error("unsupported dtype {dtype} for {op}")]
    UnsupportedDType { dtype: DType, op: &'static str },

    /// A rebuild arrived in the context that produced the transfer.
    #[error("rebuild of a transfer inside its own device context {context} is a protocol violation")]
    SameContext { context: ContextId },

    /// A peer asked for a key the export cache has never seen.
    #[error("key {key:#018x} is not present in the export cache")]
    KeyNotExported { key: u64 },

    /// The received memory handle could not be mapped into this context.
    #[error("failed to open IPC memory handle: {reason}")]
    HandleOpen { reason: String },

    /// Network-level failure talking to a peer channel.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Incoming bytes did not decode as a protocol message.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// A protocol message could not be serialized.
    #[error("encode failed: {0}")]
    EncodeFailed(String),

    /// Device allocation or copy failure.
    #[error("device error: {message}")]
    Device {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Plain I/O failure outside the framed transport path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A cache mutex was poisoned by a panicking holder.
    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl CudexError {
    /// Transport error from a plain message.
    pub fn transport(message: impl Into<String>) -> Self {
        CudexError::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Transport error wrapping an underlying cause.
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        CudexError::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Device error from a plain message.
    pub fn device(message: impl Into<String>) -> Self {
        CudexError::Device {
            message: message.into(),
            source: None,
        }
    }

    /// Device error wrapping an underlying cause.
    pub fn device_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        CudexError::Device {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
