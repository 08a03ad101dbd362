//! Error types for offset request processing.
//!
//! All errors implement the `std::error::Error` trait and carry structured
//! context. Note the split the library makes between construction-time
//! errors and runtime exchange failures:
//!
//! - Building a [`crate::Request`] with a bad offset or size fails
//!   synchronously with a [`LinkError`] and never yields a partially built
//!   request.
//! - A failed batch exchange is *not* an `Err`. It surfaces as a
//!   [`crate::ProcessingResult`] (and, for continual processing, through
//!   `on_fail`), because one failed round trip is local to that call and
//!   never invalidates the queue itself.
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use flightdeck::LinkError;
//!
//! let error = LinkError::NotConnected;
//! if error.is_retryable() {
//!     println!("Can retry after reconnecting");
//! }
//! ```

use thiserror::Error;

use crate::transport::IpcResult;

/// Result type alias for flightdeck operations.
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

/// Main error type for offset request operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("Offset {offset:#06x} outside the supported offset space")]
    OffsetOutOfRange { offset: u32 },

    #[error("Invalid buffer size {size} for request construction")]
    InvalidSize { size: usize },

    #[error("Type conversion error: {details}")]
    TypeConversion { details: String },

    #[error("Not connected to the simulator")]
    NotConnected,

    #[error("Continual processing is already running")]
    AlreadyRunning,

    #[error("No continual requests registered, nothing to process")]
    NothingToProcess,

    #[error("Transport failure: {result}")]
    Transport { result: IpcResult },

    #[error("Buffer resize not supported: {details}")]
    BufferResize { details: String },
}

impl LinkError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::NotConnected => true,
            LinkError::Transport { result } => result.is_connection_loss(),
            LinkError::OffsetOutOfRange { .. } => false,
            LinkError::InvalidSize { .. } => false,
            LinkError::TypeConversion { .. } => false,
            LinkError::AlreadyRunning => false,
            LinkError::NothingToProcess => false,
            LinkError::BufferResize { .. } => false,
        }
    }

    /// Helper constructor for type conversion errors.
    pub fn type_conversion(details: impl Into<String>) -> Self {
        LinkError::TypeConversion { details: details.into() }
    }

    /// Helper constructor for transport-level failures.
    pub fn transport(result: IpcResult) -> Self {
        LinkError::Transport { result }
    }

    /// Helper constructor for buffer resize errors.
    pub fn buffer_resize(details: impl Into<String>) -> Self {
        LinkError::BufferResize { details: details.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(test)]
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn error_messages_format_correctly_with_arbitrary_context(
                offset in 0u32..0x8000_0000u32,
                size in 0usize..0x1_0000usize,
                details in ".*"
            ) {
                let offset_err = LinkError::OffsetOutOfRange { offset };
                let size_err = LinkError::InvalidSize { size };
                let conv_err = LinkError::type_conversion(details.clone());

                let offset_msg = offset_err.to_string();
                let expected_offset = format!("{offset:#06x}");
                prop_assert!(offset_msg.contains(&expected_offset));

                let size_msg = size_err.to_string();
                prop_assert!(size_msg.contains(&size.to_string()));

                let conv_msg = conv_err.to_string();
                prop_assert!(conv_msg.contains(&details));

                prop_assert!(!offset_msg.is_empty());
                prop_assert!(!size_msg.is_empty());
                prop_assert!(!conv_msg.is_empty());
            }

            #[test]
            fn construction_errors_are_never_retryable(
                offset in 0u32..u32::MAX,
                size in 0usize..usize::MAX
            ) {
                let offset_err = LinkError::OffsetOutOfRange { offset };
                let size_err = LinkError::InvalidSize { size };
                prop_assert!(!offset_err.is_retryable());
                prop_assert!(!size_err.is_retryable());
            }
        }
    }

    #[test]
    fn error_traits_validation() {
        // Compile-time check: LinkError must be Send + Sync + 'static
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<LinkError>();

        let error = LinkError::NotConnected;
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn retryability_classification() {
        assert!(LinkError::NotConnected.is_retryable());
        assert!(LinkError::transport(IpcResult::SendMessage).is_retryable());
        assert!(!LinkError::transport(IpcResult::BadData).is_retryable());
        assert!(!LinkError::AlreadyRunning.is_retryable());
        assert!(!LinkError::NothingToProcess.is_retryable());
        assert!(!LinkError::buffer_resize("fixed width").is_retryable());
    }
}
