//! Consumer error types.

use thiserror::Error;
use weft_registry::RegistryError;

use crate::producer::ProducerError;

/// Result type for consumer operations.
pub type ConsumerResult<T> = Result<T, ConsumerError>;

/// Errors that can occur running a consumer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// The metadata source returned nothing for the subscribed topics.
    #[error("no metadata for subscribed topics")]
    NoMetadata,

    /// A group registry operation failed.
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    /// A producer operation failed.
    #[error("producer: {0}")]
    Producer(#[from] ProducerError),

    /// The configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        message: String,
    },

    /// The background consume task is gone.
    #[error("consumer has shut down")]
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConsumerError::InvalidConfig {
            message: "no topics".into(),
        };
        assert!(err.to_string().contains("no topics"));

        let err = ConsumerError::Registry(RegistryError::Closed);
        assert!(err.to_string().contains("closed"));
    }
}
