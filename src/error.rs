//! Error types for attune.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttuneError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    // Client channel errors
    #[error("Client transport failed: {message}")]
    Transport { message: String },

    #[error("Malformed client message: {message}")]
    MalformedMessage { message: String },

    // External service errors
    #[error("Transcription service unavailable: {message}")]
    SttUnavailable { message: String },

    #[error("Language model unavailable: {message}")]
    LlmUnavailable { message: String },

    #[error("Circuit open for operation '{operation}'")]
    CircuitOpen { operation: String },

    // Pipeline errors
    #[error("Buffer overflow in {buffer}: dropped {dropped} item(s)")]
    BufferOverflow { buffer: String, dropped: usize },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    // Startup errors
    #[error("Failed to bind {endpoint}: {message}")]
    Bind { endpoint: String, message: String },

    // General I/O and serialization errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl AttuneError {
    /// Returns true for errors the pipeline absorbs without terminating
    /// anything (external services and buffer pressure).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AttuneError::Bind { .. })
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, AttuneError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_transport_display() {
        let error = AttuneError::Transport {
            message: "connection reset".to_string(),
        };
        assert_eq!(error.to_string(), "Client transport failed: connection reset");
    }

    #[test]
    fn test_malformed_message_display() {
        let error = AttuneError::MalformedMessage {
            message: "unknown tag 'ping'".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Malformed client message: unknown tag 'ping'"
        );
    }

    #[test]
    fn test_stt_unavailable_display() {
        let error = AttuneError::SttUnavailable {
            message: "handshake timed out".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Transcription service unavailable: handshake timed out"
        );
    }

    #[test]
    fn test_circuit_open_display() {
        let error = AttuneError::CircuitOpen {
            operation: "stt".to_string(),
        };
        assert_eq!(error.to_string(), "Circuit open for operation 'stt'");
    }

    #[test]
    fn test_buffer_overflow_display() {
        let error = AttuneError::BufferOverflow {
            buffer: "audio".to_string(),
            dropped: 1,
        };
        assert_eq!(
            error.to_string(),
            "Buffer overflow in audio: dropped 1 item(s)"
        );
    }

    #[test]
    fn test_invalid_input_display() {
        let error = AttuneError::InvalidInput {
            message: "profile id already exists".to_string(),
        };
        assert_eq!(error.to_string(), "Invalid input: profile id already exists");
    }

    #[test]
    fn test_bind_display() {
        let error = AttuneError::Bind {
            endpoint: "0.0.0.0:7861".to_string(),
            message: "address in use".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to bind 0.0.0.0:7861: address in use"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = AttuneError::ConfigInvalidValue {
            key: "silence_timeout_ms".to_string(),
            message: "must be at least 1000".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for silence_timeout_ms: must be at least 1000"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: AttuneError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let error: AttuneError = json_error.into();
        assert!(error.to_string().contains("JSON error"));
    }

    #[test]
    fn test_bind_is_fatal() {
        let error = AttuneError::Bind {
            endpoint: "0.0.0.0:7860".to_string(),
            message: "denied".to_string(),
        };
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_steady_state_errors_are_recoverable() {
        let errors = vec![
            AttuneError::Transport {
                message: "x".to_string(),
            },
            AttuneError::SttUnavailable {
                message: "x".to_string(),
            },
            AttuneError::CircuitOpen {
                operation: "llm".to_string(),
            },
            AttuneError::BufferOverflow {
                buffer: "retry".to_string(),
                dropped: 3,
            },
        ];
        for error in errors {
            assert!(error.is_recoverable(), "{error} should be recoverable");
        }
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<AttuneError>();
        assert_sync::<AttuneError>();
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }
}
