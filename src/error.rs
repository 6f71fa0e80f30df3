use thiserror::Error;

/// Errors that can occur when using the failover-llm library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Provider error: {provider} - {message}")]
    Provider { provider: String, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Streaming error: {0}")]
    Streaming(String),

    #[error("All {attempts} primary API key(s) failed, last error: {last}")]
    KeysExhausted { attempts: usize, last: Box<Error> },
}

impl Error {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn streaming(message: impl Into<String>) -> Self {
        Error::Streaming(message.into())
    }

    pub fn keys_exhausted(attempts: usize, last: Error) -> Self {
        Error::KeysExhausted {
            attempts,
            last: Box::new(last),
        }
    }

    /// Whether this error means every primary API key was tried and failed.
    pub fn is_keys_exhausted(&self) -> bool {
        matches!(self, Error::KeysExhausted { .. })
    }
}
