use thiserror::Error;

/// Problems with the startup configuration. These are fatal and are reported
/// before the conversation loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("API key must be provided via --key or the OPENAI_API_KEY environment variable")]
    MissingApiKey,

    #[error("failed to load environment file {path}: {reason}")]
    EnvFile { path: String, reason: String },

    #[error("{name} must be within {min}..={max}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
}

/// Failures of a single request to the remote completion service.
///
/// None of these end the conversation; the loop reports them and waits for
/// the next line of input.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("authentication rejected (status {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("rate limited (status {status}): {message}")]
    RateLimited { status: u16, message: String },

    #[error("API request failed with code {code}: {message}")]
    Api { code: String, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}
