/// Result alias that carries the custom [`ConnectorError`] type.
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// Free-form failure raised by a collaborator, usually a spectrum source.
    #[error("{0}")]
    Message(String),
    /// Input that can never be processed, regardless of state.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// A spectrum source was rejected at configuration time.
    #[error("invalid spectrum source: {0}")]
    InvalidSource(String),
    /// Configuration values outside of their accepted ranges.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration files that fail to parse.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// The FFT backend refused a buffer.
    #[error("fft failure: {0}")]
    Fft(String),
    /// A shared lock was poisoned by a panicking holder.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
}

impl ConnectorError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for ConnectorError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for ConnectorError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<realfft::FftError> for ConnectorError {
    fn from(value: realfft::FftError) -> Self {
        Self::Fft(value.to_string())
    }
}
