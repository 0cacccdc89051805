//! Error types shared across the Foreman crates.

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, ForemanError>;

/// Main error type for configuration and core plumbing.
#[derive(Debug, thiserror::Error)]
pub enum ForemanError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ForemanError {
    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Check if this is a config error
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
