use thiserror::Error;

pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";

#[derive(Debug, Error)]
pub enum GenerationError {
    /// A required request field is missing or malformed.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    UnsupportedModel(String),
    /// A provider credential or registration is missing.
    #[error("{0}")]
    Configuration(String),
    #[error("No image data received from API")]
    NoImageData,
    /// The upstream call failed: transport, HTTP status, or payload.
    #[error("{0}")]
    Vendor(anyhow::Error),
    #[error("{0}")]
    Internal(anyhow::Error),
}

impl GenerationError {
    pub fn status_code(&self) -> u16 {
        match self {
            GenerationError::Validation(_) | GenerationError::UnsupportedModel(_) => 400,
            GenerationError::Configuration(_)
            | GenerationError::NoImageData
            | GenerationError::Vendor(_)
            | GenerationError::Internal(_) => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }

    /// Message returned to callers; never empty.
    pub fn public_message(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            return UNKNOWN_ERROR_MESSAGE.to_string();
        }
        message
    }
}
