use thiserror::Error;

use crate::result::ErrorCode;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    InvalidInput(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("{0}")]
    InvalidFormat(String),

    #[error("{0}")]
    Provider(String),

    #[error("{0}")]
    Network(String),

    #[error("{0}")]
    Api(String),

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MediaError {
    /// The envelope error code this failure is reported under.
    pub fn code(&self) -> ErrorCode {
        match self {
            MediaError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorCode::FileNotFound,
            MediaError::FileNotFound(_) => ErrorCode::FileNotFound,
            MediaError::InvalidInput(_) => ErrorCode::InvalidInput,
            MediaError::InvalidFormat(_) => ErrorCode::InvalidFormat,
            MediaError::Image(image::ImageError::Unsupported(_)) => ErrorCode::InvalidFormat,
            MediaError::Image(image::ImageError::Decoding(_)) => ErrorCode::InvalidFormat,
            MediaError::Http(_) | MediaError::Network(_) => ErrorCode::NetworkError,
            MediaError::Api(_) => ErrorCode::ApiError,
            MediaError::Io(_)
            | MediaError::Json(_)
            | MediaError::Toml(_)
            | MediaError::Image(_)
            | MediaError::Provider(_)
            | MediaError::Media(_)
            | MediaError::Inference(_)
            | MediaError::Config(_) => ErrorCode::ProviderError,
        }
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let missing = MediaError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(missing.code(), ErrorCode::FileNotFound);

        let denied = MediaError::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no"));
        assert_eq!(denied.code(), ErrorCode::ProviderError);

        assert_eq!(MediaError::Api("500".into()).code(), ErrorCode::ApiError);
        assert_eq!(MediaError::Network("down".into()).code(), ErrorCode::NetworkError);
        assert_eq!(MediaError::InvalidInput("x".into()).code(), ErrorCode::InvalidInput);
    }
}
