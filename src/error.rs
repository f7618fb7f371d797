use thiserror::Error;

/// Errors raised by translation stores and the entity overlay.
///
/// Only the write path produces these. Reads that find no record, no key or
/// an empty override fall back to the base value instead of failing.
#[derive(Debug, Error)]
pub enum TranslationError {
    /// A translation write was rejected before it reached storage.
    #[error("invalid translation {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// The configured table name is not a plain SQL identifier.
    #[error("invalid translations table name: '{0}'")]
    InvalidTable(String),

    /// The backing database failed or could not be reached.
    #[error("translation store error: {0}")]
    Database(#[from] sqlx::Error),

    /// A data blob or entity attribute set could not be (de)serialized.
    #[error("translation data serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TranslationError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Whether the error came from write validation rather than the backend.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::InvalidTable(_))
    }
}

pub type Result<T> = std::result::Result<T, TranslationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_message() {
        let err = TranslationError::validation("locale", "must not be empty");
        assert_eq!(err.to_string(), "invalid translation locale: must not be empty");
        assert!(err.is_validation());
    }

    #[test]
    fn test_invalid_table_is_validation() {
        let err = TranslationError::InvalidTable("drop table".to_string());
        assert!(err.is_validation());
        assert!(err.to_string().contains("drop table"));
    }

    #[test]
    fn test_serialization_error_is_not_validation() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = TranslationError::from(json_err);
        assert!(!err.is_validation());
        assert!(err.to_string().starts_with("translation data serialization failed"));
    }
}
