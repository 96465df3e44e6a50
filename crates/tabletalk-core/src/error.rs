use thiserror::Error;

/// Top-level error type for the Tabletalk system.
///
/// Subsystem crates define their own error types for caller-facing failures.
/// This type covers process-level concerns (configuration, I/O, startup) that
/// are shared across crates.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TabletalkError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl From<toml::de::Error> for TabletalkError {
    fn from(err: toml::de::Error) -> Self {
        TabletalkError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for TabletalkError {
    fn from(err: toml::ser::Error) -> Self {
        TabletalkError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for TabletalkError {
    fn from(err: serde_json::Error) -> Self {
        TabletalkError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Tabletalk operations.
pub type Result<T> = std::result::Result<T, TabletalkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(TabletalkError, &str)> = vec![
            (
                TabletalkError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                TabletalkError::Api("bind failed".to_string()),
                "API error: bind failed",
            ),
            (
                TabletalkError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
            (TabletalkError::ShuttingDown, "Shutdown in progress"),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_error_from_io_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let err: TabletalkError = TabletalkError::from(io_err);
        match &err {
            TabletalkError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            _ => panic!("Expected Io variant"),
        }
        assert!(err.to_string().starts_with("I/O error:"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let converted: TabletalkError = err.unwrap_err().into();
        assert!(matches!(converted, TabletalkError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let converted: TabletalkError = err.unwrap_err().into();
        assert!(matches!(converted, TabletalkError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(value.to_string())
        }

        assert_eq!(inner().unwrap(), "42");
    }
}
