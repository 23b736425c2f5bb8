use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct YaadeError {
    pub code: String,
    pub message: String,
}

impl YaadeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn display_joins_code_and_message() {
        let error = YaadeError::new("SANDBOX_COMPILE", "unexpected token");
        assert_eq!(error.to_string(), "SANDBOX_COMPILE: unexpected token");
    }
}
