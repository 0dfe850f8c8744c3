use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    #[default]
    Ok,
    Warning,
    Error,
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationStatus::Ok => write!(f, "ok"),
            ValidationStatus::Warning => write!(f, "warning"),
            ValidationStatus::Error => write!(f, "error"),
        }
    }
}

/// Outcome of a plugin's settings validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub field_errors: BTreeMap<String, String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: ValidationStatus::Warning,
            message: message.into(),
            field_errors: BTreeMap::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ValidationStatus::Error,
            message: message.into(),
            field_errors: BTreeMap::new(),
        }
    }

    pub fn with_field_error(mut self, key: impl Into<String>, message: impl Into<String>) -> Self {
        self.field_errors.insert(key.into(), message.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ValidationStatus::Ok
    }

    pub fn is_warning(&self) -> bool {
        self.status == ValidationStatus::Warning
    }

    pub fn is_error(&self) -> bool {
        self.status == ValidationStatus::Error
    }

    /// Message plus field errors, for logs and failure reasons.
    pub fn summary(&self) -> String {
        if self.field_errors.is_empty() {
            return self.message.clone();
        }
        let fields = self
            .field_errors
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join("; ");
        if self.message.is_empty() {
            fields
        } else {
            format!("{} ({})", self.message, fields)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        assert!(ValidationResult::ok().is_ok());
        assert!(ValidationResult::warning("slow").is_warning());
        assert!(ValidationResult::error("bad").is_error());
    }

    #[test]
    fn test_summary() {
        let result = ValidationResult::error("invalid settings")
            .with_field_error("token", "required")
            .with_field_error("volume", "out of range");
        assert_eq!(
            result.summary(),
            "invalid settings (token: required; volume: out of range)"
        );
        assert_eq!(ValidationResult::warning("slow").summary(), "slow");
    }
}
