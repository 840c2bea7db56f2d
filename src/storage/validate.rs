//! Filesystem-safe names for datasets and hosts

use crate::{HulkError, Result};

/// Validate a dataset or host name used as a single path component
///
/// # Errors
///
/// Returns error if name is invalid
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(HulkError::InvalidName("Name cannot be empty".to_string()));
    }

    if name.len() > 255 {
        return Err(HulkError::InvalidName(format!(
            "Name too long: {} > 255",
            name.len()
        )));
    }

    if name != name.trim() {
        return Err(HulkError::InvalidName(format!(
            "Name cannot have leading or trailing whitespace: '{name}'"
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(HulkError::InvalidName(format!(
            "Name cannot contain path separators: '{name}'"
        )));
    }

    // Also rules out "." and ".."
    if name.starts_with('.') {
        return Err(HulkError::InvalidName(format!(
            "Name cannot start with dot: '{name}'"
        )));
    }

    if name.contains('\0') {
        return Err(HulkError::InvalidName(
            "Name cannot contain null bytes".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("default").is_ok());
        assert!(validate_name("test-inventory").is_ok());
        assert!(validate_name("api.example.com").is_ok());
        assert!(validate_name("localhost:8080").is_ok());

        for bad in ["", " orders", "orders ", ".", "..", ".hidden", "a/b", r"a\b", "a\0b"] {
            assert!(validate_name(bad).is_err(), "'{bad}' should be rejected");
        }
    }
}
