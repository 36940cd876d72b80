//! Validation helpers for DTOs.

use validator::ValidationError;

/// Option letters a question may offer.
pub const ANSWER_OPTIONS: [&str; 4] = ["a", "b", "c", "d"];

/// Canonical form of a submitted option letter (trimmed, lowercase).
pub fn normalize_answer(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Validates that an answer is one of the option letters `a`..`d`, ignoring case and padding.
///
/// # Examples
///
/// ```ignore
/// validate_answer_option("b")   // Ok
/// validate_answer_option(" C ") // Ok
/// validate_answer_option("e")   // Err
/// ```
pub fn validate_answer_option(raw: &str) -> Result<(), ValidationError> {
    let normalized = normalize_answer(raw);
    if ANSWER_OPTIONS.contains(&normalized.as_str()) {
        return Ok(());
    }

    let mut err = ValidationError::new("answer_option");
    err.message = Some(format!("Answer must be one of a, b, c, d (got `{}`)", raw).into());
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_option_letter() {
        for option in ANSWER_OPTIONS {
            assert!(validate_answer_option(option).is_ok());
        }
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        assert!(validate_answer_option(" C ").is_ok());
        assert_eq!(normalize_answer(" D\n"), "d");
    }

    #[test]
    fn rejects_unknown_options() {
        assert!(validate_answer_option("e").is_err());
        assert!(validate_answer_option("").is_err());
        assert!(validate_answer_option("ab").is_err());
    }
}
