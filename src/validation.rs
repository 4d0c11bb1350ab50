//! Form validation for nicknames and join codes
//!
//! Checks run in a fixed order and only the first failing rule is reported.

use crate::lobby::{CODE_ALPHABET, CODE_LENGTH};

/// Minimum nickname length (after trimming)
pub const MIN_NICKNAME_LENGTH: usize = 3;

/// Maximum nickname length (after trimming)
pub const MAX_NICKNAME_LENGTH: usize = 20;

/// A rejected form value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    NicknameTooShort,
    NicknameTooLong,
    NicknameInvalidChars,
    CodeLength { length: usize },
}

impl ValidationError {
    /// Returns the user-facing message
    pub fn message(&self) -> &'static str {
        match self {
            ValidationError::NicknameTooShort => "At least 3 characters",
            ValidationError::NicknameTooLong => "Max 20 characters",
            ValidationError::NicknameInvalidChars => "Letters, numbers, space, _ or - only",
            ValidationError::CodeLength { .. } => "Code must be 6 chars",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for ValidationError {}

fn is_nickname_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-')
}

/// Validate a nickname, returning the trimmed value.
///
/// Checks in order:
/// 1. Length >= 3
/// 2. Length <= 20
/// 3. Only letters, digits, space, underscore and hyphen
pub fn validate_nickname(input: &str) -> Result<String, ValidationError> {
    let nickname = input.trim();
    let length = nickname.chars().count();

    if length < MIN_NICKNAME_LENGTH {
        return Err(ValidationError::NicknameTooShort);
    }
    if length > MAX_NICKNAME_LENGTH {
        return Err(ValidationError::NicknameTooLong);
    }
    if !nickname.chars().all(is_nickname_char) {
        return Err(ValidationError::NicknameInvalidChars);
    }
    Ok(nickname.to_string())
}

/// Normalise a join code: trimmed and upper-cased, exactly 6 characters.
pub fn validate_join_code(input: &str) -> Result<String, ValidationError> {
    let code = input.trim().to_uppercase();
    let length = code.chars().count();
    if length != CODE_LENGTH {
        return Err(ValidationError::CodeLength { length });
    }
    Ok(code)
}

/// Whether `code` could have been produced by the code generator.
pub fn is_generated_code(code: &str) -> bool {
    code.chars().count() == CODE_LENGTH && code.chars().all(|c| CODE_ALPHABET.contains(c))
}
