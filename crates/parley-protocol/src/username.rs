//! Username rules shared by the client and the server.

use thiserror::Error;

/// Maximum username length in bytes.
pub const MAX_USERNAME_LENGTH: usize = 255;

/// Separator between destination and text in client input.
pub const DESTINATION_SEPARATOR: char = ':';

/// Reasons a username is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsernameError {
    /// Empty name.
    #[error("Username cannot be empty")]
    Empty,

    /// Longer than [`MAX_USERNAME_LENGTH`] bytes.
    #[error("Username is {0} bytes, maximum is {MAX_USERNAME_LENGTH}")]
    TooLong(usize),

    /// Contains whitespace or control characters.
    #[error("Username contains whitespace or control characters")]
    InvalidCharacters,

    /// Contains the destination separator, which would make it unaddressable.
    #[error("Username cannot contain '{DESTINATION_SEPARATOR}'")]
    ContainsSeparator,
}

/// Validate a username.
///
/// # Errors
///
/// Returns the first rule the name breaks.
pub fn validate_username(name: &str) -> Result<(), UsernameError> {
    if name.is_empty() {
        return Err(UsernameError::Empty);
    }
    if name.len() > MAX_USERNAME_LENGTH {
        return Err(UsernameError::TooLong(name.len()));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(UsernameError::InvalidCharacters);
    }
    if name.contains(DESTINATION_SEPARATOR) {
        return Err(UsernameError::ContainsSeparator);
    }
    Ok(())
}
