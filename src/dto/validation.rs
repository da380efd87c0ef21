//! Validation helpers for DTOs.

use validator::ValidationError;

/// Number of digits in a room code.
pub const ROOM_CODE_LENGTH: usize = 3;

/// Validates that a room code is exactly 3 ASCII digits.
///
/// # Examples
///
/// ```ignore
/// validate_room_code("042") // Ok
/// validate_room_code("42")  // Err - too short
/// validate_room_code("4a2") // Err - not a digit
/// ```
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != ROOM_CODE_LENGTH {
        let mut err = ValidationError::new("room_code_length");
        err.message = Some(
            format!(
                "Room code must be exactly {ROOM_CODE_LENGTH} characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code.chars().all(|c| c.is_ascii_digit()) {
        let mut err = ValidationError::new("room_code_format");
        err.message = Some("Room code must contain only ASCII digits".into());
        return Err(err);
    }

    Ok(())
}
