//! Validation helpers for DTOs.

use validator::ValidationError;

/// Shortest accepted nickname, counted in characters after trimming.
pub const NICKNAME_MIN_CHARS: usize = 2;
/// Longest accepted nickname, counted in characters after trimming.
pub const NICKNAME_MAX_CHARS: usize = 15;

/// Validates that a nickname has 2 to 15 characters once surrounding whitespace is removed
/// and contains no control characters.
///
/// # Examples
///
/// ```ignore
/// validate_nickname("  pixel  ") // Ok
/// validate_nickname(" a ")       // Err - too short after trimming
/// validate_nickname("   ")       // Err - empty
/// ```
pub fn validate_nickname(nickname: &str) -> Result<(), ValidationError> {
    let trimmed = nickname.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("nickname_empty");
        err.message = Some("Nickname must not be empty".into());
        return Err(err);
    }

    let count = trimmed.chars().count();
    if !(NICKNAME_MIN_CHARS..=NICKNAME_MAX_CHARS).contains(&count) {
        let mut err = ValidationError::new("nickname_length");
        err.message = Some(
            format!(
                "Nickname must be between {NICKNAME_MIN_CHARS} and {NICKNAME_MAX_CHARS} characters (got {count})"
            )
            .into(),
        );
        return Err(err);
    }

    if trimmed.chars().any(char::is_control) {
        let mut err = ValidationError::new("nickname_format");
        err.message = Some("Nickname must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a color is written as `#RRGGBB` (hex digits in either case).
pub fn validate_hex_color(color: &str) -> Result<(), ValidationError> {
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());

    if !valid {
        let mut err = ValidationError::new("color_format");
        err.message = Some(format!("Color must be formatted as #RRGGBB (got `{color}`)").into());
        return Err(err);
    }

    Ok(())
}
