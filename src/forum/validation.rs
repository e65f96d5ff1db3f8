//! Field rules for user input, trimmed and length-checked by character count.

use crate::errors::AppError;

pub const USERNAME_LEN: (usize, usize) = (4, 25);
pub const EMAIL_MAX_LEN: usize = 50;
pub const ABOUT_ME_MAX_LEN: usize = 140;
pub const TITLE_LEN: (usize, usize) = (1, 128);
pub const TOPIC_LEN: (usize, usize) = (1, 128);
pub const POST_BODY_LEN: (usize, usize) = (1, 1000);
pub const GROUP_NAME_LEN: (usize, usize) = (4, 64);
pub const GROUP_DESCRIPTION_LEN: (usize, usize) = (1, 1000);

fn bounded(field: &str, value: &str, (min, max): (usize, usize)) -> Result<String, AppError> {
    let value = value.trim();
    let len = value.chars().count();
    if len < min || len > max {
        return Err(AppError::Validation(format!(
            "{} must be between {} and {} characters",
            field, min, max
        )));
    }
    Ok(value.to_string())
}

pub fn username(value: &str) -> Result<String, AppError> {
    let value = bounded("Username", value, USERNAME_LEN)?;
    if value.chars().any(char::is_whitespace) {
        return Err(AppError::Validation(
            "Username cannot contain whitespace".to_string(),
        ));
    }
    Ok(value)
}

pub fn email(value: &str) -> Result<String, AppError> {
    let value = value.trim();
    let invalid = || AppError::Validation("Invalid email".to_string());
    if value.is_empty() || value.chars().count() > EMAIL_MAX_LEN {
        return Err(invalid());
    }
    let (local, domain) = value.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || value.chars().any(char::is_whitespace)
    {
        return Err(invalid());
    }
    Ok(value.to_string())
}

pub fn password_hash(value: &str) -> Result<String, AppError> {
    if value.is_empty() {
        return Err(AppError::Validation(
            "Password credential is required".to_string(),
        ));
    }
    Ok(value.to_string())
}

pub fn about_me(value: &str) -> Result<String, AppError> {
    bounded("About me", value, (0, ABOUT_ME_MAX_LEN))
}

pub fn title(value: &str) -> Result<String, AppError> {
    bounded("Title", value, TITLE_LEN)
}

pub fn topic_name(value: &str) -> Result<String, AppError> {
    bounded("Topic", value, TOPIC_LEN)
}

pub fn post_body(value: &str) -> Result<String, AppError> {
    bounded("Post", value, POST_BODY_LEN)
}

pub fn group_name(value: &str) -> Result<String, AppError> {
    bounded("Group name", value, GROUP_NAME_LEN)
}

pub fn group_description(value: &str) -> Result<String, AppError> {
    bounded("Group description", value, GROUP_DESCRIPTION_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_bounds() {
        assert_eq!(username("  alice ").unwrap(), "alice");
        assert!(username("bob").is_err());
        assert!(username(&"x".repeat(26)).is_err());
        assert!(username("al ice").is_err());
    }

    #[test]
    fn test_email_shape() {
        assert!(email("alice@example.com").is_ok());
        assert!(email("alice").is_err());
        assert!(email("@example.com").is_err());
        assert!(email("alice@localhost").is_err());
        assert!(email("a@b@c.com").is_err());
        assert!(email(&format!("{}@example.com", "a".repeat(50))).is_err());
    }

    #[test]
    fn test_text_limits_count_characters() {
        assert!(title("").is_err());
        assert!(title("   ").is_err());
        assert!(title(&"é".repeat(128)).is_ok());
        assert!(title(&"é".repeat(129)).is_err());
        assert!(post_body(&"x".repeat(1000)).is_ok());
        assert!(post_body(&"x".repeat(1001)).is_err());
        assert_eq!(about_me("").unwrap(), "");
        assert!(group_name("abc").is_err());
    }
}
