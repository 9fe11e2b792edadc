use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ValidationError;

pub const MAX_COMMENT_CHARS: usize = 500;
pub const MAX_MENTIONS: usize = 5;

// `@handle` not glued to a preceding word character (so e-mail addresses don't count).
static MENTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^\w@])@([A-Za-z0-9_][A-Za-z0-9_.]*)").unwrap()
});

/// Number of `@handle` tokens in `text`.
pub fn count_mentions(text: &str) -> usize {
    MENTION.find_iter(text).count()
}

/// Check comment text before it is sent anywhere.
pub fn validate(text: &str) -> Result<(), ValidationError> {
    let trimmed = text.trim();
    let len = trimmed.chars().count();
    if len == 0 {
        return Err(ValidationError::EmptyContent);
    }
    if len > MAX_COMMENT_CHARS {
        return Err(ValidationError::TooLong { len, max: MAX_COMMENT_CHARS });
    }
    let count = count_mentions(trimmed);
    if count > MAX_MENTIONS {
        return Err(ValidationError::TooManyMentions { count, max: MAX_MENTIONS });
    }
    Ok(())
}
