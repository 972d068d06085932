//! Character-safe text helpers

use std::borrow::Cow;

/// Longest conversation title before truncation, in characters.
pub const TITLE_MAX_CHARS: usize = 50;

pub struct TextUtils;

impl TextUtils {
    /// Keep the first `max_chars` characters, appending `...` when anything was cut.
    fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
        match text.char_indices().nth(max_chars) {
            None => Cow::Borrowed(text),
            Some((cut, _)) => {
                let mut result = String::with_capacity(cut + 3);
                result.push_str(&text[..cut]);
                result.push_str("...");
                Cow::Owned(result)
            }
        }
    }

    /// Title for a conversation started by `first_message`.
    pub fn conversation_title(first_message: &str) -> String {
        Self::truncate_with_ellipsis(first_message, TITLE_MAX_CHARS).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_truncates_on_character_boundaries() {
        assert_eq!(TextUtils::conversation_title("short"), "short");
        let exact = "a".repeat(TITLE_MAX_CHARS);
        assert_eq!(TextUtils::conversation_title(&exact), exact);

        let accented = "é".repeat(60);
        let title = TextUtils::conversation_title(&accented);
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
        assert!(title.ends_with("..."));
    }
}
