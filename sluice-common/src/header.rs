//! RFC 2047 encoded-words for header text that is not plain ASCII.

use std::borrow::Cow;

use base64::{Engine, engine::general_purpose::STANDARD};

/// Largest UTF-8 chunk whose base64 form keeps one encoded-word within the
/// 75 character limit.
const MAX_CHUNK: usize = 45;

/// `text` as-is when it is ASCII, otherwise as `=?utf-8?B?...?=` words
/// joined by `separator`.
///
/// Words never split a character, so each one decodes on its own.
pub fn encode_words<'a>(text: &'a str, separator: &str) -> Cow<'a, str> {
    if text.is_ascii() {
        return Cow::Borrowed(text);
    }

    let mut words = Vec::new();
    let mut start = 0;

    for (index, ch) in text.char_indices() {
        if index + ch.len_utf8() - start > MAX_CHUNK {
            words.push(&text[start..index]);
            start = index;
        }
    }
    words.push(&text[start..]);

    Cow::Owned(
        words
            .into_iter()
            .map(|word| format!("=?utf-8?B?{}?=", STANDARD.encode(word)))
            .collect::<Vec<_>>()
            .join(separator),
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_ascii_is_untouched() {
        assert!(matches!(encode_words("Nightly report", " "), Cow::Borrowed("Nightly report")));
    }

    #[test]
    fn test_non_ascii_is_encoded() {
        assert_eq!(
            encode_words("Grüße aus Köln", " "),
            "=?utf-8?B?R3LDvMOfZSBhdXMgS8O2bG4=?="
        );
    }

    #[test]
    fn test_long_text_splits_on_char_boundaries() {
        let text = "ü".repeat(40);
        let encoded = encode_words(&text, "\r\n ");
        let words: Vec<&str> = encoded.split("\r\n ").collect();

        assert_eq!(words.len(), 2);
        let mut decoded = Vec::new();
        for word in words {
            assert!(word.len() <= 75, "{word} is too long");
            let payload = word
                .strip_prefix("=?utf-8?B?")
                .and_then(|rest| rest.strip_suffix("?="))
                .expect("encoded-word");
            let bytes = STANDARD.decode(payload).expect("base64");
            assert!(String::from_utf8(bytes.clone()).is_ok());
            decoded.extend(bytes);
        }
        assert_eq!(String::from_utf8(decoded).expect("utf-8"), text);
    }
}
