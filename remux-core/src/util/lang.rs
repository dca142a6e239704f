// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Language-code validation.

/// The undetermined-language code.
pub const UNDETERMINED: &str = "und";

/// Returns true if `code` is a plausible ISO 639-2 language code: exactly three lowercase ASCII
/// letters.
pub fn is_iso639_2(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_lowercase())
}

/// Returns true if `code` is a structurally valid BCP-47 language tag: ASCII alphanumeric
/// subtags of 1-8 characters separated by hyphens, with an alphabetic primary subtag of 2-8
/// characters.
pub fn is_bcp47(code: &str) -> bool {
    let mut subtags = code.split('-');

    match subtags.next() {
        Some(primary)
            if primary.len() >= 2
                && primary.len() <= 8
                && primary.bytes().all(|b| b.is_ascii_alphabetic()) => {}
        _ => return false,
    }

    subtags.all(|subtag| {
        !subtag.is_empty() && subtag.len() <= 8 && subtag.bytes().all(|b| b.is_ascii_alphanumeric())
    })
}

/// Normalize a container-provided language code: a valid ISO 639-2 or BCP-47 tag is passed
/// through lowercased where appropriate, anything else becomes `und`.
pub fn normalize_language(code: &str) -> String {
    let trimmed = code.trim_matches(char::from(0)).trim();

    if is_iso639_2(&trimmed.to_ascii_lowercase()) {
        trimmed.to_ascii_lowercase()
    }
    else if is_bcp47(trimmed) {
        trimmed.to_string()
    }
    else {
        UNDETERMINED.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{is_bcp47, is_iso639_2, normalize_language};

    #[test]
    fn verify_language_codes() {
        assert!(is_iso639_2("eng"));
        assert!(!is_iso639_2("en"));
        assert!(!is_iso639_2("EN1"));

        assert!(is_bcp47("en"));
        assert!(is_bcp47("en-US"));
        assert!(is_bcp47("zh-Hant-TW"));
        assert!(!is_bcp47("-en"));
        assert!(!is_bcp47("a"));

        assert_eq!(normalize_language("ENG"), "eng");
        assert_eq!(normalize_language("en-US"), "en-US");
        assert_eq!(normalize_language("\0\0\0"), "und");
        assert_eq!(normalize_language("12!"), "und");
    }
}
