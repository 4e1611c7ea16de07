//! File-system-safe names for TOC titles.

use std::collections::HashSet;

use crate::util::collapse_whitespace;

/// Characters not allowed in a file or directory name on common platforms.
const ILLEGAL: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Name used when nothing is left of a title.
pub const UNTITLED: &str = "Untitled";

/// Byte cap on a sanitized name. Leaves room under the usual 255-byte
/// limit for a numbering prefix, a ` (N)` suffix and the `.md` extension.
pub const MAX_NAME_BYTES: usize = 200;

/// Turn a TOC title into a file or directory name.
///
/// Strips illegal and control characters, collapses whitespace, bounds the
/// length to `max_len` characters (and at most [`MAX_NAME_BYTES`] of UTF-8)
/// and trims trailing dots and spaces.
///
/// # Examples
///
/// ```
/// use tocsplit::output::sanitize_name;
///
/// assert_eq!(sanitize_name("Chapter 1: The Start", 100), "Chapter 1 The Start");
/// assert_eq!(sanitize_name("  What?  Why...  ", 100), "What Why");
/// assert_eq!(sanitize_name("???", 100), "Untitled");
/// ```
pub fn sanitize_name(title: &str, max_len: usize) -> String {
    let cleaned: String = title
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some(' ')
            } else if ILLEGAL.contains(&c) || c.is_control() {
                None
            } else {
                Some(c)
            }
        })
        .collect();

    let collapsed = collapse_whitespace(&cleaned);
    let mut bytes = 0;
    let bounded: String = collapsed
        .chars()
        .take(max_len.max(1))
        .take_while(|c| {
            bytes += c.len_utf8();
            bytes <= MAX_NAME_BYTES
        })
        .collect();
    let trimmed = bounded.trim_end_matches(['.', ' ']);

    if trimmed.is_empty() {
        UNTITLED.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Names already used inside one directory, compared case-insensitively.
#[derive(Debug, Default)]
pub struct SiblingNames {
    taken: HashSet<String>,
}

impl SiblingNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a name as used without renaming it.
    pub fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_lowercase());
    }

    /// Claim `name`, appending ` (2)`, ` (3)`, ... until it is unique.
    pub fn claim(&mut self, name: &str) -> String {
        let mut candidate = name.to_string();
        let mut n = 2;
        while self.taken.contains(&candidate.to_lowercase()) {
            candidate = format!("{name} ({n})");
            n += 1;
        }
        self.taken.insert(candidate.to_lowercase());
        candidate
    }
}
