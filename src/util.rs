//! Text, path and offset helpers shared by the pipeline stages.

use std::borrow::Cow;
use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;

/// Decode bytes to a string, handling various encodings.
///
/// 1. UTF-8 (a BOM is handled by encoding_rs)
/// 2. The encoding declared in the document (`<?xml encoding="..."?>` or
///    `<meta charset="...">`)
/// 3. Windows-1252, common in old ebooks
pub fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    let (result, _encoding, malformed) = encoding_rs::UTF_8.decode(bytes);

    if !malformed {
        return result;
    }

    if let Some(name) = declared_encoding(bytes)
        && let Some(encoding) = encoding_rs::Encoding::for_label(name.as_bytes())
    {
        let (result, _, _) = encoding.decode(bytes);
        return result;
    }

    let (result, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    result
}

static ENCODING_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:encoding|charset)\s*=\s*["']?([A-Za-z0-9_\-:.]+)"#)
        .expect("valid encoding regex")
});

/// Find the encoding declared in the first kilobyte of a document.
fn declared_encoding(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(1024)];
    let head = String::from_utf8_lossy(head);
    ENCODING_DECL
        .captures(&head)
        .map(|caps| caps[1].to_string())
}

/// Strip UTF-8 BOM if present.
pub fn strip_bom(data: &[u8]) -> &[u8] {
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    }
}

/// Percent-decode an href path, keeping the input when it is not valid UTF-8.
pub fn percent_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8()
        .map(Cow::into_owned)
        .unwrap_or_else(|_| s.to_string())
}

/// Resolve a relative path against the document that contains it.
///
/// ```
/// use tocsplit::util::resolve_path;
///
/// assert_eq!(
///     resolve_path("OEBPS/text/ch1.html", "../images/logo.png"),
///     "OEBPS/images/logo.png"
/// );
/// assert_eq!(
///     resolve_path("OEBPS/content.html", "images/photo.jpg"),
///     "OEBPS/images/photo.jpg"
/// );
/// assert_eq!(
///     resolve_path("ch1.html", "/images/absolute.png"),
///     "images/absolute.png"
/// );
/// ```
pub fn resolve_path(base: &str, rel: &str) -> String {
    let rel_path = Path::new(rel);

    // Absolute paths are rooted at the archive root
    if rel_path.has_root() {
        return normalize(Vec::new(), rel_path);
    }

    let stack: Vec<&str> = Path::new(base)
        .parent()
        .unwrap_or(Path::new(""))
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();

    normalize(stack, rel_path)
}

fn normalize<'a>(mut stack: Vec<&'a str>, rel: &'a Path) -> String {
    for component in rel.components() {
        match component {
            Component::ParentDir => {
                stack.pop();
            }
            Component::Normal(c) => {
                if let Some(s) = c.to_str() {
                    stack.push(s);
                }
            }
            _ => {}
        }
    }
    // Forward slashes for ZIP compatibility
    stack.join("/")
}

/// Byte offset of the start of the line containing `pos`.
pub fn line_start(text: &str, pos: usize) -> usize {
    memchr::memrchr(b'\n', &text.as_bytes()[..pos]).map_or(0, |i| i + 1)
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
