//! Full-text rendering: one engine call for the whole book.
//!
//! Every content file is handed to the [`MarkdownEngine`] in a single HTML
//! document, each preceded by a boundary paragraph holding a marker token.
//! The markers are stripped from the engine's output and their positions
//! become the file start offsets of the [`RenderedDocument`]. Anchors left
//! in the Markdown by the engine (`{#id}`, `id="id"`) are then indexed per
//! file region.

mod pandoc;

pub use pandoc::PandocEngine;

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::book::Target;
use crate::error::RenderError;
use crate::util::line_start;

/// The external HTML → Markdown converter.
pub trait MarkdownEngine {
    /// Convert one HTML document to Markdown, preserving element ids.
    fn convert(&self, html: &str) -> Result<String, RenderError>;
}

impl<E: MarkdownEngine + ?Sized> MarkdownEngine for &E {
    fn convert(&self, html: &str) -> Result<String, RenderError> {
        (**self).convert(html)
    }
}

/// One content document, ready to be rendered.
#[derive(Debug, Clone)]
pub struct ContentFile {
    /// Archive-absolute path
    pub path: String,
    /// Body markup with image references already pointing at `media/`
    pub html: String,
}

/// Where a target was found in the rendered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The anchor itself (or the file start for fragment-less targets)
    Exact(usize),
    /// The anchor was missing; start of the containing file
    FileFallback(usize),
    /// The target file was not part of the rendered content
    NotRendered,
}

/// The whole book as one Markdown text, plus its location index.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    text: String,
    file_index: HashMap<String, usize>,
    file_starts: Vec<usize>,
    anchors: HashMap<(usize, String), usize>,
}

impl RenderedDocument {
    /// Build the document from marker-free text and known file offsets.
    ///
    /// `file_starts` must be non-decreasing and parallel to `files`.
    pub fn new(text: String, files: &[String], file_starts: Vec<usize>) -> Self {
        debug_assert_eq!(files.len(), file_starts.len());
        let file_index = files
            .iter()
            .enumerate()
            .map(|(i, path)| (path.clone(), i))
            .rev()
            .collect::<HashMap<_, _>>();
        let anchors = index_anchors(&text, &file_starts);
        Self {
            text,
            file_index,
            file_starts,
            anchors,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn file_start(&self, path: &str) -> Option<usize> {
        self.file_index.get(path).map(|&i| self.file_starts[i])
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    /// Locate a target. Duplicate ids resolve to their first occurrence in
    /// the target file's region.
    pub fn resolve(&self, target: &Target) -> Resolution {
        let Some(&file) = self.file_index.get(&target.file) else {
            return Resolution::NotRendered;
        };
        let start = self.file_starts[file];
        match &target.fragment {
            None => Resolution::Exact(start),
            Some(fragment) => match self.anchors.get(&(file, fragment.clone())) {
                Some(&offset) => Resolution::Exact(offset),
                None => Resolution::FileFallback(start),
            },
        }
    }
}

/// Drives a [`MarkdownEngine`] over the ordered content of a book.
pub struct FullTextRenderer<E> {
    engine: E,
}

impl<E: MarkdownEngine> FullTextRenderer<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    /// Render all files with a single engine call.
    pub fn render(&self, files: &[ContentFile]) -> Result<RenderedDocument, RenderError> {
        let mut html = String::from("<html><body>\n");
        for (i, file) in files.iter().enumerate() {
            html.push_str(&format!("<p>{}</p>\n", marker(i)));
            html.push_str(&file.html);
            html.push('\n');
        }
        html.push_str("</body></html>\n");

        info!(files = files.len(), html_bytes = html.len(), "Rendering full text");
        let raw = self.engine.convert(&html)?;

        let (text, file_starts) = strip_markers(&raw, files.len());
        let paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
        let document = RenderedDocument::new(text, &paths, file_starts);
        info!(
            chars = document.text().len(),
            anchors = document.anchor_count(),
            "Rendered full text"
        );
        Ok(document)
    }
}

const MARKER_PREFIX: &str = "TOCSPLITMARK";
const MARKER_SUFFIX: &str = "END";

fn marker(index: usize) -> String {
    format!("{MARKER_PREFIX}{index}{MARKER_SUFFIX}")
}

static MARKER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?m)^[ \t]*{MARKER_PREFIX}(\d+){MARKER_SUFFIX}[ \t]*(?:\r?\n(?:[ \t]*\r?\n)?)?"
    ))
    .expect("valid marker regex")
});

/// Remove boundary marker lines, returning the clean text and the start
/// offset of each file within it.
///
/// Markers must appear in increasing order; a file whose marker is missing
/// or out of order starts where the next recognised file starts.
fn strip_markers(raw: &str, file_count: usize) -> (String, Vec<usize>) {
    let mut text = String::with_capacity(raw.len());
    let mut starts: Vec<Option<usize>> = vec![None; file_count];
    let mut last_seen: Option<usize> = None;
    let mut copied = 0;

    for caps in MARKER_LINE.captures_iter(raw) {
        let Some(whole) = caps.get(0) else { continue };
        text.push_str(&raw[copied..whole.start()]);
        copied = whole.end();

        let Ok(index) = caps[1].parse::<usize>() else {
            continue;
        };
        if index < file_count && last_seen.is_none_or(|last| index > last) {
            starts[index] = Some(text.len());
            last_seen = Some(index);
        } else {
            debug!(index, "Ignoring out-of-order boundary marker");
        }
    }
    text.push_str(&raw[copied..]);

    let mut next = text.len();
    let mut resolved = vec![0; file_count];
    for i in (0..file_count).rev() {
        match starts[i] {
            Some(start) => next = start,
            None => warn!(file = i, "Boundary marker lost by the engine"),
        }
        resolved[i] = next;
    }
    (text, resolved)
}

static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{#([^\s}]+)|(?:^|[\s<])(?:id|name)\s*=\s*(?:"([^"]+)"|'([^']+)')"#)
        .expect("valid anchor regex")
});

/// Index every anchor occurrence by (file region, id), keeping the first.
/// The recorded offset is the start of the line holding the anchor.
fn index_anchors(text: &str, file_starts: &[usize]) -> HashMap<(usize, String), usize> {
    let mut anchors = HashMap::new();
    if file_starts.is_empty() {
        return anchors;
    }
    for caps in ANCHOR.captures_iter(text) {
        let Some(id) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else {
            continue;
        };
        let pos = id.start();
        let region = file_starts.partition_point(|&start| start <= pos).saturating_sub(1);
        anchors
            .entry((region, id.as_str().to_string()))
            .or_insert_with(|| line_start(text, pos));
    }
    anchors
}

static BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<body\b[^>]*>(.*)</body\s*>").expect("valid body regex"));

static PROLOG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<\?xml[^>]*\?>|<!DOCTYPE[^>]*>").expect("valid prolog regex")
});

/// Inner markup of a document's `<body>`, or the whole document without its
/// XML prolog when there is no body element.
pub fn body_markup(document: &str) -> &str {
    match BODY.captures(document).and_then(|caps| caps.get(1)) {
        Some(body) => body.as_str(),
        None => {
            let end = PROLOG.find_iter(document).last().map_or(0, |m| m.end());
            &document[end..]
        }
    }
}
