//! Anchor slicing: assign every TOC entry a span of the rendered text.
//!
//! Entries are flattened in pre-order and entry *i* owns
//! `[offset(i), offset(i + 1))`, the last one running to the end of the
//! text. A parent therefore stops where its first child starts, and the
//! spans of all entries tile the whole text with no gaps or overlaps.

use std::ops::Range;

use tracing::{debug, warn};

use crate::book::{TocEntry, walk_preorder};
use crate::render::{RenderedDocument, Resolution};

/// One entry's share of the rendered text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice<'a> {
    pub entry: &'a TocEntry,
    /// Nesting level, 0 for top-level entries
    pub depth: usize,
    pub range: Range<usize>,
}

/// Result of slicing a TOC against a rendered document.
#[derive(Debug, Clone)]
pub struct Slices<'a> {
    /// Pre-order, parallel to the flattened TOC
    pub slices: Vec<Slice<'a>>,
    /// Entries whose anchor was missing and fell back to their file start
    pub unresolved: usize,
}

impl Slices<'_> {
    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.slices.iter().map(|s| s.range.clone())
    }
}

/// Flatten a TOC forest into pre-order `(entry, depth)` pairs.
pub fn flatten(entries: &[TocEntry]) -> Vec<(&TocEntry, usize)> {
    let mut flat = Vec::new();
    walk_preorder(entries, &mut |entry, depth| flat.push((entry, depth)));
    flat
}

/// Slice the rendered text for every entry of `entries`.
pub fn slice<'a>(entries: &'a [TocEntry], document: &RenderedDocument) -> Slices<'a> {
    let flat = flatten(entries);
    let mut unresolved = 0;

    let raw: Vec<Option<usize>> = flat
        .iter()
        .map(|(entry, _)| {
            let target = entry.target.as_ref()?;
            match document.resolve(target) {
                Resolution::Exact(offset) => Some(offset),
                Resolution::FileFallback(offset) => {
                    unresolved += 1;
                    warn!(
                        title = %entry.title,
                        file = %target.file,
                        fragment = target.fragment.as_deref().unwrap_or_default(),
                        "Anchor not found in rendered text, starting at file boundary"
                    );
                    Some(offset)
                }
                Resolution::NotRendered => {
                    warn!(
                        title = %entry.title,
                        file = %target.file,
                        "Target file was not rendered, entry gets no text"
                    );
                    None
                }
            }
        })
        .collect();

    let ranges = spans(&raw, document.text().len());
    let slices = flat
        .into_iter()
        .zip(ranges)
        .map(|((entry, depth), range)| Slice { entry, depth, range })
        .collect::<Vec<_>>();

    debug!(entries = slices.len(), unresolved, "Sliced rendered text");
    Slices { slices, unresolved }
}

/// Turn resolved offsets (pre-order) into spans that tile `0..len`.
///
/// - the first span starts at 0 (front matter belongs to the first entry)
/// - an offset beyond the text or before its predecessor's is clamped,
///   giving an empty span instead of an overlap
/// - a missing offset takes the next known one, so the entry gets an empty
///   span and its predecessor keeps its text
pub fn spans(offsets: &[Option<usize>], len: usize) -> Vec<Range<usize>> {
    let mut known: Vec<Option<usize>> = Vec::with_capacity(offsets.len());
    let mut previous = 0;
    for (i, offset) in offsets.iter().enumerate() {
        let start = if i == 0 {
            Some(0)
        } else {
            offset.map(|o| o.clamp(previous, len))
        };
        if let Some(start) = start {
            previous = start;
        }
        known.push(start);
    }

    let mut starts = vec![len; known.len()];
    let mut next = len;
    for (i, start) in known.iter().enumerate().rev() {
        if let Some(start) = start {
            next = *start;
        }
        starts[i] = next;
    }

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| start..starts.get(i + 1).copied().unwrap_or(len))
        .collect()
}
