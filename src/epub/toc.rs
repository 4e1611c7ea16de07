//! Table of contents parsing (NCX and EPUB 3 navigation documents).
//!
//! A broken or empty navigation document never fails a conversion: errors
//! stay inside this module and [`read_toc`] reports "no TOC" so the caller
//! can fall back to the spine.

use std::io::{Read, Seek};

use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::archive::EpubArchive;
use super::{attribute, local_name, resolve_entity};
use crate::book::{ManifestItem, Target, TocEntry};
use crate::util::collapse_whitespace;

/// A navigation document that could not be parsed.
#[derive(Error, Debug)]
#[error("malformed navigation document {path}: {reason}")]
pub struct TocParseError {
    pub path: String,
    pub reason: String,
}

impl TocParseError {
    fn new(path: &str, reason: impl ToString) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Read the book's TOC, trying each navigation document in turn.
///
/// Returns `None` when no navigation document yields any entries.
pub fn read_toc<R: Read + Seek>(archive: &mut EpubArchive<R>) -> Option<Vec<TocEntry>> {
    for doc in archive.package().navigation_documents() {
        let content = match archive.read_text(&doc.href) {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %doc.href, "Navigation document unreadable: {err}");
                continue;
            }
        };

        let parsed = if is_ncx(&doc) {
            parse_ncx(&content, &doc.href)
        } else {
            parse_nav(&content, &doc.href)
        };

        match parsed {
            Ok(entries) if !entries.is_empty() => {
                info!(path = %doc.href, top_level = entries.len(), "Parsed table of contents");
                return Some(entries);
            }
            Ok(_) => debug!(path = %doc.href, "Navigation document has no entries"),
            Err(err) => warn!("{err}"),
        }
    }
    None
}

fn is_ncx(doc: &ManifestItem) -> bool {
    doc.media_type == "application/x-dtbncx+xml" || doc.href.to_ascii_lowercase().ends_with(".ncx")
}

fn entry_title(raw: &str) -> String {
    let title = collapse_whitespace(raw);
    if title.is_empty() {
        "Untitled".to_string()
    } else {
        title
    }
}

/// Parse an NCX `navMap` into a TOC tree. `ncx_path` is the document's
/// archive path; targets are resolved against it.
pub fn parse_ncx(content: &str, ncx_path: &str) -> Result<Vec<TocEntry>, TocParseError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);

    struct NavPointState {
        children: Vec<TocEntry>,
        text: String,
        src: Option<String>,
    }

    let mut stack: Vec<NavPointState> = vec![NavPointState {
        children: Vec::new(),
        text: String::new(),
        src: None,
    }];
    let mut in_text = false;
    let mut in_nav_map = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match local_name(e.name().as_ref()) {
                b"navMap" => in_nav_map = true,
                b"navPoint" if in_nav_map => stack.push(NavPointState {
                    children: Vec::new(),
                    text: String::new(),
                    src: None,
                }),
                // Only the label directly inside a navPoint names it
                b"text" if in_nav_map && stack.len() > 1 => in_text = true,
                b"content" if in_nav_map => {
                    if let Some(state) = stack.last_mut() {
                        state.src = attribute(&e, b"src");
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if in_nav_map
                    && local_name(e.name().as_ref()) == b"content"
                    && let Some(state) = stack.last_mut()
                {
                    state.src = attribute(&e, b"src");
                }
            }
            Ok(Event::Text(e)) => {
                if in_text && let Some(state) = stack.last_mut() {
                    state.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::CData(e)) => {
                if in_text && let Some(state) = stack.last_mut() {
                    state.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if in_text
                    && let Some(state) = stack.last_mut()
                    && let Some(resolved) = resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    state.text.push_str(&resolved);
                }
            }
            Ok(Event::End(e)) => match local_name(e.name().as_ref()) {
                b"text" => in_text = false,
                b"navMap" => in_nav_map = false,
                b"navPoint" if in_nav_map && stack.len() > 1 => {
                    if let Some(state) = stack.pop() {
                        let target = state
                            .src
                            .as_deref()
                            .and_then(|src| Target::resolve(ncx_path, src));
                        let mut entry = TocEntry::new(entry_title(&state.text), target);
                        entry.children = state.children;
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(entry);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(TocParseError::new(ncx_path, e)),
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(TocParseError::new(ncx_path, "unclosed navPoint"));
    }
    Ok(stack.pop().map(|s| s.children).unwrap_or_default())
}

/// Parse an EPUB 3 XHTML navigation document into a TOC tree.
///
/// The `<nav>` whose `epub:type` contains `toc` is used; without one, the
/// first `<nav>` in the document.
pub fn parse_nav(content: &str, nav_path: &str) -> Result<Vec<TocEntry>, TocParseError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);

    struct ItemState {
        title: String,
        href: Option<String>,
        has_label: bool,
        children: Vec<TocEntry>,
    }

    let mut navs: Vec<(bool, Vec<TocEntry>)> = Vec::new();
    let mut in_nav = false;
    let mut is_toc = false;
    let mut roots: Vec<TocEntry> = Vec::new();
    let mut items: Vec<ItemState> = Vec::new();
    // Open elements inside the current label (<a> or <span>), 0 when outside
    let mut label_depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if label_depth > 0 {
                    label_depth += 1;
                    continue;
                }
                match local {
                    b"nav" if !in_nav => {
                        in_nav = true;
                        is_toc = attribute(&e, b"epub:type")
                            .is_some_and(|t| t.split_ascii_whitespace().any(|t| t == "toc"));
                        roots.clear();
                        items.clear();
                    }
                    b"li" if in_nav => items.push(ItemState {
                        title: String::new(),
                        href: None,
                        has_label: false,
                        children: Vec::new(),
                    }),
                    b"a" | b"span" if in_nav => {
                        if let Some(item) = items.last_mut()
                            && !item.has_label
                        {
                            item.has_label = true;
                            item.href = attribute(&e, b"href");
                            label_depth = 1;
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if label_depth > 0 && let Some(item) = items.last_mut() {
                    item.title.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if label_depth > 0
                    && let Some(item) = items.last_mut()
                    && let Some(resolved) = resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    item.title.push_str(&resolved);
                }
            }
            Ok(Event::End(e)) => {
                if label_depth > 0 {
                    label_depth -= 1;
                    continue;
                }
                match local_name(e.name().as_ref()) {
                    b"li" if in_nav => {
                        let Some(item) = items.pop() else { continue };
                        let siblings = match items.last_mut() {
                            Some(parent) => &mut parent.children,
                            None => &mut roots,
                        };
                        if item.has_label {
                            let target = item
                                .href
                                .as_deref()
                                .and_then(|href| Target::resolve(nav_path, href));
                            let mut entry = TocEntry::new(entry_title(&item.title), target);
                            entry.children = item.children;
                            siblings.push(entry);
                        } else {
                            // Label-less item: keep its nested list at this level
                            siblings.extend(item.children);
                        }
                    }
                    b"nav" if in_nav => {
                        in_nav = false;
                        navs.push((is_toc, std::mem::take(&mut roots)));
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(TocParseError::new(nav_path, e)),
            _ => {}
        }
    }

    if in_nav {
        return Err(TocParseError::new(nav_path, "unclosed <nav>"));
    }

    let chosen = match navs.iter().position(|(toc, _)| *toc) {
        Some(i) => navs.swap_remove(i).1,
        None => navs.into_iter().next().map(|(_, entries)| entries).unwrap_or_default(),
    };
    Ok(chosen)
}
