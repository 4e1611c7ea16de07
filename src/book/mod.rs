//! Book structure as read from the package: metadata, manifest, spine, TOC.
//!
//! All paths stored here are archive-absolute (`OEBPS/text/ch01.xhtml`),
//! already resolved against the document that referenced them.

/// Book metadata (Dublin Core subset)
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub title: String,
    pub authors: Vec<String>,
    pub language: String,
}

/// A manifest item, in package document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    /// Archive-absolute path
    pub href: String,
    pub media_type: String,
    pub properties: Vec<String>,
}

impl ManifestItem {
    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p == name)
    }
}

/// An item in the reading order (spine)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    pub id: String,
    /// Archive-absolute path of the content document
    pub href: String,
    /// Zero-based position in the spine
    pub index: usize,
    pub linear: bool,
}

impl SpineItem {
    /// Flat TOC entry used when the book has no usable navigation document.
    pub fn to_entry(&self) -> TocEntry {
        TocEntry::new(
            format!("Section {}", self.index + 1),
            Some(Target::file(&self.href)),
        )
    }
}

/// Where a TOC entry points: a content file and an optional fragment.
///
/// A missing fragment means the entry starts at the top of the file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target {
    pub file: String,
    pub fragment: Option<String>,
}

impl Target {
    pub fn file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            fragment: None,
        }
    }

    pub fn anchor(file: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            fragment: Some(fragment.into()),
        }
    }

    /// Resolve an href found in `base_doc` into an archive-absolute target.
    ///
    /// Returns `None` for external links and empty hrefs.
    pub fn resolve(base_doc: &str, href: &str) -> Option<Self> {
        let href = href.trim();
        if href.is_empty() || href.contains("://") || href.starts_with("mailto:") {
            return None;
        }
        let (path, fragment) = match href.split_once('#') {
            Some((path, frag)) => (path, Some(frag)),
            None => (href, None),
        };
        let file = if path.is_empty() {
            base_doc.to_string()
        } else {
            crate::util::resolve_path(base_doc, &crate::util::percent_decode(path))
        };
        let fragment = fragment
            .map(crate::util::percent_decode)
            .filter(|f| !f.is_empty());
        Some(Self { file, fragment })
    }
}

/// A table of contents entry (hierarchical)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub title: String,
    /// Headings without a link (EPUB 3 `<span>` labels) have no target.
    pub target: Option<Target>,
    pub children: Vec<TocEntry>,
}

impl TocEntry {
    pub fn new(title: impl Into<String>, target: Option<Target>) -> Self {
        Self {
            title: title.into(),
            target,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: TocEntry) -> Self {
        self.children.push(child);
        self
    }

    /// Number of entries in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(TocEntry::count).sum::<usize>()
    }
}

/// Visit every entry of a forest in pre-order together with its depth.
pub fn walk_preorder<'a>(entries: &'a [TocEntry], visit: &mut impl FnMut(&'a TocEntry, usize)) {
    fn go<'a>(entries: &'a [TocEntry], depth: usize, visit: &mut impl FnMut(&'a TocEntry, usize)) {
        for entry in entries {
            visit(entry, depth);
            go(&entry.children, depth + 1, visit);
        }
    }
    go(entries, 0, visit);
}
