//! Directory output: turning sliced TOC entries into a tree of Markdown files.
//!
//! Layout is planned first ([`plan_tree`], [`plan_flat`]) as a list of
//! directories and files relative to the output root, then written by a
//! [`DirectoryWriter`]. An entry with children becomes a directory named
//! after its title holding the entry's own text as `<title>.md`; a leaf
//! becomes `<title>.md` in its parent's directory.

mod sanitize;

pub use sanitize::{MAX_NAME_BYTES, SiblingNames, UNTITLED, sanitize_name};

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::book::TocEntry;
use crate::config::{Config, EmptyParents};
use crate::error::{Error, Result};
use crate::media::{MEDIA_DIR, relink};

/// One Markdown file to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNode {
    pub title: String,
    /// Path relative to the output root
    pub path: PathBuf,
    /// Directories between the output root and the file
    pub depth: usize,
    /// Span of the rendered text
    pub range: Range<usize>,
}

/// Planned output tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    /// Relative directories, parents before children
    pub directories: Vec<PathBuf>,
    pub files: Vec<OutputNode>,
    /// Parent entries whose blank file was left out
    pub omitted: usize,
}

/// Plan the nested layout of a TOC. `ranges` is parallel to the pre-order
/// flattening of `entries`.
pub fn plan_tree(
    entries: &[TocEntry],
    ranges: &[Range<usize>],
    text: &str,
    config: &Config,
) -> Layout {
    let mut planner = Planner {
        ranges,
        text,
        config,
        cursor: 0,
        layout: Layout::default(),
    };
    let mut names = SiblingNames::new();
    // Un-numbered top-level names share the root with media/
    if !config.numbered {
        names.reserve(MEDIA_DIR);
    }
    planner.place(entries, Path::new(""), 0, names);
    planner.layout
}

/// Plan flat, spine-ordered files (`NN_<title>.md`), always numbered.
pub fn plan_flat(entries: &[TocEntry], ranges: &[Range<usize>], config: &Config) -> Layout {
    let width = prefix_width(entries.len());
    let mut names = SiblingNames::new();
    let files = entries
        .iter()
        .zip(ranges)
        .enumerate()
        .map(|(i, (entry, range))| {
            let name = names.claim(&sanitize_name(&entry.title, config.max_name_len));
            OutputNode {
                title: entry.title.clone(),
                path: PathBuf::from(format!("{:0width$}_{name}.md", i + 1)),
                depth: 0,
                range: range.clone(),
            }
        })
        .collect();
    Layout {
        directories: Vec::new(),
        files,
        omitted: 0,
    }
}

struct Planner<'a> {
    ranges: &'a [Range<usize>],
    text: &'a str,
    config: &'a Config,
    cursor: usize,
    layout: Layout,
}

impl Planner<'_> {
    fn place(&mut self, entries: &[TocEntry], dir: &Path, depth: usize, mut names: SiblingNames) {
        // 00 is left for the parent's own file
        let width = prefix_width(entries.len());

        for (i, entry) in entries.iter().enumerate() {
            let range = self.next_range();
            let name = names.claim(&sanitize_name(&entry.title, self.config.max_name_len));
            let prefixed = if self.config.numbered {
                format!("{:0width$}_{name}", i + 1)
            } else {
                name.clone()
            };

            if entry.children.is_empty() {
                self.push(entry, dir.join(format!("{prefixed}.md")), depth, range);
                continue;
            }

            let subdir = dir.join(&prefixed);
            self.layout.directories.push(subdir.clone());

            let mut child_names = SiblingNames::new();
            let own = if self.config.numbered {
                let width = prefix_width(entry.children.len());
                format!("{:0width$}_{name}.md", 0)
            } else {
                child_names.reserve(&name);
                format!("{name}.md")
            };

            if self.is_blank(&range) && self.config.empty_parents == EmptyParents::Omit {
                debug!(title = %entry.title, "Omitting empty parent file");
                self.layout.omitted += 1;
            } else {
                self.push(entry, subdir.join(own), depth + 1, range);
            }

            self.place(&entry.children, &subdir, depth + 1, child_names);
        }
    }

    fn next_range(&mut self) -> Range<usize> {
        let end = self.text.len();
        let range = self.ranges.get(self.cursor).cloned().unwrap_or(end..end);
        self.cursor += 1;
        range
    }

    fn is_blank(&self, range: &Range<usize>) -> bool {
        self.text
            .get(range.clone())
            .is_none_or(|s| s.trim().is_empty())
    }

    fn push(&mut self, entry: &TocEntry, path: PathBuf, depth: usize, range: Range<usize>) {
        self.layout.files.push(OutputNode {
            title: entry.title.clone(),
            path,
            depth,
            range,
        });
    }
}

/// Zero-padded width for `count` siblings, at least two digits.
fn prefix_width(count: usize) -> usize {
    count.to_string().len().max(2)
}

/// Writes a planned [`Layout`] under one output root.
#[derive(Debug, Clone)]
pub struct DirectoryWriter {
    root: PathBuf,
}

impl DirectoryWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the output root and its media directory, first removing any
    /// previous output when `clean` is set.
    pub fn prepare(&self, clean: bool) -> Result<()> {
        if clean && self.root.exists() {
            debug!(root = %self.root.display(), "Removing previous output");
            fs::remove_dir_all(&self.root).map_err(|e| Error::fs(&self.root, e))?;
        }
        let media = self.root.join(MEDIA_DIR);
        fs::create_dir_all(&media).map_err(|e| Error::fs(&media, e))?;
        Ok(())
    }

    /// Write every directory and file of `layout`, slicing `text` and
    /// relinking media references by depth. Returns the number of files.
    pub fn write(&self, layout: &Layout, text: &str) -> Result<usize> {
        for dir in &layout.directories {
            let path = self.root.join(dir);
            fs::create_dir_all(&path).map_err(|e| Error::fs(&path, e))?;
        }

        for node in &layout.files {
            let path = self.root.join(&node.path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
            }
            let content = text.get(node.range.clone()).unwrap_or_default();
            fs::write(&path, relink(content, node.depth).as_bytes())
                .map_err(|e| Error::fs(&path, e))?;
        }

        info!(
            root = %self.root.display(),
            files = layout.files.len(),
            directories = layout.directories.len(),
            "Wrote output tree"
        );
        Ok(layout.files.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::Target;
    use crate::slice::spans;

    fn leaf(title: &str) -> TocEntry {
        TocEntry::new(title, Some(Target::file("x.xhtml")))
    }

    fn paths(layout: &Layout) -> Vec<String> {
        layout
            .files
            .iter()
            .map(|f| f.path.to_string_lossy().replace('\\', "/"))
            .collect()
    }

    fn toc() -> Vec<TocEntry> {
        vec![
            leaf("Preface"),
            leaf("Part One")
                .with_child(leaf("Chapter 1"))
                .with_child(leaf("Chapter 2")),
            leaf("Part Two").with_child(leaf("Chapter 3")),
        ]
    }

    // One line of text per entry, in pre-order
    fn ranges_for(text: &str, count: usize) -> Vec<Range<usize>> {
        let offsets: Vec<Option<usize>> = text
            .match_indices("L")
            .map(|(i, _)| Some(i))
            .take(count)
            .collect();
        spans(&offsets, text.len())
    }

    #[test]
    fn test_nested_layout() {
        let text = "L0\nL1\nL2\nL3\nL4\nL5\n";
        let layout = plan_tree(&toc(), &ranges_for(text, 6), text, &Config::default());

        assert_eq!(
            paths(&layout),
            [
                "Preface.md",
                "Part One/Part One.md",
                "Part One/Chapter 1.md",
                "Part One/Chapter 2.md",
                "Part Two/Part Two.md",
                "Part Two/Chapter 3.md",
            ]
        );
        assert_eq!(
            layout.directories,
            [PathBuf::from("Part One"), PathBuf::from("Part Two")]
        );
        let depths: Vec<usize> = layout.files.iter().map(|f| f.depth).collect();
        assert_eq!(depths, [0, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_numbered_layout() {
        let text = "L0\nL1\nL2\nL3\nL4\nL5\n";
        let config = Config {
            numbered: true,
            ..Config::default()
        };
        let layout = plan_tree(&toc(), &ranges_for(text, 6), text, &config);

        assert_eq!(
            paths(&layout),
            [
                "01_Preface.md",
                "02_Part One/00_Part One.md",
                "02_Part One/01_Chapter 1.md",
                "02_Part One/02_Chapter 2.md",
                "03_Part Two/00_Part Two.md",
                "03_Part Two/01_Chapter 3.md",
            ]
        );
    }

    #[test]
    fn test_empty_parent_policy() {
        let entries = vec![
            TocEntry::new("Part", None)
                .with_child(leaf("A"))
                .with_child(leaf("B")),
        ];
        let text = "A text\n\nB text\n";
        let ranges = vec![0..0, 0..8, 8..text.len()];

        let omitted = plan_tree(&entries, &ranges, text, &Config::default());
        assert_eq!(paths(&omitted), ["Part/A.md", "Part/B.md"]);
        assert_eq!(omitted.directories, [PathBuf::from("Part")]);
        assert_eq!(omitted.omitted, 1);

        let config = Config {
            empty_parents: EmptyParents::Write,
            ..Config::default()
        };
        let written = plan_tree(&entries, &ranges, text, &config);
        assert_eq!(paths(&written), ["Part/Part.md", "Part/A.md", "Part/B.md"]);
        assert_eq!(written.omitted, 0);
    }

    #[test]
    fn test_blank_leaves_are_kept() {
        let entries = vec![leaf("Cover"), leaf("Text")];
        let layout = plan_tree(&entries, &[0..0, 0..4], "body", &Config::default());
        assert_eq!(paths(&layout), ["Cover.md", "Text.md"]);
    }

    #[test]
    fn test_duplicate_siblings_and_parent_name() {
        let entries = vec![
            leaf("Notes"),
            leaf("notes"),
            leaf("Intro").with_child(leaf("Intro")),
        ];
        let text = "L0\nL1\nL2\nL3\n";
        let layout = plan_tree(&entries, &ranges_for(text, 4), text, &Config::default());
        assert_eq!(
            paths(&layout),
            ["Notes.md", "notes (2).md", "Intro/Intro.md", "Intro/Intro (2).md"]
        );
    }

    #[test]
    fn test_top_level_media_title_is_renamed() {
        let entries = vec![leaf("Media").with_child(leaf("Sub")), leaf("Other")];
        let text = "L0\nL1\nL2\n";
        let layout = plan_tree(&entries, &ranges_for(text, 3), text, &Config::default());
        assert_eq!(
            paths(&layout),
            ["Media (2)/Media (2).md", "Media (2)/Sub.md", "Other.md"]
        );
        assert_eq!(layout.directories, [PathBuf::from("Media (2)")]);

        // Nested entries may use the name freely
        let nested = vec![leaf("Part").with_child(leaf("media"))];
        let layout = plan_tree(&nested, &ranges_for(text, 2), text, &Config::default());
        assert_eq!(paths(&layout), ["Part/Part.md", "Part/media.md"]);
    }

    #[test]
    fn test_flat_layout_is_numbered() {
        let entries: Vec<TocEntry> = (1..=3).map(|i| leaf(&format!("Section {i}"))).collect();
        let layout = plan_flat(&entries, &[0..1, 1..2, 2..3], &Config::default());
        assert_eq!(
            paths(&layout),
            ["01_Section 1.md", "02_Section 2.md", "03_Section 3.md"]
        );
        assert!(layout.directories.is_empty());
    }

    #[test]
    fn test_prefix_width() {
        assert_eq!(prefix_width(3), 2);
        assert_eq!(prefix_width(99), 2);
        assert_eq!(prefix_width(100), 3);
    }

    #[test]
    fn test_writer_relinks_by_depth_and_cleans() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("book_toc_split");
        let writer = DirectoryWriter::new(&root);

        fs::create_dir_all(root.join("stale")).unwrap();
        writer.prepare(true).unwrap();
        assert!(!root.join("stale").exists());
        assert!(root.join(MEDIA_DIR).is_dir());

        let text = "![a](media/a.png)\n\n![b](media/b.png)\n";
        let layout = Layout {
            directories: vec![PathBuf::from("Part")],
            files: vec![
                OutputNode {
                    title: "Top".into(),
                    path: PathBuf::from("Top.md"),
                    depth: 0,
                    range: 0..19,
                },
                OutputNode {
                    title: "Inner".into(),
                    path: PathBuf::from("Part/Inner.md"),
                    depth: 1,
                    range: 19..text.len(),
                },
            ],
            omitted: 0,
        };

        assert_eq!(writer.write(&layout, text).unwrap(), 2);
        assert_eq!(
            fs::read_to_string(root.join("Top.md")).unwrap(),
            "![a](media/a.png)\n\n"
        );
        assert_eq!(
            fs::read_to_string(root.join("Part/Inner.md")).unwrap(),
            "![b](../media/b.png)\n"
        );
    }
}
