//! The per-file conversion pipeline and batch driver.
//!
//! One input flows through the stages exactly once: archive → TOC (or spine
//! fallback) → media plan → single full-text render → slicing → layout →
//! output tree. A failure aborts only the file being converted.

use std::collections::HashSet;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::book::{SpineItem, TocEntry, walk_preorder};
use crate::config::Config;
use crate::epub::{EpubArchive, read_toc};
use crate::error::{Error, Result};
use crate::media::MediaTable;
use crate::output::{DirectoryWriter, plan_flat, plan_tree};
use crate::render::{ContentFile, FullTextRenderer, MarkdownEngine, PandocEngine, body_markup};
use crate::slice::slice;

/// Counters collected while converting one input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// TOC entries (or spine sections) sliced
    pub entries: usize,
    /// Entries whose anchor was missing from the rendered text
    pub unresolved_anchors: usize,
    pub files_written: usize,
    pub media_written: usize,
    pub empty_parents_omitted: usize,
    pub used_spine_fallback: bool,
}

/// State threaded through the stages of one conversion.
#[derive(Debug)]
pub struct RunContext<'a> {
    pub config: &'a Config,
    pub stats: RunStats,
}

impl<'a> RunContext<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            stats: RunStats::default(),
        }
    }
}

/// Result of converting one input.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub input: PathBuf,
    pub output_root: PathBuf,
    pub stats: RunStats,
}

/// Outcome of a batch: every input either converted or failed.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub converted: Vec<Conversion>,
    pub failed: Vec<(PathBuf, Error)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Converts EPUB files into TOC-shaped Markdown trees.
pub struct Converter<E> {
    renderer: FullTextRenderer<E>,
    config: Config,
}

impl Converter<PandocEngine> {
    /// A converter backed by pandoc, located per `config`.
    pub fn with_pandoc(config: Config) -> Result<Self> {
        let engine = PandocEngine::locate(config.pandoc_path.as_deref(), config.timeout())?;
        Ok(Self::new(engine, config))
    }
}

impl<E: MarkdownEngine> Converter<E> {
    pub fn new(engine: E, config: Config) -> Self {
        Self {
            renderer: FullTextRenderer::new(engine),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Convert inputs one after another. A failing input is recorded and
    /// the batch moves on.
    pub fn convert_batch<I, P>(&self, inputs: I) -> BatchReport
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut report = BatchReport::default();
        for input in inputs {
            let input = input.as_ref();
            match self.convert(input) {
                Ok(conversion) => report.converted.push(conversion),
                Err(err) => {
                    warn!(input = %input.display(), error = %err, "Conversion failed");
                    report.failed.push((input.to_path_buf(), err));
                }
            }
        }
        report
    }

    /// Convert one EPUB into `<stem>_toc_split/`.
    pub fn convert(&self, input: &Path) -> Result<Conversion> {
        if input
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        {
            return Err(Error::UnsupportedFormat(format!(
                "{}: PDF input is not handled here",
                input.display()
            )));
        }

        info!(input = %input.display(), "Converting");
        let mut archive = EpubArchive::open(input)?;
        let mut ctx = RunContext::new(&self.config);
        let output_root = self.config.output_root(input);
        self.run(&mut archive, &output_root, &mut ctx)?;

        info!(
            output = %output_root.display(),
            files = ctx.stats.files_written,
            media = ctx.stats.media_written,
            unresolved = ctx.stats.unresolved_anchors,
            "Converted"
        );
        Ok(Conversion {
            input: input.to_path_buf(),
            output_root,
            stats: ctx.stats,
        })
    }

    /// Run every stage for an opened archive, writing under `output_root`.
    pub fn run<R: Read + Seek>(
        &self,
        archive: &mut EpubArchive<R>,
        output_root: &Path,
        ctx: &mut RunContext<'_>,
    ) -> Result<()> {
        let package = archive.package().clone();

        let (entries, fallback) = match read_toc(archive) {
            Some(entries) => (entries, false),
            None => {
                if package.spine.is_empty() {
                    return Err(Error::Archive("no table of contents and an empty spine".into()));
                }
                warn!(sections = package.spine.len(), "No usable TOC, falling back to spine order");
                (package.spine.iter().map(SpineItem::to_entry).collect::<Vec<_>>(), true)
            }
        };
        ctx.stats.used_spine_fallback = fallback;

        let media = MediaTable::plan(package.images().filter(|item| {
            let present = archive.contains(&item.href);
            if !present {
                warn!(path = %item.href, "Manifest image missing from archive");
            }
            present
        }));

        let order = if fallback {
            package.spine.iter().map(|item| item.href.clone()).collect()
        } else {
            content_order(&entries, &package.spine)
        };

        let mut files = Vec::with_capacity(order.len());
        for path in order {
            if !archive.contains(&path) {
                warn!(path = %path, "Content document missing from archive");
                continue;
            }
            let document = archive.read_text(&path)?;
            let html = media.rewrite_html(body_markup(&document), &path).into_owned();
            files.push(ContentFile { path, html });
        }

        let document = self.renderer.render(&files)?;
        let slices = slice(&entries, &document);
        ctx.stats.entries = slices.slices.len();
        ctx.stats.unresolved_anchors = slices.unresolved;

        let ranges: Vec<_> = slices.ranges().collect();
        let layout = if fallback {
            plan_flat(&entries, &ranges, ctx.config)
        } else {
            plan_tree(&entries, &ranges, document.text(), ctx.config)
        };
        ctx.stats.empty_parents_omitted = layout.omitted;

        let writer = DirectoryWriter::new(output_root);
        writer.prepare(ctx.config.clean)?;
        ctx.stats.media_written = media.extract(archive, output_root)?;
        ctx.stats.files_written = writer.write(&layout, document.text())?;
        Ok(())
    }
}

/// Order content files for rendering: files in TOC pre-order of first
/// appearance, with spine files the TOC never names slotted in after the
/// nearest earlier spine file (or at the front).
pub fn content_order(entries: &[TocEntry], spine: &[SpineItem]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    walk_preorder(entries, &mut |entry, _| {
        if let Some(target) = &entry.target
            && seen.insert(target.file.clone())
        {
            order.push(target.file.clone());
        }
    });

    for (i, item) in spine.iter().enumerate() {
        if seen.contains(&item.href) {
            continue;
        }
        let position = spine[..i]
            .iter()
            .rev()
            .find_map(|earlier| order.iter().position(|f| *f == earlier.href))
            .map_or(0, |p| p + 1);
        order.insert(position, item.href.clone());
        seen.insert(item.href.clone());
    }
    order
}
