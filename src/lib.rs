//! # tocsplit
//!
//! Split an EPUB into a directory tree of Markdown files that mirrors its
//! table of contents.
//!
//! The whole book is rendered to Markdown once. Every TOC entry is then
//! given the contiguous span of that text between its anchor and the next
//! entry's anchor, so no text is lost or written twice, and the spans are
//! written as nested folders and files next to a shared `media/` directory.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use tocsplit::{Config, Converter};
//!
//! let converter = Converter::with_pandoc(Config::default())?;
//! let conversion = converter.convert(Path::new("book.epub"))?;
//! println!("wrote {}", conversion.output_root.display());
//! # Ok::<(), tocsplit::Error>(())
//! ```
//!
//! ## Stages
//!
//! - [`epub`]: container, package document and navigation documents
//! - [`render`]: the single full-text render and its anchor index
//! - [`slice`]: assigning text spans to TOC entries
//! - [`media`]: shared image directory and per-depth relinking
//! - [`output`]: names, layout and the directory writer
//! - [`pipeline`]: the stages wired together, per file and per batch

pub mod book;
pub mod config;
pub mod epub;
pub mod error;
pub mod media;
pub mod output;
pub mod pipeline;
pub mod render;
pub mod slice;
pub mod util;

pub use book::{Metadata, SpineItem, Target, TocEntry};
pub use config::{Config, EmptyParents};
pub use error::{Error, RenderError, Result};
pub use pipeline::{BatchReport, Conversion, Converter, RunContext, RunStats};
pub use render::{MarkdownEngine, PandocEngine, RenderedDocument};
