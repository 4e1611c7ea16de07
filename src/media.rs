//! Shared media directory: canonical names, HTML rewriting, extraction and
//! per-depth relinking of image references.
//!
//! Names are planned before rendering. Content HTML is rewritten so every
//! known image points at `media/<name>`, the engine carries those references
//! into the Markdown, and each written node then gets them prefixed with
//! `../` once per directory level it sits below the output root.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::book::ManifestItem;
use crate::epub::EpubArchive;
use crate::error::{Error, Result};
use crate::util::{percent_decode, resolve_path};

/// Name of the shared media directory under the output root.
pub const MEDIA_DIR: &str = "media";

/// Characters that may not appear in a media file name.
const ILLEGAL: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

static IMAGE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(<(?:img|image)\b[^>]*?\s(?:src|xlink:href|href)\s*=\s*)(?:"([^"]*)"|'([^']*)')"#,
    )
    .expect("valid image reference regex")
});

static MEDIA_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\]\(|\]:[ \t]*|src="|src='|href="|href=')media/"#)
        .expect("valid media link regex")
});

/// One image copied into the media directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    /// Archive-absolute source path
    pub source: String,
    /// File name inside the media directory
    pub name: String,
    pub media_type: String,
}

/// Canonical media names for a book, fixed before anything is rendered.
#[derive(Debug, Clone, Default)]
pub struct MediaTable {
    assets: Vec<MediaAsset>,
    by_source: HashMap<String, usize>,
}

impl MediaTable {
    /// Assign names in the order given (manifest order).
    ///
    /// Names are compared case-insensitively; the first claimant keeps a
    /// name and later ones get `-2`, `-3`, ... before the extension.
    pub fn plan<'a>(images: impl IntoIterator<Item = &'a ManifestItem>) -> Self {
        let mut table = Self::default();
        let mut taken: HashSet<String> = HashSet::new();

        for item in images {
            if table.by_source.contains_key(&item.href) {
                continue;
            }
            let base = media_file_name(&item.href);
            let mut name = base.clone();
            let mut n = 2;
            while taken.contains(&name.to_lowercase()) {
                name = with_suffix(&base, n);
                n += 1;
            }
            if name != base {
                debug!(source = %item.href, name = %name, "Renamed colliding media file");
            }
            taken.insert(name.to_lowercase());
            table.by_source.insert(item.href.clone(), table.assets.len());
            table.assets.push(MediaAsset {
                source: item.href.clone(),
                name,
                media_type: item.media_type.clone(),
            });
        }
        table
    }

    pub fn get(&self, source: &str) -> Option<&MediaAsset> {
        self.by_source.get(source).map(|&i| &self.assets[i])
    }

    pub fn assets(&self) -> &[MediaAsset] {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Point image references of a content document at the media directory.
    ///
    /// `doc_path` is the archive path of the document, used to resolve
    /// relative sources. References to files outside the table are kept.
    pub fn rewrite_html<'h>(&self, html: &'h str, doc_path: &str) -> Cow<'h, str> {
        if self.is_empty() {
            return Cow::Borrowed(html);
        }
        IMAGE_REF.replace_all(html, |caps: &Captures| {
            let (value, quote) = match (caps.get(2), caps.get(3)) {
                (Some(v), _) => (v.as_str(), '"'),
                (None, Some(v)) => (v.as_str(), '\''),
                (None, None) => ("", '"'),
            };
            match self.lookup(value, doc_path) {
                Some(asset) => format!("{}{quote}{MEDIA_DIR}/{}{quote}", &caps[1], asset.name),
                None => caps[0].to_string(),
            }
        })
    }

    fn lookup(&self, reference: &str, doc_path: &str) -> Option<&MediaAsset> {
        if reference.is_empty() || reference.contains("://") || reference.starts_with("data:") {
            return None;
        }
        let path = reference.split(['#', '?']).next().unwrap_or_default();
        let resolved = resolve_path(doc_path, &percent_decode(path));
        self.get(&resolved).or_else(|| self.get(path))
    }

    /// Copy every planned image into `<root>/media`. Returns the number of
    /// files written.
    pub fn extract<R: Read + Seek>(
        &self,
        archive: &mut EpubArchive<R>,
        root: &Path,
    ) -> Result<usize> {
        let dir = root.join(MEDIA_DIR);
        fs::create_dir_all(&dir).map_err(|e| Error::fs(&dir, e))?;

        let mut written = 0;
        for asset in &self.assets {
            let bytes = match archive.read_bytes(&asset.source) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(source = %asset.source, error = %err, "Skipping unreadable image");
                    continue;
                }
            };
            let path = dir.join(&asset.name);
            fs::write(&path, bytes).map_err(|e| Error::fs(&path, e))?;
            written += 1;
        }
        debug!(written, dir = %dir.display(), "Extracted media");
        Ok(written)
    }
}

/// Make `media/` references valid from a file `depth` directories below the
/// output root.
pub fn relink(text: &str, depth: usize) -> Cow<'_, str> {
    if depth == 0 {
        return Cow::Borrowed(text);
    }
    let up = "../".repeat(depth);
    MEDIA_LINK.replace_all(text, |caps: &Captures| format!("{}{up}{MEDIA_DIR}/", &caps[1]))
}

/// Sanitized basename of an archive path.
fn media_file_name(href: &str) -> String {
    let base = href.rsplit('/').next().unwrap_or(href);
    let name: String = percent_decode(base)
        .chars()
        .map(|c| {
            if ILLEGAL.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let name = name.trim();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        "image".to_string()
    } else {
        name.to_string()
    }
}

/// `cover.jpg` + 2 → `cover-2.jpg`
fn with_suffix(name: &str, n: usize) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}-{n}{}", &name[..dot], &name[dot..]),
        _ => format!("{name}-{n}"),
    }
}
