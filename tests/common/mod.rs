//! Shared fixtures: EPUBs built on the fly and a pandoc stand-in.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tocsplit::{MarkdownEngine, RenderError};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

struct Item {
    id: String,
    href: String,
    media_type: String,
    properties: Option<String>,
    data: Option<Vec<u8>>,
    in_spine: bool,
}

/// Builds a minimal EPUB 3 package under `OEBPS/`.
pub struct EpubBuilder {
    title: String,
    items: Vec<Item>,
    ncx: bool,
}

impl EpubBuilder {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            items: Vec::new(),
            ncx: false,
        }
    }

    /// A content document in the spine; `href` is relative to the OPF.
    pub fn chapter(mut self, id: &str, href: &str, body: &str) -> Self {
        let xhtml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>{id}</title></head>
<body>
{body}
</body>
</html>"#
        );
        self.items.push(Item {
            id: id.to_string(),
            href: href.to_string(),
            media_type: "application/xhtml+xml".to_string(),
            properties: None,
            data: Some(xhtml.into_bytes()),
            in_spine: true,
        });
        self
    }

    /// A spine entry whose file is not in the archive.
    pub fn missing_chapter(mut self, id: &str, href: &str) -> Self {
        self.items.push(Item {
            id: id.to_string(),
            href: href.to_string(),
            media_type: "application/xhtml+xml".to_string(),
            properties: None,
            data: None,
            in_spine: true,
        });
        self
    }

    pub fn image(mut self, id: &str, href: &str, bytes: &[u8]) -> Self {
        self.items.push(Item {
            id: id.to_string(),
            href: href.to_string(),
            media_type: "image/png".to_string(),
            properties: None,
            data: Some(bytes.to_vec()),
            in_spine: false,
        });
        self
    }

    /// An EPUB 3 navigation document at `OEBPS/nav.xhtml` holding `ol`.
    pub fn nav(self, ol: &str) -> Self {
        self.nav_document(&format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Contents</title></head>
<body>
<nav epub:type="toc" id="toc">
<h1>Contents</h1>
{ol}
</nav>
</body>
</html>"#
        ))
    }

    /// A navigation document with arbitrary (possibly broken) markup.
    pub fn nav_document(mut self, xhtml: &str) -> Self {
        self.items.push(Item {
            id: "nav".to_string(),
            href: "nav.xhtml".to_string(),
            media_type: "application/xhtml+xml".to_string(),
            properties: Some("nav".to_string()),
            data: Some(xhtml.as_bytes().to_vec()),
            in_spine: false,
        });
        self
    }

    /// An NCX at `OEBPS/toc.ncx` holding `nav_points`.
    pub fn ncx(mut self, nav_points: &str) -> Self {
        let ncx = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
<docTitle><text>{}</text></docTitle>
<navMap>
{nav_points}
</navMap>
</ncx>"#,
            self.title
        );
        self.items.push(Item {
            id: "ncx".to_string(),
            href: "toc.ncx".to_string(),
            media_type: "application/x-dtbncx+xml".to_string(),
            properties: None,
            data: Some(ncx.into_bytes()),
            in_spine: false,
        });
        self.ncx = true;
        self
    }

    fn opf(&self) -> String {
        let manifest: String = self
            .items
            .iter()
            .map(|item| {
                let properties = item
                    .properties
                    .as_ref()
                    .map(|p| format!(r#" properties="{p}""#))
                    .unwrap_or_default();
                format!(
                    r#"    <item id="{}" href="{}" media-type="{}"{properties}/>
"#,
                    item.id, item.href, item.media_type
                )
            })
            .collect();
        let spine: String = self
            .items
            .iter()
            .filter(|item| item.in_spine)
            .map(|item| format!("    <itemref idref=\"{}\"/>\n", item.id))
            .collect();
        let toc = if self.ncx { r#" toc="ncx""# } else { "" };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">urn:test</dc:identifier>
    <dc:title>{}</dc:title>
    <dc:creator>Test Author</dc:creator>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine{toc}>
{spine}  </spine>
</package>
"#,
            self.title
        )
    }

    /// Write the EPUB to `dir/<name>` and return its path.
    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();

        zip.start_file("META-INF/container.xml", deflated).unwrap();
        zip.write_all(
            br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
        )
        .unwrap();

        zip.start_file("OEBPS/content.opf", deflated).unwrap();
        zip.write_all(self.opf().as_bytes()).unwrap();

        for item in &self.items {
            if let Some(data) = &item.data {
                zip.start_file(format!("OEBPS/{}", item.href), deflated).unwrap();
                zip.write_all(data).unwrap();
            }
        }
        zip.finish().unwrap();
        path
    }
}

static BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<h([1-6])([^>]*)>(.*?)</h[1-6]>|<p([^>]*)>(.*?)</p>|<img([^>]*?)/?>|<span([^>]*)>\s*</span>"#,
    )
    .unwrap()
});
static INLINE_IMG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"<img([^>]*?)/?>"#).unwrap());
static INLINE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<span([^>]*)>\s*</span>"#).unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

fn attr(attrs: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(r#"\b{name}\s*=\s*"([^"]*)""#)).unwrap();
    re.captures(attrs).map(|c| c[1].to_string())
}

fn image(attrs: &str) -> String {
    format!(
        "![{}]({})",
        attr(attrs, "alt").unwrap_or_default(),
        attr(attrs, "src").unwrap_or_default()
    )
}

fn inline(html: &str) -> String {
    let html = INLINE_IMG.replace_all(html, |c: &Captures| image(&c[1]));
    let html = INLINE_SPAN.replace_all(&html, |c: &Captures| {
        attr(&c[1], "id").map(|id| format!("[]{{#{id}}}")).unwrap_or_default()
    });
    TAG.replace_all(&html, "").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Converts the small HTML subset used by the fixtures the way pandoc
/// would: headings keep `{#id}`, empty spans become `[]{#id}`, images
/// become `![alt](src)`.
#[derive(Default)]
pub struct FakeEngine {
    pub calls: Cell<usize>,
}

impl MarkdownEngine for FakeEngine {
    fn convert(&self, html: &str) -> Result<String, RenderError> {
        self.calls.set(self.calls.get() + 1);
        let mut out = String::new();
        for caps in BLOCK.captures_iter(html) {
            if let Some(level) = caps.get(1) {
                let level: usize = level.as_str().parse().unwrap();
                out.push_str(&"#".repeat(level));
                out.push(' ');
                out.push_str(&inline(&caps[3]));
                if let Some(id) = attr(&caps[2], "id") {
                    out.push_str(&format!(" {{#{id}}}"));
                }
            } else if let Some(text) = caps.get(5) {
                if let Some(id) = attr(&caps[4], "id") {
                    out.push_str(&format!("[]{{#{id}}}"));
                }
                out.push_str(&inline(text.as_str()));
            } else if let Some(attrs) = caps.get(6) {
                out.push_str(&image(attrs.as_str()));
            } else if let Some(attrs) = caps.get(7) {
                match attr(attrs.as_str(), "id") {
                    Some(id) => out.push_str(&format!("[]{{#{id}}}")),
                    None => continue,
                }
            }
            out.push_str("\n\n");
        }
        Ok(out)
    }
}

/// An engine that always times out.
pub struct StalledEngine;

impl MarkdownEngine for StalledEngine {
    fn convert(&self, _html: &str) -> Result<String, RenderError> {
        Err(RenderError::Timeout(std::time::Duration::from_secs(1)))
    }
}

/// Every file under `root` as relative `/`-separated path → contents.
pub fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(dir: &Path, root: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(&path, root, out);
            } else {
                let rel = path.strip_prefix(root).unwrap();
                let rel = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

/// Markdown files of a tree, in path order.
pub fn markdown_files(root: &Path) -> Vec<String> {
    read_tree(root)
        .into_keys()
        .filter(|path| path.ends_with(".md"))
        .collect()
}

pub fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}
