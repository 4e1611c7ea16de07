//! Package loading: container.xml, OPF manifest and spine.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, info};
use zip::ZipArchive;

use super::{attribute, local_name, resolve_entity};
use crate::book::{ManifestItem, Metadata, SpineItem};
use crate::error::{Error, Result};
use crate::util::{collapse_whitespace, decode_text, percent_decode, resolve_path, strip_bom};

/// Parsed OPF package data. Paths are archive-absolute.
#[derive(Debug, Clone, Default)]
pub struct Package {
    pub opf_path: String,
    pub metadata: Metadata,
    /// Manifest items in document order
    pub manifest: Vec<ManifestItem>,
    pub spine: Vec<SpineItem>,
    /// Manifest id named by the spine's `toc` attribute (EPUB 2 NCX)
    pub toc_id: Option<String>,
}

impl Package {
    pub fn manifest_item(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.id == id)
    }

    /// Image resources in manifest order.
    pub fn images(&self) -> impl Iterator<Item = &ManifestItem> {
        self.manifest.iter().filter(|item| item.is_image())
    }

    /// Navigation documents to try, in order: the spine's NCX, then the
    /// EPUB 3 `nav` document.
    pub fn navigation_documents(&self) -> Vec<ManifestItem> {
        let mut docs = Vec::new();
        if let Some(ncx) = self.toc_id.as_deref().and_then(|id| self.manifest_item(id)) {
            docs.push(ncx.clone());
        }
        if let Some(nav) = self.manifest.iter().find(|item| item.has_property("nav"))
            && !docs.contains(nav)
        {
            docs.push(nav.clone());
        }
        docs
    }
}

/// An opened EPUB: the ZIP archive plus its parsed package document.
pub struct EpubArchive<R = File> {
    zip: ZipArchive<R>,
    package: Package,
}

impl EpubArchive<File> {
    /// Open an EPUB file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::Archive(format!("cannot open {}: {e}", path.display())))?;
        Self::from_reader(file)
    }
}

impl<R: Read + Seek> EpubArchive<R> {
    /// Read an EPUB from any [`Read`] + [`Seek`] source.
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut zip = ZipArchive::new(reader)
            .map_err(|e| Error::Archive(format!("not a ZIP container: {e}")))?;

        let container = read_entry(&mut zip, "META-INF/container.xml")
            .map_err(|_| Error::Archive("META-INF/container.xml missing".into()))?;
        let opf_path = parse_container_xml(&container)?;

        let opf_bytes = read_entry(&mut zip, &opf_path)
            .map_err(|_| Error::Archive(format!("package document {opf_path} missing")))?;
        let package = parse_opf(&decode_text(strip_bom(&opf_bytes)), &opf_path)?;

        info!(
            title = %package.metadata.title,
            manifest = package.manifest.len(),
            spine = package.spine.len(),
            "Loaded package document"
        );

        Ok(Self { zip, package })
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    pub fn contains(&self, path: &str) -> bool {
        self.zip.index_for_name(path).is_some()
    }

    /// Read an archive entry by its archive-absolute path.
    pub fn read_bytes(&mut self, path: &str) -> Result<Vec<u8>> {
        read_entry(&mut self.zip, path)
    }

    /// Read an archive entry as text, detecting its encoding.
    pub fn read_text(&mut self, path: &str) -> Result<String> {
        let bytes = self.read_bytes(path)?;
        Ok(decode_text(strip_bom(&bytes)).into_owned())
    }
}

fn read_entry<R: Read + Seek>(zip: &mut ZipArchive<R>, path: &str) -> Result<Vec<u8>> {
    // Try direct lookup first
    match zip.by_name(path) {
        Ok(mut file) => {
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)?;
            return Ok(contents);
        }
        Err(zip::result::ZipError::FileNotFound) => {}
        Err(e) => return Err(e.into()),
    }

    // Fallback: percent-decoded path (handles malformed EPUBs)
    let decoded = percent_decode(path);
    debug!(path, decoded = %decoded, "Retrying archive lookup with decoded path");
    let mut file = zip.by_name(&decoded)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

/// Parse META-INF/container.xml to find the OPF path.
pub fn parse_container_xml(bytes: &[u8]) -> Result<String> {
    let content = decode_text(strip_bom(bytes));
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e))
                if local_name(e.name().as_ref()) == b"rootfile" =>
            {
                if let Some(path) = attribute(&e, b"full-path") {
                    return Ok(path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    Err(Error::Archive("No rootfile found in container.xml".into()))
}

/// Parse the OPF package document located at `opf_path`.
pub fn parse_opf(content: &str, opf_path: &str) -> Result<Package> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);

    let mut package = Package {
        opf_path: opf_path.to_string(),
        ..Package::default()
    };
    let mut spine_refs: Vec<(String, bool)> = Vec::new();

    let mut in_metadata = false;
    let mut current_element: Option<Vec<u8>> = None;
    let mut buf_text = String::new();

    loop {
        let (e, is_start) = match reader.read_event() {
            Ok(Event::Start(e)) => (e, true),
            Ok(Event::Empty(e)) => (e, false),
            Ok(Event::Text(e)) => {
                if current_element.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
                continue;
            }
            Ok(Event::GeneralRef(e)) => {
                if current_element.is_some()
                    && let Some(resolved) = resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    buf_text.push_str(&resolved);
                }
                continue;
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if local == b"metadata" {
                    in_metadata = false;
                }
                if let Some(elem) = current_element.take() {
                    let value = collapse_whitespace(&buf_text);
                    match elem.as_slice() {
                        b"title" if package.metadata.title.is_empty() => {
                            package.metadata.title = value
                        }
                        b"creator" => package.metadata.authors.push(value),
                        b"language" if package.metadata.language.is_empty() => {
                            package.metadata.language = value
                        }
                        _ => {}
                    }
                    buf_text.clear();
                }
                continue;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => continue,
        };

        let name = e.name();
        let local = local_name(name.as_ref());
        match local {
            b"metadata" if is_start => in_metadata = true,
            b"title" | b"creator" | b"language" if in_metadata && is_start => {
                current_element = Some(local.to_vec());
                buf_text.clear();
            }
            b"item" => {
                let id = attribute(&e, b"id").unwrap_or_default();
                let href = attribute(&e, b"href").unwrap_or_default();
                if id.is_empty() || href.is_empty() {
                    continue;
                }
                package.manifest.push(ManifestItem {
                    href: resolve_path(opf_path, &percent_decode(&href)),
                    id,
                    media_type: attribute(&e, b"media-type").unwrap_or_default(),
                    properties: attribute(&e, b"properties")
                        .map(|p| p.split_ascii_whitespace().map(str::to_string).collect())
                        .unwrap_or_default(),
                });
            }
            b"spine" => package.toc_id = attribute(&e, b"toc"),
            b"itemref" => {
                if let Some(idref) = attribute(&e, b"idref") {
                    let linear = attribute(&e, b"linear").is_none_or(|v| v != "no");
                    spine_refs.push((idref, linear));
                }
            }
            _ => {}
        }
    }

    for (idref, linear) in spine_refs {
        match package.manifest_item(&idref) {
            Some(item) => {
                let index = package.spine.len();
                package.spine.push(SpineItem {
                    id: idref,
                    href: item.href.clone(),
                    index,
                    linear,
                });
            }
            None => debug!(idref = %idref, "Spine references unknown manifest item"),
        }
    }

    Ok(package)
}
