//! Run configuration, loaded from TOML and overridden from the command line.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Suffix appended to the input's stem to name the output root.
pub const OUTPUT_SUFFIX: &str = "_toc_split";

/// What to do with a parent entry whose own slice is blank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum EmptyParents {
    /// Create the directory but no file for the parent itself
    #[default]
    Omit,
    /// Write the (blank) file anyway
    Write,
}

/// Options for one run over a batch of inputs.
///
/// ```toml
/// pandoc_path = "/usr/local/bin/pandoc"
/// timeout_secs = 120
/// empty_parents = "write"
/// numbered = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Explicit pandoc executable; searched for when unset
    pub pandoc_path: Option<PathBuf>,
    /// Bound on a single engine call
    pub timeout_secs: u64,
    pub empty_parents: EmptyParents,
    /// Prefix sibling names with their zero-padded order
    pub numbered: bool,
    /// Longest file or directory name, in characters; names are also
    /// capped at `output::MAX_NAME_BYTES` bytes of UTF-8
    pub max_name_len: usize,
    /// Parent of the output roots; next to each input when unset
    pub output_dir: Option<PathBuf>,
    /// Remove an existing output root before writing
    pub clean: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pandoc_path: None,
            timeout_secs: 300,
            empty_parents: EmptyParents::Omit,
            numbered: false,
            max_name_len: 100,
            output_dir: None,
            clean: true,
        }
    }
}

impl Config {
    /// Read a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::from_toml(&contents)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), ?config, "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be positive".into()));
        }
        if self.max_name_len == 0 {
            return Err(Error::Config("max_name_len must be positive".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// `<stem>_toc_split`, next to the input or under `output_dir`.
    pub fn output_root(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "book".to_string());
        let name = format!("{stem}{OUTPUT_SUFFIX}");
        match &self.output_dir {
            Some(dir) => dir.join(name),
            None => input
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."))
                .join(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
        assert_eq!(Config::default().timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_parse_all_fields() {
        let config = Config::from_toml(
            r#"
            pandoc_path = "/opt/pandoc"
            timeout_secs = 30
            empty_parents = "write"
            numbered = true
            max_name_len = 40
            output_dir = "out"
            clean = false
            "#,
        )
        .unwrap();
        assert_eq!(config.pandoc_path.as_deref(), Some(Path::new("/opt/pandoc")));
        assert_eq!(config.empty_parents, EmptyParents::Write);
        assert!(config.numbered);
        assert_eq!(config.max_name_len, 40);
        assert!(!config.clean);
    }

    #[test]
    fn test_rejects_unknown_and_invalid() {
        assert!(matches!(Config::from_toml("colour = true"), Err(Error::Config(_))));
        assert!(matches!(Config::from_toml("timeout_secs = 0"), Err(Error::Config(_))));
        assert!(matches!(
            Config::from_toml("empty_parents = \"maybe\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_output_root() {
        let config = Config::default();
        assert_eq!(
            config.output_root(Path::new("books/My Book.epub")),
            Path::new("books/My Book_toc_split")
        );
        assert_eq!(
            config.output_root(Path::new("novel.epub")),
            Path::new("./novel_toc_split")
        );

        let config = Config {
            output_dir: Some(PathBuf::from("/tmp/out")),
            ..Config::default()
        };
        assert_eq!(
            config.output_root(Path::new("books/novel.epub")),
            Path::new("/tmp/out/novel_toc_split")
        );
    }
}
