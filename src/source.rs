//! Page, locale and asset store.
//!
//! Everything the renderer reads comes through the [`Source`] trait. A site
//! source is a directory tree:
//!
//! ```text
//! site/
//! ├── settings.toml
//! ├── pages/                  # <name>.html | <name>.md | <name>.tmpl
//! │   ├── index.md
//! │   └── docs/faq.html
//! ├── locales/
//! │   ├── en/
//! │   │   ├── index.json      # translation table for page "index"
//! │   │   └── logo.png        # localizable file
//! │   └── de/index.json
//! ├── templates/default.tmpl  # whole-page templates
//! ├── includes/footer.md      # partials for <? include footer ?>
//! └── static/css/site.css     # copied verbatim
//! ```
//!
//! Implementors provide four primitives (`has_file`, `read_file`,
//! `read_binary`, `list_files`) plus a version string; every higher-level
//! query is a provided method built on them. [`FileSource`] reads a
//! directory, [`MultiSource`] layers several sources so that a site can
//! borrow pages, templates and includes from shared roots listed under
//! `[paths]` in its settings.

use crate::config::{self, ConfigError, SiteConfig, SETTINGS_FILENAME};
use crate::link::{self, ResolvedLink};
use crate::locale::{LocaleError, LocaleFileOrigin, LocaleTable, parse_locale_file};
use crate::types::{PageFormat, UnknownFormat};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read {file}: {source}")]
    Read {
        file: String,
        #[source]
        source: io::Error,
    },
    #[error("File not found {0}")]
    NotFound(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Locale(#[from] LocaleError),
    #[error(transparent)]
    UnknownFormat(#[from] UnknownFormat),
}

/// A shareable, thread-safe source.
pub type SharedSource = Arc<dyn Source>;

pub fn page_filename(page: &str, format: PageFormat) -> String {
    format!("pages/{page}.{format}")
}

pub fn localizable_file_filename(locale: &str, filename: &str) -> String {
    format!("locales/{locale}/{filename}")
}

pub fn static_filename(filename: &str) -> String {
    format!("static/{filename}")
}

pub fn template_filename(template: &str) -> String {
    format!("templates/{template}.tmpl")
}

pub fn include_filename(include: &str, format: PageFormat) -> String {
    format!("includes/{include}.{format}")
}

/// Split `dir/name.ext` into `("dir/name", "ext")`. The extension is empty
/// when the last path segment has no dot.
pub fn split_extension(filename: &str) -> (&str, &str) {
    let segment_start = filename.rfind('/').map_or(0, |i| i + 1);
    match filename[segment_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let dot = segment_start + dot;
            (&filename[..dot], &filename[dot + 1..])
        }
        _ => (filename, ""),
    }
}

pub trait Source: Send + Sync {
    fn has_file(&self, filename: &str) -> bool;

    /// Read a text file. Returns its content and a path naming it for
    /// error messages.
    fn read_file(&self, filename: &str) -> Result<(String, String), SourceError>;

    fn read_binary(&self, filename: &str) -> Result<Vec<u8>, SourceError>;

    /// Files below `subdir`, as sorted `/`-separated paths relative to it.
    fn list_files(&self, subdir: &str) -> Vec<String>;

    /// Content version of the source, used to cache-bust static links.
    fn version(&self) -> String;

    // ========================================================================
    // Configuration
    // ========================================================================

    fn read_config(&self) -> Result<Arc<SiteConfig>, SourceError> {
        if !self.has_file(SETTINGS_FILENAME) {
            return Ok(Arc::new(SiteConfig::default()));
        }
        let (content, path) = self.read_file(SETTINGS_FILENAME)?;
        Ok(Arc::new(config::parse_config(&content, &path)?))
    }

    // ========================================================================
    // Pages
    // ========================================================================

    fn list_pages(&self) -> Result<Vec<(String, PageFormat)>, SourceError> {
        self.list_files("pages")
            .iter()
            .map(|filename| {
                let (page, ext) = split_extension(filename);
                let format = PageFormat::from_extension(ext).ok_or_else(|| UnknownFormat {
                    page: page.to_string(),
                    format: ext.to_lowercase(),
                })?;
                Ok((page.to_string(), format))
            })
            .collect()
    }

    /// Whether the page exists in `format`, or in any format if `None`.
    fn has_page(&self, page: &str, format: Option<PageFormat>) -> bool {
        match format {
            Some(format) => self.has_file(&page_filename(page, format)),
            None => PageFormat::ALL
                .into_iter()
                .any(|format| self.has_page(page, Some(format))),
        }
    }

    fn read_page(&self, page: &str, format: PageFormat) -> Result<(String, String), SourceError> {
        self.read_file(&page_filename(page, format))
    }

    // ========================================================================
    // Localizable files
    // ========================================================================

    /// Non-JSON files in the default locale's directory.
    fn list_localizable_files(&self) -> Result<Vec<String>, SourceError> {
        let config = self.read_config()?;
        Ok(self
            .list_files(&format!("locales/{}", config.default_locale()))
            .into_iter()
            .filter(|f| !split_extension(f).1.eq_ignore_ascii_case("json"))
            .collect())
    }

    fn has_localizable_file(&self, locale: &str, filename: &str) -> bool {
        self.has_file(&localizable_file_filename(locale, filename))
    }

    fn read_localizable_file(&self, locale: &str, filename: &str) -> Result<Vec<u8>, SourceError> {
        self.read_binary(&localizable_file_filename(locale, filename))
    }

    // ========================================================================
    // Static files
    // ========================================================================

    fn list_static(&self) -> Vec<String> {
        self.list_files("static")
    }

    fn has_static(&self, filename: &str) -> bool {
        self.has_file(&static_filename(filename))
    }

    fn read_static(&self, filename: &str) -> Result<Vec<u8>, SourceError> {
        self.read_binary(&static_filename(filename))
    }

    // ========================================================================
    // Locales
    // ========================================================================

    /// Translation file for a page, honoring `[locale_overrides]`.
    fn locale_filename(&self, locale: &str, page: &str) -> Result<String, SourceError> {
        let config = self.read_config()?;
        Ok(localizable_file_filename(
            locale,
            &format!("{}.json", config.locale_file(page)),
        ))
    }

    /// Every locale that has a directory with at least one file.
    fn list_locales(&self) -> BTreeSet<String> {
        self.list_files("locales")
            .iter()
            .filter_map(|f| f.split_once('/').map(|(locale, _)| locale.to_string()))
            .collect()
    }

    fn has_locale(&self, locale: &str, page: &str) -> Result<bool, SourceError> {
        Ok(self.has_file(&self.locale_filename(locale, page)?))
    }

    /// Translation table for `(locale, page)` with the default locale's
    /// table merged underneath.
    fn read_locale(&self, locale: &str, page: &str) -> Result<Arc<LocaleTable>, SourceError> {
        let config = self.read_config()?;
        let default_locale = config.default_locale();
        let mut table = if locale == default_locale {
            LocaleTable::new()
        } else {
            LocaleTable::inheriting(&*self.read_locale(default_locale, page)?)
        };

        if self.has_locale(locale, page)? {
            let (data, path) = self.read_file(&self.locale_filename(locale, page)?)?;
            let origin = LocaleFileOrigin {
                page,
                locale,
                file: &path,
            };
            for (name, message) in parse_locale_file(&data, origin)? {
                table.insert(name, message);
            }
        }
        Ok(Arc::new(table))
    }

    // ========================================================================
    // Templates and includes
    // ========================================================================

    fn read_template(&self, template: &str) -> Result<(String, String), SourceError> {
        self.read_file(&template_filename(template))
    }

    /// Look up a template by the name used inside template code
    /// (`{% extends "templates/default" %}` or just `"default"`).
    fn read_template_file(&self, name: &str) -> Result<(String, String), SourceError> {
        let direct = format!("{name}.tmpl");
        if self.has_file(&direct) {
            self.read_file(&direct)
        } else {
            self.read_template(name)
        }
    }

    fn has_include(&self, include: &str, format: PageFormat) -> bool {
        self.has_file(&include_filename(include, format))
    }

    fn read_include(&self, include: &str, format: PageFormat) -> Result<(String, String), SourceError> {
        self.read_file(&include_filename(include, format))
    }

    // ========================================================================
    // Links
    // ========================================================================

    fn resolve_link(
        &self,
        url: &str,
        locale: &str,
        source_page: Option<&str>,
    ) -> Result<ResolvedLink, SourceError> {
        link::resolve_link(self, url, locale, source_page)
    }
}

// ============================================================================
// FileSource
// ============================================================================

/// A site source read from a directory.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `filename` below the root. Names that could step outside
    /// the root (`..`, `.`, backslashes, drive prefixes) have none.
    fn path(&self, filename: &str) -> Option<PathBuf> {
        let segments: Vec<&str> = filename
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        if segments
            .iter()
            .any(|segment| matches!(*segment, "." | "..") || segment.contains(['\\', ':']))
        {
            return None;
        }
        Some(
            segments
                .into_iter()
                .fold(self.root.clone(), |path, segment| path.join(segment)),
        )
    }

    fn existing_path(&self, filename: &str) -> Result<PathBuf, SourceError> {
        self.path(filename)
            .ok_or_else(|| SourceError::NotFound(filename.to_string()))
    }
}

impl Source for FileSource {
    fn has_file(&self, filename: &str) -> bool {
        self.path(filename).is_some_and(|path| path.is_file())
    }

    fn read_file(&self, filename: &str) -> Result<(String, String), SourceError> {
        let path = self.existing_path(filename)?;
        let file = path.display().to_string();
        match fs::read_to_string(&path) {
            Ok(content) => Ok((content, file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(SourceError::NotFound(file)),
            Err(source) => Err(SourceError::Read { file, source }),
        }
    }

    fn read_binary(&self, filename: &str) -> Result<Vec<u8>, SourceError> {
        let path = self.existing_path(filename)?;
        fs::read(&path).map_err(|source| {
            let file = path.display().to_string();
            if source.kind() == io::ErrorKind::NotFound {
                SourceError::NotFound(file)
            } else {
                SourceError::Read { file, source }
            }
        })
    }

    fn list_files(&self, subdir: &str) -> Vec<String> {
        let Some(dir) = self.path(subdir) else {
            return Vec::new();
        };
        let mut files: Vec<String> = WalkDir::new(&dir)
            .min_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let relative = e.path().strip_prefix(&dir).ok()?;
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                Some(parts.join("/"))
            })
            .collect();
        files.sort();
        files
    }

    fn version(&self) -> String {
        site_version(&self.root)
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Short SHA-256 over every file path and content below `root`.
///
/// Deterministic for identical trees, so repeated builds of an unchanged
/// site produce identical output.
pub fn site_version(root: &Path) -> String {
    let mut entries: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    entries.sort();

    let mut hasher = Sha256::new();
    for path in entries {
        let relative = path.strip_prefix(root).unwrap_or(&path);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0]);
        if let Ok(bytes) = fs::read(&path) {
            hasher.update(&bytes);
        }
        hasher.update([0]);
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..12].to_string()
}

// ============================================================================
// MultiSource
// ============================================================================

/// Several sources searched in order. A file in an earlier source shadows
/// the same file in later ones.
pub struct MultiSource {
    bases: Vec<SharedSource>,
}

impl MultiSource {
    pub fn new(bases: Vec<SharedSource>) -> Self {
        Self { bases }
    }

    fn first_with(&self, filename: &str) -> Option<&SharedSource> {
        self.bases.iter().find(|base| base.has_file(filename))
    }
}

impl Source for MultiSource {
    fn has_file(&self, filename: &str) -> bool {
        self.first_with(filename).is_some()
    }

    fn read_file(&self, filename: &str) -> Result<(String, String), SourceError> {
        match self.first_with(filename) {
            Some(base) => base.read_file(filename),
            None => Err(SourceError::NotFound(filename.to_string())),
        }
    }

    fn read_binary(&self, filename: &str) -> Result<Vec<u8>, SourceError> {
        match self.first_with(filename) {
            Some(base) => base.read_binary(filename),
            None => Err(SourceError::NotFound(filename.to_string())),
        }
    }

    fn list_files(&self, subdir: &str) -> Vec<String> {
        let all: BTreeSet<String> = self
            .bases
            .iter()
            .flat_map(|base| base.list_files(subdir))
            .collect();
        all.into_iter().collect()
    }

    fn version(&self) -> String {
        self.bases
            .first()
            .map(|base| base.version())
            .unwrap_or_default()
    }

    /// A page defined by an earlier base in any format hides every copy
    /// of it in later bases, so one page never has two competing sources.
    fn list_pages(&self) -> Result<Vec<(String, PageFormat)>, SourceError> {
        let mut all_seen = HashSet::new();
        let mut pages = Vec::new();
        for base in &self.bases {
            let mut base_seen = HashSet::new();
            for (page, format) in base.list_pages()? {
                if !all_seen.contains(&page) {
                    base_seen.insert(page.clone());
                    pages.push((page, format));
                }
            }
            all_seen.extend(base_seen);
        }
        Ok(pages)
    }

    fn has_page(&self, page: &str, format: Option<PageFormat>) -> bool {
        match self.bases.iter().find(|base| base.has_page(page, None)) {
            Some(base) => format.is_none() || base.has_page(page, format),
            None => false,
        }
    }
}

/// Open the site at `path`. Roots named in `[paths] additional_paths`
/// (relative to `path` unless absolute) are layered behind it, recursively.
pub fn create_source(path: &Path) -> Result<SharedSource, SourceError> {
    let source = FileSource::new(path);
    let config = source.read_config()?;
    if config.paths.additional_paths.is_empty() {
        return Ok(Arc::new(source));
    }

    let mut bases: Vec<SharedSource> = vec![Arc::new(source)];
    for extra in &config.paths.additional_paths {
        bases.push(create_source(&path.join(extra))?);
    }
    Ok(Arc::new(MultiSource::new(bases)))
}
