//! Static site generation.
//!
//! Renders every page of a site in every locale that translates it well
//! enough, and mirrors localizable and static files next to the pages.
//!
//! ## Passes
//!
//! ```text
//! pass 1 (parallel)   ratio of every (locale, page), default locale exempt
//!                     ratio < MIN_TRANSLATED ──► exclude_locale + skip page
//!                     clear_link_cache()
//! pass 2 (parallel)   process_page ──► version asset links ──► write
//! files               locales/<locale>/<file> ──► <locale>/<file>
//!                     static/<file>           ──► <file>
//! cleanup             delete everything this run did not write
//! ```
//!
//! Excluding a page between the passes makes links from other pages point
//! at the default-locale copy instead of a page that will not exist.
//!
//! ## Output Structure
//!
//! ```text
//! out/
//! ├── en/
//! │   ├── index                  # Pages keep their name, no extension
//! │   ├── docs/setup
//! │   └── logo.png               # Localizable file
//! ├── de/
//! │   └── index
//! └── css/site.css               # Static file
//! ```
//!
//! Writing is incremental: identical files are left untouched, so
//! timestamps only change for content that did.

use crate::cache::CachedSource;
use crate::converters::RenderOptions;
use crate::page::{PageError, get_page_params, process_page};
use crate::source::{SharedSource, SourceError, create_source};
use crate::types::PageFormat;
use log::{debug, warn};
use rayon::prelude::*;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use thiserror::Error;

/// Pages translated below this ratio are not published for that locale.
pub const MIN_TRANSLATED: f64 = 0.3;

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Page(#[from] PageError),
    #[error("Cannot write {path}: It is neither a file, nor a directory!")]
    UnsupportedNode { path: PathBuf },
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Emit links relative to each page instead of root-relative ones.
    pub relative: bool,
}

/// What a generation run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateSummary {
    /// Locales considered, default locale included.
    pub locales: Vec<String>,
    /// Pages rendered, counting each locale separately.
    pub pages: usize,
    /// `(locale, page)` pairs left out for lack of translations.
    pub excluded: Vec<(String, String)>,
    /// Localizable and static files copied.
    pub files: usize,
    /// Outputs actually (re)written; unchanged ones are not counted.
    pub written: usize,
    /// Stale files removed from the output directory.
    pub removed: usize,
}

pub fn generate_pages(
    source_dir: &Path,
    output_dir: &Path,
    options: &GenerateOptions,
) -> Result<GenerateSummary, GenerateError> {
    let cached = Arc::new(CachedSource::new(create_source(source_dir)?));
    let source: SharedSource = cached.clone();
    let config = source.read_config()?;
    let default_locale = config.default_locale().to_string();

    let mut locales: Vec<String> = source.list_locales().into_iter().collect();
    if !locales.contains(&default_locale) {
        locales.push(default_locale.clone());
        locales.sort();
    }

    let pairs: Vec<(String, String, PageFormat)> = source
        .list_pages()?
        .into_iter()
        .flat_map(|(page, format)| {
            locales
                .iter()
                .map(move |locale| (locale.clone(), page.clone(), format))
        })
        .collect();

    // First pass: find pages with too few translations.
    let ratios = pairs
        .par_iter()
        .filter(|(locale, _, _)| *locale != default_locale)
        .map(|(locale, page, format)| -> Result<_, GenerateError> {
            let params =
                get_page_params(&source, locale, page, Some(*format), &RenderOptions::default())?;
            Ok(((locale.clone(), page.clone()), params.translation_ratio))
        })
        .collect::<Result<Vec<_>, GenerateError>>()?;
    let mut excluded: Vec<(String, String)> = ratios
        .into_iter()
        .filter(|(_, ratio)| *ratio < MIN_TRANSLATED)
        .map(|(pair, _)| pair)
        .collect();
    excluded.sort();
    for (locale, page) in &excluded {
        debug!("excluding {locale}/{page}");
        cached.exclude_locale(locale, config.locale_file(page));
    }
    cached.clear_link_cache();

    // Second pass: render and write.
    fs::create_dir_all(output_dir)?;
    let writer = OutputWriter::new(output_dir);
    let version = source.version();
    let render_options = RenderOptions {
        relative: options.relative,
        ..Default::default()
    };
    let published: Vec<_> = pairs
        .iter()
        .filter(|(locale, page, _)| !excluded.contains(&(locale.clone(), page.clone())))
        .collect();
    let written = published
        .par_iter()
        .map(|(locale, page, format)| -> Result<_, GenerateError> {
            debug!("rendering {locale}/{page}");
            let html = process_page(&source, locale, page, Some(*format), &render_options)?;
            let html = version_links(&html, &version);
            writer.write(&format!("{locale}/{page}"), html.as_bytes())
        })
        .collect::<Result<Vec<_>, GenerateError>>()?;

    let mut files = 0;
    let mut outcomes = written;
    for filename in source.list_localizable_files()? {
        for locale in &locales {
            if source.has_localizable_file(locale, &filename) {
                let data = source.read_localizable_file(locale, &filename)?;
                outcomes.push(writer.write(&format!("{locale}/{filename}"), &data)?);
                files += 1;
            }
        }
    }
    for filename in source.list_static() {
        let data = source.read_static(&filename)?;
        outcomes.push(writer.write(&filename, &data)?);
        files += 1;
    }

    let removed = writer.remove_unknown()?;
    Ok(GenerateSummary {
        locales,
        pages: published.len(),
        excluded,
        files,
        written: outcomes
            .iter()
            .filter(|outcome| **outcome == WriteOutcome::Written)
            .count(),
        removed,
    })
}

// ============================================================================
// Asset versioning
// ============================================================================

static VERSIONED: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        r#"(<script\s[^<>]*\bsrc="/[^"<>]+)"#,
        r#"(<link\s[^<>]*\bhref="/[^"<>]+)"#,
        r#"(<img\s[^<>]*\bsrc="/[^"<>]+)"#,
    ]
    .map(|pattern| Regex::new(pattern).expect("valid regex"))
});

/// Append `?<version>` to root-relative script, stylesheet and image URLs
/// so browsers refetch them after a site change.
pub fn version_links(html: &str, version: &str) -> String {
    let replacement = format!("${{1}}?{version}");
    VERSIONED.iter().fold(html.to_string(), |html, regex| {
        regex.replace_all(&html, replacement.as_str()).into_owned()
    })
}

// ============================================================================
// Output writing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Unchanged,
    /// Another source already produced this path.
    Duplicate,
}

/// Writes outputs below a root and remembers which paths it produced.
pub struct OutputWriter {
    root: PathBuf,
    known: Mutex<HashSet<PathBuf>>,
}

impl OutputWriter {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            known: Mutex::default(),
        }
    }

    /// Write `contents` to the `/`-separated `relative` path.
    ///
    /// A file standing where a directory is needed is removed, and so is a
    /// directory standing where the file goes. Any other kind of node is an
    /// error.
    pub fn write(&self, relative: &str, contents: &[u8]) -> Result<WriteOutcome, GenerateError> {
        let path = relative
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part));

        let first = self
            .known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.clone());
        if !first {
            warn!("File {} has multiple sources", path.display());
            return Ok(WriteOutcome::Duplicate);
        }

        if let Some(parent) = path.parent() {
            self.make_dirs(parent)?;
        }

        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path)?,
            Ok(meta) if meta.is_file() => {
                if fs::read(&path)? == contents {
                    return Ok(WriteOutcome::Unchanged);
                }
            }
            Ok(_) => return Err(GenerateError::UnsupportedNode { path }),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        fs::write(&path, contents)?;
        Ok(WriteOutcome::Written)
    }

    /// Create `dir` and its ancestors below the root, replacing files that
    /// are in the way.
    fn make_dirs(&self, dir: &Path) -> Result<(), GenerateError> {
        let Ok(relative) = dir.strip_prefix(&self.root) else {
            return Ok(());
        };
        let mut current = self.root.clone();
        for part in relative.components() {
            current.push(part);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.is_dir() => continue,
                Ok(meta) if meta.is_file() => fs::remove_file(&current)?,
                Ok(_) => {
                    return Err(GenerateError::UnsupportedNode { path: current });
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            match fs::create_dir(&current) {
                Err(e) if e.kind() != ErrorKind::AlreadyExists => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }

    /// Delete every file below the root that was not written through this
    /// writer, then prune empty directories. Returns the number of files
    /// removed.
    pub fn remove_unknown(&self) -> Result<usize, GenerateError> {
        let known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
        remove_unknown(&self.root, &known)
    }
}

fn remove_unknown(dir: &Path, known: &HashSet<PathBuf>) -> Result<usize, GenerateError> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let meta = fs::symlink_metadata(&path)?;
        if meta.is_dir() {
            removed += remove_unknown(&path, known)?;
            if fs::read_dir(&path)?.next().is_none() {
                fs::remove_dir(&path)?;
            }
        } else if meta.is_file() && !known.contains(&path) {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn versions_root_relative_assets_only() {
        let html = concat!(
            r#"<script async src="/js/app.js"></script>"#,
            r#"<link rel="stylesheet" href="/css/site.css">"#,
            r#"<img alt="" src="/en/logo.png">"#,
            r#"<img src="https://cdn.example.com/x.png">"#,
            r#"<a href="/en/faq">"#,
        );
        let versioned = version_links(html, "abc123");
        assert!(versioned.contains(r#"src="/js/app.js?abc123""#));
        assert!(versioned.contains(r#"href="/css/site.css?abc123""#));
        assert!(versioned.contains(r#"src="/en/logo.png?abc123""#));
        assert!(versioned.contains(r#"src="https://cdn.example.com/x.png""#));
        assert!(versioned.contains(r#"<a href="/en/faq">"#));
    }

    #[test]
    fn unchanged_file_is_not_rewritten() {
        let tmp = TempDir::new().unwrap();
        let writer = OutputWriter::new(tmp.path());
        assert_eq!(writer.write("en/index", b"x").unwrap(), WriteOutcome::Written);

        let writer = OutputWriter::new(tmp.path());
        assert_eq!(writer.write("en/index", b"x").unwrap(), WriteOutcome::Unchanged);
        assert_eq!(writer.write("en/index", b"y").unwrap(), WriteOutcome::Duplicate);
        assert_eq!(fs::read(tmp.path().join("en/index")).unwrap(), b"x");
    }

    #[test]
    fn file_becomes_directory() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("en")).unwrap();
        fs::write(tmp.path().join("en/foo"), "old").unwrap();

        let writer = OutputWriter::new(tmp.path());
        writer.write("en/foo/bar", b"new").unwrap();
        assert!(tmp.path().join("en/foo").is_dir());
        assert_eq!(fs::read_to_string(tmp.path().join("en/foo/bar")).unwrap(), "new");
    }

    #[test]
    fn directory_becomes_file() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("en/translate/sub")).unwrap();
        fs::write(tmp.path().join("en/translate/sub/x"), "old").unwrap();

        let writer = OutputWriter::new(tmp.path());
        writer.write("en/translate", b"page").unwrap();
        assert!(tmp.path().join("en/translate").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn fifo_in_the_way_is_an_error() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("en")).unwrap();
        let status = std::process::Command::new("mkfifo")
            .arg(tmp.path().join("en/translate"))
            .status()
            .unwrap();
        assert!(status.success());

        let writer = OutputWriter::new(tmp.path());
        let err = writer.write("en/translate", b"page").unwrap_err();
        assert!(err.to_string().contains("It is neither a file, nor a directory!"));
    }

    #[test]
    fn unknown_files_and_empty_dirs_are_removed() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("old/deep")).unwrap();
        fs::write(tmp.path().join("old/deep/stale"), "").unwrap();
        fs::write(tmp.path().join("stale"), "").unwrap();

        let writer = OutputWriter::new(tmp.path());
        writer.write("en/index", b"x").unwrap();
        assert_eq!(writer.remove_unknown().unwrap(), 2);
        assert!(!tmp.path().join("old").exists());
        assert!(!tmp.path().join("stale").exists());
        assert!(tmp.path().join("en/index").is_file());
    }
}
