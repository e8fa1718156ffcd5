//! Shared test utilities for the polysite test suite.
//!
//! Provides the fixture site copy and an in-memory [`Source`] so unit tests
//! can describe a tiny site inline instead of touching the filesystem.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::test_helpers::*;
//!
//! let source = MemorySource::new(&[
//!     ("pages/index.md", "{{title Hello}}"),
//!     ("templates/default.tmpl", "{{ body|safe }}"),
//! ])
//! .shared();
//! let html = render(&source, "en", "index");
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use crate::page::process_page;
use crate::source::{SharedSource, Source, SourceError};

// =========================================================================
// Fixture setup
// =========================================================================

/// Copy `fixtures/site/` to a temp directory and return it.
///
/// Tests get an isolated copy they can mutate without affecting other tests
/// or the source fixtures.
pub fn setup_fixtures() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/site");
    copy_dir_recursive(&fixtures, tmp.path()).unwrap();
    tmp
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            std::fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

// =========================================================================
// In-memory source
// =========================================================================

/// A site held in memory, keyed by `/`-separated path.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new(files: &[(&str, &str)]) -> Self {
        let mut source = Self::default();
        for (name, content) in files {
            source.insert(name, content);
        }
        source
    }

    pub fn insert(&mut self, name: &str, content: &str) {
        self.files
            .insert(name.to_string(), content.as_bytes().to_vec());
    }

    pub fn shared(self) -> SharedSource {
        Arc::new(self)
    }
}

impl Source for MemorySource {
    fn has_file(&self, filename: &str) -> bool {
        self.files.contains_key(filename)
    }

    fn read_file(&self, filename: &str) -> Result<(String, String), SourceError> {
        match self.files.get(filename) {
            Some(bytes) => Ok((String::from_utf8_lossy(bytes).into_owned(), filename.to_string())),
            None => Err(SourceError::NotFound(filename.to_string())),
        }
    }

    fn read_binary(&self, filename: &str) -> Result<Vec<u8>, SourceError> {
        self.files
            .get(filename)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(filename.to_string()))
    }

    fn list_files(&self, subdir: &str) -> Vec<String> {
        let prefix = if subdir.is_empty() {
            String::new()
        } else {
            format!("{}/", subdir.trim_end_matches('/'))
        };
        self.files
            .keys()
            .filter_map(|name| name.strip_prefix(&prefix))
            .map(str::to_string)
            .collect()
    }

    fn version(&self) -> String {
        "memory".to_string()
    }
}

// =========================================================================
// Rendering shortcuts
// =========================================================================

/// Render a full page. Panics with the render error on failure.
pub fn render(source: &SharedSource, locale: &str, page: &str) -> String {
    process_page(source, locale, page, None, &Default::default())
        .unwrap_or_else(|e| panic!("rendering {locale}/{page} failed: {e}"))
}
