//! Shared types used across the rendering pipeline.
//!
//! These are the small vocabulary types every stage agrees on: which
//! source formats exist and what a page parameter bag looks like.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The parameter bag passed through a render and consumed by the final
/// whole-page template. Keys keep insertion order so metadata appears in
/// the order the page author wrote it.
pub type Params = IndexMap<String, serde_json::Value>;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Page {page} uses unknown format {format}")]
pub struct UnknownFormat {
    pub page: String,
    pub format: String,
}

/// Source format of a page or include.
///
/// The order of [`PageFormat::ALL`] is the probing order used whenever a
/// format has to be guessed (page lookup, include resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageFormat {
    /// Raw HTML (`.html`)
    Html,
    /// Markdown (`.md`)
    #[serde(rename = "md")]
    Markdown,
    /// Template language source (`.tmpl`)
    #[serde(rename = "tmpl")]
    Template,
}

impl PageFormat {
    pub const ALL: [PageFormat; 3] = [PageFormat::Html, PageFormat::Markdown, PageFormat::Template];

    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            PageFormat::Html => "html",
            PageFormat::Markdown => "md",
            PageFormat::Template => "tmpl",
        }
    }

    pub fn from_extension(ext: &str) -> Option<PageFormat> {
        PageFormat::ALL
            .into_iter()
            .find(|f| f.extension().eq_ignore_ascii_case(ext))
    }
}

impl fmt::Display for PageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for PageFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PageFormat::from_extension(s).ok_or_else(|| UnknownFormat {
            page: String::new(),
            format: s.to_string(),
        })
    }
}
