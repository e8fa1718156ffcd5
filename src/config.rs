//! Site configuration module.
//!
//! Handles loading and validating `settings.toml` from the root of a site
//! source. Every value has a default, so a site without a settings file is
//! a valid (English-only, `index`-rooted) site.
//!
//! ## Configuration Options
//!
//! ```toml
//! [general]
//! defaultlocale = "en"      # Locale that supplies fallback strings
//! defaultpage = "index"     # Page served for directory-style URLs
//! siteurl = "https://example.com"   # Optional absolute site URL
//!
//! [locale_overrides]
//! "download/firefox" = "download"   # Page -> translation file basename
//!
//! [paths]
//! additional_paths = ["../shared-site"]   # Extra roots searched in order
//! ```
//!
//! Unknown keys are rejected to catch typos early. `[locale_overrides]` is
//! the one open table: its keys are page names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Name of the settings file at the root of a site source.
pub const SETTINGS_FILENAME: &str = "settings.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error in {file}: {source}")]
    Toml {
        file: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Site configuration loaded from `settings.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    pub general: GeneralConfig,
    /// Page name → name of the translation file it reads strings from.
    pub locale_overrides: BTreeMap<String, String>,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneralConfig {
    /// The authoritative locale; its strings back every other locale.
    pub defaultlocale: String,
    /// Page name that directory-style URLs resolve to.
    pub defaultpage: String,
    /// Absolute URL of the published site, exposed to templates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub siteurl: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            defaultlocale: "en".to_string(),
            defaultpage: "index".to_string(),
            siteurl: None,
        }
    }
}

/// Additional source roots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Roots searched after the primary one, relative to the primary root
    /// unless absolute. Files in earlier roots shadow later ones.
    pub additional_paths: Vec<String>,
}

impl SiteConfig {
    pub fn default_locale(&self) -> &str {
        &self.general.defaultlocale
    }

    pub fn default_page(&self) -> &str {
        &self.general.defaultpage
    }

    /// Translation file basename for a page, honoring `[locale_overrides]`.
    pub fn locale_file<'a>(&'a self, page: &'a str) -> &'a str {
        self.locale_overrides
            .get(page)
            .map(String::as_str)
            .unwrap_or(page)
    }

    /// Validate that required values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.defaultlocale.trim().is_empty() {
            return Err(ConfigError::Validation(
                "general.defaultlocale must not be empty".into(),
            ));
        }
        if self.general.defaultpage.trim().is_empty() {
            return Err(ConfigError::Validation(
                "general.defaultpage must not be empty".into(),
            ));
        }
        if self.general.defaultpage.contains('/') {
            return Err(ConfigError::Validation(
                "general.defaultpage must be a single path segment".into(),
            ));
        }
        Ok(())
    }
}

/// Parse and validate settings text. `file` names the origin for errors.
pub fn parse_config(content: &str, file: &str) -> Result<SiteConfig, ConfigError> {
    let config: SiteConfig = toml::from_str(content).map_err(|source| ConfigError::Toml {
        file: file.to_string(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Load `settings.toml` from a site root directory.
///
/// Returns the defaults if no settings file exists.
pub fn load_config(root: &Path) -> Result<SiteConfig, ConfigError> {
    let path = root.join(SETTINGS_FILENAME);
    if !path.exists() {
        return Ok(SiteConfig::default());
    }
    let content = fs::read_to_string(&path)?;
    parse_config(&content, &path.display().to_string())
}

/// Returns a fully-commented stock `settings.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Site Configuration
# ==================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

[general]
# Locale whose strings are the source of truth. Pages in other locales fall
# back to these strings when a translation is missing.
defaultlocale = "en"

# Page rendered for directory-style URLs: a link to "docs/" resolves to the
# page "docs/index", and links to "docs/index" are shortened to "docs".
defaultpage = "index"

# Absolute URL of the published site, available to templates as `site_url`.
# siteurl = "https://example.com"

# ---------------------------------------------------------------------------
# Translation file overrides
# ---------------------------------------------------------------------------
# Let a page read its strings from another page's translation file.
[locale_overrides]
# "download/firefox" = "download"

# ---------------------------------------------------------------------------
# Additional source roots
# ---------------------------------------------------------------------------
[paths]
# Directories searched after this one. A page, template or include found
# here shadows the same file in any later root.
additional_paths = []
"##
}

// ============================================================================
// Tests
// ============================================================================
