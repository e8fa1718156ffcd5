//! Locale translation tables.
//!
//! A translation file lives at `locales/<locale>/<page>.json` and maps
//! string ids to messages:
//!
//! ```json
//! {
//!   "headline": {"message": "Willkommen", "description": "Page title"},
//!   "intro": {"message": "Hallo {1}!"}
//! }
//! ```
//!
//! A [`LocaleTable`] is what the renderer sees for one (locale, page) pair:
//! the default locale's messages merged underneath the locale's own. The
//! table remembers which entries were inherited, because a string that is
//! only present through the default locale still counts as untranslated,
//! and keeps the default locale's own messages so a localizer can always
//! look up the authoritative default for a string id.

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocaleError {
    #[error(
        "The content of translations file for page \"{page}\", language \"{locale}\" ({file}) is not a valid JSON object"
    )]
    NotAnObject {
        page: String,
        locale: String,
        file: String,
    },
    #[error(
        "The content of translations file for page \"{page}\", language \"{locale}\" ({file}) is not a valid translations file: \"message\" key is missing for string: \"{key}\""
    )]
    MissingMessage {
        page: String,
        locale: String,
        file: String,
        key: String,
    },
}

/// Ordered string id → message mapping for one (locale, page) pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocaleTable {
    entries: IndexMap<String, String>,
    inherited: HashSet<String>,
    /// Default locale's messages; `None` for a default-locale table.
    fallback: Option<IndexMap<String, String>>,
}

impl LocaleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table for a non-default locale: every entry of `fallback` is
    /// present but marked as inherited until overridden.
    pub fn inheriting(fallback: &LocaleTable) -> Self {
        Self {
            entries: fallback.entries.clone(),
            inherited: fallback.entries.keys().cloned().collect(),
            fallback: Some(fallback.entries.clone()),
        }
    }

    /// The default locale's message for `name`.
    pub fn default_message(&self, name: &str) -> Option<&str> {
        match &self.fallback {
            Some(fallback) => fallback.get(name).map(String::as_str),
            None => self.get(name),
        }
    }

    /// Message for `name`, whether translated or inherited.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Message for `name` only if this locale translates it itself.
    pub fn translation(&self, name: &str) -> Option<&str> {
        if self.inherited.contains(name) {
            None
        } else {
            self.get(name)
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Set an entry owned by this locale.
    pub fn insert(&mut self, name: impl Into<String>, message: impl Into<String>) {
        let name = name.into();
        self.inherited.remove(&name);
        self.entries.insert(name, message.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where a translation file came from, for error messages.
#[derive(Debug, Clone, Copy)]
pub struct LocaleFileOrigin<'a> {
    pub page: &'a str,
    pub locale: &'a str,
    pub file: &'a str,
}

/// Parse a translation file's JSON into `(id, message)` pairs in file order.
pub fn parse_locale_file(
    data: &str,
    origin: LocaleFileOrigin<'_>,
) -> Result<Vec<(String, String)>, LocaleError> {
    let not_an_object = || LocaleError::NotAnObject {
        page: origin.page.to_string(),
        locale: origin.locale.to_string(),
        file: origin.file.to_string(),
    };

    let value: Value = serde_json::from_str(data).map_err(|_| not_an_object())?;
    let Value::Object(map) = value else {
        return Err(not_an_object());
    };

    map.into_iter()
        .map(|(key, entry)| {
            let Value::Object(fields) = entry else {
                return Err(not_an_object());
            };
            match fields.get("message") {
                Some(Value::String(message)) => Ok((key, message.clone())),
                Some(_) => Err(not_an_object()),
                None => Err(LocaleError::MissingMessage {
                    page: origin.page.to_string(),
                    locale: origin.locale.to_string(),
                    file: origin.file.to_string(),
                    key,
                }),
            }
        })
        .collect()
}
