//! CSV interchange for translators.
//!
//! Export renders every page in the default locale, records each
//! localizable string, and compares the result with the default locale's
//! translation files:
//!
//! ```text
//! file,key,description,flags,source_string,de,fr
//! index,intro,,NEW,Hello,,
//! index,title,Page title,FUZZY,Welcome!,Willkommen,Bienvenue
//! index,old,,DELETED,Gone,Weg,
//! ```
//!
//! Rows for a page list the strings in the order the page uses them, then
//! the strings only the translation file still has, in file order.
//! Unchanged strings are left out. Import applies a (possibly edited)
//! export back onto `locales/<locale>/<file>.json`: `DELETED` rows remove
//! the key, non-empty translations are set. Files are rewritten only when
//! something changed, keeping their key order.

use crate::converters::RenderOptions;
use crate::localize::{RecordedString, StringRecorder};
use crate::page::{PageError, process_page};
use crate::source::{SharedSource, SourceError, localizable_file_filename};
use indexmap::IndexMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

pub const NEW: &str = "NEW";
pub const FUZZY: &str = "FUZZY";
pub const DELETED: &str = "DELETED";

/// Leading CSV columns; locale columns follow.
pub const FIXED_COLUMNS: [&str; 5] = ["file", "key", "description", "flags", "source_string"];

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("File {file} exists but is not a valid JSON file: {source}")]
    Json {
        file: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("CSV input lacks the {0} column")]
    MissingColumn(&'static str),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Page(#[from] PageError),
}

/// One entry of a translation file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringEntry {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Page name → string id → entry, in the order strings were met.
pub type PageStrings = IndexMap<String, IndexMap<String, StringEntry>>;

// ============================================================================
// Extraction
// ============================================================================

struct Collector {
    default_locale: String,
    strings: Mutex<PageStrings>,
}

impl StringRecorder for Collector {
    fn record(&self, string: RecordedString<'_>) {
        if string.locale != self.default_locale {
            return;
        }

        let mut description = string.comment.unwrap_or_default().to_string();
        if !string.fixed.is_empty() {
            if !description.is_empty() {
                description.push('\n');
            }
            let fixed: Vec<String> = string
                .fixed
                .iter()
                .enumerate()
                .map(|(i, literal)| format!("{{{}}}: {literal}", i + 1))
                .collect();
            description.push_str(&fixed.join(", "));
        }

        let entry = StringEntry {
            message: string.value.to_string(),
            description: (!description.is_empty()).then_some(description),
        };
        self.strings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(string.page.to_string())
            .or_default()
            .insert(string.name.to_string(), entry);
    }
}

/// Render every page in the default locale and collect its strings.
pub fn extract_strings(source: &SharedSource) -> Result<PageStrings, CsvError> {
    info!("Extracting page strings (please be patient)...");
    let config = source.read_config()?;
    let default_locale = config.default_locale();
    let collector = Arc::new(Collector {
        default_locale: default_locale.to_string(),
        strings: Mutex::default(),
    });
    let options = RenderOptions {
        recorder: Some(collector.clone()),
        ..Default::default()
    };

    for (page, format) in source.list_pages()? {
        info!("Processing page {page}");
        process_page(source, default_locale, &page, Some(format), &options)?;
    }

    let strings = std::mem::take(
        &mut *collector
            .strings
            .lock()
            .unwrap_or_else(PoisonError::into_inner),
    );
    Ok(strings)
}

// ============================================================================
// Export
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub file: String,
    pub key: String,
    pub description: String,
    pub flags: String,
    pub source_string: String,
    /// One cell per locale column.
    pub translations: Vec<String>,
}

fn read_strings(
    source: &SharedSource,
    locale: &str,
    page: &str,
) -> Result<Option<IndexMap<String, StringEntry>>, CsvError> {
    let filename = localizable_file_filename(locale, &format!("{page}.json"));
    if !source.has_file(&filename) {
        debug!("File {filename} not found, no existing translations for {locale}");
        return Ok(None);
    }
    let (data, path) = source.read_file(&filename)?;
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|source| CsvError::Json { file: path, source })
}

/// Compare extracted strings with the translation files. Returns the
/// locale columns and the rows, pages sorted by name.
pub fn export_rows(
    source: &SharedSource,
    strings: &PageStrings,
) -> Result<(Vec<String>, Vec<ExportRow>), CsvError> {
    let config = source.read_config()?;
    let default_locale = config.default_locale();
    let locales: Vec<String> = source
        .list_locales()
        .into_iter()
        .filter(|locale| locale != default_locale)
        .collect();

    let mut pages: Vec<&String> = strings.keys().collect();
    pages.sort();

    let mut rows = Vec::new();
    for page in pages {
        let current = &strings[page];
        let old = read_strings(source, default_locale, page)?.unwrap_or_default();
        let existing = locales
            .iter()
            .map(|locale| read_strings(source, locale, page))
            .collect::<Result<Vec<_>, _>>()?;

        let keys = current
            .keys()
            .chain(old.keys().filter(|key| !current.contains_key(*key)));
        for key in keys {
            let (description, flags, source_string) = match (current.get(key), old.get(key)) {
                (None, Some(old)) => (old.description.clone(), DELETED, old.message.clone()),
                (Some(new), None) => (None, NEW, new.message.clone()),
                (Some(new), Some(old)) if new.message != old.message => {
                    (old.description.clone(), FUZZY, new.message.clone())
                }
                _ => continue,
            };

            let translations = existing
                .iter()
                .map(|table| {
                    table
                        .as_ref()
                        .and_then(|table| table.get(key))
                        .map(|entry| entry.message.clone())
                        .unwrap_or_default()
                })
                .collect();
            rows.push(ExportRow {
                file: page.clone(),
                key: key.clone(),
                description: description.unwrap_or_default(),
                flags: flags.to_string(),
                source_string,
                translations,
            });
        }
    }
    Ok((locales, rows))
}

/// Export the site's changed strings as CSV. Returns the number of rows;
/// nothing at all is written when there are none.
pub fn export_csv(source: &SharedSource, writer: impl Write) -> Result<usize, CsvError> {
    let strings = extract_strings(source)?;
    let (locales, rows) = export_rows(source, &strings)?;
    if rows.is_empty() {
        return Ok(0);
    }

    let mut csv = csv::Writer::from_writer(writer);
    let header = FIXED_COLUMNS
        .iter()
        .copied()
        .chain(locales.iter().map(String::as_str));
    csv.write_record(header)?;
    for row in &rows {
        let cells = [
            row.file.as_str(),
            row.key.as_str(),
            row.description.as_str(),
            row.flags.as_str(),
            row.source_string.as_str(),
        ]
        .into_iter()
        .chain(row.translations.iter().map(String::as_str));
        csv.write_record(cells)?;
    }
    csv.flush()?;
    Ok(rows.len())
}

// ============================================================================
// Import
// ============================================================================

/// Apply translations from CSV to the site at `source_dir`. Returns the
/// translation files that were rewritten.
pub fn import_csv(source_dir: &Path, reader: impl Read) -> Result<Vec<PathBuf>, CsvError> {
    let mut csv = csv::Reader::from_reader(reader);
    let headers = csv.headers()?.clone();
    let column = |name: &'static str| {
        headers
            .iter()
            .position(|header| header == name)
            .ok_or(CsvError::MissingColumn(name))
    };
    let (file_col, key_col, flags_col) = (column("file")?, column("key")?, column("flags")?);
    let locale_cols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .skip(FIXED_COLUMNS.len())
        .map(|(i, locale)| (i, locale.to_string()))
        .collect();

    let mut by_file: BTreeMap<String, Vec<csv::StringRecord>> = BTreeMap::new();
    for record in csv.records() {
        let record = record?;
        let file = record.get(file_col).unwrap_or_default().to_string();
        by_file.entry(file).or_default().push(record);
    }

    let mut updated = Vec::new();
    for (file, records) in &by_file {
        for (col, locale) in &locale_cols {
            let path = source_dir
                .join("locales")
                .join(locale)
                .join(format!("{file}.json"));
            let mut json = read_json_object(&path)?;

            let mut changed = false;
            for record in records {
                let key = record.get(key_col).unwrap_or_default();
                if record.get(flags_col).unwrap_or_default().contains(DELETED) {
                    changed |= json.shift_remove(key).is_some();
                    continue;
                }
                let translation = record.get(*col).unwrap_or_default();
                if translation.is_empty() {
                    continue;
                }
                changed |= set_message(&mut json, key, translation);
            }

            if changed {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let text = serde_json::to_string_pretty(&json).map_err(|source| CsvError::Json {
                    file: path.display().to_string(),
                    source,
                })?;
                fs::write(&path, text)?;
                info!("Updated {}", path.display());
                updated.push(path);
            }
        }
    }
    Ok(updated)
}

fn read_json_object(path: &Path) -> Result<Map<String, Json>, CsvError> {
    match fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data).map_err(|source| CsvError::Json {
            file: path.display().to_string(),
            source,
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Map::new()),
        Err(e) => Err(e.into()),
    }
}

/// Set the message of `key`, keeping other fields of the entry. Returns
/// whether anything changed.
fn set_message(json: &mut Map<String, Json>, key: &str, translation: &str) -> bool {
    match json.get_mut(key) {
        Some(Json::Object(entry)) => {
            if entry.get("message").and_then(Json::as_str) == Some(translation) {
                return false;
            }
            entry.insert("message".to_string(), Json::from(translation));
        }
        _ => {
            let mut entry = Map::new();
            entry.insert("message".to_string(), Json::from(translation));
            json.insert(key.to_string(), Json::Object(entry));
        }
    }
    true
}
