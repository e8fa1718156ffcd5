//! Page metadata extraction.
//!
//! A page source may start with a block of settings that configure the
//! render rather than appear in it: the page title, the template to use,
//! custom values read by templates. Two spellings are accepted.
//!
//! ## Key/value lines
//!
//! ```text
//! title = Frequently asked questions
//! template = minimal
//! tags = [faq, help]
//!
//! Page body starts here.
//! ```
//!
//! Consecutive leading lines of the form `name = value` are consumed. A value
//! wrapped in `[...]` becomes a list of trimmed, comma-separated strings.
//!
//! ## JSON object
//!
//! ```text
//! <!-- {"title": "FAQ", "tags": ["faq", "help"]} -->
//! ```
//!
//! A JSON object at the very start of the source (optionally wrapped in an
//! HTML comment, which is how HTML and Markdown pages hide it from readers)
//! is parsed with full JSON typing. Key/value lines may also be wrapped in
//! a leading comment.
//!
//! ## Line preservation
//!
//! The removed block is replaced by the same number of newlines it
//! contained, so line numbers in template error messages still point at the
//! author's source.

use crate::types::Params;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static LEADING_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\A\s*<!--\s*(.*?)-->").expect("valid regex"));

static SETTING_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[\w\-]+\s*=").expect("valid regex"));

/// Split a page source into its metadata and the remaining body.
///
/// Sources without a metadata block are returned unchanged with empty
/// metadata.
pub fn extract_page_metadata(source: &str) -> (Params, String) {
    let comment = LEADING_COMMENT.captures(source);
    let text = match &comment {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => source,
    };

    let (metadata, length) = match parse_json_object(text) {
        Some(found) => found,
        None => parse_setting_lines(text),
    };

    if length == 0 {
        return (Params::new(), source.to_string());
    }

    let cutoff = match &comment {
        Some(caps) => caps.get(0).map_or(length, |m| m.end()),
        None => length,
    };
    let newlines = source[..cutoff].matches('\n').count();
    let body = format!("{}{}", "\n".repeat(newlines), &source[cutoff..]);
    (metadata, body)
}

/// Parse a JSON object at the very start of `text`.
///
/// Returns the object's entries and the byte length it occupied.
fn parse_json_object(text: &str) -> Option<(Params, usize)> {
    if !text.starts_with('{') {
        return None;
    }
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(Value::Object(map))) => {
            let length = stream.byte_offset();
            Some((map.into_iter().collect(), length))
        }
        _ => None,
    }
}

/// Parse leading `name = value` lines. Returns the settings and the byte
/// length of the consumed lines.
fn parse_setting_lines(text: &str) -> (Params, usize) {
    let mut metadata = Params::new();
    let mut length = 0;
    for line in text.split_inclusive('\n') {
        if !SETTING_LINE.is_match(line) {
            break;
        }
        let Some((name, value)) = line.split_once('=') else {
            break;
        };
        metadata.insert(name.trim().to_string(), parse_setting_value(value.trim()));
        length += line.len();
    }
    (metadata, length)
}

fn parse_setting_value(value: &str) -> Value {
    match value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        Some(inner) => Value::Array(
            inner
                .split(',')
                .map(|element| Value::String(element.trim().to_string()))
                .collect(),
        ),
        None => Value::String(value.to_string()),
    }
}
