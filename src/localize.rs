//! String localization.
//!
//! Page sources mark translatable text inline:
//!
//! ```text
//! {{ headline[Main page title] Welcome to <fix>Adblock Plus</fix> }}
//!    ^^^^^^^^ ^^^^^^^^^^^^^^^^ ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^
//!    string id   comment       default text (first occurrence only)
//! ```
//!
//! [`Localizer::insert_localized_strings`] finds these spans and replaces each
//! with the text for the current locale, as computed by
//! [`Localizer::localize_string`]:
//!
//! ```text
//! default text ──► tags::parse ──► pick translation ──► re-insert fixed
//!                  (strip markup)  (or fall back)       literals, escape,
//!                                                       re-insert attributes
//! ```
//!
//! A localizer belongs to exactly one render of one page. It remembers
//! defaults seen earlier on the page (so a string id can be reused without
//! repeating its text) and counts total and missing translations, from
//! which the page's translation ratio is computed.

use crate::locale::LocaleTable;
use crate::tags::{self, Attributes, TagError, WHITELIST};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalizeError {
    #[error("Text not yet defined for string {name} on page {page}")]
    MissingDefault { name: String, page: String },
    #[error(transparent)]
    Tag(#[from] TagError),
}

// ============================================================================
// Escaping
// ============================================================================

/// Characters Markdown would otherwise interpret.
const MARKDOWN_ESCAPED: &[char] = &[
    '\\', '`', '*', '_', '{', '}', '[', ']', '(', ')', '#', '+', '-', '.', '!', ':', '|',
];

static CHARACTER_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A&(?:#[0-9]+|#[xX][0-9a-fA-F]+|[A-Za-z][A-Za-z0-9]*);").expect("valid regex")
});

/// How localized text is escaped before it is inserted into a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escapes {
    /// No escaping. Used for attribute values, which are escaped by the
    /// caller once the value is complete.
    Verbatim,
    /// HTML special characters.
    Html,
    /// HTML special characters plus Markdown metacharacters. Existing
    /// character references are kept as written.
    Markdown,
}

impl Escapes {
    pub fn escape(self, s: &str) -> String {
        match self {
            Escapes::Verbatim => s.to_string(),
            Escapes::Html => tags::escape_html(s),
            Escapes::Markdown => escape_markdown(s),
        }
    }
}

fn escape_markdown(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pos = 0;
    while let Some(c) = s[pos..].chars().next() {
        if c == '&'
            && let Some(reference) = CHARACTER_REFERENCE.find(&s[pos..])
        {
            out.push_str(reference.as_str());
            pos += reference.len();
            continue;
        }
        if MARKDOWN_ESCAPED.contains(&c) {
            out.push_str(&format!("&#{};", c as u32));
        } else {
            out.push_str(&tags::escape_html(c.encode_utf8(&mut [0; 4])));
        }
        pos += c.len_utf8();
    }
    out
}

// ============================================================================
// Recording
// ============================================================================

/// A string as it was resolved during a render, before fixed literals are
/// put back. Handed to a [`StringRecorder`].
#[derive(Debug, Clone, Copy)]
pub struct RecordedString<'a> {
    pub page: &'a str,
    pub locale: &'a str,
    pub name: &'a str,
    pub value: &'a str,
    pub comment: Option<&'a str>,
    pub fixed: &'a [String],
}

/// Observer for every string localized during a render. Export tooling
/// uses this to collect the strings a page actually uses.
pub trait StringRecorder: Send + Sync {
    fn record(&self, string: RecordedString<'_>);
}

// ============================================================================
// Localizer
// ============================================================================

/// Resolves translatable strings for one render of one page.
pub struct Localizer {
    page: String,
    locale: String,
    default_locale: String,
    localedata: Arc<LocaleTable>,
    recorder: Option<Arc<dyn StringRecorder>>,
    seen_defaults: HashMap<(String, String), (String, Option<String>)>,
    total_translations: usize,
    missing_translations: usize,
}

impl Localizer {
    /// `localedata` is the current locale's table for `page`, with the
    /// default locale merged underneath.
    pub fn new(
        page: impl Into<String>,
        locale: impl Into<String>,
        default_locale: impl Into<String>,
        localedata: Arc<LocaleTable>,
    ) -> Self {
        Self {
            page: page.into(),
            locale: locale.into(),
            default_locale: default_locale.into(),
            localedata,
            recorder: None,
            seen_defaults: HashMap::new(),
            total_translations: 0,
            missing_translations: 0,
        }
    }

    pub fn with_recorder(mut self, recorder: Option<Arc<dyn StringRecorder>>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn page(&self) -> &str {
        &self.page
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    pub fn localedata(&self) -> &Arc<LocaleTable> {
        &self.localedata
    }

    pub fn recorder(&self) -> Option<&Arc<dyn StringRecorder>> {
        self.recorder.as_ref()
    }

    pub fn total_translations(&self) -> usize {
        self.total_translations
    }

    pub fn missing_translations(&self) -> usize {
        self.missing_translations
    }

    /// Add the counters of a nested render (an include) to this one.
    pub fn add_counts(&mut self, total: usize, missing: usize) {
        self.total_translations += total;
        self.missing_translations += missing;
    }

    /// Resolve the localized text for string `name` on `page`.
    ///
    /// With `default_required` unset, a string that has no default anywhere
    /// yields an empty string instead of an error.
    #[allow(clippy::too_many_arguments)]
    pub fn localize_string(
        &mut self,
        page: &str,
        name: &str,
        default: Option<&str>,
        comment: Option<&str>,
        localedata: &LocaleTable,
        escapes: Escapes,
        default_required: bool,
    ) -> Result<String, LocalizeError> {
        let key = (page.to_string(), name.to_string());
        let (default, comment) = match default.filter(|d| !d.is_empty()) {
            Some(default) => {
                let comment = comment.map(str::to_string);
                self.seen_defaults
                    .insert(key, (default.to_string(), comment.clone()));
                (default.to_string(), comment)
            }
            None => match self.seen_defaults.get(&key) {
                Some((default, comment)) => (default.clone(), comment.clone()),
                None => match localedata.default_message(name) {
                    Some(default) => (default.to_string(), comment.map(str::to_string)),
                    None if default_required => {
                        return Err(LocalizeError::MissingDefault {
                            name: name.to_string(),
                            page: page.to_string(),
                        });
                    }
                    None => return Ok(String::new()),
                },
            },
        };

        let parsed = tags::parse(&default, &self.page)?;

        let mut result = if self.locale == self.default_locale {
            parsed.text.clone()
        } else if let Some(translation) = localedata.translation(name) {
            let translation = translation.trim();
            if translation == default.trim() {
                parsed.text.clone()
            } else {
                translation.to_string()
            }
        } else {
            self.missing_translations += 1;
            parsed.text.clone()
        };
        self.total_translations += 1;

        if let Some(recorder) = &self.recorder {
            recorder.record(RecordedString {
                page,
                locale: &self.locale,
                name,
                value: &result,
                comment: comment.as_deref(),
                fixed: &parsed.fixed,
            });
        }

        for (i, fixed) in parsed.fixed.iter().enumerate() {
            result = result.replace(&format!("{{{}}}", i + 1), fixed);
        }

        let mut result = escapes.escape(&result);
        for tag in WHITELIST {
            result = self.insert_attributes(
                &result,
                tag,
                parsed.attributes.get(tag).map(Vec::as_slice).unwrap_or(&[]),
                escapes,
            )?;
        }
        Ok(result)
    }

    /// Re-wrap each `<tag>` placeholder in `text` with its captured
    /// attributes, in order, then turn any leftover placeholders back into
    /// plain tags.
    fn insert_attributes(
        &mut self,
        text: &str,
        tag: &str,
        saved: &[Attributes],
        escapes: Escapes,
    ) -> Result<String, LocalizeError> {
        let open = escapes.escape(&format!("<{tag}>"));
        let close = escapes.escape(&format!("</{tag}>"));
        let others: Vec<&str> = WHITELIST.iter().copied().filter(|t| *t != tag).collect();
        let content = |text: &str, (start, end): (usize, usize)| {
            text[start + open.len()..end - close.len()].to_string()
        };

        let mut result = text.to_string();
        let mut from = 0;
        for attrs in saved {
            let rendered = attrs
                .iter()
                .map(|attr| self.stringify_attribute(attr, escapes))
                .collect::<Result<Vec<_>, _>>()?;
            let Some(found) = find_placeholder(&result, &open, &close, &others, from) else {
                break;
            };
            let opening = if rendered.is_empty() {
                format!("<{tag}>")
            } else {
                format!("<{tag} {}>", rendered.join(" "))
            };
            from = found.0 + opening.len();
            result = format!(
                "{}{opening}{}</{tag}>{}",
                &result[..found.0],
                content(&result, found),
                &result[found.1..]
            );
        }

        let mut normalized = String::with_capacity(result.len());
        let mut pos = 0;
        while let Some(found) = find_placeholder(&result, &open, &close, &others, pos) {
            normalized.push_str(&result[pos..found.0]);
            normalized.push_str(&format!("<{tag}>{}</{tag}>", content(&result, found)));
            pos = found.1;
        }
        normalized.push_str(&result[pos..]);
        Ok(normalized)
    }

    fn stringify_attribute(
        &mut self,
        (name, value): &(String, Option<String>),
        escapes: Escapes,
    ) -> Result<String, LocalizeError> {
        let name = tags::escape_html(name);
        match value {
            Some(value) => {
                let value = self.insert_localized_strings(value, Escapes::Verbatim, None)?;
                Ok(format!("{name}=\"{}\"", escapes.escape(&value)))
            }
            None => Ok(name),
        }
    }

    /// Replace every `{{ id [comment] default }}` span in `text` with its
    /// localized string. `to_html` converts a default to HTML before it is
    /// parsed (Markdown pages use this so defaults may contain Markdown).
    pub fn insert_localized_strings(
        &mut self,
        text: &str,
        escapes: Escapes,
        to_html: Option<&dyn Fn(&str) -> String>,
    ) -> Result<String, LocalizeError> {
        let page = self.page.clone();
        let localedata = Arc::clone(&self.localedata);
        let mut out = String::with_capacity(text.len());
        let mut pos = 0;
        while let Some(offset) = text[pos..].find("{{") {
            let start = pos + offset;
            out.push_str(&text[pos..start]);
            let Some(span) = scan_span(text, start) else {
                out.push('{');
                pos = start + 1;
                continue;
            };
            let default = match (span.default, to_html) {
                ("", _) => None,
                (default, Some(to_html)) => Some(to_html(default).trim().to_string()),
                (default, None) => Some(default.trim().to_string()),
            };
            let localized = self.localize_string(
                &page,
                span.name,
                default.as_deref(),
                span.comment,
                &localedata,
                escapes,
                true,
            )?;
            out.push_str(&localized);
            pos = span.end;
        }
        out.push_str(&text[pos..]);
        Ok(out)
    }
}

/// Byte range of the first `open ... close` pair at or after `from` whose
/// content holds no markup except real tags from `others`.
fn find_placeholder(
    text: &str,
    open: &str,
    close: &str,
    others: &[&str],
    from: usize,
) -> Option<(usize, usize)> {
    let mut search = from;
    while let Some(offset) = text.get(search..)?.find(open) {
        let start = search + offset;
        let mut pos = start + open.len();
        loop {
            let rest = &text[pos..];
            if rest.starts_with(close) {
                return Some((start, pos + close.len()));
            }
            match rest.chars().next() {
                Some('<') => match other_tag_len(rest, others) {
                    Some(len) => pos += len,
                    None => break,
                },
                Some('>') | None => break,
                Some(c) => pos += c.len_utf8(),
            }
        }
        search = start + open.len();
    }
    None
}

/// Length of a real opening or closing tag of one of `others` at the start
/// of `s`.
fn other_tag_len(s: &str, others: &[&str]) -> Option<usize> {
    let body = &s[1..];
    for tag in others {
        if let Some(after) = body.strip_prefix('/').and_then(|b| b.strip_prefix(tag))
            && after.starts_with('>')
        {
            return Some(tag.len() + 3);
        }
        if let Some(after) = body.strip_prefix(tag)
            && let Some(end) = after.find(['<', '>'])
            && after[end..].starts_with('>')
        {
            return Some(1 + tag.len() + end + 1);
        }
    }
    None
}

// ============================================================================
// Span scanning
// ============================================================================

#[derive(Debug, PartialEq)]
struct Span<'t> {
    end: usize,
    name: &'t str,
    comment: Option<&'t str>,
    default: &'t str,
}

fn is_id_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn skip_whitespace(text: &str, pos: usize) -> usize {
    text[pos..]
        .find(|c: char| !c.is_whitespace())
        .map_or(text.len(), |offset| pos + offset)
}

/// Scan a `{{ ... }}` span starting at `start`. A default may contain one
/// level of nested `{{ ... }}`; the span ends at the first `}}` outside it.
fn scan_span(text: &str, start: usize) -> Option<Span<'_>> {
    let mut pos = skip_whitespace(text, start + 2);
    let id_len = text[pos..]
        .find(|c: char| !is_id_char(c))
        .unwrap_or(text.len() - pos);
    if id_len == 0 {
        return None;
    }
    let name = &text[pos..pos + id_len];
    pos += id_len;

    if text[pos..].starts_with("}}") {
        return Some(Span {
            end: pos + 2,
            name,
            comment: None,
            default: "",
        });
    }

    let mut comment = None;
    if text[pos..].starts_with('[') {
        let (found, after) = scan_comment(text, pos + 1)?;
        comment = Some(found);
        pos = after;
    }

    let default_start = skip_whitespace(text, pos);
    if default_start == pos {
        return None;
    }
    pos = default_start;
    loop {
        let rest = &text[pos..];
        if rest.starts_with("}}") {
            return Some(Span {
                end: pos + 2,
                name,
                comment,
                default: &text[default_start..pos],
            });
        }
        if rest.starts_with("{{") {
            pos += 2 + rest[2..].find("}}")? + 2;
            continue;
        }
        pos += rest.chars().next()?.len_utf8();
    }
}

/// The comment runs up to the first `]` followed by whitespace.
fn scan_comment(text: &str, start: usize) -> Option<(&str, usize)> {
    let mut search = start;
    loop {
        let close = search + text[search..].find(']')?;
        if text[close + 1..].starts_with(char::is_whitespace) {
            return Some((&text[start..close], close + 1));
        }
        search = close + 1;
    }
}
