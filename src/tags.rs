//! Attribute-aware parsing of translatable strings.
//!
//! Translatable strings may carry a little inline markup:
//!
//! ```text
//! Read the <a href="/faq" class="big">FAQ</a> or <fix>Adblock Plus</fix> docs.
//! ```
//!
//! Translators should never see (or be able to break) the attributes, and
//! product names must survive translation untouched. [`parse`] therefore
//! reduces such a string to the form that goes into translation files:
//!
//! ```text
//! Read the <a>FAQ</a> or {1} docs.
//! ```
//!
//! together with the captured attribute sets (per tag, in order of
//! appearance) and the fixed literals (numbered from 1). The localizer puts
//! both back after translation.
//!
//! Only the tags in [`WHITELIST`] plus the synthetic [`FIXED_TAG`] are
//! allowed; anything else is an error, as is any tag inside a fixed span.
//! Character references are decoded so translators work with literal text;
//! escaping happens again when the string is inserted into the document.

use std::collections::HashMap;
use thiserror::Error;

/// Inline tags allowed inside translatable strings, in the order their
/// attributes are re-inserted.
pub const WHITELIST: [&str; 6] = ["a", "em", "sup", "strong", "code", "span"];

/// Marks a literal span translators must not alter.
pub const FIXED_TAG: &str = "fix";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TagError {
    #[error("Unexpected HTML tag '{tag}' in localizable string on page {page}")]
    UnexpectedTag { tag: String, page: String },
    #[error("Unexpected HTML tag '{tag}' inside a fixed string on page {page}")]
    TagInsideFixed { tag: String, page: String },
    #[error("Unterminated fixed string on page {page}")]
    UnterminatedFixed { page: String },
}

/// Attribute list of one tag occurrence, in source order. `None` values
/// are boolean attributes written without `=`.
pub type Attributes = Vec<(String, Option<String>)>;

/// Result of parsing one translatable string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedString {
    /// Tag-stripped text with `<tag>` / `{N}` placeholders.
    pub text: String,
    /// Captured attributes per whitelisted tag, one entry per occurrence.
    pub attributes: HashMap<String, Vec<Attributes>>,
    /// Fixed literal spans; `{1}` refers to the first.
    pub fixed: Vec<String>,
}

/// Parse a translatable string. `page` is only used in error messages.
pub fn parse(text: &str, page: &str) -> Result<ParsedString, TagError> {
    let text = escape_bare_ampersands(text);
    let mut parser = Parser {
        page,
        result: ParsedString::default(),
        inside_fixed: false,
    };

    let mut rest = text.as_str();
    while !rest.is_empty() {
        let Some(lt) = rest.find('<') else {
            parser.data(rest);
            break;
        };
        parser.data(&rest[..lt]);
        rest = &rest[lt..];

        match read_markup(rest) {
            Markup::Comment(len) => rest = &rest[len..],
            Markup::StartTag { name, attrs, self_closing, len } => {
                parser.start_tag(&name, attrs)?;
                if self_closing {
                    parser.end_tag(&name)?;
                }
                rest = &rest[len..];
            }
            Markup::EndTag { name, len } => {
                parser.end_tag(&name)?;
                rest = &rest[len..];
            }
            Markup::Text => {
                parser.data("<");
                rest = &rest[1..];
            }
        }
    }

    if parser.inside_fixed {
        return Err(TagError::UnterminatedFixed {
            page: page.to_string(),
        });
    }
    Ok(parser.result)
}

struct Parser<'p> {
    page: &'p str,
    result: ParsedString,
    inside_fixed: bool,
}

impl Parser<'_> {
    fn start_tag(&mut self, tag: &str, attrs: Attributes) -> Result<(), TagError> {
        if self.inside_fixed {
            return Err(TagError::TagInsideFixed {
                tag: tag.to_string(),
                page: self.page.to_string(),
            });
        }
        if tag == FIXED_TAG {
            self.inside_fixed = true;
            self.result.fixed.push(String::new());
        } else if WHITELIST.contains(&tag) {
            self.result
                .attributes
                .entry(tag.to_string())
                .or_default()
                .push(attrs);
            self.result.text.push_str(&format!("<{tag}>"));
        } else {
            return Err(self.unexpected(tag));
        }
        Ok(())
    }

    fn end_tag(&mut self, tag: &str) -> Result<(), TagError> {
        if tag == FIXED_TAG && self.inside_fixed {
            self.inside_fixed = false;
            let n = self.result.fixed.len();
            self.result.text.push_str(&format!("{{{n}}}"));
        } else if self.inside_fixed {
            return Err(TagError::TagInsideFixed {
                tag: format!("/{tag}"),
                page: self.page.to_string(),
            });
        } else if WHITELIST.contains(&tag) {
            self.result.text.push_str(&format!("</{tag}>"));
        } else {
            return Err(self.unexpected(&format!("/{tag}")));
        }
        Ok(())
    }

    fn data(&mut self, raw: &str) {
        if raw.is_empty() {
            return;
        }
        let decoded = decode_entities(raw);
        match (self.inside_fixed, self.result.fixed.last_mut()) {
            (true, Some(fixed)) => fixed.push_str(&decoded),
            _ => self.result.text.push_str(&decoded),
        }
    }

    fn unexpected(&self, tag: &str) -> TagError {
        TagError::UnexpectedTag {
            tag: tag.to_string(),
            page: self.page.to_string(),
        }
    }
}

// ============================================================================
// Markup tokenizer
// ============================================================================

enum Markup {
    Comment(usize),
    StartTag {
        name: String,
        attrs: Attributes,
        self_closing: bool,
        len: usize,
    },
    EndTag {
        name: String,
        len: usize,
    },
    /// A `<` that does not start markup.
    Text,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':'
}

/// Classify the markup starting at `s` (which begins with `<`).
fn read_markup(s: &str) -> Markup {
    if let Some(body) = s.strip_prefix("<!--") {
        return match body.find("-->") {
            Some(end) => Markup::Comment(4 + end + 3),
            None => Markup::Text,
        };
    }

    if let Some(body) = s.strip_prefix("</") {
        if !body.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Markup::Text;
        }
        let name_len = body.find(|c: char| !is_name_char(c)).unwrap_or(body.len());
        return match body[name_len..].find('>') {
            Some(gt) => Markup::EndTag {
                name: body[..name_len].to_ascii_lowercase(),
                len: 2 + name_len + gt + 1,
            },
            None => Markup::Text,
        };
    }

    let body = &s[1..];
    if !body.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Markup::Text;
    }
    let name_len = body.find(|c: char| !is_name_char(c)).unwrap_or(body.len());
    let name = body[..name_len].to_ascii_lowercase();
    match read_attributes(&body[name_len..]) {
        Some((attrs, self_closing, consumed)) => Markup::StartTag {
            name,
            attrs,
            self_closing,
            len: 1 + name_len + consumed,
        },
        None => Markup::Text,
    }
}

/// Read attributes up to and including the closing `>`.
///
/// Returns the attributes, whether the tag was self-closing, and the
/// number of bytes consumed. `None` if the tag is never closed.
fn read_attributes(s: &str) -> Option<(Attributes, bool, usize)> {
    let mut attrs = Attributes::new();
    let mut pos = 0;
    let bytes = s.as_bytes();

    loop {
        while pos < s.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        let rest = s.get(pos..)?;
        if rest.is_empty() {
            return None;
        }
        if rest.starts_with("/>") {
            return Some((attrs, true, pos + 2));
        }
        if rest.starts_with('>') {
            return Some((attrs, false, pos + 1));
        }
        if rest.starts_with('/') {
            pos += 1;
            continue;
        }

        let name_len = rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == '>' || c == '/')
            .unwrap_or(rest.len());
        let name = rest[..name_len].to_ascii_lowercase();
        pos += name_len;

        let after_name = &s[pos..];
        let trimmed = after_name.trim_start();
        if let Some(value_part) = trimmed.strip_prefix('=') {
            let value_part_trimmed = value_part.trim_start();
            pos = s.len() - value_part_trimmed.len();
            let (value, consumed) = read_attribute_value(value_part_trimmed)?;
            pos += consumed;
            attrs.push((name, Some(decode_entities(value))));
        } else {
            attrs.push((name, None));
        }
    }
}

fn read_attribute_value(s: &str) -> Option<(&str, usize)> {
    match s.chars().next()? {
        quote @ ('"' | '\'') => {
            let end = s[1..].find(quote)?;
            Some((&s[1..1 + end], end + 2))
        }
        _ => {
            let end = s
                .find(|c: char| c.is_whitespace() || c == '>')
                .unwrap_or(s.len());
            Some((&s[..end], end))
        }
    }
}

// ============================================================================
// Character references
// ============================================================================

/// Replace character references with the characters they name. Unknown or
/// malformed references are left as written.
pub fn decode_entities(s: &str) -> String {
    html_escape::decode_html_entities(s).into_owned()
}

/// Escape every `&` that is not followed by a `;`-terminated run of
/// non-whitespace characters, so stray ampersands are never mistaken for
/// the start of a character reference.
pub fn escape_bare_ampersands(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, c) in s.char_indices() {
        if c == '&' && !looks_like_reference(&s[i + 1..]) {
            out.push_str("&amp;");
        } else {
            out.push(c);
        }
    }
    out
}

fn looks_like_reference(after_amp: &str) -> bool {
    let run_end = after_amp
        .find(char::is_whitespace)
        .unwrap_or(after_amp.len());
    after_amp[..run_end]
        .char_indices()
        .any(|(i, c)| c == ';' && i > 0)
}

/// Escape text for use in HTML content and double-quoted attributes.
pub fn escape_html(s: &str) -> String {
    html_escape::encode_double_quoted_attribute(s).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect()
    }

    #[test]
    fn plain_text_passes_through() {
        let parsed = parse("Hello world", "index").unwrap();
        assert_eq!(parsed.text, "Hello world");
        assert!(parsed.attributes.is_empty());
        assert!(parsed.fixed.is_empty());
    }

    #[test]
    fn whitelisted_tags_are_stripped_of_attributes() {
        let parsed = parse(
            r#"Read the <a href="/faq" class="big">FAQ</a> <em>now</em>"#,
            "index",
        )
        .unwrap();
        assert_eq!(parsed.text, "Read the <a>FAQ</a> <em>now</em>");
        assert_eq!(
            parsed.attributes["a"],
            vec![attrs(&[("href", "/faq"), ("class", "big")])]
        );
        assert_eq!(parsed.attributes["em"], vec![Attributes::new()]);
    }

    #[test]
    fn repeated_tags_keep_occurrence_order() {
        let parsed = parse(r#"<a href="1">x</a> and <a href="2">y</a>"#, "p").unwrap();
        assert_eq!(
            parsed.attributes["a"],
            vec![attrs(&[("href", "1")]), attrs(&[("href", "2")])]
        );
    }

    #[test]
    fn fixed_spans_become_numbered_placeholders() {
        let parsed = parse("Use <fix>Adblock Plus</fix> with <fix>Firefox</fix>", "p").unwrap();
        assert_eq!(parsed.text, "Use {1} with {2}");
        assert_eq!(parsed.fixed, vec!["Adblock Plus", "Firefox"]);
    }

    #[test]
    fn fixed_span_preserves_whitespace_and_case() {
        let parsed = parse("<fix>  MiXeD, case! </fix>", "p").unwrap();
        assert_eq!(parsed.fixed, vec!["  MiXeD, case! "]);
    }

    #[test]
    fn tag_inside_fixed_is_an_error() {
        let err = parse("<fix>a <em>b</em></fix>", "faq").unwrap_err();
        assert_eq!(
            err,
            TagError::TagInsideFixed {
                tag: "em".to_string(),
                page: "faq".to_string()
            }
        );
    }

    #[test]
    fn unknown_tag_is_an_error_naming_page() {
        let err = parse("<div>x</div>", "about").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'div'"));
        assert!(message.contains("about"));
    }

    #[test]
    fn unterminated_fixed_is_an_error() {
        let err = parse("<fix>open", "p").unwrap_err();
        assert!(matches!(err, TagError::UnterminatedFixed { .. }));
    }

    #[test]
    fn entities_are_decoded() {
        let parsed = parse("Fish &amp; chips &lt;3 &#8364; &#x41;", "p").unwrap();
        assert_eq!(parsed.text, "Fish & chips <3 € A");
    }

    #[test]
    fn bare_ampersand_is_literal() {
        let parsed = parse("Tom & Jerry &copy", "p").unwrap();
        assert_eq!(parsed.text, "Tom & Jerry &copy");
    }

    #[test]
    fn attribute_values_are_decoded() {
        let parsed = parse(r#"<a href="/s?a=1&amp;b=2">x</a>"#, "p").unwrap();
        assert_eq!(parsed.attributes["a"], vec![attrs(&[("href", "/s?a=1&b=2")])]);
    }

    #[test]
    fn unquoted_and_boolean_attributes() {
        let parsed = parse("<span class=note hidden>x</span>", "p").unwrap();
        assert_eq!(
            parsed.attributes["span"],
            vec![vec![
                ("class".to_string(), Some("note".to_string())),
                ("hidden".to_string(), None)
            ]]
        );
    }

    #[test]
    fn tag_names_are_case_insensitive() {
        let parsed = parse("<EM>x</EM>", "p").unwrap();
        assert_eq!(parsed.text, "<em>x</em>");
    }

    #[test]
    fn stray_less_than_is_text() {
        let parsed = parse("1 < 2", "p").unwrap();
        assert_eq!(parsed.text, "1 < 2");
    }

    #[test]
    fn comments_are_dropped() {
        let parsed = parse("a<!-- note -->b", "p").unwrap();
        assert_eq!(parsed.text, "ab");
    }

    #[test]
    fn escape_bare_ampersands_keeps_references() {
        assert_eq!(escape_bare_ampersands("a & b"), "a &amp; b");
        assert_eq!(escape_bare_ampersands("&amp; &#39;"), "&amp; &#39;");
        assert_eq!(escape_bare_ampersands("&;"), "&amp;;");
    }

    #[test]
    fn decode_keeps_unknown_references() {
        assert_eq!(decode_entities("&bogus; &lt;"), "&bogus; <");
    }

    #[test]
    fn decode_named_non_ascii_references() {
        assert_eq!(
            decode_entities("Caf&eacute; &auml;pfel &szlig; &hearts; &#228;"),
            "Café äpfel ß ♥ ä"
        );
    }

    #[test]
    fn escape_html_covers_quotes() {
        assert_eq!(escape_html(r#"<a href="x">'&'"#), "&lt;a href=&quot;x&quot;&gt;'&amp;'");
    }
}
