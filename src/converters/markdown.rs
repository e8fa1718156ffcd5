//! Markdown pages.
//!
//! Localized strings are spliced in before the Markdown pass, escaped so
//! that translated text cannot introduce Markdown syntax. Defaults may use
//! Markdown themselves: each default is converted to inline HTML first and
//! its tags go through the usual attribute capture.
//!
//! The escaping leaves numeric references like `&#46;` inside raw HTML
//! (attribute values, for instance); those are turned back into plain
//! characters after conversion unless the character needs escaping in
//! HTML.

use super::{ConvertError, RenderContext, SharedLocalizer, lock_localizer, process_links};
use crate::localize::Escapes;
use pulldown_cmark::{Options, Parser, html as md_html};
use regex::{Captures, Regex};
use std::sync::LazyLock;

static PARAGRAPH_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?p>").expect("valid regex"));

static NUMERIC_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(\d+);").expect("valid regex"));

/// Render Markdown to HTML with the extensions pages may use.
pub fn markdown_to_html(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);
    options.insert(Options::ENABLE_DEFINITION_LIST);
    let parser = Parser::new_ext(text, options);
    let mut html = String::with_capacity(text.len() * 3 / 2);
    md_html::push_html(&mut html, parser);
    html
}

pub(super) fn get_html(
    ctx: &RenderContext,
    localizer: &SharedLocalizer,
    text: &str,
) -> Result<String, ConvertError> {
    let inline_html: &dyn Fn(&str) -> String =
        &|s| PARAGRAPH_TAG.replace_all(&markdown_to_html(s), "").into_owned();
    let text = lock_localizer(localizer).insert_localized_strings(
        text,
        Escapes::Markdown,
        Some(inline_html),
    )?;
    let html = markdown_to_html(&text);
    let html = remove_unnecessary_entities(&html);
    process_links(ctx, &html)
}

fn remove_unnecessary_entities(html: &str) -> String {
    NUMERIC_ENTITY
        .replace_all(html, |caps: &Captures<'_>| {
            match caps[1].parse::<u32>().ok().and_then(char::from_u32) {
                Some(c) if !matches!(c, '<' | '>' | '&' | '"' | '\'') => c.to_string(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}
