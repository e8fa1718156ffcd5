//! Template-language pages and whole-page templates.
//!
//! Sources are rendered with minijinja, auto-escaping everything. Templates
//! load further templates (`extends`, `include`, `import`) from the site
//! by name, with or without the `templates/` prefix. Each render gets a
//! fresh environment holding the helpers below, bound to the current
//! render:
//!
//! | Name | Kind | Result |
//! |---|---|---|
//! | `translate(default, name, comment=none)` | filter | localized string |
//! | `linkify(page, locale=none, **attrs)` | filter | opening `<a>` tag |
//! | `toclist(html)` | filter | nested headings |
//! | `get_string(name, page=none)` | function | string from another page |
//! | `get_page_content(page, locale=none)` | function | another page's parameters |
//! | `get_pages_metadata(filters=none)` | function | metadata of all pages |
//! | `has_locale(locale, page)` | function | bool |
//!
//! Top-level `{% set %}` variables not starting with `_` are copied back
//! into the render's parameters once the template has run.

use super::{ConvertError, MAX_NESTING, RenderContext, SharedLocalizer, lock_localizer, process_links};
use crate::link::relative_link;
use crate::localize::Escapes;
use crate::metadata::extract_page_metadata;
use crate::page::get_page_params;
use crate::source::{SharedSource, SourceError};
use crate::tags::{decode_entities, escape_html};
use crate::types::Params;
use minijinja::value::{Kwargs, Value};
use minijinja::{AutoEscape, Environment, Error, ErrorKind};
use regex::Regex;
use serde::Serialize;
use serde_json::Value as Json;
use std::sync::LazyLock;

pub(super) fn get_html(
    ctx: &mut RenderContext,
    localizer: &SharedLocalizer,
    text: &str,
    filename: &str,
) -> Result<String, ConvertError> {
    let template_error = |source| ConvertError::Template {
        file: filename.to_string(),
        source,
    };

    let mut env = environment(ctx, localizer);
    env.add_template_owned(filename.to_string(), text.to_string())
        .map_err(template_error)?;
    let template = env.get_template(filename).map_err(template_error)?;
    let mut out = Vec::new();
    let state = template
        .render_to_write(Value::from_serialize(&ctx.params), &mut out)
        .map_err(template_error)?;
    let html = String::from_utf8(out).map_err(|e| template_error(from_error(e)))?;

    for name in state.exports() {
        if name.starts_with('_') {
            continue;
        }
        if let Some(value) = state.lookup(name)
            && let Ok(json) = serde_json::to_value(&value)
        {
            ctx.params.insert(name.to_string(), json);
        }
    }

    process_links(ctx, &html)
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.into())
}

fn from_error<E>(err: E) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    invalid(err.to_string()).with_source(err)
}

fn environment(ctx: &RenderContext, localizer: &SharedLocalizer) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);

    let source = ctx.source.clone();
    env.set_loader(move |name| match source.read_template_file(name) {
        Ok((text, _)) => Ok(Some(text)),
        Err(SourceError::NotFound(_)) => Ok(None),
        Err(err) => Err(from_error(err)),
    });

    let (page, locale) = (ctx.page.clone(), ctx.locale.clone());
    let localedata = ctx.localedata.clone();
    let translator = localizer.clone();
    env.add_filter(
        "translate",
        move |default: String, name: String, comment: Option<String>| -> Result<Value, Error> {
            let text = lock_localizer(&translator)
                .localize_string(
                    &page,
                    &name,
                    Some(&default),
                    comment.as_deref(),
                    &localedata,
                    Escapes::Html,
                    true,
                )
                .map_err(from_error)?;
            Ok(Value::from_safe_string(text))
        },
    );

    let source = ctx.source.clone();
    let relative = ctx.options.relative.then(|| ctx.current_path());
    env.add_filter(
        "linkify",
        move |target: String, link_locale: Option<String>, attrs: Kwargs| -> Result<Value, Error> {
            let link_locale = link_locale.unwrap_or_else(|| locale.clone());
            let resolved = source
                .resolve_link(&target, &link_locale, None)
                .map_err(from_error)?;
            let mut url = resolved.url.unwrap_or(target);
            if let Some(current) = &relative {
                url = relative_link(&url, current);
            }

            let mut tag = format!("<a href=\"{}\"", escape_html(&url));
            if let Some(hreflang) = &resolved.locale {
                tag.push_str(&format!(" hreflang=\"{}\"", escape_html(hreflang)));
            }
            for name in attrs.args() {
                let value: Value = attrs.get(name)?;
                tag.push_str(&format!(
                    " {}=\"{}\"",
                    escape_html(name),
                    escape_html(&value.to_string())
                ));
            }
            tag.push('>');
            Ok(Value::from_safe_string(tag))
        },
    );

    env.add_filter("toclist", |content: String| {
        Value::from_serialize(toclist(&content))
    });

    let source = ctx.source.clone();
    let (page, locale) = (ctx.page.clone(), ctx.locale.clone());
    let strings = localizer.clone();
    env.add_function(
        "get_string",
        move |name: String, from_page: Option<String>| -> Result<Value, Error> {
            let from_page = from_page.unwrap_or_else(|| page.clone());
            let localedata = source
                .read_locale(&locale, &from_page)
                .map_err(from_error)?;
            let text = lock_localizer(&strings)
                .localize_string(
                    &from_page,
                    &name,
                    None,
                    None,
                    &localedata,
                    Escapes::Html,
                    true,
                )
                .map_err(from_error)?;
            Ok(Value::from_safe_string(text))
        },
    );

    let source = ctx.source.clone();
    let locale = ctx.locale.clone();
    let options = ctx.options.clone();
    env.add_function(
        "get_page_content",
        move |page: String, page_locale: Option<String>| -> Result<Value, Error> {
            let Some(nested) = options.nested() else {
                return Err(invalid(format!(
                    "Page {page} is nested more than {MAX_NESTING} levels deep"
                )));
            };
            let page_locale = page_locale.unwrap_or_else(|| locale.clone());
            let params = get_page_params(&source, &page_locale, &page, None, &nested)
                .map_err(from_error)?;
            Ok(Value::from_serialize(&params))
        },
    );

    let source = ctx.source.clone();
    env.add_function(
        "get_pages_metadata",
        move |filters: Option<Value>| -> Result<Value, Error> {
            let filters = match filters {
                Some(filters) if !filters.is_none() && !filters.is_undefined() => {
                    match serde_json::to_value(&filters) {
                        Ok(Json::Object(filters)) => Some(filters),
                        _ => return Err(invalid("Filters are not a dictionary")),
                    }
                }
                _ => None,
            };
            let pages = pages_metadata(&source, filters.as_ref()).map_err(from_error)?;
            Ok(Value::from_serialize(&pages))
        },
    );

    let source = ctx.source.clone();
    env.add_function(
        "has_locale",
        move |locale: String, page: String| -> Result<bool, Error> {
            source.has_locale(&locale, &page).map_err(from_error)
        },
    );

    env
}

// ============================================================================
// Page metadata queries
// ============================================================================

fn pages_metadata(
    source: &SharedSource,
    filters: Option<&serde_json::Map<String, Json>>,
) -> Result<Vec<Params>, SourceError> {
    let mut pages = Vec::new();
    for (page, format) in source.list_pages()? {
        let (data, _) = source.read_page(&page, format)?;
        let mut metadata = Params::new();
        metadata.insert("page".to_string(), Json::String(page));
        metadata.extend(extract_page_metadata(&data).0);
        if filters.is_none_or(|filters| matches_filters(filters, &metadata)) {
            pages.push(metadata);
        }
    }
    Ok(pages)
}

/// A list-valued metadata entry matches when it contains every option of
/// the filter; anything else must be equal.
fn matches_filters(filters: &serde_json::Map<String, Json>, metadata: &Params) -> bool {
    filters.iter().all(|(name, wanted)| match metadata.get(name) {
        None => false,
        Some(Json::Array(have)) => {
            let options = match wanted {
                Json::Array(options) => options.as_slice(),
                other => std::slice::from_ref(other),
            };
            options.iter().all(|option| {
                have.iter()
                    .any(|item| json_text(item) == json_text(option))
            })
        }
        Some(have) => json_text(have) == json_text(wanted),
    })
}

fn json_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Table of contents
// ============================================================================

static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<h(\d)\s[^<>]*\bid="([^<>"]+)"[^<>]*>(.*?)</h(\d)>"#).expect("valid regex")
});

/// One heading in a table of contents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TocItem {
    pub level: u32,
    pub anchor: String,
    pub title: String,
    pub subitems: Vec<TocItem>,
}

/// Nest the `<hN id="...">` headings of `html` by level.
pub fn toclist(html: &str) -> Vec<TocItem> {
    let flat: Vec<TocItem> = HEADING
        .captures_iter(html)
        .filter(|caps| caps[1] == caps[4])
        .filter_map(|caps| {
            Some(TocItem {
                level: caps[1].parse().ok()?,
                anchor: decode_entities(&caps[2]),
                title: decode_entities(&caps[3]),
                subitems: Vec::new(),
            })
        })
        .collect();

    let mut iter = flat.into_iter().peekable();
    nest(&mut iter, 0)
}

fn nest(
    items: &mut std::iter::Peekable<std::vec::IntoIter<TocItem>>,
    parent_level: u32,
) -> Vec<TocItem> {
    let mut level_items = Vec::new();
    while let Some(mut item) = items.next_if(|item| item.level > parent_level) {
        item.subitems = nest(items, item.level);
        level_items.push(item);
    }
    level_items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converters::{Converter, RenderOptions};
    use crate::test_helpers::MemorySource;

    fn context(files: &[(&str, &str)], locale: &str) -> RenderContext {
        RenderContext::new(
            MemorySource::new(files).shared(),
            locale,
            "index",
            RenderOptions::default(),
        )
        .unwrap()
    }

    fn render(files: &[(&str, &str)], locale: &str, text: &str) -> String {
        let mut ctx = context(files, locale);
        let localizer = ctx.localizer();
        Converter::Template
            .render(&mut ctx, &localizer, text, "pages/index.tmpl")
            .unwrap()
    }

    const GERMAN: &[(&str, &str)] = &[
        ("pages/faq.md", "topic = help\ntags = [a, b]\n\nFAQ"),
        ("pages/index.tmpl", ""),
        ("locales/en/faq.json", r#"{"q": {"message": "Question"}}"#),
        ("locales/de/faq.json", r#"{"q": {"message": "Frage"}}"#),
        (
            "locales/de/index.json",
            r#"{"greeting": {"message": "Hallo <em>Welt</em>"}}"#,
        ),
    ];

    #[test]
    fn output_is_auto_escaped() {
        assert_eq!(render(&[], "en", r#"{{ "<b>" }}"#), "&lt;b&gt;");
    }

    #[test]
    fn translate_filter() {
        let text = r#"{{ "Hello <em>world</em>"|translate("greeting") }}"#;
        assert_eq!(render(GERMAN, "en", text), "Hello <em>world</em>");
        assert_eq!(render(GERMAN, "de", text), "Hallo <em>Welt</em>");
    }

    #[test]
    fn translate_counts_missing_strings() {
        let mut ctx = context(GERMAN, "de");
        let localizer = ctx.localizer();
        Converter::Template
            .render(
                &mut ctx,
                &localizer,
                r#"{{ "Hi"|translate("greeting") }} {{ "Bye"|translate("farewell", "comment") }}"#,
                "pages/index.tmpl",
            )
            .unwrap();
        let localizer = lock_localizer(&localizer);
        assert_eq!(localizer.total_translations(), 2);
        assert_eq!(localizer.missing_translations(), 1);
    }

    #[test]
    fn linkify_builds_opening_tag() {
        let html = render(GERMAN, "de", r#"{{ "faq"|linkify(class="nav") }}FAQ</a>"#);
        assert_eq!(
            html,
            r#"<a href="/de/faq" hreflang="de" class="nav">FAQ</a>"#
        );
        let html = render(GERMAN, "de", r#"{{ "faq"|linkify("en") }}"#);
        assert_eq!(html, r#"<a href="/en/faq" hreflang="en">"#);
    }

    #[test]
    fn get_string_reads_other_page() {
        let text = r#"{{ get_string("q", "faq") }}"#;
        assert_eq!(render(GERMAN, "de", text), "Frage");
        assert_eq!(render(GERMAN, "fr", text), "Question");
    }

    #[test]
    fn has_locale_function() {
        let text = r#"{% for l in ["de", "fr"] %}{{ l }}={% if has_locale(l, "faq") %}yes{% else %}no{% endif %} {% endfor %}"#;
        assert_eq!(render(GERMAN, "en", text), "de=yes fr=no ");
    }

    #[test]
    fn pages_metadata_with_filters() {
        let text = r#"{% for p in get_pages_metadata() %}{{ p.page }};{% endfor %}"#;
        assert_eq!(render(GERMAN, "en", text), "faq;index;");

        let text = r#"{% for p in get_pages_metadata({"topic": "help"}) %}{{ p.page }}{% endfor %}"#;
        assert_eq!(render(GERMAN, "en", text), "faq");

        let text = r#"{% for p in get_pages_metadata({"tags": ["b"]}) %}{{ p.page }}{% endfor %}"#;
        assert_eq!(render(GERMAN, "en", text), "faq");

        let text = r#"{% for p in get_pages_metadata({"tags": ["c"]}) %}{{ p.page }}{% endfor %}"#;
        assert_eq!(render(GERMAN, "en", text), "");
    }

    #[test]
    fn get_page_content_returns_parameters() {
        let text = r#"{{ get_page_content("faq").topic }}"#;
        assert_eq!(render(GERMAN, "de", text), "help");
    }

    #[test]
    fn page_requesting_its_own_content_stops() {
        let text = r#"{{ get_page_content("index").body }}"#;
        let files = [("pages/index.tmpl", text)];
        let mut ctx = context(&files, "en");
        let localizer = ctx.localizer();
        let err = Converter::Template
            .render(&mut ctx, &localizer, text, "pages/index.tmpl")
            .unwrap_err();
        assert!(matches!(err, ConvertError::Template { .. }));
        assert!(
            err.to_string()
                .contains(&format!("Page index is nested more than {MAX_NESTING} levels deep"))
        );
    }

    #[test]
    fn top_level_variables_are_exported() {
        let mut ctx = context(&[], "en");
        let localizer = ctx.localizer();
        let html = Converter::Template
            .render(
                &mut ctx,
                &localizer,
                r#"{% set title = "About" %}{% set _private = 1 %}body"#,
                "pages/index.tmpl",
            )
            .unwrap();
        assert_eq!(html, "body");
        assert_eq!(ctx.params["title"], serde_json::json!("About"));
        assert!(!ctx.params.contains_key("_private"));
    }

    #[test]
    fn templates_extend_site_templates() {
        let files = [(
            "templates/base.tmpl",
            "<main>{% block content %}{% endblock %}</main>",
        )];
        let text = r#"{% extends "base" %}{% block content %}hi{% endblock %}"#;
        assert_eq!(render(&files, "en", text), "<main>hi</main>");
        let text = r#"{% extends "templates/base" %}{% block content %}ho{% endblock %}"#;
        assert_eq!(render(&files, "en", text), "<main>ho</main>");
    }

    #[test]
    fn template_errors_name_the_file() {
        let mut ctx = context(&[], "en");
        let localizer = ctx.localizer();
        let err = Converter::Template
            .render(&mut ctx, &localizer, "{% if %}", "pages/broken.tmpl")
            .unwrap_err();
        assert!(err.to_string().starts_with("Template error in pages/broken.tmpl"));
    }

    #[test]
    fn translate_errors_surface() {
        let mut ctx = context(&[], "en");
        let localizer = ctx.localizer();
        let err = Converter::Template
            .render(
                &mut ctx,
                &localizer,
                r#"{{ "<div>x</div>"|translate("bad") }}"#,
                "pages/index.tmpl",
            )
            .unwrap_err();
        assert!(err.to_string().contains("Unexpected HTML tag 'div'"), "{err}");
    }

    #[test]
    fn toclist_nests_by_level() {
        let html = concat!(
            r#"<h1 id="a">A</h1><h2 id="b">B &amp; C</h2>"#,
            r#"<h3 id="c">C</h3><h2 id="d">D</h2><h1 id="e">E</h1><h2>no id</h2>"#,
        );
        let toc = toclist(html);
        assert_eq!(toc.len(), 2);
        assert_eq!(toc[0].anchor, "a");
        assert_eq!(toc[0].subitems.len(), 2);
        assert_eq!(toc[0].subitems[0].title, "B & C");
        assert_eq!(toc[0].subitems[0].subitems[0].anchor, "c");
        assert_eq!(toc[0].subitems[1].anchor, "d");
        assert_eq!(toc[1].anchor, "e");
        assert!(toc[1].subitems.is_empty());
    }

    #[test]
    fn toclist_filter_in_template() {
        let text = r#"{% for item in '<h2 id="x">X</h2>'|toclist %}{{ item.anchor }}:{{ item.level }}{% endfor %}"#;
        assert_eq!(render(&[], "en", text), "x:2");
    }
}
