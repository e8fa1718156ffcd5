//! Page parameter assembly and final page rendering.
//!
//! Rendering one `(locale, page)` pair happens in two steps:
//!
//! ```text
//! get_page_params                         process_page
//! ───────────────                         ────────────
//! find format (html, md, tmpl)            get_page_params
//! read config + translation table         read templates/<template>.tmpl
//! read page, split metadata               render it with the parameters
//! convert body ──► split <head> / body    (head, body, title, ...)
//! translation ratio
//! ```
//!
//! The first step is all the static generator needs to decide whether a
//! page is translated well enough to publish, and all the string export
//! needs to observe every localizable string.

use crate::converters::{
    ConvertError, Converter, RenderContext, RenderOptions, lock_localizer,
};
use crate::metadata::extract_page_metadata;
use crate::source::{SharedSource, SourceError};
use crate::types::{PageFormat, Params};
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value as Json;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error("Failed to serialize parameters of page {page}: {source}")]
    Params {
        page: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Template used when a page does not name one in its metadata.
pub const DEFAULT_TEMPLATE: &str = "default";

/// Everything known about a rendered page, as handed to its template.
///
/// Metadata and exported template variables land in `extra` and are
/// flattened next to the fixed fields.
#[derive(Debug, Clone, Serialize)]
pub struct PageParams {
    pub page: String,
    pub locale: String,
    pub defaultlocale: String,
    pub format: PageFormat,
    pub template: String,
    /// Locales with a translation file for this page, default included,
    /// sorted.
    pub available_locales: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
    pub head: String,
    pub body: String,
    pub translation_ratio: f64,
    #[serde(flatten)]
    pub extra: Params,
}

/// Fraction of strings that had a real translation. A page without
/// localizable strings counts as fully translated.
pub fn translation_ratio(total: usize, missing: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        1.0 - missing as f64 / total as f64
    }
}

static HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<head>(.*?)</head>").expect("valid regex"));

/// Pull the contents of every `<head>` block out of `html`.
pub fn split_head_body(html: &str) -> (String, String) {
    let mut head = String::new();
    let body = HEAD.replace_all(html, |caps: &Captures<'_>| {
        head.push_str(&caps[1]);
        ""
    });
    (head, body.into_owned())
}

/// Keys set by the assembler itself. Metadata may override `template`
/// only.
const RESERVED: [&str; 10] = [
    "page",
    "locale",
    "defaultlocale",
    "format",
    "available_locales",
    "site_url",
    "head",
    "body",
    "translation_ratio",
    "template",
];

/// Try the page formats in order; a page that exists in none is
/// treated as Markdown so the later read reports a useful error.
pub fn guess_format(source: &SharedSource, page: &str) -> PageFormat {
    PageFormat::ALL
        .into_iter()
        .find(|format| source.has_page(page, Some(*format)))
        .unwrap_or(PageFormat::Markdown)
}

/// Convert a page and collect its template parameters.
pub fn get_page_params(
    source: &SharedSource,
    locale: &str,
    page: &str,
    format: Option<PageFormat>,
    options: &RenderOptions,
) -> Result<PageParams, PageError> {
    let format = format.unwrap_or_else(|| guess_format(source, page));
    let mut ctx = RenderContext::new(source.clone(), locale, page, options.clone())?;
    let default_locale = ctx.default_locale().to_string();

    let site_url = ctx.config.general.siteurl.as_ref().map(|configured| {
        options
            .site_url_override
            .clone()
            .unwrap_or_else(|| configured.clone())
    });

    let mut available_locales = Vec::new();
    for candidate in source.list_locales() {
        if source.has_locale(&candidate, page)? {
            available_locales.push(candidate);
        }
    }
    if !available_locales.contains(&default_locale) {
        available_locales.push(default_locale.clone());
    }
    available_locales.sort();

    let (data, filename) = source.read_page(page, format)?;
    let (metadata, body) = extract_page_metadata(&data);

    let params = &mut ctx.params;
    params.insert("page".into(), Json::from(page));
    params.insert("locale".into(), Json::from(locale));
    params.insert("defaultlocale".into(), Json::from(default_locale.as_str()));
    params.insert("format".into(), Json::from(format.extension()));
    params.insert("template".into(), Json::from(DEFAULT_TEMPLATE));
    params.insert("available_locales".into(), Json::from(available_locales.clone()));
    if let Some(site_url) = &site_url {
        params.insert("site_url".into(), Json::from(site_url.as_str()));
    }
    params.extend(metadata);

    let localizer = ctx.localizer();
    let html = Converter::for_format(format).render(&mut ctx, &localizer, &body, &filename)?;
    let (head, body) = split_head_body(&html);
    let ratio = {
        let localizer = lock_localizer(&localizer);
        translation_ratio(localizer.total_translations(), localizer.missing_translations())
    };

    let template = match ctx.params.get("template") {
        Some(Json::String(template)) => template.clone(),
        _ => DEFAULT_TEMPLATE.to_string(),
    };
    let mut extra = ctx.params;
    extra.retain(|key, _| !RESERVED.contains(&key.as_str()));

    Ok(PageParams {
        page: page.to_string(),
        locale: locale.to_string(),
        defaultlocale: default_locale,
        format,
        template,
        available_locales,
        site_url,
        head,
        body,
        translation_ratio: ratio,
        extra,
    })
}

/// Render a page into its final HTML document.
pub fn process_page(
    source: &SharedSource,
    locale: &str,
    page: &str,
    format: Option<PageFormat>,
    options: &RenderOptions,
) -> Result<String, PageError> {
    let params = get_page_params(source, locale, page, format, options)?;
    let (template, filename) = source.read_template(&params.template)?;

    let mut ctx = RenderContext::new(source.clone(), locale, page, options.clone())?;
    ctx.params = match serde_json::to_value(&params) {
        Ok(Json::Object(map)) => map.into_iter().collect(),
        Ok(_) => Params::new(),
        Err(source) => {
            return Err(PageError::Params {
                page: page.to_string(),
                source,
            });
        }
    };

    let localizer = ctx.localizer();
    Ok(Converter::Template.render(&mut ctx, &localizer, &template, &filename)?)
}
