//! Page converters.
//!
//! A converter turns one page (or include, or whole-page template) into
//! HTML. The three formats share the same post-processing:
//!
//! ```text
//!              ┌──────────────┐
//!  .html ─────►│ Raw          │──┐
//!              └──────────────┘  │    ┌───────────────┐   ┌──────────────────┐
//!              ┌──────────────┐  ├───►│ process_links │──►│ resolve_includes │──► HTML
//!  .md   ─────►│ Markdown     │──┤    └───────────────┘   └──────────────────┘
//!              └──────────────┘  │
//!              ┌──────────────┐  │
//!  .tmpl ─────►│ Template     │──┘
//!              └──────────────┘
//! ```
//!
//! Raw and Markdown sources localize `{{ id default }}` spans; templates
//! call the `translate` filter instead. Links found in `<a href>` and
//! `<img src>` are resolved to the right localized page. Include
//! directives (`<? include name ?>`) are rendered recursively with the
//! converter matching the include's format.
//!
//! ## The render context
//!
//! Everything one top-level render needs travels in a [`RenderContext`]
//! passed down the include chain by `&mut`. Metadata of an include (and
//! top-level `{% set %}` variables of a template include) is merged into
//! the context's parameters and stays visible for the rest of the render,
//! including the whole-page template. Pages rely on this to set a title
//! from a shared include, so the leak is kept on purpose. A context is
//! never shared between pages or locales.

mod markdown;
mod raw;
mod template;

pub use markdown::markdown_to_html;
pub use template::{TocItem, toclist};

use crate::config::SiteConfig;
use crate::link::relative_link;
use crate::locale::LocaleTable;
use crate::localize::{LocalizeError, Localizer, StringRecorder};
use crate::metadata::extract_page_metadata;
use crate::source::{SharedSource, SourceError};
use crate::tags::{decode_entities, escape_html};
use crate::types::{PageFormat, Params};
use regex::{Captures, Regex};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Localize(#[from] LocalizeError),
    #[error("Template error in {file}: {source}")]
    Template {
        file: String,
        #[source]
        source: minijinja::Error,
    },
    #[error("Failed to resolve include {include} on page {page}")]
    UnresolvedInclude { include: String, page: String },
    #[error("Include {include} on page {page} is nested more than {depth} levels deep")]
    NestingTooDeep {
        include: String,
        page: String,
        depth: usize,
    },
}

/// Includes and `get_page_content` calls nest at most this deep.
pub(crate) const MAX_NESTING: usize = 10;

/// Caller-supplied knobs for a render.
#[derive(Clone, Default)]
pub struct RenderOptions {
    /// Replaces the configured `siteurl` (the development server passes
    /// its own address). Ignored when the site has no `siteurl`.
    pub site_url_override: Option<String>,
    /// Observer for every localized string.
    pub recorder: Option<Arc<dyn StringRecorder>>,
    /// Rewrite resolved links relative to the current page.
    pub relative: bool,
    pub(crate) depth: usize,
}

impl RenderOptions {
    /// Options for a render nested inside this one, `None` once
    /// [`MAX_NESTING`] is reached.
    pub(crate) fn nested(&self) -> Option<Self> {
        (self.depth < MAX_NESTING).then(|| Self {
            depth: self.depth + 1,
            ..self.clone()
        })
    }
}

/// State of one top-level render of `(locale, page)`.
pub struct RenderContext {
    pub source: SharedSource,
    pub config: Arc<SiteConfig>,
    pub page: String,
    pub locale: String,
    /// The current locale's table for the page, default locale beneath.
    pub localedata: Arc<LocaleTable>,
    pub options: RenderOptions,
    /// Parameter bag handed to templates.
    pub params: Params,
}

/// A localizer shared between a converter and the template functions it
/// registers.
pub type SharedLocalizer = Arc<Mutex<Localizer>>;

pub(crate) fn lock_localizer(localizer: &SharedLocalizer) -> MutexGuard<'_, Localizer> {
    localizer.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RenderContext {
    pub fn new(
        source: SharedSource,
        locale: &str,
        page: &str,
        options: RenderOptions,
    ) -> Result<Self, SourceError> {
        let config = source.read_config()?;
        let localedata = source.read_locale(locale, page)?;
        Ok(Self {
            source,
            config,
            page: page.to_string(),
            locale: locale.to_string(),
            localedata,
            options,
            params: Params::new(),
        })
    }

    pub fn default_locale(&self) -> &str {
        self.config.default_locale()
    }

    /// A fresh localizer for this render. Every converter invocation gets
    /// its own, so defaults remembered in one include do not leak into
    /// another.
    pub fn localizer(&self) -> SharedLocalizer {
        let localizer = Localizer::new(
            self.page.as_str(),
            self.locale.as_str(),
            self.default_locale(),
            Arc::clone(&self.localedata),
        )
        .with_recorder(self.options.recorder.clone());
        Arc::new(Mutex::new(localizer))
    }

    /// URL path the current page is served at.
    pub fn current_path(&self) -> String {
        format!("/{}/{}", self.locale, self.page)
    }
}

/// The three source formats, each with its own way of producing HTML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
    Raw,
    Markdown,
    Template,
}

impl Converter {
    pub fn for_format(format: PageFormat) -> Self {
        match format {
            PageFormat::Html => Converter::Raw,
            PageFormat::Markdown => Converter::Markdown,
            PageFormat::Template => Converter::Template,
        }
    }

    /// Convert `text` (read from `filename`) to HTML, with includes
    /// resolved. Translation counters accumulate in `localizer`.
    pub fn render(
        self,
        ctx: &mut RenderContext,
        localizer: &SharedLocalizer,
        text: &str,
        filename: &str,
    ) -> Result<String, ConvertError> {
        let html = match self {
            Converter::Raw => raw::get_html(ctx, localizer, text)?,
            Converter::Markdown => markdown::get_html(ctx, localizer, text)?,
            Converter::Template => template::get_html(ctx, localizer, text, filename)?,
        };
        resolve_includes(ctx, localizer, &html, self.include_regex())
    }

    fn include_regex(self) -> &'static Regex {
        match self {
            Converter::Markdown => &MARKDOWN_INCLUDE,
            _ => &INCLUDE,
        }
    }
}

// ============================================================================
// Includes
// ============================================================================

static INCLUDE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<\?\s*include\s+([^\s<>"]+)\s*\?>"#).expect("valid regex")
});

/// Markdown output may carry the directive escaped.
static MARKDOWN_INCLUDE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:<|&lt;)\?\s*include\s+([^\s<>"]+)\s*\?(?:>|&gt;)"#).expect("valid regex")
});

fn resolve_includes(
    ctx: &mut RenderContext,
    localizer: &SharedLocalizer,
    text: &str,
    regex: &Regex,
) -> Result<String, ConvertError> {
    replace_all(regex, text, |caps| {
        let name = &caps[1];
        let Some(format) = PageFormat::ALL
            .into_iter()
            .find(|format| ctx.source.has_include(name, *format))
        else {
            return Err(ConvertError::UnresolvedInclude {
                include: name.to_string(),
                page: ctx.page.clone(),
            });
        };

        let Some(nested) = ctx.options.nested() else {
            return Err(ConvertError::NestingTooDeep {
                include: name.to_string(),
                page: ctx.page.clone(),
                depth: MAX_NESTING,
            });
        };

        let (data, filename) = ctx.source.read_include(name, format)?;
        let (metadata, body) = extract_page_metadata(&data);
        ctx.params.extend(metadata);

        let child = ctx.localizer();
        let outer = std::mem::replace(&mut ctx.options, nested);
        let rendered = Converter::for_format(format).render(ctx, &child, &body, &filename);
        ctx.options = outer;
        let html = rendered?;
        let (total, missing) = {
            let child = lock_localizer(&child);
            (child.total_translations(), child.missing_translations())
        };
        lock_localizer(localizer).add_counts(total, missing);
        Ok(html)
    })
}

// ============================================================================
// Links
// ============================================================================

static LINK_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(<a\s[^<>]*\b(href)=")([^<>"]+)(")"#).expect("valid regex")
});

static IMG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(<img\s[^<>]*\b(src)=")([^<>"]+)(")"#).expect("valid regex")
});

/// Rewrite `<a href>` and `<img src>` targets that name pages or
/// localizable files. Resolved `href`s also get an `hreflang`.
pub fn process_links(ctx: &RenderContext, text: &str) -> Result<String, ConvertError> {
    let text = replace_all(&LINK_HREF, text, |caps| process_link(ctx, caps))?;
    replace_all(&IMG_SRC, &text, |caps| process_link(ctx, caps))
}

fn process_link(ctx: &RenderContext, caps: &Captures<'_>) -> Result<String, ConvertError> {
    let (pre, attr, post) = (&caps[1], &caps[2], &caps[4]);
    let mut url = decode_entities(&caps[3]);
    let mut post = post.to_string();

    let resolved = ctx
        .source
        .resolve_link(&url, &ctx.locale, Some(&ctx.page))?;
    if let Some(new_url) = resolved.url {
        url = if ctx.options.relative {
            relative_link(&new_url, &ctx.current_path())
        } else {
            new_url
        };
        if attr == "href"
            && let Some(locale) = &resolved.locale
        {
            post.push_str(&format!(" hreflang=\"{}\"", escape_html(locale)));
        }
    }
    Ok(format!("{pre}{}{post}", escape_html(&url)))
}

/// `Regex::replace_all` with a fallible replacement.
fn replace_all<E>(
    regex: &Regex,
    text: &str,
    mut replace: impl FnMut(&Captures<'_>) -> Result<String, E>,
) -> Result<String, E> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in regex.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&replace(&caps)?);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MemorySource;

    fn context(files: &[(&str, &str)], locale: &str, page: &str) -> RenderContext {
        RenderContext::new(MemorySource::new(files).shared(), locale, page, RenderOptions::default())
            .unwrap()
    }

    const SITE: &[(&str, &str)] = &[
        ("pages/index.html", ""),
        ("pages/faq.html", ""),
        ("locales/de/faq.json", "{}"),
        ("locales/en/logo.png", "png"),
        ("static/site.css", ""),
    ];

    #[test]
    fn links_get_locale_and_hreflang() {
        let ctx = context(SITE, "de", "index");
        let html = process_links(&ctx, r#"<a class="x" href="faq">FAQ</a>"#).unwrap();
        assert_eq!(html, r#"<a class="x" href="/de/faq" hreflang="de">FAQ</a>"#);
    }

    #[test]
    fn images_resolve_without_hreflang() {
        let ctx = context(SITE, "de", "index");
        let html = process_links(&ctx, r#"<img alt="" src="logo.png">"#).unwrap();
        assert_eq!(html, r#"<img alt="" src="/en/logo.png">"#);
    }

    #[test]
    fn static_links_have_no_hreflang() {
        let ctx = context(SITE, "de", "index");
        let html = process_links(&ctx, r#"<a href="site.css">css</a>"#).unwrap();
        assert_eq!(html, r#"<a href="/site.css">css</a>"#);
    }

    #[test]
    fn external_links_are_kept() {
        let ctx = context(SITE, "de", "index");
        let html = r#"<a href="https://example.com/?a=1&amp;b=2">x</a>"#;
        assert_eq!(process_links(&ctx, html).unwrap(), html);
    }

    #[test]
    fn relative_mode_rewrites_against_current_page() {
        let mut ctx = context(SITE, "de", "docs/setup");
        ctx.options.relative = true;
        let html = process_links(&ctx, r#"<a href="faq">FAQ</a>"#).unwrap();
        assert_eq!(html, r#"<a href="../faq" hreflang="de">FAQ</a>"#);
    }

    #[test]
    fn includes_render_in_their_own_format() {
        let files = [
            ("pages/index.html", ""),
            ("includes/footer.md", "title = From include\n\n*footer*"),
        ];
        let mut ctx = context(&files, "en", "index");
        let localizer = ctx.localizer();
        let html = Converter::Raw
            .render(&mut ctx, &localizer, "<p>body</p><? include footer ?>", "index.html")
            .unwrap();
        assert!(html.starts_with("<p>body</p>"));
        assert!(html.contains("<em>footer</em>"));
        assert_eq!(ctx.params["title"], serde_json::json!("From include"));
    }

    #[test]
    fn include_counts_add_to_parent() {
        let files = [
            ("pages/index.html", ""),
            ("includes/note.html", "{{note A note}}"),
            ("locales/de/index.json", r#"{"intro": {"message": "Hallo"}}"#),
        ];
        let mut ctx = context(&files, "de", "index");
        let localizer = ctx.localizer();
        let html = Converter::Raw
            .render(&mut ctx, &localizer, "{{intro Hello}} <? include note ?>", "index.html")
            .unwrap();
        assert_eq!(html, "Hallo A note");
        let localizer = lock_localizer(&localizer);
        assert_eq!(localizer.total_translations(), 2);
        assert_eq!(localizer.missing_translations(), 1);
    }

    #[test]
    fn unresolved_include_names_include_and_page() {
        let mut ctx = context(&[("pages/faq.html", "")], "en", "faq");
        let localizer = ctx.localizer();
        let err = Converter::Raw
            .render(&mut ctx, &localizer, "<? include nowhere ?>", "faq.html")
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to resolve include nowhere on page faq");
    }

    #[test]
    fn nested_includes() {
        let files = [
            ("includes/outer.html", "[<? include inner ?>]"),
            ("includes/inner.html", "inner"),
        ];
        let mut ctx = context(&files, "en", "index");
        let localizer = ctx.localizer();
        let html = Converter::Raw
            .render(&mut ctx, &localizer, "<? include outer ?>", "index.html")
            .unwrap();
        assert_eq!(html, "[inner]");
        assert_eq!(ctx.options.depth, 0);
    }

    #[test]
    fn self_including_include_stops() {
        let files = [("includes/loop.html", "x<? include loop ?>")];
        let mut ctx = context(&files, "en", "index");
        let localizer = ctx.localizer();
        let err = Converter::Raw
            .render(&mut ctx, &localizer, "<? include loop ?>", "index.html")
            .unwrap_err();
        assert!(matches!(
            err,
            ConvertError::NestingTooDeep { ref include, depth: MAX_NESTING, .. } if include == "loop"
        ));
    }

    #[test]
    fn includes_may_repeat_side_by_side() {
        let files = [("includes/dot.html", ".")];
        let inline = "<? include dot ?>".repeat(MAX_NESTING + 4);
        let mut ctx = context(&files, "en", "index");
        let localizer = ctx.localizer();
        let html = Converter::Raw
            .render(&mut ctx, &localizer, &inline, "index.html")
            .unwrap();
        assert_eq!(html, ".".repeat(MAX_NESTING + 4));
    }
}
