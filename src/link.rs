//! Cross-page link resolution.
//!
//! Page authors link to other pages by name (`faq`, `docs/`, `logo.png`)
//! and the resolver turns that into the URL of the right localized copy:
//!
//! ```text
//! "faq#top"  in locale de ──► /de/faq#top   (faq has German strings)
//!                         ──► /en/faq#top   (it doesn't: default locale)
//! "docs/index"            ──► /de/docs      (default page segment dropped)
//! "css/site.css"          ──► /css/site.css (static files have no locale)
//! ```
//!
//! Candidates are tried in order: a localizable file, a page, the page's
//! directory index (`<name>/<defaultpage>`), then a static file. URLs with a
//! scheme or host, absolute and dot-relative paths, and pure fragments are
//! not page links and are left for the caller to keep unchanged.

use crate::source::{Source, SourceError};
use log::warn;

/// Outcome of resolving one link.
///
/// `url: None` means "not a page link, keep the original". A resolved link
/// to a static file has a URL but no locale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedLink {
    pub locale: Option<String>,
    pub url: Option<String>,
}

/// The components of a URL reference, borrowed from the original string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrlParts<'a> {
    pub scheme: &'a str,
    pub netloc: &'a str,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub fragment: Option<&'a str>,
}

impl<'a> UrlParts<'a> {
    pub fn parse(url: &'a str) -> Self {
        let (rest, fragment) = match url.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment)),
            None => (url, None),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query)),
            None => (rest, None),
        };
        let (scheme, rest) = match rest.split_once(':') {
            Some((scheme, after)) if is_scheme(scheme) => (scheme, after),
            _ => ("", rest),
        };
        let (netloc, path) = match rest.strip_prefix("//") {
            Some(authority) => {
                let end = authority.find('/').unwrap_or(authority.len());
                (&authority[..end], &authority[end..])
            }
            None => ("", rest),
        };
        Self {
            scheme,
            netloc,
            path,
            query,
            fragment,
        }
    }

    /// Reassemble the URL with a different path.
    pub fn with_path(&self, path: &str) -> String {
        let mut url = String::new();
        if !self.scheme.is_empty() {
            url.push_str(self.scheme);
            url.push(':');
        }
        if !self.netloc.is_empty() {
            url.push_str("//");
            url.push_str(self.netloc);
        }
        url.push_str(path);
        if let Some(query) = self.query {
            url.push('?');
            url.push_str(query);
        }
        if let Some(fragment) = self.fragment {
            url.push('#');
            url.push_str(fragment);
        }
        url
    }
}

fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Resolve `url`, found on `source_page`, for a page rendered in `locale`.
pub fn resolve_link<S: Source + ?Sized>(
    source: &S,
    url: &str,
    locale: &str,
    source_page: Option<&str>,
) -> Result<ResolvedLink, SourceError> {
    let parts = UrlParts::parse(url);
    let page = parts.path;
    if !parts.scheme.is_empty()
        || !parts.netloc.is_empty()
        || page.starts_with('/')
        || page.starts_with('.')
        || page.is_empty()
    {
        return Ok(ResolvedLink::default());
    }

    let config = source.read_config()?;
    let default_locale = config.default_locale();
    let default_page = config.default_page();
    let alternative_page = format!("{}/{}", page.trim_end_matches('/'), default_page);
    let alternative_page = alternative_page.trim_start_matches('/');

    let locale = if source.has_localizable_file(default_locale, page) {
        if source.has_localizable_file(locale, page) {
            Some(locale)
        } else {
            Some(default_locale)
        }
    } else if source.has_page(page, None) {
        localized_or_default(source, locale, default_locale, page)?
    } else if source.has_page(alternative_page, None) {
        localized_or_default(source, locale, default_locale, alternative_page)?
    } else if source.has_static(page) {
        None
    } else {
        warn!(
            "Link from \"{}\" to \"{}\" cannot be resolved",
            source_page.unwrap_or(""),
            page
        );
        return Ok(ResolvedLink::default());
    };

    let page = match page.rsplit_once('/') {
        Some((parent, last)) if last == default_page => parent,
        None if page == default_page => "",
        _ => page,
    };

    let path = match locale {
        Some(locale) => format!("/{locale}/{page}"),
        None => format!("/{page}"),
    };
    Ok(ResolvedLink {
        locale: locale.map(str::to_string),
        url: Some(parts.with_path(&path)),
    })
}

fn localized_or_default<'a, S: Source + ?Sized>(
    source: &S,
    locale: &'a str,
    default_locale: &'a str,
    page: &str,
) -> Result<Option<&'a str>, SourceError> {
    if source.has_locale(locale, page)? {
        Ok(Some(locale))
    } else {
        Ok(Some(default_locale))
    }
}

/// Express the root-relative `url` relative to the page served at
/// `current` (also root-relative, e.g. `/de/docs/faq`).
pub fn relative_link(url: &str, current: &str) -> String {
    let parts = UrlParts::parse(url);
    if !parts.path.starts_with('/') || !parts.scheme.is_empty() || !parts.netloc.is_empty() {
        return url.to_string();
    }

    let base: Vec<&str> = match current.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').filter(|s| !s.is_empty()).collect(),
        None => Vec::new(),
    };
    let target: Vec<&str> = parts.path.split('/').filter(|s| !s.is_empty()).collect();
    let common = base
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count();

    let mut segments = vec![".."; base.len() - common];
    segments.extend(&target[common..]);
    let mut path = if segments.is_empty() {
        ".".to_string()
    } else {
        segments.join("/")
    };
    if parts.path.ends_with('/') && parts.path != "/" || parts.path == "/" && path != "." {
        path.push('/');
    }
    parts.with_path(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MemorySource;

    fn site() -> MemorySource {
        MemorySource::new(&[
            ("pages/index.md", ""),
            ("pages/faq.md", ""),
            ("pages/docs/index.html", ""),
            ("pages/docs/setup.md", ""),
            ("locales/en/faq.json", "{}"),
            ("locales/de/faq.json", "{}"),
            ("locales/en/logo.png", "png"),
            ("locales/de/logo.png", "png"),
            ("locales/en/manual.pdf", "pdf"),
            ("static/css/site.css", ""),
        ])
    }

    fn resolve(url: &str, locale: &str) -> (Option<String>, Option<String>) {
        let link = resolve_link(&site(), url, locale, Some("index")).unwrap();
        (link.locale, link.url)
    }

    fn some(locale: &str, url: &str) -> (Option<String>, Option<String>) {
        (Some(locale.to_string()), Some(url.to_string()))
    }

    #[test]
    fn parse_url_parts() {
        let parts = UrlParts::parse("https://example.com/a/b?x=1#top");
        assert_eq!(parts.scheme, "https");
        assert_eq!(parts.netloc, "example.com");
        assert_eq!(parts.path, "/a/b");
        assert_eq!(parts.query, Some("x=1"));
        assert_eq!(parts.fragment, Some("top"));

        let parts = UrlParts::parse("faq#top");
        assert_eq!(parts.scheme, "");
        assert_eq!(parts.path, "faq");
    }

    #[test]
    fn non_page_links_are_left_alone() {
        for url in [
            "mailto:someone@example.com",
            "tel:+49123",
            "https://example.com/faq",
            "//cdn.example.com/x.js",
            "/de/faq",
            "./faq",
            "../faq",
            "#section",
            "",
        ] {
            assert_eq!(resolve(url, "de"), (None, None), "{url}");
        }
    }

    #[test]
    fn translated_page_keeps_locale() {
        assert_eq!(resolve("faq", "de"), some("de", "/de/faq"));
    }

    #[test]
    fn untranslated_page_falls_back_to_default_locale() {
        assert_eq!(resolve("faq", "fr"), some("en", "/en/faq"));
        assert_eq!(resolve("docs/setup", "de"), some("en", "/en/docs/setup"));
    }

    #[test]
    fn default_page_segment_is_stripped() {
        assert_eq!(resolve("docs/index", "en"), some("en", "/en/docs"));
        assert_eq!(resolve("index", "en"), some("en", "/en/"));
    }

    #[test]
    fn directory_links_use_default_page() {
        assert_eq!(resolve("docs", "en"), some("en", "/en/docs"));
        assert_eq!(resolve("docs/", "en"), some("en", "/en/docs/"));
    }

    #[test]
    fn query_and_fragment_are_preserved() {
        assert_eq!(resolve("faq?x=1#top", "de"), some("de", "/de/faq?x=1#top"));
        assert_eq!(
            resolve("css/site.css?v=2", "de"),
            (None, Some("/css/site.css?v=2".to_string()))
        );
    }

    #[test]
    fn localizable_files() {
        assert_eq!(resolve("logo.png", "de"), some("de", "/de/logo.png"));
        assert_eq!(resolve("manual.pdf", "de"), some("en", "/en/manual.pdf"));
    }

    #[test]
    fn static_files_have_no_locale() {
        assert_eq!(resolve("css/site.css", "de"), (None, Some("/css/site.css".to_string())));
    }

    #[test]
    fn unresolvable_link_is_left_alone() {
        assert_eq!(resolve("no/such/page", "de"), (None, None));
    }

    #[test]
    fn resolution_is_deterministic() {
        assert_eq!(resolve("faq#a", "fr"), resolve("faq#a", "fr"));
    }

    #[test]
    fn relative_links() {
        assert_eq!(relative_link("/de/faq", "/de/index"), "faq");
        assert_eq!(relative_link("/de/faq#top", "/de/docs/setup"), "../faq#top");
        assert_eq!(relative_link("/css/site.css", "/de/docs/setup"), "../../css/site.css");
        assert_eq!(relative_link("/de/docs/", "/de/index"), "docs/");
        assert_eq!(relative_link("/de/", "/de/docs/setup"), "../");
        assert_eq!(relative_link("/de/", "/de/index"), "./");
        assert_eq!(relative_link("https://x.org/a", "/de/index"), "https://x.org/a");
    }
}
