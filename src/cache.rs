//! Memoizing source wrapper for whole-site builds.
//!
//! A static build renders every (locale, page) pair, and each render reads
//! the same settings, templates, translation tables and includes again and
//! resolves the same links again. [`CachedSource`] wraps any source and
//! remembers those results, keyed by the call arguments, for the lifetime
//! of the wrapper. Only use it when the files cannot change underneath
//! (static generation, string export); the development server reads
//! through an uncached source so edits show up on reload.
//!
//! ## Excluding locales
//!
//! The generator drops pages whose translation ratio is too low. Links from
//! other pages must then fall back to the default locale, so the generator
//! marks those pairs with [`CachedSource::exclude_locale`] and calls
//! [`CachedSource::clear_link_cache`] before rendering for real:
//!
//! ```text
//! pass 1: ratio(de, faq) = 0.1 ──► exclude_locale("de", "faq")
//!                                 clear_link_cache()
//! pass 2: link "faq" in de    ──► /en/faq
//! ```
//!
//! An excluded pair also reports no locale file and reads as untranslated,
//! so `get_string` and `get_page_content` agree with the links.
//!
//! All maps sit behind mutexes so one cache can serve parallel renders.
//! A value is computed outside the lock; two threads racing on the same
//! key both compute it and the later insert wins, which is harmless for
//! pure lookups.

use crate::config::SiteConfig;
use crate::link::{self, ResolvedLink};
use crate::locale::LocaleTable;
use crate::source::{SharedSource, Source, SourceError};
use crate::types::PageFormat;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

type FileContent = (String, String);
type LinkKey = (String, String, Option<String>);

pub struct CachedSource {
    inner: SharedSource,
    config: Mutex<Option<Arc<SiteConfig>>>,
    files: Mutex<HashMap<String, FileContent>>,
    listings: Mutex<HashMap<String, Vec<String>>>,
    locales: Mutex<HashMap<(String, String), Arc<LocaleTable>>>,
    templates: Mutex<HashMap<String, FileContent>>,
    includes: Mutex<HashMap<(String, PageFormat), FileContent>>,
    links: Mutex<HashMap<LinkKey, ResolvedLink>>,
    excluded: Mutex<HashSet<(String, String)>>,
    version: OnceLock<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn memoize<K, V, E>(
    map: &Mutex<HashMap<K, V>>,
    key: K,
    compute: impl FnOnce() -> Result<V, E>,
) -> Result<V, E>
where
    K: Eq + Hash + std::fmt::Debug,
    V: Clone,
{
    if let Some(value) = lock(map).get(&key) {
        return Ok(value.clone());
    }
    debug!("cache miss: {key:?}");
    let value = compute()?;
    lock(map).insert(key, value.clone());
    Ok(value)
}

impl CachedSource {
    pub fn new(inner: SharedSource) -> Self {
        Self {
            inner,
            config: Mutex::new(None),
            files: Mutex::default(),
            listings: Mutex::default(),
            locales: Mutex::default(),
            templates: Mutex::default(),
            includes: Mutex::default(),
            links: Mutex::default(),
            excluded: Mutex::default(),
            version: OnceLock::new(),
        }
    }

    /// Report `locale` as having no translation for pages that read their
    /// strings from `locale_file` (a page name or a `[locale_overrides]`
    /// target).
    pub fn exclude_locale(&self, locale: &str, locale_file: &str) {
        lock(&self.excluded).insert((locale.to_string(), locale_file.to_string()));
    }

    /// Forget every resolved link. Call after changing exclusions.
    pub fn clear_link_cache(&self) {
        lock(&self.links).clear();
    }

    fn is_excluded(&self, locale: &str, page: &str) -> Result<bool, SourceError> {
        let config = self.read_config()?;
        if locale == config.default_locale() {
            return Ok(false);
        }
        let key = (locale.to_string(), config.locale_file(page).to_string());
        Ok(lock(&self.excluded).contains(&key))
    }
}

impl Source for CachedSource {
    fn has_file(&self, filename: &str) -> bool {
        self.inner.has_file(filename)
    }

    fn read_file(&self, filename: &str) -> Result<(String, String), SourceError> {
        memoize(&self.files, filename.to_string(), || {
            self.inner.read_file(filename)
        })
    }

    fn read_binary(&self, filename: &str) -> Result<Vec<u8>, SourceError> {
        self.inner.read_binary(filename)
    }

    fn list_files(&self, subdir: &str) -> Vec<String> {
        if let Some(files) = lock(&self.listings).get(subdir) {
            return files.clone();
        }
        let files = self.inner.list_files(subdir);
        lock(&self.listings).insert(subdir.to_string(), files.clone());
        files
    }

    fn version(&self) -> String {
        self.version.get_or_init(|| self.inner.version()).clone()
    }

    fn read_config(&self) -> Result<Arc<SiteConfig>, SourceError> {
        if let Some(config) = lock(&self.config).as_ref() {
            return Ok(Arc::clone(config));
        }
        let config = self.inner.read_config()?;
        *lock(&self.config) = Some(Arc::clone(&config));
        Ok(config)
    }

    fn list_pages(&self) -> Result<Vec<(String, PageFormat)>, SourceError> {
        self.inner.list_pages()
    }

    fn has_page(&self, page: &str, format: Option<PageFormat>) -> bool {
        self.inner.has_page(page, format)
    }

    fn has_locale(&self, locale: &str, page: &str) -> Result<bool, SourceError> {
        if self.is_excluded(locale, page)? {
            return Ok(false);
        }
        Ok(self.has_file(&self.locale_filename(locale, page)?))
    }

    /// An excluded pair reads as untranslated: the default locale's
    /// strings with no translations on top.
    fn read_locale(&self, locale: &str, page: &str) -> Result<Arc<LocaleTable>, SourceError> {
        if self.is_excluded(locale, page)? {
            let config = self.read_config()?;
            let fallback = self.read_locale(config.default_locale(), page)?;
            return Ok(Arc::new(LocaleTable::inheriting(&fallback)));
        }
        memoize(
            &self.locales,
            (locale.to_string(), page.to_string()),
            || self.inner.read_locale(locale, page),
        )
    }

    fn read_template(&self, template: &str) -> Result<(String, String), SourceError> {
        memoize(&self.templates, template.to_string(), || {
            self.inner.read_template(template)
        })
    }

    fn read_include(
        &self,
        include: &str,
        format: PageFormat,
    ) -> Result<(String, String), SourceError> {
        memoize(&self.includes, (include.to_string(), format), || {
            self.inner.read_include(include, format)
        })
    }

    fn resolve_link(
        &self,
        url: &str,
        locale: &str,
        source_page: Option<&str>,
    ) -> Result<ResolvedLink, SourceError> {
        let key = (
            url.to_string(),
            locale.to_string(),
            source_page.map(str::to_string),
        );
        memoize(&self.links, key, || {
            link::resolve_link(self, url, locale, source_page)
        })
    }
}
