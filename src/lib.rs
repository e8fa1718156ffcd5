//! # Polysite
//!
//! A static website compiler for multilingual sites. Pages are written once,
//! with every translatable string inline next to its default text, and
//! rendered for every locale that has enough translations.
//!
//! # Rendering Pipeline
//!
//! Every `(locale, page)` pair goes through the same steps:
//!
//! ```text
//! pages/<page>.<fmt>
//!   │  metadata header split off (key = value lines or JSON)
//!   ▼
//! converter (html / md / tmpl)
//!   │  {{id[comment] default}} spans → localized text
//!   │  <a href> / <img src> → locale-aware links
//!   │  <? include name ?> → rendered fragments
//!   ▼
//! templates/<template>.tmpl ──► final HTML
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | `settings.toml` loading and validation |
//! | [`source`] | Page, locale, template and static file store (`FileSource`, `MultiSource`) |
//! | [`cache`] | Memoizing store wrapper shared by parallel renders |
//! | [`metadata`] | Page metadata header extraction |
//! | [`tags`] | Whitelisted-tag parser for localizable strings |
//! | [`locale`] | Translation tables read from `locales/<locale>/<page>.json` |
//! | [`localize`] | Localizer: resolves `{{ }}` spans, tracks translation coverage |
//! | [`link`] | Page link resolution and relative-link rewriting |
//! | [`converters`] | Raw HTML, Markdown and template page converters, includes |
//! | [`page`] | Page parameter assembly and final page rendering |
//! | [`generate`] | Static site output with translation threshold and asset versioning |
//! | [`server`] | Development server rendering pages on request |
//! | [`csv_port`] | CSV export/import of strings for translators |
//! | [`output`] | CLI output formatting |
//! | [`types`] | Shared small types (`PageFormat`, `Params`) |
//!
//! # Design Decisions
//!
//! ## Strings Live in the Page
//!
//! A page carries its default-locale strings inline, so authors never edit
//! the default locale's JSON by hand. Translation files for other locales
//! hold only what differs; the CSV export compares what pages use with
//! what the files hold and flags new, changed and deleted strings.
//!
//! ## Partial Translations Are Not Published
//!
//! A page is only generated for a locale when at least 30% of its strings
//! are translated. Links to an excluded page fall back to the default
//! locale, which is why generation runs in two passes.
//!
//! ## Jinja Templates
//!
//! Page templates are loaded from the site at run time and rendered with
//! `minijinja`, so site authors can change layouts without rebuilding the
//! binary. Error pages of the development server are fixed and use Maud.

pub mod cache;
pub mod config;
pub mod converters;
pub mod csv_port;
pub mod generate;
pub mod link;
pub mod locale;
pub mod localize;
pub mod metadata;
pub mod output;
pub mod page;
pub mod server;
pub mod source;
pub mod tags;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
