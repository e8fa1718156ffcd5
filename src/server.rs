//! Development server.
//!
//! Serves a site straight from its source directory, rendering each page
//! on request so edits show up on reload. Nothing is cached between
//! requests.
//!
//! ```text
//! GET /                  ──► /<defaultlocale>/
//! GET /css/site.css      ──► static/css/site.css
//! GET /de/docs           ──► pages/docs.{html,md,tmpl}
//!                            pages/docs/<defaultpage>.{html,md,tmpl}
//!                            locales/de/docs          (localizable file)
//! anything else          ──► 404
//! ```
//!
//! Pages are rendered with the server's own address as `site_url`. A page
//! whose name collides with another page or localizable file (same name,
//! or one being a directory of the other) cannot be written out by the
//! generator, so the server refuses it too.

use crate::converters::RenderOptions;
use crate::page::{PageError, process_page};
use crate::source::{SharedSource, SourceError, create_source};
use crate::types::PageFormat;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use log::{info, warn};
use maud::{DOCTYPE, Markup, html};
use mime_guess::Mime;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Page(#[from] PageError),
    #[error("The requested page conflicts with another page.")]
    Conflict { page: String },
    #[error("Render task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A response body found for a request path.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    /// A rendered page.
    Page(String),
    /// A static or localizable file, served as is.
    File(Vec<u8>),
}

struct ServerState {
    source: SharedSource,
    site_url: String,
}

/// Serve the site at `source_dir` until the process is stopped.
pub async fn serve(source_dir: &Path, address: &str, port: u16) -> Result<(), ServerError> {
    let state = Arc::new(ServerState {
        source: create_source(source_dir)?,
        site_url: format!("http://{address}:{port}"),
    });
    let app = Router::new().fallback(handle).with_state(state);
    let listener = tokio::net::TcpListener::bind((address, port)).await?;
    info!("listening on http://{address}:{port}/");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle(State(state): State<Arc<ServerState>>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    let lookup_path = path.clone();
    let result = tokio::task::spawn_blocking(move || {
        get_data(&state.source, &lookup_path, &state.site_url)
    })
    .await
    .map_err(ServerError::from)
    .and_then(|result| result);

    match result {
        Ok(Some(Data::Page(html))) => {
            let mime = match guess_mime(&path) {
                Some(mime) => format!("{}; charset=utf-8", mime.essence_str()),
                None => "text/html; charset=utf-8".to_string(),
            };
            ([(header::CONTENT_TYPE, mime)], html).into_response()
        }
        Ok(Some(Data::File(bytes))) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.essence_str().to_string())], bytes).into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, &path, None),
        Err(e) => {
            warn!("{path}: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &path, Some(&e.to_string()))
        }
    }
}

/// Look up the response body for a request path.
///
/// `Ok(None)` means nothing matches (404).
pub fn get_data(
    source: &SharedSource,
    path: &str,
    site_url: &str,
) -> Result<Option<Data>, ServerError> {
    if path
        .split('/')
        .any(|segment| matches!(segment, "." | "..") || segment.contains('\\'))
    {
        return Ok(None);
    }

    let static_path = path.trim_start_matches('/');
    if !static_path.is_empty() && source.has_static(static_path) {
        return Ok(Some(Data::File(source.read_static(static_path)?)));
    }

    let Some((page, data)) = get_page(source, path, site_url)? else {
        return Ok(None);
    };
    if has_conflicting_pages(source, &page)? {
        return Err(ServerError::Conflict { page });
    }
    Ok(Some(data))
}

fn get_page(
    source: &SharedSource,
    path: &str,
    site_url: &str,
) -> Result<Option<(String, Data)>, ServerError> {
    let config = source.read_config()?;
    let path = match path.trim_matches('/') {
        "" => config.default_locale(),
        path => path,
    };
    let (locale, page) = path.split_once('/').unwrap_or((path, ""));
    let alternative = format!("{page}/{}", config.default_page());
    let alternative = alternative.trim_start_matches('/');

    let options = RenderOptions {
        site_url_override: Some(site_url.to_string()),
        ..Default::default()
    };
    for format in PageFormat::ALL {
        for candidate in [page, alternative] {
            if source.has_page(candidate, Some(format)) {
                let html = process_page(source, locale, candidate, Some(format), &options)?;
                return Ok(Some((candidate.to_string(), Data::Page(html))));
            }
        }
    }

    if !page.is_empty() && source.has_localizable_file(locale, page) {
        let data = source.read_localizable_file(locale, page)?;
        return Ok(Some((page.to_string(), Data::File(data))));
    }
    Ok(None)
}

/// Whether `page` shares its name with another page or localizable file,
/// or one of them would need to be a directory of the other.
pub fn has_conflicting_pages(source: &SharedSource, page: &str) -> Result<bool, SourceError> {
    let mut names: Vec<String> = source.list_pages()?.into_iter().map(|(p, _)| p).collect();
    names.extend(source.list_localizable_files()?);

    let prefix = format!("{page}/");
    let same = names.iter().filter(|name| *name == page).count();
    Ok(same > 1
        || names
            .iter()
            .any(|name| name.starts_with(&prefix) || page.starts_with(&format!("{name}/"))))
}

fn error_response(status: StatusCode, uri: &str, error: Option<&str>) -> Response {
    let body = error_page(status, uri, error).into_string();
    (
        status,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        body,
    )
        .into_response()
}

fn error_page(status: StatusCode, uri: &str, error: Option<&str>) -> Markup {
    let title = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    );
    html! {
        (DOCTYPE)
        html {
            head { title { (title) } }
            body {
                h1 { (title) }
                @if status == StatusCode::NOT_FOUND {
                    p { "No page found for the address " (uri) "." }
                } @else {
                    p { "An error occurred while processing the request for " (uri) ":" }
                    pre { (error.unwrap_or_default()) }
                }
            }
        }
    }
}

/// Content type for the extension of `path`, if it is a known one.
fn guess_mime(path: &str) -> Option<Mime> {
    mime_guess::from_path(path).first()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MemorySource, setup_fixtures};

    const SITE_URL: &str = "http://localhost:5000";

    fn site() -> SharedSource {
        MemorySource::new(&[
            ("settings.toml", "[general]\nsiteurl = \"https://example.com\"\n"),
            ("pages/index.html", "<p>{{hello Hello}}</p>"),
            ("pages/docs/index.md", "Docs"),
            (
                "pages/about.tmpl",
                r#"<p>{% if site_url == "http://localhost:5000" %}local{% endif %}</p>"#,
            ),
            ("locales/de/index.json", r#"{"hello": {"message": "Hallo"}}"#),
            ("locales/en/logo.png", "PNG"),
            ("static/css/site.css", "body {}"),
            ("templates/default.tmpl", "{{ body|safe }}"),
        ])
        .shared()
    }

    fn page(path: &str) -> String {
        match get_data(&site(), path, SITE_URL).unwrap() {
            Some(Data::Page(html)) => html,
            other => panic!("expected a page for {path}, got {other:?}"),
        }
    }

    #[test]
    fn root_serves_default_locale_index() {
        assert_eq!(page("/"), "<p>Hello</p>");
        assert_eq!(page("/en"), "<p>Hello</p>");
    }

    #[test]
    fn localized_page() {
        assert_eq!(page("/de/index"), "<p>Hallo</p>");
        assert_eq!(page("de/"), "<p>Hallo</p>");
    }

    #[test]
    fn directory_resolves_to_default_page() {
        assert!(page("/en/docs").contains("<p>Docs</p>"));
    }

    #[test]
    fn pages_see_server_address_as_site_url() {
        assert_eq!(page("/en/about"), "<p>local</p>");
    }

    #[test]
    fn static_and_localizable_files() {
        assert_eq!(
            get_data(&site(), "/css/site.css", SITE_URL).unwrap(),
            Some(Data::File(b"body {}".to_vec()))
        );
        assert_eq!(
            get_data(&site(), "/en/logo.png", SITE_URL).unwrap(),
            Some(Data::File(b"PNG".to_vec()))
        );
    }

    #[test]
    fn unknown_path_is_none() {
        assert_eq!(get_data(&site(), "/en/no-page-here", SITE_URL).unwrap(), None);
    }

    #[test]
    fn conflicting_pages_are_refused() {
        let source = MemorySource::new(&[
            ("pages/translate.md", "page"),
            ("pages/translate/sub.md", "nested"),
            ("templates/default.tmpl", "{{ body|safe }}"),
        ])
        .shared();
        for path in ["en/translate", "/en/translate"] {
            let err = get_data(&source, path, SITE_URL).unwrap_err();
            assert_eq!(err.to_string(), "The requested page conflicts with another page.");
        }
    }

    #[test]
    fn same_name_in_two_formats_conflicts() {
        let source = MemorySource::new(&[("pages/a.md", ""), ("pages/a.html", "")]).shared();
        assert!(has_conflicting_pages(&source, "a").unwrap());
        let source = MemorySource::new(&[("pages/a.md", ""), ("pages/ab.md", "")]).shared();
        assert!(!has_conflicting_pages(&source, "a").unwrap());
    }

    #[test]
    fn mime_types() {
        let essence = |path: &str| guess_mime(path).map(|mime| mime.essence_str().to_string());
        assert_eq!(essence("/css/site.css").as_deref(), Some("text/css"));
        assert_eq!(essence("/en/logo.PNG").as_deref(), Some("image/png"));
        assert_eq!(essence("/downloads/video.mp4").as_deref(), Some("video/mp4"));
        assert_eq!(essence("/downloads/bundle.zip").as_deref(), Some("application/zip"));
        assert_eq!(essence("/en/index"), None);
        assert_eq!(essence("/v1.2/page"), None);
    }

    #[test]
    fn error_pages() {
        let html = error_page(StatusCode::NOT_FOUND, "/en/x", None).into_string();
        assert!(html.contains("<h1>404 Not Found</h1>"));
        assert!(html.contains("No page found for the address /en/x."));

        let html = error_page(StatusCode::INTERNAL_SERVER_ERROR, "/en/x", Some("<boom>"))
            .into_string();
        assert!(html.contains("500 Internal Server Error"));
        assert!(html.contains("<pre>&lt;boom&gt;</pre>"));
    }

    #[test]
    fn fixture_site_directory_pages_and_files() {
        let tmp = setup_fixtures();
        let source = create_source(tmp.path()).unwrap();

        match get_data(&source, "/de/docs", SITE_URL).unwrap() {
            Some(Data::Page(html)) => {
                assert!(html.contains("<title>Documentation</title>"), "{html}");
                assert!(html.contains(r#"<html lang="de">"#), "{html}");
            }
            other => panic!("expected the docs index, got {other:?}"),
        }
        match get_data(&source, "/de/notice.txt", SITE_URL).unwrap() {
            Some(Data::File(data)) => assert_eq!(data, b"Hinweis zur Seite\n"),
            other => panic!("expected the notice, got {other:?}"),
        }
    }

    #[test]
    fn dot_segments_never_leave_the_site() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("secret.txt"), "TOP SECRET").unwrap();
        let site = tmp.path().join("site");
        std::fs::create_dir_all(site.join("static")).unwrap();
        std::fs::create_dir_all(site.join("locales/en")).unwrap();
        std::fs::write(site.join("static/ok.txt"), "ok").unwrap();
        let source = create_source(&site).unwrap();

        for path in [
            "/../secret.txt",
            "/../../secret.txt",
            "/static/../../secret.txt",
            "/en/../../secret.txt",
            "/./ok.txt",
        ] {
            assert!(get_data(&source, path, SITE_URL).unwrap().is_none(), "{path}");
        }
        assert!(matches!(
            get_data(&source, "/ok.txt", SITE_URL).unwrap(),
            Some(Data::File(_))
        ));
    }

    #[tokio::test]
    async fn handler_status_codes() {
        let state = Arc::new(ServerState {
            source: site(),
            site_url: SITE_URL.to_string(),
        });

        let response = handle(State(state.clone()), Uri::from_static("/en/no-page-here")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&body).contains("Not Found"));

        let response = handle(State(state.clone()), Uri::from_static("/de/index")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );

        let response = handle(State(state), Uri::from_static("/css/site.css")).await;
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css");
    }
}
