//! CLI output formatting for all commands.
//!
//! # Output Format
//!
//! ## Generate
//!
//! ```text
//! Locales: de, en, fr
//!
//! Excluded (too few translations)
//!     fr/faq
//!
//! Generated 6 pages, 3 files → public/
//!     4 written, 1 removed
//! ```
//!
//! ## Export / Import
//!
//! ```text
//! Exported 12 strings
//! Updated locales/de/index.json
//! ```
//!
//! The CSV itself goes to stdout, so export reports on stderr.
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to the terminal. Format
//! functions are pure: no I/O, no side effects.

use crate::generate::GenerateSummary;
use std::path::{Path, PathBuf};

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

// ============================================================================
// Generate
// ============================================================================

pub fn format_generate_output(summary: &GenerateSummary, output_dir: &Path) -> Vec<String> {
    let mut lines = vec![format!("Locales: {}", summary.locales.join(", "))];

    if !summary.excluded.is_empty() {
        lines.push(String::new());
        lines.push("Excluded (too few translations)".to_string());
        for (locale, page) in &summary.excluded {
            lines.push(format!("{}{locale}/{page}", indent(1)));
        }
    }

    lines.push(String::new());
    lines.push(format!(
        "Generated {}, {} \u{2192} {}/",
        plural(summary.pages, "page"),
        plural(summary.files, "file"),
        output_dir.display()
    ));
    lines.push(format!(
        "{}{} written, {} removed",
        indent(1),
        summary.written,
        summary.removed
    ));
    lines
}

/// Print generate output to stdout.
pub fn print_generate_output(summary: &GenerateSummary, output_dir: &Path) {
    for line in format_generate_output(summary, output_dir) {
        println!("{}", line);
    }
}

// ============================================================================
// CSV
// ============================================================================

pub fn format_export_output(rows: usize) -> Vec<String> {
    if rows == 0 {
        vec!["Nothing to export, all strings are up to date".to_string()]
    } else {
        vec![format!("Exported {}", plural(rows, "string"))]
    }
}

/// Print export output to stderr.
pub fn print_export_output(rows: usize) {
    for line in format_export_output(rows) {
        eprintln!("{}", line);
    }
}

/// Updated files are shown relative to the site root.
pub fn format_import_output(updated: &[PathBuf], source_root: &Path) -> Vec<String> {
    if updated.is_empty() {
        return vec!["No translation files changed".to_string()];
    }
    updated
        .iter()
        .map(|path| {
            let shown = path.strip_prefix(source_root).unwrap_or(path);
            format!("Updated {}", shown.display())
        })
        .collect()
}

pub fn print_import_output(updated: &[PathBuf], source_root: &Path) {
    for line in format_import_output(updated, source_root) {
        println!("{}", line);
    }
}

// ============================================================================
// Serve
// ============================================================================

pub fn format_server_banner(source_root: &Path, address: &str, port: u16) -> Vec<String> {
    vec![
        format!("Serving {} at http://{address}:{port}/", source_root.display()),
        format!("{}Pages render on every request; press Ctrl+C to stop", indent(1)),
    ]
}

pub fn print_server_banner(source_root: &Path, address: &str, port: u16) {
    for line in format_server_banner(source_root, address, port) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> GenerateSummary {
        GenerateSummary {
            locales: vec!["de".into(), "en".into(), "fr".into()],
            pages: 6,
            excluded: vec![("fr".into(), "faq".into())],
            files: 1,
            written: 4,
            removed: 1,
        }
    }

    #[test]
    fn plural_words() {
        assert_eq!(plural(0, "page"), "0 pages");
        assert_eq!(plural(1, "page"), "1 page");
        assert_eq!(plural(2, "file"), "2 files");
    }

    #[test]
    fn generate_output_lists_exclusions() {
        let lines = format_generate_output(&summary(), Path::new("public"));
        assert_eq!(
            lines,
            [
                "Locales: de, en, fr",
                "",
                "Excluded (too few translations)",
                "    fr/faq",
                "",
                "Generated 6 pages, 1 file \u{2192} public/",
                "    4 written, 1 removed",
            ]
        );
    }

    #[test]
    fn generate_output_without_exclusions() {
        let summary = GenerateSummary {
            excluded: Vec::new(),
            ..summary()
        };
        let lines = format_generate_output(&summary, Path::new("out"));
        assert!(!lines.iter().any(|line| line.starts_with("Excluded")));
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn export_output() {
        assert_eq!(format_export_output(1), ["Exported 1 string"]);
        assert_eq!(
            format_export_output(0),
            ["Nothing to export, all strings are up to date"]
        );
    }

    #[test]
    fn import_output_strips_site_root() {
        let updated = vec![PathBuf::from("site/locales/de/index.json")];
        assert_eq!(
            format_import_output(&updated, Path::new("site")),
            ["Updated locales/de/index.json"]
        );
        assert_eq!(
            format_import_output(&[], Path::new("site")),
            ["No translation files changed"]
        );
    }

    #[test]
    fn server_banner_shows_url() {
        let lines = format_server_banner(Path::new("site"), "localhost", 5000);
        assert_eq!(lines[0], "Serving site at http://localhost:5000/");
    }
}
