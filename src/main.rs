use clap::{Parser, Subcommand};
use log::{Level, LevelFilter, Log, Metadata, Record};
use polysite::source::create_source;
use polysite::{config, csv_port, generate, output, server};
use std::path::PathBuf;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup, called exactly once
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "polysite")]
#[command(about = "Multilingual static website compiler")]
#[command(long_about = "\
Multilingual static website compiler

Pages are written once with inline localizable strings and rendered for
every locale that has translations.

Site structure:

  site/
  ├── settings.toml                # [general] defaultlocale, defaultpage, siteurl
  ├── pages/                       # index.md, faq.html, download.tmpl, docs/intro.md
  ├── includes/                    # Fragments pulled in with <? include name ?>
  ├── templates/                   # Page templates (default.tmpl)
  ├── locales/
  │   ├── en/index.json            # {\"id\": {\"message\": \"...\", \"description\": \"...\"}}
  │   └── de/index.json
  └── static/                      # Copied to the output root unchanged

Strings are written inline as {{id[comment] Default text}}. Pages with less
than 30% of their strings translated are not published for that locale.

Run 'polysite gen-config' to generate a documented settings.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Log progress and warnings to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render every page in every sufficiently translated locale
    Generate {
        /// Site directory
        source: PathBuf,
        /// Output directory
        output: PathBuf,
        /// Emit links relative to each page
        #[arg(long)]
        relative: bool,
    },
    /// Preview the site, rendering pages on request
    Serve {
        /// Site directory
        #[arg(default_value = ".")]
        source: PathBuf,
        #[arg(long, short, default_value = "localhost")]
        address: String,
        #[arg(long, short, default_value_t = 5000)]
        port: u16,
    },
    /// Write new, changed and deleted strings as CSV to stdout
    ExportCsv {
        /// Site directory
        source: PathBuf,
    },
    /// Read translated CSV from stdin into the locale files
    ImportCsv {
        /// Site directory
        source: PathBuf,
    },
    /// Print a stock settings.toml with all options documented
    GenConfig,
}

/// Forwards `log` records to stderr.
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            match record.level() {
                Level::Error | Level::Warn => {
                    eprintln!("{}: {}", record.level(), record.args())
                }
                _ => eprintln!("{}", record.args()),
            }
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logging(verbose: bool) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        });
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Generate {
            source,
            output: output_dir,
            relative,
        } => {
            let options = generate::GenerateOptions { relative };
            let summary = generate::generate_pages(&source, &output_dir, &options)?;
            output::print_generate_output(&summary, &output_dir);
        }
        Command::Serve {
            source,
            address,
            port,
        } => {
            output::print_server_banner(&source, &address, port);
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(server::serve(&source, &address, port))?;
        }
        Command::ExportCsv { source } => {
            let site = create_source(&source)?;
            let rows = csv_port::export_csv(&site, std::io::stdout().lock())?;
            output::print_export_output(rows);
        }
        Command::ImportCsv { source } => {
            let updated = csv_port::import_csv(&source, std::io::stdin().lock())?;
            output::print_import_output(&updated, &source);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}
