//! pagewatch command-line entry point.
//!
//! ## Usage
//!
//! ```bash
//! pagewatch diff                      # Compare new snapshot pairs
//! pagewatch report --days 7           # Cluster variants and publish the weekly report
//! pagewatch ingest --site Acme --image shot.png --markup page.html
//! ```
//!
//! Only configuration and startup problems produce a failing exit status.
//! Failures on individual pages or pairs are logged and left for the next run.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use pagewatch::blobs::FsBlobStore;
use pagewatch::config::Config;
use pagewatch::db::SqliteDb;
use pagewatch::dom::DomFeatureExtractor;
use pagewatch::ingest::{ingest_capture, CaptureFiles};
use pagewatch::llm::create_summarizer;
use pagewatch::processor::SnapshotPairProcessor;
use pagewatch::publish::{create_sink, publish_report};
use pagewatch::report::{render_message, ReportBuilder, ReportWindow};
use pagewatch::logging;

#[derive(Debug)]
enum Command {
    Diff {
        max_pairs: Option<usize>,
        newest_first: bool,
    },
    Report {
        days: Option<u32>,
        output: Option<PathBuf>,
    },
    Ingest {
        site: String,
        image: PathBuf,
        markup: PathBuf,
        captured_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug)]
struct CliArgs {
    config_path: Option<PathBuf>,
    command: Command,
}

fn main() -> ExitCode {
    let args = parse_args();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: CliArgs) -> Result<()> {
    let mut config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Command::Ingest { .. } = args.command {
        std::fs::create_dir_all(&config.storage.blob_dir).with_context(|| {
            format!("Failed to create {}", config.storage.blob_dir.display())
        })?;
    }
    apply_overrides(&mut config, &args.command);
    config.validate()?;

    logging::init(config.log_dir.clone())?;
    info!("pagewatch {} starting", env!("CARGO_PKG_VERSION"));

    let db = SqliteDb::open(&config.database.sqlite_path)?;
    db.initialize()?;
    info!("Database opened at {:?}", config.database.sqlite_path);

    let blobs = FsBlobStore::new(&config.storage.blob_dir);

    match args.command {
        Command::Diff { .. } => {
            let processor = SnapshotPairProcessor::new(&db, &blobs, config.diff.clone());
            if let Err(e) = processor.run() {
                error!("Comparison run failed: {:#}", e);
            }
        }
        Command::Report { .. } => {
            run_report(&config, &db, &blobs);
        }
        Command::Ingest {
            site,
            image,
            markup,
            captured_at,
        } => {
            let site = config.find_site(&site)?;
            let files = CaptureFiles {
                image_path: &image,
                markup_path: &markup,
            };
            ingest_capture(&db, &blobs, site, files, captured_at.unwrap_or_else(Utc::now))?;
        }
    }

    Ok(())
}

fn apply_overrides(config: &mut Config, command: &Command) {
    match command {
        Command::Diff {
            max_pairs,
            newest_first,
        } => {
            if max_pairs.is_some() {
                config.diff.max_pairs_per_site = *max_pairs;
            }
            if *newest_first {
                config.diff.newest_first = true;
            }
        }
        Command::Report { days, output } => {
            if let Some(days) = days {
                config.report.window_days = *days;
            }
            if output.is_some() {
                config.report.output = output.clone();
            }
        }
        Command::Ingest { .. } => {}
    }
}

fn run_report(config: &Config, db: &SqliteDb, blobs: &FsBlobStore) {
    let extractor = DomFeatureExtractor::new(config.dom.clone());
    let summarizer = create_summarizer(&config.llm);
    let builder = ReportBuilder {
        store: db,
        blobs,
        extractor: &extractor,
        summarizer: summarizer.as_ref(),
    };

    let window = ReportWindow::ending_at(Utc::now(), config.report.window_days);
    let reports = match builder.build_site_reports(&window) {
        Ok(reports) => reports,
        Err(e) => {
            error!("Failed to build report: {:#}", e);
            return;
        }
    };

    let message = render_message(&reports, &window);
    let sink = create_sink(config.report.output.as_deref());
    publish_report(sink.as_ref(), &message);
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    match parse_from(&args[1..]) {
        Ok(Some(cli)) => cli,
        Ok(None) => {
            print_help();
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    }
}

/// Parse arguments after the program name; `None` means help or version was shown.
fn parse_from(args: &[String]) -> Result<Option<CliArgs>> {
    let mut config_path = None;
    let mut subcommand: Option<String> = None;
    let mut max_pairs = None;
    let mut newest_first = false;
    let mut days = None;
    let mut output = None;
    let mut site = None;
    let mut image = None;
    let mut markup = None;
    let mut captured_at = None;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        let mut value = || -> Result<String> {
            i += 1;
            args.get(i)
                .cloned()
                .with_context(|| format!("{} requires a value", arg))
        };

        match arg {
            "--help" | "-h" => return Ok(None),
            "--version" | "-V" => {
                println!("pagewatch {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => config_path = Some(PathBuf::from(value()?)),
            "--max-pairs" => {
                let raw = value()?;
                max_pairs = Some(
                    raw.parse::<usize>()
                        .with_context(|| format!("Invalid --max-pairs value: {}", raw))?,
                );
            }
            "--newest-first" => newest_first = true,
            "--days" => {
                let raw = value()?;
                days = Some(
                    raw.parse::<u32>()
                        .with_context(|| format!("Invalid --days value: {}", raw))?,
                );
            }
            "--output" | "-o" => output = Some(PathBuf::from(value()?)),
            "--site" => site = Some(value()?),
            "--image" => image = Some(PathBuf::from(value()?)),
            "--markup" => markup = Some(PathBuf::from(value()?)),
            "--captured-at" => {
                let raw = value()?;
                let parsed = DateTime::parse_from_rfc3339(&raw)
                    .with_context(|| format!("Invalid --captured-at timestamp: {}", raw))?;
                captured_at = Some(parsed.with_timezone(&Utc));
            }
            "diff" | "report" | "ingest" if subcommand.is_none() => {
                subcommand = Some(arg.to_string());
            }
            other => bail!("Unknown argument: {}", other),
        }
        i += 1;
    }

    let command = match subcommand.as_deref() {
        Some("diff") => Command::Diff {
            max_pairs,
            newest_first,
        },
        Some("report") => Command::Report { days, output },
        Some("ingest") => Command::Ingest {
            site: site.context("ingest requires --site")?,
            image: image.context("ingest requires --image")?,
            markup: markup.context("ingest requires --markup")?,
            captured_at,
        },
        _ => bail!("Missing command (diff, report or ingest)"),
    };

    Ok(Some(CliArgs {
        config_path,
        command,
    }))
}

fn print_help() {
    println!(
        r#"pagewatch - Visual change detection and variant clustering for web pages

USAGE:
    pagewatch [OPTIONS] <COMMAND> [COMMAND OPTIONS]

COMMANDS:
    diff                Compare consecutive snapshots that have not been compared yet
        --max-pairs N       Compare at most N pairs per page this run
        --newest-first      Start from the most recent pairs
    report              Cluster hero/CTA variants and publish the weekly report
        --days N            Window length in days (default: 7)
        --output, -o PATH   Append the report to PATH instead of printing it
    ingest              Register a captured page
        --site NAME         Site name as listed in the config
        --image PATH        Screenshot file
        --markup PATH       Saved page markup
        --captured-at TS    Capture time, RFC 3339 (default: now)

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    PAGEWATCH_CONFIG    Path to config file (overrides default location)
    PAGEWATCH_LOG       Log level (trace, debug, info, warn, error)
"#
    );
}
