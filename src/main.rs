//! tocsplit - split EPUBs into TOC-shaped Markdown trees

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tocsplit::epub::{EpubArchive, read_toc};
use tocsplit::{Config, Converter, EmptyParents, TocEntry};

#[derive(Parser)]
#[command(name = "tocsplit")]
#[command(version, about = "Split EPUBs into Markdown trees that mirror the table of contents", long_about = None)]
#[command(after_help = "EXAMPLES:
    tocsplit book.epub                 Write book_toc_split/ next to book.epub
    tocsplit -o out --numbered *.epub  Numbered trees under out/
    tocsplit -i book.epub              Show metadata and TOC outline")]
struct Cli {
    /// Input EPUB files
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory for the output trees (default: next to each input)
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Prefix files and folders with their order (01_, 02_, ...)
    #[arg(long)]
    numbered: bool,

    /// What to do with parent entries that have no text of their own
    #[arg(long, value_enum, value_name = "POLICY")]
    empty_parents: Option<EmptyParents>,

    /// Seconds to wait for pandoc
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Show book metadata and TOC without converting
    #[arg(short, long)]
    info: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    if cli.info {
        let mut failed = false;
        for input in &cli.inputs {
            if let Err(e) = show_info(input) {
                eprintln!("error: {}: {e}", input.display());
                failed = true;
            }
        }
        return if failed {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        };
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let converter = match Converter::with_pandoc(config) {
        Ok(converter) => converter,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let report = converter.convert_batch(&cli.inputs);
    for conversion in &report.converted {
        if !cli.quiet {
            println!(
                "{} -> {} ({} files, {} images)",
                conversion.input.display(),
                conversion.output_root.display(),
                conversion.stats.files_written,
                conversion.stats.media_written
            );
        }
    }
    for (input, err) in &report.failed {
        eprintln!("error: {}: {err}", input.display());
    }
    println!(
        "Converted {} of {} file(s), {} failed",
        report.converted.len(),
        cli.inputs.len(),
        report.failed.len()
    );

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn init_tracing(cli: &Cli) {
    let default = if cli.quiet {
        "error"
    } else if cli.verbose {
        "tocsplit=debug"
    } else {
        "tocsplit=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Configuration file first, then command-line overrides.
fn load_config(cli: &Cli) -> tocsplit::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(dir) = &cli.output_dir {
        config.output_dir = Some(dir.clone());
    }
    if cli.numbered {
        config.numbered = true;
    }
    if let Some(policy) = cli.empty_parents {
        config.empty_parents = policy;
    }
    if let Some(secs) = cli.timeout {
        config.timeout_secs = secs;
    }
    config.validate()?;
    Ok(config)
}

fn show_info(path: &Path) -> tocsplit::Result<()> {
    let mut archive = EpubArchive::open(path)?;
    let toc = read_toc(&mut archive);
    let package = archive.package();
    let meta = &package.metadata;

    println!("File: {}", path.display());
    println!("Title: {}", meta.title);
    if !meta.authors.is_empty() {
        println!("Authors: {}", meta.authors.join(", "));
    }
    if !meta.language.is_empty() {
        println!("Language: {}", meta.language);
    }
    println!("Spine items: {}", package.spine.len());
    println!("Images: {}", package.images().count());

    match toc {
        Some(entries) => {
            let total: usize = entries.iter().map(TocEntry::count).sum();
            println!("TOC entries: {total}");
            print_outline(&entries, 1);
        }
        None => println!("TOC: none (spine order would be used)"),
    }
    Ok(())
}

fn print_outline(entries: &[TocEntry], depth: usize) {
    for entry in entries {
        println!("{}{}", "  ".repeat(depth), entry.title);
        print_outline(&entry.children, depth + 1);
    }
}
