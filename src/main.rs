//! autounpack - batch archive extraction
//!
//! Point it at a directory full of archives, split volumes and all.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use autounpack::config::ExtractConfig;
use autounpack::error::ConfigError;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "autounpack")]
#[command(version)]
#[command(about = "Extract every archive in a directory: split volumes, legacy filename encodings, password lists")]
struct Cli {
    /// Directory to scan for archives
    source: PathBuf,

    /// Scan subdirectories too
    #[arg(short, long)]
    recursive: bool,

    /// Extraction root (default: next to each archive)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Candidate password, tried in the order given (repeatable)
    #[arg(short, long = "password")]
    passwords: Vec<String>,

    /// File with one candidate password per line
    #[arg(long, env = "AUTOUNPACK_PASSWORD_FILE")]
    password_file: Option<PathBuf>,

    /// Archives extracted in parallel (defaults to CPU thread count)
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Charset for filenames when detection is unsure
    #[arg(long, default_value = "windows-1252")]
    fallback_encoding: String,

    /// Minimum detection confidence (0.0 - 1.0)
    #[arg(long, default_value = "0.5")]
    confidence: f32,

    /// Keep files that already exist instead of overwriting them
    #[arg(long)]
    skip_existing: bool,

    /// Delete an archive's volumes after it extracted without errors
    #[arg(long)]
    delete_after: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// List discovered archives without extracting
    #[arg(long)]
    list: bool,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long)]
    verbose: bool,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> ExtractConfig {
        let defaults = ExtractConfig::default();
        ExtractConfig {
            source: self.source,
            recursive: self.recursive,
            dest_root: self.output,
            passwords: self.passwords,
            password_file: self.password_file,
            workers: self.workers.unwrap_or(defaults.workers),
            fallback_encoding: self.fallback_encoding,
            confidence_threshold: self.confidence,
            skip_existing: self.skip_existing,
            delete_after: self.delete_after,
            json: self.json,
            list_only: self.list,
        }
    }
}

fn init_logging(verbose: bool, log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env().add_directive(if verbose {
        "autounpack=debug".parse()?
    } else {
        "autounpack=warn".parse()?
    });

    let mut guard = None;
    let file_layer = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path.file_name().unwrap_or(path.as_os_str());
            let (writer, g) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            guard = Some(g);
            Some(fmt::layer().with_writer(writer).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match init_logging(cli.verbose, cli.log_file.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let config = cli.into_config();
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        return ExitCode::from(2);
    }

    match run(&config) {
        Ok(code) => ExitCode::from(code),
        Err(e) if e.downcast_ref::<ConfigError>().is_some() => {
            eprintln!("Error: {e}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &ExtractConfig) -> Result<u8> {
    if config.list_only {
        let discovery = autounpack::discover(config);
        let stdout = io::stdout();
        autounpack::report::write_listing(
            &discovery.sets,
            &discovery.errors,
            config.json,
            &mut stdout.lock(),
        )?;
        return Ok(if discovery.errors.is_empty() { 0 } else { 1 });
    }

    let summary = autounpack::run(config)?;
    summary.print(config.json)?;
    Ok(summary.exit_code())
}
