//! ULog Reader CLI Application
//!
//! Command-line front end for the ulog-decoder library. It opens a log file,
//! prints a summary of what the indexing pass found, and can export the data
//! section as per-topic CSV files plus a parameter dump. All decoding happens
//! in the library; this layer only drives the seek/read interface.

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::Parser;
use std::path::PathBuf;
use ulog_decoder::UlogReader;

mod export;

/// ULog Reader - decode and export ULog telemetry log files
#[derive(Parser, Debug)]
#[command(name = "ulog-cli")]
#[command(about = "Decode and export ULog telemetry log files", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the .ulg log file
    #[arg(value_name = "FILE")]
    log: PathBuf,

    /// Export per-topic CSV files and a parameter dump into this directory
    #[arg(short, long, value_name = "DIR")]
    export: Option<PathBuf>,

    /// Start the export at this timestamp (microseconds, 0 = beginning)
    #[arg(long, value_name = "MICROS", default_value_t = 0)]
    from_us: u64,

    /// Print the summary as JSON instead of plain text
    #[arg(long)]
    json: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    log::info!("ULog Reader CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using decoder library v{}", ulog_decoder::VERSION);

    let mut reader = UlogReader::open(&args.log)
        .with_context(|| format!("Failed to open log file {:?}", args.log))?;

    if args.json {
        print_json_summary(&reader)?;
    } else if !args.quiet {
        print_summary(&reader);
    }

    if let Some(dir) = &args.export {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create export directory {:?}", dir))?;

        let params_path = export::write_parameters(&reader, dir)?;
        log::info!("Wrote parameter dump: {:?}", params_path);

        if !reader.seek(args.from_us)? {
            log::warn!(
                "No data at or after t = {} us, exporting from the beginning",
                args.from_us
            );
        }
        let stats = export::write_topics(&mut reader, dir)?;
        if !args.quiet {
            println!(
                "Exported {} records across {} topics to {:?}",
                stats.records, stats.topics, dir
            );
        }
    }

    Ok(())
}

/// Plain-text summary of the indexed log
fn print_summary<R: std::io::Read + std::io::Seek>(reader: &UlogReader<R>) {
    println!("System:      {}", reader.system_name());
    for (key, value) in reader.version() {
        println!("Version {}:  {}", key, value);
    }
    println!("Messages:    {}", reader.record_count());
    println!(
        "Start:       {} us",
        reader
            .start_us()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "Duration:    {:.3} s",
        reader.duration_us() as f64 / 1_000_000.0
    );
    if let Some(utc_us) = reader.utc_time_reference_us() {
        let secs = (utc_us / 1_000_000) as i64;
        if let Some(when) = DateTime::from_timestamp(secs, 0) {
            println!("UTC ref:     {}", when);
        }
    }
    println!("Fields:      {}", reader.fields().len());
    println!("Parameters:  {}", reader.parameters().len());
    if !reader.errors().is_empty() {
        println!("Decode errors ({} recoverable):", reader.errors().len());
        for error in reader.errors() {
            println!("  {}", error);
        }
    }
}

/// JSON summary for scripting
fn print_json_summary<R: std::io::Read + std::io::Seek>(reader: &UlogReader<R>) -> Result<()> {
    let summary = serde_json::json!({
        "system_name": reader.system_name(),
        "version": reader.version(),
        "record_count": reader.record_count(),
        "start_us": reader.start_us(),
        "duration_us": reader.duration_us(),
        "utc_time_reference_us": reader.utc_time_reference_us(),
        "field_count": reader.fields().len(),
        "parameters": reader.parameters(),
        "decode_errors": reader.errors().iter().map(|e| e.to_string()).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
