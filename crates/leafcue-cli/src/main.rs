use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use leafcue_core::{restore_volume, ErrorPolicy, ReadLength, RestoreConfig, RestoreEvent, RestoreOptions};

#[derive(Parser, Debug)]
#[command(name = "leafcue", version, about = "Restore Btrfs files from a leaf index and a raw disk image")]
struct Cli {
	/// Directory the restored tree is written under
	output_dir: PathBuf,
	/// Inode catalog (JSON array of inode records)
	catalog: PathBuf,
	/// Leaf index database
	index_db: PathBuf,
	/// Raw disk image holding the volume's data blocks
	disk_image: PathBuf,
	/// Record bad records in the report and continue instead of aborting
	#[arg(long)]
	keep_going: bool,
	/// Read each regular extent's own length and place it at its file offset
	#[arg(long)]
	extent_length: bool,
	/// Apply file writes on a thread pool
	#[arg(long)]
	parallel: bool,
	/// Write a JSON report of the run to this file
	#[arg(long, value_name = "FILE")]
	report: Option<PathBuf>,
	/// Log every record
	#[arg(short, long)]
	verbose: bool,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	// Diagnostics go to stderr, the restored file listing to stdout
	let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_max_level(level)
		.with_target(false)
		.init();

	let options = RestoreOptions {
		error_policy: if cli.keep_going { ErrorPolicy::Skip } else { ErrorPolicy::Abort },
		read_length: if cli.extent_length { ReadLength::ExtentLength } else { ReadLength::InodeSize },
		parallel: cli.parallel,
	};
	let config = RestoreConfig::new(&cli.output_dir, &cli.catalog, &cli.index_db, &cli.disk_image)
		.with_options(options);

	let bar = if atty::is(atty::Stream::Stderr) && !cli.verbose {
		let bar = ProgressBar::new(0);
		bar.set_style(
			ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} records {msg}")?,
		);
		bar
	} else {
		ProgressBar::hidden()
	};

	let progress = bar.clone();
	let report = restore_volume(&config, move |event| match event {
		RestoreEvent::Started { total_records } => {
			if let Some(total) = total_records {
				progress.set_length(total);
			}
		}
		RestoreEvent::RecordProcessed { records_seen } => progress.set_position(records_seen),
		RestoreEvent::FileWritten(write) => {
			progress.suspend(|| match write.file_offset {
				Some(offset) => println!("{}\t{}\t{}@{}", write.path, write.sha256, write.length, offset),
				None => println!("{}\t{}\t{}", write.path, write.sha256, write.length),
			});
		}
		RestoreEvent::DirectoryCreated(_) => {}
	});
	bar.finish_and_clear();
	let report = report?;

	if let Some(path) = &cli.report {
		let file = File::create(path)
			.with_context(|| format!("Failed to create report file {}", path.display()))?;
		serde_json::to_writer_pretty(BufWriter::new(file), &report)
			.with_context(|| format!("Failed to write report to {}", path.display()))?;
		tracing::info!("Report saved to {}", path.display());
	}

	eprintln!("{}", report.summary());
	for failure in &report.failures {
		eprintln!("  skipped {}: {}", failure.key, failure.error);
	}

	Ok(())
}
