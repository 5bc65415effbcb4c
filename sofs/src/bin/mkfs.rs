//! `sofs-mkfs`: command-line front end for [`sofs::format`], matching
//! `mkfs_sofs15`'s `-n`/`-i`/`-z`/`-q` options.

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use sofs::{FormatOptions, Sofs};

#[derive(Parser)]
#[command(version, about = "Format a raw image as a fresh sofs volume")]
struct Cli {
	/// Backing file to format (created if missing).
	device: PathBuf,

	/// Total block count of the image.
	#[arg(short = 'n', long, default_value_t = 65536)]
	blocks: u32,

	/// Volume label.
	#[arg(short = 'l', long, default_value = "SOFS15")]
	name: String,

	/// Inode count (default: blocks / 8).
	#[arg(short = 'i', long)]
	inodes: Option<u32>,

	/// Zero-fill every data cluster beyond the root directory's.
	#[arg(short = 'z', long)]
	zero: bool,

	/// Suppress informational logging.
	#[arg(short = 'q', long)]
	quiet: bool,
}

fn main() -> ExitCode {
	let cli = Cli::parse();

	if !cli.quiet {
		env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
	}

	let opts = FormatOptions { volume_name: cli.name, itotal: cli.inodes, zero_fill: cli.zero };

	match Sofs::create(&cli.device, cli.blocks, &opts) {
		Ok(sofs) => match sofs.close() {
			Ok(_) => ExitCode::SUCCESS,
			Err(e) => {
				eprintln!("sofs-mkfs: {e}");
				ExitCode::FAILURE
			}
		},
		Err(e) => {
			eprintln!("sofs-mkfs: {e}");
			ExitCode::FAILURE
		}
	}
}
