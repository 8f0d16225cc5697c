// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser};
use mcpl_core::prelude::*;
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// CLI for inspecting, merging, repairing and converting MCPL
/// (Monte Carlo Particle Lists) files.
///
/// With no mode flag, dumps the header and a table of particles from
/// `FILE`.
#[derive(Parser, Debug)]
#[command(name = "mcpl-tool")]
#[command(author, version, about, long_about = None)]
#[command(disable_version_flag = true)]
struct Cli {
	#[command(flatten)]
	mode: ModeArgs,

	/// Print version information and exit.
	#[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
	version: (),

	/// Show only the header, not the particle listing.
	#[arg(short = 'j', long = "justhead", conflicts_with = "nohead")]
	justhead: bool,

	/// Show only the particle listing, not the header.
	#[arg(short = 'n', long = "nohead")]
	nohead: bool,

	/// Limit the particle listing to N entries (0 = unlimited).
	#[arg(short = 'l', value_name = "N", allow_hyphen_values = false)]
	limit: Option<u64>,

	/// Skip the first N particles before listing or extracting.
	#[arg(short = 's', value_name = "N", allow_hyphen_values = false)]
	skip: Option<u64>,

	/// Dump the raw content of blob KEY to stdout instead of listing
	/// particles.
	#[arg(short = 'b', value_name = "KEY")]
	blobkey: Option<String>,

	/// Only extract/list particles with this PDG code.
	#[arg(short = 'p', long = "pdgcode", value_name = "PDG")]
	pdgcode: Option<i32>,

	/// Positional file arguments; interpretation depends on the mode.
	#[arg(trailing_var_arg = true)]
	files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct ModeArgs {
	/// Merge FILE1 FILE2 … into FILEOUT (strict: all inputs must share an
	/// identical feature signature and metadata).
	#[arg(short = 'm', long = "merge", group = "mode")]
	merge: bool,

	/// With `--merge`, append directly into the (already-existing) first
	/// path instead of creating a new output file.
	#[arg(long = "inplace", requires = "merge")]
	inplace: bool,

	/// Merge FILE1 FILE2 … into FILEOUT, reconciling incompatible feature
	/// flags by taking their superset (lossy).
	#[arg(long = "forcemerge", group = "mode")]
	forcemerge: bool,

	/// With `--forcemerge`, keep each particle's userflags instead of
	/// zeroing them when inputs disagree on whether the field is present.
	#[arg(long = "keepuserflags", requires = "forcemerge")]
	keepuserflags: bool,

	/// Write a filtered copy of FILE_IN to FILE_OUT.
	#[arg(short = 'e', long = "extract", group = "mode")]
	extract: bool,

	/// Recompute and patch FILE's particle count in place.
	#[arg(short = 'r', long = "repair", group = "mode")]
	repair: bool,

	/// Export FILE_IN to the lossless `#MCPL-ASCII` text format at
	/// FILE_OUT.
	#[arg(short = 't', long = "text", group = "mode")]
	text: bool,
}

fn main() -> ExitCode {
	match run() {
		Ok(()) => ExitCode::SUCCESS,
		Err(msg) => {
			eprintln!("ERROR: {msg}");
			ExitCode::FAILURE
		},
	}
}

fn run() -> Result<()> {
	mcpl_core::platform::check()?;
	let cli = Cli::parse();

	if cli.mode.merge {
		return cmd_merge(&cli);
	}
	if cli.mode.forcemerge {
		return cmd_forcemerge(&cli);
	}
	if cli.mode.extract {
		return cmd_extract(&cli);
	}
	if cli.mode.repair {
		return cmd_repair(&cli);
	}
	if cli.mode.text {
		return cmd_text(&cli);
	}
	cmd_dump(&cli)
}

fn one_file<'a>(files: &'a [PathBuf], what: &str) -> Result<&'a Path> {
	match files {
		[f] => Ok(f.as_path()),
		[] => Err(McplError::usage(format!("{what} requires a file argument"))),
		_ => Err(McplError::usage(format!("{what} takes exactly one file argument"))),
	}
}

fn two_files<'a>(files: &'a [PathBuf], what: &str) -> Result<(&'a Path, &'a Path)> {
	match files {
		[a, b] => Ok((a.as_path(), b.as_path())),
		_ => Err(McplError::usage(format!("{what} requires exactly two file arguments"))),
	}
}

fn cmd_dump(cli: &Cli) -> Result<()> {
	let file = one_file(&cli.files, "dump")?;

	if let Some(key) = &cli.blobkey {
		return cmd_dump_blob(file, key);
	}

	let parts = if cli.justhead {
		DumpParts::HeaderOnly
	} else if cli.nohead {
		DumpParts::ParticlesOnly
	} else {
		DumpParts::Both
	};
	let skip = cli.skip.unwrap_or(0);
	let limit = match cli.limit {
		Some(0) => None,
		Some(n) => Some(n),
		None => Some(10),
	};

	let stdout = std::io::stdout();
	let mut lock = stdout.lock();
	dump(file, parts, skip, limit, &mut lock)
}

fn cmd_dump_blob(file: &Path, key: &str) -> Result<()> {
	let reader = Reader::open(file)?;
	let (_, data) = reader
		.header()
		.blobs
		.iter()
		.find(|(k, _)| k == key)
		.ok_or_else(|| McplError::usage(format!("no blob named {key:?} in {file:?}")))?;
	use std::io::Write;
	std::io::stdout().write_all(data).map_err(McplError::Io)
}

fn cmd_merge(cli: &Cli) -> Result<()> {
	if cli.mode.inplace {
		let (target, source) = two_files(&cli.files, "--merge --inplace")?;
		let total = mcpl_core::merge::merge_inplace(target, source)?;
		println!("Merged into {target:?}: {total} particles total.");
		return Ok(());
	}
	if cli.files.len() < 2 {
		return Err(McplError::usage("--merge requires FILEOUT and at least one input file"));
	}
	let (out, inputs) = cli.files.split_first().expect("checked non-empty above");
	let total = merge_files(out.clone(), inputs)?;
	maybe_gzip(out)?;
	println!("Wrote {out:?}: {total} particles.");
	Ok(())
}

fn cmd_forcemerge(cli: &Cli) -> Result<()> {
	if cli.files.len() < 2 {
		return Err(McplError::usage("--forcemerge requires FILEOUT and at least one input file"));
	}
	let (out, inputs) = cli.files.split_first().expect("checked non-empty above");
	let total = forcemerge_files(out.clone(), inputs, cli.mode.keepuserflags)?;
	maybe_gzip(out)?;
	println!("Wrote {out:?}: {total} particles.");
	Ok(())
}

/// Files whose name ends in `.mcpl.gz` are written as a plain file first
/// (the merge engine never produces gzip directly) and then compressed in
/// place, matching the original `mcplrepo` CLI's convention of deciding
/// compression purely from the output extension.
fn maybe_gzip(out: &Path) -> Result<()> {
	let name = out.file_name().and_then(|n| n.to_str()).unwrap_or_default();
	if !name.ends_with(".mcpl.gz") {
		return Ok(());
	}
	let plain = out.with_file_name(name.trim_end_matches(".gz"));
	std::fs::rename(out, &plain).map_err(McplError::Io)?;
	let gz = mcpl_core::compression::gzip::gzip_file_in_place(&plain)?;
	if gz != *out {
		std::fs::rename(&gz, out).map_err(McplError::Io)?;
	}
	Ok(())
}

fn cmd_extract(cli: &Cli) -> Result<()> {
	let (file_in, file_out) = two_files(&cli.files, "--extract")?;
	if file_out.exists() {
		return Err(McplError::policy(format!("output path {file_out:?} already exists")));
	}

	let mut reader = Reader::open(file_in)?;
	reader.skip_forward(cli.skip.unwrap_or(0))?;
	let limit = cli.limit.filter(|&n| n != 0);

	let mut writer = Writer::create(file_out)?;
	writer.set_srcname(reader.header().srcname.clone())?;
	for comment in &reader.header().comments {
		writer.add_comment(comment.clone())?;
	}
	for (key, data) in &reader.header().blobs {
		writer.add_blob(key.clone(), data.clone())?;
	}
	if reader.header().has_polarisation() {
		writer.enable_polarisation()?;
	}
	if reader.header().singleprec() {
		writer.enable_singleprec()?;
	}
	if reader.header().has_userflags() {
		writer.enable_userflags()?;
	}
	if let Some(pdg) = cli.pdgcode {
		writer.set_universal_pdgcode(pdg)?;
	} else if reader.header().has_universal_pdgcode() {
		writer.set_universal_pdgcode(reader.header().universal_pdgcode)?;
	}
	if reader.header().has_universal_weight() {
		writer.set_universal_weight(reader.header().universal_weight)?;
	}

	let mut written = 0u64;
	while let Some(particle) = reader.read_next()? {
		if limit.is_some_and(|l| written >= l) {
			break;
		}
		if cli.pdgcode.is_some_and(|pdg| pdg != particle.pdgcode) {
			continue;
		}
		writer.add_particle(&particle)?;
		written += 1;
	}
	writer.close()?;
	println!("Wrote {file_out:?}: {written} particles.");
	Ok(())
}

fn cmd_repair(cli: &Cli) -> Result<()> {
	let file = one_file(&cli.files, "--repair")?;
	let recovered = mcpl_core::repair::repair(file)?;
	println!("Repaired {file:?}: nparticles is now {recovered}.");
	Ok(())
}

fn cmd_text(cli: &Cli) -> Result<()> {
	let (file_in, file_out) = two_files(&cli.files, "--text")?;
	export_text(file_in, file_out)?;
	println!("Wrote {file_out:?}.");
	Ok(())
}
