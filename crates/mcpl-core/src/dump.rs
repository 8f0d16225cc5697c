// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable inspection: a formatted header+particle dump for quick
//! terminal inspection, and a lossless(-ish) ASCII text export/import
//! pair for interchange with tools that cannot read the binary format.

use std::io::Write;
use std::path::Path;

use strum::Display;

use crate::error::{McplError, Result};
use crate::header::Header;
use crate::particle::Particle;
use crate::reader::Reader;
use crate::writer::Writer;

/// Which parts of a file [`dump`] should print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DumpParts {
	#[strum(serialize = "both")]
	Both,
	#[strum(serialize = "header_only")]
	HeaderOnly,
	#[strum(serialize = "particles_only")]
	ParticlesOnly,
}

/// Prints a formatted header and/or tabular particle listing for `path`
/// to `out`. `skip` particles are skipped before `limit` are printed
/// (`limit = None` means unlimited).
pub fn dump<W: Write>(path: &Path, parts: DumpParts, skip: u64, limit: Option<u64>, out: &mut W) -> Result<()> {
	let mut reader = Reader::open(path)?;

	if parts != DumpParts::ParticlesOnly {
		print_header(reader.header(), out)?;
	}
	if parts == DumpParts::HeaderOnly {
		return Ok(());
	}

	reader.skip_forward(skip)?;
	let mut printed = 0u64;
	writeln!(
		out,
		"{:>10} {:>11} {:>23} {:>23} {:>23} {:>23} {:>23} {:>23} {:>23} {:>23} {:>23} {:>10}",
		"index", "pdgcode", "ekin[MeV]", "x[cm]", "y[cm]", "z[cm]", "ux", "uy", "uz", "time[ms]", "weight", "userflags"
	)
	.map_err(McplError::Io)?;
	while let Some(particle) = reader.read_next()? {
		if limit.is_some_and(|l| printed >= l) {
			break;
		}
		print_particle(reader.current_position() - 1, &particle, out)?;
		printed += 1;
	}
	Ok(())
}

fn print_header<W: Write>(header: &Header, out: &mut W) -> Result<()> {
	writeln!(out, "Format                        : MCPL-{}", header.format_version).map_err(McplError::Io)?;
	writeln!(out, "Number of particles           : {}", header.nparticles()).map_err(McplError::Io)?;
	writeln!(out, "Source name                  : {}", header.srcname).map_err(McplError::Io)?;
	writeln!(out, "Single precision             : {}", header.singleprec()).map_err(McplError::Io)?;
	writeln!(out, "Contains polarisation        : {}", header.has_polarisation()).map_err(McplError::Io)?;
	writeln!(out, "Contains userflags           : {}", header.has_userflags()).map_err(McplError::Io)?;
	if header.has_universal_pdgcode() {
		writeln!(out, "Universal PDG code           : {}", header.universal_pdgcode).map_err(McplError::Io)?;
	}
	if header.has_universal_weight() {
		writeln!(out, "Universal weight             : {:.18e}", header.universal_weight).map_err(McplError::Io)?;
	}
	writeln!(out, "Number of comments           : {}", header.comments.len()).map_err(McplError::Io)?;
	for c in &header.comments {
		writeln!(out, "    {c}").map_err(McplError::Io)?;
	}
	writeln!(out, "Number of blobs              : {}", header.blobs.len()).map_err(McplError::Io)?;
	for (key, data) in &header.blobs {
		writeln!(out, "    {key} ({} bytes)", data.len()).map_err(McplError::Io)?;
	}
	for (key, sum) in &header.stat_sums {
		match sum.value() {
			Some(v) => writeln!(out, "Stat-sum {key:<20}: {v:.18e}").map_err(McplError::Io)?,
			None => writeln!(out, "Stat-sum {key:<20}: unknown").map_err(McplError::Io)?,
		}
	}
	Ok(())
}

fn print_particle<W: Write>(index: u64, p: &Particle, out: &mut W) -> Result<()> {
	writeln!(
		out,
		"{:>10} {:>11} {} {} {} {} {} {} {} {} {} {:#010x}",
		index,
		p.pdgcode,
		fmt_g(p.ekin),
		fmt_g(p.position[0]),
		fmt_g(p.position[1]),
		fmt_g(p.position[2]),
		fmt_g(p.direction[0]),
		fmt_g(p.direction[1]),
		fmt_g(p.direction[2]),
		fmt_g(p.time),
		fmt_g(p.weight),
		p.userflags,
	)
	.map_err(McplError::Io)
}

/// Approximates C's `%23.18g`: up to 18 significant digits, scientific
/// notation, right-justified in a 23-character field.
fn fmt_g(v: f64) -> String {
	format!("{v:>23.18e}")
}

const ASCII_BANNER: &str = "#MCPL-ASCII";
const ASCII_FORMAT_LINE: &str = "#ASCII-FORMAT: v1";
const ASCII_END_HEADER: &str = "#END-HEADER";

/// Writes an ASCII rendition of `path_in` to `path_out`: a small header
/// banner, an optional comment block, then one line per particle with
/// `%23.18g`-style floats and `0x%08x` userflags.
pub fn export_text(path_in: &Path, path_out: &Path) -> Result<()> {
	if path_out.exists() {
		return Err(McplError::policy(format!("output path {path_out:?} already exists")));
	}
	let mut reader = Reader::open(path_in)?;
	let mut out = std::fs::File::create(path_out).map_err(McplError::Io)?;

	writeln!(out, "{ASCII_BANNER}").map_err(McplError::Io)?;
	writeln!(out, "{ASCII_FORMAT_LINE}").map_err(McplError::Io)?;
	writeln!(out, "#NPARTICLES: {}", reader.nparticles()).map_err(McplError::Io)?;
	let comments = &reader.header().comments;
	if !comments.is_empty() {
		writeln!(out, "#NCOMMENTS: {}", comments.len()).map_err(McplError::Io)?;
		for c in comments {
			writeln!(out, "#COMMENT: {c}").map_err(McplError::Io)?;
		}
	}
	writeln!(out, "{ASCII_END_HEADER}").map_err(McplError::Io)?;
	writeln!(
		out,
		"#{:>9} {:>11} {:>23} {:>23} {:>23} {:>23} {:>23} {:>23} {:>23} {:>23} {:>23} {:>10}",
		"index", "pdgcode", "ekin[MeV]", "x[cm]", "y[cm]", "z[cm]", "ux", "uy", "uz", "time[ms]", "weight", "userflags"
	)
	.map_err(McplError::Io)?;

	let mut index = 0u64;
	while let Some(p) = reader.read_next()? {
		writeln!(
			out,
			"{:>10} {:>11} {} {} {} {} {} {} {} {} {} {:#010x}",
			index,
			p.pdgcode,
			fmt_g(p.ekin),
			fmt_g(p.position[0]),
			fmt_g(p.position[1]),
			fmt_g(p.position[2]),
			fmt_g(p.direction[0]),
			fmt_g(p.direction[1]),
			fmt_g(p.direction[2]),
			fmt_g(p.time),
			fmt_g(p.weight),
			p.userflags,
		)
		.map_err(McplError::Io)?;
		index += 1;
	}
	Ok(())
}

/// Reconstructs an MCPL file from the ASCII rendition produced by
/// [`export_text`]. Comments are restored; blobs and cumulative-statistic
/// tables are not represented in the text format and are lost.
pub fn import_text(path_in: &Path, path_out: &Path) -> Result<u64> {
	if path_out.exists() {
		return Err(McplError::policy(format!("output path {path_out:?} already exists")));
	}
	let bytes = crate::byte_stream::read_whole_file(path_in, u32::MAX as u64, true)?;
	let text = String::from_utf8(bytes).map_err(|_| McplError::format("ASCII file is not valid UTF-8"))?;
	let mut lines = text.lines();

	let banner = lines.next().ok_or_else(|| McplError::format("empty ASCII file"))?;
	if banner.trim() != ASCII_BANNER {
		return Err(McplError::format("missing #MCPL-ASCII banner"));
	}
	let format_line = lines.next().ok_or_else(|| McplError::format("truncated ASCII header"))?;
	if format_line.trim() != ASCII_FORMAT_LINE {
		return Err(McplError::format("unsupported or missing ASCII format line"));
	}

	let mut writer = Writer::create(path_out)?;
	for line in lines.by_ref() {
		let line = line.trim_end();
		if line == ASCII_END_HEADER {
			break;
		}
		if let Some(comment) = line.strip_prefix("#COMMENT: ") {
			writer.add_comment(comment)?;
		}
	}

	for line in lines {
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') {
			continue;
		}
		let fields: Vec<&str> = line.split_whitespace().collect();
		if fields.len() < 12 {
			return Err(McplError::format(format!("malformed particle line: {line:?}")));
		}
		let parse = |s: &str| -> Result<f64> { s.parse().map_err(|_| McplError::format(format!("bad float field {s:?}"))) };
		let pdgcode: i32 = fields[1].parse().map_err(|_| McplError::format("bad pdgcode field"))?;
		let ekin = parse(fields[2])?;
		let position = [parse(fields[3])?, parse(fields[4])?, parse(fields[5])?];
		let direction = [parse(fields[6])?, parse(fields[7])?, parse(fields[8])?];
		let time = parse(fields[9])?;
		let weight = parse(fields[10])?;
		let userflags = u32::from_str_radix(fields[11].trim_start_matches("0x"), 16)
			.map_err(|_| McplError::format("bad userflags field"))?;

		let mut particle = Particle::new(position, direction, ekin);
		particle.time = time;
		particle.pdgcode = pdgcode;
		particle.weight = weight;
		if userflags != 0 && !writer.header().has_userflags() {
			writer.enable_userflags()?;
		}
		particle.userflags = userflags;
		writer.add_particle(&particle)?;
	}
	writer.close()?;
	Ok(writer.header().nparticles())
}
