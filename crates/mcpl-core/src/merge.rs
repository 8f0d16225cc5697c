// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Combining multiple files into one: a strict `merge_files` that
//! requires identical feature signatures and metadata, `merge_inplace`
//! that appends into an existing file, and `forcemerge_files` for
//! heterogeneous inputs where some information is necessarily discarded.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::byte_stream::{ReadStream, is_gzip_path};
use crate::consts::{FORCEMERGE_SRCNAME, MERGE_CHUNK_PARTICLES, NPARTICLES_POS};
use crate::error::{McplError, Result};
use crate::header::{FeatureFlags, Header};
use crate::reader::Reader;
use crate::statsum::merge_tables;
use crate::writer::Writer;

/// True iff particle records from `a` and `b` can be concatenated without
/// re-encoding: identical feature flags, universal values, endianness,
/// particle size, and byte-identical (order-significant) srcname,
/// comments and blobs. Format version is deliberately excluded: a version
/// 2 file differs only in how its packed direction is decoded, which
/// `merge_files` accounts for on its own.
pub fn can_merge(a: &Header, b: &Header) -> bool {
	a.flags == b.flags
		&& a.little_endian == b.little_endian
		&& a.particle_size == b.particle_size
		&& (!a.has_universal_pdgcode() || a.universal_pdgcode == b.universal_pdgcode)
		&& (!a.has_universal_weight() || a.universal_weight == b.universal_weight)
		&& a.srcname == b.srcname
		&& a.comments == b.comments
		&& a.blobs == b.blobs
}

#[cfg(unix)]
fn same_file(a: &Path, b: &Path) -> Result<bool> {
	use std::ffi::CString;
	use std::mem::MaybeUninit;
	use std::os::unix::ffi::OsStrExt;

	fn stat(p: &Path) -> Result<libc::stat> {
		let c = CString::new(p.as_os_str().as_bytes())
			.map_err(|_| McplError::usage("path contains an interior NUL byte"))?;
		let mut st = MaybeUninit::<libc::stat>::uninit();
		let rc = unsafe { libc::stat(c.as_ptr(), st.as_mut_ptr()) };
		if rc != 0 {
			return Err(McplError::Io(std::io::Error::last_os_error()));
		}
		Ok(unsafe { st.assume_init() })
	}

	let sa = stat(a)?;
	let sb = stat(b)?;
	Ok(sa.st_dev == sb.st_dev && sa.st_ino == sb.st_ino)
}

#[cfg(not(unix))]
fn same_file(a: &Path, b: &Path) -> Result<bool> {
	let ca = std::fs::canonicalize(a).map_err(McplError::Io)?;
	let cb = std::fs::canonicalize(b).map_err(McplError::Io)?;
	Ok(ca == cb)
}

fn reject_aliased_inputs<P: AsRef<Path>>(inputs: &[P]) -> Result<()> {
	for i in 0..inputs.len() {
		for j in (i + 1)..inputs.len() {
			if same_file(inputs[i].as_ref(), inputs[j].as_ref())? {
				return Err(McplError::policy(format!(
					"refusing to merge {:?} with itself (same file, given twice)",
					inputs[i].as_ref()
				)));
			}
		}
	}
	Ok(())
}

/// Merges `inputs` into a new file at `out`, which must not already
/// exist. All inputs must be pairwise compatible with the first
/// ([`can_merge`]); cumulative-statistic tables are combined by stable
/// summation. Returns the total particle count written.
pub fn merge_files<P: AsRef<Path>>(out: P, inputs: &[P]) -> Result<u64> {
	let out = out.as_ref();
	if inputs.is_empty() {
		return Err(McplError::usage("merge requires at least one input file"));
	}
	if out.exists() {
		return Err(McplError::policy(format!("output path {out:?} already exists")));
	}
	reject_aliased_inputs(inputs)?;

	let mut readers: Vec<Reader> = inputs.iter().map(|p| Reader::open(p)).collect::<Result<_>>()?;
	let base_header = readers[0].header().clone();
	for reader in &readers[1..] {
		if !can_merge(&base_header, reader.header()) {
			cleanup_partial(out);
			return Err(McplError::policy(
				"input files are not mergeable: headers differ in feature flags, universal values or metadata",
			));
		}
	}

	let merge_result = (|| -> Result<u64> {
		let mut writer = Writer::create(out)?;
		writer.adopt_metadata(&base_header)?;
		let tables: Vec<_> = readers.iter().map(|r| r.header().stat_sums.clone()).collect();
		writer.set_stat_sums_table(merge_tables(&tables))?;

		for reader in &mut readers {
			copy_all_particles(reader, &mut writer)?;
		}
		writer.close()?;
		Ok(writer.header().nparticles())
	})();

	if merge_result.is_err() {
		cleanup_partial(out);
	}
	merge_result
}

fn copy_all_particles(reader: &mut Reader, writer: &mut Writer) -> Result<()> {
	if reader.header().format_version == crate::consts::FORMAT_VERSION
		&& reader.feature_signature() == writer.header().flags
	{
		loop {
			let (chunk, count) = reader.read_raw_chunk(MERGE_CHUNK_PARTICLES)?;
			if count == 0 {
				break;
			}
			writer.append_raw_chunk(&chunk, count)?;
		}
	} else {
		while let Some(particle) = reader.read_next()? {
			writer.add_particle(&particle)?;
		}
	}
	Ok(())
}

fn cleanup_partial(path: &Path) {
	let _ = std::fs::remove_file(path);
}

/// Appends `source`'s particles directly onto `target`, a plain
/// (non-gzip) file already on disk. Both files must share the same
/// format version and be [`can_merge`]-compatible. The particle count is
/// patched to zero before the transfer and to the true sum afterwards, so
/// a crash mid-transfer leaves a file [`crate::repair`] can fix.
pub fn merge_inplace<P: AsRef<Path>>(target: P, source: P) -> Result<u64> {
	let target = target.as_ref();
	let source = source.as_ref();
	if is_gzip_path(target) || is_gzip_path(source) {
		return Err(McplError::policy("merge_inplace requires plain (non-gzip) files"));
	}
	if same_file(target, source)? {
		return Err(McplError::policy("refusing to merge a file into itself"));
	}

	let (target_header, target_header_size) = {
		let mut s = ReadStream::open(target)?;
		Header::read_from(&mut s)?
	};
	let mut source_reader = Reader::open(source)?;
	if target_header.format_version != source_reader.header().format_version {
		return Err(McplError::policy(
			"merge_inplace requires both files to share the same format version",
		));
	}
	if !can_merge(&target_header, source_reader.header()) {
		return Err(McplError::policy("target and source are not mergeable"));
	}

	let particle_size = target_header.particle_size as u64;
	let append_offset = target_header_size + target_header.nparticles() * particle_size;
	let total = target_header.nparticles() + source_reader.nparticles();

	let mut f = OpenOptions::new().read(true).write(true).open(target).map_err(McplError::Io)?;
	patch_nparticles(&mut f, &target_header, 0)?;
	f.seek(SeekFrom::Start(append_offset)).map_err(McplError::Io)?;
	loop {
		let (chunk, count) = source_reader.read_raw_chunk(MERGE_CHUNK_PARTICLES)?;
		if count == 0 {
			break;
		}
		f.write_all(&chunk).map_err(McplError::Io)?;
	}
	f.flush().map_err(McplError::Io)?;

	try_patch_stat_sums_in_place(&mut f, &target_header, target_header_size, source_reader.header())?;
	patch_nparticles(&mut f, &target_header, total)?;
	Ok(total)
}

fn patch_nparticles(f: &mut std::fs::File, header: &Header, value: u64) -> Result<()> {
	let be = !header.little_endian;
	let bytes = if be { value.to_be_bytes() } else { value.to_le_bytes() };
	f.seek(SeekFrom::Start(NPARTICLES_POS)).map_err(McplError::Io)?;
	f.write_all(&bytes).map_err(McplError::Io)?;
	f.flush().map_err(McplError::Io)
}

/// Best-effort: overwrites the stat-sum comment in place only when the
/// merged table re-encodes to the exact same byte length (true whenever
/// both files share the same key set, which is the common per-rank
/// merge scenario). A differing key set would change the header's size,
/// which an in-place append cannot accommodate; in that case the
/// target's existing stat-sum table is left untouched.
fn try_patch_stat_sums_in_place(
	f: &mut std::fs::File,
	target_header: &Header,
	target_header_size: u64,
	source_header: &Header,
) -> Result<()> {
	let merged = merge_tables(&[target_header.stat_sums.clone(), source_header.stat_sums.clone()]);
	let old_comment = crate::statsum::encode_comment(&target_header.stat_sums);
	let new_comment = crate::statsum::encode_comment(&merged);
	if old_comment.len() != new_comment.len() {
		crate::error::warn(
			"cumulative-statistic key set changed across an in-place merge; leaving the target's table unmodified",
		);
		return Ok(());
	}
	// The stat-sum comment sits right after srcname, itself right after the
	// fixed prefix + 32-byte numbers block (+ weight if present).
	let fixed = 8 + 8 + 32 + if target_header.has_universal_weight() { 8 } else { 0 };
	let srcname_len = target_header.srcname.len() as u64;
	let comment_offset = fixed + 4 + srcname_len + 4;
	debug_assert!(comment_offset + new_comment.len() as u64 <= target_header_size);
	f.seek(SeekFrom::Start(comment_offset)).map_err(McplError::Io)?;
	f.write_all(new_comment.as_bytes()).map_err(McplError::Io)?;
	f.flush().map_err(McplError::Io)
}

/// Merges heterogeneous files by surveying the superset of feature flags
/// in use, re-encoding every particle through the public API. Metadata
/// other than cumulative stats is discarded and `srcname` is set to a
/// fixed marker. Falls back to [`merge_files`] when the inputs happen to
/// already be pairwise compatible.
pub fn forcemerge_files<P: AsRef<Path>>(out: P, inputs: &[P], keep_userflags: bool) -> Result<u64> {
	let out_ref = out.as_ref();
	if inputs.is_empty() {
		return Err(McplError::usage("forcemerge requires at least one input file"));
	}
	if out_ref.exists() {
		return Err(McplError::policy(format!("output path {out_ref:?} already exists")));
	}
	reject_aliased_inputs(inputs)?;

	let headers: Vec<Header> = inputs
		.iter()
		.map(|p| Reader::open(p).map(|r| r.header().clone()))
		.collect::<Result<_>>()?;

	if headers.windows(2).all(|w| can_merge(&w[0], &w[1])) {
		return merge_files(out, inputs);
	}

	let mut flags = FeatureFlags::empty();
	for h in &headers {
		flags |= h.flags;
	}
	if !keep_userflags {
		flags.remove(FeatureFlags::USERFLAGS);
	}

	let mut common_pdgcode = None;
	let mut pdgcode_consistent = true;
	let mut common_weight = None;
	let mut weight_consistent = true;
	for h in &headers {
		if h.has_universal_pdgcode() {
			match common_pdgcode {
				None => common_pdgcode = Some(h.universal_pdgcode),
				Some(v) if v == h.universal_pdgcode => {},
				Some(_) => pdgcode_consistent = false,
			}
		} else {
			pdgcode_consistent = false;
		}
		if h.has_universal_weight() {
			match common_weight {
				None => common_weight = Some(h.universal_weight),
				Some(v) if v == h.universal_weight => {},
				Some(_) => weight_consistent = false,
			}
		} else {
			weight_consistent = false;
		}
	}
	if !pdgcode_consistent {
		flags.remove(FeatureFlags::UNIVERSAL_PDGCODE);
	}
	if !weight_consistent {
		flags.remove(FeatureFlags::UNIVERSAL_WEIGHT);
	}

	let merge_result = (|| -> Result<u64> {
		let mut writer = Writer::create(out_ref)?;
		writer.set_srcname(FORCEMERGE_SRCNAME)?;
		if flags.contains(FeatureFlags::USERFLAGS) {
			writer.enable_userflags()?;
		}
		if flags.contains(FeatureFlags::POLARISATION) {
			writer.enable_polarisation()?;
		}
		if flags.contains(FeatureFlags::SINGLEPREC) {
			writer.enable_singleprec()?;
		}
		if let Some(pdg) = common_pdgcode.filter(|_| pdgcode_consistent) {
			writer.set_universal_pdgcode(pdg)?;
		}
		if let Some(w) = common_weight.filter(|_| weight_consistent) {
			writer.set_universal_weight(w)?;
		}
		let tables: Vec<_> = headers.iter().map(|h| h.stat_sums.clone()).collect();
		writer.set_stat_sums_table(merge_tables(&tables))?;

		for path in inputs {
			let mut reader = Reader::open(path)?;
			while let Some(mut particle) = reader.read_next()? {
				if !keep_userflags {
					particle.userflags = 0;
				}
				writer.add_particle(&particle)?;
			}
		}
		writer.close()?;
		Ok(writer.header().nparticles())
	})();

	if merge_result.is_err() {
		cleanup_partial(out_ref);
	}
	merge_result
}

/// Produces the per-rank temporary output path an MPI-style writer would
/// use before a final [`merge_outfiles_mpi`] pass. Purely a path
/// convention; this crate has no MPI runtime dependency.
pub fn create_outfile_mpi(base: &Path, rank: u32, nproc: u32) -> std::path::PathBuf {
	let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("out");
	let dir = base.parent().unwrap_or_else(|| Path::new("."));
	dir.join(format!("{stem}.rank{rank}of{nproc}.mcpl"))
}

/// Merges the per-rank files produced via [`create_outfile_mpi`] into a
/// single gzip-compressed `<base>.mcpl.gz`, removing the per-rank files
/// on success.
pub fn merge_outfiles_mpi(base: &Path, nproc: u32) -> Result<std::path::PathBuf> {
	let parts: Vec<_> = (0..nproc).map(|rank| create_outfile_mpi(base, rank, nproc)).collect();
	let merged_path = {
		let mut s = base.as_os_str().to_owned();
		s.push(".merged.mcpl");
		std::path::PathBuf::from(s)
	};
	merge_files(merged_path.clone(), &parts)?;
	for part in &parts {
		let _ = std::fs::remove_file(part);
	}
	let gz_path = crate::compression::gzip::gzip_file_in_place(&merged_path)?;
	let final_path = {
		let mut s = base.as_os_str().to_owned();
		s.push(".mcpl.gz");
		std::path::PathBuf::from(s)
	};
	std::fs::rename(&gz_path, &final_path).map_err(McplError::Io)?;
	Ok(final_path)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::particle::Particle;

	fn mktmp() -> std::path::PathBuf {
		let tmp = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
			.parent()
			.unwrap()
			.parent()
			.unwrap()
			.join("target")
			.join("tmp");
		std::fs::create_dir_all(&tmp).expect("failed to create temp dir");
		tmp
	}

	fn write_simple(path: &Path, n: u32, offset: f64) {
		let mut w = Writer::create(path).unwrap();
		for i in 0..n {
			w.add_particle(&Particle::new([0.0, 0.0, offset + i as f64], [0.0, 0.0, 1.0], 1.0)).unwrap();
		}
		w.close().unwrap();
	}

	#[test]
	fn merges_two_compatible_files_in_order() {
		let a = mktmp().join("merge_a.mcpl");
		let b = mktmp().join("merge_b.mcpl");
		let out = mktmp().join("merge_out.mcpl");
		let _ = std::fs::remove_file(&out);
		write_simple(&a, 3, 0.0);
		write_simple(&b, 2, 100.0);

		let total = merge_files(&out, &[a.clone(), b.clone()]).unwrap();
		assert_eq!(total, 5);

		let mut r = Reader::open(&out).unwrap();
		let mut positions = Vec::new();
		while let Some(p) = r.read_next().unwrap() {
			positions.push(p.position[2]);
		}
		assert_eq!(positions, vec![0.0, 1.0, 2.0, 100.0, 101.0]);

		for p in [a, b, out] {
			std::fs::remove_file(p).unwrap();
		}
	}

	#[test]
	fn rejects_self_merge() {
		let a = mktmp().join("merge_self.mcpl");
		write_simple(&a, 1, 0.0);
		let out = mktmp().join("merge_self_out.mcpl");
		let _ = std::fs::remove_file(&out);
		let err = merge_files(&out, &[a.clone(), a.clone()]).unwrap_err();
		assert!(matches!(err, McplError::Policy(_)));
		std::fs::remove_file(&a).unwrap();
	}

	#[test]
	fn forcemerge_reconciles_incompatible_flags() {
		let a = mktmp().join("forcemerge_a.mcpl");
		let b = mktmp().join("forcemerge_b.mcpl");
		let out = mktmp().join("forcemerge_out.mcpl");
		let _ = std::fs::remove_file(&out);
		{
			let mut w = Writer::create(&a).unwrap();
			w.enable_userflags().unwrap();
			let mut p = Particle::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], 1.0);
			p.userflags = 7;
			w.add_particle(&p).unwrap();
			w.close().unwrap();
		}
		write_simple(&b, 1, 5.0);

		let total = forcemerge_files(&out, &[a.clone(), b.clone()], true).unwrap();
		assert_eq!(total, 2);
		let r = Reader::open(&out).unwrap();
		assert_eq!(r.header().srcname, FORCEMERGE_SRCNAME);
		assert!(r.header().has_userflags());

		for p in [a, b, out] {
			std::fs::remove_file(p).unwrap();
		}
	}
}
