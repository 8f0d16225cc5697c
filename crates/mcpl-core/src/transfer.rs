// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Lossless transfer of a single already-read particle from a [`Reader`]
//! into a [`Writer`], preferring a byte-identical copy over a
//! decode-then-re-encode round trip whenever the two files' encodings
//! allow it. This is what the third-party format adapters (out of scope
//! here) and [`crate::merge`]'s per-particle slow path build on; the
//! merge engine's own chunked byte-copy fast path (used when an entire
//! file shares the destination's encoding) is a coarser-grained sibling
//! of the single-particle path implemented here.

use crate::error::{McplError, Result};
use crate::header::Header;
use crate::reader::Reader;
use crate::writer::Writer;

/// Copies the particle most recently yielded by `src.read_next()` into
/// `dst`.
///
/// - Fails if `src` has not yet read a particle.
/// - Fails if `dst` declares a universal pdgcode/weight the source
///   particle disagrees with.
/// - Falls back to [`Writer::add_particle`] (a full decode/re-encode) when
///   `src` is format version 2, or when `src` is single-precision and
///   `dst` is double-precision (narrowing already happened on read and
///   cannot be undone).
/// - Otherwise, if the two files share an identical feature signature and
///   endianness, the source's raw on-disk bytes are copied verbatim.
/// - Otherwise the particle is serialised through `dst`'s normal path, but
///   the packed direction+energy slot is overwritten with a precision
///   transfer of the source's already-packed values rather than being
///   recomputed from the decoded direction vector, avoiding the sub-ULP
///   drift a second independent packing could introduce.
pub fn transfer_last_read(src: &Reader, dst: &mut Writer) -> Result<()> {
	let particle = src
		.last_particle()
		.ok_or_else(|| McplError::usage("transfer_last_read called before any particle was read from the source"))?;

	let dst_header = dst.header().clone();
	if dst_header.has_universal_pdgcode() && dst_header.universal_pdgcode != particle.pdgcode {
		return Err(McplError::policy(
			"source particle's pdgcode disagrees with the destination's universal pdgcode",
		));
	}
	if dst_header.has_universal_weight() && dst_header.universal_weight != particle.weight {
		return Err(McplError::policy(
			"source particle's weight disagrees with the destination's universal weight",
		));
	}

	let src_header = src.header();
	let slow_path = src_header.format_version < 3 || (src_header.singleprec() && !dst_header.singleprec());
	if slow_path {
		return dst.add_particle(&particle);
	}

	if src.feature_signature() == dst_header.flags && src_header.little_endian == dst_header.little_endian {
		return dst.append_raw_particle(src.last_raw());
	}

	particle.validate()?;
	let mut buf = Vec::with_capacity(dst_header.particle_size as usize);
	particle.serialize(&dst_header, &mut buf);
	overwrite_packed_ekindir(&mut buf, &dst_header, src.last_raw(), src_header)?;
	dst.append_raw_particle(&buf)
}

/// Overwrites the three packed direction+energy floats in `dst_buf`
/// (already laid out for `dst_header`) with a precision transfer of the
/// same three floats from `src_raw` (laid out for `src_header`), instead
/// of letting [`crate::particle::Particle::serialize`]'s own call into
/// [`crate::unit_vector::pack_adaptive_projection`] stand.
fn overwrite_packed_ekindir(dst_buf: &mut [u8], dst_header: &Header, src_raw: &[u8], src_header: &Header) -> Result<()> {
	let dst_fp = if dst_header.singleprec() { 4 } else { 8 };
	let src_fp = if src_header.singleprec() { 4 } else { 8 };
	let dst_off = (if dst_header.has_polarisation() { 3 } else { 0 } + 3) * dst_fp;
	let src_off = (if src_header.has_polarisation() { 3 } else { 0 } + 3) * src_fp;

	let src_be = !src_header.little_endian;
	let dst_be = !dst_header.little_endian;

	if src_raw.len() < src_off + 3 * src_fp || dst_buf.len() < dst_off + 3 * dst_fp {
		return Err(McplError::format("particle record too short to carry a packed direction+energy slot"));
	}

	for i in 0..3 {
		let value = read_fp(&src_raw[src_off + i * src_fp..src_off + (i + 1) * src_fp], src_be);
		write_fp(&mut dst_buf[dst_off + i * dst_fp..dst_off + (i + 1) * dst_fp], value, dst_be);
	}
	Ok(())
}

fn read_fp(bytes: &[u8], be: bool) -> f64 {
	if bytes.len() == 4 {
		let b: [u8; 4] = bytes.try_into().unwrap();
		(if be { f32::from_be_bytes(b) } else { f32::from_le_bytes(b) }) as f64
	} else {
		let b: [u8; 8] = bytes.try_into().unwrap();
		if be { f64::from_be_bytes(b) } else { f64::from_le_bytes(b) }
	}
}

fn write_fp(dest: &mut [u8], value: f64, be: bool) {
	if dest.len() == 4 {
		let bytes = if be { (value as f32).to_be_bytes() } else { (value as f32).to_le_bytes() };
		dest.copy_from_slice(&bytes);
	} else {
		let bytes = if be { value.to_be_bytes() } else { value.to_le_bytes() };
		dest.copy_from_slice(&bytes);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::header::FeatureFlags;
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

	#[test]
	fn byte_copies_when_signatures_match() {
		let src_path = mktmp().join("transfer_src_identical.mcpl");
		let dst_path = mktmp().join("transfer_dst_identical.mcpl");
		for p in [&src_path, &dst_path] {
			let _ = std::fs::remove_file(p);
		}
		{
			let mut w = Writer::create(&src_path).unwrap();
			w.add_particle(&Particle::new([1.0, 2.0, 3.0], [0.0, 0.0, 1.0], 14.1)).unwrap();
			w.close().unwrap();
		}
		let mut src = Reader::open(&src_path).unwrap();
		src.read_next().unwrap();

		let mut dst = Writer::create(&dst_path).unwrap();
		transfer_last_read(&src, &mut dst).unwrap();
		dst.close().unwrap();

		let mut check = Reader::open(&dst_path).unwrap();
		let p = check.read_next().unwrap().unwrap();
		assert_eq!(p.position, [1.0, 2.0, 3.0]);
		assert!((p.ekin - 14.1).abs() < 1e-12);

		for p in [&src_path, &dst_path] {
			std::fs::remove_file(p).unwrap();
		}
	}

	#[test]
	fn rejects_conflicting_universal_pdgcode() {
		let src_path = mktmp().join("transfer_src_pdg.mcpl");
		let dst_path = mktmp().join("transfer_dst_pdg.mcpl");
		for p in [&src_path, &dst_path] {
			let _ = std::fs::remove_file(p);
		}
		{
			let mut w = Writer::create(&src_path).unwrap();
			let mut p = Particle::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], 1.0);
			p.pdgcode = 22;
			w.add_particle(&p).unwrap();
			w.close().unwrap();
		}
		let mut src = Reader::open(&src_path).unwrap();
		src.read_next().unwrap();

		let mut dst = Writer::create(&dst_path).unwrap();
		dst.set_universal_pdgcode(2112).unwrap();
		assert!(transfer_last_read(&src, &mut dst).is_err());
		dst.close().unwrap();

		for p in [&src_path, &dst_path] {
			std::fs::remove_file(p).unwrap();
		}
	}

	#[test]
	fn takes_slow_path_across_precisions_and_rejects_before_any_read() {
		let path = mktmp().join("transfer_never_read.mcpl");
		let _ = std::fs::remove_file(&path);
		{
			let mut w = Writer::create(&path).unwrap();
			w.add_particle(&Particle::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], 1.0)).unwrap();
			w.close().unwrap();
		}
		let src = Reader::open(&path).unwrap();
		let dst_path = mktmp().join("transfer_never_read_dst.mcpl");
		let _ = std::fs::remove_file(&dst_path);
		let mut dst = Writer::create(&dst_path).unwrap();
		assert!(transfer_last_read(&src, &mut dst).is_err());
		dst.close().unwrap();

		for p in [&path, &dst_path] {
			std::fs::remove_file(p).unwrap();
		}
	}

	#[test]
	fn repacks_via_override_when_feature_signatures_differ() {
		let src_path = mktmp().join("transfer_src_poldiff.mcpl");
		let dst_path = mktmp().join("transfer_dst_poldiff.mcpl");
		for p in [&src_path, &dst_path] {
			let _ = std::fs::remove_file(p);
		}
		{
			let mut w = Writer::create(&src_path).unwrap();
			w.add_particle(&Particle::new([0.0, 0.0, 0.0], [0.6, 0.8, 0.0], 2.5)).unwrap();
			w.close().unwrap();
		}
		let mut src = Reader::open(&src_path).unwrap();
		src.read_next().unwrap();

		let mut dst = Writer::create(&dst_path).unwrap();
		dst.enable_polarisation().unwrap();
		transfer_last_read(&src, &mut dst).unwrap();
		dst.close().unwrap();
		assert!(dst.header().flags.contains(FeatureFlags::POLARISATION));

		let mut check = Reader::open(&dst_path).unwrap();
		let p = check.read_next().unwrap().unwrap();
		assert!((p.ekin - 2.5).abs() < 1e-9);
		assert!((p.direction[0] - 0.6).abs() < 1e-9);
		assert!((p.direction[1] - 0.8).abs() < 1e-9);

		for p in [&src_path, &dst_path] {
			std::fs::remove_file(p).unwrap();
		}
	}
}
