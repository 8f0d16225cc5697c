// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Explicit, permanent repair of a file left behind by a crashed writer:
//! recompute the true particle count from the file's length and patch it
//! into the header in place, rather than relying on [`crate::reader`]'s
//! silent per-open recovery.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::byte_stream::{ReadStream, is_gzip_path};
use crate::consts::NPARTICLES_POS;
use crate::error::{McplError, Result};
use crate::header::Header;

/// Repairs `path` in place, returning the corrected particle count.
/// Refuses gzip files: a compressed stream cannot be patched without a
/// full re-encode, so callers should decompress first.
pub fn repair<P: AsRef<Path>>(path: P) -> Result<u64> {
	let path = path.as_ref();
	if is_gzip_path(path) {
		return Err(McplError::policy(
			"cannot repair a gzip-compressed file in place; decompress it first",
		));
	}

	let (header, header_size) = {
		let mut stream = ReadStream::open(path)?;
		Header::read_from(&mut stream)?
	};

	let actual_len = std::fs::metadata(path).map_err(McplError::Io)?.len();
	let available = actual_len.saturating_sub(header_size);
	if header.particle_size == 0 {
		return Err(McplError::format("file declares a zero particle size"));
	}
	let recovered = available / header.particle_size as u64;
	let trailing = available % header.particle_size as u64;
	if trailing != 0 {
		crate::error::warn(format!(
			"{trailing} trailing byte(s) after the last complete particle record are being discarded"
		));
	}

	let be = !header.little_endian;
	let bytes = if be {
		recovered.to_be_bytes()
	} else {
		recovered.to_le_bytes()
	};
	let mut f = OpenOptions::new().write(true).open(path).map_err(McplError::Io)?;
	f.seek(SeekFrom::Start(NPARTICLES_POS)).map_err(McplError::Io)?;
	f.write_all(&bytes).map_err(McplError::Io)?;
	f.flush().map_err(McplError::Io)?;
	drop(f);

	// Self-verify by reopening: a file that still fails to parse, or whose
	// patched count still overruns the file, means the repair did not
	// actually fix anything and the caller should be told so plainly.
	let mut reopened = ReadStream::open(path)?;
	let (verify_header, verify_header_size) = Header::read_from(&mut reopened)?;
	if verify_header.nparticles() != recovered {
		return Err(McplError::format(
			"repair did not take effect: particle count on reopen does not match the patched value",
		));
	}
	if verify_header_size + verify_header.nparticles() * verify_header.particle_size as u64 > actual_len {
		return Err(McplError::format(
			"repair did not take effect: file is still shorter than its declared particle count",
		));
	}

	Ok(recovered)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::particle::Particle;
	use crate::reader::Reader;
	use crate::writer::Writer;

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
	fn repairs_crashed_file() {
		let path = mktmp().join("repair_crashed.mcpl");
		{
			let mut w = Writer::create(&path).unwrap();
			for i in 0..6 {
				w.add_particle(&Particle::new([0.0, 0.0, i as f64], [0.0, 0.0, 1.0], 1.0)).unwrap();
			}
			w.flush().unwrap();
			std::mem::forget(w);
		}
		let recovered = repair(&path).unwrap();
		assert_eq!(recovered, 6);
		let r = Reader::open(&path).unwrap();
		assert_eq!(r.nparticles(), 6);
		std::fs::remove_file(&path).unwrap();
	}

	#[test]
	fn refuses_gzip_path() {
		let path = mktmp().join("repair_refuses.mcpl.gz");
		std::fs::write(&path, b"not a real gzip but extension is enough to trigger the refusal").unwrap();
		assert!(repair(&path).is_err());
		std::fs::remove_file(&path).unwrap();
	}
}
