// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The input side: a [`Reader`] opens a file, validates and parses its
//! header, and then yields particles one at a time or at an arbitrary
//! seek position.
//!
//! If a writer crashed before patching the particle count, a plain
//! (non-gzip) file's trailing bytes still hold whatever particles were
//! flushed before the crash. Opening such a file silently recovers by
//! recomputing the particle count from the actual file length, rather
//! than failing or reporting a phantom `nparticles` that overruns EOF.
//! Gzip files offer no such recovery (the trailing bytes of a crashed
//! compressor are not a valid stream) and are opened as declared.
//!
//! Separately, opening any file that declares at least one particle
//! pre-loads the would-be first record to confirm `header_size` actually
//! lands on a particle boundary. Some writers in the wild pad the header
//! with an extra, non-declared record-sized block; when the trial read
//! comes up short without hitting EOF, `header_size` is nudged forward by
//! one `particle_size` and retried, up to
//! [`crate::consts::MAX_HEADER_RECORD_ADJUSTMENTS`] times, before giving up.

use std::path::Path;

use crate::byte_stream::ReadStream;
use crate::error::{McplError, Result, warn};
use crate::header::{FeatureFlags, Header};
use crate::particle::Particle;

pub struct Reader {
	stream: ReadStream,
	header: Header,
	header_size: u64,
	current_index: u64,
	last_raw: Vec<u8>,
	last_particle: Option<Particle>,
}

impl Reader {
	pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
		crate::platform::check()?;
		let path = path.as_ref();
		let mut stream = ReadStream::open(path)?;
		let (mut header, header_size) = Header::read_from(&mut stream)?;

		if header.format_version < crate::consts::FORMAT_VERSION {
			warn(format!(
				"file {path:?} uses an older MCPL format version ({}); reading in compatibility mode",
				header.format_version
			));
		}

		if !stream.is_gzip() {
			let actual_len = std::fs::metadata(path).map_err(McplError::Io)?.len();
			let declared_end = header_size + header.nparticles() * header.particle_size as u64;
			if declared_end > actual_len {
				let available = actual_len.saturating_sub(header_size);
				let recovered = available / header.particle_size.max(1) as u64;
				warn(format!(
					"file {path:?} appears to have been left open by a crashed writer; recovering {recovered} of the declared {} particles",
					header.nparticles()
				));
				header.nparticles = recovered;
			}
		}

		// Only probe for a misplaced header/particle boundary once any
		// crash-truncation has already been accounted for above: a file
		// legitimately recovered down to zero particles has nothing to
		// validate, and treating its absent first record as a trailing
		// header-record misalignment would be wrong.
		let header_size = if header.nparticles() > 0 {
			validate_first_record(&mut stream, header.particle_size as u64, header_size)?
		} else {
			header_size
		};

		Ok(Reader {
			stream,
			header,
			header_size,
			current_index: 0,
			last_raw: Vec::new(),
			last_particle: None,
		})
	}

	pub fn header(&self) -> &Header {
		&self.header
	}

	pub fn nparticles(&self) -> u64 {
		self.header.nparticles()
	}

	pub fn particle_size(&self) -> u32 {
		self.header.particle_size
	}

	pub fn header_size(&self) -> u64 {
		self.header_size
	}

	pub fn current_position(&self) -> u64 {
		self.current_index
	}

	/// Reads the next particle, or `None` at end of file.
	pub fn read_next(&mut self) -> Result<Option<Particle>> {
		if self.current_index >= self.header.nparticles() {
			return Ok(None);
		}
		let size = self.header.particle_size as usize;
		let mut raw = vec![0u8; size];
		self.stream.read_exact(&mut raw)?;
		let particle = Particle::deserialize(&raw, &self.header)?;
		self.last_raw = raw;
		self.last_particle = Some(particle);
		self.current_index += 1;
		Ok(Some(particle))
	}

	/// The particle most recently returned by [`Reader::read_next`], if
	/// any. Used by [`crate::transfer::transfer_last_read`] to copy it into
	/// a writer without a caller needing to hold onto the value itself.
	pub fn last_particle(&self) -> Option<Particle> {
		self.last_particle
	}

	/// Reads up to `max_particles` raw, still-encoded particle records in
	/// one shot, advancing the cursor past them. Returns the bytes read
	/// and how many whole records they contain (fewer than requested at
	/// end of file). Used by [`crate::merge`]'s chunked byte-copy fast
	/// path to avoid decoding and re-encoding every particle.
	pub fn read_raw_chunk(&mut self, max_particles: usize) -> Result<(Vec<u8>, u64)> {
		let remaining = self.header.nparticles().saturating_sub(self.current_index);
		let take = (max_particles as u64).min(remaining) as usize;
		let size = self.header.particle_size as usize * take;
		let mut buf = vec![0u8; size];
		if take > 0 {
			self.stream.read_exact(&mut buf)?;
		}
		self.current_index += take as u64;
		Ok((buf, take as u64))
	}

	/// Returns the feature signature every particle on this file shares;
	/// paired with [`Reader::last_raw`] this lets a byte-identical copy be
	/// written out without re-encoding (see [`crate::merge`]).
	pub fn feature_signature(&self) -> FeatureFlags {
		self.header.flags
	}

	/// The raw, on-disk bytes of the most recently read particle.
	pub fn last_raw(&self) -> &[u8] {
		&self.last_raw
	}

	/// Skips forward `n` particles without decoding them.
	pub fn skip_forward(&mut self, n: u64) -> Result<()> {
		let target = (self.current_index + n).min(self.header.nparticles());
		self.seek(target)
	}

	pub fn rewind(&mut self) -> Result<()> {
		self.seek(0)
	}

	/// Seeks directly to particle index `index` (clamped to `nparticles`).
	pub fn seek(&mut self, index: u64) -> Result<()> {
		let index = index.min(self.header.nparticles());
		let offset = self.header_size + index * self.header.particle_size as u64;
		self.stream.seek(offset)?;
		self.current_index = index;
		Ok(())
	}
}

/// Confirms that a particle-sized read starting at `header_size` either
/// comes back full or hits a clean EOF. A short, non-empty read means
/// `header_size` is short of the true first record by some slack the
/// header parser didn't account for; retry one `particle_size` further
/// in, up to [`crate::consts::MAX_HEADER_RECORD_ADJUSTMENTS`] times.
fn validate_first_record(stream: &mut ReadStream, particle_size: u64, header_size: u64) -> Result<u64> {
	let mut pos = header_size;
	for adjustment in 0..=crate::consts::MAX_HEADER_RECORD_ADJUSTMENTS {
		stream.seek(pos)?;
		let mut buf = vec![0u8; particle_size as usize];
		let n = stream.try_read(&mut buf)?;
		stream.seek(pos)?;
		if n == 0 || n as u64 == particle_size {
			return Ok(pos);
		}
		if adjustment == crate::consts::MAX_HEADER_RECORD_ADJUSTMENTS {
			break;
		}
		pos += particle_size;
	}
	Err(McplError::format(
		"could not locate the first particle record after the header; giving up after the maximum number of trailing-record adjustments",
	))
}

#[cfg(test)]
mod tests {
	use super::*;
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
	fn seek_and_rewind() {
		let path = mktmp().join("reader_seek.mcpl");
		{
			let mut w = Writer::create(&path).unwrap();
			for i in 0..10 {
				w.add_particle(&Particle::new([0.0, 0.0, i as f64], [0.0, 0.0, 1.0], 1.0)).unwrap();
			}
			w.close().unwrap();
		}
		let mut r = Reader::open(&path).unwrap();
		r.skip_forward(3).unwrap();
		let p = r.read_next().unwrap().unwrap();
		assert_eq!(p.position[2], 3.0);
		r.rewind().unwrap();
		assert_eq!(r.current_position(), 0);
		let p0 = r.read_next().unwrap().unwrap();
		assert_eq!(p0.position[2], 0.0);
		r.seek(9).unwrap();
		let p9 = r.read_next().unwrap().unwrap();
		assert_eq!(p9.position[2], 9.0);
		assert!(r.read_next().unwrap().is_none());
		std::fs::remove_file(&path).unwrap();
	}

	#[test]
	fn recovers_from_crashed_writer() {
		let path = mktmp().join("reader_crash_recovery.mcpl");
		{
			let mut w = Writer::create(&path).unwrap();
			for i in 0..4 {
				w.add_particle(&Particle::new([0.0, 0.0, i as f64], [0.0, 0.0, 1.0], 1.0)).unwrap();
			}
			// Deliberately flush without closing: nparticles on disk stays
			// at 0, but four records were already written to the file.
			w.flush().unwrap();
			std::mem::forget(w);
		}
		let r = Reader::open(&path).unwrap();
		assert_eq!(r.nparticles(), 4);
		std::fs::remove_file(&path).unwrap();
	}

	#[test]
	fn trailing_record_probe_accepts_well_formed_files() {
		let path = mktmp().join("reader_header_probe.mcpl");
		{
			let mut w = Writer::create(&path).unwrap();
			for i in 0..5 {
				w.add_particle(&Particle::new([0.0, 0.0, i as f64], [0.0, 0.0, 1.0], 1.0)).unwrap();
			}
			w.close().unwrap();
		}
		let mut r = Reader::open(&path).unwrap();
		assert_eq!(r.nparticles(), 5);
		for i in 0..5 {
			assert_eq!(r.read_next().unwrap().unwrap().position[2], i as f64);
		}
		std::fs::remove_file(&path).unwrap();
	}
}
