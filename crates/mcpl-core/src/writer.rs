// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The output side: a [`Writer`] moves through three states as particles
//! are added. Until the first particle is added (or the file is closed),
//! the header is mutable: source name, comments, blobs and universal
//! values may all still be set. Adding the first particle freezes it, so
//! every particle record on disk shares one feature signature.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::consts;
use crate::error::{McplError, Result};
use crate::header::{FeatureFlags, Header};
use crate::particle::Particle;
use crate::statsum::StatSum;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	HeaderMutable,
	HeaderFrozen,
	Closed,
}

/// A file being written. Dropping a [`Writer`] that was never explicitly
/// closed still finalises it (patches the particle count), matching the
/// library's "closing is for gzip, not for correctness" ethos: a crash
/// leaves a recoverable, if unfinalised, file (see [`crate::repair`]).
pub struct Writer {
	path: PathBuf,
	file: Option<BufWriter<File>>,
	header: Header,
	state: State,
}

impl Writer {
	pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
		crate::platform::check()?;
		let path = path.as_ref().to_path_buf();
		let file = File::create(&path).map_err(McplError::Io)?;
		let writer = Writer {
			path,
			file: Some(BufWriter::new(file)),
			header: Header::new(),
			state: State::HeaderMutable,
		};
		Ok(writer)
	}

	fn require_mutable(&self) -> Result<()> {
		match self.state {
			State::HeaderMutable => Ok(()),
			State::HeaderFrozen => Err(McplError::policy(
				"header is frozen: cannot be modified once the first particle has been added",
			)),
			State::Closed => Err(McplError::policy("writer is closed")),
		}
	}

	pub fn set_srcname(&mut self, name: impl Into<String>) -> Result<()> {
		self.require_mutable()?;
		self.header.srcname = name.into();
		Ok(())
	}

	pub fn add_comment(&mut self, comment: impl Into<String>) -> Result<()> {
		self.require_mutable()?;
		self.header.comments.push(comment.into());
		Ok(())
	}

	pub fn add_blob(&mut self, key: impl Into<String>, data: Vec<u8>) -> Result<()> {
		self.require_mutable()?;
		let key = key.into();
		if self.header.blobs.iter().any(|(k, _)| *k == key) {
			return Err(McplError::policy(format!("duplicate blob key {key:?}")));
		}
		self.header.blobs.push((key, data));
		Ok(())
	}

	pub fn enable_userflags(&mut self) -> Result<()> {
		self.require_mutable()?;
		self.header.flags.insert(FeatureFlags::USERFLAGS);
		self.header.recalc_particle_size();
		Ok(())
	}

	pub fn enable_polarisation(&mut self) -> Result<()> {
		self.require_mutable()?;
		self.header.flags.insert(FeatureFlags::POLARISATION);
		self.header.recalc_particle_size();
		Ok(())
	}

	pub fn enable_singleprec(&mut self) -> Result<()> {
		self.require_mutable()?;
		self.header.flags.insert(FeatureFlags::SINGLEPREC);
		self.header.recalc_particle_size();
		Ok(())
	}

	/// Fixes every particle's pdgcode to `pdgcode`, dropping the per-particle
	/// field from the record layout. Once set it cannot be changed to a
	/// different value, matching the redefinition guard in the original
	/// library.
	pub fn set_universal_pdgcode(&mut self, pdgcode: i32) -> Result<()> {
		self.require_mutable()?;
		if self.header.has_universal_pdgcode() && self.header.universal_pdgcode != pdgcode {
			return Err(McplError::policy(
				"universal pdgcode has already been set to a different value",
			));
		}
		self.header.universal_pdgcode = pdgcode;
		self.header.flags.insert(FeatureFlags::UNIVERSAL_PDGCODE);
		self.header.recalc_particle_size();
		Ok(())
	}

	pub fn set_universal_weight(&mut self, weight: f64) -> Result<()> {
		self.require_mutable()?;
		if self.header.has_universal_weight() && self.header.universal_weight != weight {
			return Err(McplError::policy(
				"universal weight has already been set to a different value",
			));
		}
		self.header.universal_weight = weight;
		self.header.flags.insert(FeatureFlags::UNIVERSAL_WEIGHT);
		self.header.recalc_particle_size();
		Ok(())
	}

	/// Sets or accumulates into a cumulative-statistic entry. Overflow to
	/// infinity collapses the entry to unknown, matching [`crate::statsum`].
	pub fn set_stat_sum(&mut self, key: impl Into<String>, value: f64) -> Result<()> {
		self.require_mutable()?;
		let key = key.into();
		let sum = StatSum::known(value);
		match self.header.stat_sums.iter_mut().find(|(k, _)| *k == key) {
			Some((_, v)) => *v = sum,
			None => self.header.stat_sums.push((key, sum)),
		}
		Ok(())
	}

	pub fn header(&self) -> &Header {
		&self.header
	}

	/// Writes the header to disk if it hasn't been yet, freezing it against
	/// further metadata mutation. Deferred to the first physical write so
	/// the on-disk header reflects its final byte length: srcname, comments,
	/// blobs and the universal-weight/stat-sum fields can all still change
	/// the header's size right up until this point, and particle records
	/// are written immediately after it.
	fn ensure_header_written(&mut self) -> Result<()> {
		if self.state != State::HeaderMutable {
			return Ok(());
		}
		let file = self.file.as_mut().expect("writer file handle missing");
		self.header.write_to(file)?;
		self.state = State::HeaderFrozen;
		Ok(())
	}

	/// Appends `particle`, validating its invariants and freezing the
	/// header on the first call.
	pub fn add_particle(&mut self, particle: &Particle) -> Result<()> {
		particle.validate()?;
		if self.state == State::Closed {
			return Err(McplError::policy("writer is closed"));
		}
		self.ensure_header_written()?;
		let mut buf = Vec::with_capacity(self.header.particle_size as usize);
		particle.serialize(&self.header, &mut buf);
		let file = self.file.as_mut().expect("writer file handle missing");
		file.write_all(&buf).map_err(McplError::Io)?;
		self.header.nparticles += 1;
		Ok(())
	}

	/// Appends an already-encoded particle record, bypassing
	/// [`Particle::serialize`]. Used by [`crate::merge`]'s byte-copy fast
	/// path when the source file shares this writer's exact feature
	/// signature; `raw` must be exactly `particle_size` bytes.
	pub(crate) fn append_raw_particle(&mut self, raw: &[u8]) -> Result<()> {
		if self.state == State::Closed {
			return Err(McplError::policy("writer is closed"));
		}
		if raw.len() != self.header.particle_size as usize {
			return Err(McplError::format(format!(
				"raw particle record is {} bytes, expected {}",
				raw.len(),
				self.header.particle_size
			)));
		}
		self.ensure_header_written()?;
		let file = self.file.as_mut().expect("writer file handle missing");
		file.write_all(raw).map_err(McplError::Io)?;
		self.header.nparticles += 1;
		Ok(())
	}

	/// Appends a chunk of `count` already-encoded particle records packed
	/// back-to-back in `raw` (`raw.len() == count * particle_size`).
	pub(crate) fn append_raw_chunk(&mut self, raw: &[u8], count: u64) -> Result<()> {
		if count == 0 {
			return Ok(());
		}
		if self.state == State::Closed {
			return Err(McplError::policy("writer is closed"));
		}
		self.ensure_header_written()?;
		let file = self.file.as_mut().expect("writer file handle missing");
		file.write_all(raw).map_err(McplError::Io)?;
		self.header.nparticles += count;
		Ok(())
	}

	/// Overwrites this writer's metadata (everything but the particle
	/// count) with `source`'s, used by [`crate::merge`] to seed a merge
	/// output file with its first input's metadata. Only valid before the
	/// first particle has been added.
	pub(crate) fn adopt_metadata(&mut self, source: &Header) -> Result<()> {
		self.require_mutable()?;
		self.header.little_endian = source.little_endian;
		self.header.flags = source.flags;
		self.header.universal_pdgcode = source.universal_pdgcode;
		self.header.universal_weight = source.universal_weight;
		self.header.srcname = source.srcname.clone();
		self.header.comments = source.comments.clone();
		self.header.blobs = source.blobs.clone();
		self.header.recalc_particle_size();
		Ok(())
	}

	/// Replaces the cumulative-statistics table outright. Only valid
	/// before the first particle has been added.
	pub(crate) fn set_stat_sums_table(&mut self, table: Vec<(String, StatSum)>) -> Result<()> {
		self.require_mutable()?;
		self.header.stat_sums = table;
		Ok(())
	}

	/// Finalises the file: ensures the header has been written (in case no
	/// particle ever was), then patches the 8-byte particle count in place
	/// at its fixed offset and flushes to disk. Never re-serialises the
	/// whole header, since doing so once the header's byte length has
	/// already been committed would misalign every particle record that
	/// follows it. Idempotent; safe to call even with zero particles
	/// written.
	pub fn close(&mut self) -> Result<()> {
		if self.state == State::Closed {
			return Ok(());
		}
		self.ensure_header_written()?;
		let be = !self.header.little_endian;
		let bytes = if be {
			self.header.nparticles.to_be_bytes()
		} else {
			self.header.nparticles.to_le_bytes()
		};
		{
			let file = self.file.as_mut().expect("writer file handle missing");
			file.flush().map_err(McplError::Io)?;
			let inner = file.get_mut();
			inner.seek(SeekFrom::Start(consts::NPARTICLES_POS)).map_err(McplError::Io)?;
			inner.write_all(&bytes).map_err(McplError::Io)?;
			inner.flush().map_err(McplError::Io)?;
		}
		self.state = State::Closed;
		Ok(())
	}

	/// Flushes buffered particle data to the OS, writing the header first
	/// if it hasn't been yet. Does not patch the header's particle count
	/// (see [`Writer::close`]). Exposed for crash-recovery testing; normal
	/// callers should use [`Writer::close`].
	pub fn flush(&mut self) -> Result<()> {
		self.ensure_header_written()?;
		self.file.as_mut().expect("writer file handle missing").flush().map_err(McplError::Io)
	}

	/// Closes the file, then compresses it to `<path>.gz` and removes the
	/// plain file, returning the path of the compressed output.
	pub fn close_and_gzip(mut self) -> Result<PathBuf> {
		self.close()?;
		self.file = None;
		crate::compression::gzip::gzip_file_in_place(&self.path)
	}
}

impl Drop for Writer {
	fn drop(&mut self) {
		if self.state != State::Closed {
			let _ = self.close();
		}
	}
}

static_assertions::const_assert!(consts::MAX_PARTICLE_SIZE >= 7 * 8 + 3 * 8 + 8 + 4);

#[cfg(test)]
mod tests {
	use super::*;
	use crate::reader::Reader;

	fn mktmp() -> PathBuf {
		let tmp = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
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
	fn freezes_header_after_first_particle() {
		let path = mktmp().join("writer_freeze.mcpl");
		let mut w = Writer::create(&path).unwrap();
		w.set_srcname("test").unwrap();
		w.add_particle(&Particle::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], 1.0)).unwrap();
		assert!(w.set_srcname("too-late").is_err());
		w.close().unwrap();
		std::fs::remove_file(&path).unwrap();
	}

	#[test]
	fn roundtrips_through_reader() {
		let path = mktmp().join("writer_roundtrip.mcpl");
		{
			let mut w = Writer::create(&path).unwrap();
			w.set_srcname("gen").unwrap();
			w.add_comment("a comment").unwrap();
			for i in 0..5 {
				let p = Particle::new([0.0, 0.0, i as f64], [0.0, 0.0, 1.0], 1.0 + i as f64);
				w.add_particle(&p).unwrap();
			}
			w.close().unwrap();
		}
		let mut r = Reader::open(&path).unwrap();
		assert_eq!(r.nparticles(), 5);
		assert_eq!(r.header().srcname, "gen");
		let mut count = 0;
		while let Some(p) = r.read_next().unwrap() {
			assert_eq!(p.position[2], count as f64);
			count += 1;
		}
		assert_eq!(count, 5);
		std::fs::remove_file(&path).unwrap();
	}

	#[test]
	fn rejects_duplicate_blob_key() {
		let path = mktmp().join("writer_dup_blob.mcpl");
		let mut w = Writer::create(&path).unwrap();
		w.add_blob("k", vec![1, 2, 3]).unwrap();
		assert!(w.add_blob("k", vec![4]).is_err());
		w.close().unwrap();
		std::fs::remove_file(&path).unwrap();
	}
}
