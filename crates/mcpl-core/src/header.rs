// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The in-memory header model and its on-disk codec.
//!
//! # File Format
//!
//! Every MCPL file starts with an 8-byte magic/version/endian prefix
//! (`"MCPL" "003" 'L'|'B'`), followed by an 8-byte particle count (patched
//! on close), a fixed 32-byte block of `u32` fields, an optional 8-byte
//! universal weight, and then a sequence of length-prefixed strings and
//! blobs. None of the variable-length fields are NUL-terminated; every
//! length prefix is an unsigned 32-bit integer in the file's own
//! endianness.
//!
//! The cumulative-statistics table (see [`crate::statsum`]) has no direct
//! counterpart in the original C header layout; it is carried as a
//! specially-marked leading comment so that older readers merely see one
//! more (opaque) comment line.

use std::io::Read;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::byte_stream::ReadStream;
use crate::consts::{self, MAGIC};
use crate::error::{McplError, Result};
use crate::statsum::StatSum;

/// The tuple of boolean feature flags that determines per-particle record
/// layout. Two files with identical flags, compatible universal values and
/// identical precision can have their particle records byte-copied between
/// them without re-encoding.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureFlags(pub u8);

bitflags! {
	impl FeatureFlags: u8 {
		const USERFLAGS          = 1 << 0;
		const POLARISATION       = 1 << 1;
		const SINGLEPREC         = 1 << 2;
		const UNIVERSAL_PDGCODE  = 1 << 3;
		const UNIVERSAL_WEIGHT   = 1 << 4;
	}
}

/// The in-memory representation of an MCPL header, shared by readers and
/// writers. On a [`crate::reader::Reader`] it is immutable; on a
/// [`crate::writer::Writer`] it is mutable until the header is frozen (see
/// the module docs of [`crate::writer`]).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Header {
	pub format_version: u32,
	pub little_endian: bool,
	pub(crate) nparticles: u64,
	pub flags: FeatureFlags,
	pub universal_pdgcode: i32,
	pub universal_weight: f64,
	pub particle_size: u32,
	pub srcname: String,
	pub comments: Vec<String>,
	pub blobs: Vec<(String, Vec<u8>)>,
	pub stat_sums: Vec<(String, StatSum)>,
}

impl Header {
	/// Constructs the default header a fresh writer starts from: format
	/// version 3, host endianness, no particles, no features enabled.
	pub fn new() -> Self {
		let mut h = Header {
			format_version: consts::FORMAT_VERSION,
			little_endian: crate::platform::host_is_little_endian(),
			nparticles: 0,
			flags: FeatureFlags::empty(),
			universal_pdgcode: 0,
			universal_weight: 0.0,
			particle_size: 0,
			srcname: String::from("unknown"),
			comments: Vec::new(),
			blobs: Vec::new(),
			stat_sums: Vec::new(),
		};
		h.recalc_particle_size();
		h
	}

	pub fn nparticles(&self) -> u64 {
		self.nparticles
	}

	pub fn has_userflags(&self) -> bool {
		self.flags.contains(FeatureFlags::USERFLAGS)
	}

	pub fn has_polarisation(&self) -> bool {
		self.flags.contains(FeatureFlags::POLARISATION)
	}

	pub fn singleprec(&self) -> bool {
		self.flags.contains(FeatureFlags::SINGLEPREC)
	}

	pub fn has_universal_pdgcode(&self) -> bool {
		self.flags.contains(FeatureFlags::UNIVERSAL_PDGCODE)
	}

	pub fn has_universal_weight(&self) -> bool {
		self.flags.contains(FeatureFlags::UNIVERSAL_WEIGHT)
	}

	/// Recomputes `particle_size` from the current flags, matching
	/// `mcpl_recalc_psize` in layout order: polarisation, position,
	/// packed direction+energy, time, weight, pdgcode, userflags.
	pub(crate) fn recalc_particle_size(&mut self) {
		let fp = if self.singleprec() { 4 } else { 8 };
		let mut size = 7 * fp;
		if self.has_polarisation() {
			size += 3 * fp;
		}
		if !self.has_universal_pdgcode() {
			size += 4;
		}
		if !self.has_universal_weight() {
			size += fp;
		}
		if self.has_userflags() {
			size += 4;
		}
		self.particle_size = size as u32;
	}

	/// Writes the header to `out`, returning the byte offset of the first
	/// particle record (`header_size`). The cumulative-statistics table is
	/// always emitted as the first comment, even when empty.
	pub fn write_to<W: std::io::Write>(&self, out: &mut W) -> Result<u64> {
		let be = !self.little_endian;
		let mut written: u64 = 0;

		let mut start = [b'M', b'C', b'P', b'L', b'0', b'0', b'0', b'L'];
		start[4] = b'0' + ((self.format_version / 100) % 10) as u8;
		start[5] = b'0' + ((self.format_version / 10) % 10) as u8;
		start[6] = b'0' + (self.format_version % 10) as u8;
		if be {
			start[7] = b'B';
		}
		out.write_all(&start).map_err(McplError::Io)?;
		written += start.len() as u64;

		written += write_u64(out, self.nparticles, be)?;

		let stat_comment = crate::statsum::encode_comment(&self.stat_sums);
		let ncomments = self.comments.len() as u32 + 1;

		let arr: [u32; 8] = [
			ncomments,
			self.blobs.len() as u32,
			self.has_userflags() as u32,
			self.has_polarisation() as u32,
			self.singleprec() as u32,
			self.universal_pdgcode as u32,
			self.particle_size,
			self.has_universal_weight() as u32,
		];
		for v in arr {
			written += write_u32(out, v, be)?;
		}
		if self.has_universal_weight() {
			written += write_f64(out, self.universal_weight, be)?;
		}

		written += write_string(out, &self.srcname, be)?;
		written += write_string(out, &stat_comment, be)?;
		for c in &self.comments {
			written += write_string(out, c, be)?;
		}
		for (key, _) in &self.blobs {
			written += write_string(out, key, be)?;
		}
		for (_, data) in &self.blobs {
			written += write_u32(out, data.len() as u32, be)?;
			out.write_all(data).map_err(McplError::Io)?;
			written += data.len() as u64;
		}
		Ok(written)
	}

	/// Parses a header from `stream`, validating magic, format version and
	/// endianness against the host. Returns the header and the offset of
	/// the first particle record.
	pub fn read_from(stream: &mut ReadStream) -> Result<(Header, u64)> {
		let mut start = [0u8; 8];
		stream.read_exact(&mut start)?;
		if &start[0..4] != MAGIC {
			return Err(McplError::format("file is not an MCPL file (bad magic)"));
		}
		let format_version =
			(start[4] - b'0') as u32 * 100 + (start[5] - b'0') as u32 * 10 + (start[6] - b'0') as u32;
		if format_version != consts::FORMAT_VERSION && format_version != consts::MIN_FORMAT_VERSION {
			return Err(McplError::format(format!(
				"unsupported MCPL format version {format_version}"
			)));
		}
		let file_little_endian = match start[7] {
			b'L' => true,
			b'B' => false,
			other => {
				return Err(McplError::format(format!(
					"unexpected endianness byte {other:#x} in header"
				)));
			},
		};
		if file_little_endian != crate::platform::host_is_little_endian() {
			return Err(McplError::format(
				"file was written on a host of different endianness",
			));
		}
		let be = !file_little_endian;

		let nparticles = read_u64(stream, be)?;

		let mut arr = [0u32; 8];
		for slot in &mut arr {
			*slot = read_u32(stream, be)?;
		}
		let ncomments = arr[0];
		let nblobs = arr[1];
		let userflags = arr[2] != 0;
		let polarisation = arr[3] != 0;
		let singleprec = arr[4] != 0;
		let universal_pdgcode = arr[5] as i32;
		let particle_size = arr[6];
		let has_universal_weight = arr[7] != 0;

		let universal_weight = if has_universal_weight {
			read_f64(stream, be)?
		} else {
			0.0
		};

		let mut flags = FeatureFlags::empty();
		flags.set(FeatureFlags::USERFLAGS, userflags);
		flags.set(FeatureFlags::POLARISATION, polarisation);
		flags.set(FeatureFlags::SINGLEPREC, singleprec);
		flags.set(FeatureFlags::UNIVERSAL_PDGCODE, universal_pdgcode != 0);
		flags.set(FeatureFlags::UNIVERSAL_WEIGHT, has_universal_weight);

		let srcname = read_string(stream, be)?;

		let mut raw_comments = Vec::with_capacity(ncomments as usize);
		for _ in 0..ncomments {
			raw_comments.push(read_string(stream, be)?);
		}
		let (stat_sums, comments) = crate::statsum::split_comment(raw_comments);

		let mut blob_keys = Vec::with_capacity(nblobs as usize);
		for _ in 0..nblobs {
			blob_keys.push(read_string(stream, be)?);
		}
		let mut blobs = Vec::with_capacity(nblobs as usize);
		for key in blob_keys {
			let len = read_u32(stream, be)?;
			let mut data = vec![0u8; len as usize];
			stream.read_exact(&mut data)?;
			blobs.push((key, data));
		}

		let header_size = stream.tell();

		let mut reconstructed = Header {
			format_version,
			little_endian: file_little_endian,
			nparticles,
			flags,
			universal_pdgcode,
			universal_weight,
			particle_size: 0,
			srcname: String::new(),
			comments: Vec::new(),
			blobs: Vec::new(),
			stat_sums: Vec::new(),
		};
		reconstructed.recalc_particle_size();
		if reconstructed.particle_size != particle_size {
			return Err(McplError::format(format!(
				"declared particle_size {particle_size} does not match the {} bytes implied by the header's feature flags",
				reconstructed.particle_size
			)));
		}

		Ok((
			Header {
				format_version,
				little_endian: file_little_endian,
				nparticles,
				flags,
				universal_pdgcode,
				universal_weight,
				particle_size,
				srcname,
				comments,
				blobs,
				stat_sums,
			},
			header_size,
		))
	}
}

impl Default for Header {
	fn default() -> Self {
		Self::new()
	}
}

fn write_u32<W: std::io::Write>(w: &mut W, v: u32, be: bool) -> Result<u64> {
	let bytes = if be { v.to_be_bytes() } else { v.to_le_bytes() };
	w.write_all(&bytes).map_err(McplError::Io)?;
	Ok(4)
}

fn write_u64<W: std::io::Write>(w: &mut W, v: u64, be: bool) -> Result<u64> {
	let bytes = if be { v.to_be_bytes() } else { v.to_le_bytes() };
	w.write_all(&bytes).map_err(McplError::Io)?;
	Ok(8)
}

fn write_f64<W: std::io::Write>(w: &mut W, v: f64, be: bool) -> Result<u64> {
	write_u64(w, v.to_bits(), be)
}

fn write_string<W: std::io::Write>(w: &mut W, s: &str, be: bool) -> Result<u64> {
	if s.len() > consts::MAX_STRING_LEN {
		return Err(McplError::policy(format!(
			"string of length {} exceeds the maximum of {}",
			s.len(),
			consts::MAX_STRING_LEN
		)));
	}
	let mut n = write_u32(w, s.len() as u32, be)?;
	w.write_all(s.as_bytes()).map_err(McplError::Io)?;
	n += s.len() as u64;
	Ok(n)
}

fn read_u32(stream: &mut ReadStream, be: bool) -> Result<u32> {
	let mut b = [0u8; 4];
	stream.read_exact(&mut b)?;
	Ok(if be {
		u32::from_be_bytes(b)
	} else {
		u32::from_le_bytes(b)
	})
}

fn read_u64(stream: &mut ReadStream, be: bool) -> Result<u64> {
	let mut b = [0u8; 8];
	stream.read_exact(&mut b)?;
	Ok(if be {
		u64::from_be_bytes(b)
	} else {
		u64::from_le_bytes(b)
	})
}

fn read_f64(stream: &mut ReadStream, be: bool) -> Result<f64> {
	Ok(f64::from_bits(read_u64(stream, be)?))
}

fn read_string(stream: &mut ReadStream, be: bool) -> Result<String> {
	let len = read_u32(stream, be)?;
	if len == u32::MAX {
		return Err(McplError::format("string length field is out of range"));
	}
	let mut buf = vec![0u8; len as usize];
	stream.read_exact(&mut buf)?;
	String::from_utf8(buf).map_err(|_| McplError::format("string field is not valid UTF-8"))
}

/// Reads just enough of `path` to validate the header without opening a
/// full stream, by way of a short read. Used by the CLI's fast metadata
/// peek; callers needing full header contents should use
/// [`Header::read_from`] via [`crate::reader::Reader::open`].
pub fn peek_magic<P: AsRef<std::path::Path>>(path: P) -> Result<()> {
	let mut f = std::fs::File::open(path.as_ref()).map_err(McplError::Io)?;
	let mut start = [0u8; 4];
	f.read_exact(&mut start).map_err(McplError::Io)?;
	if start != MAGIC {
		return Err(McplError::format("file is not an MCPL file (bad magic)"));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_header_has_minimal_particle_size() {
		let h = Header::new();
		// 7 doubles (position, packed ekindir, time) + weight + pdgcode.
		assert_eq!(h.particle_size, 7 * 8 + 8 + 4);
	}

	#[test]
	fn particle_size_shrinks_with_universal_values_and_singleprec() {
		let mut h = Header::new();
		h.flags.insert(FeatureFlags::SINGLEPREC);
		h.flags.insert(FeatureFlags::UNIVERSAL_PDGCODE);
		h.flags.insert(FeatureFlags::UNIVERSAL_WEIGHT);
		h.recalc_particle_size();
		assert_eq!(h.particle_size, 7 * 4);
	}

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
	fn header_roundtrips_through_bytes() {
		let mut h = Header::new();
		h.srcname = "testsrc".to_string();
		h.comments.push("hello".to_string());
		h.blobs.push(("k".to_string(), b"01234".to_vec()));
		h.flags.insert(FeatureFlags::UNIVERSAL_PDGCODE);
		h.universal_pdgcode = 2112;
		h.recalc_particle_size();

		let path = mktmp().join("header_roundtrip.mcpl");
		{
			let mut f = std::fs::File::create(&path).unwrap();
			h.write_to(&mut f).unwrap();
		}
		let mut stream = ReadStream::open(&path).unwrap();
		let (parsed, header_size) = Header::read_from(&mut stream).unwrap();
		assert_eq!(parsed.srcname, "testsrc");
		assert_eq!(parsed.comments, vec!["hello".to_string()]);
		assert_eq!(parsed.blobs, vec![("k".to_string(), b"01234".to_vec())]);
		assert_eq!(parsed.universal_pdgcode, 2112);
		assert_eq!(parsed.particle_size, h.particle_size);
		assert_eq!(header_size, stream.tell());
		std::fs::remove_file(&path).unwrap();
	}
}
