// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Uniform read handle spanning plain files and gzip-compressed files.
//!
//! Writers only ever produce plain files; gzip is applied as a whole-file
//! post-process by [`crate::compression::gzip_file_in_place`] after close.
//! Reading, however, must transparently support both, including efficient
//! seeking on plain files and a read-and-discard seek emulation on gzip
//! streams, since `flate2`'s buffered gzip reader exposes no native
//! random access into the decompressed byte stream.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::bufread::GzDecoder;

use crate::error::{McplError, Result};

const DISCARD_CHUNK: usize = 65536;

enum Backend {
	Plain(File),
	Gzip {
		path: PathBuf,
		decoder: GzDecoder<BufReader<File>>,
	},
}

/// A read-only byte stream over a plain or gzip-compressed file, tracking
/// its own logical (uncompressed) position so `tell()` is O(1).
pub struct ReadStream {
	backend: Backend,
	pos: u64,
}

impl ReadStream {
	pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
		let path = path.as_ref();
		if is_gzip_path(path) {
			let decoder = open_gzip(path)?;
			Ok(ReadStream {
				backend: Backend::Gzip {
					path: path.to_path_buf(),
					decoder,
				},
				pos: 0,
			})
		} else {
			let file = File::open(path).map_err(McplError::Io)?;
			Ok(ReadStream {
				backend: Backend::Plain(file),
				pos: 0,
			})
		}
	}

	pub fn is_gzip(&self) -> bool {
		matches!(self.backend, Backend::Gzip { .. })
	}

	/// Fully reads `buf.len()` bytes or fails.
	pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
		match &mut self.backend {
			Backend::Plain(f) => f.read_exact(buf).map_err(McplError::Io)?,
			Backend::Gzip { decoder, .. } => decoder.read_exact(buf).map_err(McplError::Io)?,
		}
		self.pos += buf.len() as u64;
		Ok(())
	}

	/// Reads up to `buf.len()` bytes, returning the number actually read
	/// (0 at end of stream).
	pub fn try_read(&mut self, buf: &mut [u8]) -> Result<usize> {
		let n = match &mut self.backend {
			Backend::Plain(f) => f.read(buf).map_err(McplError::Io)?,
			Backend::Gzip { decoder, .. } => decoder.read(buf).map_err(McplError::Io)?,
		};
		self.pos += n as u64;
		Ok(n)
	}

	pub fn tell(&self) -> u64 {
		self.pos
	}

	/// Seeks to an absolute logical (uncompressed) byte offset.
	///
	/// Plain files use a native 64-bit seek. Gzip streams have no random
	/// access: a forward seek discards bytes one chunk at a time; a
	/// backward seek reopens the underlying file and discards from the
	/// start, since `flate2` offers no way to rewind a decoder in place.
	pub fn seek(&mut self, target: u64) -> Result<()> {
		match &mut self.backend {
			Backend::Plain(f) => {
				f.seek(SeekFrom::Start(target)).map_err(McplError::Io)?;
				self.pos = target;
				Ok(())
			},
			Backend::Gzip { path, decoder } => {
				if target < self.pos {
					*decoder = open_gzip(path)?;
					self.pos = 0;
				}
				discard(decoder, target - self.pos)?;
				self.pos = target;
				Ok(())
			},
		}
	}
}

fn discard(mut r: impl Read, mut n: u64) -> Result<()> {
	let mut buf = [0u8; DISCARD_CHUNK];
	while n > 0 {
		let chunk = n.min(DISCARD_CHUNK as u64) as usize;
		r.read_exact(&mut buf[..chunk]).map_err(McplError::Io)?;
		n -= chunk as u64;
	}
	Ok(())
}

fn open_gzip(path: &Path) -> Result<GzDecoder<BufReader<File>>> {
	let file = File::open(path).map_err(McplError::Io)?;
	Ok(GzDecoder::new(BufReader::new(file)))
}

pub fn is_gzip_path(path: &Path) -> bool {
	path
		.extension()
		.and_then(|ext| ext.to_str())
		.is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// Reads an entire file into memory, enforcing a size cap and optionally
/// normalizing text line endings (`\r\n` and lone `\r` both become `\n`)
/// while validating UTF-8. Used by the ASCII importer and by `-bKEY` blob
/// dumping to stdout (with `text_mode = false`).
pub fn read_whole_file<P: AsRef<Path>>(path: P, max_len: u64, text_mode: bool) -> Result<Vec<u8>> {
	let path = path.as_ref();
	let len = std::fs::metadata(path).map_err(McplError::Io)?.len();
	if len > max_len {
		return Err(McplError::format(format!(
			"file {:?} of size {len} exceeds the maximum of {max_len} bytes",
			path
		)));
	}
	let mut stream = ReadStream::open(path)?;
	let mut buf = Vec::with_capacity(len as usize);
	let mut chunk = [0u8; 65536];
	loop {
		let n = stream.try_read(&mut chunk)?;
		if n == 0 {
			break;
		}
		buf.extend_from_slice(&chunk[..n]);
	}
	if !text_mode {
		return Ok(buf);
	}
	let text = String::from_utf8(buf).map_err(|_| McplError::format("file is not valid UTF-8"))?;
	let mut normalized = String::with_capacity(text.len());
	let mut chars = text.chars().peekable();
	while let Some(c) = chars.next() {
		if c == '\r' {
			if chars.peek() == Some(&'\n') {
				chars.next();
			}
			normalized.push('\n');
		} else {
			normalized.push(c);
		}
	}
	Ok(normalized.into_bytes())
}

#[cfg(test)]
mod tests {
	use super::*;

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
	fn plain_seek_roundtrip() {
		let path = mktmp().join("bytestream_plain.bin");
		std::fs::write(&path, b"0123456789").unwrap();
		let mut s = ReadStream::open(&path).unwrap();
		let mut buf = [0u8; 4];
		s.read_exact(&mut buf).unwrap();
		assert_eq!(&buf, b"0123");
		s.seek(8).unwrap();
		let mut buf2 = [0u8; 2];
		s.read_exact(&mut buf2).unwrap();
		assert_eq!(&buf2, b"89");
		s.seek(2).unwrap();
		assert_eq!(s.tell(), 2);
	}

	#[test]
	fn text_mode_normalizes_newlines() {
		let path = mktmp().join("bytestream_text.txt");
		std::fs::write(&path, b"a\r\nb\rc\n").unwrap();
		let out = read_whole_file(&path, 1024, true).unwrap();
		assert_eq!(out, b"a\nb\nc\n");
	}
}
