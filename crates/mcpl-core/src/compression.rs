// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The gzip backend, treated as a black-box streaming codec: it knows how
//! to turn a finished plain file into a `.gz` file in place. Incremental
//! decompression for reading lives in [`crate::byte_stream`].

pub mod gzip {
	use std::fs::File;
	use std::io::{BufReader, Read, Write};
	use std::path::Path;

	use flate2::{Compression, bufread::GzEncoder};

	use crate::error::{McplError, Result};

	/// Compresses `path` to `<path>.gz` and removes `path`, matching
	/// `mcpl_gzip_file`'s "compress this finished file in place" contract.
	/// Returns the path of the `.gz` file produced.
	pub fn gzip_file_in_place(path: &Path) -> Result<std::path::PathBuf> {
		let gz_path = {
			let mut s = path.as_os_str().to_owned();
			s.push(".gz");
			std::path::PathBuf::from(s)
		};
		if gz_path.exists() {
			return Err(McplError::policy(format!(
				"refusing to overwrite existing output path {gz_path:?}"
			)));
		}
		let infile = BufReader::new(File::open(path).map_err(McplError::Io)?);
		let mut encoder = GzEncoder::new(infile, Compression::default());
		let mut outfile = File::create(&gz_path).map_err(McplError::Io)?;
		let mut buf = [0u8; 65536];
		loop {
			let n = encoder.read(&mut buf).map_err(McplError::Io)?;
			if n == 0 {
				break;
			}
			outfile.write_all(&buf[..n]).map_err(McplError::Io)?;
		}
		outfile.flush().map_err(McplError::Io)?;
		drop(outfile);
		std::fs::remove_file(path).map_err(McplError::Io)?;
		Ok(gz_path)
	}

	#[cfg(test)]
	mod tests {
		use super::*;

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
		fn roundtrips_through_gz_stream() {
			let path = mktmp().join("compression_roundtrip.bin");
			std::fs::write(&path, b"hello mcpl world, repeated ".repeat(100)).unwrap();
			let gz_path = gzip_file_in_place(&path).unwrap();
			assert!(!path.exists());
			assert!(gz_path.exists());

			let mut stream = crate::byte_stream::ReadStream::open(&gz_path).unwrap();
			let mut out = Vec::new();
			let mut chunk = [0u8; 256];
			loop {
				let n = stream.try_read(&mut chunk).unwrap();
				if n == 0 {
					break;
				}
				out.extend_from_slice(&chunk[..n]);
			}
			assert_eq!(out, b"hello mcpl world, repeated ".repeat(100));
			std::fs::remove_file(&gz_path).unwrap();
		}
	}
}
