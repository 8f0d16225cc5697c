// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fuzz target for header parsing.
//!
//! `Header::read_from` only ever sees bytes that came through a file, so
//! arbitrary data is spilled to a scratch file first. The target asserts
//! only that parsing never panics; a malformed header is expected to
//! return an error, not be accepted.

#![no_main]

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use libfuzzer_sys::fuzz_target;
use mcpl_core::byte_stream::ReadStream;
use mcpl_core::header::Header;

static COUNTER: AtomicU64 = AtomicU64::new(0);

fuzz_target!(|data: &[u8]| {
	let n = COUNTER.fetch_add(1, Ordering::Relaxed);
	let path = std::env::temp_dir().join(format!("mcpl-fuzz-header-{}-{n}.bin", std::process::id()));
	if std::fs::File::create(&path).and_then(|mut f| f.write_all(data)).is_err() {
		return;
	}
	if let Ok(mut stream) = ReadStream::open(&path) {
		let _ = Header::read_from(&mut stream);
	}
	let _ = std::fs::remove_file(&path);
});
