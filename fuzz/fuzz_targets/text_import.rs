// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fuzz target for the ASCII text importer, the one place besides the
//! binary header/particle codecs that parses untrusted bytes: arbitrary
//! text (banner, comments, whitespace-separated particle fields) is
//! fed straight to `mcpl_core::dump::import_text`. A malformed file must
//! fail cleanly with an error, never panic.

#![no_main]

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use libfuzzer_sys::fuzz_target;
use mcpl_core::dump::import_text;

static COUNTER: AtomicU64 = AtomicU64::new(0);

fuzz_target!(|data: &[u8]| {
	let n = COUNTER.fetch_add(1, Ordering::Relaxed);
	let pid = std::process::id();
	let in_path = std::env::temp_dir().join(format!("mcpl-fuzz-textimport-{pid}-{n}.txt"));
	let out_path = std::env::temp_dir().join(format!("mcpl-fuzz-textimport-{pid}-{n}.mcpl"));
	let _ = std::fs::remove_file(&out_path);

	if std::fs::File::create(&in_path).and_then(|mut f| f.write_all(data)).is_err() {
		return;
	}

	let _ = import_text(&in_path, &out_path);

	let _ = std::fs::remove_file(&in_path);
	let _ = std::fs::remove_file(&out_path);
});
