// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Platform sanity checks, run once before the first file is opened.

use static_assertions::const_assert_eq;
use std::sync::Once;

use crate::error::{McplError, Result};

const_assert_eq!(std::mem::size_of::<u8>(), 1);
const_assert_eq!(std::mem::size_of::<f32>(), 4);
const_assert_eq!(std::mem::size_of::<f64>(), 8);

static CHECKED: Once = Once::new();

/// Verifies the handful of platform assumptions the codec depends on:
/// two's-complement integers (guaranteed by Rust, asserted here for
/// documentation), IEEE-754 floats of the expected width (checked at compile
/// time above), and signed zero (checked at runtime, since `0.0 == -0.0`).
///
/// Idempotent and cheap; called lazily by [`crate::reader::Reader::open`]
/// and [`crate::writer::Writer::create`], and eagerly by the CLI at startup.
pub fn check() -> Result<()> {
	let mut result = Ok(());
	CHECKED.call_once(|| {
		result = check_uncached();
	});
	result
}

fn check_uncached() -> Result<()> {
	if f64::copysign(1.0, -0.0) != -1.0 {
		return Err(McplError::platform(
			"floating point numbers do not have signed zero on this platform",
		));
	}
	let m1_32: i32 = -1;
	let not0_32: i32 = !0;
	if m1_32 != not0_32 {
		return Err(McplError::platform(
			"integers are not two's complement on this platform",
		));
	}
	Ok(())
}

/// Whether the host is little-endian. MCPL files record this so a reader can
/// refuse to open a file written by a host of the opposite endianness.
#[inline]
pub fn host_is_little_endian() -> bool {
	cfg!(target_endian = "little")
}
