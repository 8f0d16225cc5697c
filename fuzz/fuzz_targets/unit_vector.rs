// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fuzz target for the Adaptive Projection Packing unit-vector codec.
//!
//! Unlike the header and particle targets, arbitrary bytes here are
//! interpreted as three `f64`s rather than spilled to a file: the codec
//! never touches I/O, so there is nothing to exercise by going through a
//! stream. Any finite triple must decode without panicking, and a triple
//! built from a unit vector must round-trip within the tolerance the
//! packing documents for itself.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mcpl_core::unit_vector::{pack_adaptive_projection, unpack_adaptive_projection};

fuzz_target!(|data: &[u8]| {
	if data.len() < 32 {
		return;
	}
	let read_f64 = |bytes: &[u8]| -> f64 { f64::from_le_bytes(bytes.try_into().unwrap()) };

	let x = read_f64(&data[0..8]);
	let y = read_f64(&data[8..16]);
	let z = read_f64(&data[16..24]);
	let ekin = read_f64(&data[24..32]);

	if !(x.is_finite() && y.is_finite() && z.is_finite() && ekin.is_finite()) {
		return;
	}

	// Packing is only specified for unit vectors and non-negative energy;
	// normalise instead of rejecting so the fuzzer still explores the
	// full space of dropped-axis selections.
	let norm = (x * x + y * y + z * z).sqrt();
	if norm < 1e-12 {
		return;
	}
	let dir = [x / norm, y / norm, z / norm];
	let ekin = ekin.abs();

	let packed = pack_adaptive_projection(dir, ekin);
	assert!(packed.iter().all(|c| c.is_finite() || c.is_infinite()));

	let (out_dir, out_ekin) = unpack_adaptive_projection(packed);
	assert!(out_dir.iter().all(|c| c.is_finite()));
	assert!((out_ekin - ekin).abs() <= ekin.abs() * 1e-6 + 1e-9);

	let out_norm_sq: f64 = out_dir.iter().map(|c| c * c).sum();
	assert!((out_norm_sq - 1.0).abs() < 1e-6);
});
