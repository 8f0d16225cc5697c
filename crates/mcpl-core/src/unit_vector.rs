// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Adaptive Projection Packing (APP): a lossy encoding of a unit 3-vector
//! plus a non-negative scalar into three floats.
//!
//! A plain projection method would store `(x, y, sign(z))` and recover
//! `|z| = sqrt(1 - x^2 - y^2)` on unpacking, which loses precision badly
//! when `|z|` is small. APP avoids this by always storing the two
//! *smallest*-magnitude components directly and replacing the largest one
//! with its reciprocal, so the recovered component's magnitude is always in
//! `[1/sqrt(3), 1] = [0.577, 1.0]`, never small. The packed triple is:
//!
//! ```text
//! (1/z,   y, sign(x))   when |x| is the largest magnitude
//! (  x, 1/z, sign(y))   when |y| is the largest magnitude
//! (  x,   y, sign(z))   when |z| is the largest magnitude
//! ```
//!
//! i.e. whichever component has the *largest* magnitude is the one
//! recovered on unpacking via the `sqrt` formula (where it is accurate,
//! since the two stored components are then both small); the dropped
//! component's reciprocal is carried directly so it inverts back exactly.
//!
//! Unpacking tells which case was used by checking whether the first or
//! second field has magnitude greater than one (a unit vector's components
//! are all `<= 1`, so only a stored reciprocal can exceed it).
//!
//! The third slot is pure sign information (`+1.0` or `-1.0`), which leaves
//! it free to additionally carry a non-negative `ekin` via `copysign`.

use likely_stable::unlikely;

/// Packs `(direction, ekin)` into the three on-disk floats, as `f64` prior
/// to a possible narrowing to `f32` by the caller (single precision files).
pub fn pack_adaptive_projection(direction: [f64; 3], ekin: f64) -> [f64; 3] {
	let [x, y, z] = direction;
	let absx = x.abs();
	let absy = y.abs();

	let mut out = if z.abs() < absx.max(absy) {
		let invz = if z != 0.0 { 1.0 / z } else { f64::INFINITY };
		if absx >= absy {
			// largest magnitude is x: output (1/z, y, sign(x))
			[invz, y, sign_bit(x)]
		} else {
			// largest magnitude is y: output (x, 1/z, sign(y))
			[x, invz, sign_bit(y)]
		}
	} else {
		// largest magnitude is z: output (x, y, sign(z))
		[x, y, sign_bit(z)]
	};

	// out[2] is now a pure sign; fold ekin into it via copysign so the
	// signbit alone still carries the dropped axis's sign, even for
	// ekin == 0.0 (signed zero).
	out[2] = f64::copysign(ekin, out[2]);
	out
}

/// Unpacks a triple produced by [`pack_adaptive_projection`] (or read
/// directly off disk) back into `(direction, ekin)`.
pub fn unpack_adaptive_projection(packed: [f64; 3]) -> ([f64; 3], f64) {
	let ekin = packed[2].abs();
	let sign = f64::copysign(1.0, packed[2]);

	let direction = if unlikely(packed[0].abs() > 1.0) {
		// input is (1/z, y, sign(x))
		let y = packed[1];
		let z = 1.0 / packed[0];
		let x = sign * (1.0 - (y * y + z * z)).max(0.0).sqrt();
		[x, y, z]
	} else if unlikely(packed[1].abs() > 1.0) {
		// input is (x, 1/z, sign(y))
		let x = packed[0];
		let z = 1.0 / packed[1];
		let y = sign * (1.0 - (x * x + z * z)).max(0.0).sqrt();
		[x, y, z]
	} else {
		// input is (x, y, sign(z))
		let x = packed[0];
		let y = packed[1];
		let z = sign * (1.0 - (x * x + y * y)).max(0.0).sqrt();
		[x, y, z]
	};

	(direction, ekin)
}

/// Decodes the octahedral unit-vector packing used by format version 2.
/// Retained read-only: MCPL-3 writers never emit this encoding.
pub fn unpack_octahedral(packed: [f64; 2]) -> [f64; 3] {
	let [mut x, mut y] = packed;
	let mut z = 1.0 - x.abs() - y.abs();
	if z < 0.0 {
		let ox = (1.0 - y.abs()) * if x >= 0.0 { 1.0 } else { -1.0 };
		let oy = (1.0 - x.abs()) * if y >= 0.0 { 1.0 } else { -1.0 };
		x = ox;
		y = oy;
	}
	let n = 1.0 / (x * x + y * y + z * z).sqrt();
	x *= n;
	y *= n;
	z *= n;
	[x, y, z]
}

#[inline]
fn sign_bit(v: f64) -> f64 {
	f64::copysign(1.0, v)
}

#[cfg(test)]
mod tests {
	use super::*;
	use approx::assert_relative_eq;
	use rstest::rstest;

	#[rstest]
	#[case([1.0, 0.0, 0.0])]
	#[case([0.0, 1.0, 0.0])]
	#[case([0.0, 0.0, 1.0])]
	#[case([0.0, 0.0, -1.0])]
	#[case([0.6, 0.8, 0.0])]
	#[case([0.267_261_24, 0.534_522_48, 0.801_783_73])]
	#[case([-0.577_350_27, 0.577_350_27, -0.577_350_27])]
	fn roundtrip_direction(#[case] dir: [f64; 3]) {
		let packed = pack_adaptive_projection(dir, 1.5);
		let (out_dir, out_ekin) = unpack_adaptive_projection(packed);
		assert_relative_eq!(out_ekin, 1.5, epsilon = 1e-12);
		let norm_sq: f64 = out_dir.iter().map(|c| c * c).sum();
		assert_relative_eq!(norm_sq, 1.0, epsilon = 1e-12);
		for i in 0..3 {
			assert_relative_eq!(out_dir[i], dir[i], epsilon = 1e-10);
		}
	}

	#[test]
	fn ekin_zero_preserves_dropped_sign() {
		let packed = pack_adaptive_projection([0.0, 0.0, -1.0], 0.0);
		assert!(packed[2].is_sign_negative());
		let (dir, ekin) = unpack_adaptive_projection(packed);
		assert_eq!(ekin, 0.0);
		assert_relative_eq!(dir[2], -1.0, epsilon = 1e-12);
	}

	#[test]
	fn octahedral_unit_sphere() {
		for (x, y) in [(0.3, 0.2), (-0.6, 0.1), (0.9, -0.9), (0.0, 0.0)] {
			let dir = unpack_octahedral([x, y]);
			let norm_sq: f64 = dir.iter().map(|c| c * c).sum();
			assert_relative_eq!(norm_sq, 1.0, epsilon = 1e-9);
		}
	}

	#[test]
	fn roundtrips_random_directions_and_energies() {
		use rand::Rng;
		let mut rng = rand::rng();
		for _ in 0..2000 {
			let x: f64 = rng.random_range(-1.0..1.0);
			let y: f64 = rng.random_range(-1.0..1.0);
			let z: f64 = rng.random_range(-1.0..1.0);
			let norm = (x * x + y * y + z * z).sqrt();
			if norm < 1e-6 {
				continue;
			}
			let dir = [x / norm, y / norm, z / norm];
			let ekin: f64 = rng.random_range(0.0..1.0e4);

			let packed = pack_adaptive_projection(dir, ekin);
			let (out_dir, out_ekin) = unpack_adaptive_projection(packed);
			assert_relative_eq!(out_ekin, ekin, epsilon = 1e-9);
			let norm_sq: f64 = out_dir.iter().map(|c| c * c).sum();
			assert_relative_eq!(norm_sq, 1.0, epsilon = 1e-9);
			for i in 0..3 {
				assert_relative_eq!(out_dir[i], dir[i], epsilon = 1e-9);
			}
		}
	}
}
