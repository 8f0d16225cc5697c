// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The per-particle record and its feature-signature-dependent codec.
//!
//! Record layout (fields present depend on the enclosing file's
//! [`FeatureFlags`]): polarisation (3 floats, optional) -> position
//! (3 floats) -> packed direction+energy (3 floats) -> time (1 float) ->
//! weight (1 float, omitted when a universal weight is in effect) ->
//! pdgcode (4-byte int, omitted when a universal pdgcode is in effect) ->
//! userflags (4-byte int, optional). Floats are `f32` when the file is
//! single-precision, `f64` otherwise; pdgcode and userflags are always
//! 32-bit regardless of precision.

use serde::{Deserialize, Serialize};

use crate::error::{McplError, Result};
use crate::header::{FeatureFlags, Header};
use crate::unit_vector;

/// A single decoded particle. `direction` is always a unit vector and
/// `ekin` always non-negative; both are validated on construction via
/// [`Particle::new`] and on write via [`Particle::validate`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Particle {
	pub position: [f64; 3],
	pub direction: [f64; 3],
	pub ekin: f64,
	pub time: f64,
	pub weight: f64,
	pub pdgcode: i32,
	pub userflags: u32,
	pub polarisation: [f64; 3],
}

const DIRECTION_NORM_TOLERANCE: f64 = 1e-5;

impl Particle {
	pub fn new(position: [f64; 3], direction: [f64; 3], ekin: f64) -> Self {
		Particle {
			position,
			direction,
			ekin,
			time: 0.0,
			weight: 1.0,
			pdgcode: 0,
			userflags: 0,
			polarisation: [0.0, 0.0, 0.0],
		}
	}

	/// Checks the invariants every stored particle must satisfy:
	/// `ekin >= 0` and `|direction|^2` within `1e-5` of unity.
	pub fn validate(&self) -> Result<()> {
		if self.ekin < 0.0 {
			return Err(McplError::policy(format!(
				"kinetic energy must be non-negative, got {}",
				self.ekin
			)));
		}
		let norm2: f64 = self.direction.iter().map(|c| c * c).sum();
		if !(1.0 - DIRECTION_NORM_TOLERANCE..=1.0 + DIRECTION_NORM_TOLERANCE).contains(&norm2) {
			return Err(McplError::policy(format!(
				"direction vector is not normalised: |dir|^2 = {norm2}"
			)));
		}
		Ok(())
	}

	/// Encodes this particle into `buf` according to `header`'s feature
	/// signature, appending exactly `header.particle_size` bytes.
	pub fn serialize(&self, header: &Header, buf: &mut Vec<u8>) {
		let be = !header.little_endian;
		let single = header.singleprec();
		let flags = header.flags;

		if flags.contains(FeatureFlags::POLARISATION) {
			for c in self.polarisation {
				write_fp(buf, c, be, single);
			}
		}
		for c in self.position {
			write_fp(buf, c, be, single);
		}
		let packed = unit_vector::pack_adaptive_projection(self.direction, self.ekin);
		for c in packed {
			write_fp(buf, c, be, single);
		}
		write_fp(buf, self.time, be, single);
		if !flags.contains(FeatureFlags::UNIVERSAL_WEIGHT) {
			write_fp(buf, self.weight, be, single);
		}
		if !flags.contains(FeatureFlags::UNIVERSAL_PDGCODE) {
			write_i32(buf, self.pdgcode, be);
		}
		if flags.contains(FeatureFlags::USERFLAGS) {
			write_u32(buf, self.userflags, be);
		}
	}

	/// Decodes a single particle record from `raw` (exactly
	/// `header.particle_size` bytes) according to `header`'s feature
	/// signature.
	pub fn deserialize(raw: &[u8], header: &Header) -> Result<Self> {
		let be = !header.little_endian;
		let single = header.singleprec();
		let flags = header.flags;
		let mut cur = Cursor { buf: raw, pos: 0 };

		let polarisation = if flags.contains(FeatureFlags::POLARISATION) {
			[
				cur.read_fp(be, single)?,
				cur.read_fp(be, single)?,
				cur.read_fp(be, single)?,
			]
		} else {
			[0.0, 0.0, 0.0]
		};
		let position = [
			cur.read_fp(be, single)?,
			cur.read_fp(be, single)?,
			cur.read_fp(be, single)?,
		];
		let packed = [
			cur.read_fp(be, single)?,
			cur.read_fp(be, single)?,
			cur.read_fp(be, single)?,
		];
		let (direction, ekin) = if header.format_version >= 3 {
			unit_vector::unpack_adaptive_projection(packed)
		} else {
			// Format version 2 used octahedral packing for the direction and
			// stored ekin directly (not sign-folded) in the third slot; a
			// negative stored value was a legacy signal to zero out the
			// z-component of the unfolded direction.
			let mut dir = unit_vector::unpack_octahedral([packed[0], packed[1]]);
			let mut e = packed[2];
			if e.is_sign_negative() {
				e = -e;
				dir[2] = 0.0;
			}
			(dir, e)
		};
		let time = cur.read_fp(be, single)?;
		let weight = if flags.contains(FeatureFlags::UNIVERSAL_WEIGHT) {
			header.universal_weight
		} else {
			cur.read_fp(be, single)?
		};
		let pdgcode = if flags.contains(FeatureFlags::UNIVERSAL_PDGCODE) {
			header.universal_pdgcode
		} else {
			cur.read_i32(be)?
		};
		let userflags = if flags.contains(FeatureFlags::USERFLAGS) {
			cur.read_u32(be)?
		} else {
			0
		};

		Ok(Particle {
			position,
			direction,
			ekin,
			time,
			weight,
			pdgcode,
			userflags,
			polarisation,
		})
	}
}

struct Cursor<'a> {
	buf: &'a [u8],
	pos: usize,
}

impl<'a> Cursor<'a> {
	fn read_fp(&mut self, be: bool, single: bool) -> Result<f64> {
		if single {
			let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
			Ok(if be {
				f32::from_be_bytes(bytes)
			} else {
				f32::from_le_bytes(bytes)
			} as f64)
		} else {
			let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
			Ok(if be {
				f64::from_be_bytes(bytes)
			} else {
				f64::from_le_bytes(bytes)
			})
		}
	}

	fn read_i32(&mut self, be: bool) -> Result<i32> {
		let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
		Ok(if be {
			i32::from_be_bytes(bytes)
		} else {
			i32::from_le_bytes(bytes)
		})
	}

	fn read_u32(&mut self, be: bool) -> Result<u32> {
		let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
		Ok(if be {
			u32::from_be_bytes(bytes)
		} else {
			u32::from_le_bytes(bytes)
		})
	}

	fn take(&mut self, n: usize) -> Result<&'a [u8]> {
		if self.pos + n > self.buf.len() {
			return Err(McplError::format("truncated particle record"));
		}
		let s = &self.buf[self.pos..self.pos + n];
		self.pos += n;
		Ok(s)
	}
}

fn write_fp(buf: &mut Vec<u8>, v: f64, be: bool, single: bool) {
	if single {
		let bytes = if be {
			(v as f32).to_be_bytes()
		} else {
			(v as f32).to_le_bytes()
		};
		buf.extend_from_slice(&bytes);
	} else {
		let bytes = if be { v.to_be_bytes() } else { v.to_le_bytes() };
		buf.extend_from_slice(&bytes);
	}
}

fn write_i32(buf: &mut Vec<u8>, v: i32, be: bool) {
	let bytes = if be { v.to_be_bytes() } else { v.to_le_bytes() };
	buf.extend_from_slice(&bytes);
}

fn write_u32(buf: &mut Vec<u8>, v: u32, be: bool) {
	let bytes = if be { v.to_be_bytes() } else { v.to_le_bytes() };
	buf.extend_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
	use super::*;
	use approx::assert_relative_eq;
	use rstest::rstest;

	fn header_with(flags: FeatureFlags, singleprec: bool, little_endian: bool) -> Header {
		let mut h = Header::new();
		h.little_endian = little_endian;
		h.flags = flags;
		if singleprec {
			h.flags.insert(FeatureFlags::SINGLEPREC);
		}
		if flags.contains(FeatureFlags::UNIVERSAL_PDGCODE) {
			h.universal_pdgcode = 2112;
		}
		if flags.contains(FeatureFlags::UNIVERSAL_WEIGHT) {
			h.universal_weight = 0.5;
		}
		h.recalc_particle_size();
		h
	}

	#[rstest]
	#[case(FeatureFlags::empty(), false, true)]
	#[case(FeatureFlags::USERFLAGS, false, true)]
	#[case(FeatureFlags::POLARISATION, false, false)]
	#[case(FeatureFlags::UNIVERSAL_PDGCODE.union(FeatureFlags::UNIVERSAL_WEIGHT), true, true)]
	#[case(
		FeatureFlags::USERFLAGS
			.union(FeatureFlags::POLARISATION)
			.union(FeatureFlags::UNIVERSAL_PDGCODE),
		false,
		false
	)]
	fn roundtrips_through_bytes(#[case] flags: FeatureFlags, #[case] singleprec: bool, #[case] little_endian: bool) {
		let header = header_with(flags, singleprec, little_endian);

		let mut p = Particle::new([1.0, -2.5, 3.25], [0.0, 0.0, 1.0], 14.1);
		p.time = 7.0;
		p.weight = if header.has_universal_weight() { header.universal_weight } else { 0.75 };
		p.pdgcode = if header.has_universal_pdgcode() { header.universal_pdgcode } else { 22 };
		p.userflags = 0xdead_beef;
		p.polarisation = [0.1, 0.2, 0.3];
		p.validate().unwrap();

		let mut buf = Vec::new();
		p.serialize(&header, &mut buf);
		assert_eq!(buf.len(), header.particle_size as usize);

		let back = Particle::deserialize(&buf, &header).unwrap();
		let tol = if singleprec { 1e-4 } else { 1e-9 };
		assert_relative_eq!(back.position[0], p.position[0], epsilon = tol);
		assert_relative_eq!(back.position[1], p.position[1], epsilon = tol);
		assert_relative_eq!(back.position[2], p.position[2], epsilon = tol);
		assert_relative_eq!(back.direction[0], p.direction[0], epsilon = tol);
		assert_relative_eq!(back.direction[1], p.direction[1], epsilon = tol);
		assert_relative_eq!(back.direction[2], p.direction[2], epsilon = tol);
		assert_relative_eq!(back.ekin, p.ekin, epsilon = tol);
		assert_relative_eq!(back.time, p.time, epsilon = tol);
		assert_relative_eq!(back.weight, p.weight, epsilon = tol);
		assert_eq!(back.pdgcode, p.pdgcode);
		if flags.contains(FeatureFlags::USERFLAGS) {
			assert_eq!(back.userflags, p.userflags);
		}
		if flags.contains(FeatureFlags::POLARISATION) {
			assert_relative_eq!(back.polarisation[0], p.polarisation[0], epsilon = tol);
		}
	}

	#[test]
	fn rejects_non_unit_direction() {
		let p = Particle::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0], 1.0);
		assert!(p.validate().is_err());
	}

	#[test]
	fn rejects_negative_energy() {
		let p = Particle::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], -1.0);
		assert!(p.validate().is_err());
	}

	#[test]
	fn decodes_legacy_format_version_2_octahedral_records() {
		let mut header = header_with(FeatureFlags::empty(), false, true);
		header.format_version = 2;
		header.recalc_particle_size();

		// position (3) + packed ekindir (3) + time (1) + weight (1) + pdgcode (1),
		// all doubles, little-endian: a record for direction (0.3, 0.2, z>0), ekin 5.0.
		let oct = unit_vector::unpack_octahedral([0.3, 0.2]);
		let expected_norm: f64 = oct.iter().map(|c| c * c).sum();
		assert!((expected_norm - 1.0).abs() < 1e-9);

		let mut buf = Vec::new();
		for v in [0.0_f64, 0.0, 0.0] {
			buf.extend_from_slice(&v.to_le_bytes());
		}
		for v in [0.3_f64, 0.2, 5.0] {
			buf.extend_from_slice(&v.to_le_bytes());
		}
		buf.extend_from_slice(&0.0_f64.to_le_bytes()); // time
		buf.extend_from_slice(&1.0_f64.to_le_bytes()); // weight
		buf.extend_from_slice(&22_i32.to_le_bytes()); // pdgcode

		let p = Particle::deserialize(&buf, &header).unwrap();
		assert_relative_eq!(p.ekin, 5.0, epsilon = 1e-12);
		assert_relative_eq!(p.direction[0], oct[0], epsilon = 1e-9);
		assert_relative_eq!(p.direction[1], oct[1], epsilon = 1e-9);
		assert_relative_eq!(p.direction[2], oct[2], epsilon = 1e-9);
	}
}
