// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fuzz target for the per-particle record codec.
//!
//! The first input byte selects a feature signature; the rest is padded
//! or truncated to `particle_size` and handed to `Particle::deserialize`.
//! A record that decodes successfully must re-encode to exactly
//! `particle_size` bytes again.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mcpl_core::header::{FeatureFlags, Header};
use mcpl_core::particle::Particle;

fuzz_target!(|data: &[u8]| {
	if data.is_empty() {
		return;
	}
	let mut header = Header::new();
	header.flags = FeatureFlags::from_bits_truncate(data[0]);
	header.little_endian = data[0] & 0x80 != 0;
	if header.flags.contains(FeatureFlags::UNIVERSAL_PDGCODE) {
		header.universal_pdgcode = 2112;
	}
	if header.flags.contains(FeatureFlags::UNIVERSAL_WEIGHT) {
		header.universal_weight = 1.0;
	}
	header.format_version = if data[0] & 0x40 != 0 { 2 } else { 3 };
	header.recalc_particle_size();

	let body = &data[1..];
	let mut raw = vec![0u8; header.particle_size as usize];
	let copy_len = raw.len().min(body.len());
	raw[..copy_len].copy_from_slice(&body[..copy_len]);

	if let Ok(particle) = Particle::deserialize(&raw, &header) {
		let mut reencoded = Vec::new();
		particle.serialize(&header, &mut reencoded);
		assert_eq!(reencoded.len(), header.particle_size as usize);
	}
});
