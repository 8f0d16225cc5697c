// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{Criterion, criterion_group, criterion_main};
use mcpl_core::header::{FeatureFlags, Header};
use mcpl_core::particle::Particle;

fn bench_particle_serialize(c: &mut Criterion) {
	let mut header = Header::new();
	header.flags.insert(FeatureFlags::USERFLAGS);
	header.recalc_particle_size();
	let particle = Particle::new([1.0, 2.0, 3.0], [0.0, 0.0, 1.0], 14.1);

	c.bench_function("particle_serialize", |b| {
		b.iter(|| {
			let mut buf = Vec::with_capacity(header.particle_size as usize);
			particle.serialize(&header, &mut buf);
			buf
		});
	});

	let mut raw = Vec::new();
	particle.serialize(&header, &mut raw);
	c.bench_function("particle_deserialize", |b| {
		b.iter(|| Particle::deserialize(&raw, &header).unwrap());
	});
}

fn bench_file_roundtrip(c: &mut Criterion) {
	let tmp = std::env::temp_dir().join("mcpl_bench_roundtrip.mcpl");
	c.bench_function("write_10k_particles", |b| {
		b.iter(|| {
			let mut w = mcpl_core::writer::Writer::create(&tmp).unwrap();
			for i in 0..10_000u32 {
				let p = Particle::new([0.0, 0.0, i as f64], [0.0, 0.0, 1.0], 1.0);
				w.add_particle(&p).unwrap();
			}
			w.close().unwrap();
		});
	});
	c.bench_function("read_10k_particles", |b| {
		b.iter(|| {
			let mut r = mcpl_core::reader::Reader::open(&tmp).unwrap();
			while r.read_next().unwrap().is_some() {}
		});
	});
	let _ = std::fs::remove_file(&tmp);
}

criterion_group!(benches, bench_particle_serialize, bench_file_roundtrip);
criterion_main!(benches);
