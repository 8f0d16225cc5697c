// SPDX-License-Identifier: Apache-2.0 OR MIT

//! MCPL (Monte Carlo Particle Lists): codec and I/O engine for the binary
//! particle-list interchange format used to hand simulated particle state
//! from one Monte Carlo transport program to another.
//!
//! This crate implements the core described by the format: the header and
//! per-particle record codecs, the byte-stream abstraction spanning plain
//! and gzip-compressed files, the writer state machine, the reader/seeker,
//! repair of files left behind by a crashed writer, the merge/forcemerge
//! engines, the cumulative-statistics table, and the dump/ASCII-export
//! tooling. Third-party format adapters, language bindings and the CLI
//! front-end are external consumers of this API (see the `mcpl-tool`
//! crate for the latter).

pub mod byte_stream;
pub mod compression;
pub mod consts;
pub mod dump;
pub mod error;
pub mod header;
pub mod merge;
pub mod particle;
pub mod platform;
pub mod reader;
pub mod repair;
pub mod statsum;
pub mod transfer;
pub mod unit_vector;
pub mod writer;

pub mod prelude {
	pub use super::dump::{DumpParts, dump, export_text, import_text};
	pub use super::error::{McplError, Result};
	pub use super::header::{FeatureFlags, Header};
	pub use super::merge::{can_merge, forcemerge_files, merge_files, merge_inplace};
	pub use super::particle::Particle;
	pub use super::reader::Reader;
	pub use super::repair::repair;
	pub use super::transfer::transfer_last_read;
	pub use super::writer::Writer;
}
