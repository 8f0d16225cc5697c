// SPDX-License-Identifier: Apache-2.0 OR MIT

/// Current on-disk format version. Writers only ever emit this version;
/// readers additionally accept [`MIN_FORMAT_VERSION`].
pub const FORMAT_VERSION: u32 = 3;

/// Oldest format version readers still understand (octahedral direction
/// packing instead of Adaptive Projection Packing).
pub const MIN_FORMAT_VERSION: u32 = 2;

pub const MAGIC: [u8; 4] = *b"MCPL";

/// Byte offset of the `nparticles` field, fixed so the writer can seek back
/// and patch it on close.
pub const NPARTICLES_POS: u64 = 8;

/// Largest possible on-disk particle record (double precision, polarisation,
/// per-particle pdgcode/weight, userflags all enabled).
pub const MAX_PARTICLE_SIZE: usize = 96;

/// Number of particles copied per chunk during a byte-copy merge.
pub const MERGE_CHUNK_PARTICLES: usize = 1000;

/// How many times the reader will tolerate a first-record length mismatch
/// before concluding the file is corrupt, treating each mismatch as an
/// unexpected trailing header record rather than giving up immediately.
pub const MAX_HEADER_RECORD_ADJUSTMENTS: u32 = 3;

/// Maximum length in bytes of `srcname`, comment strings and blob keys.
pub const MAX_STRING_LEN: usize = 65534;

/// Fixed marker prepended to the comment used to carry the cumulative
/// statistics table; never shown as an ordinary comment to API consumers.
pub const STATSUM_COMMENT_PREFIX: &str = "MCPL_STATSUM_TABLE_V1:";

/// Bit pattern reserved to mean "value unknown/unavailable" for a cumulative
/// statistic.
pub const STATSUM_UNKNOWN_BITS: u64 = u64::MAX;

/// srcname written by `forcemerge_files`, replacing the metadata it discards.
pub const FORCEMERGE_SRCNAME: &str = "mcpltool-forcemerge";
