// SPDX-License-Identifier: Apache-2.0 OR MIT

use thiserror::Error;

/// The single error type returned by every fallible operation in this crate.
///
/// Variants are grouped by the five categories used throughout the on-disk
/// format and I/O engine: stream failures, malformed data, policy violations
/// committed by the caller, platform incompatibilities, and CLI misuse.
#[derive(Error, Debug)]
pub enum McplError {
	/// A read, write, seek or open against the underlying byte stream failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),

	/// The file is not a valid MCPL stream: bad magic, unsupported version,
	/// endian mismatch, or a corrupt/truncated header or particle record.
	#[error("format error: {0}")]
	Format(String),

	/// The caller violated an invariant of the API: mutating a frozen
	/// header, a duplicate blob key, a non-unit direction, negative kinetic
	/// energy, a universal-value redefinition, or merging incompatible
	/// files.
	#[error("policy error: {0}")]
	Policy(String),

	/// A compile-time or runtime platform assumption does not hold (e.g.
	/// non-IEEE floats, no signed zero, non-8-bit byte).
	#[error("platform error: {0}")]
	Platform(String),

	/// Command-line usage error: bad arguments, missing files, conflicting
	/// flags.
	#[error("usage error: {0}")]
	Usage(String),
}

pub type Result<T> = std::result::Result<T, McplError>;

impl McplError {
	pub fn format<S: Into<String>>(msg: S) -> Self {
		McplError::Format(msg.into())
	}

	pub fn policy<S: Into<String>>(msg: S) -> Self {
		McplError::Policy(msg.into())
	}

	pub fn platform<S: Into<String>>(msg: S) -> Self {
		McplError::Platform(msg.into())
	}

	pub fn usage<S: Into<String>>(msg: S) -> Self {
		McplError::Usage(msg.into())
	}
}

/// Prints a single-line, non-fatal warning to stderr, matching the original
/// library's behaviour of continuing after conditions such as opening a
/// writer-crashed file or merging an older format version.
pub fn warn(msg: impl std::fmt::Display) {
	eprintln!("MCPL WARNING: {msg}");
}
