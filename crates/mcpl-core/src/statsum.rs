// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cumulative-statistic sums: a keyed table of non-negative reals (or the
//! "unknown" sentinel) embedded in the header, preserved across merges by
//! stable (Kahan-compensated) summation.
//!
//! The original MCPL header layout has no room for this table; it is
//! carried as a single specially-prefixed comment (see
//! [`crate::consts::STATSUM_COMMENT_PREFIX`]) so older tooling that only
//! understands plain comments still sees a well-formed (if opaque) file.

use serde::{Deserialize, Serialize};

use crate::consts::{STATSUM_COMMENT_PREFIX, STATSUM_UNKNOWN_BITS};

/// A single cumulative-statistic value: either a non-negative real or the
/// reserved "unknown/unavailable" sentinel (the all-ones bit pattern).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatSum {
	bits: u64,
}

impl StatSum {
	pub const UNKNOWN: StatSum = StatSum {
		bits: STATSUM_UNKNOWN_BITS,
	};

	/// Builds a known value. Negative or non-finite values collapse to
	/// [`StatSum::UNKNOWN`], matching the overflow-to-unknown policy
	/// applied uniformly whenever a value stops being a plain finite
	/// non-negative real.
	pub fn known(value: f64) -> Self {
		if !value.is_finite() || value < 0.0 {
			return Self::UNKNOWN;
		}
		let bits = value.to_bits();
		if bits == STATSUM_UNKNOWN_BITS {
			// Astronomically unlikely collision with the sentinel pattern;
			// nudge down rather than silently misreport as unknown.
			return StatSum {
				bits: f64::MAX.to_bits(),
			};
		}
		StatSum { bits }
	}

	pub fn is_unknown(&self) -> bool {
		self.bits == STATSUM_UNKNOWN_BITS
	}

	pub fn value(&self) -> Option<f64> {
		if self.is_unknown() {
			None
		} else {
			Some(f64::from_bits(self.bits))
		}
	}

	pub fn bits(&self) -> u64 {
		self.bits
	}

	pub fn from_bits(bits: u64) -> Self {
		StatSum { bits }
	}
}

/// Sums `values` in order using Kahan compensated summation, so that
/// `1 + eps + eps + eps + eps` (eps = 2^-53) yields `1 + 4*eps` rather than
/// rounding away to `1`. Returns [`StatSum::UNKNOWN`] if any input is
/// unknown, or if the finite sum overflows to infinity.
pub fn stable_sum<I: IntoIterator<Item = StatSum>>(values: I) -> StatSum {
	let mut sum = 0.0_f64;
	let mut compensation = 0.0_f64;
	for v in values {
		let Some(value) = v.value() else {
			return StatSum::UNKNOWN;
		};
		let y = value - compensation;
		let t = sum + y;
		compensation = (t - sum) - y;
		sum = t;
	}
	if sum.is_finite() {
		StatSum::known(sum)
	} else {
		StatSum::UNKNOWN
	}
}

/// Merges several files' cumulative-statistic tables by key: a key present
/// in every table is combined via [`stable_sum`]; a key missing from any
/// table becomes unknown in the result. Key order follows first
/// appearance across the input tables.
pub fn merge_tables(tables: &[Vec<(String, StatSum)>]) -> Vec<(String, StatSum)> {
	let mut order: Vec<String> = Vec::new();
	for table in tables {
		for (key, _) in table {
			if !order.contains(key) {
				order.push(key.clone());
			}
		}
	}
	order
		.into_iter()
		.map(|key| {
			let mut present_in_all = true;
			let mut values = Vec::with_capacity(tables.len());
			for table in tables {
				match table.iter().find(|(k, _)| *k == key) {
					Some((_, v)) => values.push(*v),
					None => present_in_all = false,
				}
			}
			let combined = if present_in_all {
				stable_sum(values)
			} else {
				StatSum::UNKNOWN
			};
			(key, combined)
		})
		.collect()
}

/// Encodes a stat-sum table as the reserved leading comment, written
/// unconditionally (even with zero entries) so every MCPL-3 file produced
/// by this crate carries the marker.
pub fn encode_comment(table: &[(String, StatSum)]) -> String {
	let mut s = String::from(STATSUM_COMMENT_PREFIX);
	for (i, (key, value)) in table.iter().enumerate() {
		if i > 0 {
			s.push(';');
		}
		s.push_str(key);
		s.push(':');
		s.push_str(&format!("{:016x}", value.bits()));
	}
	s
}

/// Splits the stat-sum table out of a file's parsed comment list. If the
/// first comment carries the reserved marker, it is decoded and removed;
/// otherwise the comments are returned unchanged and the table is empty
/// (an MCPL-2 file, or any file not produced by this crate, has none).
pub fn split_comment(mut comments: Vec<String>) -> (Vec<(String, StatSum)>, Vec<String>) {
	if comments.first().is_some_and(|c| c.starts_with(STATSUM_COMMENT_PREFIX)) {
		let raw = comments.remove(0);
		let body = &raw[STATSUM_COMMENT_PREFIX.len()..];
		let mut table = Vec::new();
		if !body.is_empty() {
			for entry in body.split(';') {
				if let Some((key, hex)) = entry.split_once(':') {
					if let Ok(bits) = u64::from_str_radix(hex, 16) {
						table.push((key.to_string(), StatSum::from_bits(bits)));
					}
				}
			}
		}
		(table, comments)
	} else {
		(Vec::new(), comments)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use approx::assert_relative_eq;

	#[test]
	fn kahan_summation_is_strictly_above_one() {
		let eps = 2f64.powi(-53);
		let values = [
			StatSum::known(1.0),
			StatSum::known(eps),
			StatSum::known(eps),
			StatSum::known(eps),
			StatSum::known(eps),
		];
		let sum = stable_sum(values).value().unwrap();
		assert!(sum > 1.0, "expected stable sum to exceed 1.0, got {sum}");
		assert_relative_eq!(sum, 1.0 + 4.0 * eps, epsilon = 0.0);
	}

	#[test]
	fn unknown_propagates() {
		let values = [StatSum::known(2.5), StatSum::UNKNOWN, StatSum::known(1.0)];
		assert!(stable_sum(values).is_unknown());
	}

	#[test]
	fn overflow_becomes_unknown() {
		let values = [StatSum::known(f64::MAX), StatSum::known(f64::MAX)];
		assert!(stable_sum(values).is_unknown());
	}

	#[test]
	fn merge_tables_requires_presence_in_all() {
		let a = vec![("nsrc".to_string(), StatSum::known(2.5))];
		let b = vec![("nsrc".to_string(), StatSum::known(17.0))];
		let merged = merge_tables(&[a, b]);
		assert_eq!(merged.len(), 1);
		assert_relative_eq!(merged[0].1.value().unwrap(), 19.5, epsilon = 1e-12);

		let c = vec![("nsrc".to_string(), StatSum::known(1.0))];
		let d: Vec<(String, StatSum)> = vec![];
		let merged2 = merge_tables(&[c, d]);
		assert!(merged2[0].1.is_unknown());
	}

	#[test]
	fn comment_roundtrip() {
		let table = vec![
			("a".to_string(), StatSum::known(1.5)),
			("b".to_string(), StatSum::UNKNOWN),
		];
		let encoded = encode_comment(&table);
		let (decoded, rest) = split_comment(vec![encoded, "a plain comment".to_string()]);
		assert_eq!(decoded, table);
		assert_eq!(rest, vec!["a plain comment".to_string()]);
	}

	#[test]
	fn empty_table_round_trips_through_marker() {
		let encoded = encode_comment(&[]);
		let (decoded, rest) = split_comment(vec![encoded]);
		assert!(decoded.is_empty());
		assert!(rest.is_empty());
	}
}
