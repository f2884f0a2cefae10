// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

/// A single fixed-width column. Column 0 of a `RowSchema` is always the
/// primary key.
#[derive(Clone, Copy, Debug)]
pub struct Column {
	pub width: usize,
}

/// Decides whether a key's bytes are well-formed under a schema.
///
/// Key ordering itself is not pluggable: the index stores keys as raw
/// `Vec<u8>` and always orders them by plain unsigned-byte comparison, so
/// this trait only carries the well-formedness predicate. The default
/// implementation rejects the all-zero key as malformed (it is reserved as
/// the corrupt/uninitialized-slot sentinel).
pub trait KeyOrder: Send + Sync {
	fn is_well_formed(&self, key: &[u8]) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Lexicographic;

impl KeyOrder for Lexicographic {
	fn is_well_formed(&self, key: &[u8]) -> bool {
		key.iter().any(|&b| b != 0)
	}
}

/// Immutable per-Table row layout: an ordered list of fixed-width columns,
/// column 0 being the primary key.
#[derive(Clone, Debug)]
pub struct RowSchema {
	columns: Vec<Column>,
	key_len: usize,
	record_len: usize,
}

impl RowSchema {
	/// `columns[0].width` is `K`; the sum of all widths is `R`.
	pub fn new(columns: Vec<Column>) -> RowSchema {
		assert!(!columns.is_empty(), "a row schema needs at least a key column");
		let key_len = columns[0].width;
		assert!(key_len > 0, "primary key column must be non-empty");
		let record_len = columns.iter().map(|c| c.width).sum();
		RowSchema { columns, key_len, record_len }
	}

	/// Convenience constructor for a two-column `byte[key_len] key, byte[value_len] value` schema.
	pub fn key_value(key_len: usize, value_len: usize) -> RowSchema {
		RowSchema::new(vec![Column { width: key_len }, Column { width: value_len }])
	}

	pub fn columns(&self) -> &[Column] {
		&self.columns
	}

	/// `K`: width in bytes of the primary key.
	pub fn key_len(&self) -> usize {
		self.key_len
	}

	/// `R`: total width in bytes of a record.
	pub fn record_len(&self) -> usize {
		self.record_len
	}

	/// `T = R - K`: width in bytes of a record's tail.
	pub fn tail_len(&self) -> usize {
		self.record_len - self.key_len
	}

	pub fn key_of<'a>(&self, record: &'a [u8]) -> &'a [u8] {
		&record[..self.key_len]
	}

	pub fn tail_of<'a>(&self, record: &'a [u8]) -> &'a [u8] {
		&record[self.key_len..]
	}
}
