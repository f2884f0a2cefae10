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

// Both iterators snapshot the key set at construction time and reconstruct
// each record lazily through `Table::get`. Neither is thread-safe against
// concurrent mutation of the same Table; see `table.rs` for what each
// guarantees (or doesn't) when the Table is mutated mid-iteration.

use std::collections::VecDeque;
use crate::error::{Error, Result};
use crate::schema::KeyOrder;
use crate::table::Table;

/// Lazy key sequence, ascending or descending, optionally starting at a
/// given key. Restartable via `restart`.
pub struct Keys {
	items: VecDeque<Vec<u8>>,
}

impl Keys {
	pub(crate) fn new(items: Vec<Vec<u8>>) -> Keys {
		Keys { items: items.into() }
	}

	pub fn restart(&self) -> Keys {
		Keys { items: self.items.clone() }
	}
}

impl Iterator for Keys {
	type Item = Vec<u8>;

	fn next(&mut self) -> Option<Vec<u8>> {
		self.items.pop_front()
	}
}

/// Physical-order row iterator: walks the index's internal iteration order
/// (ascending key order, since the index is a `BTreeMap`), reconstructing
/// each record through `get`. Supports `remove` of the row last returned by
/// `next`.
///
/// Removing mid-iteration relocates the file's last record into the
/// removed slot (swap-on-delete); the snapshot taken at construction is not
/// reconciled against that relocation. Treat `remove` as the last call
/// before discarding the iterator.
pub struct PhysicalRows<'t, O: KeyOrder> {
	table: &'t Table<O>,
	snapshot: Vec<Vec<u8>>,
	pos: usize,
}

impl<'t, O: KeyOrder> PhysicalRows<'t, O> {
	pub(crate) fn new(table: &'t Table<O>, snapshot: Vec<Vec<u8>>) -> PhysicalRows<'t, O> {
		PhysicalRows { table, snapshot, pos: 0 }
	}

	pub fn restart(&self) -> PhysicalRows<'t, O> {
		PhysicalRows { table: self.table, snapshot: self.snapshot.clone(), pos: 0 }
	}

	/// Removes the row most recently returned by `next`. Returns `None` if
	/// `next` has not yet been called.
	pub fn remove(&mut self) -> Result<Option<Vec<u8>>> {
		if self.pos == 0 {
			return Ok(None);
		}
		let key = self.snapshot[self.pos - 1].clone();
		self.table.remove(&key)
	}
}

impl<'t, O: KeyOrder> Iterator for PhysicalRows<'t, O> {
	type Item = Result<Vec<u8>>;

	fn next(&mut self) -> Option<Self::Item> {
		while self.pos < self.snapshot.len() {
			let key = self.snapshot[self.pos].clone();
			self.pos += 1;
			match self.table.get(&key) {
				Ok(Some(row)) => return Some(Ok(row)),
				// Key no longer present (e.g. removed since the snapshot
				// was taken): skip rather than raise, matching the
				// physical iterator's "no ConcurrentModification" contract.
				Ok(None) => continue,
				Err(e) => return Some(Err(e)),
			}
		}
		None
	}
}

/// Ordered-by-key row iterator. Raises `ConcurrentModification` and becomes
/// unusable if a snapshotted key no longer resolves to a slot.
pub struct OrderedRows<'t, O: KeyOrder> {
	table: &'t Table<O>,
	keys: VecDeque<Vec<u8>>,
	ascending: bool,
	start_key: Option<Vec<u8>>,
	dead: bool,
}

impl<'t, O: KeyOrder> OrderedRows<'t, O> {
	pub(crate) fn new(
		table: &'t Table<O>,
		ascending: bool,
		start_key: Option<Vec<u8>>,
		keys: Vec<Vec<u8>>,
	) -> OrderedRows<'t, O> {
		OrderedRows { table, keys: keys.into(), ascending, start_key, dead: false }
	}

	pub fn restart(&self) -> OrderedRows<'t, O> {
		self.table.rows_ordered(self.ascending, self.start_key.as_deref())
	}
}

impl<'t, O: KeyOrder> Iterator for OrderedRows<'t, O> {
	type Item = Result<Vec<u8>>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.dead {
			return None;
		}
		let key = self.keys.pop_front()?;
		match self.table.get(&key) {
			Ok(Some(row)) => Some(Ok(row)),
			Ok(None) => {
				self.dead = true;
				Some(Err(Error::ConcurrentModification))
			}
			Err(e) => {
				self.dead = true;
				Some(Err(e))
			}
		}
	}
}
