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

use std::collections::{BTreeMap, HashMap};
use crate::error::{Error, Result};

/// In-RAM map from primary key to slot index, ordered by plain unsigned-byte
/// comparison of the key bytes (see `schema::KeyOrder`'s docs: ordering is
/// not pluggable, only the well-formedness predicate is).
///
/// While scanning a file during load, the same key can legitimately show up
/// at more than one slot (a previous crash, or a bug in whatever wrote the
/// file). Rather than lose that information on the first `put`, each
/// overwritten association is pushed into `duplicates` so the loader can
/// reconcile it afterwards with `remove_doubles`.
pub struct KeyIndex {
	map: BTreeMap<Vec<u8>, i64>,
	duplicates: HashMap<Vec<u8>, Vec<i64>>,
	max_entries: Option<usize>,
}

impl KeyIndex {
	pub fn new(initial_capacity: usize) -> KeyIndex {
		let _ = initial_capacity; // BTreeMap has no pre-sizing hook; kept for parity with the contract.
		KeyIndex { map: BTreeMap::new(), duplicates: HashMap::new(), max_entries: None }
	}

	#[cfg(test)]
	pub fn with_capacity_limit(max_entries: usize) -> KeyIndex {
		KeyIndex { map: BTreeMap::new(), duplicates: HashMap::new(), max_entries: Some(max_entries) }
	}

	pub fn get(&self, key: &[u8]) -> Option<i64> {
		self.map.get(key).copied()
	}

	pub fn has(&self, key: &[u8]) -> bool {
		self.map.contains_key(key)
	}

	fn check_capacity(&self, growing: bool) -> Result<()> {
		if growing {
			if let Some(max) = self.max_entries {
				if self.map.len() >= max {
					return Err(Error::OutOfCapacity);
				}
			}
		}
		Ok(())
	}

	/// Inserts or overwrites `key -> slot`. Returns the prior slot, if any.
	/// If the key was already present, the prior slot is also recorded in
	/// the duplicates registry (see struct docs).
	pub fn put(&mut self, key: &[u8], slot: i64) -> Result<i64> {
		self.check_capacity(!self.map.contains_key(key))?;
		match self.map.insert(key.to_vec(), slot) {
			Some(prior) => {
				self.duplicates.entry(key.to_vec()).or_insert_with(Vec::new).push(prior);
				Ok(prior)
			}
			None => Ok(-1),
		}
	}

	/// Inserts `key -> slot`, asserting the key was absent.
	pub fn put_unique(&mut self, key: &[u8], slot: i64) -> Result<()> {
		self.check_capacity(true)?;
		let prior = self.map.insert(key.to_vec(), slot);
		assert!(prior.is_none(), "put_unique called with an already-present key");
		Ok(())
	}

	/// Removes `key`, returning its slot (-1 if absent).
	pub fn remove(&mut self, key: &[u8]) -> i64 {
		self.duplicates.remove(key);
		self.map.remove(key).unwrap_or(-1)
	}

	/// For every key that was ever `put` more than once, returns
	/// `(key, slots)` with `slots` ascending and complete — the lowest is
	/// the one the caller should keep and remap the key to (the map
	/// currently still points at whichever slot was put *last*, not the
	/// lowest). Clears the duplicates registry.
	pub fn remove_doubles(&mut self) -> Vec<(Vec<u8>, Vec<i64>)> {
		let mut groups = Vec::with_capacity(self.duplicates.len());
		for (key, mut prior_slots) in self.duplicates.drain() {
			let current = *self.map.get(&key).expect("duplicate key must still be indexed");
			prior_slots.push(current);
			prior_slots.sort_unstable();
			groups.push((key, prior_slots));
		}
		groups
	}

	/// Repoints `key` at `slot` without touching the duplicates registry.
	/// Used by swap-on-delete to reflect a physical relocation, and by
	/// duplicate reconciliation to settle on the lowest surviving slot.
	pub fn remap(&mut self, key: &[u8], slot: i64) {
		self.map.insert(key.to_vec(), slot);
	}

	/// Ordered key iteration, ascending or descending, optionally starting
	/// at `start_key` (inclusive).
	pub fn keys(&self, ascending: bool, start_key: Option<&[u8]>) -> Box<dyn DoubleEndedIterator<Item = Vec<u8>> + '_> {
		use std::ops::Bound;
		let range = match start_key {
			Some(k) if ascending => (Bound::Included(k.to_vec()), Bound::Unbounded),
			Some(k) => (Bound::Unbounded, Bound::Included(k.to_vec())),
			None => (Bound::Unbounded, Bound::Unbounded),
		};
		let iter = self.map.range(range).map(|(k, _)| k.clone());
		if ascending {
			Box::new(iter)
		} else {
			Box::new(iter.rev())
		}
	}

	pub fn size(&self) -> usize {
		self.map.len()
	}

	pub fn clear(&mut self) {
		self.map.clear();
		self.duplicates.clear();
	}

	pub fn smallest_key(&self) -> Option<Vec<u8>> {
		self.map.keys().next().cloned()
	}

	pub fn largest_key(&self) -> Option<Vec<u8>> {
		self.map.keys().next_back().cloned()
	}

	/// Rough resident size in bytes: entry count times (key width + slot
	/// width + tree overhead), matching the `1.5*(K+4)` coefficient spec.md
	/// §4.E uses for its own estimate.
	pub fn mem(&self, key_len: usize) -> u64 {
		(self.map.len() as u64) * ((key_len as u64 + 8) * 3 / 2)
	}
}
