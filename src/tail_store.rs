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

use crate::error::{Error, Result};

/// Optional in-RAM packed array of record tails (record minus key),
/// addressed by slot index. Stored as one flat buffer rather than
/// `Vec<Vec<u8>>` to keep the per-slot overhead at `tail_len` bytes instead
/// of a separate heap allocation per record.
pub struct TailStore {
	tail_len: usize,
	data: Vec<u8>,
	max_bytes: Option<usize>,
}

impl TailStore {
	pub fn new(tail_len: usize, initial_capacity: usize) -> TailStore {
		let mut data = Vec::new();
		let _ = data.try_reserve(tail_len * initial_capacity);
		TailStore { tail_len, data, max_bytes: None }
	}

	#[cfg(test)]
	pub fn with_capacity_limit(tail_len: usize, max_bytes: usize) -> TailStore {
		TailStore { tail_len, data: Vec::new(), max_bytes: Some(max_bytes) }
	}

	pub fn size(&self) -> u64 {
		(self.data.len() / self.tail_len) as u64
	}

	fn check_capacity(&self, additional_bytes: usize) -> Result<()> {
		if let Some(max) = self.max_bytes {
			if self.data.len() + additional_bytes > max {
				return Err(Error::OutOfCapacity);
			}
		}
		Ok(())
	}

	pub fn get(&self, i: u64) -> Option<&[u8]> {
		let start = (i as usize) * self.tail_len;
		self.data.get(start..start + self.tail_len)
	}

	pub fn set(&mut self, i: u64, tail: &[u8]) -> Result<()> {
		debug_assert_eq!(tail.len(), self.tail_len);
		let start = (i as usize) * self.tail_len;
		assert!(start + self.tail_len <= self.data.len(), "set past end of tail shadow");
		self.data[start..start + self.tail_len].copy_from_slice(tail);
		Ok(())
	}

	/// Appends a new tail at the end. Fails with `OutOfCapacity` without
	/// mutating state if allocation would exceed the configured limit.
	pub fn add_unique(&mut self, tail: &[u8]) -> Result<()> {
		debug_assert_eq!(tail.len(), self.tail_len);
		self.check_capacity(self.tail_len)?;
		if self.data.try_reserve(self.tail_len).is_err() {
			return Err(Error::OutOfCapacity);
		}
		self.data.extend_from_slice(tail);
		Ok(())
	}

	/// Removes the tail at slot `i`. If `keep_order` is false (the
	/// swap-on-delete case), the last tail is moved into `i` before the
	/// array is shortened by one; if true, every following tail shifts down
	/// by one slot.
	pub fn remove_row(&mut self, i: u64, keep_order: bool) {
		let n = self.size();
		assert!(i < n, "remove_row past end of tail shadow");
		if keep_order {
			let start = (i as usize) * self.tail_len;
			self.data.drain(start..start + self.tail_len);
		} else if i == n - 1 {
			self.remove_one();
		} else {
			let last = n - 1;
			let mut buf = vec![0u8; self.tail_len];
			buf.copy_from_slice(self.get(last).unwrap());
			self.set(i, &buf).expect("in-place overwrite never grows");
			self.remove_one();
		}
	}

	/// Removes and returns the last tail.
	pub fn remove_one(&mut self) -> Vec<u8> {
		let n = self.size();
		assert!(n > 0, "remove_one on empty tail shadow");
		let start = ((n - 1) as usize) * self.tail_len;
		let tail = self.data[start..start + self.tail_len].to_vec();
		self.data.truncate(start);
		tail
	}

	pub fn clear(&mut self) {
		self.data.clear();
	}

	pub fn close(self) {}

	/// Resident size in bytes.
	pub fn mem(&self) -> u64 {
		self.data.capacity() as u64
	}
}

#[cfg(test)]
mod test {
	use super::TailStore;

	#[test]
	fn add_get_remove_last() {
		let mut t = TailStore::new(2, 4);
		t.add_unique(b"aa").unwrap();
		t.add_unique(b"bb").unwrap();
		assert_eq!(t.get(0), Some(&b"aa"[..]));
		assert_eq!(t.remove_one(), b"bb".to_vec());
		assert_eq!(t.size(), 1);
	}

	#[test]
	fn remove_row_swaps_last_into_slot() {
		let mut t = TailStore::new(2, 4);
		t.add_unique(b"aa").unwrap();
		t.add_unique(b"bb").unwrap();
		t.add_unique(b"cc").unwrap();
		t.remove_row(0, false);
		assert_eq!(t.size(), 2);
		assert_eq!(t.get(0), Some(&b"cc"[..]));
		assert_eq!(t.get(1), Some(&b"bb"[..]));
	}

	#[test]
	fn out_of_capacity_leaves_state_unchanged() {
		let mut t = TailStore::with_capacity_limit(2, 2);
		t.add_unique(b"aa").unwrap();
		assert!(matches!(t.add_unique(b"bb"), Err(crate::error::Error::OutOfCapacity)));
		assert_eq!(t.size(), 1);
	}
}
