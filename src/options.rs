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

/// Public Table constructor parameters (spec.md §6).
#[derive(Clone, Debug)]
pub struct Options {
	/// Records batched in the write-behind buffer before a flush is forced.
	pub buffer_size: usize,
	/// Hint for the index's initial capacity; avoids rehashing on load of a
	/// known-size file.
	pub initial_capacity: usize,
	/// Whether a tail shadow (component C) may be built at all.
	pub allow_tail_shadow: bool,
	/// Allow planning a tail shadow even if it would exceed the platform's
	/// addressable single-array size.
	pub exceed_array_limit: bool,
	/// Override for the `minMemRemaining` eviction threshold; `None` uses
	/// `max(400 MiB, available/10)` as spec.md §4.D prescribes.
	pub min_mem_remaining: Option<u64>,
}

impl Default for Options {
	fn default() -> Options {
		Options {
			buffer_size: 64,
			initial_capacity: 1024,
			allow_tail_shadow: true,
			exceed_array_limit: false,
			min_mem_remaining: None,
		}
	}
}
