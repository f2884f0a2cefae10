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

// Process-wide path -> Table registry, used only for introspection
// (`filenames`, `memory_stats`). spec.md §9 flags the source's equivalent
// registry as an acknowledged leak (entries are never removed); here entries
// are inserted at construction and removed on `close`, so a Table that is
// properly closed does not linger.

use std::collections::HashMap;
use std::path::PathBuf;
use parking_lot::Mutex;

/// A live Table's stats, as seen by the registry.
#[derive(Clone, Debug)]
pub struct MemoryStats {
	pub path: PathBuf,
	pub record_count: u64,
	pub index_bytes: u64,
	pub tail_shadow_bytes: Option<u64>,
}

static REGISTRY: std::sync::OnceLock<Mutex<HashMap<PathBuf, MemoryStats>>> = std::sync::OnceLock::new();

fn registry() -> &'static Mutex<HashMap<PathBuf, MemoryStats>> {
	REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn register(path: PathBuf, stats: MemoryStats) {
	registry().lock().insert(path, stats);
}

pub fn update(path: &PathBuf, stats: MemoryStats) {
	registry().lock().insert(path.clone(), stats);
}

pub fn deregister(path: &PathBuf) {
	registry().lock().remove(path);
}

/// Paths of every currently-open Table.
pub fn filenames() -> Vec<PathBuf> {
	registry().lock().keys().cloned().collect()
}

/// Stats snapshot of every currently-open Table.
pub fn memory_stats() -> Vec<MemoryStats> {
	registry().lock().values().cloned().collect()
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn register_and_deregister() {
		let path = PathBuf::from("/tmp/packtable-registry-test-table");
		register(path.clone(), MemoryStats { path: path.clone(), record_count: 0, index_bytes: 0, tail_shadow_bytes: None });
		assert!(filenames().contains(&path));
		deregister(&path);
		assert!(!filenames().contains(&path));
	}
}
