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

use parking_lot::Mutex;
use sysinfo::System;

pub const MIN_MEM_REMAINING_FLOOR: u64 = 400 * 1024 * 1024;

/// Margin the loader's tail-shadow planning keeps on top of the shadow's own
/// estimated size — this is `request`'s `hard = false` margin, distinct from
/// the larger `MIN_MEM_REMAINING_FLOOR` a live Table's eviction threshold
/// keeps once open.
const PLAN_MARGIN: u64 = 200 * 1024 * 1024;

/// Abstracts over "how much RAM is left", so the tail-shadow planning and
/// eviction logic in `table`/`loader` can be driven by a fake oracle in
/// tests instead of the real, noisy host memory state.
pub trait MemoryOracle: Send + Sync {
	/// Bytes of RAM currently available to this process.
	fn available(&self) -> u64;

	/// Best-effort check that `n` more bytes can be allocated. `hard` means
	/// the caller cannot proceed at all without them (used when deciding
	/// whether the index itself would fit); a soft request keeps a margin on
	/// top and just informs a planning decision (used when planning the tail
	/// shadow).
	fn request(&self, n: u64, hard: bool) -> bool {
		let available = self.available();
		if hard {
			available >= n
		} else {
			available >= n + PLAN_MARGIN
		}
	}

	/// True once available memory has fallen below the Table's eviction
	/// threshold.
	fn short_status(&self, threshold: u64) -> bool {
		self.available() < threshold
	}
}

/// Real oracle backed by `sysinfo`.
pub struct SysMemoryOracle {
	sys: Mutex<System>,
}

impl SysMemoryOracle {
	pub fn new() -> SysMemoryOracle {
		let mut sys = System::new();
		sys.refresh_memory();
		SysMemoryOracle { sys: Mutex::new(sys) }
	}
}

impl Default for SysMemoryOracle {
	fn default() -> SysMemoryOracle {
		SysMemoryOracle::new()
	}
}

impl MemoryOracle for SysMemoryOracle {
	fn available(&self) -> u64 {
		let mut sys = self.sys.lock();
		sys.refresh_memory();
		sys.available_memory()
	}
}

/// Fixed-value oracle for deterministic tests of the eviction/planning
/// policy, including forced tail-shadow eviction at every step (spec.md §8
/// property 7).
#[cfg(test)]
pub struct FakeMemoryOracle {
	available: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl FakeMemoryOracle {
	pub fn new(available: u64) -> FakeMemoryOracle {
		FakeMemoryOracle { available: std::sync::atomic::AtomicU64::new(available) }
	}

	pub fn set(&self, available: u64) {
		self.available.store(available, std::sync::atomic::Ordering::Relaxed);
	}
}

#[cfg(test)]
impl MemoryOracle for FakeMemoryOracle {
	fn available(&self) -> u64 {
		self.available.load(std::sync::atomic::Ordering::Relaxed)
	}
}
