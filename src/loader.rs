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

// One-pass recovery: size probe (delegated to RecordFile::open), tail-shadow
// capacity planning, scan, quarantine cleanup, and (for pre-existing files
// only) duplicate-key reconciliation. Two scan modes are kept as separate,
// explicitly named functions rather than one function branching on whether
// the tail shadow was planned.

use std::path::Path;
use crate::error::Result;
use crate::key_index::KeyIndex;
use crate::memory::MemoryOracle;
use crate::options::Options;
use crate::record_file::RecordFile;
use crate::schema::{KeyOrder, RowSchema};
use crate::tail_store::TailStore;

/// Upper bound for a single tail-shadow allocation, modeled on the largest
/// array a 32-bit-indexed slot space can address.
const MAX_ARRAY_BYTES: u64 = i32::MAX as u64;

pub struct Loaded {
	pub file: RecordFile,
	pub index: KeyIndex,
	pub tails: Option<TailStore>,
}

pub fn load(
	path: &Path,
	schema: &RowSchema,
	order: &dyn KeyOrder,
	options: &Options,
	memory: &dyn MemoryOracle,
) -> Result<Loaded> {
	let (mut file, existed_before, repaired) = RecordFile::open(path, schema.record_len(), options.buffer_size)?;
	if repaired {
		log::warn!(target: "packtable", "{}: recovered from a trailing-garbage size repair", path.display());
	}

	let n = file.size();
	let plan_tails = plan_tail_shadow(n, schema, options, memory);

	let mut index = KeyIndex::new(options.initial_capacity);
	let mut tails = if plan_tails {
		Some(TailStore::new(schema.tail_len(), n as usize))
	} else {
		None
	};

	let quarantine = if tails.is_some() {
		scan_with_tails(&mut file, schema, order, &mut index, &mut tails, n)?
	} else {
		scan_keys_only(&file, schema, order, &mut index, n)?
	};

	for (key, slot) in quarantine {
		// A prior entry's self-healing truncation (swap_truncate dropping
		// malformed trailing records while searching for a well-formed
		// "last") can already have consumed this slot; skip it rather than
		// put past the end of a now-shorter file.
		if slot >= file.size() {
			continue;
		}
		log::warn!(target: "packtable", "{}: quarantining malformed key at slot {}: {}", path.display(), slot, crate::display::hex(&key));
		swap_truncate(&mut file, &mut index, &mut tails, schema, order, slot)?;
	}

	if existed_before {
		reconcile_duplicates(&mut file, &mut index, &mut tails, schema, order)?;
	}

	let final_size = file.size();
	if final_size != index.size() as u64 {
		return Err(crate::error::Error::Corruption(format!(
			"{}: size(file)={} != size(index)={} after load",
			path.display(),
			final_size,
			index.size()
		)));
	}
	if let Some(t) = &tails {
		if t.size() != final_size {
			return Err(crate::error::Error::Corruption(format!(
				"{}: size(tail shadow)={} != size(file)={} after load",
				path.display(),
				t.size(),
				final_size
			)));
		}
	}

	Ok(Loaded { file, index, tails })
}

fn plan_tail_shadow(n: u64, schema: &RowSchema, options: &Options, memory: &dyn MemoryOracle) -> bool {
	if !options.allow_tail_shadow {
		return false;
	}
	let tails_bytes = 3 * n * (schema.record_len() as u64 + 4);
	let index_bytes = 400 * 1024 * 1024 + (n * (schema.key_len() as u64 + 4) * 3) / 2;
	let fits_address_space = tails_bytes <= MAX_ARRAY_BYTES || options.exceed_array_limit;
	let mut plan = fits_address_space && memory.request(tails_bytes, false);
	if plan && !memory.request(index_bytes, true) {
		plan = false;
	}
	plan
}

/// Scans the full record at every slot, populating both the index and the
/// tail shadow. The tail shadow gets one entry per slot scanned, including
/// malformed ones — it must stay slot-aligned with the file as it existed
/// during this scan, since the quarantine loop right after this function
/// returns manipulates both file and tail shadow together by slot number.
/// (A malformed record's tail bytes are garbage, but that slot is always
/// physically removed by the quarantine loop before anything could read it
/// back out.) If appending to the tail shadow fails partway through, the
/// shadow is abandoned for the remainder of the scan (the caller drops it
/// entirely rather than leave it partially populated).
fn scan_with_tails(
	file: &mut RecordFile,
	schema: &RowSchema,
	order: &dyn KeyOrder,
	index: &mut KeyIndex,
	tails: &mut Option<TailStore>,
	n: u64,
) -> Result<Vec<(Vec<u8>, u64)>> {
	let mut quarantine = Vec::new();
	let mut buf = vec![0u8; schema.record_len()];
	for slot in 0..n {
		file.get(slot, &mut buf)?;
		let key = schema.key_of(&buf).to_vec();
		if let Some(t) = tails.as_mut() {
			if t.add_unique(schema.tail_of(&buf)).is_err() {
				log::warn!(target: "packtable", "tail shadow ran out of capacity mid-load, continuing without it");
				*tails = None;
			}
		}
		if order.is_well_formed(&key) {
			index.put(&key, slot as i64)?;
		} else {
			quarantine.push((key, slot));
		}
	}
	Ok(quarantine)
}

/// Scans only the key bytes of every slot, populating the index alone.
fn scan_keys_only(
	file: &RecordFile,
	schema: &RowSchema,
	order: &dyn KeyOrder,
	index: &mut KeyIndex,
	n: u64,
) -> Result<Vec<(Vec<u8>, u64)>> {
	let mut quarantine = Vec::new();
	let mut key = vec![0u8; schema.key_len()];
	for slot in 0..n {
		file.get_range(slot, 0, &mut key)?;
		if order.is_well_formed(&key) {
			index.put(&key, slot as i64)?;
		} else {
			quarantine.push((key.clone(), slot));
		}
	}
	Ok(quarantine)
}

/// For every key `remove_doubles` reports as duplicated, re-points the
/// index at the lowest surviving slot and physically drops the rest, in
/// descending slot order so earlier relocations never invalidate a
/// still-pending slot number.
fn reconcile_duplicates(
	file: &mut RecordFile,
	index: &mut KeyIndex,
	tails: &mut Option<TailStore>,
	schema: &RowSchema,
	order: &dyn KeyOrder,
) -> Result<()> {
	let groups = index.remove_doubles();
	if groups.is_empty() {
		return Ok(());
	}
	let mut to_delete = Vec::new();
	for (key, slots) in groups {
		let keep = slots[0];
		index.remap(&key, keep);
		to_delete.extend(slots[1..].iter().copied());
	}
	to_delete.sort_unstable_by(|a, b| b.cmp(a));
	for slot in to_delete {
		swap_truncate(file, index, tails, schema, order, slot as u64)?;
	}
	Ok(())
}

/// Purely physical row removal: relocates the file's current last record
/// into `slot` and truncates by one, remapping the index if the relocated
/// record was indexed at the old last slot. Does not touch whatever key (if
/// any) `slot` itself held in the index — callers that are removing a live
/// key must evict it from the index first.
///
/// If the current last record is malformed, it is dropped (truncated)
/// outright and the search for a well-formed "last" continues, recovering
/// from corruption of trailing slots.
pub(crate) fn swap_truncate(
	file: &mut RecordFile,
	index: &mut KeyIndex,
	tails: &mut Option<TailStore>,
	schema: &RowSchema,
	order: &dyn KeyOrder,
	slot: u64,
) -> Result<()> {
	loop {
		let last = file.size() - 1;
		if slot == last {
			file.clean_last(None)?;
			if let Some(t) = tails.as_mut() {
				t.remove_one();
			}
			return Ok(());
		}
		let mut buf = vec![0u8; schema.record_len()];
		file.get(last, &mut buf)?;
		let key = schema.key_of(&buf).to_vec();
		if !order.is_well_formed(&key) {
			file.clean_last(None)?;
			if let Some(t) = tails.as_mut() {
				t.remove_one();
			}
			continue;
		}
		file.put(slot, &buf)?;
		if let Some(t) = tails.as_mut() {
			t.remove_row(slot, false);
		}
		file.clean_last(None)?;
		if index.get(&key) == Some(last as i64) {
			index.remap(&key, slot as i64);
		}
		return Ok(());
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::memory::FakeMemoryOracle;
	use crate::options::Options;
	use crate::schema::{Lexicographic, RowSchema};

	fn temp_path(name: &str) -> std::path::PathBuf {
		let mut p = std::env::temp_dir();
		p.push(format!("packtable_loader_test_{}_{}", name, std::process::id()));
		let _ = std::fs::remove_file(&p);
		p
	}

	fn write_raw(path: &std::path::Path, records: &[&[u8]]) {
		use std::io::Write;
		let mut f = std::fs::File::create(path).unwrap();
		for r in records {
			f.write_all(r).unwrap();
		}
	}

	#[test]
	fn s5_reload_dedup() {
		let path = temp_path("s5_reload_dedup");
		write_raw(&path, &[b"AAAAAAAA", b"BBBBBBBB", b"AAAAZZZZ"]);
		let schema = RowSchema::key_value(4, 4);
		let order = Lexicographic;
		let options = Options::default();
		let memory = FakeMemoryOracle::new(8 * 1024 * 1024 * 1024);
		let loaded = load(&path, &schema, &order, &options, &memory).unwrap();
		assert_eq!(loaded.index.size(), 2);
		assert_eq!(loaded.index.get(b"AAAA"), Some(0));
		assert_eq!(loaded.file.size(), 2);
		let _ = std::fs::remove_file(&path);
	}

	#[test]
	fn s6_malformed_trailing() {
		let path = temp_path("s6_malformed_trailing");
		write_raw(&path, &[b"AAAAAAAA", b"BBBBBBBB", &[0u8; 8]]);
		let schema = RowSchema::key_value(4, 4);
		let order = Lexicographic;
		let options = Options::default();
		let memory = FakeMemoryOracle::new(8 * 1024 * 1024 * 1024);
		let loaded = load(&path, &schema, &order, &options, &memory).unwrap();
		assert_eq!(loaded.index.size(), 2);
		assert_eq!(loaded.file.size(), 2);
		let _ = std::fs::remove_file(&path);
	}

	#[test]
	fn scattered_malformed_records_do_not_panic() {
		let path = temp_path("scattered_malformed_records_do_not_panic");
		write_raw(&path, &[b"AAAA1111", &[0u8; 8], b"CCCC3333", &[0u8; 8]]);
		let schema = RowSchema::key_value(4, 4);
		let order = Lexicographic;
		let options = Options::default();
		let memory = FakeMemoryOracle::new(8 * 1024 * 1024 * 1024);
		let loaded = load(&path, &schema, &order, &options, &memory).unwrap();
		assert_eq!(loaded.index.size(), 2);
		assert_eq!(loaded.file.size(), 2);
		assert_eq!(loaded.index.get(b"AAAA"), Some(0));
		assert_eq!(loaded.index.get(b"CCCC"), Some(1));
		let _ = std::fs::remove_file(&path);
	}

	#[test]
	fn fresh_empty_file_loads_clean() {
		let path = temp_path("fresh_empty_file_loads_clean");
		let schema = RowSchema::key_value(4, 4);
		let order = Lexicographic;
		let options = Options::default();
		let memory = FakeMemoryOracle::new(8 * 1024 * 1024 * 1024);
		let loaded = load(&path, &schema, &order, &options, &memory).unwrap();
		assert_eq!(loaded.index.size(), 0);
		assert_eq!(loaded.file.size(), 0);
		let _ = std::fs::remove_file(&path);
	}

	#[test]
	fn low_memory_drops_tail_shadow_plan() {
		let path = temp_path("low_memory_drops_tail_shadow_plan");
		write_raw(&path, &[b"AAAAAAAA"]);
		let schema = RowSchema::key_value(4, 4);
		let order = Lexicographic;
		let options = Options::default();
		let memory = FakeMemoryOracle::new(1024);
		let loaded = load(&path, &schema, &order, &options, &memory).unwrap();
		assert!(loaded.tails.is_none());
		let _ = std::fs::remove_file(&path);
	}
}
