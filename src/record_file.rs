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

// On-disk layout: a flat sequence of `record_len`-byte records, no header,
// no tombstones, no version word. File size mod `record_len` must be zero;
// anything trailing is corruption, truncated by `open`'s size-repair path.

use std::path::{Path, PathBuf};
use crate::display::hex;
use crate::error::{Error, Result};

#[cfg(target_os = "macos")]
fn disable_read_ahead(file: &std::fs::File) -> Result<()> {
	use std::os::unix::io::AsRawFd;
	if unsafe { libc::fcntl(file.as_raw_fd(), libc::F_RDAHEAD, 0) } != 0 {
		Err(std::io::Error::last_os_error())?
	} else {
		Ok(())
	}
}

#[cfg(not(target_os = "macos"))]
fn disable_read_ahead(_file: &std::fs::File) -> Result<()> {
	Ok(())
}

/// Append-only-plus-random-write store of fixed-size records addressed by
/// slot index. Appends are batched through a write-behind buffer sized
/// `buffer_records * record_len` bytes; random writes to already-flushed
/// slots go straight to disk.
pub struct RecordFile {
	path: PathBuf,
	file: std::fs::File,
	record_len: usize,
	buffer_records: usize,
	/// Records physically present in `file`.
	flushed: u64,
	/// Appended records not yet written to `file`, in slot order.
	buffer: Vec<u8>,
	dirty: bool,
	delete_on_exit: bool,
}

impl RecordFile {
	/// Opens (creating if absent) the record file at `path`. Returns the
	/// file, whether it existed before this call (used by the loader to
	/// decide whether de-duplication is needed), and whether a size-repair
	/// truncation was needed.
	pub fn open(path: &Path, record_len: usize, buffer_records: usize) -> Result<(RecordFile, bool, bool)> {
		assert!(record_len > 0);
		let existed_before = path.exists();
		let file = std::fs::OpenOptions::new().create(true).read(true).write(true).open(path)?;
		disable_read_ahead(&file)?;
		fs2::FileExt::try_lock_exclusive(&file).map_err(|_| {
			Error::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, "record file already locked by another Table"))
		})?;

		let len = file.metadata()?.len();
		let record_len_u64 = record_len as u64;
		let remainder = len % record_len_u64;
		let mut repaired = false;
		if remainder != 0 {
			let repaired_len = len - remainder;
			log::warn!(
				target: "packtable",
				"{}: file size {} is not a multiple of {}, truncating to {}",
				path.display(), len, record_len, repaired_len,
			);
			file.set_len(repaired_len).map_err(|e| {
				Error::Corruption(format!("size repair failed for {}: {}", path.display(), e))
			})?;
			repaired = true;
		}
		let flushed = file.metadata()?.len() / record_len_u64;

		Ok((
			RecordFile {
				path: path.to_path_buf(),
				file,
				record_len,
				buffer_records: buffer_records.max(1),
				flushed,
				buffer: Vec::new(),
				dirty: false,
				delete_on_exit: false,
			},
			existed_before,
			repaired,
		))
	}

	#[cfg(unix)]
	fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
		use std::os::unix::fs::FileExt;
		Ok(self.file.read_exact_at(buf, offset)?)
	}

	#[cfg(unix)]
	fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()> {
		use std::os::unix::fs::FileExt;
		self.dirty = true;
		Ok(self.file.write_all_at(buf, offset)?)
	}

	#[cfg(windows)]
	fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
		use std::os::windows::fs::FileExt;
		let mut read = 0;
		while read < buf.len() {
			read += self.file.seek_read(&mut buf[read..], offset + read as u64)?;
		}
		Ok(())
	}

	#[cfg(windows)]
	fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()> {
		use std::os::windows::fs::FileExt;
		self.dirty = true;
		let mut written = 0;
		while written < buf.len() {
			written += self.file.seek_write(&buf[written..], offset + written as u64)?;
		}
		Ok(())
	}

	fn buffered_records(&self) -> u64 {
		(self.buffer.len() / self.record_len) as u64
	}

	/// Logical record count: records on disk plus records still buffered.
	pub fn size(&self) -> u64 {
		self.flushed + self.buffered_records()
	}

	pub fn get(&self, i: u64, out: &mut [u8]) -> Result<()> {
		debug_assert_eq!(out.len(), self.record_len);
		if i >= self.flushed {
			let start = ((i - self.flushed) as usize) * self.record_len;
			out.copy_from_slice(&self.buffer[start..start + self.record_len]);
			Ok(())
		} else {
			self.read_at(out, i * self.record_len as u64)
		}
	}

	/// Reads `out.len()` bytes of slot `i` starting at byte `start` within
	/// the record, without paying for a full-record read. Used to read just
	/// the key portion of a slot when the caller doesn't already know it.
	pub fn get_range(&self, i: u64, start: usize, out: &mut [u8]) -> Result<()> {
		if i >= self.flushed {
			let base = ((i - self.flushed) as usize) * self.record_len;
			out.copy_from_slice(&self.buffer[base + start..base + start + out.len()]);
			Ok(())
		} else {
			self.read_at(out, i * self.record_len as u64 + start as u64)
		}
	}

	pub fn put(&mut self, i: u64, buf: &[u8]) -> Result<()> {
		debug_assert_eq!(buf.len(), self.record_len);
		let size = self.size();
		assert!(i < size, "put past end of file");
		log::trace!(target: "packtable", "put slot {}: {}", i, hex(buf));
		if i >= self.flushed {
			let start = ((i - self.flushed) as usize) * self.record_len;
			self.buffer[start..start + self.record_len].copy_from_slice(buf);
			Ok(())
		} else {
			self.write_at(buf, i * self.record_len as u64)
		}
	}

	/// Appends `buf` as a new record, returning its slot. Flushes the
	/// write-behind buffer first if it has reached `buffer_records`.
	pub fn add(&mut self, buf: &[u8]) -> Result<u64> {
		debug_assert_eq!(buf.len(), self.record_len);
		if self.buffered_records() as usize >= self.buffer_records {
			self.flush_buffer()?;
		}
		let slot = self.size();
		self.buffer.extend_from_slice(buf);
		log::trace!(target: "packtable", "append slot {}: {}", slot, hex(buf));
		Ok(slot)
	}

	/// Truncates the last record, optionally returning its content.
	pub fn clean_last(&mut self, out: Option<&mut [u8]>) -> Result<()> {
		let size = self.size();
		assert!(size > 0, "clean_last on empty file");
		let last = size - 1;
		if let Some(out) = out {
			self.get(last, out)?;
		}
		if last >= self.flushed {
			let new_len = self.buffer.len() - self.record_len;
			self.buffer.truncate(new_len);
		} else {
			self.dirty = true;
			self.file.set_len(last * self.record_len as u64)?;
			self.flushed = last;
		}
		Ok(())
	}

	/// Writes all buffered records to disk.
	pub fn flush_buffer(&mut self) -> Result<()> {
		if self.buffer.is_empty() {
			return Ok(());
		}
		let offset = self.flushed * self.record_len as u64;
		self.write_at(&self.buffer, offset)?;
		self.flushed += self.buffered_records();
		self.buffer.clear();
		Ok(())
	}

	/// Flushes the buffer then `fsync`s the file.
	pub fn flush(&mut self) -> Result<()> {
		self.flush_buffer()?;
		if self.dirty {
			self.file.sync_data()?;
			self.dirty = false;
		}
		Ok(())
	}

	/// Discards every record and resets the file to empty, in place.
	pub fn clear(&mut self) -> Result<()> {
		self.buffer.clear();
		self.file.set_len(0)?;
		self.flushed = 0;
		self.dirty = false;
		Ok(())
	}

	pub fn filename(&self) -> &Path {
		&self.path
	}

	pub fn delete_on_exit(&mut self, yes: bool) {
		self.delete_on_exit = yes;
	}

	pub fn close(mut self) -> Result<()> {
		self.flush()?;
		if self.delete_on_exit {
			let _ = std::fs::remove_file(&self.path);
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::RecordFile;

	fn temp_path(name: &str) -> std::path::PathBuf {
		let mut p = std::env::temp_dir();
		p.push("packtable-test");
		std::fs::create_dir_all(&p).unwrap();
		p.push(name);
		let _ = std::fs::remove_file(&p);
		p
	}

	#[test]
	fn append_and_read_back() {
		let path = temp_path("record_file_append_and_read_back");
		let (mut f, existed, repaired) = RecordFile::open(&path, 4, 2).unwrap();
		assert!(!existed);
		assert!(!repaired);
		assert_eq!(f.size(), 0);
		let slot = f.add(b"AAAA").unwrap();
		assert_eq!(slot, 0);
		let mut out = [0u8; 4];
		f.get(0, &mut out).unwrap();
		assert_eq!(&out, b"AAAA");
		assert_eq!(f.size(), 1);
		f.close().unwrap();
	}

	#[test]
	fn buffer_flush_on_overflow() {
		let path = temp_path("record_file_buffer_flush_on_overflow");
		let (mut f, _, _) = RecordFile::open(&path, 4, 2).unwrap();
		f.add(b"AAAA").unwrap();
		f.add(b"BBBB").unwrap();
		// Buffer is full (2 records); this one forces a flush first.
		f.add(b"CCCC").unwrap();
		let mut out = [0u8; 4];
		f.get(0, &mut out).unwrap();
		assert_eq!(&out, b"AAAA");
		f.get(2, &mut out).unwrap();
		assert_eq!(&out, b"CCCC");
		f.close().unwrap();
	}

	#[test]
	fn clean_last_truncates() {
		let path = temp_path("record_file_clean_last_truncates");
		let (mut f, _, _) = RecordFile::open(&path, 4, 8).unwrap();
		f.add(b"AAAA").unwrap();
		f.add(b"BBBB").unwrap();
		let mut out = [0u8; 4];
		f.clean_last(Some(&mut out)).unwrap();
		assert_eq!(&out, b"BBBB");
		assert_eq!(f.size(), 1);
		f.close().unwrap();
	}

	#[test]
	fn reopen_repairs_trailing_garbage() {
		let path = temp_path("record_file_reopen_repairs_trailing_garbage");
		{
			let (mut f, existed, repaired) = RecordFile::open(&path, 4, 8).unwrap();
			assert!(!existed);
			assert!(!repaired);
			f.add(b"AAAA").unwrap();
			f.flush().unwrap();
		}
		{
			use std::io::Write;
			let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
			file.write_all(b"xx").unwrap();
		}
		let (f, existed, repaired) = RecordFile::open(&path, 4, 8).unwrap();
		assert!(existed);
		assert!(repaired);
		assert_eq!(f.size(), 1);
		f.close().unwrap();
	}
}
