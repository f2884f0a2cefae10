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

//! An embedded, single-file, fixed-record-size primary-key table.
//!
//! A [`Table`] maps a fixed-width primary key to a fixed-width payload,
//! backed by one flat file of equal-sized records (see [`RowSchema`]), with
//! an in-RAM key index and an optional in-RAM shadow of the record tails.
//! It is designed for workloads where the key set fits comfortably in
//! memory and the full record set may or may not; physical I/O is batched
//! through a write-behind buffer, and, memory permitting, reads are served
//! entirely from RAM.
//!
//! ```no_run
//! use packtable::{Options, RowSchema, Table};
//!
//! # fn main() -> packtable::Result<()> {
//! let schema = RowSchema::key_value(4, 4);
//! let table: Table = Table::open("/tmp/example.table", schema, Options::default())?;
//! table.put(b"AAAABBBB")?;
//! assert_eq!(table.get(b"AAAA")?, Some(b"AAAABBBB".to_vec()));
//! table.close()?;
//! # Ok(())
//! # }
//! ```

mod display;
mod error;
mod iter;
mod key_index;
mod loader;
mod memory;
mod options;
mod record_file;
mod registry;
mod schema;
mod table;
mod tail_store;

pub use crate::error::{Error, Result};
pub use crate::iter::{Keys, OrderedRows, PhysicalRows};
pub use crate::memory::{MemoryOracle, SysMemoryOracle};
pub use crate::options::Options;
pub use crate::registry::{filenames, memory_stats, MemoryStats};
pub use crate::schema::{Column, KeyOrder, Lexicographic, RowSchema};
pub use crate::table::Table;
