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

use crate::compress::Algorithm;
use crate::error::{Error, Result};
use crate::PAGE_SIZE;

/// Device creation options.
#[derive(Debug, Clone)]
pub struct Options {
	/// Logical block size exposed to the host. Must evenly divide the
	/// page size; usually the page size itself, optionally 512.
	pub logical_block_size: u32,
	/// Compression algorithm used at the next initialization.
	pub algorithm: Algorithm,
	/// Soft cap on total pool pages. 0 means no cap.
	pub limit_pages: u64,
}

impl Default for Options {
	fn default() -> Options {
		Options {
			logical_block_size: PAGE_SIZE as u32,
			algorithm: Algorithm::Lz4,
			limit_pages: 0,
		}
	}
}

/// Parses a byte size with an optional k/K, m/M or g/G suffix.
pub fn parse_size(value: &str) -> Result<u64> {
	let value = value.trim();
	let (digits, shift) = match value.bytes().last() {
		Some(b'k') | Some(b'K') => (&value[..value.len() - 1], 10),
		Some(b'm') | Some(b'M') => (&value[..value.len() - 1], 20),
		Some(b'g') | Some(b'G') => (&value[..value.len() - 1], 30),
		_ => (value, 0),
	};
	let number: u64 = digits
		.parse()
		.map_err(|_| Error::InvalidParameter(format!("bad size value {:?}", value)))?;
	number
		.checked_mul(1u64 << shift)
		.ok_or_else(|| Error::InvalidParameter(format!("size value {:?} overflows", value)))
}
