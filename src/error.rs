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

/// Errors surfaced by the I/O engine and the configuration interface.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
	/// Misaligned or out-of-range request.
	InvalidIo,
	/// Pool or scratch allocation failed, or the page limit would be exceeded.
	OutOfMemory,
	/// A stored payload could not be decoded. Indicates corruption.
	DecompressFailed,
	/// The compressor rejected a page.
	CompressFailed,
	/// Configuration change rejected in the current device state.
	Busy,
	/// The operation requires an initialized device.
	NotInitialized,
	/// Malformed configuration value.
	InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Error::InvalidIo => write!(f, "Invalid I/O request"),
			Error::OutOfMemory => write!(f, "Out of memory"),
			Error::DecompressFailed => write!(f, "Decompression failed"),
			Error::CompressFailed => write!(f, "Compression failed"),
			Error::Busy => write!(f, "Device busy"),
			Error::NotInitialized => write!(f, "Device not initialized"),
			Error::InvalidParameter(e) => write!(f, "Invalid parameter: {}", e),
		}
	}
}

impl std::error::Error for Error {}
