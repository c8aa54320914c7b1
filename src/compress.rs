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

// Page compression. Streams rent a thread-local scratch buffer; the
// buffer contents are only valid while the stream is held, so a writer
// that releases its stream mid-operation must recompress afterwards.
//
// The cache keeps at most MAX_CACHED_STREAMS scratch buffers per
// algorithm per thread, sized for a bounded I/O thread pool. A thread
// that exits drops its cached streams with its thread-local storage.

use std::cell::RefCell;
use crate::error::{Error, Result};

const MAX_CACHED_STREAMS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
	Lz4,
	Zstd,
	Snappy,
}

impl Algorithm {
	pub const ALL: [Algorithm; 3] = [Algorithm::Lz4, Algorithm::Zstd, Algorithm::Snappy];

	pub fn name(self) -> &'static str {
		match self {
			Algorithm::Lz4 => "lz4",
			Algorithm::Zstd => "zstd",
			Algorithm::Snappy => "snappy",
		}
	}

	pub fn from_name(name: &str) -> Option<Algorithm> {
		match name {
			"lz4" => Some(Algorithm::Lz4),
			"zstd" => Some(Algorithm::Zstd),
			"snappy" => Some(Algorithm::Snappy),
			_ => None,
		}
	}
}

pub fn has_algorithm(name: &str) -> bool {
	Algorithm::from_name(name).is_some()
}

pub struct Compressor {
	algo: Algorithm,
}

pub struct Stream {
	algo: Algorithm,
	buf: Vec<u8>,
}

thread_local! {
	static STREAMS: RefCell<Vec<Stream>> = RefCell::new(Vec::new());
}

impl Compressor {
	pub fn new(algo: Algorithm) -> Compressor {
		Compressor { algo }
	}

	pub fn algorithm(&self) -> Algorithm {
		self.algo
	}

	/// Rents an executor-local stream, reusing a cached scratch buffer
	/// when one exists for this algorithm.
	pub fn acquire(&self) -> Stream {
		let algo = self.algo;
		STREAMS.with(|cache| {
			let mut cache = cache.borrow_mut();
			match cache.iter().position(|s| s.algo == algo) {
				Some(index) => cache.swap_remove(index),
				None => Stream { algo, buf: Vec::new() },
			}
		})
	}

	pub fn release(&self, stream: Stream) {
		STREAMS.with(|cache| {
			let mut cache = cache.borrow_mut();
			if cache.iter().filter(|s| s.algo == stream.algo).count() < MAX_CACHED_STREAMS {
				cache.push(stream);
			}
		});
	}
}

impl Stream {
	/// Compresses `src` into the stream scratch and returns the
	/// compressed length. The scratch is overwritten on every call.
	pub fn compress(&mut self, src: &[u8]) -> Result<usize> {
		self.buf = match self.algo {
			Algorithm::Lz4 =>
				lz4::block::compress(src, None, false).map_err(|_| Error::CompressFailed)?,
			Algorithm::Zstd =>
				zstd::block::compress(src, 0).map_err(|_| Error::CompressFailed)?,
			Algorithm::Snappy =>
				snap::raw::Encoder::new().compress_vec(src).map_err(|_| Error::CompressFailed)?,
		};
		Ok(self.buf.len())
	}

	/// The scratch contents produced by the last `compress`.
	pub fn data(&self) -> &[u8] {
		&self.buf
	}

	/// Decompresses `src` into the whole of `dst`. A payload that decodes
	/// to any other length is an error.
	pub fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<()> {
		match self.algo {
			Algorithm::Lz4 => {
				let out = lz4::block::decompress(src, Some(dst.len() as i32))
					.map_err(|_| Error::DecompressFailed)?;
				if out.len() != dst.len() {
					return Err(Error::DecompressFailed);
				}
				dst.copy_from_slice(&out);
			}
			Algorithm::Zstd => {
				let out = zstd::block::decompress(src, dst.len())
					.map_err(|_| Error::DecompressFailed)?;
				if out.len() != dst.len() {
					return Err(Error::DecompressFailed);
				}
				dst.copy_from_slice(&out);
			}
			Algorithm::Snappy => {
				let written = snap::raw::Decoder::new()
					.decompress(src, dst)
					.map_err(|_| Error::DecompressFailed)?;
				if written != dst.len() {
					return Err(Error::DecompressFailed);
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::{has_algorithm, Algorithm, Compressor};
	use rand::RngCore;

	fn round_trip(algo: Algorithm) {
		let compressor = Compressor::new(algo);
		let src: Vec<u8> = (0..4096usize).map(|i| (i % 256) as u8).collect();

		let mut stream = compressor.acquire();
		let len = stream.compress(&src).unwrap();
		assert!(len > 0 && len < src.len(), "{}: {} bytes", algo.name(), len);

		let mut dst = vec![0u8; 4096];
		stream.decompress(&stream.data().to_vec(), &mut dst).unwrap();
		assert_eq!(dst, src);
		compressor.release(stream);
	}

	#[test]
	fn round_trips() {
		for algo in Algorithm::ALL {
			round_trip(algo);
		}
	}

	#[test]
	fn random_data_does_not_shrink() {
		let mut src = vec![0u8; 4096];
		rand::thread_rng().fill_bytes(&mut src);
		for algo in Algorithm::ALL {
			let compressor = Compressor::new(algo);
			let mut stream = compressor.acquire();
			let len = stream.compress(&src).unwrap();
			assert!(len > 3072, "{}: {} bytes", algo.name(), len);
			compressor.release(stream);
		}
	}

	#[test]
	fn garbage_fails_to_decompress() {
		let garbage = vec![0xa5u8; 100];
		let mut dst = vec![0u8; 4096];
		for algo in Algorithm::ALL {
			let compressor = Compressor::new(algo);
			let stream = compressor.acquire();
			assert!(stream.decompress(&garbage, &mut dst).is_err(), "{}", algo.name());
			compressor.release(stream);
		}
	}

	#[test]
	fn algorithm_registry() {
		assert_eq!(Algorithm::from_name("lz4"), Some(Algorithm::Lz4));
		assert_eq!(Algorithm::from_name("zstd"), Some(Algorithm::Zstd));
		assert_eq!(Algorithm::from_name("snappy"), Some(Algorithm::Snappy));
		assert!(has_algorithm("lz4"));
		assert!(!has_algorithm("lzo"));
		for algo in Algorithm::ALL {
			assert_eq!(Algorithm::from_name(algo.name()), Some(algo));
		}
	}
}
