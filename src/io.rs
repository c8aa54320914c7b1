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

// Per-page I/O engine.
//
// Writes probe for same-filled pages first, then compress into a rented
// stream and store the payload as a pool object. The opportunistic pool
// allocation runs with the stream held; when it fails the stream is
// released before the sleeping allocation and the page is recompressed
// afterwards, since the scratch buffer is only valid while the stream is
// continuously held. Payloads that compress at or above the pool's
// object threshold are stored as raw pages and read back without the
// decompressor.
//
// Sub-page I/O goes through a scratch page: read-modify-write for
// writes, read-and-copy for reads.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use crate::{
	compress::Compressor,
	display::hex,
	error::{Error, Result},
	pool::Pool,
	samefill,
	stats::Stats,
	table::{Slot, SlotTable},
	PAGE_SIZE,
};

/// Scatter segment of a read request. `len` bytes are written into
/// `buf` starting at `offset`.
pub struct SegmentMut<'a> {
	pub buf: &'a mut [u8],
	pub offset: usize,
	pub len: usize,
}

/// Scatter segment of a write request. `len` bytes are read from `buf`
/// starting at `offset`.
pub struct Segment<'a> {
	pub buf: &'a [u8],
	pub offset: usize,
	pub len: usize,
}

/// A block-layer request against the virtual disk. Offsets and lengths
/// are in bytes and must be aligned to the logical block size.
pub enum Request<'a> {
	Read { start: u64, segments: Vec<SegmentMut<'a>> },
	Write { start: u64, segments: Vec<Segment<'a>> },
	Discard { start: u64, len: u64 },
	WriteZeroes { start: u64, len: u64 },
}

impl Request<'_> {
	pub(crate) fn start(&self) -> u64 {
		match self {
			Request::Read { start, .. }
			| Request::Write { start, .. }
			| Request::Discard { start, .. }
			| Request::WriteZeroes { start, .. } => *start,
		}
	}

	pub(crate) fn len(&self) -> u64 {
		match self {
			Request::Read { segments, .. } =>
				segments.iter().map(|s| s.len as u64).sum(),
			Request::Write { segments, .. } =>
				segments.iter().map(|s| s.len as u64).sum(),
			Request::Discard { len, .. } | Request::WriteZeroes { len, .. } => *len,
		}
	}
}

/// The initialized device core: slot table, pool and compressor for one
/// disksize generation.
pub(crate) struct PageStore {
	disksize: u64,
	table: SlotTable,
	pool: Arc<dyn Pool>,
	compressor: Compressor,
	stats: Arc<Stats>,
}

impl PageStore {
	pub fn new(
		disksize: u64,
		pool: Arc<dyn Pool>,
		compressor: Compressor,
		stats: Arc<Stats>,
	) -> PageStore {
		debug_assert!(disksize > 0 && disksize % PAGE_SIZE as u64 == 0);
		PageStore {
			disksize,
			table: SlotTable::new((disksize / PAGE_SIZE as u64) as usize),
			pool,
			compressor,
			stats,
		}
	}

	pub fn disksize(&self) -> u64 {
		self.disksize
	}

	pub fn num_pages(&self) -> usize {
		self.table.len()
	}

	pub fn pool(&self) -> &dyn Pool {
		&*self.pool
	}

	/// Releases whatever payload a slot entry carried and rolls the
	/// occupancy statistics back. Safe to call with the slot lock held:
	/// pool frees do not suspend.
	fn release_entry(&self, old: Slot) {
		match old {
			Slot::Empty => (),
			Slot::Same(_) => {
				self.stats.same_pages.fetch_sub(1, Ordering::Relaxed);
				self.stats.pages_stored.fetch_sub(1, Ordering::Relaxed);
			}
			Slot::Stored { handle, size } => {
				self.pool.free(handle);
				self.stats.compr_data_size.fetch_sub(size as u64, Ordering::Relaxed);
				self.stats.pages_stored.fetch_sub(1, Ordering::Relaxed);
			}
		}
	}

	/// Clears one slot back to empty.
	pub fn free_page(&self, index: usize) {
		let mut slot = self.table.lock(index);
		let old = slot.take();
		self.release_entry(old);
	}

	/// Full-page read into `dst`.
	pub fn read_page(&self, index: usize, dst: &mut [u8]) -> Result<()> {
		debug_assert_eq!(dst.len(), PAGE_SIZE);
		let slot = self.table.lock(index);
		match *slot {
			Slot::Empty => {
				drop(slot);
				samefill::fill(dst, 0);
			}
			Slot::Same(word) => {
				drop(slot);
				samefill::fill(dst, word);
			}
			Slot::Stored { handle, size } => {
				let size = size as usize;
				let mut result = Ok(());
				if size == PAGE_SIZE {
					// Uncompressed sentinel: raw page bytes.
					self.pool.map_read(handle, &mut |data| dst.copy_from_slice(data));
				} else {
					let stream = self.compressor.acquire();
					self.pool.map_read(handle, &mut |data| {
						result = stream.decompress(data, dst);
						if result.is_err() {
							log::error!(
								target: "cramdisk",
								"Decompression failed for page {}: {} bytes: {}",
								index,
								size,
								hex(&data[0..data.len().min(16)]),
							);
						}
					});
					self.compressor.release(stream);
				}
				drop(slot);
				result?;
			}
		}
		Ok(())
	}

	/// Sub-page read: `dst.len()` bytes starting at `offset` within the
	/// page.
	pub fn read_partial(&self, index: usize, offset: usize, dst: &mut [u8]) -> Result<()> {
		debug_assert!(offset + dst.len() <= PAGE_SIZE);
		let mut tmp = vec![0u8; PAGE_SIZE];
		self.read_page(index, &mut tmp)?;
		dst.copy_from_slice(&tmp[offset..offset + dst.len()]);
		Ok(())
	}

	/// Full-page write.
	pub fn write_page(&self, index: usize, src: &[u8], limit_pages: u64) -> Result<()> {
		debug_assert_eq!(src.len(), PAGE_SIZE);

		if let Some(word) = samefill::detect(src) {
			let mut slot = self.table.lock(index);
			let old = slot.take();
			self.release_entry(old);
			*slot = Slot::Same(word);
			drop(slot);
			self.stats.same_pages.fetch_add(1, Ordering::Relaxed);
			self.stats.pages_stored.fetch_add(1, Ordering::Relaxed);
			log::trace!(target: "cramdisk", "Page {} same-filled with {:#018x}", index, word);
			return Ok(());
		}

		let mut stream = self.compressor.acquire();
		let mut comp_len = match stream.compress(src) {
			Ok(len) => len,
			Err(e) => {
				self.compressor.release(stream);
				log::error!(target: "cramdisk", "Compression failed for page {}", index);
				return Err(e);
			}
		};
		if comp_len >= self.pool.max_object_size() {
			comp_len = PAGE_SIZE;
		}

		let handle = loop {
			if let Some(handle) = self.pool.allocate(comp_len, false) {
				break handle;
			}
			// The scratch is tied to the stream, which must not be held
			// across a sleeping allocation.
			self.compressor.release(stream);
			self.stats.writestall.fetch_add(1, Ordering::Relaxed);
			let handle = match self.pool.allocate(comp_len, true) {
				Some(handle) => handle,
				None => {
					log::trace!(target: "cramdisk", "Page {} write failed pool allocation", index);
					return Err(Error::OutOfMemory);
				}
			};
			stream = self.compressor.acquire();
			let recompressed = match stream.compress(src) {
				Ok(len) => len,
				Err(e) => {
					self.pool.free(handle);
					self.compressor.release(stream);
					log::error!(target: "cramdisk", "Compression failed for page {}", index);
					return Err(e);
				}
			};
			let recompressed = if recompressed >= self.pool.max_object_size() {
				PAGE_SIZE
			} else {
				recompressed
			};
			if recompressed == comp_len {
				break handle;
			}
			// The scratch was rebuilt while the stream was away and no
			// longer matches the allocation. Redo it for the new length.
			self.pool.free(handle);
			comp_len = recompressed;
		};

		let total = self.pool.total_pages() as u64;
		self.stats.update_max_used(total);
		if limit_pages > 0 && total > limit_pages {
			self.pool.free(handle);
			self.compressor.release(stream);
			log::trace!(target: "cramdisk", "Page {} write exceeds the page limit", index);
			return Err(Error::OutOfMemory);
		}

		self.pool.map_write(handle, &mut |dst| {
			if comp_len == PAGE_SIZE {
				dst.copy_from_slice(src);
			} else {
				dst.copy_from_slice(&stream.data()[0..comp_len]);
			}
		});

		let mut slot = self.table.lock(index);
		let old = slot.take();
		self.release_entry(old);
		*slot = Slot::Stored { handle, size: comp_len as u32 };
		drop(slot);

		self.compressor.release(stream);
		self.stats.compr_data_size.fetch_add(comp_len as u64, Ordering::Relaxed);
		self.stats.pages_stored.fetch_add(1, Ordering::Relaxed);
		log::trace!(target: "cramdisk", "Stored page {}: {} bytes", index, comp_len);
		Ok(())
	}

	/// Sub-page write: read-modify-write through a scratch page. A slot
	/// that was never written reads as zeros, so the overlay works for
	/// empty slots too.
	pub fn write_partial(
		&self,
		index: usize,
		offset: usize,
		src: &[u8],
		limit_pages: u64,
	) -> Result<()> {
		debug_assert!(offset + src.len() <= PAGE_SIZE);
		let mut tmp = vec![0u8; PAGE_SIZE];
		self.read_page(index, &mut tmp)?;
		tmp[offset..offset + src.len()].copy_from_slice(src);
		self.write_page(index, &tmp, limit_pages)
	}

	/// Frees every whole page covered by `[start, start + len)`.
	/// Partial head and tail fragments are ignored: trimming them would
	/// cost a decompress and re-encode for no memory gain.
	pub fn discard(&self, start: u64, len: u64) {
		let page = PAGE_SIZE as u64;
		let mut index = (start / page) as usize;
		let mut remaining = len;
		let head = start % page;
		if head != 0 {
			if remaining <= page - head {
				return;
			}
			remaining -= page - head;
			index += 1;
		}
		while remaining >= page {
			self.free_page(index);
			self.stats.notify_free.fetch_add(1, Ordering::Relaxed);
			index += 1;
			remaining -= page;
		}
	}

	/// Frees every slot. Used by device reset; the statistics are zeroed
	/// by the caller afterwards.
	pub fn clear_all(&self) {
		for index in 0..self.table.len() {
			self.free_page(index);
		}
	}

	#[cfg(test)]
	pub fn slot(&self, index: usize) -> Slot {
		*self.table.lock(index)
	}
}
