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

// Device lifecycle and request dispatch.
//
// The device-level lock guards the initialized core (slot table, pool,
// compressor): normal I/O takes the read side, init and reset take the
// write side, so a reset drains in-flight requests before tearing the
// tables down. The claim flag additionally blocks new openers for the
// duration of a reset.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use parking_lot::{Mutex, RwLock};
use crate::{
	compress::{Algorithm, Compressor},
	error::{Error, Result},
	io::{PageStore, Request, Segment, SegmentMut},
	options::{parse_size, Options},
	pool::{Pool, SlabPool},
	stats::{DebugStat, IoStat, MmStat, Stats},
	PAGE_SIZE,
};

/// Builds the object pool backing one device generation. Invoked on
/// every initialization; the pool is dropped on reset.
pub type PoolFactory = Arc<dyn Fn() -> Arc<dyn Pool> + Send + Sync>;

pub struct Disk {
	store: RwLock<Option<PageStore>>,
	stats: Arc<Stats>,
	limit_pages: AtomicU64,
	claim: AtomicBool,
	openers: AtomicUsize,
	algorithm: Mutex<Algorithm>,
	pool_factory: PoolFactory,
	logical_block_size: u32,
}

impl Disk {
	pub fn open(options: &Options) -> Result<Disk> {
		let factory: PoolFactory = Arc::new(|| Arc::new(SlabPool::new(PAGE_SIZE)) as Arc<dyn Pool>);
		Self::open_with_pool(options, factory)
	}

	pub fn open_with_pool(options: &Options, pool_factory: PoolFactory) -> Result<Disk> {
		let lbs = options.logical_block_size;
		if lbs == 0 || PAGE_SIZE as u32 % lbs != 0 {
			return Err(Error::InvalidParameter(format!(
				"logical block size {} does not divide the page size",
				lbs,
			)));
		}
		Ok(Disk {
			store: RwLock::new(None),
			stats: Arc::new(Stats::default()),
			limit_pages: AtomicU64::new(options.limit_pages),
			claim: AtomicBool::new(false),
			openers: AtomicUsize::new(0),
			algorithm: Mutex::new(options.algorithm),
			pool_factory,
			logical_block_size: lbs,
		})
	}

	// Lifecycle.

	/// Sets the disk size and initializes the slot table, pool and
	/// compressor. The size is rounded up to a page multiple.
	pub fn set_disksize(&self, bytes: u64) -> Result<()> {
		if bytes == 0 {
			return Err(Error::InvalidParameter("disksize must be positive".into()));
		}
		let mut store = self.store.write();
		if store.is_some() {
			return Err(Error::Busy);
		}
		let page = PAGE_SIZE as u64;
		let pages = match bytes.checked_add(page - 1) {
			Some(up) => up / page,
			None => return Err(Error::InvalidParameter("disksize overflows".into())),
		};
		let algorithm = *self.algorithm.lock();
		*store = Some(PageStore::new(
			pages * page,
			(self.pool_factory)(),
			Compressor::new(algorithm),
			self.stats.clone(),
		));
		log::debug!(
			target: "cramdisk",
			"Initialized device: {} pages, {}",
			pages,
			algorithm.name(),
		);
		Ok(())
	}

	/// Disk size in bytes, 0 while uninitialized.
	pub fn disksize(&self) -> u64 {
		self.store.read().as_ref().map_or(0, |s| s.disksize())
	}

	pub fn init_state(&self) -> bool {
		self.store.read().is_some()
	}

	/// Tears the device back down to the uninitialized state. Requires
	/// that nobody holds the device open; new openers are refused for
	/// the duration.
	pub fn reset(&self) -> Result<()> {
		if self.claim.swap(true, Ordering::SeqCst) {
			return Err(Error::Busy);
		}
		if self.openers.load(Ordering::SeqCst) != 0 {
			self.claim.store(false, Ordering::SeqCst);
			return Err(Error::Busy);
		}
		// Acquiring the write side drains in-flight I/O.
		let mut guard = self.store.write();
		if let Some(store) = guard.take() {
			store.clear_all();
			let leaked = store.pool().outstanding();
			if leaked != 0 {
				log::error!(target: "cramdisk", "Pool leaked {} objects across reset", leaked);
			}
			log::debug!(target: "cramdisk", "Reset device");
		}
		drop(guard);
		self.stats.zero();
		self.limit_pages.store(0, Ordering::Relaxed);
		self.claim.store(false, Ordering::SeqCst);
		Ok(())
	}

	/// Registers an opener. Refused while a reset holds the claim.
	pub fn open_device(&self) -> Result<()> {
		if self.claim.load(Ordering::SeqCst) {
			return Err(Error::Busy);
		}
		self.openers.fetch_add(1, Ordering::SeqCst);
		if self.claim.load(Ordering::SeqCst) {
			self.openers.fetch_sub(1, Ordering::SeqCst);
			return Err(Error::Busy);
		}
		Ok(())
	}

	pub fn close_device(&self) {
		let before = self.openers.fetch_sub(1, Ordering::SeqCst);
		debug_assert!(before > 0);
	}

	// Configuration.

	/// Selects the algorithm used at the next initialization. Existing
	/// payloads were produced by the current algorithm, so switching is
	/// refused while initialized.
	pub fn set_compressor(&self, name: &str) -> Result<()> {
		let algo = Algorithm::from_name(name).ok_or_else(|| {
			Error::InvalidParameter(format!("unknown compression algorithm {:?}", name))
		})?;
		let store = self.store.read();
		if store.is_some() {
			return Err(Error::Busy);
		}
		*self.algorithm.lock() = algo;
		Ok(())
	}

	/// Lists the available algorithms with the selected one bracketed.
	pub fn compressors(&self) -> String {
		let current = *self.algorithm.lock();
		let mut out = String::new();
		for algo in Algorithm::ALL.iter() {
			if !out.is_empty() {
				out.push(' ');
			}
			if *algo == current {
				out.push('[');
				out.push_str(algo.name());
				out.push(']');
			} else {
				out.push_str(algo.name());
			}
		}
		out
	}

	pub fn algorithm(&self) -> Algorithm {
		*self.algorithm.lock()
	}

	/// Sets the pool page cap from a size string with k/M/G suffixes,
	/// rounded up to whole pages. "0" removes the cap. Effective on the
	/// next write.
	pub fn set_mem_limit(&self, value: &str) -> Result<()> {
		let bytes = parse_size(value)?;
		let page = PAGE_SIZE as u64;
		self.limit_pages.store((bytes + page - 1) / page, Ordering::Relaxed);
		Ok(())
	}

	pub fn set_limit_pages(&self, pages: u64) {
		self.limit_pages.store(pages, Ordering::Relaxed);
	}

	/// Accepts only "0": rewinds the high-water mark to the current pool
	/// size.
	pub fn set_mem_used_max(&self, value: &str) -> Result<()> {
		if value.trim() != "0" {
			return Err(Error::InvalidParameter(format!("expected 0, got {:?}", value)));
		}
		let store = self.store.read();
		let total = store.as_ref().map_or(0, |s| s.pool().total_pages() as u64);
		self.stats.reset_max_used(total);
		Ok(())
	}

	pub fn compact(&self) -> Result<()> {
		let store = self.store.read();
		let store = store.as_ref().ok_or(Error::NotInitialized)?;
		let freed = store.pool().compact();
		self.stats.pages_compacted.fetch_add(freed as u64, Ordering::Relaxed);
		Ok(())
	}

	// Statistics.

	pub fn stats(&self) -> &Stats {
		&self.stats
	}

	pub fn io_stat(&self) -> IoStat {
		IoStat {
			failed_reads: self.stats.failed_reads.load(Ordering::Relaxed),
			failed_writes: self.stats.failed_writes.load(Ordering::Relaxed),
			invalid_io: self.stats.invalid_io.load(Ordering::Relaxed),
			notify_free: self.stats.notify_free.load(Ordering::Relaxed),
		}
	}

	pub fn mm_stat(&self) -> MmStat {
		let store = self.store.read();
		let total = store.as_ref().map_or(0, |s| s.pool().total_pages() as u64);
		let page = PAGE_SIZE as u64;
		MmStat {
			orig_data_size: self.stats.pages_stored.load(Ordering::Relaxed) * page,
			compr_data_size: self.stats.compr_data_size.load(Ordering::Relaxed),
			mem_used: total * page,
			mem_limit: self.limit_pages.load(Ordering::Relaxed) * page,
			mem_used_max: self.stats.max_used_pages.load(Ordering::Relaxed) * page,
			same_pages: self.stats.same_pages.load(Ordering::Relaxed),
			pages_compacted: self.stats.pages_compacted.load(Ordering::Relaxed),
		}
	}

	pub fn debug_stat(&self) -> DebugStat {
		DebugStat { version: 1, writestall: self.stats.writestall.load(Ordering::Relaxed) }
	}

	// I/O.

	/// Validates and executes one block request. Per-segment operations
	/// proceed in order; the first failure abandons the remainder.
	pub fn make_request(&self, request: Request) -> Result<()> {
		let guard = self.store.read();
		let store = match guard.as_ref() {
			Some(store) => store,
			None => {
				self.stats.invalid_io.fetch_add(1, Ordering::Relaxed);
				return Err(Error::InvalidIo);
			}
		};
		let start = request.start();
		let len = request.len();
		let lbs = self.logical_block_size as u64;
		let in_bounds = start
			.checked_add(len)
			.map_or(false, |end| end <= store.disksize());
		if start % lbs != 0 || len % lbs != 0 || !in_bounds {
			self.stats.invalid_io.fetch_add(1, Ordering::Relaxed);
			log::debug!(target: "cramdisk", "Invalid request: start {}, len {}", start, len);
			return Err(Error::InvalidIo);
		}
		let limit = self.limit_pages.load(Ordering::Relaxed);
		match request {
			Request::Read { start, segments } => {
				let mut pos = start;
				for mut segment in segments {
					self.stats.num_reads.fetch_add(1, Ordering::Relaxed);
					log::trace!(target: "cramdisk", "Read segment: {} bytes at {}", segment.len, pos);
					if let Err(e) = read_segment(store, pos, &mut segment) {
						self.stats.failed_reads.fetch_add(1, Ordering::Relaxed);
						return Err(e);
					}
					pos += segment.len as u64;
				}
			}
			Request::Write { start, segments } => {
				let mut pos = start;
				for segment in segments {
					self.stats.num_writes.fetch_add(1, Ordering::Relaxed);
					log::trace!(target: "cramdisk", "Write segment: {} bytes at {}", segment.len, pos);
					if let Err(e) = write_segment(store, pos, &segment, limit) {
						self.stats.failed_writes.fetch_add(1, Ordering::Relaxed);
						return Err(e);
					}
					pos += segment.len as u64;
				}
			}
			Request::Discard { start, len } | Request::WriteZeroes { start, len } => {
				store.discard(start, len);
			}
		}
		Ok(())
	}

	/// Single-page read fast path.
	pub fn read_page(&self, index: u64, page: &mut [u8]) -> Result<()> {
		let guard = self.store.read();
		let store = self.page_io_store(&guard, index, page.len())?;
		self.stats.num_reads.fetch_add(1, Ordering::Relaxed);
		store.read_page(index as usize, page).map_err(|e| {
			self.stats.failed_reads.fetch_add(1, Ordering::Relaxed);
			e
		})
	}

	/// Single-page write fast path.
	pub fn write_page(&self, index: u64, page: &[u8]) -> Result<()> {
		let guard = self.store.read();
		let store = self.page_io_store(&guard, index, page.len())?;
		self.stats.num_writes.fetch_add(1, Ordering::Relaxed);
		let limit = self.limit_pages.load(Ordering::Relaxed);
		store.write_page(index as usize, page, limit).map_err(|e| {
			self.stats.failed_writes.fetch_add(1, Ordering::Relaxed);
			e
		})
	}

	/// External hint that a page is no longer needed, e.g. swap slot
	/// reclaim. Equivalent to discarding that one page.
	pub fn slot_free_notify(&self, index: u64) {
		let guard = self.store.read();
		if let Some(store) = guard.as_ref() {
			if (index as usize) < store.num_pages() {
				store.free_page(index as usize);
				self.stats.notify_free.fetch_add(1, Ordering::Relaxed);
			}
		}
	}

	fn page_io_store<'a>(
		&self,
		guard: &'a Option<PageStore>,
		index: u64,
		len: usize,
	) -> Result<&'a PageStore> {
		let store = match guard.as_ref() {
			Some(store) => store,
			None => {
				self.stats.invalid_io.fetch_add(1, Ordering::Relaxed);
				return Err(Error::InvalidIo);
			}
		};
		if len != PAGE_SIZE || index >= store.num_pages() as u64 {
			self.stats.invalid_io.fetch_add(1, Ordering::Relaxed);
			return Err(Error::InvalidIo);
		}
		Ok(store)
	}

	#[cfg(test)]
	fn outstanding_objects(&self) -> usize {
		self.store.read().as_ref().map_or(0, |s| s.pool().outstanding())
	}
}

fn read_segment(store: &PageStore, start: u64, segment: &mut SegmentMut) -> Result<()> {
	debug_assert!(segment.offset + segment.len <= segment.buf.len());
	let page = PAGE_SIZE as u64;
	let mut pos = start;
	let mut done = 0;
	while done < segment.len {
		let index = (pos / page) as usize;
		let offset = (pos % page) as usize;
		let this_len = (PAGE_SIZE - offset).min(segment.len - done);
		let dst = &mut segment.buf[segment.offset + done..segment.offset + done + this_len];
		if this_len == PAGE_SIZE {
			store.read_page(index, dst)?;
		} else {
			store.read_partial(index, offset, dst)?;
		}
		pos += this_len as u64;
		done += this_len;
	}
	Ok(())
}

fn write_segment(store: &PageStore, start: u64, segment: &Segment, limit: u64) -> Result<()> {
	debug_assert!(segment.offset + segment.len <= segment.buf.len());
	let page = PAGE_SIZE as u64;
	let mut pos = start;
	let mut done = 0;
	while done < segment.len {
		let index = (pos / page) as usize;
		let offset = (pos % page) as usize;
		let this_len = (PAGE_SIZE - offset).min(segment.len - done);
		let src = &segment.buf[segment.offset + done..segment.offset + done + this_len];
		if this_len == PAGE_SIZE {
			store.write_page(index, src, limit)?;
		} else {
			store.write_partial(index, offset, src, limit)?;
		}
		pos += this_len as u64;
		done += this_len;
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::Disk;
	use crate::{
		error::Error,
		io::{Request, Segment, SegmentMut},
		options::Options,
		PAGE_SIZE,
	};
	use rand::RngCore;
	use std::sync::Arc;
	use std::sync::atomic::{AtomicBool, Ordering};

	fn disk(pages: u64) -> Disk {
		env_logger::try_init().ok();
		let disk = Disk::open(&Options::default()).unwrap();
		disk.set_disksize(pages * PAGE_SIZE as u64).unwrap();
		disk
	}

	fn patterned() -> Vec<u8> {
		(0..PAGE_SIZE).map(|i| (i % 256) as u8).collect()
	}

	fn random_page() -> Vec<u8> {
		let mut page = vec![0u8; PAGE_SIZE];
		rand::thread_rng().fill_bytes(&mut page);
		page
	}

	#[test]
	fn same_page_round_trip() {
		let disk = disk(4);
		disk.write_page(2, &vec![0x42u8; PAGE_SIZE]).unwrap();

		let mm = disk.mm_stat();
		assert_eq!(mm.same_pages, 1);
		assert_eq!(mm.orig_data_size, PAGE_SIZE as u64);
		assert_eq!(mm.compr_data_size, 0);
		assert_eq!(disk.outstanding_objects(), 0);

		let mut out = vec![0u8; PAGE_SIZE];
		disk.read_page(2, &mut out).unwrap();
		assert!(out.iter().all(|b| *b == 0x42));
	}

	#[test]
	fn compressible_round_trip() {
		let disk = disk(4);
		let src = patterned();
		disk.write_page(0, &src).unwrap();

		let mm = disk.mm_stat();
		assert_eq!(mm.same_pages, 0);
		assert_eq!(mm.orig_data_size, PAGE_SIZE as u64);
		assert!(mm.compr_data_size > 0 && mm.compr_data_size < PAGE_SIZE as u64);
		assert_eq!(disk.outstanding_objects(), 1);

		let mut out = vec![0u8; PAGE_SIZE];
		disk.read_page(0, &mut out).unwrap();
		assert_eq!(out, src);
	}

	#[test]
	fn incompressible_page_stored_raw() {
		let disk = disk(4);
		let src = random_page();
		disk.write_page(1, &src).unwrap();
		assert_eq!(disk.mm_stat().compr_data_size, PAGE_SIZE as u64);

		let mut out = vec![0u8; PAGE_SIZE];
		disk.read_page(1, &mut out).unwrap();
		assert_eq!(out, src);
	}

	#[test]
	fn overwrite_with_zeros_frees_payload() {
		let disk = disk(4);
		disk.write_page(0, &patterned()).unwrap();
		disk.write_page(0, &vec![0u8; PAGE_SIZE]).unwrap();

		let mm = disk.mm_stat();
		assert_eq!(mm.orig_data_size, PAGE_SIZE as u64);
		assert_eq!(mm.same_pages, 1);
		assert_eq!(mm.compr_data_size, 0);
		assert_eq!(disk.outstanding_objects(), 0);
	}

	#[test]
	fn discard_request_reclaims() {
		let disk = disk(4);
		disk.write_page(0, &patterned()).unwrap();

		disk.make_request(Request::Discard { start: 0, len: PAGE_SIZE as u64 }).unwrap();
		assert_eq!(disk.mm_stat().orig_data_size, 0);
		assert_eq!(disk.io_stat().notify_free, 1);
		assert_eq!(disk.outstanding_objects(), 0);

		let mut out = vec![0xffu8; PAGE_SIZE];
		disk.read_page(0, &mut out).unwrap();
		assert!(out.iter().all(|b| *b == 0));
	}

	#[test]
	fn write_zeroes_acts_like_discard() {
		let disk = disk(4);
		disk.write_page(1, &patterned()).unwrap();
		disk.make_request(Request::WriteZeroes {
			start: PAGE_SIZE as u64,
			len: PAGE_SIZE as u64,
		})
		.unwrap();
		assert_eq!(disk.mm_stat().orig_data_size, 0);
		assert_eq!(disk.outstanding_objects(), 0);
	}

	#[test]
	fn misaligned_request_rejected() {
		let disk = disk(4);
		let src = patterned();
		let result = disk.make_request(Request::Write {
			start: 512,
			segments: vec![Segment { buf: &src, offset: 0, len: PAGE_SIZE }],
		});
		assert_eq!(result, Err(Error::InvalidIo));
		assert_eq!(disk.io_stat().invalid_io, 1);
		assert_eq!(disk.mm_stat().orig_data_size, 0);
	}

	#[test]
	fn bounds_are_inclusive_at_disksize() {
		let disk = disk(2);
		let src = patterned();
		// Last page exactly: accepted.
		disk.make_request(Request::Write {
			start: PAGE_SIZE as u64,
			segments: vec![Segment { buf: &src, offset: 0, len: PAGE_SIZE }],
		})
		.unwrap();
		// One page past the end: rejected.
		let result = disk.make_request(Request::Write {
			start: 2 * PAGE_SIZE as u64,
			segments: vec![Segment { buf: &src, offset: 0, len: PAGE_SIZE }],
		});
		assert_eq!(result, Err(Error::InvalidIo));
		assert_eq!(disk.io_stat().invalid_io, 1);
	}

	#[test]
	fn uninitialized_io_is_invalid() {
		let disk = Disk::open(&Options::default()).unwrap();
		let mut out = vec![0u8; PAGE_SIZE];
		assert_eq!(disk.read_page(0, &mut out), Err(Error::InvalidIo));
		assert_eq!(disk.io_stat().invalid_io, 1);
	}

	#[test]
	fn multi_segment_request_spans_pages() {
		let disk = disk(4);
		let mut src = Vec::new();
		for _ in 0..3 {
			src.extend_from_slice(&patterned());
		}
		disk.make_request(Request::Write {
			start: 0,
			segments: vec![
				Segment { buf: &src, offset: 0, len: 2 * PAGE_SIZE },
				Segment { buf: &src, offset: 2 * PAGE_SIZE, len: PAGE_SIZE },
			],
		})
		.unwrap();
		assert_eq!(disk.stats().num_writes.load(Ordering::Relaxed), 2);

		let mut out = vec![0u8; 3 * PAGE_SIZE];
		disk.make_request(Request::Read {
			start: 0,
			segments: vec![SegmentMut { buf: &mut out, offset: 0, len: 3 * PAGE_SIZE }],
		})
		.unwrap();
		assert_eq!(out, src);
	}

	#[test]
	fn sub_block_io_with_small_logical_blocks() {
		env_logger::try_init().ok();
		let options = Options { logical_block_size: 512, ..Options::default() };
		let disk = Disk::open(&options).unwrap();
		disk.set_disksize(4 * PAGE_SIZE as u64).unwrap();

		let src = vec![0xabu8; 512];
		disk.make_request(Request::Write {
			start: 512,
			segments: vec![Segment { buf: &src, offset: 0, len: 512 }],
		})
		.unwrap();

		let mut out = vec![0u8; 1024];
		disk.make_request(Request::Read {
			start: 0,
			segments: vec![SegmentMut { buf: &mut out, offset: 0, len: 1024 }],
		})
		.unwrap();
		assert!(out[0..512].iter().all(|b| *b == 0));
		assert!(out[512..].iter().all(|b| *b == 0xab));
	}

	#[test]
	fn mem_limit_rejects_write() {
		let disk = disk(4);
		disk.set_mem_limit("4096").unwrap();

		disk.write_page(0, &random_page()).unwrap();
		assert_eq!(disk.write_page(1, &random_page()), Err(Error::OutOfMemory));
		assert_eq!(disk.io_stat().failed_writes, 1);
		assert_eq!(disk.mm_stat().orig_data_size, PAGE_SIZE as u64);

		// The slot stayed empty: reads come back zero.
		let mut out = vec![0xffu8; PAGE_SIZE];
		disk.read_page(1, &mut out).unwrap();
		assert!(out.iter().all(|b| *b == 0));

		// Lifting the limit lets the write through.
		disk.set_mem_limit("0").unwrap();
		disk.write_page(1, &random_page()).unwrap();
	}

	#[test]
	fn reset_clears_everything() {
		let disk = disk(4);
		disk.write_page(0, &patterned()).unwrap();
		disk.write_page(1, &vec![9u8; PAGE_SIZE]).unwrap();

		disk.reset().unwrap();
		assert!(!disk.init_state());
		assert_eq!(disk.disksize(), 0);
		let mm = disk.mm_stat();
		assert_eq!(mm.orig_data_size, 0);
		assert_eq!(mm.compr_data_size, 0);
		assert_eq!(mm.same_pages, 0);

		disk.set_disksize(2 * PAGE_SIZE as u64).unwrap();
		let mut out = vec![0xffu8; PAGE_SIZE];
		disk.read_page(0, &mut out).unwrap();
		assert!(out.iter().all(|b| *b == 0));
	}

	#[test]
	fn set_disksize_twice_is_busy() {
		let disk = disk(2);
		assert_eq!(disk.set_disksize(PAGE_SIZE as u64), Err(Error::Busy));
		assert_eq!(disk.disksize(), 2 * PAGE_SIZE as u64);
	}

	#[test]
	fn disksize_rounds_up_to_page() {
		env_logger::try_init().ok();
		let disk = Disk::open(&Options::default()).unwrap();
		disk.set_disksize(PAGE_SIZE as u64 + 1).unwrap();
		assert_eq!(disk.disksize(), 2 * PAGE_SIZE as u64);
	}

	#[test]
	fn compressor_selection() {
		env_logger::try_init().ok();
		let disk = Disk::open(&Options::default()).unwrap();
		assert_eq!(disk.compressors(), "[lz4] zstd snappy");
		disk.set_compressor("zstd").unwrap();
		assert_eq!(disk.compressors(), "lz4 [zstd] snappy");
		assert!(matches!(disk.set_compressor("lzo"), Err(Error::InvalidParameter(_))));

		disk.set_disksize(PAGE_SIZE as u64).unwrap();
		assert_eq!(disk.set_compressor("lz4"), Err(Error::Busy));

		// The selected algorithm round-trips through a write.
		let src = patterned();
		disk.write_page(0, &src).unwrap();
		let mut out = vec![0u8; PAGE_SIZE];
		disk.read_page(0, &mut out).unwrap();
		assert_eq!(out, src);
	}

	#[test]
	fn openers_block_reset() {
		let disk = disk(2);
		disk.open_device().unwrap();
		assert_eq!(disk.reset(), Err(Error::Busy));
		disk.close_device();
		disk.reset().unwrap();
	}

	#[test]
	fn claim_blocks_new_openers() {
		let disk = disk(2);
		// A failed reset releases the claim again.
		disk.open_device().unwrap();
		assert_eq!(disk.reset(), Err(Error::Busy));
		disk.open_device().unwrap();
		disk.close_device();
		disk.close_device();
	}

	#[test]
	fn slot_free_notify_drops_page() {
		let disk = disk(2);
		disk.write_page(0, &patterned()).unwrap();
		disk.slot_free_notify(0);
		assert_eq!(disk.io_stat().notify_free, 1);
		assert_eq!(disk.mm_stat().orig_data_size, 0);
		// Out-of-range hints are ignored.
		disk.slot_free_notify(99);
		assert_eq!(disk.io_stat().notify_free, 1);
	}

	#[test]
	fn compact_accumulates_freed_pages() {
		let disk = disk(4);
		assert_eq!(
			Disk::open(&Options::default()).unwrap().compact(),
			Err(Error::NotInitialized),
		);
		for i in 0..3 {
			disk.write_page(i, &random_page()).unwrap();
		}
		disk.make_request(Request::Discard { start: 0, len: 3 * PAGE_SIZE as u64 }).unwrap();
		disk.compact().unwrap();
		assert_eq!(disk.mm_stat().pages_compacted, 3);
		assert_eq!(disk.mm_stat().mem_used, 0);
	}

	#[test]
	fn mem_used_max_resets_to_current() {
		let disk = disk(4);
		disk.write_page(0, &random_page()).unwrap();
		disk.write_page(1, &random_page()).unwrap();
		disk.make_request(Request::Discard { start: 0, len: 2 * PAGE_SIZE as u64 }).unwrap();
		disk.compact().unwrap();

		assert_eq!(disk.mm_stat().mem_used_max, 2 * PAGE_SIZE as u64);
		assert!(matches!(disk.set_mem_used_max("1"), Err(Error::InvalidParameter(_))));
		disk.set_mem_used_max("0").unwrap();
		assert_eq!(disk.mm_stat().mem_used_max, 0);
	}

	#[test]
	fn partial_write_round_trip_through_requests() {
		env_logger::try_init().ok();
		let options = Options { logical_block_size: 512, ..Options::default() };
		let disk = Disk::open(&options).unwrap();
		disk.set_disksize(2 * PAGE_SIZE as u64).unwrap();

		let base = patterned();
		disk.write_page(0, &base).unwrap();

		let patch = vec![0x5au8; 512];
		disk.make_request(Request::Write {
			start: 1024,
			segments: vec![Segment { buf: &patch, offset: 0, len: 512 }],
		})
		.unwrap();

		let mut out = vec![0u8; PAGE_SIZE];
		disk.read_page(0, &mut out).unwrap();
		assert_eq!(&out[0..1024], &base[0..1024]);
		assert_eq!(&out[1024..1536], &patch[..]);
		assert_eq!(&out[1536..], &base[1536..]);
	}

	#[test]
	fn concurrent_same_slot_write_read_is_atomic() {
		let disk = Arc::new(disk(2));
		let a: Vec<u8> = (0..PAGE_SIZE).map(|i| (i % 251) as u8).collect();
		let b: Vec<u8> = (0..PAGE_SIZE).map(|i| (i % 241) as u8).collect();
		disk.write_page(0, &a).unwrap();

		let stop = Arc::new(AtomicBool::new(false));
		let reader = {
			let disk = disk.clone();
			let (a, b) = (a.clone(), b.clone());
			let stop = stop.clone();
			std::thread::spawn(move || {
				let mut out = vec![0u8; PAGE_SIZE];
				while !stop.load(Ordering::Relaxed) {
					disk.read_page(0, &mut out).unwrap();
					assert!(out == a || out == b, "observed a hybrid page");
				}
			})
		};
		for _ in 0..200 {
			disk.write_page(0, &b).unwrap();
			disk.write_page(0, &a).unwrap();
		}
		stop.store(true, Ordering::Relaxed);
		reader.join().unwrap();
	}
}
